//! # Mesh Chain
//!
//! A peer-to-peer proof-of-work ledger. Every node keeps a full replica of
//! one linear chain of blocks, mines payloads submitted anywhere on the
//! network, and reconciles the replicas through fork resolution, orphan
//! buffering and gap-fill requests.
//!
//! ## Layout
//! - `core/`: blocks, the block tree, proof of work and the chain engine
//! - `network/`: the UDP peer bus, command handlers and the node facade
//! - `config/`: defaults, TOML file and environment overrides
//! - `cli/`: startup flags and console commands
//! - `utils/`: hashing and JSON helpers
//!
//! Peers talk in single datagrams: one command byte followed by a JSON body.
//! Nothing is persisted; a restarted node syncs from its peers.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod utils;

#[cfg(test)]
pub mod testnet;

pub use cli::{ConsoleCommand, Opt, PeerArg};
pub use config::{Config, MiningSettings, NetworkSettings, SyncSettings};
pub use core::{
    AddReport, AppendOutcome, Block, BlockId, BlockTree, ChainEngine, ChainViolation,
    ProofOfWork, GENESIS_PAYLOAD,
};
pub use error::{BlockchainError, Result};
pub use network::{
    Command, Handler, HandlerRegistry, Node, Nodes, PeerBus, PeerNetwork, Server, NODE_VERSION,
};
pub use utils::{current_timestamp_nanos, sha256_digest, sha256_hex};
