//! Core ledger functionality
//!
//! Blocks, proof-of-work, the block arena and the chain engine that resolves
//! forks and buffers orphans.

pub mod block;
pub mod blockchain;
pub mod proof_of_work;
pub mod tree;

pub use block::{Block, GENESIS_PAYLOAD};
pub use blockchain::{AddReport, AppendOutcome, ChainEngine, ChainViolation};
pub use proof_of_work::ProofOfWork;
pub use tree::{BlockId, BlockTree};
