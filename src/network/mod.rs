//! Peer-to-peer networking over UDP
//!
//! This module handles the peer set, the single-byte-command wire protocol,
//! handler dispatch, and the server that connects the chain engine to the
//! network.

pub mod dispatch;
pub mod node;
pub mod peer_network;
pub mod protocol;
pub mod server;

pub use dispatch::{Handler, HandlerRegistry};
pub use node::{Node, Nodes};
pub use peer_network::{PeerBus, PeerNetwork};
pub use protocol::{BlockRequest, Command, ModifyRequest};
pub use server::{Server, NODE_VERSION};
