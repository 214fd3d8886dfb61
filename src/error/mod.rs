//! Error handling for the ledger node
//!
//! Every failure a node can hit while mining, reconciling the chain or talking
//! to peers is one of these variants. Per-message and per-peer failures are
//! logged where they are swallowed; only socket bind failure is fatal.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Block content does not hash to the hash it carries
    HashMismatch {
        height: u32,
        claimed: String,
        computed: String,
    },
    /// Proof-of-work round cap exhausted on a non-primary attempt
    MiningTimeout { rounds: u32 },
    /// A mining run is already in progress on this node
    MiningBusy,
    /// Mining attempted before the chain was synced
    NotInitialized,
    /// Known peer without a usable outbound channel
    PeerUnreachable(String),
    /// No peer registered under the given address
    PeerNotFound(String),
    /// Malformed wire payload
    Decode(String),
    /// Lookup by position beyond bounds
    IndexOutOfRange { index: usize, len: usize },
    /// Socket level failures
    Network(String),
    /// JSON encoding/decoding errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::HashMismatch {
                height,
                claimed,
                computed,
            } => write!(
                f,
                "Invalid block at height {height}: hash {claimed} does not match computed {computed}"
            ),
            BlockchainError::MiningTimeout { rounds } => {
                write!(f, "Mining error: no proof-of-work found in {rounds} rounds")
            }
            BlockchainError::MiningBusy => write!(f, "Mining error: already mining"),
            BlockchainError::NotInitialized => {
                write!(f, "Mining error: chain is not initialized")
            }
            BlockchainError::PeerUnreachable(addr) => write!(f, "Peer unreachable: {addr}"),
            BlockchainError::PeerNotFound(addr) => write!(f, "Peer not found: {addr}"),
            BlockchainError::Decode(msg) => write!(f, "Decode error: {msg}"),
            BlockchainError::IndexOutOfRange { index, len } => {
                write!(f, "Index {index} out of range (len {len})")
            }
            BlockchainError::Network(msg) => write!(f, "Network error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BlockchainError {
    fn from(err: serde_json::Error) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}
