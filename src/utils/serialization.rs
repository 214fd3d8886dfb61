// JSON is the record encoding for blocks and peer descriptors on the wire
use crate::error::{BlockchainError, Result};
use serde::{de::DeserializeOwned, Serialize};

pub fn serialize<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(data)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Malformed input is a decode error: it comes from a peer, not from us
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| BlockchainError::Decode(format!("Deserialization failed: {e}")))
}
