use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize, sha256_hex};
use serde::{Deserialize, Serialize};

pub const GENESIS_PAYLOAD: &str = "Genesis Block";

/// A data-bearing block.
///
/// `hash` always covers every other field; receivers recompute it instead of
/// trusting the value on the wire. Fork bookkeeping (children, siblings) lives
/// in [`crate::core::BlockTree`], not here, so it is never transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    height: u32,
    parent_hash: String,
    hash: String,
    nonce: u64,
    pow_attempts: u32,
    payload: String,
    #[serde(rename = "timestamp")]
    created_at: i64,
}

impl Block {
    /// Build an unmined block extending `parent_hash`, hash already set
    pub fn new(height: u32, parent_hash: String, payload: String, created_at: i64) -> Block {
        let mut block = Block {
            height,
            parent_hash,
            hash: String::new(),
            nonce: 0,
            pow_attempts: 0,
            payload,
            created_at,
        };
        block.rehash();
        block
    }

    /// Every node derives the same genesis, so it is never transferred
    pub fn genesis() -> Block {
        Block::new(0, String::new(), GENESIS_PAYLOAD.to_string(), 0)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn calculate_hash(&self) -> String {
        let mut data = vec![];
        data.extend(self.height.to_be_bytes());
        data.extend((self.parent_hash.len() as u32).to_be_bytes());
        data.extend(self.parent_hash.as_bytes());
        data.extend(self.nonce.to_be_bytes());
        data.extend(self.pow_attempts.to_be_bytes());
        data.extend((self.payload.len() as u32).to_be_bytes());
        data.extend(self.payload.as_bytes());
        data.extend(self.created_at.to_be_bytes());
        sha256_hex(&data)
    }

    pub fn is_valid(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn verify(&self) -> Result<()> {
        let computed = self.calculate_hash();
        if self.hash != computed {
            return Err(BlockchainError::HashMismatch {
                height: self.height,
                claimed: self.hash.clone(),
                computed,
            });
        }
        Ok(())
    }

    pub(crate) fn rehash(&mut self) {
        self.hash = self.calculate_hash();
    }

    pub(crate) fn set_proof(&mut self, nonce: u64, pow_attempts: u32) {
        self.nonce = nonce;
        self.pow_attempts = pow_attempts;
        self.rehash();
    }

    /// Overwrite the payload and recompute the hash, leaving children pointing
    /// at the old one
    pub(crate) fn rewrite_payload(&mut self, payload: String) {
        self.payload = payload;
        self.rehash();
    }

    pub fn get_height(&self) -> u32 {
        self.height
    }

    pub fn get_parent_hash(&self) -> &str {
        self.parent_hash.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_pow_attempts(&self) -> u32 {
        self.pow_attempts
    }

    pub fn get_payload(&self) -> &str {
        self.payload.as_str()
    }

    pub fn get_created_at(&self) -> i64 {
        self.created_at
    }
}
