//! Utility functions and helpers
//!
//! Hashing, timestamps and the JSON encoding used on the wire.

pub mod crypto;
pub mod serialization;

pub use crypto::{current_timestamp_nanos, sha256_digest, sha256_hex};
pub use serialization::{deserialize, serialize};
