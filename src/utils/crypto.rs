use ring::digest::{Context, SHA256};

use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch; used as a block tie-breaker only
pub fn current_timestamp_nanos() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Io(format!("System time error: {e}")))?
        .as_nanos();

    i64::try_from(duration).map_err(|_| BlockchainError::Io("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn sha256_hex(data: &[u8]) -> String {
    HEXLOWER.encode(&sha256_digest(data))
}
