use crate::config::MiningSettings;
use crate::core::Block;
use crate::error::{BlockchainError, Result};
use log::{debug, info, warn};
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Bounded, paced nonce search against a hex-prefix difficulty.
///
/// Illustrative only: a two-character prefix over at most `max_rounds`
/// attempts is not a meaningful work requirement.
pub struct ProofOfWork {
    difficulty: String,
    max_rounds: u32,
    round_interval: Duration,
}

impl ProofOfWork {
    pub fn new(settings: &MiningSettings) -> ProofOfWork {
        ProofOfWork {
            difficulty: settings.difficulty.clone(),
            max_rounds: settings.max_rounds,
            round_interval: settings.round_interval(),
        }
    }

    pub fn meets_target(&self, hash: &str) -> bool {
        hash.starts_with(self.difficulty.as_str())
    }

    /// Search for a nonce whose hash carries the difficulty prefix.
    ///
    /// The nonce starts from a random seed and increments each round, with
    /// `pow_attempts` recording the round. When the cap runs out a primary
    /// attempt keeps the last (unmined) hash; anyone else gets `MiningTimeout`.
    pub fn run(&self, block: &mut Block, primary: bool) -> Result<()> {
        let seed: u64 = rand::thread_rng().gen();
        block.set_proof(seed, 0);

        for round in 0..self.max_rounds {
            block.set_proof(seed.wrapping_add(u64::from(round)), round);
            debug!("Try {round} {}", block.get_hash());
            if self.meets_target(block.get_hash()) {
                info!(
                    "Found proof-of-work for height {} after {} rounds: {}",
                    block.get_height(),
                    round + 1,
                    block.get_hash()
                );
                return Ok(());
            }
            if round + 1 < self.max_rounds && !self.round_interval.is_zero() {
                thread::sleep(self.round_interval);
            }
        }

        if primary {
            warn!(
                "No proof-of-work in {} rounds, accepting block {} as primary",
                self.max_rounds,
                block.get_hash()
            );
            Ok(())
        } else {
            Err(BlockchainError::MiningTimeout {
                rounds: self.max_rounds,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(difficulty: &str, max_rounds: u32) -> MiningSettings {
        MiningSettings {
            difficulty: difficulty.to_string(),
            max_rounds,
            round_interval_ms: 0,
        }
    }

    fn candidate() -> Block {
        Block::new(1, Block::genesis().get_hash().to_string(), "A".into(), 42)
    }

    #[test]
    fn test_empty_difficulty_found_first_round() {
        let pow = ProofOfWork::new(&settings("", 60));
        let mut block = candidate();
        pow.run(&mut block, false).unwrap();
        assert_eq!(block.get_pow_attempts(), 0);
        assert!(block.is_valid());
    }

    #[test]
    fn test_single_zero_prefix_is_usually_found() {
        // one hex digit: 1/16 per round, 200 rounds
        let pow = ProofOfWork::new(&settings("0", 200));
        let mut block = candidate();
        pow.run(&mut block, false).unwrap();
        assert!(block.get_hash().starts_with('0'));
        assert!(block.is_valid());
    }

    #[test]
    fn test_timeout_for_non_primary() {
        // 'z' never appears in a hex digest
        let pow = ProofOfWork::new(&settings("z", 5));
        let mut block = candidate();
        let result = pow.run(&mut block, false);
        assert_eq!(result, Err(BlockchainError::MiningTimeout { rounds: 5 }));
    }

    #[test]
    fn test_primary_accepts_unmined_block() {
        let pow = ProofOfWork::new(&settings("z", 5));
        let mut block = candidate();
        pow.run(&mut block, true).unwrap();
        assert!(!pow.meets_target(block.get_hash()));
        assert_eq!(block.get_pow_attempts(), 4);
        assert!(block.is_valid());
    }

    #[test]
    fn test_zero_rounds_still_hashes() {
        let pow = ProofOfWork::new(&settings("z", 0));
        let mut block = candidate();
        pow.run(&mut block, true).unwrap();
        assert!(block.is_valid());
    }
}
