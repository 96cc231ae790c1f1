//! The proof-of-work oracle contract.
//!
//! Only the input/output contract is pinned down here: a sealer searches
//! for a nonce against the header prehash and difficulty under a wall-clock
//! budget. The reference engine is a plain hashcash loop; a production
//! memory-hard search would slot in behind the same trait.

use std::time::{Duration, Instant};

use alloy_primitives::{keccak256, B256, U256};
use tracing::debug;

/// Outcome of one bounded mining attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct MineInfo {
    /// Whether a winning nonce was found before the budget lapsed
    pub completed: bool,
    /// Nonces tried during this attempt
    pub rounds: u64,
}

/// A bounded nonce search against a header prehash.
pub trait PowEngine {
    /// Searches for up to `timeout`; on success writes the winning nonce
    /// into `nonce` and reports completion.
    fn mine(
        &mut self,
        nonce: &mut B256,
        header_hash: &B256,
        difficulty: U256,
        timeout: Duration,
    ) -> MineInfo;

    /// Whether `nonce` satisfies `difficulty` for `header_hash`.
    fn verify(&self, header_hash: &B256, nonce: &B256, difficulty: U256) -> bool;
}

/// Hashcash-style reference engine: a nonce wins when
/// `keccak256(header_hash || nonce)` is at or below `2^256 / difficulty`.
#[derive(Debug, Clone, Default)]
pub struct KeccakPow {
    /// Search counter carried across attempts on the same header.
    counter: u64,
}

impl KeccakPow {
    fn boundary(difficulty: U256) -> U256 {
        U256::MAX / difficulty.max(U256::from(1))
    }
}

impl PowEngine for KeccakPow {
    fn mine(
        &mut self,
        nonce: &mut B256,
        header_hash: &B256,
        difficulty: U256,
        timeout: Duration,
    ) -> MineInfo {
        let deadline = Instant::now() + timeout;
        let mut rounds = 0;
        loop {
            let mut seed = [0u8; 40];
            seed[..32].copy_from_slice(header_hash.as_slice());
            seed[32..].copy_from_slice(&self.counter.to_be_bytes());
            let candidate = keccak256(seed);
            self.counter = self.counter.wrapping_add(1);
            rounds += 1;
            if self.verify(header_hash, &candidate, difficulty) {
                *nonce = candidate;
                debug!(target: "pow", rounds, "sealed");
                return MineInfo { completed: true, rounds };
            }
            if rounds % 1024 == 0 && Instant::now() >= deadline {
                return MineInfo { completed: false, rounds };
            }
        }
    }

    fn verify(&self, header_hash: &B256, nonce: &B256, difficulty: U256) -> bool {
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(header_hash.as_slice());
        preimage[32..].copy_from_slice(nonce.as_slice());
        U256::from_be_bytes(keccak256(preimage).0) <= Self::boundary(difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mine_easy_difficulty() {
        let mut engine = KeccakPow::default();
        let header = keccak256(b"header");
        let mut nonce = B256::ZERO;
        let info =
            engine.mine(&mut nonce, &header, U256::from(4), Duration::from_secs(5));
        assert!(info.completed);
        assert!(engine.verify(&header, &nonce, U256::from(4)));
    }

    #[test]
    fn test_timeout_reports_incomplete() {
        let mut engine = KeccakPow::default();
        let header = keccak256(b"header");
        let mut nonce = B256::ZERO;
        // An absurd difficulty cannot be met within the budget.
        let info = engine.mine(&mut nonce, &header, U256::MAX, Duration::from_millis(10));
        assert!(!info.completed);
        assert_eq!(nonce, B256::ZERO);
    }

    #[test]
    fn test_verify_rejects_wrong_nonce() {
        let engine = KeccakPow::default();
        let header = keccak256(b"header");
        // With difficulty 2 roughly half of all nonces fail; find one.
        let mut rejected = false;
        for i in 0..64u8 {
            if !engine.verify(&header, &B256::repeat_byte(i), U256::from(2)) {
                rejected = true;
                break;
            }
        }
        assert!(rejected);
    }
}
