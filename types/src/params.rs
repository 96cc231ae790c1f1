//! Protocol constants and denomination units.

use alloy_primitives::U256;

/// 10^12 base units.
pub const SZABO: U256 = U256::from_limbs([1_000_000_000_000, 0, 0, 0]);

/// 10^15 base units.
pub const FINNEY: U256 = U256::from_limbs([1_000_000_000_000_000, 0, 0, 0]);

/// 10^18 base units.
pub const ETHER: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Mining reward per block, 1500 finney.
pub const BLOCK_REWARD: U256 = U256::from_limbs([1_500_000_000_000_000_000, 0, 0, 0]);

/// Difficulty of the genesis block, 2^22.
pub const GENESIS_DIFFICULTY: U256 = U256::from_limbs([1 << 22, 0, 0, 0]);

/// Floor for the derived difficulty, 2^12.
pub const MIN_DIFFICULTY: U256 = U256::from_limbs([1 << 12, 0, 0, 0]);

/// Seconds a block may lag its parent before difficulty adjusts downward.
pub const DIFFICULTY_ADJUSTMENT_WINDOW: u64 = 42;

/// Gas limit carried by every block of this protocol era.
pub const GENESIS_GAS_LIMIT: U256 = U256::from_limbs([1_000_000, 0, 0, 0]);

/// Default floor a miner advertises for the gas price, 10 szabo.
pub const DEFAULT_MIN_GAS_PRICE: U256 = U256::from_limbs([10_000_000_000_000, 0, 0, 0]);
