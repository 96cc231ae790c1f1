//! Explicit configuration for a state instance.

use alloy_primitives::U256;

use rust_eth_ledger_types::params;

/// Parameters fixed at state construction.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Reward credited to a block's coinbase.
    pub block_reward: U256,
    /// Gas price floor advertised in blocks this state mines.
    pub min_gas_price: U256,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { block_reward: params::BLOCK_REWARD, min_gas_price: params::DEFAULT_MIN_GAS_PRICE }
    }
}
