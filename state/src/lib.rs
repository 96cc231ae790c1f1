//! Ledger state: accounts, blocks, transaction execution and mining.
//!
//! The centerpiece is [`State`]: a cache of touched accounts over a state
//! trie whose nodes live in an overlay database. Transactions flow in
//! through [`Executive`], mutate the cache via the VM and [`ExtVm`], and are
//! folded back into the trie on commit; blocks are replayed or mined by
//! driving the same execution path and checking the resulting roots.

use alloy_primitives::{B256, U256};
use thiserror::Error;

pub mod genesis;

mod account;
pub use account::{AccountRecord, AccountState};

mod chain;
pub use chain::{BlockChain, MemoryChain};

mod config;
pub use config::StateConfig;

mod executive;
pub use executive::Executive;

mod extvm;
pub use extvm::ExtVm;

mod pow;
pub use pow::{KeccakPow, MineInfo, PowEngine};

mod queue;
pub use queue::TransactionQueue;

mod receipt;
pub use receipt::TransactionReceipt;

mod state;
pub use state::State;

#[cfg(test)]
mod state_test;

use rust_eth_ledger_trie::TrieError;
use rust_eth_ledger_types::TypesError;

/// Error type for state transitions.
///
/// Validation failures reject a block (the overlay is rolled back);
/// transaction failures drop or shelve a single transaction; trie failures
/// are fatal for the state and escape to the host.
#[derive(Debug, Error)]
pub enum StateError {
    /// Block does not extend the previous block
    #[error("invalid parent hash")]
    InvalidParentHash,
    /// Replayed block's final state root disagrees with its header
    #[error("invalid state root")]
    InvalidStateRoot,
    /// A receipt's post-state root disagrees with the replay
    #[error("invalid transaction state root")]
    InvalidTransactionStateRoot,
    /// A receipt's cumulative gas disagrees with the replay
    #[error("invalid transaction gas used")]
    InvalidTransactionGasUsed,
    /// An uncle does not share this block's grandparent
    #[error("uncle is not an uncle")]
    UncleNotAnUncle,
    /// Two nonces among the block and its uncles coincide
    #[error("duplicate uncle nonce")]
    DuplicateUncleNonce,

    /// Transaction nonce does not match the sender's account
    #[error("invalid nonce: requires {required}, got {candidate}")]
    InvalidNonce {
        /// The sender's current account nonce
        required: U256,
        /// The nonce the transaction carried
        candidate: U256,
    },
    /// Sender cannot afford the transfer plus the gas budget
    #[error("not enough cash")]
    NotEnoughCash,
    /// Transaction signature failed to recover a sender
    #[error("invalid signature")]
    InvalidSignature,

    /// A block hash the chain was asked for is unknown
    #[error("unknown block {0}")]
    UnknownBlock(B256),
    /// Header or transaction level failure
    #[error(transparent)]
    Types(#[from] TypesError),
    /// Store failure; fatal for this state
    #[error(transparent)]
    Trie(#[from] TrieError),
    /// RLP decoding error
    #[error("rlp error: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// The VM host failed in a way that could not be classified
    #[error("vm host failure: {0}")]
    VmHost(String),
}

impl StateError {
    /// Whether this failure condemns only the transaction that raised it,
    /// as opposed to the block or the whole store.
    pub fn is_transaction_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidNonce { .. }
                | Self::NotEnoughCash
                | Self::InvalidSignature
                | Self::Types(_)
                | Self::Rlp(_)
        )
    }
}
