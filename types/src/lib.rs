//! Block headers, transactions and protocol constants for the ledger.

use thiserror::Error;

pub mod crypto;
pub mod params;

mod block;
pub use block::BlockInfo;

mod transaction;
pub use transaction::{contract_address, Transaction};

/// Error type for header and transaction handling.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Signature failed to verify or recover
    #[error("invalid signature")]
    InvalidSignature,
    /// Structurally invalid header or transaction
    #[error("bad encoding: {0}")]
    BadEncoding(&'static str),
    /// Header field inconsistent with its parent
    #[error("header disagrees with parent: {0}")]
    InvalidParent(&'static str),
    /// RLP decoding error
    #[error("rlp error: {0}")]
    Rlp(#[from] alloy_rlp::Error),
}
