//! Overlay database and Merkle-Patricia trie for the ledger state.
//!
//! The overlay stages content-addressed writes over a persistent backend and
//! either commits them in one batch or discards them. The trie layers an
//! authenticated ordered map on top of the overlay: every node is stored
//! under the Keccak-256 hash of its RLP encoding, so identical subtrees
//! share storage and a root hash commits to the whole key set.

use alloy_primitives::B256;
use thiserror::Error;

pub mod nibbles;
pub mod rlp_raw;

mod node;
pub use node::Node;

mod overlaydb;
pub use overlaydb::OverlayDB;

mod trie;
pub use trie::{Trie, TrieIter};


/// Root hash of the empty trie, `keccak256(rlp(""))`.
pub use alloy_trie::EMPTY_ROOT_HASH;

/// Error type for overlay and trie operations.
#[derive(Debug, Error)]
pub enum TrieError {
    /// Backend operation failed
    #[error("database error: {0}")]
    Database(String),
    /// A node the trie structure requires is missing from the store
    #[error("corrupt state: missing trie node {0}")]
    CorruptState(B256),
    /// A stored node does not decode to a well-formed trie node
    #[error("invalid trie: {0}")]
    InvalidTrie(&'static str),
    /// RLP decoding error
    #[error("rlp error: {0}")]
    Rlp(#[from] alloy_rlp::Error),
}
