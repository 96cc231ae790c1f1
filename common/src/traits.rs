//! Backend traits for hash-keyed storage.

use alloy_primitives::B256;
use auto_impl::auto_impl;

/// Simple backend trait for the persisted layer of the ledger state.
///
/// Every value stored through this interface is content-addressed: the key is
/// the 256-bit hash of the payload (trie nodes are keyed by the hash of their
/// RLP encoding, contract code by its code hash). Implementations are shared
/// handles; cloning one must yield a view onto the same underlying store.
#[auto_impl(Box, Arc)]
pub trait KeyValueDB {
    /// Associated error type for backend operations
    type Error;

    /// Get a value from the backend by its hash
    fn get(&self, key: &B256) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Insert a value into the backend under the given hash
    fn put(&self, key: &B256, value: &[u8]) -> Result<(), Self::Error>;

    /// Check if a value exists in the backend
    fn contains(&self, key: &B256) -> Result<bool, Self::Error>;

    /// Apply a set of writes in one atomic batch. `None` deletes the key.
    fn write_batch(&self, ops: Vec<(B256, Option<Vec<u8>>)>) -> Result<(), Self::Error>;
}
