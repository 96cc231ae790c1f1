//! The pending transaction pool.

use std::collections::HashMap;

use alloy_primitives::{keccak256, B256};
use tracing::trace;

use rust_eth_ledger_types::Transaction;

use crate::StateError;

/// Pending transactions, keyed by the hash of their raw encoding.
///
/// `current` holds transactions eligible for inclusion; `future` shelves
/// ones whose nonce is ahead of their sender's account. The state promotes
/// the future bucket at the start of every queue sync, so a transaction
/// unblocked by a predecessor gets retried.
#[derive(Debug, Clone, Default)]
pub struct TransactionQueue {
    current: HashMap<B256, Vec<u8>>,
    future: HashMap<B256, Vec<u8>>,
}

impl TransactionQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a transaction after checking it decodes and carries a
    /// recoverable signature. Returns its queue hash.
    pub fn import(&mut self, rlp: &[u8]) -> Result<B256, StateError> {
        let transaction = Transaction::decode(rlp)?;
        transaction.sender().map_err(|_| StateError::InvalidSignature)?;
        let hash = keccak256(rlp);
        trace!(target: "queue", %hash, "imported transaction");
        self.current.insert(hash, rlp.to_vec());
        Ok(hash)
    }

    /// Snapshot of the eligible transactions.
    pub fn transactions(&self) -> HashMap<B256, Vec<u8>> {
        self.current.clone()
    }

    /// Removes a transaction from both buckets.
    pub fn drop_tx(&mut self, hash: &B256) {
        self.current.remove(hash);
        self.future.remove(hash);
    }

    /// Shelves a transaction whose nonce is still ahead of its sender.
    pub fn set_future(&mut self, hash: &B256) {
        if let Some(rlp) = self.current.remove(hash) {
            self.future.insert(*hash, rlp);
        }
    }

    /// Moves every shelved transaction back into the eligible bucket.
    pub fn promote_futures(&mut self) {
        self.current.extend(self.future.drain());
    }

    /// Total queued transactions across both buckets.
    pub fn len(&self) -> usize {
        self.current.len() + self.future.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.future.is_empty()
    }

    /// Number of shelved transactions.
    pub fn future_len(&self) -> usize {
        self.future.len()
    }
}
