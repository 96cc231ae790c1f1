//! Write-buffered, reference-counted view over a persistent backend.

use std::collections::HashMap;
use std::fmt::Debug;

use alloy_primitives::B256;
use tracing::trace;

use rust_eth_ledger_common::KeyValueDB;

use crate::TrieError;

#[derive(Debug, Clone)]
struct OverlayEntry {
    payload: Vec<u8>,
    refs: i32,
}

/// A single logical hash-keyed store whose writes are staged in memory.
///
/// Staged entries carry a reference count: inserting the same payload twice
/// bumps the count, `kill` decrements it. `commit` flushes every live entry
/// to the backend in one atomic batch and clears the stage; `rollback`
/// discards the stage without touching the backend. Once a value reaches the
/// backend it is never deleted; content-addressed nodes are immortal there.
///
/// Cloning an overlay copies the staged writes and shares the backend, which
/// is what gives `State` its cheap snapshot semantics.
#[derive(Debug, Clone)]
pub struct OverlayDB<B> {
    backing: B,
    overlay: HashMap<B256, OverlayEntry>,
    enforce_refs: bool,
}

impl<B> OverlayDB<B>
where
    B: KeyValueDB,
    B::Error: Debug,
{
    /// Creates an overlay over the given backend.
    pub fn new(backing: B) -> Self {
        Self { backing, overlay: HashMap::new(), enforce_refs: false }
    }

    /// Returns a reference to the backend.
    pub fn backing(&self) -> &B {
        &self.backing
    }

    /// When set, staged entries whose reference count has dropped to zero
    /// are treated as deleted by `lookup` and `exists`.
    pub fn set_enforce_refs(&mut self, enforce: bool) {
        self.enforce_refs = enforce;
    }

    /// Stages `payload` under `key`, bumping its reference count.
    pub fn insert(&mut self, key: B256, payload: Vec<u8>) {
        let entry = self.overlay.entry(key).or_insert(OverlayEntry { payload: Vec::new(), refs: 0 });
        entry.payload = payload;
        entry.refs += 1;
    }

    /// Drops one reference to `key` in the stage.
    ///
    /// Killing a key with no staged entry is legitimate: the value lives in
    /// the backend, where deletions never propagate.
    pub fn kill(&mut self, key: &B256) {
        match self.overlay.get_mut(key) {
            Some(entry) => entry.refs -= 1,
            None => trace!(target: "overlaydb", %key, "kill of backend-resident key"),
        }
    }

    /// Looks `key` up in the stage, then in the backend.
    pub fn lookup(&self, key: &B256) -> Result<Option<Vec<u8>>, TrieError> {
        if let Some(entry) = self.overlay.get(key) {
            if entry.refs > 0 || !self.enforce_refs {
                return Ok(Some(entry.payload.clone()));
            }
        }
        self.backing
            .get(key)
            .map_err(|e| TrieError::Database(format!("{e:?}")))
    }

    /// Whether `key` resolves through the stage or the backend.
    pub fn exists(&self, key: &B256) -> Result<bool, TrieError> {
        if let Some(entry) = self.overlay.get(key) {
            if entry.refs > 0 || !self.enforce_refs {
                return Ok(true);
            }
        }
        self.backing
            .contains(key)
            .map_err(|e| TrieError::Database(format!("{e:?}")))
    }

    /// Flushes every live staged entry to the backend in one batch, then
    /// clears the stage. Dead entries (zero references) are dropped.
    pub fn commit(&mut self) -> Result<(), TrieError> {
        let ops: Vec<_> = self
            .overlay
            .drain()
            .filter(|(_, entry)| entry.refs > 0)
            .map(|(key, entry)| (key, Some(entry.payload)))
            .collect();
        trace!(target: "overlaydb", writes = ops.len(), "committing overlay");
        self.backing
            .write_batch(ops)
            .map_err(|e| TrieError::Database(format!("{e:?}")))
    }

    /// Discards the stage without touching the backend.
    pub fn rollback(&mut self) {
        self.overlay.clear();
    }

    /// Debug census of staged keys and their reference counts.
    pub fn keys(&self) -> HashMap<B256, i32> {
        self.overlay.iter().map(|(k, e)| (*k, e.refs)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use pretty_assertions::assert_eq;
    use rust_eth_ledger_memorydb::MemoryDB;

    fn staged(db: &OverlayDB<MemoryDB>, key: &B256) -> i32 {
        db.keys().get(key).copied().unwrap_or(0)
    }

    #[test]
    fn test_overlay_stage_and_commit() {
        let backing = MemoryDB::new();
        let mut db = OverlayDB::new(backing.clone());

        let payload = b"node".to_vec();
        let key = keccak256(&payload);
        db.insert(key, payload.clone());

        // Staged but not persisted.
        assert_eq!(db.lookup(&key).unwrap(), Some(payload.clone()));
        assert_eq!(backing.get(&key).unwrap(), None);

        db.commit().unwrap();
        assert_eq!(backing.get(&key).unwrap(), Some(payload.clone()));
        assert!(db.keys().is_empty());

        // Still visible through the overlay after the stage cleared.
        assert_eq!(db.lookup(&key).unwrap(), Some(payload));
    }

    #[test]
    fn test_overlay_rollback() {
        let backing = MemoryDB::new();
        let mut db = OverlayDB::new(backing.clone());

        let key = keccak256(b"speculative");
        db.insert(key, b"speculative".to_vec());
        db.rollback();

        assert_eq!(db.lookup(&key).unwrap(), None);
        assert!(backing.is_empty());
    }

    #[test]
    fn test_overlay_reference_counts() {
        let mut db = OverlayDB::new(MemoryDB::new());

        let payload = b"shared subtree".to_vec();
        let key = keccak256(&payload);
        db.insert(key, payload.clone());
        db.insert(key, payload.clone());
        assert_eq!(staged(&db, &key), 2);

        db.kill(&key);
        assert_eq!(staged(&db, &key), 1);
        assert_eq!(db.lookup(&key).unwrap(), Some(payload.clone()));

        // Dead entries stay visible until refs are enforced.
        db.kill(&key);
        assert_eq!(db.lookup(&key).unwrap(), Some(payload));
        db.set_enforce_refs(true);
        assert_eq!(db.lookup(&key).unwrap(), None);
    }

    #[test]
    fn test_dead_entries_not_committed() {
        let backing = MemoryDB::new();
        let mut db = OverlayDB::new(backing.clone());

        let key = keccak256(b"dead");
        db.insert(key, b"dead".to_vec());
        db.kill(&key);
        db.commit().unwrap();

        assert!(backing.is_empty());
    }
}
