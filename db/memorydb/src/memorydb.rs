//! In-memory backend implementation.

use alloy_primitives::B256;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use rust_eth_ledger_common::KeyValueDB;

/// Error type for memory backend operations.
#[derive(Debug, Error)]
pub enum MemoryDBError {
    /// Value not found in the backend
    #[error("value not found: {0}")]
    NotFound(B256),
}

/// In-memory backend keyed by content hash.
///
/// Cloning yields another handle onto the same shared map, so several
/// overlays (or several states) may stack on one backing store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDB {
    values: Arc<RwLock<HashMap<B256, Vec<u8>>>>,
}

impl MemoryDB {
    /// Creates a new empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of values in the backend.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Checks if the backend is empty.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Removes every value from the backend.
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

impl KeyValueDB for MemoryDB {
    type Error = MemoryDBError;

    fn get(&self, key: &B256) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.values.read().get(key).cloned())
    }

    fn put(&self, key: &B256, value: &[u8]) -> Result<(), Self::Error> {
        self.values.write().insert(*key, value.to_vec());
        Ok(())
    }

    fn contains(&self, key: &B256) -> Result<bool, Self::Error> {
        Ok(self.values.read().contains_key(key))
    }

    fn write_batch(&self, ops: Vec<(B256, Option<Vec<u8>>)>) -> Result<(), Self::Error> {
        let mut values = self.values.write();
        for (key, op) in ops {
            match op {
                Some(value) => {
                    values.insert(key, value);
                }
                None => {
                    values.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_memory_db_basic_operations() {
        let db = MemoryDB::new();
        assert!(db.is_empty());

        let data = b"test data".to_vec();
        let hash = keccak256(&data);

        db.put(&hash, &data).unwrap();
        assert!(!db.is_empty());
        assert_eq!(db.len(), 1);
        assert!(db.contains(&hash).unwrap());
        assert_eq!(db.get(&hash).unwrap(), Some(data));
    }

    #[test]
    fn test_memory_db_shared_handles() {
        let db = MemoryDB::new();
        let other = db.clone();

        let data = b"shared".to_vec();
        let hash = keccak256(&data);
        db.put(&hash, &data).unwrap();

        // The clone sees the write.
        assert_eq!(other.get(&hash).unwrap(), Some(data));
    }

    #[test]
    fn test_memory_db_write_batch() {
        let db = MemoryDB::new();
        let a = keccak256(b"a");
        let b = keccak256(b"b");

        db.put(&a, b"a").unwrap();
        db.write_batch(vec![(a, None), (b, Some(b"b".to_vec()))]).unwrap();

        assert_eq!(db.get(&a).unwrap(), None);
        assert_eq!(db.get(&b).unwrap(), Some(b"b".to_vec()));
    }
}
