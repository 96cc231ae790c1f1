//! Persistent backend over RocksDB.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy_primitives::B256;
use rocksdb::{Options, WriteBatch, DB};
use thiserror::Error;
use tracing::debug;

use rust_eth_ledger_common::KeyValueDB;

/// Error type for disk backend operations.
#[derive(Debug, Error)]
pub enum DiskDBError {
    /// Underlying RocksDB failure
    #[error("database error: {0}")]
    Database(String),
    /// Filesystem failure while preparing the store directory
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent backend keyed by content hash.
///
/// The store lives in a single RocksDB database named `state` inside the
/// given directory. Deleting the directory is the only supported reset;
/// `open` with `kill_existing` does exactly that before reopening.
pub struct DiskDB {
    db: Arc<DB>,
    path: PathBuf,
}

impl Debug for DiskDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskDB").field("path", &self.path).finish()
    }
}

impl Clone for DiskDB {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), path: self.path.clone() }
    }
}

impl DiskDB {
    /// Opens (creating if missing) the `state` store inside `dir`.
    ///
    /// With `kill_existing` set, any previous store is destroyed first.
    pub fn open(dir: &Path, kill_existing: bool) -> Result<Self, DiskDBError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("state");

        if kill_existing && path.exists() {
            std::fs::remove_dir_all(&path)?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, &path)
            .map_err(|e| DiskDBError::Database(format!("failed to open state db: {e}")))?;
        debug!(target: "diskdb", path = %path.display(), "opened state db");

        Ok(Self { db: Arc::new(db), path })
    }

    /// The directory of the underlying store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueDB for DiskDB {
    type Error = DiskDBError;

    fn get(&self, key: &B256) -> Result<Option<Vec<u8>>, Self::Error> {
        self.db
            .get(key.as_slice())
            .map_err(|e| DiskDBError::Database(format!("get error: {e}")))
    }

    fn put(&self, key: &B256, value: &[u8]) -> Result<(), Self::Error> {
        self.db
            .put(key.as_slice(), value)
            .map_err(|e| DiskDBError::Database(format!("put error: {e}")))
    }

    fn contains(&self, key: &B256) -> Result<bool, Self::Error> {
        Ok(self.get(key)?.is_some())
    }

    fn write_batch(&self, ops: Vec<(B256, Option<Vec<u8>>)>) -> Result<(), Self::Error> {
        let mut batch = WriteBatch::default();
        for (key, op) in ops {
            match op {
                Some(value) => batch.put(key.as_slice(), &value),
                None => batch.delete(key.as_slice()),
            }
        }
        self.db
            .write(batch)
            .map_err(|e| DiskDBError::Database(format!("batch write error: {e}")))
    }
}
