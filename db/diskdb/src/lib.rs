//! RocksDB-backed persistent backend for the ledger state database.

mod diskdb;
pub use diskdb::{DiskDB, DiskDBError};
