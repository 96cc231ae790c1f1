//! In-memory backend for the ledger state database.

mod memorydb;
pub use memorydb::{MemoryDB, MemoryDBError};
