//! Common traits and types shared by the ledger's key/value backends.
//!
//! This crate provides the backend interface that the overlay database and
//! the tries are written against, independent of the concrete store.

/// Backend traits for hash-keyed node storage.
mod traits;
pub use traits::KeyValueDB;
