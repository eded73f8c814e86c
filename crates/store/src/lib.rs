//! Persistent backing store for the Coffer datastore.
//!
//! A database is an opaque ordered map from string keys to byte blobs.
//! The store never interprets the blobs it holds; encryption happens a
//! layer above. Writes are atomic at the single-key level.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::fmt;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An ordered map from string keys to opaque byte blobs.
///
/// Implementations must make `put` atomic for a single key: a reader
/// observes either the previous blob or the new one, never a torn mix.
pub trait BackingStore: Send + fmt::Debug {
    /// Returns the blob stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Inserts or replaces the blob stored under `key`.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes the blob stored under `key`. Returns `true` when a blob
    /// was actually removed.
    fn delete(&mut self, key: &str) -> Result<bool>;

    /// Returns every `(key, blob)` pair whose key starts with `prefix`,
    /// in ascending key order.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Removes every blob in the database.
    fn clear(&mut self) -> Result<()>;
}
