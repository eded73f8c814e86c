//! Coffer: an encrypted, local credential datastore.
//!
//! Records live in a backing key-value store, each sealed in an
//! authenticated-encryption envelope under a per-database record key.
//! That key — together with a key-wrapping key — forms the key bundle,
//! which is itself wrapped under the application key. Unlocking
//! decrypts the bundle into memory; locking drops it; rebasing
//! re-wraps it under a new application key without touching a single
//! record ciphertext.
//!
//! The datastore is headless: hosts supply the UI, an optional
//! passphrase prompt, and an optional telemetry hook.

pub mod config;
pub mod crypto;
pub mod datastore;
pub mod envelope;
pub mod error;
pub mod patch;
pub mod record;
pub mod telemetry;

pub use config::{AppKeyPrompt, DatastoreConfig, InitializeOptions, UnlockOptions};
pub use crypto::AppKey;
pub use datastore::{Datastore, State};
pub use error::{Error, Reason, Result};
pub use record::{HistoryEntry, Record, RecordDraft};
pub use telemetry::{MetricEvent, MetricHook, MetricMethod};

pub use coffer_store::{BackingStore, MemoryStore, SqliteStore, StoreError};

use std::path::PathBuf;

/// Opens a prepared datastore instance.
///
/// Resolves the backing store (a caller-supplied one, or a SQLite file
/// at `config.path` / the platform default), seeds it with any
/// `salt`/`keys` material the host carried over, and runs `prepare` so
/// the instance starts in the correct state.
///
/// # Errors
/// Propagates backing-store failures.
pub async fn open(config: DatastoreConfig) -> Result<Datastore> {
    let mut store: Box<dyn BackingStore> = match config.store {
        Some(store) => store,
        None => {
            let path = match config.path {
                Some(path) => path,
                None => default_db_path()?,
            };
            Box::new(SqliteStore::open(&path)?)
        }
    };

    if let Some(salt) = &config.salt {
        store.put(datastore::SALT_KEY, &crypto::encode_salt(salt))?;
    }
    if let Some(keys) = &config.keys {
        store.put(datastore::KEYS_KEY, keys.as_bytes())?;
    }

    let datastore = Datastore::new(store, config.record_metric, config.prompt);
    datastore.prepare().await?;
    Ok(datastore)
}

fn default_db_path() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no config directory",
        ))
    })?;
    let dir = base.join("coffer");
    std::fs::create_dir_all(&dir).map_err(StoreError::from)?;
    Ok(dir.join("datastore.sqlite3"))
}
