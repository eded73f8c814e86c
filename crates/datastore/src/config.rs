use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use coffer_store::BackingStore;

use crate::crypto::AppKey;
use crate::telemetry::MetricHook;

/// Host-supplied passphrase prompt, consulted when an operation needs
/// an application key and none was passed explicitly.
#[async_trait]
pub trait AppKeyPrompt: Send + Sync {
    /// Returns a passphrase, or `None` when the user declined.
    async fn passphrase(&self) -> Option<String>;
}

/// Options for [`open`](crate::open).
///
/// `salt` and `keys` seed the backing store before preparation, which
/// lets a host adopt an encrypted key blob it persisted elsewhere.
#[derive(Default)]
pub struct DatastoreConfig {
    /// Database file location; `None` uses the platform default.
    pub path: Option<PathBuf>,
    /// Caller-supplied backing store; overrides `path`.
    pub store: Option<Box<dyn BackingStore>>,
    /// Pre-existing per-database salt bytes.
    pub salt: Option<Vec<u8>>,
    /// Pre-existing encrypted key blob (envelope text).
    pub keys: Option<String>,
    /// Telemetry hook for mutating operations.
    pub record_metric: Option<MetricHook>,
    /// Passphrase prompt.
    pub prompt: Option<Arc<dyn AppKeyPrompt>>,
}

impl fmt::Debug for DatastoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatastoreConfig")
            .field("path", &self.path)
            .field("store", &self.store)
            .field("salt", &self.salt.as_ref().map(Vec::len))
            .field("keys", &self.keys.is_some())
            .field("record_metric", &self.record_metric.is_some())
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

/// Options for [`Datastore::initialize`](crate::Datastore::initialize).
#[derive(Debug, Default)]
pub struct InitializeOptions {
    /// Explicit application key; takes precedence over `passphrase`.
    pub app_key: Option<AppKey>,
    /// Passphrase to derive the application key from.
    pub passphrase: Option<String>,
    /// Salt to persist for passphrase derivation; generated when absent.
    pub salt: Option<Vec<u8>>,
    /// Re-wrap the existing key bundle under a new application key
    /// instead of creating a fresh database.
    pub rebase: bool,
}

impl InitializeOptions {
    #[must_use]
    pub fn with_app_key(app_key: AppKey) -> Self {
        Self {
            app_key: Some(app_key),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn rebase_to(app_key: AppKey) -> Self {
        Self {
            app_key: Some(app_key),
            rebase: true,
            ..Self::default()
        }
    }
}

/// Options for [`Datastore::unlock`](crate::Datastore::unlock).
#[derive(Debug, Default)]
pub struct UnlockOptions {
    /// Explicit application key; takes precedence over `passphrase`.
    pub app_key: Option<AppKey>,
    /// Passphrase to derive the application key from.
    pub passphrase: Option<String>,
}

impl UnlockOptions {
    #[must_use]
    pub fn with_app_key(app_key: AppKey) -> Self {
        Self {
            app_key: Some(app_key),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            app_key: None,
            passphrase: Some(passphrase.into()),
        }
    }
}
