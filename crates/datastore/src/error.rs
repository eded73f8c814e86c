use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable failure codes for conditions the datastore knows
/// how to describe. The set is closed; hosts may match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// The operation requires the datastore to be unlocked.
    Locked,
    /// `initialize` was called on an already-initialized datastore
    /// without requesting a rebase.
    Initialized,
    /// Authenticated decryption or key wrapping failed.
    Crypto,
    /// The record id was not found.
    Missing,
    /// Malformed input record.
    Invalid,
    /// No application key could be resolved.
    MissingAppKey,
}

impl Reason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Reason::Locked => "LOCKED",
            Reason::Initialized => "INITIALIZED",
            Reason::Crypto => "CRYPTO",
            Reason::Missing => "MISSING",
            Reason::Invalid => "INVALID",
            Reason::MissingAppKey => "MISSING_APP_KEY",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by datastore operations.
///
/// Conditions with a well-known cause carry a [`Reason`]; failures of
/// the layers underneath (backing store, serialization) propagate
/// unchanged through the transparent variants.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{message}")]
    Datastore { reason: Reason, message: String },

    #[error(transparent)]
    Store(#[from] coffer_store::StoreError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The machine-readable reason, when the failure is one the
    /// datastore classifies.
    #[must_use]
    pub fn reason(&self) -> Option<Reason> {
        match self {
            Error::Datastore { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub(crate) fn with_reason(reason: Reason, message: impl Into<String>) -> Self {
        Error::Datastore {
            reason,
            message: message.into(),
        }
    }

    pub(crate) fn locked() -> Self {
        Self::with_reason(Reason::Locked, "datastore is locked")
    }

    pub(crate) fn initialized() -> Self {
        Self::with_reason(Reason::Initialized, "already initialized")
    }

    pub(crate) fn crypto(message: impl Into<String>) -> Self {
        Self::with_reason(Reason::Crypto, message)
    }

    pub(crate) fn missing(id: &str) -> Self {
        Self::with_reason(Reason::Missing, format!("no record with id '{id}'"))
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::with_reason(Reason::Invalid, message)
    }

    pub(crate) fn missing_app_key(message: impl Into<String>) -> Self {
        Self::with_reason(Reason::MissingAppKey, message)
    }
}
