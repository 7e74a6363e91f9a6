//! Error types for the credential store.

use lockwise_db::DbError;
use thiserror::Error;

use crate::sync::RemoteSyncError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Why the store entered the errored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum ErrorCause {
    /// The sync server rejected the account's credentials.
    AuthInvalid,
    /// The sync key no longer decrypts server data.
    InvalidKey,
    /// The database failed to decrypt or parse with material that looked
    /// valid. Unlock answers it by recreating the file.
    DatabaseUnrecoverable,
    /// Recreating an unreadable database failed.
    DatabaseCreationFailed,
    /// Any other storage or platform failure, including I/O errors.
    Unknown,
}

impl std::fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AuthInvalid => "authentication rejected",
            Self::InvalidKey => "invalid sync key",
            Self::DatabaseUnrecoverable => "database unrecoverable",
            Self::DatabaseCreationFailed => "database creation failed",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Errors raised by the credential store and its collaborators.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum StoreError {
    /// Errors coming from the platform secret vault.
    #[error("secret vault error: {0}")]
    SecretVault(String),

    /// Errors coming from the blob store.
    #[error("blob store error: {0}")]
    BlobStore(String),

    /// Errors coming from the logins database.
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// Key or salt read from the secret vault is malformed.
    #[error("invalid encryption material: {0}")]
    InvalidMaterial(String),

    /// Recreating the database after an unlock failure did not succeed.
    #[error("database creation failed: {0}")]
    DatabaseCreationFailed(String),

    /// The operation needs an unlocked store.
    #[error("store is locked")]
    Locked,

    /// The store has no account set up.
    #[error("store is not prepared")]
    Unprepared,

    /// The store is in the errored state.
    #[error("store errored: {0}")]
    Errored(ErrorCause),

    /// The remote sync service failed.
    #[error("sync error: {0}")]
    Sync(#[from] RemoteSyncError),

    /// A required collaborator was not supplied when building the context.
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    /// The store was started outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The store worker has shut down.
    #[error("store worker is gone")]
    WorkerGone,

    /// Serialization/deserialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A platform service (clock, boot session, filesystem) failed.
    #[error("platform error: {0}")]
    Platform(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// The errored-state cause this error maps to.
    #[must_use]
    pub const fn cause(&self) -> ErrorCause {
        match self {
            Self::Sync(RemoteSyncError::AuthInvalid(_)) => ErrorCause::AuthInvalid,
            Self::Sync(RemoteSyncError::InvalidKey(_)) => ErrorCause::InvalidKey,
            Self::DatabaseCreationFailed(_) => ErrorCause::DatabaseCreationFailed,
            Self::InvalidMaterial(_) => ErrorCause::DatabaseUnrecoverable,
            Self::Database(err) if err.is_recoverable() => ErrorCause::DatabaseUnrecoverable,
            Self::Errored(cause) => *cause,
            _ => ErrorCause::Unknown,
        }
    }
}
