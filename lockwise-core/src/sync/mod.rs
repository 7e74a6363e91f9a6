//! Remote synchronization: service interface, state and coordination.

mod coordinator;
pub mod scripted;

pub(crate) use coordinator::{SyncCoordinator, SyncOutcome, SyncReport, SyncReporter, SyncStart};

use async_trait::async_trait;
use lockwise_db::CredentialRecord;
use secrecy::SecretString;
use thiserror::Error;

/// Credentials the sync service needs to talk to the server.
#[derive(Debug)]
pub struct SyncUnlockInfo {
    /// Key identifier of the sync key.
    pub kid: String,
    /// OAuth access token for the token server.
    pub access_token: SecretString,
    /// Key that decrypts server records.
    pub sync_key: SecretString,
    /// Token server endpoint.
    pub token_server_url: String,
}

impl SyncUnlockInfo {
    /// Bundles unlock info from its parts.
    #[must_use]
    pub fn new(
        kid: impl Into<String>,
        access_token: impl Into<String>,
        sync_key: impl Into<String>,
        token_server_url: impl Into<String>,
    ) -> Self {
        Self {
            kid: kid.into(),
            access_token: SecretString::from(access_token.into()),
            sync_key: SecretString::from(sync_key.into()),
            token_server_url: token_server_url.into(),
        }
    }
}

/// Changes the server reported after a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncChanges {
    /// Records created or modified remotely.
    pub upserted: Vec<CredentialRecord>,
    /// Ids of records deleted remotely.
    pub deleted: Vec<String>,
}

/// Failures reported by the remote sync service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteSyncError {
    /// The server rejected the access token.
    #[error("authentication rejected: {0}")]
    AuthInvalid(String),
    /// The sync key cannot decrypt server data.
    #[error("invalid sync key: {0}")]
    InvalidKey(String),
    /// The server could not be reached.
    #[error("network error: {0}")]
    Network(String),
    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl RemoteSyncError {
    /// Whether the error invalidates the account and must reset the store.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::AuthInvalid(_) | Self::InvalidKey(_))
    }
}

/// Progress of synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SyncState {
    /// Idle; the last sync finished or none has run.
    #[default]
    Synced,
    /// A sync is in flight.
    Syncing {
        /// Whether the host should skip its "synced" notification.
        suppress_notification: bool,
    },
    /// The last sync outlived the watchdog.
    TimedOut,
}

/// Remote sync engine.
#[async_trait]
pub trait RemoteSyncService: Send + Sync {
    /// Uploads `local` and returns the server's changes.
    ///
    /// # Errors
    ///
    /// Returns the typed failure; authentication failures reset the store.
    async fn sync(
        &self,
        info: &SyncUnlockInfo,
        local: Vec<CredentialRecord>,
    ) -> Result<SyncChanges, RemoteSyncError>;
}
