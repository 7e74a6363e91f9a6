//! Platform interfaces the host application supplies.

pub mod fs;
pub mod memory;

use crate::error::StoreResult;

/// When a secret stored in the vault may be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessibility {
    /// Readable once the device has been unlocked after boot, including
    /// while the app runs in the background.
    AfterFirstUnlock,
}

/// Durable, access-controlled store for small secrets.
///
/// Backed by the platform keychain or keystore. Only the encryption
/// material manager touches it.
pub trait SecretVault: Send + Sync {
    /// Reads the secret stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault refuses the read.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault refuses the write.
    fn set(&self, key: &str, value: &[u8], accessibility: Accessibility) -> StoreResult<()>;

    /// Deletes the secret under `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault refuses the delete.
    fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Atomic blob store for small non-secret values (autolock deadline,
/// autolock setting, last boot session).
pub trait AtomicBlobStore: Send + Sync {
    /// Reads the blob named `name`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read(&self, name: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes bytes atomically under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_atomic(&self, name: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Deletes the blob named `name`. Deleting a missing blob succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&self, name: &str) -> StoreResult<()>;
}

/// Wall clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Identifies the current OS boot so the store can notice reboots.
pub trait BootSession: Send + Sync {
    /// An identifier that stays the same until the device restarts.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot report one.
    fn current_boot_id(&self) -> StoreResult<String>;
}

/// Reachability of the network.
pub trait NetworkMonitor: Send + Sync {
    /// Whether a sync attempt could reach the server right now.
    fn is_online(&self) -> bool;
}

/// The account collaborator that owns the sign-in session.
pub trait AccountLink: Send + Sync {
    /// Drops the linked account after the server rejected its credentials.
    fn unlink(&self);
}
