//! In-memory implementations of platform traits.
//!
//! These implementations are NOT secure for production use. They back unit
//! and integration tests and let a host exercise the store without a
//! keychain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

use super::{
    AccountLink, Accessibility, AtomicBlobStore, BootSession, Clock, NetworkMonitor, SecretVault,
};

fn poisoned(what: &str) -> StoreError {
    StoreError::Platform(format!("{what} lock poisoned"))
}

/// In-memory secret vault.
#[derive(Debug, Default)]
pub struct MemorySecretVault {
    entries: RwLock<HashMap<String, (Vec<u8>, Accessibility)>>,
}

impl MemorySecretVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accessibility recorded for `key`, if stored.
    #[must_use]
    pub fn accessibility(&self, key: &str) -> Option<Accessibility> {
        self.entries
            .read()
            .ok()?
            .get(key)
            .map(|(_, accessibility)| *accessibility)
    }
}

impl SecretVault for MemorySecretVault {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| poisoned("vault"))?;
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    fn set(&self, key: &str, value: &[u8], accessibility: Accessibility) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned("vault"))?;
        entries.insert(key.to_string(), (value.to_vec(), accessibility));
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned("vault"))?;
        entries.remove(key);
        Ok(())
    }
}

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty blob store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AtomicBlobStore for MemoryBlobStore {
    fn read(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        let blobs = self.blobs.read().map_err(|_| poisoned("blob store"))?;
        Ok(blobs.get(name).cloned())
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned("blob store"))?;
        blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned("blob store"))?;
        blobs.remove(name);
        Ok(())
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start_millis`.
    #[must_use]
    pub const fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute reading.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Boot session whose identifier tests can change to simulate a reboot.
#[derive(Debug)]
pub struct FixedBootSession {
    id: Mutex<String>,
}

impl FixedBootSession {
    /// Creates a session reporting `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Mutex::new(id.into()),
        }
    }

    /// Simulates a reboot by switching to `id`.
    pub fn reboot(&self, id: impl Into<String>) {
        if let Ok(mut current) = self.id.lock() {
            *current = id.into();
        }
    }
}

impl BootSession for FixedBootSession {
    fn current_boot_id(&self) -> StoreResult<String> {
        self.id
            .lock()
            .map(|id| id.clone())
            .map_err(|_| poisoned("boot session"))
    }
}

/// Network monitor with a switchable answer.
#[derive(Debug)]
pub struct StaticNetwork {
    online: AtomicBool,
}

impl StaticNetwork {
    /// Creates a monitor reporting `online`.
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Changes reachability.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl NetworkMonitor for StaticNetwork {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Account link that counts unlink requests.
#[derive(Debug, Default)]
pub struct RecordingAccountLink {
    unlinks: AtomicUsize,
}

impl RecordingAccountLink {
    /// Creates a link with no recorded unlinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `unlink` was called.
    #[must_use]
    pub fn unlink_count(&self) -> usize {
        self.unlinks.load(Ordering::SeqCst)
    }
}

impl AccountLink for RecordingAccountLink {
    fn unlink(&self) {
        self.unlinks.fetch_add(1, Ordering::SeqCst);
    }
}
