#![allow(dead_code)]

//! Common test utilities shared across integration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lockwise_core::platform::memory::{
    FixedBootSession, ManualClock, MemoryBlobStore, MemorySecretVault, RecordingAccountLink,
    StaticNetwork,
};
use lockwise_core::sync::scripted::ScriptedSyncService;
use lockwise_core::{
    CredentialRecord, CredentialStore, StorageState, StoreConfig, StoreContext, StoreEvent,
    SyncState, SyncUnlockInfo,
};
use tempfile::TempDir;
use tokio::sync::{broadcast, watch};

pub const START_MILLIS: u64 = 1_700_000_000_000;
const WAIT: Duration = Duration::from_secs(5);

/// In-memory platform plus a scratch directory for the database file.
pub struct Harness {
    pub dir: TempDir,
    pub vault: Arc<MemorySecretVault>,
    pub prefs: Arc<MemoryBlobStore>,
    pub clock: Arc<ManualClock>,
    pub boot: Arc<FixedBootSession>,
    pub network: Arc<StaticNetwork>,
    pub account: Arc<RecordingAccountLink>,
    pub remote: Arc<ScriptedSyncService>,
    pub config: StoreConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StoreConfig::new(dir.path().join("logins.db"));
        Self {
            dir,
            vault: Arc::new(MemorySecretVault::new()),
            prefs: Arc::new(MemoryBlobStore::new()),
            clock: Arc::new(ManualClock::new(START_MILLIS)),
            boot: Arc::new(FixedBootSession::new("boot-1")),
            network: Arc::new(StaticNetwork::new(true)),
            account: Arc::new(RecordingAccountLink::new()),
            remote: Arc::new(ScriptedSyncService::new()),
            config,
        }
    }

    pub fn with_sync_timeout(mut self, millis: u64) -> Self {
        self.config.sync_timeout_ms = millis;
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.config.database_path.clone()
    }

    pub fn context(&self) -> StoreContext {
        StoreContext::builder(self.config.clone())
            .secret_vault(self.vault.clone())
            .blob_store(self.prefs.clone())
            .clock(self.clock.clone())
            .boot_session(self.boot.clone())
            .network(self.network.clone())
            .account_link(self.account.clone())
            .sync_service(self.remote.clone())
            .build()
            .expect("context")
    }

    pub fn start(&self) -> CredentialStore {
        CredentialStore::start(self.context()).expect("start store")
    }

    /// Starts a store and signs a new account in, leaving it unlocked.
    pub async fn start_unlocked(&self) -> CredentialStore {
        let store = self.start();
        store
            .update_credentials(unlock_info(), true)
            .await
            .expect("update credentials");
        assert_eq!(store.current_storage_state(), StorageState::Unlocked);
        store
    }

    /// Like [`Harness::start_unlocked`], then waits for the first sync.
    pub async fn start_synced(&self) -> CredentialStore {
        let store = self.start_unlocked().await;
        self.wait_for_syncs(&store, 1).await;
        store
    }

    /// Waits until `count` syncs have reached the remote and the store is idle.
    pub async fn wait_for_syncs(&self, store: &CredentialStore, count: usize) {
        let mut states = store.sync_state();
        wait_for(&mut states, |state| {
            *state == SyncState::Synced && self.remote.calls() >= count
        })
        .await;
    }
}

pub fn unlock_info() -> SyncUnlockInfo {
    SyncUnlockInfo::new(
        "kid-1",
        "access-token",
        "sync-key",
        "https://token.lockwise.test/1.0/sync/1.5",
    )
}

pub fn record(hostname: &str, username: &str) -> CredentialRecord {
    CredentialRecord::new(
        hostname,
        Some(username.to_string()),
        "correct horse battery staple",
        START_MILLIS,
    )
}

pub async fn wait_for<T: Clone>(
    receiver: &mut watch::Receiver<T>,
    predicate: impl FnMut(&T) -> bool,
) -> T {
    tokio::time::timeout(WAIT, receiver.wait_for(predicate))
        .await
        .expect("timed out waiting for value")
        .expect("publisher dropped")
        .clone()
}

pub async fn wait_for_state(store: &CredentialStore, expected: StorageState) {
    let mut states = store.storage_state();
    wait_for(&mut states, |state| *state == expected).await;
}

pub async fn wait_for_sync_state(store: &CredentialStore, expected: SyncState) {
    let mut states = store.sync_state();
    wait_for(&mut states, |state| *state == expected).await;
}

pub async fn wait_for_event(
    events: &mut broadcast::Receiver<StoreEvent>,
    mut predicate: impl FnMut(&StoreEvent) -> bool,
) -> StoreEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
