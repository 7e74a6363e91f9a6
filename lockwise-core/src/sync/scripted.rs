//! Scripted [`RemoteSyncService`] for tests and offline hosts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lockwise_db::CredentialRecord;
use tokio::sync::Notify;

use super::{RemoteSyncError, RemoteSyncService, SyncChanges, SyncUnlockInfo};

/// One scripted response.
#[derive(Debug)]
pub enum Script {
    /// Answer immediately.
    Respond(Result<SyncChanges, RemoteSyncError>),
    /// Answer after a delay.
    Delayed(Duration, Result<SyncChanges, RemoteSyncError>),
    /// Answer once the gate is notified.
    Gated(Arc<Notify>, Result<SyncChanges, RemoteSyncError>),
}

/// Sync service that replays queued responses in order. Once the queue is
/// empty every sync succeeds with no changes.
#[derive(Debug, Default)]
pub struct ScriptedSyncService {
    scripts: Mutex<VecDeque<Script>>,
    uploads: Mutex<Vec<Vec<CredentialRecord>>>,
    calls: AtomicUsize,
}

impl ScriptedSyncService {
    /// Creates a service with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push(&self, script: Script) {
        self.lock_scripts().push_back(script);
    }

    /// Queues a response held until the returned gate is notified.
    pub fn push_gated(&self, result: Result<SyncChanges, RemoteSyncError>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.push(Script::Gated(Arc::clone(&gate), result));
        gate
    }

    /// Number of syncs started.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The local records sent with each sync, oldest first.
    #[must_use]
    pub fn uploads(&self) -> Vec<Vec<CredentialRecord>> {
        self.uploads
            .lock()
            .map(|uploads| uploads.clone())
            .unwrap_or_default()
    }

    fn lock_scripts(&self) -> std::sync::MutexGuard<'_, VecDeque<Script>> {
        self.scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteSyncService for ScriptedSyncService {
    async fn sync(
        &self,
        _info: &SyncUnlockInfo,
        local: Vec<CredentialRecord>,
    ) -> Result<SyncChanges, RemoteSyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push(local);
        }
        let script = self.lock_scripts().pop_front();
        match script {
            None => Ok(SyncChanges::default()),
            Some(Script::Respond(result)) => result,
            Some(Script::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            Some(Script::Gated(gate, result)) => {
                gate.notified().await;
                result
            }
        }
    }
}
