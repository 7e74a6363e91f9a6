//! The credential store.
//!
//! A [`CredentialStore`] is a cheap, cloneable handle. Every operation is
//! queued to a single worker task that owns the database, so operations run
//! strictly in the order they were issued. State, sync progress and the
//! record list are published on watch channels; one-off notifications go out
//! on a broadcast channel.

mod command;
mod context;
mod worker;

pub use context::{StoreContext, StoreContextBuilder};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use lockwise_db::CredentialRecord;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, trace};

use crate::config::AutoLockSetting;
use crate::error::{ErrorCause, StoreError, StoreResult};
use crate::sync::{SyncState, SyncUnlockInfo};

use command::{Command, Reply};
use worker::{Published, Worker};

/// Blob holding the boot id seen on the last start.
pub const BOOT_SESSION_BLOB: &str = "boot_session";

const EVENT_CAPACITY: usize = 64;

/// Lifecycle of the local database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum StorageState {
    /// No account is set up on this device.
    #[default]
    Unprepared,
    /// The database exists but its contents are not in memory.
    Locked,
    /// Records are decrypted and available.
    Unlocked,
    /// A failure the user has to act on.
    Errored {
        /// What went wrong.
        cause: ErrorCause,
    },
}

/// One-off notifications for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A record was deleted locally.
    RecordDeleted {
        /// Id of the deleted record.
        id: String,
        /// Name to show in an undo or confirmation message.
        display_name: String,
    },
    /// A sync did not finish within the configured timeout.
    SyncTimedOut,
    /// A sync failed without invalidating the account.
    SyncFailed {
        /// Human-readable failure.
        reason: String,
    },
    /// The store entered [`StorageState::Errored`].
    Error {
        /// Why.
        cause: ErrorCause,
        /// Underlying error message.
        message: String,
    },
}

/// Application lifecycle transitions reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LifecycleEvent {
    /// The app became visible.
    Foreground,
    /// The app left the screen.
    Background,
    /// The process is about to exit.
    Shutdown,
}

/// Resolves once the worker has processed the queued operation.
///
/// Dropping a completion does not cancel the operation.
#[must_use = "completions report the operation's result"]
#[derive(Debug)]
pub struct Completion<T> {
    receiver: oneshot::Receiver<StoreResult<T>>,
}

impl<T> Future for Completion<T> {
    type Output = StoreResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(StoreError::WorkerGone)))
    }
}

/// Handle to the credential store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    commands: mpsc::UnboundedSender<Command>,
    storage_state: watch::Receiver<StorageState>,
    sync_state: watch::Receiver<SyncState>,
    list: watch::Receiver<Vec<CredentialRecord>>,
    events: broadcast::Sender<StoreEvent>,
}

impl CredentialStore {
    /// Starts the store worker on the current tokio runtime.
    ///
    /// The initial state is chosen before this returns: `Unprepared` when
    /// there is no database and no key, otherwise `Locked`, or `Unlocked`
    /// when the autolock deadline has not passed and the device has not
    /// restarted since the last run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoRuntime`] outside a tokio runtime, or a blob
    /// store error while loading the autolock setting.
    pub fn start(context: StoreContext) -> StoreResult<Self> {
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        let (commands, receiver) = mpsc::unbounded_channel();
        let (storage_tx, storage_state) = watch::channel(StorageState::Unprepared);
        let (sync_tx, sync_state) = watch::channel(SyncState::Synced);
        let (list_tx, list) = watch::channel(Vec::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let published = Published {
            storage_state: storage_tx,
            sync_state: sync_tx,
            list: list_tx,
            events: events.clone(),
        };
        let mut worker = Worker::new(context, runtime.clone(), published, commands.downgrade())?;
        worker.initialize();
        runtime.spawn(worker.run(receiver));
        let initial = *storage_state.borrow();
        info!(state = ?initial, "credential store started");

        Ok(Self {
            commands,
            storage_state,
            sync_state,
            list,
            events,
        })
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Completion<T> {
        let (reply, receiver) = oneshot::channel();
        if let Err(rejected) = self.commands.send(build(reply)) {
            // Dropping the command drops its reply, which reports WorkerGone.
            trace!(command = rejected.0.name(), "store worker is gone");
        }
        Completion { receiver }
    }

    /// Opens the database. A no-op while `Unprepared` or `Errored`.
    pub fn unlock(&self) -> Completion<()> {
        self.request(|reply| Command::Unlock { reply })
    }

    /// Drops decrypted contents and marks the autolock deadline as passed.
    /// Calling it again has no further effect.
    pub fn lock(&self) -> Completion<()> {
        self.request(|reply| Command::Lock { reply })
    }

    /// Records a use of the record with `id`.
    pub fn touch(&self, id: impl Into<String>) -> Completion<()> {
        let id = id.into();
        self.request(|reply| Command::Touch { id, reply })
    }

    /// Deletes the record with `id`, announcing it with
    /// [`StoreEvent::RecordDeleted`], then syncs.
    pub fn delete(&self, id: impl Into<String>) -> Completion<()> {
        let id = id.into();
        self.request(|reply| Command::Delete { id, reply })
    }

    /// Inserts or replaces `record`, then syncs.
    pub fn update(&self, record: CredentialRecord) -> Completion<()> {
        let record = Box::new(record);
        self.request(|reply| Command::Update { record, reply })
    }

    /// Looks up one record.
    pub fn get(&self, id: impl Into<String>) -> Completion<Option<CredentialRecord>> {
        let id = id.into();
        self.request(|reply| Command::Get { id, reply })
    }

    /// Wipes the database, key, salt and account credentials, returning the
    /// store to `Unprepared`.
    pub fn reset(&self) -> Completion<()> {
        self.request(|reply| Command::Reset { reply })
    }

    /// Supplies sync credentials. A new account always unlocks; an
    /// existing one follows the autolock deadline.
    pub fn update_credentials(&self, info: SyncUnlockInfo, is_new: bool) -> Completion<()> {
        let info = Arc::new(info);
        self.request(|reply| Command::UpdateCredentials {
            info,
            is_new,
            reply,
        })
    }

    /// Starts a sync. Resolves once the sync has been started or skipped;
    /// progress is reported through [`CredentialStore::sync_state`].
    pub fn sync(&self, suppress_notification: bool) -> Completion<()> {
        self.request(|reply| Command::Sync {
            suppress_notification,
            reply: Some(reply),
        })
    }

    /// Reports an app lifecycle transition.
    pub fn lifecycle(&self, event: LifecycleEvent) -> Completion<()> {
        self.request(|reply| Command::Lifecycle { event, reply })
    }

    /// Changes and persists the autolock setting.
    pub fn set_autolock_setting(&self, setting: AutoLockSetting) -> Completion<()> {
        self.request(|reply| Command::SetAutoLockSetting { setting, reply })
    }

    /// Restarts the autolock countdown.
    pub fn reset_autolock_timer(&self) -> Completion<()> {
        self.request(|reply| Command::ResetAutoLockTimer { reply })
    }

    /// Suspends the autolock countdown, keeping the current deadline.
    pub fn pause_autolock_timer(&self) -> Completion<()> {
        self.request(|reply| Command::PauseAutoLockTimer { reply })
    }

    /// Watches the storage state.
    #[must_use]
    pub fn storage_state(&self) -> watch::Receiver<StorageState> {
        self.storage_state.clone()
    }

    /// The storage state right now.
    #[must_use]
    pub fn current_storage_state(&self) -> StorageState {
        *self.storage_state.borrow()
    }

    /// Watches sync progress.
    #[must_use]
    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.sync_state.clone()
    }

    /// Sync progress right now.
    #[must_use]
    pub fn current_sync_state(&self) -> SyncState {
        *self.sync_state.borrow()
    }

    /// Watches the record list. It is empty unless the store is unlocked.
    #[must_use]
    pub fn list(&self) -> watch::Receiver<Vec<CredentialRecord>> {
        self.list.clone()
    }

    /// The record list right now.
    #[must_use]
    pub fn current_list(&self) -> Vec<CredentialRecord> {
        self.list.borrow().clone()
    }

    /// Subscribes to store events emitted from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
