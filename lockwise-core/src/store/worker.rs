use std::sync::Arc;

use lockwise_db::{CredentialRecord, LoginsDb};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use crate::autolock::{AutoLockTimer, FireCallback};
use crate::config::AutoLockSetting;
use crate::error::{StoreError, StoreResult};
use crate::material::EncryptionMaterialManager;
use crate::platform::{AccountLink, AtomicBlobStore, BootSession, Clock};
use crate::sync::{
    RemoteSyncError, SyncChanges, SyncCoordinator, SyncOutcome, SyncReport, SyncReporter,
    SyncStart, SyncState, SyncUnlockInfo,
};

use super::command::{respond, Command};
use super::context::StoreContext;
use super::{LifecycleEvent, StorageState, StoreEvent, BOOT_SESSION_BLOB};

/// Senders for everything the store publishes.
pub(crate) struct Published {
    pub(crate) storage_state: watch::Sender<StorageState>,
    pub(crate) sync_state: watch::Sender<SyncState>,
    pub(crate) list: watch::Sender<Vec<CredentialRecord>>,
    pub(crate) events: broadcast::Sender<StoreEvent>,
}

enum Flow {
    Continue,
    Stop,
}

/// Owns the database and processes commands one at a time.
pub(crate) struct Worker {
    db: LoginsDb,
    material: EncryptionMaterialManager,
    autolock: AutoLockTimer,
    sync: SyncCoordinator,
    prefs: Arc<dyn AtomicBlobStore>,
    clock: Arc<dyn Clock>,
    boot_session: Arc<dyn BootSession>,
    account: Arc<dyn AccountLink>,
    published: Published,
    commands: WeakUnboundedSender<Command>,
}

impl Worker {
    pub(crate) fn new(
        context: StoreContext,
        runtime: Handle,
        published: Published,
        commands: WeakUnboundedSender<Command>,
    ) -> StoreResult<Self> {
        let fire_tx = commands.clone();
        let on_fire: FireCallback = Arc::new(move |generation| {
            if let Some(tx) = fire_tx.upgrade() {
                let _ = tx.send(Command::AutoLockFired { generation });
            }
        });
        let autolock = AutoLockTimer::new(
            Arc::clone(&context.prefs),
            Arc::clone(&context.clock),
            context.config.autolock,
            on_fire,
        )?;

        let sync_tx = commands.clone();
        let reporter: SyncReporter = Arc::new(move |report| {
            let command = match report {
                SyncReport::Finished { id, result } => Command::SyncFinished { id, result },
                SyncReport::TimedOut { id } => Command::SyncTimedOut { id },
            };
            if let Some(tx) = sync_tx.upgrade() {
                let _ = tx.send(command);
            }
        });
        let sync = SyncCoordinator::new(
            context.sync_service,
            context.network,
            runtime,
            context.config.sync_timeout(),
            reporter,
        );

        Ok(Self {
            db: LoginsDb::new(context.config.database_path),
            material: EncryptionMaterialManager::new(context.vault),
            autolock,
            sync,
            prefs: context.prefs,
            clock: context.clock,
            boot_session: context.boot_session,
            account: context.account,
            published,
            commands,
        })
    }

    /// Picks the starting state from what is on disk, the boot session and
    /// the persisted autolock deadline.
    pub(crate) fn initialize(&mut self) {
        let rebooted = self.detect_reboot();
        let has_key = self.material.has_key().unwrap_or_else(|err| {
            warn!(error = %err, "could not read database key");
            false
        });
        if !self.db.exists() && !has_key {
            info!("no local account data");
            return;
        }

        self.set_storage_state(StorageState::Locked);
        if rebooted {
            info!("device restarted since last run, staying locked");
            log_failure("mark autolock deadline", self.autolock.mark_elapsed());
            return;
        }

        let resume = self.autolock.setting() == AutoLockSetting::Never
            || self.autolock.is_pending().unwrap_or_else(|err| {
                warn!(error = %err, "could not read autolock deadline");
                false
            });
        if resume {
            debug!("autolock deadline pending, resuming unlocked");
            let _ = self.unlock_or_error();
        }
    }

    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            trace!(command = command.name(), "processing command");
            if matches!(self.handle(command), Flow::Stop) {
                break;
            }
        }
        self.db.ensure_locked();
        info!("credential store stopped");
    }

    fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Unlock { reply } => respond(reply, self.unlock()),
            Command::Lock { reply } => {
                self.lock();
                respond(reply, Ok(()));
            }
            Command::Touch { id, reply } => respond(reply, self.touch(&id)),
            Command::Delete { id, reply } => respond(reply, self.delete(&id)),
            Command::Update { record, reply } => respond(reply, self.update(*record)),
            Command::Get { id, reply } => respond(reply, self.get(&id)),
            Command::Reset { reply } => respond(reply, self.reset()),
            Command::UpdateCredentials {
                info,
                is_new,
                reply,
            } => respond(reply, self.update_credentials(info, is_new)),
            Command::Sync {
                suppress_notification,
                reply,
            } => {
                self.start_sync(suppress_notification);
                if let Some(reply) = reply {
                    respond(reply, Ok(()));
                }
            }
            Command::Lifecycle { event, reply } => {
                let result = self.lifecycle(event);
                respond(reply, result);
                if event == LifecycleEvent::Shutdown {
                    return Flow::Stop;
                }
            }
            Command::SetAutoLockSetting { setting, reply } => {
                respond(reply, self.autolock.set_setting(setting));
            }
            Command::ResetAutoLockTimer { reply } => {
                let result = if self.state() == StorageState::Unlocked {
                    self.autolock.reset_timer()
                } else {
                    Ok(())
                };
                respond(reply, result);
            }
            Command::PauseAutoLockTimer { reply } => respond(reply, self.autolock.pause_timer()),
            Command::AutoLockFired { generation } => self.autolock_fired(generation),
            Command::SyncFinished { id, result } => self.sync_finished(id, result),
            Command::SyncTimedOut { id } => self.sync_timed_out(id),
        }
        Flow::Continue
    }

    fn detect_reboot(&self) -> bool {
        let current = match self.boot_session.current_boot_id() {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "boot id unavailable, treating as restart");
                return true;
            }
        };
        let previous = self.prefs.read(BOOT_SESSION_BLOB).unwrap_or_else(|err| {
            warn!(error = %err, "could not read last boot id");
            None
        });
        log_failure(
            "persist boot id",
            self.prefs.write_atomic(BOOT_SESSION_BLOB, current.as_bytes()),
        );
        previous.is_some_and(|previous| previous != current.as_bytes())
    }

    fn unlock(&mut self) -> StoreResult<()> {
        match self.state() {
            StorageState::Unprepared | StorageState::Errored { .. } => {
                debug!(state = ?self.state(), "unlock ignored");
                Ok(())
            }
            StorageState::Locked | StorageState::Unlocked => self.unlock_or_error(),
        }
    }

    fn unlock_or_error(&mut self) -> StoreResult<()> {
        self.open_database().inspect_err(|err| self.enter_error(err))
    }

    fn open_database(&mut self) -> StoreResult<()> {
        if self.db.is_locked() {
            let key = self.material.key()?;
            let opened = match self.material.salt(&mut self.db, &key) {
                Ok(salt) => self.db.ensure_unlocked(&key, &salt).map_err(StoreError::from),
                Err(err) => Err(err),
            };
            if let Err(err) = opened {
                if !is_recoverable(&err) {
                    return Err(err);
                }
                warn!(error = %err, "logins database unreadable, starting over");
                self.material.recover_from_unlock_failure(&mut self.db, &key)?;
            }
            info!("logins database unlocked");
        }

        log_failure(
            "hold autolock until background",
            self.autolock.cancel_until_background(),
        );
        self.set_storage_state(StorageState::Unlocked);
        self.refresh_list();
        self.enqueue(Command::Sync {
            suppress_notification: false,
            reply: None,
        });
        Ok(())
    }

    fn lock(&mut self) {
        log_failure("mark autolock deadline", self.autolock.mark_elapsed());
        if !matches!(
            self.state(),
            StorageState::Locked | StorageState::Unlocked
        ) {
            return;
        }
        self.db.ensure_locked();
        self.publish_list(Vec::new());
        self.set_storage_state(StorageState::Locked);
    }

    fn touch(&mut self, id: &str) -> StoreResult<()> {
        self.require_unlocked()?;
        if self.db.touch(id, self.clock.now_millis())? {
            self.refresh_list();
        } else {
            debug!(id, "touch for unknown record");
        }
        Ok(())
    }

    fn delete(&mut self, id: &str) -> StoreResult<()> {
        self.require_unlocked()?;
        let Some(record) = self.db.get(id)? else {
            debug!(id, "delete for unknown record");
            return Ok(());
        };
        self.emit(StoreEvent::RecordDeleted {
            id: record.id.clone(),
            display_name: record.display_name().to_string(),
        });
        self.db.delete(id)?;
        self.refresh_list();
        self.enqueue_sync(true);
        Ok(())
    }

    fn update(&mut self, record: CredentialRecord) -> StoreResult<()> {
        self.require_unlocked()?;
        self.db.update(record)?;
        self.refresh_list();
        self.enqueue_sync(true);
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<CredentialRecord>> {
        self.require_unlocked()?;
        Ok(self.db.get(id)?)
    }

    fn reset(&mut self) -> StoreResult<()> {
        info!("resetting credential store");
        self.sync.reset();
        let timer = self.autolock.stop_timer(true);
        let db = self.db.destroy().map_err(StoreError::from);
        let material = self.material.clear();
        self.publish_list(Vec::new());
        self.set_sync_state(SyncState::Synced);
        self.set_storage_state(StorageState::Unprepared);
        timer.and(db).and(material)
    }

    fn update_credentials(&mut self, info: Arc<SyncUnlockInfo>, is_new: bool) -> StoreResult<()> {
        self.sync.set_unlock_info(info);
        if is_new {
            return self.unlock_or_error();
        }
        match self.state() {
            StorageState::Errored { .. } => Ok(()),
            StorageState::Unlocked => self.resume_foreground(),
            StorageState::Locked | StorageState::Unprepared => {
                let resume = self.autolock.setting() == AutoLockSetting::Never
                    || self.autolock.is_pending()?;
                if resume {
                    self.unlock_or_error()
                } else {
                    self.lock();
                    Ok(())
                }
            }
        }
    }

    fn lifecycle(&mut self, event: LifecycleEvent) -> StoreResult<()> {
        debug!(?event, state = ?self.state(), "lifecycle event");
        match event {
            LifecycleEvent::Foreground => {
                if self.state() == StorageState::Unlocked {
                    self.resume_foreground()
                } else {
                    Ok(())
                }
            }
            LifecycleEvent::Background => {
                if self.state() != StorageState::Unlocked {
                    return Ok(());
                }
                if self.autolock.setting() == AutoLockSetting::OnAppExit {
                    self.lock();
                    Ok(())
                } else {
                    self.autolock.reset_timer()
                }
            }
            LifecycleEvent::Shutdown => {
                let timer = if self.state() == StorageState::Unlocked {
                    self.autolock.suspend()
                } else {
                    self.autolock.stop_timer(false)
                };
                log_failure("stop autolock timer", timer);
                if self.sync.is_running() {
                    debug!("abandoning in-flight sync");
                }
                self.sync.reset();
                self.db.ensure_locked();
                Ok(())
            }
        }
    }

    fn resume_foreground(&mut self) -> StoreResult<()> {
        if self.autolock.is_elapsed()? {
            info!("autolock deadline passed while in background");
            self.lock();
            Ok(())
        } else {
            self.unlock_or_error()
        }
    }

    fn autolock_fired(&mut self, generation: u64) {
        if !self.autolock.accept_fire(generation) {
            return;
        }
        info!("autolock deadline reached");
        self.lock();
        log_failure("clear autolock deadline", self.autolock.stop_timer(true));
    }

    fn start_sync(&mut self, suppress_notification: bool) {
        if self.state() != StorageState::Unlocked || self.db.is_locked() {
            debug!("sync skipped, store is not unlocked");
            return;
        }
        match self.sync.begin() {
            SyncStart::AlreadyRunning => debug!("sync already in flight"),
            SyncStart::NoCredentials => debug!("sync skipped, no account credentials"),
            SyncStart::Offline => {
                info!("offline, skipping sync");
                self.set_sync_state(SyncState::Synced);
            }
            SyncStart::Started(id) => match self.db.list() {
                Ok(local) => {
                    self.set_sync_state(SyncState::Syncing {
                        suppress_notification,
                    });
                    self.sync.launch(id, local);
                }
                Err(err) => {
                    warn!(error = %err, "could not read records for sync");
                    self.sync.finish(id);
                }
            },
        }
    }

    fn sync_finished(&mut self, id: u64, result: Result<SyncChanges, RemoteSyncError>) {
        let outcome = self.sync.finish(id);
        debug!(id, ?outcome, ok = result.is_ok(), "sync finished");
        match result {
            Ok(changes) => {
                if self.state() == StorageState::Unlocked && !self.db.is_locked() {
                    match self.db.apply_remote(changes.upserted, &changes.deleted) {
                        Ok(()) => self.refresh_list(),
                        Err(err) => {
                            warn!(error = %err, "could not apply sync changes");
                            self.emit(StoreEvent::SyncFailed {
                                reason: err.to_string(),
                            });
                        }
                    }
                } else {
                    debug!(id, "discarding sync result, store is not unlocked");
                }
                if outcome != SyncOutcome::Superseded {
                    self.set_sync_state(SyncState::Synced);
                }
            }
            Err(err) if err.is_auth() => {
                if self.state() == StorageState::Unprepared {
                    debug!(id, "ignoring auth failure for a reset store");
                    return;
                }
                error!(error = %err, "sync credentials rejected, resetting store");
                self.enter_error(&StoreError::Sync(err));
                log_failure("reset after credential failure", self.reset());
                self.account.unlink();
            }
            Err(err) => {
                warn!(id, error = %err, "sync failed");
                self.emit(StoreEvent::SyncFailed {
                    reason: err.to_string(),
                });
                if outcome != SyncOutcome::Superseded {
                    self.set_sync_state(SyncState::Synced);
                }
            }
        }
    }

    fn sync_timed_out(&mut self, id: u64) {
        if !self.sync.timed_out(id) {
            return;
        }
        warn!(id, "sync timed out");
        self.set_sync_state(SyncState::TimedOut);
        self.emit(StoreEvent::SyncTimedOut);
    }

    fn enter_error(&mut self, err: &StoreError) {
        let cause = err.cause();
        error!(%cause, error = %err, "credential store errored");
        self.db.ensure_locked();
        self.publish_list(Vec::new());
        self.set_storage_state(StorageState::Errored { cause });
        self.emit(StoreEvent::Error {
            cause,
            message: err.to_string(),
        });
    }

    fn require_unlocked(&self) -> StoreResult<()> {
        match self.state() {
            StorageState::Unlocked => Ok(()),
            StorageState::Locked => Err(StoreError::Locked),
            StorageState::Unprepared => Err(StoreError::Unprepared),
            StorageState::Errored { cause } => Err(StoreError::Errored(cause)),
        }
    }

    fn state(&self) -> StorageState {
        *self.published.storage_state.borrow()
    }

    fn set_storage_state(&self, next: StorageState) {
        self.published.storage_state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = ?state, to = ?next, "storage state changed");
            *state = next;
            true
        });
    }

    fn set_sync_state(&self, next: SyncState) {
        self.published.sync_state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn refresh_list(&self) {
        if self.state() != StorageState::Unlocked {
            self.publish_list(Vec::new());
            return;
        }
        match self.db.list() {
            Ok(records) => self.publish_list(records),
            Err(err) => warn!(error = %err, "could not list records"),
        }
    }

    fn publish_list(&self, records: Vec<CredentialRecord>) {
        self.published.list.send_replace(records);
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.published.events.send(event);
    }

    fn enqueue_sync(&self, suppress_notification: bool) {
        self.enqueue(Command::Sync {
            suppress_notification,
            reply: None,
        });
    }

    fn enqueue(&self, command: Command) {
        if let Some(tx) = self.commands.upgrade() {
            let _ = tx.send(command);
        }
    }
}

fn is_recoverable(err: &StoreError) -> bool {
    match err {
        StoreError::InvalidMaterial(_) => true,
        StoreError::Database(err) => err.is_recoverable(),
        _ => false,
    }
}

fn log_failure(action: &str, result: StoreResult<()>) {
    if let Err(err) = result {
        warn!(action, error = %err, "store housekeeping failed");
    }
}
