use std::sync::Arc;

use lockwise_db::CredentialRecord;
use tokio::sync::oneshot;

use crate::config::AutoLockSetting;
use crate::error::StoreResult;
use crate::sync::{RemoteSyncError, SyncChanges, SyncUnlockInfo};

use super::LifecycleEvent;

pub(crate) type Reply<T> = oneshot::Sender<StoreResult<T>>;

/// Work items processed, in order, by the store worker.
pub(crate) enum Command {
    Unlock {
        reply: Reply<()>,
    },
    Lock {
        reply: Reply<()>,
    },
    Touch {
        id: String,
        reply: Reply<()>,
    },
    Delete {
        id: String,
        reply: Reply<()>,
    },
    Update {
        record: Box<CredentialRecord>,
        reply: Reply<()>,
    },
    Get {
        id: String,
        reply: Reply<Option<CredentialRecord>>,
    },
    Reset {
        reply: Reply<()>,
    },
    UpdateCredentials {
        info: Arc<SyncUnlockInfo>,
        is_new: bool,
        reply: Reply<()>,
    },
    Sync {
        suppress_notification: bool,
        reply: Option<Reply<()>>,
    },
    Lifecycle {
        event: LifecycleEvent,
        reply: Reply<()>,
    },
    SetAutoLockSetting {
        setting: AutoLockSetting,
        reply: Reply<()>,
    },
    ResetAutoLockTimer {
        reply: Reply<()>,
    },
    PauseAutoLockTimer {
        reply: Reply<()>,
    },
    AutoLockFired {
        generation: u64,
    },
    SyncFinished {
        id: u64,
        result: Result<SyncChanges, RemoteSyncError>,
    },
    SyncTimedOut {
        id: u64,
    },
}

impl Command {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Unlock { .. } => "unlock",
            Self::Lock { .. } => "lock",
            Self::Touch { .. } => "touch",
            Self::Delete { .. } => "delete",
            Self::Update { .. } => "update",
            Self::Get { .. } => "get",
            Self::Reset { .. } => "reset",
            Self::UpdateCredentials { .. } => "update_credentials",
            Self::Sync { .. } => "sync",
            Self::Lifecycle { .. } => "lifecycle",
            Self::SetAutoLockSetting { .. } => "set_autolock_setting",
            Self::ResetAutoLockTimer { .. } => "reset_autolock_timer",
            Self::PauseAutoLockTimer { .. } => "pause_autolock_timer",
            Self::AutoLockFired { .. } => "autolock_fired",
            Self::SyncFinished { .. } => "sync_finished",
            Self::SyncTimedOut { .. } => "sync_timed_out",
        }
    }
}

/// Sends `result` to a caller that may have stopped waiting.
pub(crate) fn respond<T>(reply: Reply<T>, result: StoreResult<T>) {
    let _ = reply.send(result);
}
