use std::sync::Arc;
use std::time::Duration;

use lockwise_db::CredentialRecord;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::platform::NetworkMonitor;

use super::{RemoteSyncError, RemoteSyncService, SyncChanges, SyncUnlockInfo};

/// Message sent back to the store worker by the sync task and its watchdog.
#[derive(Debug)]
pub(crate) enum SyncReport {
    Finished {
        id: u64,
        result: Result<SyncChanges, RemoteSyncError>,
    },
    TimedOut {
        id: u64,
    },
}

pub(crate) type SyncReporter = Arc<dyn Fn(SyncReport) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncStart {
    Started(u64),
    AlreadyRunning,
    Offline,
    NoCredentials,
}

/// How a finished sync relates to the one currently tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncOutcome {
    /// The in-flight sync finished before its watchdog.
    Current,
    /// A sync that already timed out; nothing newer is running.
    Late,
    /// A newer sync is in flight.
    Superseded,
}

/// Tracks the single in-flight sync and its watchdog.
pub(crate) struct SyncCoordinator {
    service: Arc<dyn RemoteSyncService>,
    network: Arc<dyn NetworkMonitor>,
    runtime: Handle,
    timeout: Duration,
    reporter: SyncReporter,
    unlock_info: Option<Arc<SyncUnlockInfo>>,
    next_id: u64,
    in_flight: Option<u64>,
    watchdog: Option<JoinHandle<()>>,
}

impl SyncCoordinator {
    pub(crate) const fn new(
        service: Arc<dyn RemoteSyncService>,
        network: Arc<dyn NetworkMonitor>,
        runtime: Handle,
        timeout: Duration,
        reporter: SyncReporter,
    ) -> Self {
        Self {
            service,
            network,
            runtime,
            timeout,
            reporter,
            unlock_info: None,
            next_id: 0,
            in_flight: None,
            watchdog: None,
        }
    }

    pub(crate) fn set_unlock_info(&mut self, info: Arc<SyncUnlockInfo>) {
        self.unlock_info = Some(info);
    }

    pub(crate) const fn is_running(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn begin(&mut self) -> SyncStart {
        if self.in_flight.is_some() {
            return SyncStart::AlreadyRunning;
        }
        if self.unlock_info.is_none() {
            return SyncStart::NoCredentials;
        }
        if !self.network.is_online() {
            return SyncStart::Offline;
        }
        self.next_id += 1;
        self.in_flight = Some(self.next_id);
        SyncStart::Started(self.next_id)
    }

    /// Runs sync `id` and arms its watchdog. The network call is never
    /// cancelled; its result is reported whenever it arrives.
    pub(crate) fn launch(&mut self, id: u64, local: Vec<CredentialRecord>) {
        let Some(info) = self.unlock_info.clone() else {
            self.in_flight = None;
            return;
        };

        let service = Arc::clone(&self.service);
        let reporter = Arc::clone(&self.reporter);
        self.runtime.spawn(async move {
            let result = service.sync(&info, local).await;
            reporter(SyncReport::Finished { id, result });
        });

        let reporter = Arc::clone(&self.reporter);
        let timeout = self.timeout;
        self.abort_watchdog();
        self.watchdog = Some(self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            reporter(SyncReport::TimedOut { id });
        }));
        debug!(id, timeout_ms = timeout.as_millis(), "sync launched");
    }

    pub(crate) fn finish(&mut self, id: u64) -> SyncOutcome {
        match self.in_flight {
            Some(current) if current == id => {
                self.in_flight = None;
                self.abort_watchdog();
                SyncOutcome::Current
            }
            Some(_) => SyncOutcome::Superseded,
            None => SyncOutcome::Late,
        }
    }

    /// Returns whether the watchdog for `id` still applies.
    pub(crate) fn timed_out(&mut self, id: u64) -> bool {
        if self.in_flight == Some(id) {
            self.in_flight = None;
            self.watchdog = None;
            true
        } else {
            false
        }
    }

    /// Forgets the account and stops tracking any in-flight sync.
    pub(crate) fn reset(&mut self) {
        self.unlock_info = None;
        self.in_flight = None;
        self.abort_watchdog();
    }

    fn abort_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.abort_watchdog();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::platform::memory::StaticNetwork;
    use crate::sync::scripted::{Script, ScriptedSyncService};

    fn coordinator(
        service: Arc<ScriptedSyncService>,
        online: bool,
        timeout: Duration,
    ) -> (SyncCoordinator, mpsc::UnboundedReceiver<SyncReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter: SyncReporter = Arc::new(move |report| {
            let _ = tx.send(report);
        });
        let coordinator = SyncCoordinator::new(
            service,
            Arc::new(StaticNetwork::new(online)),
            Handle::current(),
            timeout,
            reporter,
        );
        (coordinator, rx)
    }

    fn info() -> Arc<SyncUnlockInfo> {
        Arc::new(SyncUnlockInfo::new("kid", "token", "key", "https://token.test"))
    }

    #[tokio::test]
    async fn test_begin_requires_credentials_and_network() {
        let service = Arc::new(ScriptedSyncService::new());
        let (mut offline, _rx) = coordinator(service.clone(), false, Duration::from_secs(5));
        assert_eq!(offline.begin(), SyncStart::NoCredentials);
        offline.set_unlock_info(info());
        assert_eq!(offline.begin(), SyncStart::Offline);
        assert!(!offline.is_running());

        let (mut online, _rx) = coordinator(service, true, Duration::from_secs(5));
        online.set_unlock_info(info());
        assert_eq!(online.begin(), SyncStart::Started(1));
        assert_eq!(online.begin(), SyncStart::AlreadyRunning);
    }

    #[tokio::test]
    async fn test_completed_sync_reports_current() {
        let service = Arc::new(ScriptedSyncService::new());
        let (mut coordinator, mut rx) = coordinator(service.clone(), true, Duration::from_secs(5));
        coordinator.set_unlock_info(info());
        let SyncStart::Started(id) = coordinator.begin() else {
            panic!("expected start");
        };
        coordinator.launch(id, Vec::new());

        match rx.recv().await.expect("report") {
            SyncReport::Finished { id: done, result } => {
                assert_eq!(done, id);
                assert_eq!(result, Ok(SyncChanges::default()));
            }
            SyncReport::TimedOut { .. } => panic!("unexpected timeout"),
        }
        assert_eq!(coordinator.finish(id), SyncOutcome::Current);
        assert!(!coordinator.is_running());
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_hung_sync_times_out_then_lands_late() {
        let service = Arc::new(ScriptedSyncService::new());
        let gate = service.push_gated(Ok(SyncChanges::default()));
        let (mut coordinator, mut rx) =
            coordinator(service.clone(), true, Duration::from_millis(20));
        coordinator.set_unlock_info(info());
        let SyncStart::Started(id) = coordinator.begin() else {
            panic!("expected start");
        };
        coordinator.launch(id, Vec::new());

        match rx.recv().await.expect("report") {
            SyncReport::TimedOut { id: timed_out } => assert!(coordinator.timed_out(timed_out)),
            SyncReport::Finished { .. } => panic!("gated sync finished early"),
        }
        assert!(!coordinator.is_running());

        gate.notify_one();
        match rx.recv().await.expect("report") {
            SyncReport::Finished { id: done, .. } => {
                assert_eq!(coordinator.finish(done), SyncOutcome::Late);
            }
            SyncReport::TimedOut { .. } => panic!("second timeout"),
        }
    }

    #[tokio::test]
    async fn test_newer_sync_supersedes_late_result() {
        let service = Arc::new(ScriptedSyncService::new());
        service.push(Script::Respond(Ok(SyncChanges::default())));
        let (mut coordinator, _rx) = coordinator(service, true, Duration::from_secs(5));
        coordinator.set_unlock_info(info());
        let SyncStart::Started(first) = coordinator.begin() else {
            panic!("expected start");
        };
        assert!(coordinator.timed_out(first));
        let SyncStart::Started(second) = coordinator.begin() else {
            panic!("expected start");
        };
        assert_eq!(coordinator.finish(first), SyncOutcome::Superseded);
        assert_eq!(coordinator.finish(second), SyncOutcome::Current);
    }

    #[tokio::test]
    async fn test_reset_forgets_credentials() {
        let service = Arc::new(ScriptedSyncService::new());
        let (mut coordinator, _rx) = coordinator(service, true, Duration::from_secs(5));
        coordinator.set_unlock_info(info());
        assert!(matches!(coordinator.begin(), SyncStart::Started(_)));
        coordinator.reset();
        assert!(!coordinator.is_running());
        assert_eq!(coordinator.begin(), SyncStart::NoCredentials);
    }
}
