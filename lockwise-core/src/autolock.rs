//! Autolock timer.
//!
//! The deadline is persisted in the blob store so it survives process
//! restarts. The live timer only ever asks the store to lock; it never
//! touches the database itself.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::AutoLockSetting;
use crate::error::{StoreError, StoreResult};
use crate::platform::{AtomicBlobStore, Clock};

/// Blob holding the persisted deadline.
pub const DEADLINE_BLOB: &str = "autolock_deadline";
/// Blob holding the user's autolock setting.
pub const SETTING_BLOB: &str = "autolock_setting";

const NEVER_MARKER: u64 = u64::MAX;

/// Callback run when a scheduled timer fires, with the timer's generation.
pub type FireCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Persisted autolock deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Do not lock until the deadline is rewritten.
    Never,
    /// Lock once the clock reaches this many milliseconds since the epoch.
    At(u64),
}

impl Deadline {
    fn encode(self) -> [u8; 8] {
        match self {
            Self::Never => NEVER_MARKER.to_le_bytes(),
            Self::At(millis) => millis.to_le_bytes(),
        }
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        match u64::from_le_bytes(raw) {
            NEVER_MARKER => Some(Self::Never),
            millis => Some(Self::At(millis)),
        }
    }
}

/// Tracks when the store must lock.
pub struct AutoLockTimer {
    prefs: Arc<dyn AtomicBlobStore>,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    setting: AutoLockSetting,
    paused: bool,
    generation: u64,
    live: Option<JoinHandle<()>>,
    on_fire: FireCallback,
}

impl std::fmt::Debug for AutoLockTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoLockTimer")
            .field("setting", &self.setting)
            .field("paused", &self.paused)
            .field("generation", &self.generation)
            .field("scheduled", &self.live.is_some())
            .finish_non_exhaustive()
    }
}

impl AutoLockTimer {
    /// Creates a timer, loading the persisted setting or falling back to
    /// `default_setting`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoRuntime`] outside a tokio runtime, or a blob
    /// store error.
    pub fn new(
        prefs: Arc<dyn AtomicBlobStore>,
        clock: Arc<dyn Clock>,
        default_setting: AutoLockSetting,
        on_fire: FireCallback,
    ) -> StoreResult<Self> {
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        let setting = match prefs.read(SETTING_BLOB)? {
            Some(bytes) => parse_setting(&bytes).unwrap_or_else(|| {
                warn!("ignoring unreadable autolock setting");
                default_setting
            }),
            None => default_setting,
        };
        Ok(Self {
            prefs,
            clock,
            runtime,
            setting,
            paused: false,
            generation: 0,
            live: None,
            on_fire,
        })
    }

    /// The active setting.
    #[must_use]
    pub const fn setting(&self) -> AutoLockSetting {
        self.setting
    }

    /// Whether the timer is paused.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether a live timer is scheduled.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.live.is_some()
    }

    /// Persists a new setting. Switching to `Never` cancels any timer and
    /// pushes the deadline out indefinitely.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn set_setting(&mut self, setting: AutoLockSetting) -> StoreResult<()> {
        self.prefs
            .write_atomic(SETTING_BLOB, setting.to_string().as_bytes())?;
        self.setting = setting;
        debug!(%setting, "autolock setting changed");
        if setting == AutoLockSetting::Never {
            self.cancel_live();
            self.write_deadline(Deadline::Never)?;
        }
        Ok(())
    }

    /// The persisted deadline, if any.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn deadline(&self) -> StoreResult<Option<Deadline>> {
        let Some(bytes) = self.prefs.read(DEADLINE_BLOB)? else {
            return Ok(None);
        };
        let deadline = Deadline::decode(&bytes);
        if deadline.is_none() {
            warn!(len = bytes.len(), "ignoring malformed autolock deadline");
        }
        Ok(deadline)
    }

    /// Whether the persisted deadline has passed. A missing deadline has not.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn is_elapsed(&self) -> StoreResult<bool> {
        Ok(matches!(
            self.deadline()?,
            Some(Deadline::At(at)) if at <= self.clock.now_millis()
        ))
    }

    /// Whether the persisted deadline is still in the future or `Never`.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn is_pending(&self) -> StoreResult<bool> {
        Ok(match self.deadline()? {
            Some(Deadline::Never) => true,
            Some(Deadline::At(at)) => at > self.clock.now_millis(),
            None => false,
        })
    }

    /// Cancels any timer and starts a new one from the setting. The persisted
    /// deadline is cleared first unless the timer is paused, in which case
    /// the paused deadline is resumed.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn reset_timer(&mut self) -> StoreResult<()> {
        self.stop_timer(!self.paused)?;
        self.restore()
    }

    /// Schedules the timer from the persisted state: a past deadline fires
    /// at once, a future one is scheduled for the time remaining, and a
    /// missing one starts a full interval.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn restore(&mut self) -> StoreResult<()> {
        let Some(interval) = self.setting.interval() else {
            self.stop_timer(true)?;
            return self.write_deadline(Deadline::Never);
        };

        let now = self.clock.now_millis();
        match self.deadline()? {
            Some(Deadline::At(at)) if at > now => {
                self.schedule(Duration::from_millis(at - now));
            }
            Some(Deadline::At(_)) => {
                self.generation += 1;
                self.paused = false;
                (self.on_fire)(self.generation);
                return Ok(());
            }
            None | Some(Deadline::Never) => {
                let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
                self.write_deadline(Deadline::At(now.saturating_add(millis)))?;
                self.schedule(interval);
            }
        }
        self.paused = false;
        Ok(())
    }

    /// Stops the live timer, keeping the persisted deadline.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn pause_timer(&mut self) -> StoreResult<()> {
        self.paused = true;
        self.stop_timer(false)
    }

    /// Stops the live timer, clearing the persisted deadline if `reset`.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn stop_timer(&mut self, reset: bool) -> StoreResult<()> {
        self.cancel_live();
        if reset {
            self.prefs.delete(DEADLINE_BLOB)?;
        }
        Ok(())
    }

    /// Decides whether a fire with `generation` should lock the store.
    /// Stale and paused fires are dropped.
    pub fn accept_fire(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.paused {
            debug!(generation, current = self.generation, "dropping autolock fire");
            return false;
        }
        self.live = None;
        self.generation += 1;
        true
    }

    /// Holds the store unlocked until the next background transition.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn cancel_until_background(&mut self) -> StoreResult<()> {
        self.cancel_live();
        self.paused = false;
        self.write_deadline(Deadline::Never)
    }

    /// Records that the store has locked, so a restart does not unlock it.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn mark_elapsed(&mut self) -> StoreResult<()> {
        self.cancel_live();
        self.paused = false;
        self.write_deadline(Deadline::At(self.clock.now_millis()))
    }

    /// Stops the live timer before the process exits, leaving a deadline
    /// the next start can honor. An existing countdown is kept; a deadline
    /// held until background starts a full interval from now.
    ///
    /// # Errors
    ///
    /// Returns a blob store error.
    pub fn suspend(&mut self) -> StoreResult<()> {
        self.cancel_live();
        let Some(interval) = self.setting.interval() else {
            return self.write_deadline(Deadline::Never);
        };
        if interval.is_zero() {
            return self.mark_elapsed();
        }
        match self.deadline()? {
            Some(Deadline::At(_)) => Ok(()),
            None | Some(Deadline::Never) => {
                let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
                let at = self.clock.now_millis().saturating_add(millis);
                debug!(at, "autolock deadline persisted for restart");
                self.write_deadline(Deadline::At(at))
            }
        }
    }

    fn write_deadline(&self, deadline: Deadline) -> StoreResult<()> {
        self.prefs.write_atomic(DEADLINE_BLOB, &deadline.encode())
    }

    fn schedule(&mut self, after: Duration) {
        self.cancel_live();
        self.generation += 1;
        let generation = self.generation;
        let on_fire = Arc::clone(&self.on_fire);
        debug!(generation, after_ms = after.as_millis(), "autolock scheduled");
        self.live = Some(self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            on_fire(generation);
        }));
    }

    fn cancel_live(&mut self) {
        if let Some(live) = self.live.take() {
            live.abort();
            self.generation += 1;
        }
    }
}

impl Drop for AutoLockTimer {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.abort();
        }
    }
}

fn parse_setting(bytes: &[u8]) -> Option<AutoLockSetting> {
    let text = std::str::from_utf8(bytes).ok()?;
    AutoLockSetting::from_str(text.trim()).ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use test_case::test_case;

    use super::*;
    use crate::platform::memory::{ManualClock, MemoryBlobStore};

    struct Harness {
        prefs: Arc<MemoryBlobStore>,
        clock: Arc<ManualClock>,
        fired: Arc<Mutex<Vec<u64>>>,
        timer: AutoLockTimer,
    }

    fn harness(setting: AutoLockSetting) -> Harness {
        let prefs = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let fired = Arc::new(Mutex::new(Vec::<u64>::new()));
        let sink = fired.clone();
        let timer = AutoLockTimer::new(
            prefs.clone(),
            clock.clone(),
            setting,
            Arc::new(move |generation: u64| sink.lock().expect("fired").push(generation)),
        )
        .expect("timer");
        Harness {
            prefs,
            clock,
            fired,
            timer,
        }
    }

    #[tokio::test]
    async fn test_reset_persists_deadline_from_interval() {
        let mut h = harness(AutoLockSetting::FiveMinutes);
        h.timer.reset_timer().expect("reset");
        assert_eq!(
            h.timer.deadline().expect("deadline"),
            Some(Deadline::At(1_000_000 + 300_000))
        );
        assert!(h.timer.is_scheduled());
        assert!(!h.timer.is_elapsed().expect("elapsed"));

        h.clock.advance(Duration::from_secs(301));
        assert!(h.timer.is_elapsed().expect("elapsed"));
    }

    #[tokio::test]
    async fn test_never_setting_pushes_deadline_out() {
        let mut h = harness(AutoLockSetting::Never);
        h.timer.reset_timer().expect("reset");
        assert_eq!(h.timer.deadline().expect("deadline"), Some(Deadline::Never));
        assert!(!h.timer.is_scheduled());
        h.clock.advance(Duration::from_secs(10 * 86_400));
        assert!(!h.timer.is_elapsed().expect("elapsed"));
        assert!(h.timer.is_pending().expect("pending"));
    }

    #[tokio::test]
    async fn test_restore_with_past_deadline_fires_immediately() {
        let mut h = harness(AutoLockSetting::OneMinute);
        h.prefs
            .write_atomic(DEADLINE_BLOB, &Deadline::At(10).encode())
            .expect("write");
        h.timer.restore().expect("restore");
        let fired = h.fired.lock().expect("fired").clone();
        assert_eq!(fired.len(), 1);
        assert!(h.timer.accept_fire(fired[0]));
        assert!(!h.timer.accept_fire(fired[0]));
    }

    #[tokio::test]
    async fn test_restore_with_future_deadline_keeps_it() {
        let mut h = harness(AutoLockSetting::OneHour);
        h.prefs
            .write_atomic(DEADLINE_BLOB, &Deadline::At(1_000_000 + 5_000).encode())
            .expect("write");
        h.timer.restore().expect("restore");
        assert!(h.timer.is_scheduled());
        assert_eq!(
            h.timer.deadline().expect("deadline"),
            Some(Deadline::At(1_005_000))
        );
    }

    #[tokio::test]
    async fn test_pause_keeps_deadline_and_drops_fires() {
        let mut h = harness(AutoLockSetting::FiveMinutes);
        h.timer.reset_timer().expect("reset");
        let deadline = h.timer.deadline().expect("deadline");
        h.timer.pause_timer().expect("pause");
        assert!(!h.timer.is_scheduled());
        assert_eq!(h.timer.deadline().expect("deadline"), deadline);
        assert!(!h.timer.accept_fire(h.timer.generation));

        // Resuming picks the paused deadline back up.
        h.timer.reset_timer().expect("resume");
        assert!(!h.timer.is_paused());
        assert_eq!(h.timer.deadline().expect("deadline"), deadline);
    }

    #[tokio::test]
    async fn test_stop_timer_clears_deadline() {
        let mut h = harness(AutoLockSetting::FiveMinutes);
        h.timer.reset_timer().expect("reset");
        h.timer.stop_timer(true).expect("stop");
        assert_eq!(h.timer.deadline().expect("deadline"), None);
        assert!(!h.timer.is_elapsed().expect("elapsed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_timer_fires_once() {
        let mut h = harness(AutoLockSetting::OneMinute);
        h.timer.reset_timer().expect("reset");
        tokio::time::sleep(Duration::from_secs(61)).await;
        let fired = h.fired.lock().expect("fired").clone();
        assert_eq!(fired.len(), 1);
        assert!(h.timer.accept_fire(fired[0]));
    }

    #[tokio::test]
    async fn test_mark_elapsed_and_cancel_until_background() {
        let mut h = harness(AutoLockSetting::OneHour);
        h.timer.cancel_until_background().expect("cancel");
        assert_eq!(h.timer.deadline().expect("deadline"), Some(Deadline::Never));
        h.timer.mark_elapsed().expect("mark");
        assert!(h.timer.is_elapsed().expect("elapsed"));
    }

    #[tokio::test]
    async fn test_suspend_turns_held_deadline_into_countdown() {
        let mut h = harness(AutoLockSetting::FiveMinutes);
        h.timer.cancel_until_background().expect("cancel");
        h.timer.suspend().expect("suspend");
        assert_eq!(
            h.timer.deadline().expect("deadline"),
            Some(Deadline::At(1_000_000 + 300_000))
        );
        assert!(!h.timer.is_scheduled());
    }

    #[tokio::test]
    async fn test_suspend_keeps_running_countdown() {
        let mut h = harness(AutoLockSetting::FiveMinutes);
        h.timer.reset_timer().expect("reset");
        h.clock.advance(Duration::from_secs(60));
        h.timer.suspend().expect("suspend");
        assert_eq!(
            h.timer.deadline().expect("deadline"),
            Some(Deadline::At(1_000_000 + 300_000))
        );
        assert!(!h.timer.is_scheduled());
    }

    #[test_case(AutoLockSetting::OnAppExit, Some(Deadline::At(1_000_000)))]
    #[test_case(AutoLockSetting::Never, Some(Deadline::Never))]
    #[tokio::test]
    async fn test_suspend_follows_setting(setting: AutoLockSetting, expected: Option<Deadline>) {
        let mut h = harness(setting);
        h.timer.cancel_until_background().expect("cancel");
        h.timer.suspend().expect("suspend");
        assert_eq!(h.timer.deadline().expect("deadline"), expected);
    }

    #[tokio::test]
    async fn test_setting_is_persisted() {
        let mut h = harness(AutoLockSetting::OneHour);
        h.timer
            .set_setting(AutoLockSetting::ThirtyMinutes)
            .expect("set");
        let reloaded = AutoLockTimer::new(
            h.prefs.clone(),
            h.clock.clone(),
            AutoLockSetting::OneHour,
            Arc::new(|_: u64| {}),
        )
        .expect("timer");
        assert_eq!(reloaded.setting(), AutoLockSetting::ThirtyMinutes);
    }

    #[test]
    fn test_requires_runtime() {
        let result = AutoLockTimer::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(ManualClock::new(0)),
            AutoLockSetting::OneHour,
            Arc::new(|_: u64| {}),
        );
        assert!(matches!(result, Err(StoreError::NoRuntime)));
    }
}
