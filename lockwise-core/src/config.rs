//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{StoreError, StoreResult};

/// Default time a sync may run before it is reported as timed out.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 20_000;

/// How long the store stays unlocked after the app goes to the background.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum AutoLockSetting {
    /// Lock as soon as the app leaves the foreground.
    OnAppExit,
    /// One minute.
    OneMinute,
    /// Five minutes.
    FiveMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// Thirty minutes.
    ThirtyMinutes,
    /// One hour.
    #[default]
    OneHour,
    /// Twelve hours.
    TwelveHours,
    /// Twenty-four hours.
    TwentyFourHours,
    /// Only lock explicitly or after a reboot.
    Never,
}

impl AutoLockSetting {
    /// Time until the store locks, `None` for [`AutoLockSetting::Never`].
    #[must_use]
    pub const fn interval(self) -> Option<Duration> {
        let seconds = match self {
            Self::OnAppExit => 0,
            Self::OneMinute => 60,
            Self::FiveMinutes => 5 * 60,
            Self::FifteenMinutes => 15 * 60,
            Self::ThirtyMinutes => 30 * 60,
            Self::OneHour => 60 * 60,
            Self::TwelveHours => 12 * 60 * 60,
            Self::TwentyFourHours => 24 * 60 * 60,
            Self::Never => return None,
        };
        Some(Duration::from_secs(seconds))
    }
}

/// Static configuration handed to the store at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Location of the encrypted logins database.
    pub database_path: PathBuf,
    /// Sync watchdog timeout in milliseconds.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Autolock setting used until the user picks one.
    #[serde(default)]
    pub autolock: AutoLockSetting,
}

const fn default_sync_timeout_ms() -> u64 {
    DEFAULT_SYNC_TIMEOUT_MS
}

impl StoreConfig {
    /// Configuration with defaults for everything but the database path.
    #[must_use]
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            autolock: AutoLockSetting::default(),
        }
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for malformed JSON and
    /// [`StoreError::Config`] for invalid values.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| StoreError::Serialization(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] describing the first invalid value.
    pub fn validate(&self) -> StoreResult<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(StoreError::Config("database_path is empty".into()));
        }
        if self.sync_timeout_ms == 0 {
            return Err(StoreError::Config("sync_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// The sync watchdog timeout.
    #[must_use]
    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}
