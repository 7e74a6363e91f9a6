//! Log forwarding to the host application.
//!
//! Store code logs through `tracing`. With its `log` feature enabled, events
//! reach the `log` facade whenever no `tracing` subscriber is installed, so a
//! host that calls [`set_logger`] receives them through its own [`Logger`].
//! Hosts and tests that prefer a plain subscriber call [`init_tracing`].

use std::sync::{Arc, OnceLock};

use tracing_subscriber::EnvFilter;

/// Receiver for log messages, implemented by the host application.
///
/// # Examples
///
/// ```rust
/// use lockwise_core::logger::{LogLevel, Logger};
///
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Logger: Sync + Send {
    /// Logs a message at the specified level.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LogLevel {
    /// Very low priority, extremely detailed messages.
    Trace,
    /// Debugging information.
    Debug,
    /// Progress of the store.
    Info,
    /// Potentially harmful situations.
    Warn,
    /// Failures the store may still recover from.
    Error,
}

/// Forwards `log` records to the registered host logger.
struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !should_forward(record.level(), record.module_path()) {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(log_level(record.level()), format!("{}", record.args()));
        } else {
            eprintln!("Logger not set: {}", record.args());
        }
    }

    fn flush(&self) {}
}

// Debug and trace output from dependencies is noise for the host.
fn should_forward(level: log::Level, module_path: Option<&str>) -> bool {
    let is_from_lockwise = module_path.is_some_and(|path| path.starts_with("lockwise"));
    let is_debug_or_trace = level == log::Level::Debug || level == log::Level::Trace;
    !is_debug_or_trace || is_from_lockwise
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Registers the host logger. Only the first call takes effect.
#[cfg_attr(feature = "ffi", uniffi::export)]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("Logger already set");
        return;
    }

    static LOGGER: ForeignLogger = ForeignLogger;
    if let Err(e) = log::set_logger(&LOGGER) {
        eprintln!("Failed to set logger: {e}");
        return;
    }
    log::set_max_level(log::LevelFilter::Trace);
}

/// Installs a `tracing` fmt subscriber filtered by `filter`, falling back to
/// `RUST_LOG` and then `info`. Records emitted through `log` by dependencies
/// are captured too. Returns `false` if a global subscriber already exists.
pub fn init_tracing(filter: Option<&str>) -> bool {
    let filter = filter
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }

    // Fails harmlessly when a host logger already owns the `log` facade.
    let _ = tracing_log::LogTracer::init();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(log::Level::Debug, Some("lockwise_core::store"), true)]
    #[test_case(log::Level::Trace, Some("lockwise_db::db"), true)]
    #[test_case(log::Level::Debug, Some("hyper::client"), false)]
    #[test_case(log::Level::Debug, None, false)]
    #[test_case(log::Level::Warn, Some("hyper::client"), true)]
    #[test_case(log::Level::Error, None, true)]
    fn test_forwarding_filter(level: log::Level, module: Option<&str>, expected: bool) {
        assert_eq!(should_forward(level, module), expected);
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(log_level(log::Level::Warn), LogLevel::Warn);
        assert_eq!(log_level(log::Level::Trace), LogLevel::Trace);
    }
}
