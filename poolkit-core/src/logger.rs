//! Bridge from the `log` facade to a host-provided logger.

use std::sync::{Arc, OnceLock};

/// Sink for log lines, implemented by the host application.
///
/// ```rust
/// use poolkit_core::logger::{LogLevel, Logger};
///
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
///
/// With the `ffi` feature this trait is exported for foreign implementations;
/// call [`set_logger`] once at startup.
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Logger: Sync + Send {
    /// Receives one formatted record.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// Debugging detail.
    Debug,
    /// Progress of normal operation.
    Info,
    /// Something unexpected that the crate recovered from.
    Warn,
    /// A failed operation.
    Error,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        // Debug and trace from dependencies are noise for the host.
        let from_poolkit = record
            .module_path()
            .is_some_and(|module_path| module_path.starts_with("poolkit"));
        if record.level() >= log::Level::Debug && !from_poolkit {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(record.level().into(), record.args().to_string());
        }
    }

    fn flush(&self) {}
}

/// Installs `logger` as the destination of every record logged by this crate.
///
/// Only the first call takes effect; later calls are ignored.
#[cfg_attr(feature = "ffi", uniffi::export)]
pub fn set_logger(logger: Arc<dyn Logger>) {
    static LOGGER: ForeignLogger = ForeignLogger;

    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("poolkit logger already set");
        return;
    }

    if let Err(err) = log::set_logger(&LOGGER) {
        eprintln!("failed to install poolkit logger: {err}");
        return;
    }
    log::set_max_level(log::LevelFilter::Trace);
}
