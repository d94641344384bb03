//! This module contains the global logger instance used by the `log` crate.
//!
//! Records are written to stderr, prefixed with the time elapsed since the first record.
//! Writes are serialized through an MCS lock so that lines from different threads
//! never interleave and timestamps stay in order.

use std::io::Write;
use std::time::Instant;
use threading::McsLock;

/// The static API for the logger.
pub static LOGGER_API: LockedLogger = LockedLogger::new();

/// A logger that is backed by an MCS lock.
///
/// It is used to interface with the `log` crate.
pub struct LockedLogger {
    /// Instant of the first record.
    start: McsLock<Option<Instant>>,
}

impl LockedLogger {
    #[must_use]
    const fn new() -> Self {
        Self {
            start: McsLock::new(None),
        }
    }
}

/// Installs the logger.
///
/// ## Errors
///
/// Fails if another logger is already installed.
pub fn init() -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER_API)?;
    log::set_max_level(if cfg!(debug_assertions) {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    });
    Ok(())
}

impl log::Log for LockedLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if cfg!(debug_assertions) {
            true
        } else {
            metadata.level() <= log::Level::Info
        }
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        self.start.with_locked(|start| {
            let elapsed = start.get_or_insert_with(Instant::now).elapsed();
            let mut stderr = std::io::stderr().lock();
            // Nowhere left to report a failing stderr
            let _ = if cfg!(debug_assertions) {
                writeln!(
                    stderr,
                    "[{:>10.3?}] [{:5}] {}: {}",
                    elapsed,
                    record.level(),
                    record.target(),
                    record.args()
                )
            } else {
                writeln!(
                    stderr,
                    "[{:>10.3?}] [{:5}] {}",
                    elapsed,
                    record.level(),
                    record.args()
                )
            };
        });
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
