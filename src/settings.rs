//! Command line settings of the harness.
//!
//! Arguments are parsed by `Cli`, then validated into `Settings`.

use clap::Parser;
use clap::builder::RangedU64ValueParser;
use thiserror::Error;
use threading::{LockError, PriorityLockConfig};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    #[error("At least one normal or elevated thread is needed")]
    NoThreads,
    #[error("Too many threads or iterations for this platform")]
    Overflow,
    #[error(transparent)]
    Lock(#[from] LockError),
}

pub type Result<T> = core::result::Result<T, SettingsError>;

/// Contention harness for the priority queue locks.
///
/// Normal and elevated threads hammer one shared counter and
/// the wait time of every acquisition is reported per tier.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "lockbench", version, about, long_about = None)]
pub struct Cli {
    /// Threads running at `Normal` priority
    #[arg(short, long, default_value_t = 8, value_parser = RangedU64ValueParser::<usize>::new())]
    pub normal_threads: usize,

    /// Threads running at `Highest` priority
    #[arg(short, long, default_value_t = 2, value_parser = RangedU64ValueParser::<usize>::new())]
    pub elevated_threads: usize,

    /// Acquisitions performed by every thread
    #[arg(short, long, default_value_t = 10_000, value_parser = at_least_one())]
    pub iterations: usize,

    /// Admission slots of the lock (defaults to half of the available CPUs)
    #[arg(short = 's', long, value_parser = at_least_one())]
    pub admission_slots: Option<usize>,
}

fn at_least_one() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..)
}

/// Shape of one harness run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Threads running at `Normal` priority.
    pub normal_threads: usize,
    /// Threads running at `Highest` priority.
    pub elevated_threads: usize,
    /// Acquisitions performed by every thread.
    pub iterations: usize,
    pub lock: PriorityLockConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            normal_threads: 8,
            elevated_threads: 2,
            iterations: 10_000,
            lock: PriorityLockConfig::default(),
        }
    }
}

impl TryFrom<Cli> for Settings {
    type Error = SettingsError;

    fn try_from(cli: Cli) -> Result<Self> {
        let lock = match cli.admission_slots {
            Some(slots) => PriorityLockConfig::new(slots)?,
            None => PriorityLockConfig::default(),
        };

        let threads = cli
            .normal_threads
            .checked_add(cli.elevated_threads)
            .ok_or(SettingsError::Overflow)?;
        if threads == 0 {
            return Err(SettingsError::NoThreads);
        }
        threads
            .checked_mul(cli.iterations)
            .ok_or(SettingsError::Overflow)?;

        Ok(Self {
            normal_threads: cli.normal_threads,
            elevated_threads: cli.elevated_threads,
            iterations: cli.iterations,
            lock,
        })
    }
}

impl Settings {
    #[must_use]
    #[inline]
    /// Total amount of threads of the run.
    ///
    /// Saturates, which settings built from `Cli` never do.
    pub const fn threads(&self) -> usize {
        self.normal_threads.saturating_add(self.elevated_threads)
    }

    #[must_use]
    #[inline]
    /// Total amount of acquisitions of the run.
    pub const fn acquisitions(&self) -> usize {
        self.threads().saturating_mul(self.iterations)
    }
}
