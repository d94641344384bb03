//! Contention run over a priority lock.
//!
//! Every thread performs `iterations` acquisitions of a shared counter and
//! records how long it waited for each of them.

use crate::settings::Settings;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::Builder;
use thiserror::Error;
use std::time::{Duration, Instant};
use threading::locks::SpinThenYield;
use threading::priority::{self, ThreadPriority};
use threading::{McsNode, PriorityMcsLock, Tier};

type BenchLock = PriorityMcsLock<u64, SpinThenYield>;

/// Wait statistics of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierReport {
    pub tier: Tier,
    pub acquisitions: u64,
    pub total_wait: Duration,
    pub max_wait: Duration,
}

impl TierReport {
    #[must_use]
    pub const fn new(tier: Tier) -> Self {
        Self {
            tier,
            acquisitions: 0,
            total_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    fn record(&mut self, wait: Duration) {
        self.acquisitions += 1;
        self.total_wait += wait;
        self.max_wait = self.max_wait.max(wait);
    }

    fn merge(&mut self, other: &Self) {
        self.acquisitions += other.acquisitions;
        self.total_wait += other.total_wait;
        self.max_wait = self.max_wait.max(other.max_wait);
    }

    #[must_use]
    pub fn mean_wait(&self) -> Duration {
        u32::try_from(self.acquisitions)
            .ok()
            .filter(|&count| count > 0)
            .map_or(Duration::ZERO, |count| self.total_wait / count)
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub normal: TierReport,
    pub elevated: TierReport,
    /// Final value of the protected counter.
    pub counter: u64,
    pub elapsed: Duration,
}

impl Report {
    #[must_use]
    /// Returns true if no increment of the counter was lost.
    pub const fn is_consistent(&self) -> bool {
        self.counter == self.normal.acquisitions + self.elevated.acquisitions
    }

    pub fn log(&self) {
        for tier in [&self.normal, &self.elevated] {
            log::info!(
                "{:?}: {} acquisitions, mean wait {:.3?}, max wait {:.3?}",
                tier.tier,
                tier.acquisitions,
                tier.mean_wait(),
                tier.max_wait
            );
        }
        log::info!("Counter {} after {:.3?}", self.counter, self.elapsed);
    }
}

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Unable to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("Worker thread {0} panicked")]
    WorkerPanicked(String),
}

/// Runs the contention scenario described by `settings`.
///
/// Workers are held back until every one of them is spawned.
///
/// ## Errors
///
/// Fails if a worker thread cannot be spawned or panics.
/// Workers spawned before a failing one exit without touching the lock.
pub fn run(settings: &Settings) -> Result<Report, BenchError> {
    let lock = Arc::new(BenchLock::with_config(
        0,
        &settings.lock,
        priority::CurrentThread,
    ));
    log::debug!("Running with {lock:?}");

    // Holds `true` once every worker is spawned.
    let gate = Arc::new(RwLock::new(false));
    let mut opened = gate.write().unwrap_or_else(PoisonError::into_inner);

    let mut workers = Vec::with_capacity(settings.threads());
    let mut spawn_error = None;
    for i in 0..settings.threads() {
        let (name, level) = if i < settings.elevated_threads {
            (format!("elevated-{i}"), ThreadPriority::Highest)
        } else {
            (format!("normal-{i}"), ThreadPriority::Normal)
        };
        let lock = lock.clone();
        let gate = gate.clone();
        let iterations = settings.iterations;

        let spawned = Builder::new().name(name).spawn(move || {
            let _scope = priority::scoped(level);
            let mut report = TierReport::new(level.tier());
            let mut node = McsNode::new();

            if !*gate.read().unwrap_or_else(PoisonError::into_inner) {
                return report;
            }
            for _ in 0..iterations {
                let requested = Instant::now();
                let mut counter = lock.lock(&mut node);
                report.record(requested.elapsed());
                *counter += 1;
            }
            report
        });
        match spawned {
            Ok(worker) => workers.push(worker),
            Err(err) => {
                spawn_error = Some(err);
                break;
            }
        }
    }

    *opened = spawn_error.is_none();
    drop(opened);
    let start = Instant::now();

    let mut normal = TierReport::new(Tier::Normal);
    let mut elevated = TierReport::new(Tier::Elevated);
    let mut panicked = None;
    for worker in workers {
        let name = worker.thread().name().unwrap_or("unnamed").to_owned();
        match worker.join() {
            Ok(report) => match report.tier {
                Tier::Normal => normal.merge(&report),
                Tier::Elevated => elevated.merge(&report),
            },
            Err(_) => {
                log::error!("Worker thread {name} panicked");
                panicked.get_or_insert(name);
            }
        }
    }
    let elapsed = start.elapsed();

    if let Some(err) = spawn_error {
        return Err(BenchError::Spawn(err));
    }
    if let Some(name) = panicked {
        return Err(BenchError::WorkerPanicked(name));
    }

    Ok(Report {
        normal,
        elevated,
        counter: lock.with_locked(|counter| *counter),
        elapsed,
    })
}
