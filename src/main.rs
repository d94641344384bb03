//! Contention harness for the node's priority queue locks.
//!
//! Spawns normal and elevated threads hammering one `PriorityMcsLock`
//! and reports how long each tier waited.
#![warn(clippy::pedantic, clippy::nursery)]

mod bench;
mod logging;
mod settings;

use clap::Parser;
use settings::{Cli, Settings};
use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(err) = logging::init() {
        eprintln!("Unable to install the logger: {err}");
    }

    let settings = match Settings::try_from(Cli::parse()) {
        Ok(settings) => settings,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::from(2);
        }
    };

    log::info!(
        "{} normal and {} elevated threads, {} iterations each, {} admission slots",
        settings.normal_threads,
        settings.elevated_threads,
        settings.iterations,
        settings.lock.admission_slots()
    );

    let report = match bench::run(&settings) {
        Ok(report) => report,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    report.log();

    if report.is_consistent() {
        ExitCode::SUCCESS
    } else {
        log::error!(
            "Lost updates: counter is {} but {} acquisitions were made",
            report.counter,
            settings.acquisitions()
        );
        ExitCode::FAILURE
    }
}
