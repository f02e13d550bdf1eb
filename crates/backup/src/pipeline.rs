//! Top-level pipeline driver
//!
//! Composes the stages in their fixed order and halts on the first fatal
//! error. Only the shrink step may fail without aborting the run.

use crate::config::Config;
use crate::error::BackupError;
use crate::lock::RunLock;
use crate::system::System;
use crate::{integrity, preflight, retention, shrink, snapshot};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// What a completed run reports.
#[derive(Debug)]
pub struct RunSummary {
    pub hostname: String,
    pub artifact: PathBuf,
    pub artifact_size: u64,
    pub bytes_copied: u64,
    pub copy_elapsed: Duration,
    pub pruned: Vec<PathBuf>,
    pub prune_failures: usize,
    /// The safety floor vetoed the pruning pass.
    pub prune_aborted: bool,
    pub shrink_attempted: bool,
    pub shrunk: bool,
}

/// Execute one full backup run.
pub fn run(config: &Config, sys: &System) -> Result<RunSummary, BackupError> {
    let report = preflight::validate(config, sys)?;
    info!(
        host = %report.hostname,
        destination = %config.destination.display(),
        "preflight passed"
    );

    // Nothing destructive has happened yet; from here on the run must be
    // the only one touching this destination.
    let _lock = RunLock::acquire(&config.destination)?;

    let outcome = snapshot::produce(config, &report, sys)?;
    let artifact_size = integrity::verify(config, &outcome.path)?;

    let prune_outcome =
        match retention::prune(config, &report.hostname, report.existing.len(), SystemTime::now()) {
            Ok(outcome) => outcome,
            Err(e) => {
                // The backup itself is verified; a failed enumeration only
                // means nothing gets pruned this run.
                warn!(error = %e, "retention scan failed, skipping pruning");
                retention::PruneOutcome::default()
            }
        };

    let mut shrunk = false;
    if report.shrink_enabled {
        match shrink::reduce(sys, &outcome.path) {
            Ok(()) => shrunk = true,
            Err(e) => warn!("{e}"),
        }
    }

    Ok(RunSummary {
        hostname: report.hostname,
        artifact: outcome.path,
        artifact_size,
        bytes_copied: outcome.bytes_copied,
        copy_elapsed: outcome.elapsed,
        pruned: prune_outcome.deleted,
        prune_failures: prune_outcome.failures.len(),
        prune_aborted: prune_outcome.aborted,
        shrink_attempted: report.shrink_enabled,
        shrunk,
    })
}
