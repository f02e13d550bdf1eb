//! Snapshot production
//!
//! Streams the raw device into a timestamped image at the destination.
//! Produces exactly one new artifact, or leaves the destination unchanged
//! and fails loudly. The copy is staged under a `.part` name and renamed
//! into place on success.

use crate::artifact::{self, PARTIAL_SUFFIX};
use crate::config::Config;
use crate::error::BackupError;
use crate::preflight::PreflightReport;
use crate::system::System;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Name of the sentinel that forces a filesystem check on next boot.
pub const MARKER_NAME: &str = "forcefsck";

/// Forced-fsck marker with guaranteed cleanup.
///
/// The copy reads a live, mounted filesystem, so the source is marked for a
/// check on next boot for the duration of the copy. The marker must never
/// outlive the run: a failure before the copy begins would otherwise force
/// an unwanted check on the next reboot. `Drop` removes it on every exit
/// path, including panics.
pub struct FsckMarker {
    path: PathBuf,
}

impl FsckMarker {
    /// Place the marker in the boot area.
    pub fn place(boot_dir: &Path) -> std::io::Result<Self> {
        let path = boot_dir.join(MARKER_NAME);
        std::fs::write(&path, b"")?;
        info!(marker = %path.display(), "placed forced-fsck marker");
        Ok(Self { path })
    }

    /// Remove the marker explicitly once its job is done.
    pub fn remove(self) {
        // Drop does the actual removal.
    }
}

impl Drop for FsckMarker {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(marker = %self.path.display(), "removed forced-fsck marker"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                marker = %self.path.display(),
                error = %e,
                "failed to remove forced-fsck marker"
            ),
        }
    }
}

/// What the producer hands to the rest of the pipeline.
#[derive(Debug)]
pub struct SnapshotOutcome {
    pub path: PathBuf,
    pub bytes_copied: u64,
    pub elapsed: Duration,
}

/// Copy the source device to a new artifact at the destination.
pub fn produce(
    config: &Config,
    report: &PreflightReport,
    sys: &System,
) -> Result<SnapshotOutcome, BackupError> {
    let marker = FsckMarker::place(&config.boot_dir)?;

    let name = artifact::artifact_name(&report.hostname, Local::now());
    let final_path = config.destination.join(&name);
    let part_path = config.destination.join(format!("{name}{PARTIAL_SUFFIX}"));

    info!(
        device = %config.source_device.display(),
        artifact = %final_path.display(),
        "starting device copy"
    );

    let size_hint = report.capacity_known.then_some(report.source_capacity);
    let started = Instant::now();

    let bytes_copied = match sys
        .copier
        .copy(&config.source_device, &part_path, size_hint)
    {
        Ok(bytes) => bytes,
        Err(e) => {
            discard_partial(&part_path);
            return Err(BackupError::CopyFailed(e));
        }
    };

    if let Err(e) = std::fs::rename(&part_path, &final_path) {
        discard_partial(&part_path);
        return Err(BackupError::CopyFailed(e));
    }

    // The marker's job is done once the copy completes; whatever happens
    // afterwards must not leave it behind.
    marker.remove();

    let elapsed = started.elapsed();
    info!(
        bytes = bytes_copied,
        secs = elapsed.as_secs(),
        "device copy finished"
    );

    Ok(SnapshotOutcome {
        path: final_path,
        bytes_copied,
        elapsed,
    })
}

/// Never leave a half-written artifact on disk.
fn discard_partial(part: &Path) {
    match std::fs::remove_file(part) {
        Ok(()) => warn!(partial = %part.display(), "removed partial artifact after failed copy"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            partial = %part.display(),
            error = %e,
            "failed to remove partial artifact"
        ),
    }
}
