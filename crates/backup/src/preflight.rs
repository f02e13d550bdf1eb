//! Preflight validation
//!
//! Everything that must hold before any destructive or long-running action
//! begins. Checks run in a fixed order and short-circuit on the first
//! failure; the only mutation is a transient probe file the validator
//! removes itself.

use crate::artifact::{self, Artifact};
use crate::config::Config;
use crate::error::BackupError;
use crate::system::{capacity_or_default, System};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Everything later stages need from preflight.
#[derive(Debug)]
pub struct PreflightReport {
    pub hostname: String,
    /// This host's artifacts already present at the destination. The count
    /// feeds the retention safety-floor arithmetic.
    pub existing: Vec<Artifact>,
    /// Source device size in bytes (a conservative default when the query
    /// failed).
    pub source_capacity: u64,
    pub capacity_known: bool,
    pub free_bytes: u64,
    /// Shrink as requested, possibly downgraded when the tool is absent.
    pub shrink_enabled: bool,
}

/// Validate the environment for a backup run.
pub fn validate(config: &Config, sys: &System) -> Result<PreflightReport, BackupError> {
    // 1. The raw device read needs root.
    if !sys.host.is_privileged() {
        return Err(BackupError::PermissionDenied);
    }

    // 2. Host identity names the artifact.
    let hostname = match &config.hostname_override {
        Some(name) => name.clone(),
        None => sys.host.hostname()?,
    };

    // 3. Destination directory present.
    if !config.destination.is_dir() {
        return Err(BackupError::DestinationMissing(config.destination.clone()));
    }

    // 4. Destination actually mounted. Without this, an absent NAS mount
    // would silently fill the root filesystem instead.
    if !sys.mounts.is_mount_point(&config.destination)? {
        return Err(BackupError::NotMounted(config.destination.clone()));
    }

    // 5. Destination writable.
    probe_write(&config.destination)?;

    // 6. Destination answering within the bound. A hung NFS/CIFS mount
    // passes the metadata checks above but blocks on listing.
    probe_listing(&config.destination, config.probe_timeout)?;

    // 7. Existing artifacts, for the safety floor and the report.
    let existing = artifact::scan(&config.destination, &hostname)?;
    info!(
        count = existing.len(),
        host = %hostname,
        "existing artifacts at destination"
    );

    // 8. Source capacity; never fatal on its own.
    let (source_capacity, capacity_known) =
        capacity_or_default(&*sys.block, &config.source_device);
    if !capacity_known {
        warn!(
            device = %config.source_device.display(),
            assumed = source_capacity,
            "could not determine device capacity, assuming conservative default"
        );
    }

    // 9. Enough room for one full image; warn when there is no overlap
    // headroom for retention.
    let free_bytes = sys.space.free_bytes(&config.destination)?;
    if free_bytes < source_capacity {
        return Err(BackupError::InsufficientSpace {
            need: source_capacity,
            free: free_bytes,
        });
    }
    if free_bytes < 2 * source_capacity {
        warn!(
            free = free_bytes,
            capacity = source_capacity,
            "less than twice the device size free; retention overlap may run out of space"
        );
    }

    // 10. Required pieces present. The copy is native, so the only hard
    // external requirement is the device node itself; a missing shrink tool
    // downgrades to a warning.
    if !config.source_device.exists() {
        return Err(BackupError::MissingDependency(format!(
            "source device {} not found",
            config.source_device.display()
        )));
    }

    let shrink_enabled = if config.shrink && !sys.shrinker.available() {
        warn!(
            tool = %config.shrink_tool.display(),
            "shrink tool not found, disabling image shrink for this run"
        );
        false
    } else {
        config.shrink
    };

    Ok(PreflightReport {
        hostname,
        existing,
        source_capacity,
        capacity_known,
        free_bytes,
        shrink_enabled,
    })
}

/// Create and remove a uniquely named probe file.
fn probe_write(dest: &Path) -> Result<(), BackupError> {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let probe = dest.join(format!(".sdsnap-probe.{}.{}", std::process::id(), nonce));

    let attempt = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)
        .and_then(|mut f| f.write_all(b"probe"));

    match attempt {
        Ok(()) => {
            std::fs::remove_file(&probe).map_err(|source| BackupError::ReadOnlyOrDenied {
                path: dest.to_path_buf(),
                source,
            })?;
            Ok(())
        }
        Err(source) => Err(BackupError::ReadOnlyOrDenied {
            path: dest.to_path_buf(),
            source,
        }),
    }
}

/// Require a full directory listing within `timeout`.
///
/// The listing runs on a helper thread; if it never returns (stale network
/// mount) the thread is abandoned and the run fails instead of hanging.
fn probe_listing(dest: &Path, timeout: Duration) -> Result<(), BackupError> {
    let (tx, rx) = mpsc::channel();
    let dir = dest.to_path_buf();

    std::thread::spawn(move || {
        let outcome = std::fs::read_dir(&dir).map(|entries| entries.count());
        let _ = tx.send(outcome);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(BackupError::Io(e)),
        Err(_) => Err(BackupError::Unresponsive(dest.to_path_buf(), timeout)),
    }
}
