//! Integrity gate
//!
//! Decides whether the freshly produced artifact is plausible enough to
//! permit deleting prior artifacts. Prior backups are never pruned on the
//! strength of an unverified new one.

use crate::config::Config;
use crate::error::BackupError;
use std::path::Path;
use tracing::{debug, info};

/// Verify the new artifact and settle it onto storage.
///
/// Returns the artifact size on success. On failure the artifact is left in
/// place for inspection and the caller must not prune anything.
pub fn verify(config: &Config, artifact: &Path) -> Result<u64, BackupError> {
    let meta = match std::fs::metadata(artifact) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackupError::ArtifactMissing(artifact.to_path_buf()));
        }
        Err(e) => return Err(BackupError::Io(e)),
    };

    let size = meta.len();
    if size < config.min_artifact_size {
        return Err(BackupError::ArtifactTooSmall {
            size,
            min: config.min_artifact_size,
        });
    }

    // Push everything to storage before calling the backup complete. The
    // directory fsync makes the rename from the staging name durable.
    nix::unistd::sync();
    if let Ok(f) = std::fs::File::open(artifact) {
        f.sync_all()?;
    }
    if let Ok(dir) = std::fs::File::open(&config.destination) {
        let _ = dir.sync_all();
    }

    if !config.settle_delay.is_zero() {
        debug!(delay = ?config.settle_delay, "settling before declaring backup complete");
        std::thread::sleep(config.settle_delay);
    }

    info!(bytes = size, artifact = %artifact.display(), "backup verified");
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir, min: u64) -> Config {
        Config {
            destination: tmp.path().to_path_buf(),
            min_artifact_size: min,
            settle_delay: Duration::ZERO,
            ..Config::default()
        }
    }

    #[test]
    fn missing_artifact_is_detected() {
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(&tmp, 16);

        let err = verify(&cfg, &tmp.path().join("gone.img")).unwrap_err();
        assert!(matches!(err, BackupError::ArtifactMissing(_)));
    }

    #[test]
    fn undersized_artifact_is_rejected_but_kept() {
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(&tmp, 1024);
        let img = tmp.path().join("testpi.20260101_000000.img");
        std::fs::write(&img, vec![0u8; 100]).unwrap();

        let err = verify(&cfg, &img).unwrap_err();
        match err {
            BackupError::ArtifactTooSmall { size, min } => {
                assert_eq!(size, 100);
                assert_eq!(min, 1024);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The truncated artifact stays behind for inspection.
        assert!(img.exists());
    }

    #[test]
    fn plausible_artifact_passes() {
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(&tmp, 1024);
        let img = tmp.path().join("testpi.20260101_000000.img");
        std::fs::write(&img, vec![0u8; 4096]).unwrap();

        assert_eq!(verify(&cfg, &img).unwrap(), 4096);
    }

    #[test]
    fn exact_minimum_size_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(&tmp, 4096);
        let img = tmp.path().join("testpi.20260101_000000.img");
        std::fs::write(&img, vec![0u8; 4096]).unwrap();

        assert_eq!(verify(&cfg, &img).unwrap(), 4096);
    }
}
