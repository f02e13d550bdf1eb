//! Retention pruning under a safety floor
//!
//! Deletes this host's artifacts strictly older than the retention window,
//! but never lets the surviving count drop below the safety floor. The
//! floor check is all-or-nothing: if deleting every candidate would leave
//! too few artifacts, the whole pass is skipped. Individual deletions are
//! best-effort once the pass is approved.

use crate::artifact;
use crate::config::Config;
use crate::error::BackupError;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{info, warn};

/// Result of one pruning pass.
#[derive(Debug, Default)]
pub struct PruneOutcome {
    pub deleted: Vec<PathBuf>,
    /// Per-file failures; non-fatal.
    pub failures: Vec<BackupError>,
    /// True when the safety floor vetoed the whole pass.
    pub aborted: bool,
}

/// Prune deletion-eligible artifacts after a verified backup.
///
/// `existing_before` is the artifact count preflight observed, i.e. not
/// counting the artifact this run just produced.
pub fn prune(
    config: &Config,
    hostname: &str,
    existing_before: usize,
    now: SystemTime,
) -> std::io::Result<PruneOutcome> {
    let all = artifact::scan(&config.destination, hostname)?;

    let candidates: Vec<_> = all
        .iter()
        .filter(|a| a.age_days(now) > config.retention_days)
        .collect();

    if candidates.is_empty() {
        info!(
            retention_days = config.retention_days,
            "no artifacts beyond the retention window"
        );
        return Ok(PruneOutcome::default());
    }

    // The new, verified artifact counts toward survival.
    let post_count = (existing_before + 1).saturating_sub(candidates.len());
    if post_count < config.safety_floor {
        warn!(
            candidates = candidates.len(),
            existing = existing_before,
            floor = config.safety_floor,
            "pruning would drop below the safety floor, skipping the entire pass"
        );
        return Ok(PruneOutcome {
            aborted: true,
            ..PruneOutcome::default()
        });
    }

    let mut outcome = PruneOutcome::default();
    for candidate in candidates {
        match std::fs::remove_file(&candidate.path) {
            Ok(()) => {
                info!(
                    artifact = %candidate.file_name(),
                    age_days = candidate.age_days(now),
                    "pruned expired artifact"
                );
                outcome.deleted.push(candidate.path.clone());
            }
            Err(source) => {
                let err = BackupError::DeletionFailed {
                    path: candidate.path.clone(),
                    source,
                };
                warn!("{err}");
                outcome.failures.push(err);
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn test_config(tmp: &TempDir) -> Config {
        Config {
            destination: tmp.path().to_path_buf(),
            retention_days: 3,
            ..Config::default()
        }
    }

    /// Create an artifact whose mtime lies `days` days in the past.
    fn aged_artifact(tmp: &TempDir, name: &str, days: u64, now: SystemTime) {
        let path = tmp.path().join(name);
        std::fs::write(&path, b"image").unwrap();
        let f = std::fs::File::options().write(true).open(&path).unwrap();
        f.set_modified(now - DAY * days as u32).unwrap();
    }

    #[test]
    fn deletes_only_artifacts_beyond_the_window() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        aged_artifact(&tmp, "testpi.20260101_000001.img", 1, now);
        aged_artifact(&tmp, "testpi.20260101_000002.img", 2, now);
        aged_artifact(&tmp, "testpi.20260101_000003.img", 10, now);
        // The backup this run just produced.
        aged_artifact(&tmp, "testpi.20260104_000000.img", 0, now);

        let outcome = prune(&test_config(&tmp), "testpi", 3, now).unwrap();
        assert!(!outcome.aborted);
        assert_eq!(outcome.deleted.len(), 1);
        assert!(outcome.deleted[0].ends_with("testpi.20260101_000003.img"));
        assert_eq!(artifact::scan(tmp.path(), "testpi").unwrap().len(), 3);
    }

    #[test]
    fn lone_expired_artifact_may_be_deleted_after_a_new_backup() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        aged_artifact(&tmp, "testpi.20260101_000000.img", 10, now);
        aged_artifact(&tmp, "testpi.20260111_000000.img", 0, now);

        // post_count = 1 + 1 - 1 = 1, exactly at the floor: allowed.
        let outcome = prune(&test_config(&tmp), "testpi", 1, now).unwrap();
        assert!(!outcome.aborted);
        assert_eq!(outcome.deleted.len(), 1);
        assert_eq!(artifact::scan(tmp.path(), "testpi").unwrap().len(), 1);
    }

    #[test]
    fn pass_aborts_entirely_below_the_floor() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        aged_artifact(&tmp, "testpi.20260101_000000.img", 10, now);
        aged_artifact(&tmp, "testpi.20260111_000000.img", 0, now);

        let mut cfg = test_config(&tmp);
        cfg.safety_floor = 2;

        // post_count would be 1 < floor 2: nothing at all is deleted.
        let outcome = prune(&cfg, "testpi", 1, now).unwrap();
        assert!(outcome.aborted);
        assert!(outcome.deleted.is_empty());
        assert_eq!(artifact::scan(tmp.path(), "testpi").unwrap().len(), 2);
    }

    #[test]
    fn nothing_expired_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        aged_artifact(&tmp, "testpi.20260101_000001.img", 1, now);
        aged_artifact(&tmp, "testpi.20260101_000002.img", 2, now);

        let outcome = prune(&test_config(&tmp), "testpi", 2, now).unwrap();
        assert!(!outcome.aborted);
        assert!(outcome.deleted.is_empty());
        assert_eq!(artifact::scan(tmp.path(), "testpi").unwrap().len(), 2);
    }

    #[test]
    fn exactly_retention_days_old_is_kept() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        // Strictly-greater semantics: a 3-day-old artifact survives
        // retention_days = 3.
        aged_artifact(&tmp, "testpi.20260101_000000.img", 3, now);
        aged_artifact(&tmp, "testpi.20260104_000000.img", 0, now);

        let outcome = prune(&test_config(&tmp), "testpi", 1, now).unwrap();
        assert!(outcome.deleted.is_empty());
    }

    #[test]
    fn other_hosts_artifacts_are_untouched() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        aged_artifact(&tmp, "otherpi.20260101_000000.img", 30, now);
        aged_artifact(&tmp, "testpi.20260101_000000.img", 10, now);
        aged_artifact(&tmp, "testpi.20260111_000000.img", 0, now);

        let outcome = prune(&test_config(&tmp), "testpi", 1, now).unwrap();
        assert_eq!(outcome.deleted.len(), 1);
        assert!(tmp.path().join("otherpi.20260101_000000.img").exists());
    }
}
