//! Backup artifact naming and enumeration

use chrono::{DateTime, Local, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Timestamp component of an artifact filename.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Suffix for in-progress copies. Never counted as an artifact.
pub const PARTIAL_SUFFIX: &str = ".part";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// One backup image on the destination filesystem.
///
/// Identity is `{hostname}.{YYYYMMDD_HHMMSS}.img`, unique per host per
/// second. The shrink tool may append its own suffix after `.img`; such
/// files still count as artifacts for retention purposes.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Timestamp parsed back out of the filename, when well-formed.
    pub timestamp: Option<NaiveDateTime>,
}

impl Artifact {
    /// Age in whole days, measured by filesystem modification time.
    pub fn age_days(&self, now: SystemTime) -> u64 {
        match now.duration_since(self.modified) {
            Ok(elapsed) => elapsed.as_secs() / SECS_PER_DAY,
            Err(_) => 0, // mtime in the future counts as brand new
        }
    }

    /// File name as UTF-8, lossy.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Compute the artifact filename for a new backup.
pub fn artifact_name(hostname: &str, now: DateTime<Local>) -> String {
    format!("{}.{}.img", hostname, now.format(TIMESTAMP_FORMAT))
}

/// Whether `name` identifies a (possibly shrunk) artifact for `hostname`.
///
/// Matches `{hostname}.{timestamp}.img` plus any suffix the shrink tool may
/// have appended, and rejects in-progress `.part` files.
pub fn matches_host(name: &str, hostname: &str) -> bool {
    if name.ends_with(PARTIAL_SUFFIX) {
        return false;
    }
    let Some(rest) = name.strip_prefix(hostname) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix('.') else {
        return false;
    };
    rest.contains(".img")
}

/// Parse the timestamp component out of an artifact filename.
pub fn parse_timestamp(name: &str, hostname: &str) -> Option<NaiveDateTime> {
    let rest = name.strip_prefix(hostname)?.strip_prefix('.')?;
    let stamp = rest.split('.').next()?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// Enumerate this host's artifacts at the top level of `dir`.
///
/// Deliberately non-recursive: the destination may hold unrelated trees
/// (other hosts, manual exports) that a recursive walk could wander into.
pub fn scan(dir: &Path, hostname: &str) -> std::io::Result<Vec<Artifact>> {
    let mut found = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !matches_host(&name, hostname) {
            continue;
        }

        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }

        found.push(Artifact {
            path: entry.path(),
            size: meta.len(),
            modified: meta.modified()?,
            timestamp: parse_timestamp(&name, hostname),
        });
    }

    // Oldest first, so pruning logs read chronologically.
    found.sort_by_key(|a| a.modified);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn name_round_trips_through_parse() {
        let now = Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let name = artifact_name("pi4", now);
        assert_eq!(name, "pi4.20260314_092653.img");
        assert!(matches_host(&name, "pi4"));
        let ts = parse_timestamp(&name, "pi4").unwrap();
        assert_eq!(ts, now.naive_local());
    }

    #[test]
    fn host_matching_rejects_other_hosts_and_partials() {
        assert!(matches_host("pi4.20260314_092653.img", "pi4"));
        assert!(matches_host("pi4.20260314_092653.img.gz", "pi4"));
        assert!(!matches_host("pi4.20260314_092653.img.part", "pi4"));
        assert!(!matches_host("pi3.20260314_092653.img", "pi4"));
        assert!(!matches_host("pi4.notes.txt", "pi4"));
        // Prefix of another hostname must not match.
        assert!(!matches_host("pi40.20260314_092653.img", "pi4"));
    }

    #[test]
    fn scan_is_top_level_only() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("pi4.20260101_000000.img"), b"a").unwrap();
        std::fs::write(tmp.path().join("pi4.20260102_000000.img.part"), b"b").unwrap();
        std::fs::write(tmp.path().join("other.20260101_000000.img"), b"c").unwrap();

        let sub = tmp.path().join("archive");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("pi4.20250101_000000.img"), b"d").unwrap();

        let found = scan(tmp.path(), "pi4").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name(), "pi4.20260101_000000.img");
    }

    #[test]
    fn age_is_whole_days_from_mtime() {
        let now = SystemTime::now();
        let art = Artifact {
            path: PathBuf::from("pi4.x.img"),
            size: 0,
            modified: now - Duration::from_secs(3 * SECS_PER_DAY + 7200),
            timestamp: None,
        };
        assert_eq!(art.age_days(now), 3);

        let fresh = Artifact {
            path: PathBuf::from("pi4.y.img"),
            size: 0,
            modified: now + Duration::from_secs(60),
            timestamp: None,
        };
        assert_eq!(fresh.age_days(now), 0);
    }
}
