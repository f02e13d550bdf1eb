//! Run configuration

use std::path::PathBuf;
use std::time::Duration;

/// Minimum plausible size for a full SD-card image. Anything smaller is
/// treated as a truncated or corrupt copy.
pub const MIN_ARTIFACT_SIZE: u64 = 500 * 1024 * 1024;

/// Copy granularity for the raw device stream.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Immutable configuration for one backup run.
///
/// Built once at startup from CLI arguments and passed by reference to every
/// pipeline stage.
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination directory; must pre-exist and be a mounted filesystem
    /// distinct from root.
    pub destination: PathBuf,
    /// Artifacts strictly older than this many days become deletion-eligible.
    pub retention_days: u64,
    /// Block device to image.
    pub source_device: PathBuf,
    /// Boot partition mount; receives the forced-fsck marker for the
    /// duration of the copy.
    pub boot_dir: PathBuf,
    /// Whether to run the external shrink tool on the finished image.
    pub shrink: bool,
    /// Shrink tool, resolved on PATH or as a direct path.
    pub shrink_tool: PathBuf,
    /// Integrity floor for the produced image.
    pub min_artifact_size: u64,
    /// Minimum number of artifacts that must survive any pruning pass.
    pub safety_floor: usize,
    /// Chunk size for the device copy.
    pub chunk_size: usize,
    /// Bound on the destination responsiveness probe.
    pub probe_timeout: Duration,
    /// Pause after the post-copy sync before declaring the backup complete.
    pub settle_delay: Duration,
    /// Overrides the system hostname when set.
    pub hostname_override: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: PathBuf::from("/mnt/backup"),
            retention_days: 3,
            source_device: PathBuf::from("/dev/mmcblk0"),
            boot_dir: PathBuf::from("/boot"),
            shrink: false,
            shrink_tool: PathBuf::from("pishrink.sh"),
            min_artifact_size: MIN_ARTIFACT_SIZE,
            safety_floor: 1,
            chunk_size: CHUNK_SIZE,
            probe_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
            hostname_override: None,
        }
    }
}
