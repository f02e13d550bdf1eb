//! Error taxonomy for the backup pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the backup pipeline.
///
/// Everything except [`BackupError::DeletionFailed`] and
/// [`BackupError::ShrinkFailed`] is fatal: the run aborts on the first such
/// error and the process exits non-zero. The two non-fatal variants are
/// surfaced as warnings by the stages that produce them.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The caller lacks root-equivalent privileges.
    #[error("root privileges are required to read the block device")]
    PermissionDenied,

    /// The host identity could not be determined.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The destination path does not exist or is not a directory.
    #[error("destination {0} does not exist or is not a directory")]
    DestinationMissing(PathBuf),

    /// The destination is not a mounted filesystem distinct from root.
    /// Protects against silently backing up onto the root disk when the
    /// expected remote/removable mount is absent.
    #[error("destination {0} is not a mounted filesystem")]
    NotMounted(PathBuf),

    /// The destination rejected a probe write.
    #[error("destination {path} is read-only or denied the probe write: {source}")]
    ReadOnlyOrDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination did not answer a directory listing within the probe
    /// timeout. Usually a stale or hung network mount.
    #[error("destination {0} did not respond within {1:?}")]
    Unresponsive(PathBuf, std::time::Duration),

    /// Not enough free space for a full image.
    #[error("insufficient space: need {need} bytes, {free} free")]
    InsufficientSpace { need: u64, free: u64 },

    /// A required dependency is absent.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// The raw device copy failed. The partial artifact has been removed.
    #[error("device copy failed: {0}")]
    CopyFailed(#[source] std::io::Error),

    /// The artifact vanished between the copy and the integrity check.
    #[error("artifact {0} is missing after copy")]
    ArtifactMissing(PathBuf),

    /// The artifact is implausibly small, signalling a truncated or corrupt
    /// copy. No pruning is performed when this is raised.
    #[error("artifact is {size} bytes, below the {min}-byte minimum")]
    ArtifactTooSmall { size: u64, min: u64 },

    /// A single retention deletion failed. Non-fatal; the pass continues.
    #[error("failed to delete {path}: {source}")]
    DeletionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external shrink tool failed. Non-fatal; the image keeps its
    /// pre-shrink state.
    #[error("shrink tool failed: {0}")]
    ShrinkFailed(String),

    /// Another run already holds the destination lock.
    #[error("another backup run is already active (pid {0})")]
    AlreadyRunning(u32),

    /// Filesystem errors outside the specific cases above.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Whether this error aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BackupError::DeletionFailed { .. } | BackupError::ShrinkFailed(_)
        )
    }
}
