//! Narrow capability interfaces over the host system
//!
//! Each pipeline stage talks to the machine through one of these traits
//! instead of shelling out, so the stages can be exercised in tests without
//! root privileges or a real block device.

use crate::config::Config;
use crate::error::BackupError;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Fallback when the device capacity cannot be determined. Large enough to
/// cover common SD cards, so the free-space check stays conservative.
const DEFAULT_CAPACITY: u64 = 32 * 1024 * 1024 * 1024;

/// Caller identity and host naming.
pub trait HostInfo {
    fn is_privileged(&self) -> bool;
    fn hostname(&self) -> Result<String, BackupError>;
}

/// Source device capacity query.
pub trait BlockDeviceInfo {
    /// Size of the device in bytes, or `None` when it cannot be determined.
    fn capacity(&self, device: &Path) -> Option<u64>;
}

/// Mount-point detection for the destination.
pub trait MountChecker {
    /// Whether `path` is a mounted filesystem distinct from root.
    fn is_mount_point(&self, path: &Path) -> std::io::Result<bool>;
}

/// Free-space query for the destination filesystem.
pub trait SpaceQuery {
    fn free_bytes(&self, path: &Path) -> std::io::Result<u64>;
}

/// Raw byte-for-byte device copy.
pub trait BlockCopier {
    /// Stream `source` into `dest`, returning the bytes written. The
    /// destination file must be durable (flushed to storage) on return.
    fn copy(&self, source: &Path, dest: &Path, size_hint: Option<u64>) -> std::io::Result<u64>;
}

/// External image shrink tool.
pub trait ImageShrinker {
    /// Whether the tool can be invoked at all.
    fn available(&self) -> bool;
    /// Shrink `image` in place. Failure must leave the image untouched.
    fn shrink(&self, image: &Path) -> Result<(), BackupError>;
}

/// One provider of each capability, bundled for the pipeline.
pub struct System {
    pub host: Box<dyn HostInfo>,
    pub block: Box<dyn BlockDeviceInfo>,
    pub mounts: Box<dyn MountChecker>,
    pub space: Box<dyn SpaceQuery>,
    pub copier: Box<dyn BlockCopier>,
    pub shrinker: Box<dyn ImageShrinker>,
}

impl System {
    /// Real providers for the local machine.
    pub fn host(config: &Config) -> Self {
        Self {
            host: Box::new(LocalHost),
            block: Box::new(SysBlockDevice),
            mounts: Box::new(DevIdMountChecker),
            space: Box::new(StatvfsQuery),
            copier: Box::new(ChunkedCopier::new(config.chunk_size)),
            shrinker: Box::new(CommandShrinker::new(config.shrink_tool.clone())),
        }
    }
}

/// Real [`HostInfo`] backed by euid and gethostname.
pub struct LocalHost;

impl HostInfo for LocalHost {
    fn is_privileged(&self) -> bool {
        nix::unistd::Uid::effective().is_root()
    }

    fn hostname(&self) -> Result<String, BackupError> {
        let name = nix::unistd::gethostname()
            .map_err(|e| BackupError::ConfigurationError(format!("hostname lookup failed: {e}")))?;
        let name = name.to_string_lossy().trim().to_string();
        if name.is_empty() {
            return Err(BackupError::ConfigurationError(
                "system hostname is empty".into(),
            ));
        }
        Ok(name)
    }
}

/// Real [`BlockDeviceInfo`]: seek to the end of the opened device, falling
/// back to the sector count sysfs exposes.
pub struct SysBlockDevice;

impl BlockDeviceInfo for SysBlockDevice {
    fn capacity(&self, device: &Path) -> Option<u64> {
        if let Ok(mut f) = File::open(device) {
            if let Ok(size) = f.seek(SeekFrom::End(0)) {
                if size > 0 {
                    return Some(size);
                }
            }
        }

        // /sys/class/block/<dev>/size reports 512-byte sectors.
        let name = device.file_name()?.to_str()?;
        let sectors: u64 = std::fs::read_to_string(format!("/sys/class/block/{name}/size"))
            .ok()?
            .trim()
            .parse()
            .ok()?;
        Some(sectors * 512)
    }
}

/// Conservative capacity to assume when the query fails entirely.
pub fn capacity_or_default(block: &dyn BlockDeviceInfo, device: &Path) -> (u64, bool) {
    match block.capacity(device) {
        Some(size) => (size, true),
        None => (DEFAULT_CAPACITY, false),
    }
}

/// Real [`MountChecker`] comparing `st_dev` against the parent directory
/// and the root filesystem.
pub struct DevIdMountChecker;

impl MountChecker for DevIdMountChecker {
    fn is_mount_point(&self, path: &Path) -> std::io::Result<bool> {
        let meta = std::fs::metadata(path)?;
        let parent = std::fs::metadata(path.join(".."))?;
        let root = std::fs::metadata("/")?;
        Ok(meta.dev() != parent.dev() && meta.dev() != root.dev())
    }
}

/// Real [`SpaceQuery`] via statvfs.
pub struct StatvfsQuery;

impl SpaceQuery for StatvfsQuery {
    fn free_bytes(&self, path: &Path) -> std::io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path)?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }
}

/// Real [`BlockCopier`]: fixed-size chunks, fsync at the end, progress bar
/// on a TTY.
pub struct ChunkedCopier {
    chunk_size: usize,
}

impl ChunkedCopier {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl BlockCopier for ChunkedCopier {
    fn copy(&self, source: &Path, dest: &Path, size_hint: Option<u64>) -> std::io::Result<u64> {
        let mut src = File::open(source)?;
        let mut dst = File::create(dest)?;

        // indicatif suppresses itself when stderr is not a terminal.
        let bar = match size_hint {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{bar:40} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar
            }
            None => ProgressBar::hidden(),
        };

        let mut buf = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;

        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])?;
            written += n as u64;
            bar.set_position(written);
        }

        // The copy is only done once it has actually reached storage.
        dst.sync_all()?;
        bar.finish_and_clear();

        debug!(bytes = written, dest = %dest.display(), "device copy complete");
        Ok(written)
    }
}

/// Real [`ImageShrinker`] delegating to an external tool (pishrink-style:
/// verbose flag plus the image path, non-zero exit on failure).
pub struct CommandShrinker {
    tool: PathBuf,
}

impl CommandShrinker {
    pub fn new(tool: PathBuf) -> Self {
        Self { tool }
    }
}

impl ImageShrinker for CommandShrinker {
    fn available(&self) -> bool {
        if self.tool.components().count() > 1 {
            return self.tool.is_file();
        }
        let Some(path_var) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path_var).any(|dir| dir.join(&self.tool).is_file())
    }

    fn shrink(&self, image: &Path) -> Result<(), BackupError> {
        let status = Command::new(&self.tool)
            .arg("-v")
            .arg(image)
            .status()
            .map_err(|e| BackupError::ShrinkFailed(format!("failed to launch {}: {e}", self.tool.display())))?;

        if !status.success() {
            return Err(BackupError::ShrinkFailed(format!(
                "{} exited with {status}",
                self.tool.display()
            )));
        }
        Ok(())
    }
}

/// Mock providers shared by the stage tests.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::cell::Cell;

    pub struct MockHost {
        pub privileged: bool,
        pub hostname: Option<String>,
    }

    impl Default for MockHost {
        fn default() -> Self {
            Self {
                privileged: true,
                hostname: Some("testpi".into()),
            }
        }
    }

    impl HostInfo for MockHost {
        fn is_privileged(&self) -> bool {
            self.privileged
        }

        fn hostname(&self) -> Result<String, BackupError> {
            self.hostname
                .clone()
                .ok_or_else(|| BackupError::ConfigurationError("no hostname".into()))
        }
    }

    pub struct MockBlock {
        pub capacity: Option<u64>,
    }

    impl BlockDeviceInfo for MockBlock {
        fn capacity(&self, _device: &Path) -> Option<u64> {
            self.capacity
        }
    }

    pub struct MockMount {
        pub mounted: bool,
    }

    impl MountChecker for MockMount {
        fn is_mount_point(&self, _path: &Path) -> std::io::Result<bool> {
            Ok(self.mounted)
        }
    }

    pub struct MockSpace {
        pub free: u64,
    }

    impl SpaceQuery for MockSpace {
        fn free_bytes(&self, _path: &Path) -> std::io::Result<u64> {
            Ok(self.free)
        }
    }

    /// Writes `bytes` zeros; optionally fails after writing half of them,
    /// leaving a partial file behind like an interrupted dd would.
    pub struct MockCopier {
        pub bytes: u64,
        pub fail_midway: bool,
    }

    impl BlockCopier for MockCopier {
        fn copy(&self, _source: &Path, dest: &Path, _hint: Option<u64>) -> std::io::Result<u64> {
            if self.fail_midway {
                std::fs::write(dest, vec![0u8; (self.bytes / 2) as usize])?;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "device vanished mid-copy",
                ));
            }
            std::fs::write(dest, vec![0u8; self.bytes as usize])?;
            Ok(self.bytes)
        }
    }

    pub struct MockShrinker {
        pub available: bool,
        pub succeed: bool,
        pub calls: Cell<u32>,
    }

    impl Default for MockShrinker {
        fn default() -> Self {
            Self {
                available: true,
                succeed: true,
                calls: Cell::new(0),
            }
        }
    }

    impl ImageShrinker for MockShrinker {
        fn available(&self) -> bool {
            self.available
        }

        fn shrink(&self, _image: &Path) -> Result<(), BackupError> {
            self.calls.set(self.calls.get() + 1);
            if self.succeed {
                Ok(())
            } else {
                Err(BackupError::ShrinkFailed("exit status 1".into()))
            }
        }
    }
}
