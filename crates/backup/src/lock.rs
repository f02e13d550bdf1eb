//! Exclusive-run lock on the destination
//!
//! Two overlapping runs for the same host would corrupt the safety-floor
//! arithmetic and can collide on second-resolution artifact names, so one
//! run holds a non-blocking flock on a lock file inside the destination for
//! its whole duration. Stale locks from dead processes are detected and
//! broken.

use crate::error::BackupError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_NAME: &str = ".sdsnap.lock";

/// Held for the duration of a run; released (and the file removed) on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

/// Lock file content.
#[derive(Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    started_at: u64,
}

impl RunLock {
    /// Acquire the exclusive run lock at the destination.
    ///
    /// Fails with [`BackupError::AlreadyRunning`] when another live process
    /// holds it.
    pub fn acquire(destination: &Path) -> Result<Self, BackupError> {
        let lock_path = destination.join(LOCK_NAME);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        if !try_flock_exclusive(&file)? {
            // Held by someone. Stale locks from crashed runs get broken;
            // live ones fail the run before any mutation.
            match Self::holder(&mut file) {
                Some(pid) if is_process_alive(pid) => {
                    return Err(BackupError::AlreadyRunning(pid));
                }
                holder => {
                    warn!(pid = ?holder, "breaking stale run lock");
                    drop(file);
                    std::fs::remove_file(&lock_path)?;
                    return Self::acquire(destination);
                }
            }
        }

        Self::write_content(&mut file)?;
        Ok(Self {
            path: lock_path,
            file,
        })
    }

    /// Pid recorded in a held lock file, when readable.
    fn holder(file: &mut File) -> Option<u32> {
        file.seek(SeekFrom::Start(0)).ok()?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).ok()?;
        let content: LockContent = serde_json::from_str(&contents).ok()?;
        Some(content.pid)
    }

    fn write_content(file: &mut File) -> std::io::Result<()> {
        let content = LockContent {
            pid: std::process::id(),
            started_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let serialized = serde_json::to_string(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Try to take an exclusive flock without blocking.
fn try_flock_exclusive(file: &File) -> std::io::Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(std::io::Error::from(e)),
    }
}

#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_process_alive(_pid: u32) -> bool {
    // Conservative on platforms without /proc: never break the lock.
    true
}
