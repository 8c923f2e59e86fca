//! Single-instance lock
//!
//! The lock file holds the owner's PID under an exclusive advisory lock. The
//! OS releases the lock when its owner dies, so a lock that can be taken is
//! stale whatever PID it still records.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use gateway_utils::{ensure_dir, GatewayError, Result};

/// Held instance lock; releasing it clears the recorded PID
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    file: File,
}

impl InstanceLock {
    /// Take the lock at `path` for the current process
    ///
    /// Fails with [`GatewayError::AnotherInstance`] when a live process
    /// already holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent).map_err(|e| GatewayError::LockFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        match Self::try_acquire(path)? {
            Some(lock) => Ok(lock),
            None => {
                // A held lock has a live owner, stamped or not
                let pid = read_pid(path).unwrap_or(0);
                debug!(path = %path.display(), pid, "Relay lock is held");
                Err(GatewayError::AnotherInstance { pid })
            }
        }
    }

    /// Lock and stamp the file, or `None` if someone else holds the lock
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let lock_failed = |source| GatewayError::LockFailed {
            path: path.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(lock_failed)?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Ok(None);
            }
            return Err(lock_failed(e));
        }

        let mut previous = String::new();
        let _ = file.read_to_string(&mut previous);
        if let Ok(pid) = previous.trim().parse::<u32>() {
            if pid != std::process::id() {
                warn!(
                    path = %path.display(),
                    pid,
                    alive = is_process_alive(pid),
                    "Reclaiming stale relay lock"
                );
            }
        }

        file.set_len(0).map_err(lock_failed)?;
        file.seek(SeekFrom::Start(0)).map_err(lock_failed)?;
        write!(file, "{}", std::process::id()).map_err(lock_failed)?;
        file.flush().map_err(lock_failed)?;

        info!(path = %path.display(), pid = std::process::id(), "Acquired relay lock");
        Ok(Some(Self {
            path: path.to_path_buf(),
            file,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Keep the file: a waiter may already have it open
        if let Err(e) = self.file.set_len(0) {
            debug!(path = %self.path.display(), error = %e, "Failed to clear lock file");
        }
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether a process with this PID exists
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
