/// Advisory file lock serializing audit writers across processes
///
/// Acquisition is non-blocking `flock` retried with exponential backoff and
/// jitter until a deadline. The lock file is never removed; it is a
/// rendezvous point only, so removing it would let two writers lock
/// different inodes.
use crate::config::types::{LockError, LockResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(5);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers (`audit tail`)
    Shared,
    /// Appenders and rotation
    Exclusive,
}

impl LockMode {
    fn operation(self) -> libc::c_int {
        match self {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        }
    }
}

/// Owner details written into the lock file while held exclusively
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub created_at: SystemTime,
    pub version: String,
}

/// RAII guard; the lock is released when dropped
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if self.mode == LockMode::Exclusive {
            // Clear owner info so a stale reader does not blame us
            let _ = self.file.set_len(0);
        }
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            warn!(
                "Failed to release lock {}: {}",
                self.path.display(),
                std::io::Error::last_os_error()
            );
        }
    }
}

/// Acquire `path` in `mode`, retrying until `timeout` has elapsed
pub fn acquire(path: &Path, mode: LockMode, timeout: Duration) -> LockResult<FileLockGuard> {
    let start = Instant::now();
    let mut retry_delay = INITIAL_RETRY_DELAY;
    let mut contended = false;

    loop {
        match try_acquire(path, mode)? {
            Some(guard) => {
                if contended {
                    debug!("Acquired {:?} lock on {} after {:?}", mode, path.display(), start.elapsed());
                }
                return Ok(guard);
            }
            None => {
                contended = true;
                let waited = start.elapsed();
                if waited >= timeout {
                    return Err(LockError::Timeout {
                        path: path.to_path_buf(),
                        waited,
                        current_owner: current_owner(path),
                    });
                }

                // Exponential backoff with jitter, never sleeping past the deadline
                let jitter =
                    Duration::from_millis(fastrand::u64(0..=retry_delay.as_millis() as u64));
                let remaining = timeout.saturating_sub(waited);
                thread::sleep(std::cmp::min(retry_delay + jitter, remaining));
                retry_delay = std::cmp::min(retry_delay * 2, MAX_RETRY_DELAY);
            }
        }
    }
}

/// One non-blocking attempt; `Ok(None)` means another holder has it
fn try_acquire(path: &Path, mode: LockMode) -> LockResult<Option<FileLockGuard>> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    // Open without truncating; never destroy owner info before holding flock
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(io_err)?;

    let rc = unsafe { libc::flock(file.as_raw_fd(), mode.operation() | libc::LOCK_NB) };
    if rc != 0 {
        let errno = std::io::Error::last_os_error();
        return match errno.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(None),
            _ => Err(LockError::SystemError {
                path: path.to_path_buf(),
                message: errno.to_string(),
            }),
        };
    }

    let mut guard = FileLockGuard {
        file,
        path: path.to_path_buf(),
        mode,
    };
    if mode == LockMode::Exclusive {
        write_owner(&mut guard).map_err(io_err)?;
    }
    Ok(Some(guard))
}

fn write_owner(guard: &mut FileLockGuard) -> std::io::Result<()> {
    let info = LockInfo {
        pid: std::process::id(),
        created_at: SystemTime::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let json = serde_json::to_string(&info).map_err(std::io::Error::other)?;

    let file = &mut guard.file;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", json)?;
    let pos = file.stream_position()?;
    file.set_len(pos)?;
    file.sync_data()
}

/// Best-effort owner description for timeout diagnostics
fn current_owner(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let info: LockInfo = serde_json::from_str(content.lines().next()?).ok()?;
    Some(format!("PID {}", info.pid))
}
