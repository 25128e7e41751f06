use super::EdgeIdError;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// How long and how eagerly to wait for the ID sync file lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_wait: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(100),
        }
    }
}

/// Exclusive advisory lock on the ID sync file, released on drop.
///
/// The lock is tied to the open file handle, so reads and appends done while
/// holding it go through [`SyncFileLock::file`].
#[derive(Debug)]
pub struct SyncFileLock {
    file: File,
    path: PathBuf,
}

impl SyncFileLock {
    /// Retries a non-blocking lock attempt with randomised exponential backoff
    /// until it succeeds or `policy.max_wait` has elapsed.
    pub fn acquire(
        path: &Path,
        policy: &LockPolicy,
        rng: &mut impl Rng,
    ) -> Result<Self, EdgeIdError> {
        let start = Instant::now();
        let mut backoff = policy.initial_backoff.max(Duration::from_millis(1));
        let mut attempts = 0u32;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                if attempts > 0 {
                    log::debug!(
                        "Acquired lock on {:?} after {} retries ({:?})",
                        path,
                        attempts,
                        start.elapsed()
                    );
                }
                return Ok(lock);
            }
            let waited = start.elapsed();
            if waited >= policy.max_wait {
                return Err(EdgeIdError::LockTimeout {
                    path: path.display().to_string(),
                    waited,
                });
            }
            attempts += 1;
            let jitter = rng.random_range(0..=backoff.as_micros() as u64);
            let sleep = Duration::from_micros(jitter).min(policy.max_wait - waited);
            log::debug!("ID sync file {path:?} is locked, retrying in {sleep:?}");
            thread::sleep(sleep);
            backoff = (backoff * 2).min(policy.max_backoff.max(Duration::from_millis(1)));
        }
    }

    /// Opens (creating if needed) and locks `path` without blocking.
    ///
    /// Fails with [`EdgeIdError::LockUnsupported`] where no advisory lock is
    /// available, since the file cannot be shared safely there.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, EdgeIdError> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        match try_lock_exclusive(&file) {
            Ok(true) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Ok(false) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Unsupported => Err(EdgeIdError::LockUnsupported {
                path: path.display().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SyncFileLock {
    fn drop(&mut self) {
        if let Err(e) = unlock(&self.file) {
            log::warn!("Failed to unlock ID sync file {:?}: {}", self.path, e);
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` belongs to an open `File` that outlives this call, and
    // `LOCK_EX | LOCK_NB` is a valid `flock` operation.
    let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}

#[cfg(not(unix))]
fn try_lock_exclusive(_: &File) -> io::Result<bool> {
    Err(io::ErrorKind::Unsupported.into())
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn unlock(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` belongs to an open `File`; `LOCK_UN` only releases a lock.
    let rc = unsafe { libc::flock(fd, libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

// Never locked, see `try_lock_exclusive`.
#[cfg(not(unix))]
fn unlock(_: &File) -> io::Result<()> {
    Ok(())
}
