//! Exclusive advisory lock that serializes writers of one database file.
//!
//! Uses flock(2) on a dedicated lock file. The lock belongs to the open file
//! description, so two handles in the same process contend just like two
//! processes do.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Interval between non-blocking attempts while waiting with a timeout.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for a lock held by another writer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum LockPatience {
    /// Wait until the holder releases the lock.
    #[default]
    Block,
    /// Try once and give up immediately on contention.
    FailFast,
    /// Keep trying for up to `secs` seconds.
    Timeout { secs: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock {} is held by another writer", path.display())]
    Busy { path: PathBuf },

    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    TimedOut { path: PathBuf, waited: Duration },

    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held lock on a lock file. Released by [`FileLock::release`] or on drop.
#[derive(Debug)]
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
}

impl FileLock {
    /// Open (creating if needed) `path` and take an exclusive lock on it.
    pub fn acquire(path: &Path, patience: LockPatience) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = open_lock_file(path).map_err(io_err)?;
        let started = Instant::now();

        match patience {
            LockPatience::Block => lock_blocking(&file).map_err(io_err)?,
            LockPatience::FailFast => {
                if !try_lock(&file).map_err(io_err)? {
                    return Err(LockError::Busy {
                        path: path.to_path_buf(),
                    });
                }
            }
            LockPatience::Timeout { secs } => {
                let limit = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
                loop {
                    if try_lock(&file).map_err(io_err)? {
                        break;
                    }
                    let waited = started.elapsed();
                    if waited >= limit {
                        return Err(LockError::TimedOut {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    tracing::debug!(path = %path.display(), ?waited, "waiting for lock");
                    std::thread::sleep(LOCK_RETRY_INTERVAL.min(limit - waited));
                }
            }
        }

        tracing::debug!(path = %path.display(), waited = ?started.elapsed(), "acquired lock");
        Ok(FileLock {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    /// Unlock and close the lock file. Calling it again is a no-op.
    pub fn release(&mut self) -> Result<(), LockError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        unlock(&file).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "released lock");
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("failed to release lock on drop: {}", e);
        }
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    let mut options = File::options();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

#[cfg(unix)]
fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    loop {
        // SAFETY: flock is safe on a valid, open file descriptor.
        let r = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if r == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

#[cfg(unix)]
fn lock_blocking(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_EX)
}

/// Ok(false) when another description holds the lock.
#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<bool> {
    match flock(file, libc::LOCK_EX | libc::LOCK_NB) {
        Ok(()) => Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_UN)
}

#[cfg(not(unix))]
fn lock_blocking(_file: &File) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "file locking requires a unix platform",
    ))
}

#[cfg(not(unix))]
fn try_lock(file: &File) -> io::Result<bool> {
    lock_blocking(file).map(|_| true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn acquire_creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dbswap.lock");
        let lock = FileLock::acquire(&path, LockPatience::FailFast).unwrap();
        assert!(lock.is_held());
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn second_acquire_fails_fast_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dbswap.lock");
        let _held = FileLock::acquire(&path, LockPatience::FailFast).unwrap();
        match FileLock::acquire(&path, LockPatience::FailFast) {
            Err(LockError::Busy { path: p }) => assert_eq!(p, path),
            other => panic!("expected Busy, got {:?}", other),
        }
    }

    #[test]
    fn timeout_expires_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dbswap.lock");
        let _held = FileLock::acquire(&path, LockPatience::Block).unwrap();
        let err = FileLock::acquire(&path, LockPatience::Timeout { secs: 0.2 }).unwrap_err();
        match err {
            LockError::TimedOut { waited, .. } => assert!(waited >= Duration::from_millis(200)),
            other => panic!("expected TimedOut, got {:?}", other),
        }
    }

    #[test]
    fn release_is_idempotent_and_frees_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dbswap.lock");
        let mut lock = FileLock::acquire(&path, LockPatience::FailFast).unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());
        let again = FileLock::acquire(&path, LockPatience::FailFast).unwrap();
        assert!(again.is_held());
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dbswap.lock");
        {
            let _lock = FileLock::acquire(&path, LockPatience::FailFast).unwrap();
        }
        FileLock::acquire(&path, LockPatience::FailFast).unwrap();
    }

    #[test]
    fn distinct_lock_paths_do_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let _city =
            FileLock::acquire(&dir.path().join("city.lock"), LockPatience::FailFast).unwrap();
        let _asn = FileLock::acquire(&dir.path().join("asn.lock"), LockPatience::FailFast).unwrap();
    }

    #[test]
    fn blocking_acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dbswap.lock");
        let mut held = FileLock::acquire(&path, LockPatience::Block).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            let lock = FileLock::acquire(&waiter_path, LockPatience::Block).unwrap();
            tx.send(()).unwrap();
            drop(lock);
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        held.release().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn patience_toml_forms() {
        #[derive(Deserialize)]
        struct Wrapper {
            lock: LockPatience,
        }
        let w: Wrapper = toml::from_str("[lock]\nmode = \"fail-fast\"\n").unwrap();
        assert_eq!(w.lock, LockPatience::FailFast);
        let w: Wrapper = toml::from_str("[lock]\nmode = \"timeout\"\nsecs = 2.5\n").unwrap();
        assert_eq!(w.lock, LockPatience::Timeout { secs: 2.5 });
    }
}
