//! Cross-process file lock for serializing storage mutations.
//!
//! On Unix a file-based `flock` is used so that two processes (say, the web
//! frontend and an operator running a maintenance script) cannot interleave
//! read-modify-write cycles on the same credential file. On other platforms
//! the lock degrades to a per-process no-op; the in-process mutexes in the
//! engine still serialize same-process writers.

use std::path::Path;

use crate::error::{StoreError, StoreResult};

#[cfg(unix)]
mod imp {
    use super::{Path, StoreError, StoreResult};
    use std::fs::{self, File, OpenOptions};
    use std::sync::Arc;

    /// A file-backed lock that serializes mutations across processes.
    #[derive(Debug, Clone)]
    pub struct FileLock {
        file: Arc<File>,
    }

    /// Guard holding an exclusive lock for its lifetime.
    #[derive(Debug)]
    pub struct FileLockGuard {
        file: Arc<File>,
    }

    impl FileLock {
        /// Opens or creates the lock file at `path`.
        ///
        /// # Errors
        ///
        /// Returns an error if the file cannot be opened or created.
        pub fn open(path: &Path) -> StoreResult<Self> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| map_io_err(&err))?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map_err(|err| map_io_err(&err))?;
            Ok(Self {
                file: Arc::new(file),
            })
        }

        /// Acquires the exclusive lock, blocking until it is available.
        ///
        /// # Errors
        ///
        /// Returns an error if the lock cannot be acquired.
        pub fn lock(&self) -> StoreResult<FileLockGuard> {
            lock_exclusive(&self.file).map_err(|err| map_io_err(&err))?;
            Ok(FileLockGuard {
                file: Arc::clone(&self.file),
            })
        }

        /// Attempts to acquire the exclusive lock without blocking.
        ///
        /// Returns `Ok(None)` if another holder has the lock.
        ///
        /// # Errors
        ///
        /// Returns an error if the attempt fails for reasons other than the
        /// lock being held elsewhere.
        pub fn try_lock(&self) -> StoreResult<Option<FileLockGuard>> {
            if try_lock_exclusive(&self.file).map_err(|err| map_io_err(&err))? {
                Ok(Some(FileLockGuard {
                    file: Arc::clone(&self.file),
                }))
            } else {
                Ok(None)
            }
        }
    }

    impl Drop for FileLockGuard {
        fn drop(&mut self) {
            let _ = unlock(&self.file);
        }
    }

    fn map_io_err(err: &std::io::Error) -> StoreError {
        StoreError::Lock(err.to_string())
    }

    fn lock_exclusive(file: &File) -> std::io::Result<()> {
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(file);
        let result = unsafe { flock(fd, LOCK_EX) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(file);
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result == 0 {
            Ok(true)
        } else {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                Ok(false)
            } else {
                Err(err)
            }
        }
    }

    fn unlock(file: &File) -> std::io::Result<()> {
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(file);
        let result = unsafe { flock(fd, LOCK_UN) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    use std::os::raw::c_int;

    const LOCK_EX: c_int = 2;
    const LOCK_NB: c_int = 4;
    const LOCK_UN: c_int = 8;

    extern "C" {
        fn flock(fd: c_int, operation: c_int) -> c_int;
    }
}

#[cfg(not(unix))]
mod imp {
    use super::{Path, StoreResult};

    /// No-op lock for non-Unix platforms.
    #[derive(Debug, Clone)]
    pub struct FileLock;

    /// No-op lock guard.
    #[derive(Debug)]
    pub struct FileLockGuard;

    impl FileLock {
        /// Opens the lock (no-op).
        ///
        /// # Errors
        ///
        /// Never fails on this platform.
        pub fn open(_path: &Path) -> StoreResult<Self> {
            Ok(Self)
        }

        /// Acquires the lock (no-op).
        ///
        /// # Errors
        ///
        /// Never fails on this platform.
        pub fn lock(&self) -> StoreResult<FileLockGuard> {
            Ok(FileLockGuard)
        }

        /// Attempts to acquire the lock (always succeeds).
        ///
        /// # Errors
        ///
        /// Never fails on this platform.
        pub fn try_lock(&self) -> StoreResult<Option<FileLockGuard>> {
            Ok(Some(FileLockGuard))
        }
    }
}

pub use imp::{FileLock, FileLockGuard};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.lock");

        let lock_a = FileLock::open(&path).expect("open lock");
        let guard = lock_a.lock().expect("acquire lock");

        let lock_b = FileLock::open(&path).expect("open lock");
        let blocked = lock_b.try_lock().expect("try lock");
        assert!(blocked.is_none());

        drop(guard);
        let guard = lock_b.try_lock().expect("try lock");
        assert!(guard.is_some());
    }

    #[test]
    fn test_lock_serializes_across_threads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.lock");
        let lock = FileLock::open(&path).expect("open lock");

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();

        let thread = std::thread::spawn(move || {
            let guard = lock.lock().expect("lock in thread");
            locked_tx.send(()).expect("signal locked");
            release_rx.recv().expect("wait release");
            drop(guard);
        });

        locked_rx.recv().expect("wait locked");
        let lock_b = FileLock::open(&path).expect("open lock");
        assert!(lock_b.try_lock().expect("try lock").is_none());

        release_tx.send(()).expect("release");
        thread.join().expect("join");

        assert!(lock_b.try_lock().expect("try lock").is_some());
    }
}
