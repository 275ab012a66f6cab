//! Cross-process lock guarding compare-and-swap on the filesystem store.
//!
//! On Unix an advisory `flock` on a lock file inside the storage root
//! serializes writers across processes. Other targets fall back to a no-op
//! lock; in-process writers are still serialized by the store itself.

use std::path::Path;

use super::error::StorageResult;

#[cfg(not(unix))]
mod imp {
    use super::{Path, StorageResult};

    /// No-op storage lock.
    #[derive(Debug, Clone)]
    pub struct StorageLock;

    /// No-op lock guard.
    #[derive(Debug)]
    pub struct StorageLockGuard;

    impl StorageLock {
        /// Opens the lock. Nothing is created on disk.
        ///
        /// # Errors
        ///
        /// Never fails on this target.
        pub const fn open(_path: &Path) -> StorageResult<Self> {
            Ok(Self)
        }

        /// Returns a guard immediately.
        ///
        /// # Errors
        ///
        /// Never fails on this target.
        pub const fn lock(&self) -> StorageResult<StorageLockGuard> {
            Ok(StorageLockGuard)
        }

        /// Always acquires.
        ///
        /// # Errors
        ///
        /// Never fails on this target.
        pub const fn try_lock(&self) -> StorageResult<Option<StorageLockGuard>> {
            Ok(Some(StorageLockGuard))
        }
    }
}

#[cfg(unix)]
mod imp {
    use std::fs::{self, File, OpenOptions};
    use std::os::raw::c_int;
    use std::os::unix::io::AsRawFd;
    use std::sync::Arc;

    use super::{Path, StorageResult};
    use crate::storage::error::map_io_err;

    const LOCK_EX: c_int = 2;
    const LOCK_NB: c_int = 4;
    const LOCK_UN: c_int = 8;

    extern "C" {
        fn flock(fd: c_int, operation: c_int) -> c_int;
    }

    /// A file-backed lock that serializes blob mutations across processes.
    #[derive(Debug, Clone)]
    pub struct StorageLock {
        file: Arc<File>,
    }

    /// Guard that holds the exclusive lock for its lifetime.
    #[derive(Debug)]
    pub struct StorageLockGuard {
        file: Arc<File>,
    }

    impl StorageLock {
        /// Opens or creates the lock file at `path`.
        ///
        /// # Errors
        ///
        /// Returns an error if the file cannot be opened or created.
        pub fn open(path: &Path) -> StorageResult<Self> {
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

        /// Blocks until the exclusive lock is acquired.
        ///
        /// # Errors
        ///
        /// Returns an error if the lock cannot be acquired.
        pub fn lock(&self) -> StorageResult<StorageLockGuard> {
            flock_checked(&self.file, LOCK_EX).map_err(|err| map_io_err(&err))?;
            Ok(StorageLockGuard {
                file: Arc::clone(&self.file),
            })
        }

        /// Attempts to acquire the exclusive lock without blocking.
        ///
        /// # Errors
        ///
        /// Returns an error if the attempt fails for reasons other than the
        /// lock being held elsewhere.
        pub fn try_lock(&self) -> StorageResult<Option<StorageLockGuard>> {
            match flock_checked(&self.file, LOCK_EX | LOCK_NB) {
                Ok(()) => Ok(Some(StorageLockGuard {
                    file: Arc::clone(&self.file),
                })),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                Err(err) => Err(map_io_err(&err)),
            }
        }
    }

    impl Drop for StorageLockGuard {
        fn drop(&mut self) {
            let _ = flock_checked(&self.file, LOCK_UN);
        }
    }

    fn flock_checked(file: &File, operation: c_int) -> std::io::Result<()> {
        // SAFETY: the descriptor is owned by `file`, which outlives the call.
        let result = unsafe { flock(file.as_raw_fd(), operation) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

pub use imp::{StorageLock, StorageLockGuard};
