//! Inter-process File Lock: a cross-platform advisory lock
//! around a sentinel file, used to coordinate model downloads across
//! concurrent processes on the same host.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

const LOCK_FILE_NAME: &str = ".download.lock";

/// Outcome of a non-blocking lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockOutcome {
    Acquired,
    NotAcquired,
}

/// Advisory lock over `<dir>/.download.lock`.
///
/// Tracks its own held/not-held state so `unlock` is idempotent and
/// `try_lock` on an already-locked instance is a no-op rather than a
/// re-entrant lock attempt.
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
    held: bool,
}

impl FileLock {
    /// Create a lock handle for the sentinel file inside `dir`. Does not
    /// acquire the lock; call [`lock`](Self::lock) or
    /// [`try_lock`](Self::try_lock).
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = dir.as_ref().join(LOCK_FILE_NAME);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            file: None,
            held: false,
        })
    }

    fn open(&self) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.path)
    }

    /// Block until the lock is held.
    pub fn lock(&mut self) -> std::io::Result<()> {
        if self.held {
            return Ok(());
        }
        let file = self.open()?;
        file.lock_exclusive()?;
        self.file = Some(file);
        self.held = true;
        Ok(())
    }

    /// Attempt to acquire the lock without blocking.
    pub fn try_lock(&mut self) -> std::io::Result<TryLockOutcome> {
        if self.held {
            return Ok(TryLockOutcome::NotAcquired);
        }
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                self.file = Some(file);
                self.held = true;
                Ok(TryLockOutcome::Acquired)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(TryLockOutcome::NotAcquired),
            Err(e) => Err(e),
        }
    }

    /// Release the lock. A no-op if the lock was never held.
    pub fn unlock(&mut self) -> std::io::Result<()> {
        if !self.held {
            return Ok(());
        }
        if let Some(file) = self.file.take() {
            file.unlock()?;
        }
        self.held = false;
        Ok(())
    }

    /// Whether this handle currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.unlock();
    }
}
