//! Per-device exclusive lock, tied to the opened file descriptor so it vanishes on
//! process death even without an orderly release.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{AppError, Result};

/// A held lock for one device name. Releasing is idempotent and safe to call from any
/// exit path; `Drop` releases automatically if `release()` was never called.
pub struct DeviceLock {
    name: String,
    path: PathBuf,
    file: Option<File>,
}

impl DeviceLock {
    /// Acquire the exclusive lock for `device_name` under `lock_dir`.
    ///
    /// Returns [`AppError::AlreadyLocked`] if another holder (in this process or
    /// another) currently owns it. This is a distinct, non-retryable-at-this-layer
    /// error, not a generic I/O failure.
    pub fn acquire(lock_dir: &Path, device_name: &str) -> Result<Self> {
        std::fs::create_dir_all(lock_dir).map_err(|e| AppError::LockDirCreationFailed {
            path: lock_dir.display().to_string(),
            source: e,
        })?;

        let path = lock_dir.join(format!("{device_name}.lock"));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        file.try_lock_exclusive()
            .map_err(|_| AppError::AlreadyLocked(device_name.to_string()))?;

        // Stamp the lockfile with our PID for operator diagnosis; truncate now that we
        // hold the lock so a stale PID from a previous holder is never visible.
        let mut file = file;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        Ok(Self {
            name: device_name.to_string(),
            path,
            file: Some(file),
        })
    }

    /// Release the lock. Idempotent; safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = fs2::FileExt::unlock(&file) {
                tracing::warn!(
                    device = %self.name,
                    "failed to unlock {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.name
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let mut lock = DeviceLock::acquire(dir.path(), "blue_yeti").unwrap();
        lock.release();
        let _lock2 = DeviceLock::acquire(dir.path(), "blue_yeti").unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut lock = DeviceLock::acquire(dir.path(), "mic").unwrap();
        lock.release();
        lock.release();
    }

    #[test]
    fn second_acquire_for_same_name_is_already_locked() {
        let dir = tempdir().unwrap();
        let _lock = DeviceLock::acquire(dir.path(), "mic").unwrap();
        let second = DeviceLock::acquire(dir.path(), "mic");
        assert!(matches!(second, Err(AppError::AlreadyLocked(name)) if name == "mic"));
    }

    #[test]
    fn drop_without_explicit_release_frees_the_lock() {
        let dir = tempdir().unwrap();
        {
            let _lock = DeviceLock::acquire(dir.path(), "cam").unwrap();
        }
        let _lock2 = DeviceLock::acquire(dir.path(), "cam").unwrap();
    }

    #[test]
    fn different_device_names_do_not_contend() {
        let dir = tempdir().unwrap();
        let _a = DeviceLock::acquire(dir.path(), "a").unwrap();
        let _b = DeviceLock::acquire(dir.path(), "b").unwrap();
    }
}
