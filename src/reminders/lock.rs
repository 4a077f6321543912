//! Per-reminder delivery lock shared across processes.
//!
//! A lock is a file created with `create_new`, which either creates the file
//! or fails because it already exists. Whoever creates it owns the delivery
//! attempt. The file body (pid and timestamp) is for humans only.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use super::store::StoreError;

/// A lock older than this is assumed to belong to a dead process.
pub const STALE_LOCK_MS: i64 = 2 * 60_000;

/// Lock directory for delivery attempts.
#[derive(Debug, Clone)]
pub struct ClaimLock {
    dir: PathBuf,
}

impl ClaimLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn lock_path(&self, reminder_id: &str) -> PathBuf {
        self.dir.join(format!("{reminder_id}.lock"))
    }

    /// Try to take the delivery lock for `reminder_id`.
    ///
    /// Returns `Ok(false)` when another claimant holds a fresh lock.
    pub fn try_acquire(&self, reminder_id: &str, now_ms: i64) -> Result<bool, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let path = self.lock_path(reminder_id);

        if create_exclusive(&path, now_ms).map_err(|e| StoreError::io(&path, e))? {
            return Ok(true);
        }

        let age_ms = match lock_age_ms(&path, now_ms) {
            Some(age) => age,
            // Released between our create attempt and the stat.
            None => return Ok(false),
        };
        if age_ms <= STALE_LOCK_MS {
            debug!("Lock for reminder {} held ({}ms old)", reminder_id, age_ms);
            return Ok(false);
        }

        warn!("Breaking stale lock for reminder {} ({}ms old)", reminder_id, age_ms);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&path, e)),
        }
        create_exclusive(&path, now_ms).map_err(|e| StoreError::io(&path, e))
    }

    /// Drop the lock. A missing lock file is fine.
    pub fn release(&self, reminder_id: &str) {
        let path = self.lock_path(reminder_id);
        if let Err(e) = fs::remove_file(&path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!("Failed to release lock {:?}: {}", path, e);
        }
    }

    /// Acquire a lock that is released when the guard drops.
    pub fn acquire_scoped(&self, reminder_id: &str, now_ms: i64) -> Result<Option<LockGuard<'_>>, StoreError> {
        if self.try_acquire(reminder_id, now_ms)? {
            Ok(Some(LockGuard { lock: self, reminder_id: reminder_id.to_string() }))
        } else {
            Ok(None)
        }
    }
}

/// Releases the delivery lock on drop, whatever happened while it was held.
pub struct LockGuard<'a> {
    lock: &'a ClaimLock,
    reminder_id: String,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(&self.reminder_id);
    }
}

/// `Ok(false)` if the file already exists.
fn create_exclusive(path: &Path, now_ms: i64) -> std::io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    // Content is diagnostic; ownership is already settled by the create.
    if let Err(e) = write!(file, "{}\n{}\n", std::process::id(), now_ms) {
        warn!("Failed to write lock owner to {:?}: {}", path, e);
    }
    Ok(true)
}

fn lock_age_ms(path: &Path, now_ms: i64) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let mtime_ms = modified.duration_since(UNIX_EPOCH).ok()?.as_millis() as i64;
    Some(now_ms - mtime_ms)
}
