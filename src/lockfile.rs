//! File-based mutual exclusion with stale-owner recovery.
//!
//! Each store file has a sibling `<name>.lock`. Acquisition is an exclusive
//! create of that file; the owner record inside lets a second process decide
//! whether a leftover lock belongs to a crashed holder and can be reclaimed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Total wait budget before acquisition fails with `LockTimeout`.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
/// Delay between contended retries.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);
/// Age past which an unparseable lock file is considered abandoned.
const LOCK_STALE_AGE: Duration = Duration::from_secs(5);

/// Owner record written into the lock file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockOwner {
    pid: u32,
    created_at: i64,
}

/// Held lock. Deletes the lock file on drop, so error paths in the caller
/// release it too.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Acquire the lock at `path`, waiting up to the timeout.
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        let start = Instant::now();
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(mut file) => {
                    let owner = LockOwner {
                        pid: std::process::id(),
                        created_at: chrono::Utc::now().timestamp_millis(),
                    };
                    file.write_all(serde_json::to_string(&owner)?.as_bytes())?;
                    file.sync_all()?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if reclaim_if_stale(path)? {
                        continue;
                    }
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(StoreError::LockTimeout(path.to_path_buf()));
                    }
                    tracing::debug!(lock = %path.display(), "lock contended, retrying");
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Release explicitly (drop does the same).
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(lock = %self.path.display(), error = %e, "failed to remove lock file");
            }
        }
    }
}

/// Delete the existing lock file if its owner is provably gone.
///
/// Returns true when the lock was removed and the caller should retry
/// immediately. A lock racing with another waiter may already be gone by the
/// time we look; that counts as reclaimed.
fn reclaim_if_stale(path: &Path) -> Result<bool, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };

    if let Ok(owner) = serde_json::from_str::<LockOwner>(&content) {
        if owner.pid != std::process::id() && !pid_alive(owner.pid) {
            tracing::warn!(
                lock = %path.display(),
                pid = owner.pid,
                "reclaiming lock from dead process"
            );
            remove_ignoring_missing(path)?;
            return Ok(true);
        }
        return Ok(false);
    }

    // No parseable owner. Fall back to the file's age.
    let age = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok());
    if age.is_some_and(|a| a > LOCK_STALE_AGE) {
        tracing::warn!(lock = %path.display(), "reclaiming unreadable stale lock");
        remove_ignoring_missing(path)?;
        return Ok(true);
    }
    Ok(false)
}

fn remove_ignoring_missing(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Signal-0 probe: does the process still exist?
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Without a liveness probe we can only rely on the age heuristic, so treat
/// every recorded owner as alive.
#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_path(dir: &TempDir) -> PathBuf {
        dir.path().join("store.json.lock")
    }

    #[test]
    fn test_acquire_and_release_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        let guard = LockGuard::acquire(&path).unwrap();
        assert!(path.exists());
        guard.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_acquire_writes_owner_record() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        let _guard = LockGuard::acquire(&path).unwrap();
        let owner: LockOwner =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(owner.pid, std::process::id());
        assert!(owner.created_at > 0);
    }

    #[test]
    fn test_dead_owner_is_reclaimed_without_timeout() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        // PID 0 is never a valid owner of our lock; on unix kill(0, ...) targets
        // the process group, so use a pid far above any plausible live one.
        let dead = LockOwner {
            pid: u32::MAX - 1,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        fs::write(&path, serde_json::to_string(&dead).unwrap()).unwrap();

        let start = Instant::now();
        let guard = LockGuard::acquire(&path).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        guard.release();
    }

    #[test]
    fn test_unparseable_fresh_lock_is_not_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        fs::write(&path, "not json").unwrap();

        // Freshly written garbage is below the staleness age, so it is left
        // alone until it ages out.
        assert!(!reclaim_if_stale(&path).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_live_owner_blocks_second_acquire() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        let _held = LockGuard::acquire(&path).unwrap();

        let err = LockGuard::acquire(&path).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
    }
}
