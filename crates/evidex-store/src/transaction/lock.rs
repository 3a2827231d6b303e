use crate::errors::{io_error, Result};
use crate::layout::LOCK_SUFFIX;
use crate::transaction::platform::ProcessLiveness;
use chrono::{DateTime, Utc};
use evidex_core::errors::StorageError;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Sidecar serializing the reclamation of one stale lock
const RECLAIM_SUFFIX: &str = ".reclaim";
/// A reclaim sidecar this old belongs to a crashed reclaimer
const RECLAIM_ABANDONED_AFTER: Duration = Duration::from_secs(10);

/// Content of a lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub target: String,
    /// Unique per acquisition; a guard only releases a lock carrying its token
    #[serde(default)]
    pub token: String,
}

impl LockInfo {
    pub fn new(pid: u32, target: impl Into<String>) -> Self {
        Self {
            pid,
            acquired_at: Utc::now(),
            target: target.into(),
            token: uuid::Uuid::now_v7().simple().to_string(),
        }
    }
}

enum LockState {
    Held(Option<u32>),
    Stale(Option<u32>),
    Vanished,
}

enum Reclaim {
    /// The stale lock was deleted by us
    Removed,
    /// Nothing left to reclaim
    Gone,
    /// A live holder or another reclaimer got there first
    Busy(Option<u32>),
}

/// Cross-process exclusive locks, one file per target under `.locks/`
pub struct LockManager {
    locks_dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    liveness: Arc<dyn ProcessLiveness>,
}

impl LockManager {
    pub fn new(
        locks_dir: impl Into<PathBuf>,
        timeout: Duration,
        poll_interval: Duration,
        liveness: Arc<dyn ProcessLiveness>,
    ) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            timeout,
            poll_interval,
            liveness,
        }
    }

    /// `.locks/<target file name>.lock`
    pub fn lock_path(&self, target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(LOCK_SUFFIX);
        self.locks_dir.join(name)
    }

    /// Take the lock for `target`, waiting up to the configured timeout
    ///
    /// Locks stamped by dead processes are reclaimed, one reclaimer at a
    /// time.
    ///
    /// # Errors
    ///
    /// `ConcurrentWrite` when a live holder keeps the lock past the timeout.
    pub fn acquire(&self, target: &Path) -> Result<LockGuard> {
        let lock_path = self.lock_path(target);
        fs::create_dir_all(&self.locks_dir).map_err(|e| io_error("create_locks_dir", &self.locks_dir, e))?;
        let started = Instant::now();

        loop {
            let holder = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(file) => return self.stamp(file, lock_path, target),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.inspect(&lock_path) {
                    LockState::Held(pid) => pid,
                    LockState::Vanished => continue,
                    LockState::Stale(_) => match self.reclaim(&lock_path)? {
                        Reclaim::Removed | Reclaim::Gone => continue,
                        Reclaim::Busy(pid) => pid,
                    },
                },
                Err(e) => return Err(io_error("acquire_lock", &lock_path, e)),
            };

            let waited = started.elapsed();
            if waited >= self.timeout {
                return Err(StorageError::ConcurrentWrite {
                    path: target.to_path_buf(),
                    holder_pid: holder,
                    waited_ms: waited.as_millis() as u64,
                });
            }
            std::thread::sleep(self.poll_interval.min(self.timeout - waited));
        }
    }

    fn stamp(&self, mut file: fs::File, lock_path: PathBuf, target: &Path) -> Result<LockGuard> {
        let info = LockInfo::new(std::process::id(), target.display().to_string());
        let body = serde_json::to_vec(&info).unwrap_or_default();
        if let Err(e) = file.write_all(&body).and_then(|_| file.sync_all()) {
            let _ = fs::remove_file(&lock_path);
            return Err(io_error("write_lock", &lock_path, e));
        }
        Ok(LockGuard {
            path: lock_path,
            token: info.token,
        })
    }

    /// Delete `lock_path` if it is still stale once the reclaim sidecar is ours
    ///
    /// Only the sidecar holder deletes, and it re-reads the lock first, so a
    /// lock created after another contender's staleness check is never removed.
    fn reclaim(&self, lock_path: &Path) -> Result<Reclaim> {
        let reclaim_path = with_suffix(lock_path, RECLAIM_SUFFIX);
        let _sidecar = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&reclaim_path)
        {
            Ok(_) => ReclaimSidecar(reclaim_path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if age(&reclaim_path).is_some_and(|a| a >= RECLAIM_ABANDONED_AFTER) {
                    tracing::warn!(sidecar = %reclaim_path.display(), "removing abandoned reclaim sidecar");
                    remove_if_present(&reclaim_path, "remove_reclaim_sidecar")?;
                }
                return Ok(Reclaim::Busy(None));
            }
            Err(e) => return Err(io_error("reclaim_lock", &reclaim_path, e)),
        };

        match self.inspect(lock_path) {
            LockState::Stale(pid) => {
                tracing::warn!(lock = %lock_path.display(), holder_pid = ?pid, "reclaiming stale lock");
                remove_if_present(lock_path, "remove_stale_lock")?;
                Ok(Reclaim::Removed)
            }
            LockState::Vanished => Ok(Reclaim::Gone),
            LockState::Held(pid) => Ok(Reclaim::Busy(pid)),
        }
    }

    fn inspect(&self, lock_path: &Path) -> LockState {
        let bytes = match fs::read(lock_path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return LockState::Vanished,
            Err(_) => return LockState::Held(None),
        };

        match serde_json::from_slice::<LockInfo>(&bytes) {
            Ok(info) if self.liveness.is_alive(info.pid) => LockState::Held(Some(info.pid)),
            Ok(info) => LockState::Stale(Some(info.pid)),
            // Empty or torn content: the owner may be mid-write, so only age makes it stale
            Err(_) if age(lock_path).is_some_and(|a| a >= self.timeout) => LockState::Stale(None),
            Err(_) => LockState::Held(None),
        }
    }

    /// Remove every lock whose holder is dead
    pub fn remove_stale_locks(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let entries = match fs::read_dir(&self.locks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(io_error("scan_locks", &self.locks_dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| io_error("scan_locks", &self.locks_dir, e))?;
            let path = entry.path();
            let is_lock = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(LOCK_SUFFIX))
                .unwrap_or(false);
            if !is_lock {
                continue;
            }
            if let LockState::Stale(_) = self.inspect(&path) {
                if let Reclaim::Removed = self.reclaim(&path)? {
                    removed.push(path);
                }
            }
        }
        Ok(removed)
    }
}

struct ReclaimSidecar(PathBuf);

impl Drop for ReclaimSidecar {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

fn remove_if_present(path: &Path, op: &'static str) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(op, path, e)),
    }
}

/// Held lock; the lock file is removed on drop if it still carries our token
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: String,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Only our own stamp is removed; a reclaimed lock may belong to someone else now
        let owner = match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice::<LockInfo>(&bytes).ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(_) => None,
        };
        if owner.map(|info| info.token) != Some(self.token.clone()) {
            tracing::warn!(lock = %self.path.display(), "lock no longer carries our token; leaving it");
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(lock = %self.path.display(), error = %e, "failed to release lock");
            }
        }
    }
}
