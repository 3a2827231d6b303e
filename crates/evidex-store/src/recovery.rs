//! Startup recovery
//!
//! Cleans what a crash leaves behind: temp files from interrupted atomic
//! writes and lock files of dead processes. Streaming sessions are only
//! listed; resuming one is the caller's decision.

use crate::errors::{io_error, Result};
use crate::layout::{is_temp_file_name, StorageLayout};
use crate::streaming::{list_resumable, StreamingManifest};
use crate::transaction::LockManager;
use evidex_core::{log_op_end, log_op_error, log_op_start};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use walkdir::WalkDir;

/// What startup recovery found and cleaned
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub removed_temp_files: Vec<PathBuf>,
    pub stale_locks_removed: Vec<PathBuf>,
    pub resumable_sessions: Vec<StreamingManifest>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.removed_temp_files.is_empty()
            && self.stale_locks_removed.is_empty()
            && self.resumable_sessions.is_empty()
    }
}

/// Run startup recovery over a store
///
/// Temp files younger than `min_temp_age` are left alone, since a live
/// writer in another process may still own them.
pub fn recover_on_startup(
    layout: &StorageLayout,
    locks: &LockManager,
    min_temp_age: Duration,
) -> Result<RecoveryReport> {
    let start = Instant::now();
    log_op_start!("recover_on_startup", root = %layout.root().display());

    let result = recover_inner(layout, locks, min_temp_age);
    match &result {
        Ok(report) => {
            log_op_end!(
                "recover_on_startup",
                duration_ms = start.elapsed().as_millis() as u64,
                temp_files = report.removed_temp_files.len() as u64,
                stale_locks = report.stale_locks_removed.len() as u64,
                resumable = report.resumable_sessions.len() as u64
            );
        }
        Err(e) => {
            log_op_error!("recover_on_startup", e, duration_ms = start.elapsed().as_millis() as u64);
        }
    }
    result
}

fn recover_inner(
    layout: &StorageLayout,
    locks: &LockManager,
    min_temp_age: Duration,
) -> Result<RecoveryReport> {
    let removed_temp_files = remove_orphaned_temp_files(layout.root(), min_temp_age)?;
    let stale_locks_removed = locks.remove_stale_locks()?;
    let resumable_sessions = list_resumable(layout)?;

    Ok(RecoveryReport {
        removed_temp_files,
        stale_locks_removed,
        resumable_sessions,
    })
}

fn remove_orphaned_temp_files(root: &Path, min_age: Duration) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !root.is_dir() {
        return Ok(removed);
    }

    let now = SystemTime::now();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            io_error("scan_temp_files", &path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_temp = entry
            .file_name()
            .to_str()
            .map(is_temp_file_name)
            .unwrap_or(false);
        if !is_temp {
            continue;
        }
        let old_enough = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .map(|age| age >= min_age)
            .unwrap_or(false);
        if !old_enough {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::warn!(path = %entry.path().display(), "removed orphaned temp file");
                removed.push(entry.path().to_path_buf());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("remove_temp_file", entry.path(), e)),
        }
    }
    Ok(removed)
}
