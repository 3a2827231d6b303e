use crate::atomic::AtomicFileWriter;
use crate::backup::manifest::{
    BackupIndex, BackupManifest, BackupVerification, FileEntry, RestoreSummary,
};
use crate::checksum::sha256_hex;
use crate::errors::{backup_corrupt, io_error, validate_id, Result};
use crate::layout::{is_temp_file_name, BACKUP_INDEX_FILE, LOCKS_DIR, LOCK_SUFFIX};
use crate::transaction::{LockGuard, LockManager, SystemLiveness};
use chrono::{DateTime, Duration, Utc};
use evidex_core::errors::StorageError;
use evidex_core::{log_op_end, log_op_error, log_op_start, StorageConfig};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};
use walkdir::WalkDir;

/// Upper bound on retention ages, keeps the cutoff date representable
const MAX_RETENTION_DAYS: u64 = 365_000;

/// Full and incremental directory snapshots
///
/// Each backup lives in `<backup root>/<backup id>/` with relative paths
/// preserved. Manifests are kept together in `<backup root>/manifests.json`;
/// every change to that index happens under its cross-process lock, while
/// readers rely on the atomic rename.
pub struct BackupManager {
    backup_root: PathBuf,
    writer: AtomicFileWriter,
    locks: LockManager,
}

struct SourceFile {
    relative: String,
    absolute: PathBuf,
    size: u64,
    modified_ms: i64,
}

impl BackupManager {
    /// Manager with its index lock under `<backup root>/.locks/`
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        let backup_root = backup_root.into();
        let defaults = StorageConfig::default();
        let locks = LockManager::new(
            backup_root.join(LOCKS_DIR),
            defaults.lock_timeout(),
            defaults.lock_poll_interval(),
            Arc::new(SystemLiveness),
        );
        Self::with_locks(backup_root, locks)
    }

    /// Manager sharing an existing lock directory, e.g. the store's `.locks/`
    pub fn with_locks(backup_root: impl Into<PathBuf>, locks: LockManager) -> Self {
        Self {
            backup_root: backup_root.into(),
            writer: AtomicFileWriter::default(),
            locks,
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Directory holding the files of `backup_id`
    pub fn backup_dir(&self, backup_id: &str) -> PathBuf {
        self.backup_root.join(backup_id)
    }

    fn index_path(&self) -> PathBuf {
        self.backup_root.join(BACKUP_INDEX_FILE)
    }

    fn lock_index(&self) -> Result<LockGuard> {
        self.locks.acquire(&self.index_path())
    }

    fn load_index(&self) -> Result<BackupIndex> {
        let path = self.index_path();
        if !path.is_file() {
            return Ok(BackupIndex::default());
        }
        self.writer.read_json(&path)
    }

    fn save_index(&self, index: &BackupIndex) -> Result<()> {
        self.writer.write_json(&self.index_path(), index)
    }

    /// Copy every file under `source_dir`
    ///
    /// Skips the backup root itself, lock files and atomic-write temp files.
    pub fn create_full_backup(&self, source_dir: &Path, backup_id: Option<&str>) -> Result<BackupManifest> {
        let start = Instant::now();
        log_op_start!("create_full_backup", source = %source_dir.display());

        let result = self.create_backup(source_dir, None, backup_id);
        self.log_result("create_full_backup", start, &result);
        result
    }

    /// Copy the files that changed since the effective state of `parent_id`
    ///
    /// A file changed when its size or modification time differs from the
    /// newest entry for it in the parent chain. Files deleted since then are
    /// listed in the manifest and removed again on restore.
    pub fn create_incremental_backup(
        &self,
        source_dir: &Path,
        parent_id: &str,
        backup_id: Option<&str>,
    ) -> Result<BackupManifest> {
        let start = Instant::now();
        log_op_start!(
            "create_incremental_backup",
            source = %source_dir.display(),
            parent_id = parent_id
        );

        let result = self.create_backup(source_dir, Some(parent_id), backup_id);
        self.log_result("create_incremental_backup", start, &result);
        result
    }

    fn log_result(&self, op: &str, start: Instant, result: &Result<BackupManifest>) {
        match result {
            Ok(manifest) => {
                log_op_end!(
                    op,
                    duration_ms = start.elapsed().as_millis() as u64,
                    backup_id = manifest.backup_id.as_str(),
                    file_count = manifest.file_count
                );
            }
            Err(e) => {
                log_op_error!(op, e, duration_ms = start.elapsed().as_millis() as u64);
            }
        }
    }

    fn create_backup(
        &self,
        source_dir: &Path,
        parent_id: Option<&str>,
        backup_id: Option<&str>,
    ) -> Result<BackupManifest> {
        let backup_id = match backup_id {
            Some(id) => id.to_string(),
            None => format!("backup-{}", uuid::Uuid::now_v7().simple()),
        };
        validate_id("backup", &backup_id)?;
        if !source_dir.is_dir() {
            return Err(StorageError::NotFound {
                path: source_dir.to_path_buf(),
            });
        }

        fs::create_dir_all(&self.backup_root)
            .map_err(|e| io_error("create_backup_root", &self.backup_root, e))?;
        let snapshot = self.load_index()?;
        if snapshot.backups.contains_key(&backup_id) {
            return Err(StorageError::BackupExists { backup_id });
        }
        let baseline = match parent_id {
            Some(parent) => Some(self.effective_state(&snapshot, parent)?),
            None => None,
        };

        let sources = self.collect_source_files(source_dir)?;
        // Claiming the directory reserves the id against concurrent creators
        let dest = self.backup_dir(&backup_id);
        match fs::create_dir(&dest) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::BackupExists { backup_id });
            }
            Err(e) => return Err(io_error("create_backup_dir", &dest, e)),
        }

        let copied = self.copy_changed(&sources, baseline.as_ref(), &dest);
        let files = match copied {
            Ok(files) => files,
            Err(e) => {
                // A half-copied backup is never registered; drop its directory
                let _ = fs::remove_dir_all(&dest);
                return Err(e);
            }
        };

        let deleted = match &baseline {
            Some(state) => {
                let present: BTreeSet<&str> = sources.iter().map(|s| s.relative.as_str()).collect();
                state
                    .keys()
                    .filter(|k| !present.contains(k.as_str()))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };

        let relatives: Vec<String> = files.keys().cloned().collect();
        let checksum = tree_checksum(&dest, &relatives)?;
        let manifest = BackupManifest {
            backup_id: backup_id.clone(),
            created_at: Utc::now(),
            file_count: files.len() as u64,
            total_size: files.values().map(|f| f.size).sum(),
            checksum,
            source_path: source_dir.to_path_buf(),
            incremental: parent_id.is_some(),
            parent_id: parent_id.map(str::to_string),
            files,
            deleted,
        };

        if let Err(e) = self.register(manifest.clone()) {
            let _ = fs::remove_dir_all(&dest);
            return Err(e);
        }
        Ok(manifest)
    }

    /// Add `manifest` to the index: load, insert, save under the index lock
    fn register(&self, manifest: BackupManifest) -> Result<()> {
        let _index_guard = self.lock_index()?;
        let mut index = self.load_index()?;
        if index.backups.contains_key(&manifest.backup_id) {
            return Err(StorageError::BackupExists {
                backup_id: manifest.backup_id,
            });
        }
        index.backups.insert(manifest.backup_id.clone(), manifest);
        self.save_index(&index)
    }

    fn collect_source_files(&self, source_dir: &Path) -> Result<Vec<SourceFile>> {
        let skip_root = fs::canonicalize(&self.backup_root).ok();
        let mut files = Vec::new();

        let walker = WalkDir::new(source_dir).into_iter().filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if entry.file_type().is_dir() {
                if entry.file_name() == LOCKS_DIR {
                    return false;
                }
                if let Some(root) = &skip_root {
                    if fs::canonicalize(entry.path()).ok().as_ref() == Some(root) {
                        return false;
                    }
                }
            }
            true
        });

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(source_dir).to_path_buf();
                io_error("scan_backup_source", &path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if is_temp_file_name(&name) || name.ends_with(LOCK_SUFFIX) {
                continue;
            }

            let relative = relative_key(source_dir, entry.path());
            let meta = entry
                .metadata()
                .map_err(|e| io_error("stat_backup_source", entry.path(), e.into()))?;
            let modified_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            files.push(SourceFile {
                relative,
                absolute: entry.path().to_path_buf(),
                size: meta.len(),
                modified_ms,
            });
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(files)
    }

    fn copy_changed(
        &self,
        sources: &[SourceFile],
        baseline: Option<&BTreeMap<String, FileEntry>>,
        dest: &Path,
    ) -> Result<BTreeMap<String, FileEntry>> {
        let mut copied = BTreeMap::new();
        for source in sources {
            if let Some(previous) = baseline.and_then(|b| b.get(&source.relative)) {
                if previous.size == source.size && previous.modified_ms == source.modified_ms {
                    continue;
                }
            }
            let bytes = fs::read(&source.absolute)
                .map_err(|e| io_error("read_backup_source", &source.absolute, e))?;
            let target = dest.join(&source.relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| io_error("create_backup_dir", parent, e))?;
            }
            fs::write(&target, &bytes).map_err(|e| io_error("copy_backup_file", &target, e))?;
            copied.insert(
                source.relative.clone(),
                FileEntry {
                    size: bytes.len() as u64,
                    modified_ms: source.modified_ms,
                    sha256: sha256_hex(&bytes),
                },
            );
        }
        Ok(copied)
    }

    /// Backups from the root of the chain down to `backup_id`
    fn chain(&self, index: &BackupIndex, backup_id: &str) -> Result<Vec<BackupManifest>> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = index
            .backups
            .get(backup_id)
            .cloned()
            .ok_or_else(|| StorageError::BackupNotFound {
                backup_id: backup_id.to_string(),
            })?;

        loop {
            if !seen.insert(current.backup_id.clone()) {
                return Err(StorageError::BackupChainBroken {
                    backup_id: backup_id.to_string(),
                    parent_id: current.backup_id,
                });
            }
            let parent = current.parent_id.clone();
            chain.push(current);
            let Some(parent_id) = parent else { break };
            current = index.backups.get(&parent_id).cloned().ok_or_else(|| {
                StorageError::BackupChainBroken {
                    backup_id: backup_id.to_string(),
                    parent_id: parent_id.clone(),
                }
            })?;
        }

        chain.reverse();
        Ok(chain)
    }

    /// Files present after replaying the chain of `backup_id`
    fn effective_state(&self, index: &BackupIndex, backup_id: &str) -> Result<BTreeMap<String, FileEntry>> {
        let mut state = BTreeMap::new();
        for manifest in self.chain(index, backup_id)? {
            for deleted in &manifest.deleted {
                state.remove(deleted);
            }
            state.extend(manifest.files);
        }
        Ok(state)
    }

    /// Restore `backup_id` into `target_dir`
    ///
    /// Every backup in the chain is verified before anything is copied; a
    /// failed verification aborts without touching the target. Files are
    /// copied one by one; use [`restore_backup_staged`](Self::restore_backup_staged)
    /// when the whole directory must switch at once.
    pub fn restore_backup(&self, backup_id: &str, target_dir: &Path) -> Result<RestoreSummary> {
        let start = Instant::now();
        log_op_start!("restore_backup", backup_id = backup_id, target = %target_dir.display());

        let result = self.restore_inner(backup_id, target_dir);
        match &result {
            Ok(summary) => {
                log_op_end!(
                    "restore_backup",
                    duration_ms = start.elapsed().as_millis() as u64,
                    files_restored = summary.files_restored
                );
            }
            Err(e) => {
                log_op_error!("restore_backup", e, duration_ms = start.elapsed().as_millis() as u64);
            }
        }
        result
    }

    fn restore_inner(&self, backup_id: &str, target_dir: &Path) -> Result<RestoreSummary> {
        let chain = self.chain(&self.load_index()?, backup_id)?;

        for manifest in &chain {
            let verification = self.verify_manifest(manifest)?;
            if !verification.valid {
                return Err(backup_corrupt(
                    &manifest.backup_id,
                    &verification.expected_checksum,
                    &verification.actual_checksum,
                ));
            }
        }

        tracing::warn!(
            backup_id = backup_id,
            target = %target_dir.display(),
            chain_len = chain.len(),
            "restoring backup over target directory"
        );
        fs::create_dir_all(target_dir).map_err(|e| io_error("create_restore_dir", target_dir, e))?;

        let mut files_restored = 0u64;
        let mut files_removed = 0u64;
        for manifest in &chain {
            for deleted in &manifest.deleted {
                let path = target_dir.join(deleted);
                match fs::remove_file(&path) {
                    Ok(()) => files_removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_error("restore_remove", &path, e)),
                }
            }
            let source_root = self.backup_dir(&manifest.backup_id);
            for relative in manifest.files.keys() {
                let from = source_root.join(relative);
                let to = target_dir.join(relative);
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent).map_err(|e| io_error("create_restore_dir", parent, e))?;
                }
                fs::copy(&from, &to).map_err(|e| io_error("restore_copy", &from, e))?;
                files_restored += 1;
            }
        }

        Ok(RestoreSummary {
            backup_id: backup_id.to_string(),
            chain: chain.into_iter().map(|m| m.backup_id).collect(),
            files_restored,
            files_removed,
        })
    }

    /// Restore into a staging directory, then swap it in with renames
    ///
    /// Whatever was at `target_dir` is replaced as a whole; on failure the
    /// previous directory is left in place.
    pub fn restore_backup_staged(&self, backup_id: &str, target_dir: &Path) -> Result<RestoreSummary> {
        let parent = match target_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = target_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| crate::errors::invalid_input("restore target has no directory name"))?;
        let nonce = uuid::Uuid::now_v7().simple().to_string();
        let staging = parent.join(format!(".{}.restore-{}", name, nonce));
        let retired = parent.join(format!(".{}.old-{}", name, nonce));

        let summary = match self.restore_backup(backup_id, &staging) {
            Ok(summary) => summary,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        let had_previous = target_dir.exists();
        if had_previous {
            fs::rename(target_dir, &retired).map_err(|e| io_error("retire_restore_target", target_dir, e))?;
        }
        if let Err(e) = fs::rename(&staging, target_dir) {
            if had_previous {
                let _ = fs::rename(&retired, target_dir);
            }
            let _ = fs::remove_dir_all(&staging);
            return Err(io_error("swap_restore_target", target_dir, e));
        }
        if had_previous {
            if let Err(e) = fs::remove_dir_all(&retired) {
                tracing::warn!(path = %retired.display(), error = %e, "could not remove replaced directory");
            }
        }
        Ok(summary)
    }

    /// Delete old backups
    ///
    /// The `keep_count` most recent are always kept. Of the rest, those older
    /// than `max_age_days` are deleted unless a kept backup still depends on
    /// them through its parent chain. Returns the deleted ids.
    pub fn cleanup_old_backups(&self, keep_count: usize, max_age_days: u64) -> Result<Vec<String>> {
        let start = Instant::now();
        log_op_start!("cleanup_old_backups", keep_count = keep_count as u64, max_age_days = max_age_days);

        let cutoff = Utc::now() - Duration::days(max_age_days.min(MAX_RETENTION_DAYS) as i64);
        let result = self.cleanup_before(keep_count, cutoff);
        match &result {
            Ok(deleted) => {
                log_op_end!(
                    "cleanup_old_backups",
                    duration_ms = start.elapsed().as_millis() as u64,
                    deleted = deleted.len() as u64
                );
            }
            Err(e) => {
                log_op_error!("cleanup_old_backups", e, duration_ms = start.elapsed().as_millis() as u64);
            }
        }
        result
    }

    fn cleanup_before(&self, keep_count: usize, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let _index_guard = self.lock_index()?;
        let mut index = self.load_index()?;

        let mut by_age: Vec<&BackupManifest> = index.backups.values().collect();
        by_age.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut doomed: BTreeSet<String> = by_age
            .iter()
            .skip(keep_count)
            .filter(|m| m.created_at < cutoff)
            .map(|m| m.backup_id.clone())
            .collect();

        // Ancestors of anything kept stay, transitively
        let kept: Vec<String> = index
            .backups
            .keys()
            .filter(|id| !doomed.contains(*id))
            .cloned()
            .collect();
        for id in kept {
            let mut parent = index.backups.get(&id).and_then(|m| m.parent_id.clone());
            while let Some(p) = parent {
                doomed.remove(&p);
                parent = index.backups.get(&p).and_then(|m| m.parent_id.clone());
            }
        }

        let mut deleted = Vec::new();
        for id in doomed {
            let dir = self.backup_dir(&id);
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error("remove_backup", &dir, e)),
            }
            index.backups.remove(&id);
            deleted.push(id);
        }

        if !deleted.is_empty() {
            self.save_index(&index)?;
        }
        Ok(deleted)
    }

    /// Recompute the checksum and file count of a backup
    pub fn verify_backup(&self, backup_id: &str) -> Result<BackupVerification> {
        let manifest = self.get_manifest(backup_id)?;
        self.verify_manifest(&manifest)
    }

    fn verify_manifest(&self, manifest: &BackupManifest) -> Result<BackupVerification> {
        let dir = self.backup_dir(&manifest.backup_id);
        let (actual_count, actual_checksum) = if dir.is_dir() {
            let relatives = list_relative_files(&dir)?;
            (relatives.len() as u64, tree_checksum(&dir, &relatives)?)
        } else {
            (0, "missing".to_string())
        };

        Ok(BackupVerification {
            backup_id: manifest.backup_id.clone(),
            valid: actual_count == manifest.file_count && actual_checksum == manifest.checksum,
            expected_checksum: manifest.checksum.clone(),
            actual_checksum,
            expected_file_count: manifest.file_count,
            actual_file_count: actual_count,
        })
    }

    /// All backups, oldest first
    pub fn list_backups(&self) -> Result<Vec<BackupManifest>> {
        let mut backups: Vec<BackupManifest> = self.load_index()?.backups.into_values().collect();
        backups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(backups)
    }

    pub fn get_manifest(&self, backup_id: &str) -> Result<BackupManifest> {
        self.load_index()?
            .backups
            .remove(backup_id)
            .ok_or_else(|| StorageError::BackupNotFound {
                backup_id: backup_id.to_string(),
            })
    }
}

/// `/`-separated path of `path` relative to `root`
fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn list_relative_files(dir: &Path) -> Result<Vec<String>> {
    let mut relatives = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            io_error("scan_backup", &path, e.into())
        })?;
        if entry.file_type().is_file() {
            relatives.push(relative_key(dir, entry.path()));
        }
    }
    relatives.sort();
    Ok(relatives)
}

/// SHA-256 over `(relative path, size, content)` of each file, in the given order
fn tree_checksum(root: &Path, relatives: &[String]) -> Result<String> {
    let mut hasher = Sha256::new();
    for relative in relatives {
        let path = root.join(relative);
        let bytes = fs::read(&path).map_err(|e| io_error("checksum_backup_file", &path, e))?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}
