use crate::atomic::AtomicFileWriter;
use crate::checksum::{derive_record_id, record_checksum};
use crate::corruption::{CorruptionDetector, CorruptionEvidence, CorruptionMarker, JsonSchemaCheck};
use crate::errors::{io_error, serialization_error, validate_id, Result};
use crate::layout::{RecordKind, StorageLayout, MANIFEST_SUFFIX, RECORD_BACKUP_SUFFIX};
use crate::streaming::StreamingManifest;
use crate::transaction::lock::LockManager;
use crate::transaction::log::{TransactionLog, WriteTransaction};
use crate::transaction::platform::{
    ProcessLiveness, SpaceProbe, SystemLiveness, SystemSpaceProbe,
};
use crate::transaction::record::EvidenceRecord;
use chrono::Utc;
use evidex_core::errors::StorageError;
use evidex_core::{log_op_end, log_op_error, log_op_start, StorageConfig};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Smallest well-formed record file (`{}`)
const MIN_RECORD_BYTES: u64 = 2;

/// Result of an operator-invoked repair of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The newest verifying backup was copied over the target
    Restored { backup_path: PathBuf },
    /// No backup exists for the target
    NoBackup,
    /// Backups exist but none of them verifies
    BackupCorrupt { tried: usize },
}

/// Transactional single-record writes
///
/// Each write takes the target's lock, checks free space, backs up the
/// previous version, writes atomically, reads back and re-verifies the
/// checksum. Failures come back wrapped in `StorageError::Transactional`.
pub struct TransactionCoordinator {
    layout: StorageLayout,
    writer: AtomicFileWriter,
    locks: LockManager,
    space: Arc<dyn SpaceProbe>,
    log: Mutex<TransactionLog>,
    verify_after_write: bool,
    record_backup_keep: usize,
}

impl TransactionCoordinator {
    /// Open a coordinator over `layout`, creating its directories
    pub fn open(layout: StorageLayout, config: &StorageConfig) -> Result<Self> {
        Self::with_platform(
            layout,
            config,
            Arc::new(SystemLiveness),
            Arc::new(SystemSpaceProbe),
        )
    }

    /// Open with injected platform capabilities
    pub fn with_platform(
        layout: StorageLayout,
        config: &StorageConfig,
        liveness: Arc<dyn ProcessLiveness>,
        space: Arc<dyn SpaceProbe>,
    ) -> Result<Self> {
        layout.ensure_dirs()?;
        let locks = LockManager::new(
            layout.locks_dir(),
            config.lock_timeout(),
            config.lock_poll_interval(),
            liveness,
        );
        Ok(Self {
            layout,
            writer: AtomicFileWriter::default(),
            locks,
            space,
            log: Mutex::new(TransactionLog::new(config.transaction_log_capacity)),
            verify_after_write: config.verify_after_write,
            record_backup_keep: config.record_backup_keep.max(1),
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Persist one record and return its id
    ///
    /// Without an explicit `id`, the id is derived from the payload and
    /// session, so saving the same payload twice overwrites one record.
    ///
    /// # Errors
    ///
    /// `Transactional` wrapping the failing stage; preflight failures
    /// (`InsufficientSpace`, `ConcurrentWrite`) leave the target untouched.
    pub fn write_record(
        &self,
        kind: RecordKind,
        payload: Value,
        session_id: &str,
        id: Option<&str>,
    ) -> Result<String> {
        let start = Instant::now();
        let record_id = match id {
            Some(id) => id.to_string(),
            None => derive_record_id(kind, &payload, session_id),
        };
        log_op_start!(
            "write_record",
            record_kind = kind.as_str(),
            session_id = session_id,
            record_id = record_id.as_str()
        );

        match self.write_record_inner(kind, payload, session_id, &record_id) {
            Ok(()) => {
                log_op_end!(
                    "write_record",
                    duration_ms = start.elapsed().as_millis() as u64,
                    record_id = record_id.as_str()
                );
                Ok(record_id)
            }
            Err(e) => {
                log_op_error!(
                    "write_record",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    record_id = record_id.as_str()
                );
                Err(e.into_transactional("write_record", Some(record_id)))
            }
        }
    }

    fn write_record_inner(
        &self,
        kind: RecordKind,
        payload: Value,
        session_id: &str,
        record_id: &str,
    ) -> Result<()> {
        validate_id("session", session_id)?;
        let target = self.layout.record_path(kind, record_id)?;
        let record = EvidenceRecord::sealed(record_id, kind, session_id, payload)?;
        let bytes = record.to_bytes()?;

        let _guard = self.locks.acquire(&target)?;
        self.check_space(&target, bytes.len() as u64)?;

        let backup_path = if target.is_file() {
            Some(self.backup_existing(kind, &target)?)
        } else {
            None
        };

        self.writer.write(&target, &bytes)?;

        if self.verify_after_write {
            if let Err(e) = self.verify_written(&target, &record.checksum) {
                self.roll_back(&target, backup_path.as_deref());
                return Err(e);
            }
        }

        let tx = WriteTransaction {
            transaction_id: uuid::Uuid::now_v7().to_string(),
            target_path: target,
            payload: record.payload,
            timestamp: record.written_at,
            checksum: record.checksum,
            backup_path,
        };
        if let Ok(mut log) = self.log.lock() {
            log.push(tx);
        }
        Ok(())
    }

    fn check_space(&self, target: &Path, payload_len: u64) -> Result<()> {
        let dir = target.parent().unwrap_or(self.layout.root());
        let available = self
            .space
            .available_bytes(dir)
            .map_err(|e| io_error("probe_space", dir, e))?;
        // Room for the temp file plus the final file
        let required = payload_len.saturating_mul(2);
        if available < required {
            return Err(StorageError::InsufficientSpace {
                path: target.to_path_buf(),
                required,
                available,
            });
        }
        Ok(())
    }

    /// Copy the current target to `<kind>/.backups/<filename>.<stamp>.bak`
    fn backup_existing(&self, kind: RecordKind, target: &Path) -> Result<PathBuf> {
        let backup_dir = self.layout.record_backup_dir(kind);
        if !backup_dir.is_dir() {
            fs::create_dir_all(&backup_dir)
                .map_err(|e| io_error("create_record_backup_dir", &backup_dir, e))?;
        }
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.9fZ");
        let backup_path = backup_dir.join(format!("{}.{}{}", file_name, stamp, RECORD_BACKUP_SUFFIX));

        let current = self.writer.read(target)?;
        self.writer.write(&backup_path, &current)?;
        self.prune_record_backups(target)?;
        Ok(backup_path)
    }

    /// Drop all but the newest `record_backup_keep` backups of `target`
    fn prune_record_backups(&self, target: &Path) -> Result<()> {
        for stale in self.record_backups(target)?.into_iter().skip(self.record_backup_keep) {
            match fs::remove_file(&stale) {
                Ok(()) => tracing::debug!(backup = %stale.display(), "pruned record backup"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error("prune_record_backup", &stale, e)),
            }
        }
        Ok(())
    }

    fn verify_written(&self, target: &Path, expected: &str) -> Result<()> {
        let bytes = self.writer.read(target)?;
        let actual = match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => record_checksum(&value),
            Err(e) => format!("unparseable: {}", e),
        };
        if actual != expected {
            return Err(StorageError::VerificationFailed {
                path: target.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    fn roll_back(&self, target: &Path, backup: Option<&Path>) {
        let outcome = match backup {
            Some(backup) => self
                .writer
                .read(backup)
                .and_then(|bytes| self.writer.write(target, &bytes)),
            None => fs::remove_file(target).map_err(|e| io_error("discard_unverified", target, e)),
        };
        match outcome {
            Ok(()) => tracing::warn!(path = %target.display(), "rolled back unverified write"),
            Err(e) => {
                tracing::error!(path = %target.display(), error = %e, "rollback after failed verification failed")
            }
        }
    }

    /// Load one record
    ///
    /// Returns the record as stored; integrity is checked by
    /// [`verify_all`](Self::verify_all), not here.
    pub fn read_record(&self, kind: RecordKind, id: &str) -> Result<EvidenceRecord> {
        let path = self.layout.record_path(kind, id)?;
        self.writer.read_json(&path)
    }

    /// Ids of all records of `kind`, sorted
    pub fn list_record_ids(&self, kind: RecordKind) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .record_files(kind)?
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .filter_map(|n| kind.parse_file_name(n))
            .map(str::to_string)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn record_files(&self, kind: RecordKind) -> Result<Vec<PathBuf>> {
        self.files_in(&self.layout.record_dir(kind), |name| {
            kind.parse_file_name(name).is_some()
        })
    }

    fn manifest_files(&self) -> Result<Vec<PathBuf>> {
        self.files_in(&self.layout.record_dir(RecordKind::Observation), |name| {
            name.ends_with(MANIFEST_SUFFIX)
        })
    }

    fn files_in(&self, dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("scan_records", dir, e)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("scan_records", dir, e))?;
            let path = entry.path();
            let wanted = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(&keep)
                .unwrap_or(false);
            if wanted && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Re-check every persisted record and streaming manifest
    ///
    /// Returns all findings; an empty list means the store verified clean.
    pub fn verify_all(&self) -> Result<Vec<CorruptionEvidence>> {
        let start = Instant::now();
        log_op_start!("verify_all");

        let result = self.verify_all_inner();
        match &result {
            Ok(findings) => {
                log_op_end!(
                    "verify_all",
                    duration_ms = start.elapsed().as_millis() as u64,
                    findings = findings.len() as u64
                );
            }
            Err(e) => {
                log_op_error!(
                    "verify_all",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64
                );
            }
        }
        result
    }

    fn verify_all_inner(&self) -> Result<Vec<CorruptionEvidence>> {
        let mut findings = Vec::new();
        let record_check = JsonSchemaCheck::evidence_record();

        for kind in RecordKind::ALL {
            for path in self.record_files(kind)? {
                if let Some(evidence) = self.verify_record_file(&path, &record_check)? {
                    findings.push(evidence);
                }
            }
        }

        let manifest_check = StreamingManifest::schema_check();
        for path in self.manifest_files()? {
            if let Some(evidence) = CorruptionDetector::check_marker(&path)? {
                findings.push(evidence);
                continue;
            }
            if let Some(evidence) = CorruptionDetector::detect_partial_write(&path, MIN_RECORD_BYTES)? {
                findings.push(evidence);
                continue;
            }
            if let Some(evidence) = CorruptionDetector::verify_json_structure(&path, &manifest_check)? {
                findings.push(evidence);
            }
        }

        Ok(findings)
    }

    fn verify_record_file(
        &self,
        path: &Path,
        check: &JsonSchemaCheck,
    ) -> Result<Option<CorruptionEvidence>> {
        if let Some(evidence) = CorruptionDetector::check_marker(path)? {
            return Ok(Some(evidence));
        }
        if let Some(evidence) = CorruptionDetector::detect_partial_write(path, MIN_RECORD_BYTES)? {
            return Ok(Some(evidence));
        }
        if let Some(evidence) = CorruptionDetector::verify_json_structure(path, check)? {
            return Ok(Some(evidence));
        }
        let bytes = self.writer.read(path)?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| serialization_error(path.display().to_string(), e))?;
        Ok(CorruptionDetector::verify_record_checksum(path, &value))
    }

    /// Backups of `path`, newest first
    pub fn record_backups(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let (Some(dir), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str()))
        else {
            return Ok(Vec::new());
        };
        let prefix = format!("{}.", name);
        let mut backups = self.files_in(&dir.join(crate::layout::RECORD_BACKUPS_DIR), |n| {
            n.starts_with(&prefix) && n.ends_with(RECORD_BACKUP_SUFFIX)
        })?;
        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    /// Restore `path` from its newest backup that verifies
    ///
    /// Operator-invoked only; nothing in the store repairs on its own. Clears
    /// the corruption marker after a successful restore.
    pub fn repair_from_backup(&self, path: &Path) -> Result<RepairOutcome> {
        let start = Instant::now();
        log_op_start!("repair_from_backup", path = %path.display());

        let result = self.repair_inner(path);
        match &result {
            Ok(outcome) => {
                log_op_end!(
                    "repair_from_backup",
                    duration_ms = start.elapsed().as_millis() as u64,
                    outcome = ?outcome
                );
            }
            Err(e) => {
                log_op_error!(
                    "repair_from_backup",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64
                );
            }
        }
        result
    }

    fn repair_inner(&self, path: &Path) -> Result<RepairOutcome> {
        let backups = self.record_backups(path)?;
        if backups.is_empty() {
            return Ok(RepairOutcome::NoBackup);
        }

        let _guard = self.locks.acquire(path)?;
        for backup in &backups {
            let bytes = self.writer.read(backup)?;
            let verified = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .map(|v| CorruptionDetector::verify_record_checksum(backup, &v).is_none())
                .unwrap_or(false);
            if !verified {
                tracing::warn!(backup = %backup.display(), "skipping backup that fails verification");
                continue;
            }

            self.writer.write(path, &bytes)?;
            CorruptionMarker::clear_after_restore(path)?;
            tracing::warn!(
                path = %path.display(),
                backup = %backup.display(),
                "record restored from backup"
            );
            return Ok(RepairOutcome::Restored {
                backup_path: backup.clone(),
            });
        }

        Ok(RepairOutcome::BackupCorrupt {
            tried: backups.len(),
        })
    }

    /// Recent writes, oldest first
    pub fn recent_transactions(&self) -> Vec<WriteTransaction> {
        self.log.lock().map(|l| l.snapshot()).unwrap_or_default()
    }
}
