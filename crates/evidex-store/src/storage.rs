//! Evidence storage facade
//!
//! The save/load contract investigation collaborators use. Everything here
//! delegates to the coordinator, the streaming session, the backup manager
//! or the corruption detector.

use crate::atomic::AtomicFileWriter;
use crate::backup::{BackupManager, BackupManifest};
use crate::corruption::{CorruptionEvidence, CorruptionKind, CorruptionMarker};
use crate::errors::{invalid_input, io_error, validate_id, Result};
use crate::layout::{RecordKind, StorageLayout};
use crate::memory::{MemoryMonitor, MemorySnapshot, PressureHandler};
use crate::recovery::{recover_on_startup, RecoveryReport};
use crate::streaming::{list_resumable, StreamingObservationSession};
use crate::transaction::{
    EvidenceRecord, LockManager, ProcessLiveness, RepairOutcome, SpaceProbe, SystemLiveness, SystemSpaceProbe,
    TransactionCoordinator,
};
use chrono::{DateTime, Utc};
use evidex_core::{log_op_end, log_op_error, log_op_start, StorageConfig};
use evidex_core_types::InvestigationContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Result of [`EvidenceStorage::verify_storage_integrity`]
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub checked_at: DateTime<Utc>,
    pub findings: Vec<CorruptionEvidence>,
    pub markers_created: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Result of [`EvidenceStorage::repair_corruption`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub repaired: Vec<PathBuf>,
    pub unrepaired: Vec<UnrepairedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnrepairedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Session record as stored by [`EvidenceStorage::save_session`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub investigation_id: String,
    pub root_path: PathBuf,
    pub written_at: DateTime<Utc>,
    pub metadata: Value,
}

/// Counts over the whole store
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub records: BTreeMap<String, u64>,
    pub total_record_bytes: u64,
    pub backups: u64,
    pub corruption_markers: u64,
    pub resumable_sessions: u64,
    pub recent_transactions: u64,
}

/// Writes the triggering snapshot when memory turns critical
struct EmergencySnapshotWriter {
    memory_dir: PathBuf,
}

impl PressureHandler for EmergencySnapshotWriter {
    fn emergency_save(&self, snapshot: &MemorySnapshot) -> Result<()> {
        let name = report_name(&snapshot.operation);
        let path = self.memory_dir.join(format!("{}.emergency.json", name));
        AtomicFileWriter::default().write_json(&path, snapshot)
    }
}

fn report_name(operation: &str) -> String {
    let cleaned: String = operation
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "operation".to_string()
    } else {
        cleaned
    }
}

/// The evidence store
pub struct EvidenceStorage {
    config: StorageConfig,
    layout: StorageLayout,
    coordinator: TransactionCoordinator,
    backups: BackupManager,
    monitor: Option<Arc<MemoryMonitor>>,
}

impl EvidenceStorage {
    /// Open (and lay out, if new) the store at `config.root`
    pub fn open(config: StorageConfig) -> Result<Self> {
        Self::open_with_platform(config, Arc::new(SystemLiveness), Arc::new(SystemSpaceProbe))
    }

    /// Open with injected platform capabilities
    pub fn open_with_platform(
        config: StorageConfig,
        liveness: Arc<dyn ProcessLiveness>,
        space: Arc<dyn SpaceProbe>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = StorageLayout::new(&config.root);
        let index_locks = LockManager::new(
            layout.locks_dir(),
            config.lock_timeout(),
            config.lock_poll_interval(),
            Arc::clone(&liveness),
        );
        let coordinator = TransactionCoordinator::with_platform(layout.clone(), &config, liveness, space)?;
        let backups = BackupManager::with_locks(layout.backups_dir(), index_locks);
        tracing::debug!(root = %layout.root().display(), "evidence storage opened");
        Ok(Self {
            config,
            layout,
            coordinator,
            backups,
            monitor: None,
        })
    }

    /// Attach a memory monitor for streaming sessions
    ///
    /// A critical-threshold crossing also writes the triggering snapshot to
    /// `memory/<operation>.emergency.json`.
    pub fn with_memory_monitor(mut self, monitor: Arc<MemoryMonitor>) -> Self {
        monitor.register_handler(Arc::new(EmergencySnapshotWriter {
            memory_dir: self.layout.memory_dir(),
        }));
        self.monitor = Some(monitor);
        self
    }

    pub fn memory_monitor(&self) -> Option<&Arc<MemoryMonitor>> {
        self.monitor.as_ref()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Store the session record; its id is the context's session id
    pub fn save_session(&self, ctx: &InvestigationContext, metadata: Value) -> Result<String> {
        let payload = json!({
            "investigation_id": ctx.investigation_id.as_str(),
            "root_path": ctx.root().to_string_lossy(),
            "metadata": metadata,
        });
        self.coordinator.write_record(
            RecordKind::Session,
            payload,
            ctx.session_id.as_str(),
            Some(ctx.session_id.as_str()),
        )
    }

    /// Store a batch of observations as one record
    pub fn save_observation(&self, ctx: &InvestigationContext, observations: Vec<Value>) -> Result<String> {
        self.coordinator.write_record(
            RecordKind::Observation,
            Value::Array(observations),
            ctx.session_id.as_str(),
            None,
        )
    }

    pub fn save_question(&self, ctx: &InvestigationContext, question: Value) -> Result<String> {
        self.coordinator
            .write_record(RecordKind::Question, question, ctx.session_id.as_str(), None)
    }

    pub fn save_pattern(&self, ctx: &InvestigationContext, pattern: Value) -> Result<String> {
        self.coordinator
            .write_record(RecordKind::Pattern, pattern, ctx.session_id.as_str(), None)
    }

    /// Load a record as stored
    pub fn load_record(&self, kind: RecordKind, id: &str) -> Result<EvidenceRecord> {
        self.coordinator.read_record(kind, id)
    }

    /// Ids of all stored sessions, sorted
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        self.coordinator.list_record_ids(RecordKind::Session)
    }

    pub fn load_session_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        let record = self.load_record(RecordKind::Session, session_id)?;
        let field = |name: &str| record.payload.get(name).cloned().unwrap_or(Value::Null);
        Ok(SessionMetadata {
            session_id: record.id.clone(),
            investigation_id: field("investigation_id").as_str().unwrap_or_default().to_string(),
            root_path: PathBuf::from(field("root_path").as_str().unwrap_or_default()),
            written_at: record.written_at,
            metadata: field("metadata"),
        })
    }

    /// Start a streaming session for the context's session id
    pub fn create_streaming_observation(&self, ctx: &InvestigationContext) -> Result<StreamingObservationSession> {
        let session = StreamingObservationSession::open(
            self.layout.clone(),
            ctx.session_id.as_str(),
            self.config.checkpoint_interval,
        )?;
        Ok(self.attach_monitor(session))
    }

    /// Resume the newest incomplete streaming session for `session_id`
    pub fn resume_streaming_observation(&self, session_id: &str) -> Result<StreamingObservationSession> {
        let session = StreamingObservationSession::resume_from(
            self.layout.clone(),
            session_id,
            self.config.checkpoint_interval,
        )?;
        Ok(self.attach_monitor(session))
    }

    fn attach_monitor(&self, session: StreamingObservationSession) -> StreamingObservationSession {
        match &self.monitor {
            Some(monitor) => session.with_monitor(Arc::clone(monitor)),
            None => session,
        }
    }

    /// Check every record and manifest
    ///
    /// With `mark`, each new finding is also persisted as a corruption marker.
    pub fn verify_storage_integrity(&self, mark: bool) -> Result<IntegrityReport> {
        let findings = self.coordinator.verify_all()?;
        let mut markers_created = 0;
        if mark {
            for evidence in &findings {
                if evidence.kind() == CorruptionKind::ExplicitMarker {
                    continue;
                }
                CorruptionMarker::create(evidence.clone())?;
                markers_created += 1;
            }
        }
        Ok(IntegrityReport {
            checked_at: Utc::now(),
            findings,
            markers_created,
        })
    }

    /// Restore every marked or currently failing record from its backups
    pub fn repair_corruption(&self) -> Result<RepairReport> {
        let start = Instant::now();
        log_op_start!("repair_corruption");

        let result = self.repair_inner();
        match &result {
            Ok(report) => {
                log_op_end!(
                    "repair_corruption",
                    duration_ms = start.elapsed().as_millis() as u64,
                    repaired = report.repaired.len() as u64,
                    unrepaired = report.unrepaired.len() as u64
                );
            }
            Err(e) => {
                log_op_error!("repair_corruption", e, duration_ms = start.elapsed().as_millis() as u64);
            }
        }
        result
    }

    fn repair_inner(&self) -> Result<RepairReport> {
        let backups_dir = self.layout.backups_dir();
        let mut targets: BTreeSet<PathBuf> = CorruptionMarker::list_in(self.layout.root())?
            .into_iter()
            .map(|m| m.evidence().path().to_path_buf())
            .filter(|p| !p.starts_with(&backups_dir))
            .collect();
        targets.extend(
            self.coordinator
                .verify_all()?
                .into_iter()
                .map(|e| e.path().to_path_buf()),
        );

        let mut report = RepairReport::default();
        for path in targets {
            let outcome = self.coordinator.repair_from_backup(&path)?;
            match outcome {
                RepairOutcome::Restored { .. } => report.repaired.push(path),
                RepairOutcome::NoBackup => report.unrepaired.push(UnrepairedFile {
                    path,
                    reason: "no backup available".to_string(),
                }),
                RepairOutcome::BackupCorrupt { tried } => report.unrepaired.push(UnrepairedFile {
                    path,
                    reason: format!("none of {} backups verifies", tried),
                }),
            }
        }
        Ok(report)
    }

    /// Remove crash leftovers and list resumable streaming sessions
    pub fn recover(&self) -> Result<RecoveryReport> {
        recover_on_startup(&self.layout, self.coordinator.locks(), self.config.lock_timeout())
    }

    /// Persist the attached monitor's history to `memory/<operation>.memory.json`
    pub fn save_memory_report(&self) -> Result<Option<PathBuf>> {
        let Some(monitor) = &self.monitor else {
            return Ok(None);
        };
        let name = report_name(&monitor.get_memory_status().operation);
        let path = self.layout.memory_dir().join(format!("{}.memory.json", name));
        monitor.save_to_disk(&path)?;
        Ok(Some(path))
    }

    pub fn stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();
        for kind in RecordKind::ALL {
            let ids = self.coordinator.list_record_ids(kind)?;
            for id in &ids {
                let path = self.layout.record_path(kind, id)?;
                stats.total_record_bytes += file_len(&path)?;
            }
            stats.records.insert(kind.dir_name().to_string(), ids.len() as u64);
        }
        stats.backups = self.backups.list_backups()?.len() as u64;
        stats.corruption_markers = CorruptionMarker::list_in(self.layout.root())?.len() as u64;
        stats.resumable_sessions = list_resumable(&self.layout)?.len() as u64;
        stats.recent_transactions = self.coordinator.recent_transactions().len() as u64;
        Ok(stats)
    }

    /// Full backup of the store into `backups/`
    pub fn create_backup(&self, backup_id: Option<&str>) -> Result<BackupManifest> {
        if let Some(id) = backup_id {
            validate_id("backup", id)?;
        }
        self.backups.create_full_backup(self.layout.root(), backup_id)
    }

    /// Incremental backup of the store on top of `parent_id`
    pub fn create_incremental_backup(
        &self,
        parent_id: &str,
        backup_id: Option<&str>,
    ) -> Result<BackupManifest> {
        if parent_id.is_empty() {
            return Err(invalid_input("parent backup id is empty"));
        }
        self.backups
            .create_incremental_backup(self.layout.root(), parent_id, backup_id)
    }
}

fn file_len(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| io_error("stat_record", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> EvidenceStorage {
        EvidenceStorage::open(StorageConfig::with_root(dir.path())).unwrap()
    }

    #[test]
    fn test_session_metadata_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = open_store(&dir);
        let ctx = InvestigationContext::new("/srv/project");

        let id = storage
            .save_session(&ctx, json!({"question": "why is the build slow"}))
            .unwrap();

        assert_eq!(id, ctx.session_id.as_str());
        let meta = storage.load_session_metadata(&id).unwrap();
        assert_eq!(meta.investigation_id, ctx.investigation_id.as_str());
        assert_eq!(meta.root_path, PathBuf::from("/srv/project"));
        assert_eq!(meta.metadata["question"], "why is the build slow");
        assert_eq!(storage.list_sessions().unwrap(), vec![id]);
    }

    #[test]
    fn test_records_get_kind_prefixed_ids() {
        let dir = TempDir::new().unwrap();
        let storage = open_store(&dir);
        let ctx = InvestigationContext::new("/srv/project");

        let obs = storage.save_observation(&ctx, vec![json!({"line": 1})]).unwrap();
        let question = storage.save_question(&ctx, json!({"text": "who calls this?"})).unwrap();
        let pattern = storage.save_pattern(&ctx, json!({"name": "retry loop"})).unwrap();

        assert!(obs.starts_with("obs_"));
        assert!(question.starts_with("qst_"));
        assert!(pattern.starts_with("pat_"));
        let record = storage.load_record(RecordKind::Question, &question).unwrap();
        assert_eq!(record.payload["text"], "who calls this?");
    }

    #[test]
    fn test_verify_mark_and_repair() {
        let dir = TempDir::new().unwrap();
        let storage = open_store(&dir);
        let ctx = InvestigationContext::new("/srv/project");
        let id = storage.save_session(&ctx, json!({"rev": 1})).unwrap();
        storage.save_session(&ctx, json!({"rev": 2})).unwrap();
        assert!(storage.verify_storage_integrity(false).unwrap().is_clean());

        let path = storage.layout().record_path(RecordKind::Session, &id).unwrap();
        fs::write(&path, b"{\"id\": \"trunc").unwrap();

        let report = storage.verify_storage_integrity(true).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.markers_created, 1);
        assert!(CorruptionMarker::exists(&path));

        let repair = storage.repair_corruption().unwrap();
        assert_eq!(repair.repaired, vec![path.clone()]);
        assert!(repair.unrepaired.is_empty());
        assert!(!CorruptionMarker::exists(&path));
        assert_eq!(storage.load_session_metadata(&id).unwrap().metadata["rev"], 1);
        assert!(storage.verify_storage_integrity(false).unwrap().is_clean());
    }

    #[test]
    fn test_repair_without_backup_is_reported() {
        let dir = TempDir::new().unwrap();
        let storage = open_store(&dir);
        let ctx = InvestigationContext::new("/srv/project");
        let id = storage.save_pattern(&ctx, json!({"name": "x"})).unwrap();
        let path = storage.layout().record_path(RecordKind::Pattern, &id).unwrap();
        fs::write(&path, b"garbage").unwrap();

        let repair = storage.repair_corruption().unwrap();

        assert!(repair.repaired.is_empty());
        assert_eq!(repair.unrepaired.len(), 1);
        assert_eq!(repair.unrepaired[0].reason, "no backup available");
    }

    #[test]
    fn test_stats_counts_records_and_backups() {
        let dir = TempDir::new().unwrap();
        let storage = open_store(&dir);
        let ctx = InvestigationContext::new("/srv/project");
        storage.save_session(&ctx, json!({})).unwrap();
        storage.save_question(&ctx, json!({"text": "a"})).unwrap();
        storage.save_question(&ctx, json!({"text": "b"})).unwrap();
        storage.create_backup(Some("nightly")).unwrap();

        let stats = storage.stats().unwrap();

        assert_eq!(stats.records["sessions"], 1);
        assert_eq!(stats.records["questions"], 2);
        assert_eq!(stats.records["patterns"], 0);
        assert_eq!(stats.backups, 1);
        assert_eq!(stats.recent_transactions, 3);
        assert!(stats.total_record_bytes > 0);
    }

    #[test]
    fn test_memory_report_requires_monitor() {
        let dir = TempDir::new().unwrap();
        let storage = open_store(&dir);
        assert!(storage.save_memory_report().unwrap().is_none());
    }

    #[test]
    fn test_report_name_is_file_safe() {
        assert_eq!(report_name("streaming_observation"), "streaming_observation");
        assert_eq!(report_name("scan ../etc"), "scan____etc");
        assert_eq!(report_name(""), "operation");
    }
}
