// Integration tests for the EvidenceStorage facade

use evidex_core::{MemoryConfig, StorageConfig};
use evidex_core_types::InvestigationContext;
use evidex_store::memory::{MemorySampler, MemoryUsage};
use evidex_store::{EvidenceStorage, MemoryMonitor, RecordKind};
use serde_json::json;
use std::io;
use std::sync::Arc;
use tempfile::TempDir;

struct HighSampler;

impl MemorySampler for HighSampler {
    fn sample(&self) -> io::Result<MemoryUsage> {
        Ok(MemoryUsage {
            rss_bytes: 4096 * 1024 * 1024,
            vms_bytes: 8192 * 1024 * 1024,
            total_bytes: None,
        })
    }
}

#[test]
fn test_open_lays_out_directories() {
    // Given: An empty root
    let dir = TempDir::new().unwrap();

    // When: Storage is opened
    let storage = EvidenceStorage::open(StorageConfig::with_root(dir.path())).unwrap();

    // Then: Every record directory and the support directories exist
    for kind in RecordKind::ALL {
        assert!(storage.layout().record_dir(kind).is_dir());
    }
    assert!(storage.layout().backups_dir().is_dir());
    assert!(storage.layout().locks_dir().is_dir());
    assert!(storage.layout().memory_dir().is_dir());
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = StorageConfig::with_root(dir.path());
    config.checkpoint_interval = 0;
    assert!(EvidenceStorage::open(config).is_err());
}

#[test]
fn test_same_observation_batch_is_stored_once() {
    // Given: A store and a context
    let dir = TempDir::new().unwrap();
    let storage = EvidenceStorage::open(StorageConfig::with_root(dir.path())).unwrap();
    let ctx = InvestigationContext::new(dir.path());

    // When: The same batch is saved twice
    let a = storage.save_observation(&ctx, vec![json!({"fact": 1})]).unwrap();
    let b = storage.save_observation(&ctx, vec![json!({"fact": 1})]).unwrap();

    // Then: Both saves name the same record
    assert_eq!(a, b);
    let ids = storage.coordinator().list_record_ids(RecordKind::Observation).unwrap();
    assert_eq!(ids, vec![a]);
}

#[test]
fn test_streaming_through_facade_and_resume() {
    // Given: A store with a small checkpoint interval
    let dir = TempDir::new().unwrap();
    let mut config = StorageConfig::with_root(dir.path());
    config.checkpoint_interval = 2;
    let storage = EvidenceStorage::open(config).unwrap();
    let ctx = InvestigationContext::new(dir.path());

    // When: Five files are streamed and the session is abandoned
    {
        let mut session = storage.create_streaming_observation(&ctx).unwrap();
        for i in 0..5 {
            session.write_file_observation(&format!("f{}.rs", i), vec![json!({"i": i})]).unwrap();
        }
    }

    // Then: Recovery lists it, and resume starts at the last checkpoint
    let report = storage.recover().unwrap();
    assert_eq!(report.resumable_sessions.len(), 1);
    let resumed = storage.resume_streaming_observation(ctx.session_id.as_str()).unwrap();
    assert_eq!(resumed.files_processed(), 4);
    resumed.finish().unwrap();
    assert!(storage.recover().unwrap().resumable_sessions.is_empty());
}

#[test]
fn test_monitor_emergency_snapshot_and_report() {
    // Given: A store whose monitor always reads critical
    let dir = TempDir::new().unwrap();
    let storage = EvidenceStorage::open(StorageConfig::with_root(dir.path())).unwrap();
    let memory = MemoryConfig {
        check_interval_files: 1,
        ..MemoryConfig::default()
    };
    let monitor = Arc::new(MemoryMonitor::new(memory, Arc::new(HighSampler)));
    let storage = storage.with_memory_monitor(monitor);
    let ctx = InvestigationContext::new(dir.path());

    // When: A streaming write crosses the threshold
    let mut session = storage.create_streaming_observation(&ctx).unwrap();
    assert!(session.write_file_observation("a.rs", vec![json!({})]).is_err());

    // Then: The emergency snapshot was written
    let emergency = storage.layout().memory_dir().join("streaming_observation.emergency.json");
    assert!(emergency.is_file());

    // And: The history report lands next to it
    let report = storage.save_memory_report().unwrap().unwrap();
    assert!(report.ends_with("streaming_observation.memory.json"));
    assert!(report.is_file());
}

#[test]
fn test_backup_of_store_excludes_backups_and_locks() {
    // Given: A store with records
    let dir = TempDir::new().unwrap();
    let storage = EvidenceStorage::open(StorageConfig::with_root(dir.path())).unwrap();
    let ctx = InvestigationContext::new(dir.path());
    storage.save_session(&ctx, json!({})).unwrap();
    storage.save_question(&ctx, json!({"text": "q"})).unwrap();

    // When: The store is backed up twice
    let first = storage.create_backup(Some("first")).unwrap();
    let second = storage.create_backup(Some("second")).unwrap();

    // Then: Neither backup contains backup or lock files
    assert_eq!(first.file_count, second.file_count);
    assert!(first.files.keys().all(|k| !k.starts_with("backups/") && !k.starts_with(".locks/")));
    assert!(first.files.keys().any(|k| k.starts_with("sessions/")));
}
