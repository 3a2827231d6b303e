// Integration tests for writers sharing one storage root
// Covers: stale-lock reclamation under contention, backup index updates,
// coordinators writing the same record

mod common;

use common::OnlySelf;
use evidex_core::StorageConfig;
use evidex_store::transaction::{LockInfo, LockManager};
use evidex_store::{BackupManager, RecordKind, StorageLayout, TransactionCoordinator};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const CONTENDERS: usize = 6;

fn lock_manager(dir: &Path) -> LockManager {
    LockManager::new(
        dir,
        Duration::from_secs(10),
        Duration::from_millis(1),
        Arc::new(OnlySelf),
    )
}

#[test]
fn test_contended_stale_lock_has_one_holder_at_a_time() {
    // Given: A lock left by a dead process and six contenders with their own managers
    let dir = TempDir::new().unwrap();
    let target = Path::new("shared.session.json");
    let lock_path = lock_manager(dir.path()).lock_path(target);
    let holders = Arc::new(AtomicUsize::new(0));
    let max_holders = Arc::new(AtomicUsize::new(0));

    for _ in 0..40 {
        let stale = LockInfo::new(999_999, "shared");
        fs::write(&lock_path, serde_json::to_vec(&stale).unwrap()).unwrap();
        let barrier = Arc::new(Barrier::new(CONTENDERS));

        // When: They all race for it
        let handles: Vec<_> = (0..CONTENDERS)
            .map(|_| {
                let dir = dir.path().to_path_buf();
                let barrier = Arc::clone(&barrier);
                let holders = Arc::clone(&holders);
                let max_holders = Arc::clone(&max_holders);
                thread::spawn(move || {
                    let locks = lock_manager(&dir);
                    barrier.wait();
                    let guard = locks.acquire(target).unwrap();
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_holders.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    holders.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    // Then: Nobody ever shared the lock and nothing is left behind
    assert_eq!(max_holders.load(Ordering::SeqCst), 1);
    assert!(!lock_path.exists());
    let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_guard_leaves_a_lock_it_no_longer_owns() {
    // Given: A held lock whose file was replaced by another owner's stamp
    let dir = TempDir::new().unwrap();
    let locks = lock_manager(dir.path());
    let target = Path::new("a.question.json");
    let guard = locks.acquire(target).unwrap();
    let other = LockInfo::new(std::process::id(), "a");
    fs::write(guard.path(), serde_json::to_vec(&other).unwrap()).unwrap();

    // When: The original guard is released
    drop(guard);

    // Then: The other owner's lock survives
    let survivor: LockInfo = serde_json::from_slice(&fs::read(locks.lock_path(target)).unwrap()).unwrap();
    assert_eq!(survivor.token, other.token);
}

#[test]
fn test_parallel_backup_managers_register_every_backup() {
    // Given: One source tree and four managers over the same backup root
    let source = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    for name in ["a.json", "b.json", "nested/c.json"] {
        let path = source.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, name.as_bytes()).unwrap();
    }

    // When: Each creates ten full backups concurrently
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let source = source.path().to_path_buf();
            let root = backups.path().to_path_buf();
            thread::spawn(move || {
                let manager = BackupManager::new(root);
                for _ in 0..10 {
                    manager.create_full_backup(&source, None).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Then: All forty are in the index and every directory on disk is registered
    let manager = BackupManager::new(backups.path());
    let listed = manager.list_backups().unwrap();
    assert_eq!(listed.len(), 40);
    let dirs = fs::read_dir(backups.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(dirs, 40);
    for manifest in &listed {
        assert!(manager.verify_backup(&manifest.backup_id).unwrap().valid);
    }
}

#[test]
fn test_coordinators_sharing_a_root_serialize_writes() {
    // Given: Four coordinators on one root
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::with_root(dir.path());

    // When: Each overwrites the same record repeatedly
    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let config = config.clone();
            thread::spawn(move || {
                let coordinator =
                    TransactionCoordinator::open(StorageLayout::new(&config.root), &config).unwrap();
                for n in 0..10 {
                    coordinator
                        .write_record(
                            RecordKind::Session,
                            json!({"writer": writer, "n": n, "weight": 0.1 * n as f64}),
                            "shared",
                            Some("shared"),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Then: The record and its retained backups all verify
    let coordinator = TransactionCoordinator::open(StorageLayout::new(dir.path()), &config).unwrap();
    assert!(coordinator.verify_all().unwrap().is_empty());
    let record = coordinator.read_record(RecordKind::Session, "shared").unwrap();
    assert!(record.checksum_matches());
    assert_eq!(record.payload["n"], 9);
    let path = coordinator.layout().record_path(RecordKind::Session, "shared").unwrap();
    assert_eq!(coordinator.record_backups(&path).unwrap().len(), config.record_backup_keep);
    assert!(!coordinator.locks().lock_path(&path).exists());
}
