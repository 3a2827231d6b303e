// Integration tests for full and incremental backups

use evidex_core::StorageError;
use evidex_store::BackupManager;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn populate(dir: &Path, count: usize) {
    for i in 0..count {
        let sub = dir.join(format!("group{}", i % 3));
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(format!("file{}.json", i)), format!("{{\"n\": {}}}", i)).unwrap();
    }
}

fn read_tree(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = walkdir_files(dir)
        .into_iter()
        .map(|p| {
            let rel = p.strip_prefix(dir).unwrap().to_string_lossy().replace('\\', "/");
            (rel, fs::read(&p).unwrap())
        })
        .collect();
    files.sort();
    files
}

fn walkdir_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.extend(walkdir_files(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[test]
fn test_full_backup_counts_files() {
    // Given: A source with three files
    let source = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    populate(source.path(), 3);
    let manager = BackupManager::new(backups.path());

    // When: We take a full backup
    let manifest = manager.create_full_backup(source.path(), Some("b1")).unwrap();

    // Then: The manifest describes all three files
    assert_eq!(manifest.file_count, 3);
    assert!(!manifest.incremental);
    assert_eq!(manifest.checksum.len(), 64);
    assert!(manager.verify_backup("b1").unwrap().valid);
}

#[test]
fn test_full_restore_is_byte_identical() {
    // Given: A full backup of a populated source
    let source = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    populate(source.path(), 7);
    let manager = BackupManager::new(backups.path());
    manager.create_full_backup(source.path(), Some("full")).unwrap();

    // When: We restore into an empty directory
    let summary = manager.restore_backup("full", target.path()).unwrap();

    // Then: The restored tree equals the source
    assert_eq!(summary.files_restored, 7);
    assert_eq!(read_tree(target.path()), read_tree(source.path()));
}

#[test]
fn test_incremental_holds_only_changes_and_restores_chain() {
    // Given: Ten files with a full backup
    let source = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    populate(source.path(), 10);
    let manager = BackupManager::new(backups.path());
    manager.create_full_backup(source.path(), Some("base")).unwrap();

    // When: One file changes and we take an incremental backup
    fs::write(source.path().join("group1/file4.json"), b"{\"n\": 4, \"edited\": true}").unwrap();
    let inc = manager
        .create_incremental_backup(source.path(), "base", Some("inc1"))
        .unwrap();

    // Then: Only that file is in the incremental
    assert!(inc.incremental);
    assert_eq!(inc.parent_id.as_deref(), Some("base"));
    assert_eq!(inc.file_count, 1);
    assert!(inc.files.contains_key("group1/file4.json"));

    // And: Restoring it replays the chain into the current state
    let summary = manager.restore_backup("inc1", target.path()).unwrap();
    assert_eq!(summary.chain, vec!["base".to_string(), "inc1".to_string()]);
    assert_eq!(read_tree(target.path()), read_tree(source.path()));
}

#[test]
fn test_tampered_backup_is_not_restored() {
    // Given: A backup whose stored copy was altered
    let source = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    populate(source.path(), 2);
    let manager = BackupManager::new(backups.path());
    manager.create_full_backup(source.path(), Some("b")).unwrap();
    fs::write(manager.backup_dir("b").join("group0/file0.json"), b"tampered").unwrap();

    // When: We try to restore it
    let err = manager.restore_backup("b", target.path()).unwrap_err();

    // Then: Verification fails and the target stays empty
    assert!(matches!(err, StorageError::BackupCorrupt { .. }));
    assert!(fs::read_dir(target.path()).unwrap().next().is_none());
    assert!(!manager.verify_backup("b").unwrap().valid);
}

#[test]
fn test_duplicate_and_unknown_ids() {
    // Given: One backup
    let source = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    populate(source.path(), 1);
    let manager = BackupManager::new(backups.path());
    manager.create_full_backup(source.path(), Some("only")).unwrap();

    // When / Then: Reusing the id or asking for an unknown one fails
    assert!(matches!(
        manager.create_full_backup(source.path(), Some("only")),
        Err(StorageError::BackupExists { .. })
    ));
    assert!(matches!(
        manager.get_manifest("missing"),
        Err(StorageError::BackupNotFound { .. })
    ));
}

#[test]
fn test_staged_restore_replaces_whole_directory() {
    // Given: A backup and a target holding an unrelated file
    let source = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    let outer = TempDir::new().unwrap();
    populate(source.path(), 4);
    let manager = BackupManager::new(backups.path());
    manager.create_full_backup(source.path(), Some("snap")).unwrap();
    let target = outer.path().join("store");
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("stray.txt"), b"left over").unwrap();

    // When: We restore through a staging directory
    manager.restore_backup_staged("snap", &target).unwrap();

    // Then: The target matches the backup exactly, and no staging dirs remain
    assert_eq!(read_tree(&target), read_tree(source.path()));
    let leftovers: Vec<_> = fs::read_dir(outer.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_cleanup_keeps_most_recent() {
    // Given: Three backups
    let source = TempDir::new().unwrap();
    let backups = TempDir::new().unwrap();
    populate(source.path(), 1);
    let manager = BackupManager::new(backups.path());
    for id in ["a", "b", "c"] {
        manager.create_full_backup(source.path(), Some(id)).unwrap();
    }

    // When: Everything older than zero days is eligible, but one is kept
    let deleted = manager.cleanup_old_backups(1, 0).unwrap();

    // Then: Only the newest survives
    assert_eq!(deleted.len(), 2);
    let remaining: Vec<String> = manager.list_backups().unwrap().into_iter().map(|m| m.backup_id).collect();
    assert_eq!(remaining, vec!["c".to_string()]);
    assert!(!manager.backup_dir("a").exists());
}
