use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-file entry of a backup manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub size: u64,
    /// Source modification time, milliseconds since the Unix epoch
    pub modified_ms: i64,
    pub sha256: String,
}

/// Description of one backup
///
/// Written once when the backup completes and never changed afterwards.
/// An incremental backup holds only the files that changed since its
/// parent chain, plus the paths deleted since then.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub file_count: u64,
    pub total_size: u64,
    pub checksum: String,
    pub source_path: PathBuf,
    pub incremental: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<String>,
}

/// Contents of `backups/manifests.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct BackupIndex {
    #[serde(default)]
    pub(crate) backups: BTreeMap<String, BackupManifest>,
}

/// Outcome of [`verify_backup`](crate::backup::BackupManager::verify_backup)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupVerification {
    pub backup_id: String,
    pub valid: bool,
    pub expected_checksum: String,
    pub actual_checksum: String,
    pub expected_file_count: u64,
    pub actual_file_count: u64,
}

/// What a restore wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub backup_id: String,
    /// Backups replayed, parent first
    pub chain: Vec<String>,
    pub files_restored: u64,
    pub files_removed: u64,
}
