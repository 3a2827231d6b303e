//! Storage configuration
//!
//! All settings have defaults, so an empty TOML document (or no file at all)
//! yields a working configuration rooted at `.evidex`.
//!
//! ```toml
//! root = "/var/lib/evidex"
//! lock_timeout_ms = 30000
//! record_backup_keep = 5
//!
//! [memory]
//! warning_threshold_mb = 1024
//! critical_threshold_mb = 2048
//!
//! [backup]
//! keep_count = 10
//! max_age_days = 30
//! ```

use crate::errors::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage root holding sessions/, observations/, backups/ etc.
    pub root: PathBuf,
    /// Maximum time to wait for a per-target lock
    pub lock_timeout_ms: u64,
    /// Poll interval while waiting for a lock
    pub lock_poll_interval_ms: u64,
    /// Streaming sessions persist a manifest every this many files
    pub checkpoint_interval: u64,
    /// Number of completed write transactions kept in memory
    pub transaction_log_capacity: usize,
    /// Read back and re-checksum every coordinator write
    pub verify_after_write: bool,
    /// Overwrite backups kept per record under `<kind>/.backups/`, newest first
    pub record_backup_keep: usize,
    pub memory: MemoryConfig,
    pub backup: BackupConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".evidex"),
            lock_timeout_ms: 30_000,
            lock_poll_interval_ms: 100,
            checkpoint_interval: 100,
            transaction_log_capacity: 256,
            verify_after_write: true,
            record_backup_keep: 5,
            memory: MemoryConfig::default(),
            backup: BackupConfig::default(),
        }
    }
}

/// Memory monitor thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// RSS above which chunked/streaming mode is forced
    pub warning_threshold_mb: u64,
    /// RSS above which an emergency save fires and scanning stops
    pub critical_threshold_mb: u64,
    /// Sample memory every this many tracked files
    pub check_interval_files: u64,
    /// Snapshots retained in the in-process history
    pub history_limit: usize,
    /// Scans expected to touch at least this many files stream by default
    pub streaming_file_threshold: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warning_threshold_mb: 1024,
            critical_threshold_mb: 2048,
            check_interval_files: 100,
            history_limit: 1000,
            streaming_file_threshold: 10_000,
        }
    }
}

/// Backup retention policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Most recent backups kept regardless of age
    pub keep_count: usize,
    /// Older backups beyond `keep_count` are deleted after this many days
    pub max_age_days: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            keep_count: 10,
            max_age_days: 30,
        }
    }
}

impl StorageConfig {
    /// Default configuration rooted at `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StorageConfig = toml::from_str(content).map_err(|e| StorageError::Config {
            reason: format!("invalid TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StorageError::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject settings that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval == 0 {
            return Err(StorageError::Config {
                reason: "checkpoint_interval must be at least 1".to_string(),
            });
        }
        if self.record_backup_keep == 0 {
            return Err(StorageError::Config {
                reason: "record_backup_keep must be at least 1".to_string(),
            });
        }
        if self.lock_poll_interval_ms == 0 {
            return Err(StorageError::Config {
                reason: "lock_poll_interval_ms must be at least 1".to_string(),
            });
        }
        if self.memory.check_interval_files == 0 {
            return Err(StorageError::Config {
                reason: "memory.check_interval_files must be at least 1".to_string(),
            });
        }
        if self.memory.warning_threshold_mb > self.memory.critical_threshold_mb {
            return Err(StorageError::Config {
                reason: format!(
                    "memory.warning_threshold_mb ({}) exceeds critical_threshold_mb ({})",
                    self.memory.warning_threshold_mb, self.memory.critical_threshold_mb
                ),
            });
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = StorageConfig::from_toml_str("").unwrap();
        assert_eq!(config, StorageConfig::default());
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.lock_poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = StorageConfig::from_toml_str(
            r#"
root = "/data/evidex"

[memory]
critical_threshold_mb = 4096
"#,
        )
        .unwrap();

        assert_eq!(config.root, PathBuf::from("/data/evidex"));
        assert_eq!(config.memory.critical_threshold_mb, 4096);
        assert_eq!(config.memory.warning_threshold_mb, 1024);
        assert_eq!(config.backup.keep_count, 10);
    }

    #[test]
    fn test_record_backup_keep_must_be_positive() {
        let err = StorageConfig::from_toml_str("record_backup_keep = 0").unwrap_err();
        assert!(err.to_string().contains("record_backup_keep"));
        assert_eq!(StorageConfig::default().record_backup_keep, 5);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let result = StorageConfig::from_toml_str(
            r#"
[memory]
warning_threshold_mb = 4000
critical_threshold_mb = 1000
"#,
        );
        assert!(matches!(result, Err(StorageError::Config { .. })));
    }

    #[test]
    fn test_zero_checkpoint_interval_rejected() {
        let result = StorageConfig::from_toml_str("checkpoint_interval = 0");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("evidex.toml");
        std::fs::write(&path, "lock_timeout_ms = 500\n").unwrap();

        let config = StorageConfig::load(&path).unwrap();
        assert_eq!(config.lock_timeout_ms, 500);
    }
}
