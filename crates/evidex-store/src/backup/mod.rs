//! Directory backups
//!
//! Provides:
//! - Full snapshots of a directory tree with a per-file manifest
//! - Incremental snapshots chained to a parent by id
//! - Restore that verifies the whole chain before copying anything
//! - Retention cleanup that never orphans a referenced parent

mod manager;
mod manifest;

pub use manager::BackupManager;
pub use manifest::{BackupManifest, BackupVerification, FileEntry, RestoreSummary};
