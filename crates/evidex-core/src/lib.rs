//! Evidex Core - error, logging and configuration facilities
//!
//! This crate provides the ambient foundation shared by the storage engine
//! and its command-line front end:
//! - Structured error facility (`ExError`) with stable error codes
//! - Typed storage and recovery errors
//! - Canonical logging facility built on `tracing`
//! - Storage configuration loadable from TOML

pub mod config;
pub mod errors;
pub mod logging_facility;

// Re-export commonly used types
pub use config::{BackupConfig, MemoryConfig, StorageConfig};
pub use errors::{ExError, ExErrorKind, RecoveryError, StorageError};
