//! Evidex Store - durable evidence storage on a local filesystem
//!
//! Provides:
//! - Atomic file writes (temp file, fsync, rename, directory fsync)
//! - Corruption detection and persistent corruption markers
//! - Transactional record writes with locking, backups and verification
//! - Full and incremental directory backups with verified restore
//! - Streaming, resumable observation sessions for very large scans
//! - Memory-pressure monitoring that gates streaming mode
//! - The `EvidenceStorage` facade used by investigation collaborators

pub mod atomic;
pub mod backup;
pub mod checksum;
pub mod corruption;
pub mod errors;
pub mod layout;
pub mod memory;
pub mod recovery;
pub mod storage;
pub mod streaming;
pub mod transaction;

// Re-export key types
pub use atomic::{read_atomic, write_atomic, AtomicFileWriter, StreamingWriteHandle};
pub use backup::{BackupManager, BackupManifest};
pub use corruption::{CorruptionDetector, CorruptionEvidence, CorruptionKind, CorruptionMarker};
pub use errors::Result;
pub use layout::{RecordKind, StorageLayout};
pub use memory::{MemoryMonitor, MemorySnapshot};
pub use recovery::{recover_on_startup, RecoveryReport};
pub use storage::{EvidenceStorage, IntegrityReport, RepairReport, SessionMetadata, StorageStats};
pub use streaming::{StreamingManifest, StreamingObservationSession};
pub use transaction::{EvidenceRecord, RepairOutcome, TransactionCoordinator, WriteTransaction};
