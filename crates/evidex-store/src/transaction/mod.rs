//! Transactional record writes
//!
//! The coordinator wraps the atomic writer with:
//! - PID-stamped cross-process locks under `.locks/`
//! - a free-space preflight (temp file plus final file)
//! - a timestamped backup of the record being replaced
//! - read-back checksum verification
//! - a bounded in-memory transaction log

mod coordinator;
mod lock;
mod log;
pub mod platform;
mod record;

pub use coordinator::{RepairOutcome, TransactionCoordinator};
pub use lock::{LockGuard, LockInfo, LockManager};
pub use log::WriteTransaction;
pub use platform::{ProcessLiveness, SpaceProbe, SystemLiveness, SystemSpaceProbe};
pub use record::{EvidenceRecord, RECORD_SCHEMA_VERSION};
