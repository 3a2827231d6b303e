use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using StorageError
pub type Result<T> = std::result::Result<T, StorageError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// This taxonomy provides a stable, structured classification of all errors
/// in the Evidex system. Each kind maps to a stable error code that can be
/// used for programmatic error handling, testing, and operator reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Structural/Validation
    InvalidInput,
    NotFound,
    AlreadyExists,
    MissingDirectory,

    // Atomic write path
    TempFileCreation,
    TempFileWrite,
    Sync,
    AtomicRename,

    // Preflight
    InsufficientSpace,
    /// Another writer holds the target lock past the wait budget
    Concurrency,

    // Integrity
    /// Post-write read-back did not reproduce the written checksum
    VerificationFailed,
    /// A backup or record failed checksum verification
    ChecksumMismatch,
    /// A manifest is missing, unparseable or references a missing parent
    InvalidManifest,

    // Resources
    MemoryPressure,

    // Recovery
    CorruptedState,
    CannotRecover,

    // Integration/IO
    Io,
    Serialization,
    Persistence,
    Config,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::MissingDirectory => "ERR_MISSING_DIRECTORY",
            ExErrorKind::TempFileCreation => "ERR_TEMP_FILE_CREATION",
            ExErrorKind::TempFileWrite => "ERR_TEMP_FILE_WRITE",
            ExErrorKind::Sync => "ERR_SYNC",
            ExErrorKind::AtomicRename => "ERR_ATOMIC_RENAME",
            ExErrorKind::InsufficientSpace => "ERR_INSUFFICIENT_SPACE",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::VerificationFailed => "ERR_VERIFICATION_FAILED",
            ExErrorKind::ChecksumMismatch => "ERR_CHECKSUM_MISMATCH",
            ExErrorKind::InvalidManifest => "ERR_INVALID_MANIFEST",
            ExErrorKind::MemoryPressure => "ERR_MEMORY_PRESSURE",
            ExErrorKind::CorruptedState => "ERR_CORRUPTED_STATE",
            ExErrorKind::CannotRecover => "ERR_CANNOT_RECOVER",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Config => "ERR_CONFIG",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// This error type provides a structured representation of errors with
/// classification fields for programmatic handling and rich context for debugging.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    session_id: Option<String>,
    record_id: Option<String>,
    path: Option<PathBuf>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            session_id: None,
            record_id: None,
            path: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add session ID context
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Add record ID context
    pub fn with_record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }

    /// Add path context
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the session ID context, if any
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Get the record ID context, if any
    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    /// Get the path context, if any
    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(session_id) = &self.session_id {
            write!(f, " (session_id: {})", session_id)?;
        }
        if let Some(record_id) = &self.record_id {
            write!(f, " (record_id: {})", record_id)?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Error taxonomy for evidence storage operations
///
/// Write-path failures are typed per stage so callers can tell a failed
/// temp-file creation from a failed rename. Corruption findings are not
/// errors; they are reported as evidence by the verification routines.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    // ===== Atomic write path =====
    /// Parent directory of the target does not exist
    #[error("Parent directory does not exist: {}", path.display())]
    MissingDirectory { path: PathBuf },

    /// Temporary sibling file could not be created
    #[error("Failed to create temp file for {}: {reason}", path.display())]
    TempFileCreation { path: PathBuf, reason: String },

    /// Payload could not be written into the temporary file
    #[error("Failed to write temp file for {}: {reason}", path.display())]
    TempFileWrite { path: PathBuf, reason: String },

    /// fsync of the temp file or its parent directory failed
    #[error("Failed to sync {}: {reason}", path.display())]
    Sync { path: PathBuf, reason: String },

    /// Rename of the temp file onto the target failed
    #[error("Failed to rename temp file onto {}: {reason}", path.display())]
    AtomicRename { path: PathBuf, reason: String },

    // ===== Preflight =====
    /// Not enough free space for temp file plus final file
    #[error("Insufficient disk space for {}: need {required} bytes, {available} available", path.display())]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Target lock is held by another live writer
    #[error("Concurrent write on {}: lock held by pid {holder_pid:?}, waited {waited_ms} ms", path.display())]
    ConcurrentWrite {
        path: PathBuf,
        holder_pid: Option<u32>,
        waited_ms: u64,
    },

    // ===== Integrity =====
    /// Read-back after write did not match what was written
    #[error("Verification failed for {}: expected {expected}, got {actual}", path.display())]
    VerificationFailed {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Wrapping error raised by the transaction coordinator
    #[error("Transactional storage error in {op}: {source}")]
    Transactional {
        op: String,
        record_id: Option<String>,
        #[source]
        source: Box<StorageError>,
    },

    // ===== Backups =====
    /// No manifest exists for the given backup id
    #[error("Backup not found: {backup_id}")]
    BackupNotFound { backup_id: String },

    /// Backup already exists under the requested id
    #[error("Backup already exists: {backup_id}")]
    BackupExists { backup_id: String },

    /// Backup content disagrees with its manifest
    #[error("Backup {backup_id} failed verification: expected {expected}, got {actual}")]
    BackupCorrupt {
        backup_id: String,
        expected: String,
        actual: String,
    },

    /// Incremental backup references a parent that no longer exists
    #[error("Backup {backup_id} references missing parent {parent_id}")]
    BackupChainBroken {
        backup_id: String,
        parent_id: String,
    },

    // ===== Resources =====
    /// Critical memory threshold crossed during a streaming scan
    #[error("Memory pressure: rss {rss_mb} MB crossed critical threshold {critical_mb} MB")]
    MemoryPressure { rss_mb: u64, critical_mb: u64 },

    // ===== Generic =====
    /// Target file or directory was not found
    #[error("Not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Caller supplied an unusable argument
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Filesystem failure outside the atomic write path
    #[error("I/O error during {op} on {}: {reason}", path.display())]
    Io {
        op: String,
        path: PathBuf,
        reason: String,
    },

    /// JSON encoding or decoding failed
    #[error("Serialization error ({context}): {reason}")]
    Serialization { context: String, reason: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Session resume failed
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

impl StorageError {
    /// Wrap this error as a coordinator failure
    pub fn into_transactional(self, op: impl Into<String>, record_id: Option<String>) -> Self {
        match self {
            already @ StorageError::Transactional { .. } => already,
            other => StorageError::Transactional {
                op: op.into(),
                record_id,
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, looking through `Transactional` wrappers
    pub fn root_cause(&self) -> &StorageError {
        match self {
            StorageError::Transactional { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the failure happened before the target was touched
    pub fn is_preflight(&self) -> bool {
        matches!(
            self.root_cause(),
            StorageError::InsufficientSpace { .. } | StorageError::ConcurrentWrite { .. }
        )
    }

    /// Canonical kind of this error
    pub fn kind(&self) -> ExErrorKind {
        ExError::from(self.clone()).kind()
    }
}

/// Errors raised while resuming an interrupted streaming session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecoveryError {
    /// A resume point exists but its state is inconsistent
    #[error("Session {session_id} has corrupted resume state: {reason}")]
    CorruptedState { session_id: String, reason: String },

    /// No usable resume point exists
    #[error("Cannot recover session {session_id}: {reason}")]
    CannotRecover { session_id: String, reason: String },
}

impl From<RecoveryError> for ExError {
    fn from(err: RecoveryError) -> Self {
        match err {
            RecoveryError::CorruptedState { session_id, reason } => {
                ExError::new(ExErrorKind::CorruptedState)
                    .with_session_id(session_id)
                    .with_op("resume_session")
                    .with_message(reason)
            }
            RecoveryError::CannotRecover { session_id, reason } => {
                ExError::new(ExErrorKind::CannotRecover)
                    .with_session_id(session_id)
                    .with_op("resume_session")
                    .with_message(reason)
            }
        }
    }
}

/// Conversion from StorageError to ExError
///
/// Used by the logging macros and by operator-facing reports, which only
/// deal in stable error codes.
impl From<StorageError> for ExError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::MissingDirectory { path } => {
                ExError::new(ExErrorKind::MissingDirectory).with_path(path)
            }
            StorageError::TempFileCreation { path, .. } => {
                ExError::new(ExErrorKind::TempFileCreation).with_path(path)
            }
            StorageError::TempFileWrite { path, .. } => {
                ExError::new(ExErrorKind::TempFileWrite).with_path(path)
            }
            StorageError::Sync { path, .. } => ExError::new(ExErrorKind::Sync).with_path(path),
            StorageError::AtomicRename { path, .. } => {
                ExError::new(ExErrorKind::AtomicRename).with_path(path)
            }
            StorageError::InsufficientSpace { path, .. } => {
                ExError::new(ExErrorKind::InsufficientSpace)
                    .with_op("preflight_space")
                    .with_path(path)
            }
            StorageError::ConcurrentWrite { path, .. } => ExError::new(ExErrorKind::Concurrency)
                .with_op("acquire_lock")
                .with_path(path),
            StorageError::VerificationFailed { path, .. } => {
                ExError::new(ExErrorKind::VerificationFailed)
                    .with_op("verify_write")
                    .with_path(path)
            }
            StorageError::Transactional {
                op,
                record_id,
                source,
            } => {
                let inner = ExError::from(*source);
                let mut ex = ExError::new(inner.kind()).with_op(op);
                if let Some(id) = record_id {
                    ex = ex.with_record_id(id);
                }
                if let Some(path) = inner.path() {
                    ex = ex.with_path(path.to_path_buf());
                }
                return ex.with_message(message).with_source(inner);
            }
            StorageError::BackupNotFound { backup_id } => ExError::new(ExErrorKind::NotFound)
                .with_op("load_backup")
                .with_record_id(backup_id),
            StorageError::BackupExists { backup_id } => ExError::new(ExErrorKind::AlreadyExists)
                .with_op("create_backup")
                .with_record_id(backup_id),
            StorageError::BackupCorrupt { backup_id, .. } => {
                ExError::new(ExErrorKind::ChecksumMismatch)
                    .with_op("verify_backup")
                    .with_record_id(backup_id)
            }
            StorageError::BackupChainBroken { backup_id, .. } => {
                ExError::new(ExErrorKind::InvalidManifest)
                    .with_op("resolve_backup_chain")
                    .with_record_id(backup_id)
            }
            StorageError::MemoryPressure { .. } => ExError::new(ExErrorKind::MemoryPressure),
            StorageError::NotFound { path } => ExError::new(ExErrorKind::NotFound).with_path(path),
            StorageError::InvalidInput { .. } => ExError::new(ExErrorKind::InvalidInput),
            StorageError::Io { op, path, .. } => {
                ExError::new(ExErrorKind::Io).with_op(op).with_path(path)
            }
            StorageError::Serialization { .. } => ExError::new(ExErrorKind::Serialization),
            StorageError::Config { .. } => ExError::new(ExErrorKind::Config),
            StorageError::Recovery(inner) => return ExError::from(inner),
        }
        .with_message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_unique_code() {
        let kinds = [
            ExErrorKind::InvalidInput,
            ExErrorKind::NotFound,
            ExErrorKind::AlreadyExists,
            ExErrorKind::MissingDirectory,
            ExErrorKind::TempFileCreation,
            ExErrorKind::TempFileWrite,
            ExErrorKind::Sync,
            ExErrorKind::AtomicRename,
            ExErrorKind::InsufficientSpace,
            ExErrorKind::Concurrency,
            ExErrorKind::VerificationFailed,
            ExErrorKind::ChecksumMismatch,
            ExErrorKind::InvalidManifest,
            ExErrorKind::MemoryPressure,
            ExErrorKind::CorruptedState,
            ExErrorKind::CannotRecover,
            ExErrorKind::Io,
            ExErrorKind::Serialization,
            ExErrorKind::Persistence,
            ExErrorKind::Config,
            ExErrorKind::Internal,
        ];
        let mut codes: Vec<_> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_transactional_wrapping_is_idempotent() {
        let inner = StorageError::InsufficientSpace {
            path: PathBuf::from("/tmp/x"),
            required: 10,
            available: 1,
        };
        let wrapped = inner
            .clone()
            .into_transactional("write_record", Some("rec".into()))
            .into_transactional("outer", None);

        match &wrapped {
            StorageError::Transactional { op, .. } => assert_eq!(op, "write_record"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(wrapped.root_cause(), &inner);
        assert!(wrapped.is_preflight());
    }

    #[test]
    fn test_transactional_keeps_inner_kind() {
        let err = StorageError::ConcurrentWrite {
            path: PathBuf::from("/tmp/a.json"),
            holder_pid: Some(7),
            waited_ms: 30_000,
        }
        .into_transactional("write_record", Some("obs_1".into()));

        let ex: ExError = err.into();
        assert_eq!(ex.kind(), ExErrorKind::Concurrency);
        assert_eq!(ex.record_id(), Some("obs_1"));
        assert_eq!(ex.op(), Some("write_record"));
        assert!(ex.source_error().is_some());
    }

    #[test]
    fn test_recovery_error_maps_to_recovery_kinds() {
        let err: StorageError = RecoveryError::CannotRecover {
            session_id: "s1".into(),
            reason: "no manifest".into(),
        }
        .into();

        let ex: ExError = err.into();
        assert_eq!(ex.kind(), ExErrorKind::CannotRecover);
        assert_eq!(ex.session_id(), Some("s1"));
    }
}
