//! Error handling for evidex-store
//!
//! Wraps evidex-core StorageError with store-specific helpers

use std::path::Path;

pub use evidex_core::errors::{RecoveryError, StorageError};

/// Result type alias using StorageError
pub type Result<T> = std::result::Result<T, StorageError>;

/// Create an IO error outside the atomic write path
pub fn io_error(operation: &str, path: &Path, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return StorageError::NotFound {
            path: path.to_path_buf(),
        };
    }
    StorageError::Io {
        op: operation.to_string(),
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Create a serialization error
pub fn serialization_error(context: impl Into<String>, err: serde_json::Error) -> StorageError {
    StorageError::Serialization {
        context: context.into(),
        reason: err.to_string(),
    }
}

/// Create an invalid input error
pub fn invalid_input(reason: impl Into<String>) -> StorageError {
    StorageError::InvalidInput {
        reason: reason.into(),
    }
}

/// Create a backup checksum mismatch error
pub fn backup_corrupt(backup_id: &str, expected: &str, actual: &str) -> StorageError {
    StorageError::BackupCorrupt {
        backup_id: backup_id.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Reject ids that would escape their directory when used as a file name
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.starts_with('.')
        || id
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '\0' | ':') || c.is_control());
    if bad {
        return Err(invalid_input(format!("invalid {} id: {:?}", kind, id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_io_maps_to_not_found() {
        let err = io_error(
            "read",
            Path::new("/x"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("session", "abc-123_x").is_ok());
        assert!(validate_id("session", "").is_err());
        assert!(validate_id("session", "../etc").is_err());
        assert!(validate_id("session", "a/b").is_err());
        assert!(validate_id("session", ".hidden").is_err());
    }
}
