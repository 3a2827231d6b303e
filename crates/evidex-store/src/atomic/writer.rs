use crate::atomic::StreamingWriteHandle;
use crate::errors::{io_error, serialization_error, Result};
use crate::layout::TEMP_SUFFIX;
use evidex_core::errors::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Writes whole files atomically
///
/// The parent directory must already exist; the writer never creates
/// directories.
#[derive(Debug, Clone, Copy)]
pub struct AtomicFileWriter {
    sync_directory: bool,
}

impl Default for AtomicFileWriter {
    fn default() -> Self {
        Self {
            sync_directory: true,
        }
    }
}

impl AtomicFileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the parent-directory fsync after rename (Unix only)
    pub fn with_directory_sync(mut self, enabled: bool) -> Self {
        self.sync_directory = enabled;
        self
    }

    /// Open a temp file next to `path` for incremental writing
    ///
    /// # Errors
    ///
    /// `MissingDirectory` if the parent does not exist, `TempFileCreation`
    /// if the temp file cannot be created.
    pub fn begin(&self, path: &Path) -> Result<StreamingWriteHandle> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.is_dir() {
            return Err(StorageError::MissingDirectory {
                path: parent.to_path_buf(),
            });
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::TempFileCreation {
                path: path.to_path_buf(),
                reason: "target has no file name".to_string(),
            })?;

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(TEMP_SUFFIX)
            .tempfile_in(parent)
            .map_err(|e| StorageError::TempFileCreation {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(StreamingWriteHandle::new(
            temp,
            path.to_path_buf(),
            self.sync_directory,
        ))
    }

    /// Replace `path` with exactly `bytes`
    ///
    /// # Errors
    ///
    /// One of `MissingDirectory`, `TempFileCreation`, `TempFileWrite`,
    /// `Sync` or `AtomicRename`. On error the target is unchanged.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut handle = self.begin(path)?;
        handle.write_payload(bytes)?;
        handle.commit()?;
        Ok(())
    }

    /// Write `value` as two-space pretty JSON with a trailing newline
    pub fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| serialization_error(path.display().to_string(), e))?;
        bytes.push(b'\n');
        self.write(path, &bytes)
    }

    /// Read a file fully
    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| io_error("read_file", path, e))
    }

    /// Read and deserialize a JSON file
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let bytes = self.read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| serialization_error(path.display().to_string(), e))
    }
}

/// Atomically replace `path` with `bytes` using the default writer
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    AtomicFileWriter::default().write(path, bytes)
}

/// Read a file written by [`write_atomic`]
pub fn read_atomic(path: &Path) -> Result<Vec<u8>> {
    AtomicFileWriter::default().read(path)
}
