use crate::errors::Result;
use evidex_core::errors::StorageError;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// An in-progress atomic write
///
/// Bytes go to a temp file next to the target. Nothing is visible at the
/// target until [`commit`](Self::commit) succeeds; dropping the handle
/// without committing removes the temp file.
pub struct StreamingWriteHandle {
    temp: Option<NamedTempFile>,
    target: PathBuf,
    sync_directory: bool,
    bytes_written: u64,
}

impl StreamingWriteHandle {
    pub(crate) fn new(temp: NamedTempFile, target: PathBuf, sync_directory: bool) -> Self {
        Self {
            temp: Some(temp),
            target,
            sync_directory,
            bytes_written: 0,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Path of the temp file, while the handle is uncommitted
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp.as_ref().map(|t| t.path())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write a whole buffer, mapping failures onto the typed write error
    pub fn write_payload(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)
            .map_err(|e| StorageError::TempFileWrite {
                path: self.target.clone(),
                reason: e.to_string(),
            })
    }

    /// Flush, fsync and rename the temp file onto the target
    ///
    /// Returns the number of bytes now at the target.
    pub fn commit(mut self) -> Result<u64> {
        let mut temp = match self.temp.take() {
            Some(temp) => temp,
            None => {
                return Err(StorageError::TempFileWrite {
                    path: self.target.clone(),
                    reason: "write handle already consumed".to_string(),
                })
            }
        };

        temp.flush().map_err(|e| StorageError::TempFileWrite {
            path: self.target.clone(),
            reason: e.to_string(),
        })?;
        temp.as_file().sync_all().map_err(|e| StorageError::Sync {
            path: self.target.clone(),
            reason: e.to_string(),
        })?;

        // On failure the PersistError still owns the temp file and deletes it on drop
        temp.persist(&self.target)
            .map_err(|e| StorageError::AtomicRename {
                path: self.target.clone(),
                reason: e.error.to_string(),
            })?;

        if self.sync_directory {
            if let Some(parent) = self.target.parent() {
                sync_dir(parent).map_err(|e| StorageError::Sync {
                    path: parent.to_path_buf(),
                    reason: e.to_string(),
                })?;
            }
        }

        Ok(self.bytes_written)
    }
}

impl Write for StreamingWriteHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let temp = self
            .temp
            .as_mut()
            .ok_or_else(|| io::Error::other("write handle consumed"))?;
        let n = temp.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.temp.as_mut() {
            Some(temp) => temp.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StreamingWriteHandle {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            tracing::debug!(
                target_path = %self.target.display(),
                bytes = self.bytes_written,
                "discarding uncommitted atomic write"
            );
            // best-effort removal
            let _ = temp.close();
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    // Directory handles cannot be fsynced here; the rename is still atomic
    Ok(())
}
