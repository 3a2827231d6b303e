use crate::atomic::AtomicFileWriter;
use crate::corruption::CorruptionEvidence;
use crate::errors::{io_error, serialization_error, Result};
use crate::layout::{sibling_with_suffix, MARKER_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A persisted corruption finding
///
/// Stored as a JSON sidecar `<name><ext>.corrupted` next to the corrupted
/// file. Markers are never removed automatically; only an explicit restore
/// from backup clears one.
#[derive(Debug, Clone, PartialEq)]
pub struct CorruptionMarker {
    marker_path: PathBuf,
    evidence: CorruptionEvidence,
}

impl CorruptionMarker {
    /// Sidecar path for a (possibly) corrupted file
    pub fn marker_path_for(path: &Path) -> PathBuf {
        sibling_with_suffix(path, MARKER_SUFFIX)
    }

    /// Persist `evidence` next to the file it describes
    pub fn create(evidence: CorruptionEvidence) -> Result<Self> {
        let marker_path = Self::marker_path_for(evidence.path());
        AtomicFileWriter::default().write_json(&marker_path, &evidence)?;
        tracing::warn!(
            path = %evidence.path().display(),
            kind = evidence.kind().as_str(),
            "corruption marker created"
        );
        Ok(Self {
            marker_path,
            evidence,
        })
    }

    pub fn exists(path: &Path) -> bool {
        Self::marker_path_for(path).is_file()
    }

    /// Marker for `path`, if one exists
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let marker_path = Self::marker_path_for(path);
        Self::load_marker_file(&marker_path)
    }

    fn load_marker_file(marker_path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(marker_path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("load_marker", marker_path, e)),
        };
        let evidence: CorruptionEvidence = serde_json::from_slice(&bytes)
            .map_err(|e| serialization_error(marker_path.display().to_string(), e))?;
        Ok(Some(Self {
            marker_path: marker_path.to_path_buf(),
            evidence,
        }))
    }

    /// Every marker under `dir`, recursively, sorted by marker path
    ///
    /// Unreadable markers are skipped with a warning.
    pub fn list_in(dir: &Path) -> Result<Vec<Self>> {
        let mut markers = Vec::new();
        if !dir.is_dir() {
            return Ok(markers);
        }
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                io_error("list_markers", &path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_marker = entry
                .file_name()
                .to_str()
                .map(|n| n.ends_with(MARKER_SUFFIX))
                .unwrap_or(false);
            if !is_marker {
                continue;
            }
            match Self::load_marker_file(entry.path()) {
                Ok(Some(marker)) => markers.push(marker),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable corruption marker");
                }
            }
        }
        Ok(markers)
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    pub fn evidence(&self) -> &CorruptionEvidence {
        &self.evidence
    }

    /// Remove the marker for `path` once it has been restored from backup
    pub(crate) fn clear_after_restore(path: &Path) -> Result<bool> {
        let marker_path = Self::marker_path_for(path);
        match fs::remove_file(&marker_path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "corruption marker cleared after restore");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("clear_marker", &marker_path, e)),
        }
    }
}
