use crate::atomic::AtomicFileWriter;
use crate::checksum::observation_id;
use crate::errors::{io_error, validate_id, Result};
use crate::layout::{RecordKind, StorageLayout, MANIFEST_SUFFIX};
use crate::memory::MemoryMonitor;
use crate::streaming::StreamingManifest;
use crate::transaction::EvidenceRecord;
use chrono::Utc;
use evidex_core::errors::{RecoveryError, StorageError};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Marker value of the `kind` field on boundary-crossing observation items
pub const BOUNDARY_CROSSING_KIND: &str = "boundary_crossing";

/// Incremental, resumable per-file observation writer
///
/// Every file's observations are written immediately as their own record.
/// The manifest is checkpointed every `checkpoint_interval` files, so an
/// interrupted scan resumes from the last checkpoint and re-processes at
/// most one interval of files.
pub struct StreamingObservationSession {
    layout: StorageLayout,
    writer: AtomicFileWriter,
    manifest: StreamingManifest,
    manifest_path: PathBuf,
    checkpoint_interval: u64,
    checkpointed_files: u64,
    monitor: Option<Arc<MemoryMonitor>>,
    halted: Option<StorageError>,
    finished: bool,
}

impl StreamingObservationSession {
    /// Start a new session and write its initial, incomplete manifest
    pub fn open(layout: StorageLayout, session_id: &str, checkpoint_interval: u64) -> Result<Self> {
        validate_id("session", session_id)?;
        layout.ensure_dirs()?;
        let manifest = StreamingManifest::new(session_id);
        let manifest_path = layout.manifest_path(&manifest.manifest_id)?;

        let mut session = Self::from_parts(layout, manifest, manifest_path, checkpoint_interval);
        session.checkpoint()?;
        tracing::info!(
            session_id = session_id,
            manifest_id = session.manifest.manifest_id.as_str(),
            "streaming session opened"
        );
        Ok(session)
    }

    /// Continue the newest incomplete session for `session_id`
    ///
    /// # Errors
    ///
    /// `RecoveryError::CannotRecover` when no incomplete manifest exists,
    /// `RecoveryError::CorruptedState` when the newest one is unreadable or
    /// inconsistent.
    pub fn resume_from(layout: StorageLayout, session_id: &str, checkpoint_interval: u64) -> Result<Self> {
        validate_id("session", session_id)?;
        let (manifest_path, manifest) = find_resume_point(&layout, session_id)?;
        let files_processed = manifest.files_processed;

        let session = Self::from_parts(layout, manifest, manifest_path, checkpoint_interval);
        tracing::info!(
            session_id = session_id,
            manifest_id = session.manifest.manifest_id.as_str(),
            files_processed = files_processed,
            "streaming session resumed"
        );
        Ok(session)
    }

    /// Whether `resume_from` would succeed
    pub fn can_resume_from(layout: &StorageLayout, session_id: &str) -> bool {
        find_resume_point(layout, session_id).is_ok()
    }

    fn from_parts(
        layout: StorageLayout,
        manifest: StreamingManifest,
        manifest_path: PathBuf,
        checkpoint_interval: u64,
    ) -> Self {
        Self {
            layout,
            writer: AtomicFileWriter::default(),
            checkpointed_files: manifest.files_processed,
            manifest,
            manifest_path,
            checkpoint_interval: checkpoint_interval.max(1),
            monitor: None,
            halted: None,
            finished: false,
        }
    }

    /// Attach a memory monitor; every written file is tracked by it
    pub fn with_monitor(mut self, monitor: Arc<MemoryMonitor>) -> Self {
        monitor.start_operation("streaming_observation");
        monitor.set_phase(&self.manifest.session_id);
        self.monitor = Some(monitor);
        self
    }

    /// Persist the observations for one file and return the record id
    ///
    /// Items that are not JSON objects are wrapped as `{"value": item}`.
    /// Items whose `kind` is `boundary_crossing` are also added to the
    /// manifest once the record is on disk.
    ///
    /// # Errors
    ///
    /// `MemoryPressure` once the monitor's critical latch has fired; the
    /// session then refuses every further write.
    pub fn write_file_observation(&mut self, file_path: &str, observations: Vec<Value>) -> Result<String> {
        if let Some(err) = &self.halted {
            return Err(err.clone());
        }

        let file_index = self.manifest.files_processed;
        let items: Vec<Value> = observations
            .into_iter()
            .map(|item| match item {
                Value::Object(_) => item,
                other => json!({ "value": other }),
            })
            .collect();
        let crossings: Vec<Value> = items
            .iter()
            .filter(|item| item.get("kind").and_then(Value::as_str) == Some(BOUNDARY_CROSSING_KIND))
            .cloned()
            .collect();

        let id = observation_id(&self.manifest.session_id, file_index, file_path);
        let record = EvidenceRecord::sealed(
            id.as_str(),
            RecordKind::Observation,
            self.manifest.session_id.as_str(),
            Value::Array(items),
        )?
        .at_file(file_path, file_index)?;
        let path = self.layout.record_path(RecordKind::Observation, &id)?;
        self.writer.write(&path, &record.to_bytes()?)?;

        self.manifest.boundary_crossings.extend(crossings);
        self.manifest.observation_ids.push(id.clone());
        self.manifest.files_processed += 1;
        self.manifest.last_updated_at = Utc::now();

        if self.manifest.files_processed - self.checkpointed_files >= self.checkpoint_interval {
            self.checkpoint()?;
        }

        self.check_memory()?;
        Ok(id)
    }

    fn check_memory(&mut self) -> Result<()> {
        let Some(monitor) = self.monitor.clone() else {
            return Ok(());
        };
        monitor.track_files(1);
        if !monitor.is_critical() {
            return Ok(());
        }

        self.checkpoint()?;
        let rss_mb = monitor
            .get_memory_status()
            .current
            .map(|s| s.rss_mb as u64)
            .unwrap_or(0);
        let err = StorageError::MemoryPressure {
            rss_mb,
            critical_mb: monitor.critical_threshold_mb(),
        };
        tracing::warn!(
            session_id = self.manifest.session_id.as_str(),
            files_processed = self.manifest.files_processed,
            rss_mb = rss_mb,
            "streaming session halted by memory pressure after emergency checkpoint"
        );
        self.halted = Some(err.clone());
        Err(err)
    }

    /// Add a boundary-crossing side record to the manifest
    pub fn record_boundary_crossing(&mut self, crossing: Value) {
        self.manifest.boundary_crossings.push(crossing);
        self.manifest.last_updated_at = Utc::now();
    }

    /// Persist the manifest now, still marked incomplete
    pub fn checkpoint(&mut self) -> Result<()> {
        self.manifest.last_updated_at = Utc::now();
        self.writer.write_json(&self.manifest_path, &self.manifest)?;
        self.checkpointed_files = self.manifest.files_processed;
        tracing::debug!(
            session_id = self.manifest.session_id.as_str(),
            files_processed = self.manifest.files_processed,
            "streaming checkpoint"
        );
        Ok(())
    }

    /// Close gracefully: the manifest is marked complete
    pub fn finish(mut self) -> Result<StreamingManifest> {
        let now = Utc::now();
        self.manifest.complete = true;
        self.manifest.ended_at = Some(now);
        self.manifest.last_updated_at = now;
        self.writer.write_json(&self.manifest_path, &self.manifest)?;
        self.checkpointed_files = self.manifest.files_processed;
        self.finished = true;
        tracing::info!(
            session_id = self.manifest.session_id.as_str(),
            files_processed = self.manifest.files_processed,
            "streaming session finished"
        );
        Ok(self.manifest.clone())
    }

    /// Candidates still to process after a resume
    ///
    /// Candidates are sorted lexicographically; the first `files_processed`
    /// are skipped.
    pub fn remaining_files<S: AsRef<str>>(&self, candidates: &[S]) -> Vec<String> {
        let mut sorted: Vec<String> = candidates.iter().map(|c| c.as_ref().to_string()).collect();
        sorted.sort();
        let skip = usize::try_from(self.manifest.files_processed).unwrap_or(usize::MAX);
        sorted.into_iter().skip(skip).collect()
    }

    pub fn session_id(&self) -> &str {
        &self.manifest.session_id
    }

    pub fn manifest_id(&self) -> &str {
        &self.manifest.manifest_id
    }

    pub fn manifest(&self) -> &StreamingManifest {
        &self.manifest
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn files_processed(&self) -> u64 {
        self.manifest.files_processed
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }
}

impl Drop for StreamingObservationSession {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                session_id = self.manifest.session_id.as_str(),
                files_processed = self.manifest.files_processed,
                checkpointed_files = self.checkpointed_files,
                "streaming session dropped without finish; last checkpoint is the resume point"
            );
        }
    }
}

/// Every incomplete streaming manifest under the store, newest first
pub fn list_resumable(layout: &StorageLayout) -> Result<Vec<StreamingManifest>> {
    let mut manifests: Vec<StreamingManifest> = scan_manifests(layout)?
        .into_iter()
        .filter_map(|(_, parsed)| parsed.ok())
        .filter(|m| !m.complete)
        .collect();
    manifests.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));
    Ok(manifests)
}

type ScannedManifest = (PathBuf, std::result::Result<StreamingManifest, String>);

fn scan_manifests(layout: &StorageLayout) -> Result<Vec<ScannedManifest>> {
    let dir = layout.record_dir(RecordKind::Observation);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error("scan_manifests", &dir, e)),
    };

    let mut scanned = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error("scan_manifests", &dir, e))?;
        let path = entry.path();
        let is_manifest = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(MANIFEST_SUFFIX))
            .unwrap_or(false);
        if !is_manifest {
            continue;
        }
        let parsed = fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<StreamingManifest>(&bytes).map_err(|e| e.to_string())
            });
        scanned.push((path, parsed));
    }
    scanned.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(scanned)
}

fn find_resume_point(layout: &StorageLayout, session_id: &str) -> Result<(PathBuf, StreamingManifest)> {
    let own_prefix = format!("{}-", session_id);
    let mut unreadable = Vec::new();
    let mut incomplete = Vec::new();
    let mut completed = 0usize;

    for (path, parsed) in scan_manifests(layout)? {
        match parsed {
            Ok(manifest) if manifest.session_id == session_id => {
                if manifest.complete {
                    completed += 1;
                } else {
                    incomplete.push((path, manifest));
                }
            }
            Ok(_) => {}
            Err(reason) => {
                let ours = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&own_prefix))
                    .unwrap_or(false);
                if ours {
                    unreadable.push(reason);
                }
            }
        }
    }

    incomplete.sort_by(|a, b| a.1.last_updated_at.cmp(&b.1.last_updated_at));
    if let Some((path, manifest)) = incomplete.pop() {
        if let Some(reason) = manifest.consistency_error() {
            return Err(RecoveryError::CorruptedState {
                session_id: session_id.to_string(),
                reason,
            }
            .into());
        }
        return Ok((path, manifest));
    }

    if let Some(reason) = unreadable.into_iter().next() {
        return Err(RecoveryError::CorruptedState {
            session_id: session_id.to_string(),
            reason: format!("manifest unreadable: {}", reason),
        }
        .into());
    }

    let reason = if completed > 0 {
        "session already completed".to_string()
    } else {
        "no streaming manifest found".to_string()
    };
    Err(RecoveryError::CannotRecover {
        session_id: session_id.to_string(),
        reason,
    }
    .into())
}
