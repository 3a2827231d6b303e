use crate::atomic::AtomicFileWriter;
use crate::errors::{io_error, Result};
use crate::memory::sampler::{MemorySampler, MemoryUsage, ProcessMemorySampler};
use chrono::{DateTime, Utc};
use evidex_core::MemoryConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Snapshots included in a status report
const STATUS_RECENT: usize = 10;

/// One memory sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub timestamp: DateTime<Utc>,
    pub rss_mb: f64,
    pub vms_mb: f64,
    /// RSS as a share of physical memory, when the host total is known
    pub percent: Option<f64>,
    pub files_processed: u64,
    pub operation: String,
    pub phase: String,
}

/// Reactions to memory pressure
///
/// `release_memory` is asked for on every sample above the warning
/// threshold. `emergency_save` runs once per operation, when the critical
/// threshold is first crossed.
pub trait PressureHandler: Send + Sync {
    /// Drop caches or other reclaimable state
    fn release_memory(&self) {}

    /// Persist whatever is needed to resume later
    fn emergency_save(&self, snapshot: &MemorySnapshot) -> Result<()>;
}

/// Point-in-time view of the monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub operation: String,
    pub phase: String,
    pub files_processed: u64,
    pub current: Option<MemorySnapshot>,
    pub peak_rss_mb: f64,
    pub chunking: bool,
    pub critical: bool,
    pub warning_threshold_mb: u64,
    pub critical_threshold_mb: u64,
    pub recent: Vec<MemorySnapshot>,
}

#[derive(Serialize)]
struct MemoryReport<'a> {
    status: &'a MemoryStatus,
    history: &'a [MemorySnapshot],
}

#[derive(Debug, Default)]
struct MonitorState {
    operation: String,
    phase: String,
    files_processed: u64,
    files_since_check: u64,
    chunking: bool,
    critical_fired: bool,
    peak_rss_mb: f64,
    history: VecDeque<MemorySnapshot>,
}

enum Pressure {
    Normal,
    Warning { first: bool },
    Critical,
}

/// Samples process memory during long scans and reacts to pressure
///
/// Crossing the warning threshold sets a chunking flag that stays set.
/// Crossing the critical threshold fires an emergency save once per
/// operation and latches `is_critical` until the next `start_operation`.
pub struct MemoryMonitor {
    config: MemoryConfig,
    sampler: Arc<dyn MemorySampler>,
    state: Mutex<MonitorState>,
    handlers: Mutex<Vec<Arc<dyn PressureHandler>>>,
}

impl MemoryMonitor {
    pub fn new(config: MemoryConfig, sampler: Arc<dyn MemorySampler>) -> Self {
        Self {
            config,
            sampler,
            state: Mutex::new(MonitorState::default()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Monitor backed by the OS process sampler
    pub fn system(config: MemoryConfig) -> Self {
        Self::new(config, Arc::new(ProcessMemorySampler))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        // A panic while holding the lock leaves plain counters; keep using them
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register_handler(&self, handler: Arc<dyn PressureHandler>) {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    fn handlers(&self) -> Vec<Arc<dyn PressureHandler>> {
        self.handlers
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Begin a new operation: resets file counters and the critical latch
    pub fn start_operation(&self, name: &str) {
        let mut state = self.state();
        state.operation = name.to_string();
        state.phase = "start".to_string();
        state.files_processed = 0;
        state.files_since_check = 0;
        state.critical_fired = false;
        tracing::debug!(operation = name, "memory monitor operation started");
    }

    pub fn set_phase(&self, phase: &str) {
        self.state().phase = phase.to_string();
    }

    /// Count processed files, sampling every `check_interval_files`
    ///
    /// Returns the snapshot when this call triggered a sample.
    pub fn track_files(&self, count: u64) -> Option<MemorySnapshot> {
        let due = {
            let mut state = self.state();
            state.files_processed += count;
            state.files_since_check += count;
            if state.files_since_check >= self.config.check_interval_files.max(1) {
                state.files_since_check = 0;
                true
            } else {
                false
            }
        };
        if !due {
            return None;
        }
        match self.sample_now() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::debug!(error = %e, "memory sample failed");
                None
            }
        }
    }

    /// Take a sample immediately and apply the thresholds
    pub fn sample_now(&self) -> Result<MemorySnapshot> {
        let usage = self
            .sampler
            .sample()
            .map_err(|e| io_error("sample_memory", Path::new("/proc/self/status"), e))?;

        let (snapshot, pressure) = {
            let mut state = self.state();
            let snapshot = self.snapshot_from(&state, usage);
            state.peak_rss_mb = state.peak_rss_mb.max(snapshot.rss_mb);
            state.history.push_back(snapshot.clone());
            while state.history.len() > self.config.history_limit.max(1) {
                state.history.pop_front();
            }
            let pressure = self.classify(&mut state, snapshot.rss_mb);
            (snapshot, pressure)
        };

        self.react(&snapshot, pressure);
        Ok(snapshot)
    }

    fn snapshot_from(&self, state: &MonitorState, usage: MemoryUsage) -> MemorySnapshot {
        let rss_mb = usage.rss_bytes as f64 / BYTES_PER_MB;
        MemorySnapshot {
            timestamp: Utc::now(),
            rss_mb,
            vms_mb: usage.vms_bytes as f64 / BYTES_PER_MB,
            percent: usage
                .total_bytes
                .filter(|t| *t > 0)
                .map(|t| usage.rss_bytes as f64 / t as f64 * 100.0),
            files_processed: state.files_processed,
            operation: state.operation.clone(),
            phase: state.phase.clone(),
        }
    }

    fn classify(&self, state: &mut MonitorState, rss_mb: f64) -> Pressure {
        if rss_mb >= self.config.critical_threshold_mb as f64 {
            state.chunking = true;
            if state.critical_fired {
                return Pressure::Warning { first: false };
            }
            state.critical_fired = true;
            return Pressure::Critical;
        }
        if rss_mb >= self.config.warning_threshold_mb as f64 {
            let first = !state.chunking;
            state.chunking = true;
            return Pressure::Warning { first };
        }
        Pressure::Normal
    }

    fn react(&self, snapshot: &MemorySnapshot, pressure: Pressure) {
        match pressure {
            Pressure::Normal => {}
            Pressure::Warning { first } => {
                if first {
                    tracing::warn!(
                        rss_mb = snapshot.rss_mb,
                        warning_mb = self.config.warning_threshold_mb,
                        operation = snapshot.operation.as_str(),
                        "memory warning threshold crossed, switching to chunked processing"
                    );
                }
                for handler in self.handlers() {
                    handler.release_memory();
                }
            }
            Pressure::Critical => {
                tracing::warn!(
                    rss_mb = snapshot.rss_mb,
                    critical_mb = self.config.critical_threshold_mb,
                    operation = snapshot.operation.as_str(),
                    files_processed = snapshot.files_processed,
                    "memory critical threshold crossed, running emergency save"
                );
                for handler in self.handlers() {
                    if let Err(e) = handler.emergency_save(snapshot) {
                        tracing::error!(error = %e, "emergency save failed");
                    }
                    handler.release_memory();
                }
            }
        }
    }

    /// Whether work should be split into chunks (sticky once set)
    pub fn should_chunk(&self) -> bool {
        self.state().chunking
    }

    /// Whether a scan over `expected_files` files should use streaming mode
    pub fn should_stream(&self, expected_files: u64) -> bool {
        expected_files >= self.config.streaming_file_threshold || self.should_chunk()
    }

    /// Whether the critical threshold fired during the current operation
    pub fn is_critical(&self) -> bool {
        self.state().critical_fired
    }

    /// Critical threshold in MB
    pub fn critical_threshold_mb(&self) -> u64 {
        self.config.critical_threshold_mb
    }

    pub fn history(&self) -> Vec<MemorySnapshot> {
        self.state().history.iter().cloned().collect()
    }

    pub fn get_memory_status(&self) -> MemoryStatus {
        let state = self.state();
        let skip = state.history.len().saturating_sub(STATUS_RECENT);
        MemoryStatus {
            operation: state.operation.clone(),
            phase: state.phase.clone(),
            files_processed: state.files_processed,
            current: state.history.back().cloned(),
            peak_rss_mb: state.peak_rss_mb,
            chunking: state.chunking,
            critical: state.critical_fired,
            warning_threshold_mb: self.config.warning_threshold_mb,
            critical_threshold_mb: self.config.critical_threshold_mb,
            recent: state.history.iter().skip(skip).cloned().collect(),
        }
    }

    /// Write status and full history as JSON
    pub fn save_to_disk(&self, path: &Path) -> Result<()> {
        let status = self.get_memory_status();
        let history = self.history();
        AtomicFileWriter::default().write_json(
            path,
            &MemoryReport {
                status: &status,
                history: &history,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedSampler(AtomicU64);

    impl FixedSampler {
        fn mb(mb: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(mb)))
        }
        fn set(&self, mb: u64) {
            self.0.store(mb, Ordering::SeqCst);
        }
    }

    impl MemorySampler for FixedSampler {
        fn sample(&self) -> std::io::Result<MemoryUsage> {
            let mb = self.0.load(Ordering::SeqCst);
            Ok(MemoryUsage {
                rss_bytes: mb * 1024 * 1024,
                vms_bytes: mb * 2 * 1024 * 1024,
                total_bytes: Some(8192 * 1024 * 1024),
            })
        }
    }

    fn config() -> MemoryConfig {
        MemoryConfig {
            warning_threshold_mb: 100,
            critical_threshold_mb: 200,
            check_interval_files: 10,
            history_limit: 5,
            streaming_file_threshold: 1000,
        }
    }

    #[test]
    fn test_samples_every_interval() {
        let monitor = MemoryMonitor::new(config(), FixedSampler::mb(10));
        monitor.start_operation("scan");

        assert!(monitor.track_files(9).is_none());
        let snapshot = monitor.track_files(1).unwrap();
        assert_eq!(snapshot.files_processed, 10);
        assert_eq!(snapshot.operation, "scan");
        assert!(!monitor.should_chunk());
    }

    #[test]
    fn test_warning_sets_sticky_chunking() {
        let sampler = FixedSampler::mb(150);
        let monitor = MemoryMonitor::new(config(), sampler.clone());
        monitor.start_operation("scan");

        monitor.sample_now().unwrap();
        assert!(monitor.should_chunk());
        assert!(!monitor.is_critical());

        sampler.set(10);
        monitor.sample_now().unwrap();
        assert!(monitor.should_chunk());
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = MemoryMonitor::new(config(), FixedSampler::mb(10));
        for _ in 0..8 {
            monitor.sample_now().unwrap();
        }
        assert_eq!(monitor.history().len(), 5);
        assert_eq!(monitor.get_memory_status().recent.len(), 5);
    }

    #[test]
    fn test_should_stream_by_file_count() {
        let monitor = MemoryMonitor::new(config(), FixedSampler::mb(10));
        assert!(!monitor.should_stream(999));
        assert!(monitor.should_stream(1000));
    }

    #[test]
    fn test_percent_uses_host_total() {
        let monitor = MemoryMonitor::new(config(), FixedSampler::mb(1024));
        let snapshot = monitor.sample_now().unwrap();
        let percent = snapshot.percent.unwrap();
        assert!((percent - 12.5).abs() < 1e-9);
    }
}
