//! Memory-pressure monitoring for large scans

mod monitor;
mod sampler;

pub use monitor::{MemoryMonitor, MemorySnapshot, MemoryStatus, PressureHandler};
pub use sampler::{MemorySampler, MemoryUsage, ProcessMemorySampler};
