use std::io;

/// Raw memory figures for the current process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    /// Physical memory of the host, when known
    pub total_bytes: Option<u64>,
}

/// Source of memory figures
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> io::Result<MemoryUsage>;
}

/// Samples the running process through the OS
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemorySampler;

#[cfg(target_os = "linux")]
impl MemorySampler for ProcessMemorySampler {
    fn sample(&self) -> io::Result<MemoryUsage> {
        let status = std::fs::read_to_string("/proc/self/status")?;
        let rss_kb = parse_kb_field(&status, "VmRSS:").ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "VmRSS missing from /proc/self/status")
        })?;
        let vms_kb = parse_kb_field(&status, "VmSize:").unwrap_or(0);
        let total_kb = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|m| parse_kb_field(&m, "MemTotal:"));

        Ok(MemoryUsage {
            rss_bytes: rss_kb * 1024,
            vms_bytes: vms_kb * 1024,
            total_bytes: total_kb.map(|kb| kb * 1024),
        })
    }
}

#[cfg(not(target_os = "linux"))]
impl MemorySampler for ProcessMemorySampler {
    fn sample(&self) -> io::Result<MemoryUsage> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process memory sampling is only implemented on Linux",
        ))
    }
}

/// Value in kB of a `Key:   1234 kB` line from a procfs file
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_kb_field(text: &str, key: &str) -> Option<u64> {
    text.lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tevidex\nVmPeak:\t  300000 kB\nVmSize:\t  250000 kB\nVmRSS:\t   51200 kB\n";

    #[test]
    fn test_parse_kb_field() {
        assert_eq!(parse_kb_field(STATUS, "VmRSS:"), Some(51200));
        assert_eq!(parse_kb_field(STATUS, "VmSize:"), Some(250000));
        assert_eq!(parse_kb_field(STATUS, "VmSwap:"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_sampler_reads_proc() {
        let usage = ProcessMemorySampler.sample().unwrap();
        assert!(usage.rss_bytes > 0);
        assert!(usage.total_bytes.unwrap_or(u64::MAX) >= usage.rss_bytes);
    }
}
