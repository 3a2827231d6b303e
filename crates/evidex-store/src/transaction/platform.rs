//! Platform capabilities the coordinator depends on
//!
//! Both are traits so tests can inject fixed answers and so platforms
//! without the Unix primitives still build.

use std::io;
use std::path::Path;

/// Answers whether the process that stamped a lock file is still running
pub trait ProcessLiveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Reports free space on the filesystem holding a directory
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, dir: &Path) -> io::Result<u64>;
}

/// Liveness through the host OS
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLiveness;

#[cfg(unix)]
impl ProcessLiveness for SystemLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // Signal 0 only checks for existence. EPERM means it exists but
        // belongs to someone else.
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(_) => true,
        }
    }
}

#[cfg(not(unix))]
impl ProcessLiveness for SystemLiveness {
    fn is_alive(&self, _pid: u32) -> bool {
        // No cheap probe here: never reclaim a lock we cannot prove is dead
        true
    }
}

/// Free space through the host OS
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpaceProbe;

#[cfg(unix)]
impl SpaceProbe for SystemSpaceProbe {
    fn available_bytes(&self, dir: &Path) -> io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(dir).map_err(io::Error::from)?;
        #[allow(clippy::unnecessary_cast)]
        let available = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
        Ok(available)
    }
}

#[cfg(not(unix))]
impl SpaceProbe for SystemSpaceProbe {
    fn available_bytes(&self, _dir: &Path) -> io::Result<u64> {
        Ok(u64::MAX)
    }
}
