//! Memory Information Module
//!
//! Ambient memory figures the cache budget is resolved against.

use sysinfo::System;
use tracing::debug;

// == Memory Info ==
/// Memory the process may use, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Upper bound of memory the process can occupy
    total_available: u64,
}

impl MemoryInfo {
    /// Uses a known figure instead of probing the system.
    pub fn from_total(total_available: u64) -> Self {
        Self { total_available }
    }

    /// Convenience for overrides expressed in MiB.
    pub fn from_total_mb(mb: u64) -> Self {
        Self::from_total(mb.saturating_mul(1024 * 1024))
    }

    /// Probes physical memory, honoring a cgroup limit when one is set.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let physical = sys.total_memory();
        let total_available = match sys.cgroup_limits() {
            Some(limits) if limits.total_memory > 0 => physical.min(limits.total_memory),
            _ => physical,
        };

        debug!(
            "Memory detection - Physical: {} MB, Usable by process: {} MB",
            physical / (1024 * 1024),
            total_available / (1024 * 1024)
        );

        Self { total_available }
    }

    pub fn total_available(&self) -> u64 {
        self.total_available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_total_mb() {
        assert_eq!(MemoryInfo::from_total_mb(512).total_available(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_detect_reports_some_memory() {
        assert!(MemoryInfo::detect().total_available() > 0);
    }
}
