//! Resident memory sampling for the traced process
//!
//! Samples come from `/proc/<pid>/statm`. The second field is the resident
//! page count, converted to MiB with the system page size.

use std::fs;

use nix::unistd::{sysconf, Pid, SysconfVar};

use crate::error::{Result, TraceError};

const BYTES_IN_MB: f64 = 1024.0 * 1024.0;
const FALLBACK_PAGE_SIZE: u64 = 4096;

/// Source of resource measurements, queried synchronously inside the hook
pub trait MemoryProbe {
    /// Current resident set size in MiB
    fn resident_mb(&mut self) -> Result<f64>;
}

/// Reads the resident set size of a live process
#[derive(Debug, Clone)]
pub struct StatmProbe {
    path: String,
    page_size: u64,
}

impl StatmProbe {
    pub fn for_pid(pid: Pid) -> Self {
        let page_size = sysconf(SysconfVar::PAGE_SIZE)
            .ok()
            .flatten()
            .map(|v| v as u64)
            .unwrap_or(FALLBACK_PAGE_SIZE);
        Self {
            path: format!("/proc/{}/statm", pid),
            page_size,
        }
    }
}

impl MemoryProbe for StatmProbe {
    fn resident_mb(&mut self) -> Result<f64> {
        let content = fs::read_to_string(&self.path)?;
        let pages = parse_resident_pages(&content)?;
        Ok((pages * self.page_size) as f64 / BYTES_IN_MB)
    }
}

fn parse_resident_pages(statm: &str) -> Result<u64> {
    statm
        .split_whitespace()
        .nth(1)
        .and_then(|field| field.parse::<u64>().ok())
        .ok_or_else(|| {
            TraceError::InvalidTarget(format!("malformed statm line: {:?}", statm.trim()))
        })
}
