//! Memory mappings of the traced process
//!
//! Used once after exec to find where the kernel placed the executable, so
//! that link-time addresses from DWARF can be translated to runtime ones.

use std::fs;
use std::path::Path;

use nix::unistd::Pid;

use crate::error::{Result, TraceError};

/// A parsed line of `/proc/<pid>/maps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub offset: u64,
    pub pathname: Option<String>,
}

impl MemoryMapping {
    pub fn is_executable(&self) -> bool {
        self.perms.contains('x')
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryMaps {
    mappings: Vec<MemoryMapping>,
}

impl MemoryMaps {
    pub fn for_pid(pid: Pid) -> Result<Self> {
        let path = format!("/proc/{}/maps", pid);
        let content = fs::read_to_string(&path).map_err(|e| {
            TraceError::InvalidTarget(format!("cannot read maps for PID {}: {}", pid, e))
        })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        Self {
            mappings: content.lines().filter_map(parse_line).collect(),
        }
    }

    pub fn mappings(&self) -> &[MemoryMapping] {
        &self.mappings
    }

    /// Offset between runtime and link-time addresses of `exe`
    ///
    /// The first mapping of the executable has file offset 0 for both PIE
    /// and fixed-address binaries, so `start - offset` is the runtime image
    /// base. Returns 0 when the executable is not mapped.
    pub fn load_bias(&self, exe: &Path, image_base: u64) -> u64 {
        let exe_str = exe.to_string_lossy();
        let by_path = self
            .mappings
            .iter()
            .find(|m| m.pathname.as_deref() == Some(exe_str.as_ref()));
        let by_name = || {
            let name = exe.file_name()?.to_str()?;
            self.mappings.iter().find(|m| {
                m.pathname
                    .as_deref()
                    .and_then(|p| Path::new(p).file_name())
                    .and_then(|n| n.to_str())
                    == Some(name)
            })
        };

        by_path
            .or_else(by_name)
            .map(|m| (m.start - m.offset).wrapping_sub(image_base))
            .unwrap_or(0)
    }
}

fn parse_line(line: &str) -> Option<MemoryMapping> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }

    let (start, end) = parts[0].split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let offset = u64::from_str_radix(parts[2], 16).ok()?;

    // Pathnames may contain spaces
    let pathname = (parts.len() >= 6).then(|| parts[5..].join(" "));

    Some(MemoryMapping {
        start,
        end,
        perms: parts[1].to_string(),
        offset,
        pathname,
    })
}
