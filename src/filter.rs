//! Event filtering
//!
//! Two filters decide what ends up in the event log:
//! - `SourceFilter`: the own-code boundary. Frames whose source file lies
//!   outside the target's source roots are never recorded or stepped.
//! - `EventKindFilter`: which event kinds are recorded, parsed from
//!   expressions like `line,exception` or `all`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{Result, TraceError};
use crate::event::EventKind;

/// Path fragments that always mark toolchain or dependency sources
const LIBRARY_MARKERS: &[&str] = &[
    "/rustc/",
    "/.cargo/registry/",
    "/.cargo/git/",
    "/.rustup/toolchains/",
    "/usr/include/",
];

/// Own-code boundary for a traced program
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    roots: Vec<PathBuf>,
}

impl SourceFilter {
    /// Filter accepting files under any of the given roots
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Add the default root derived from the file that defines `main`
    pub fn add_root_for_entry(&mut self, entry_file: &str) {
        if let Some(root) = root_for_source(entry_file) {
            if !self.roots.contains(&root) {
                self.roots.push(root);
            }
        }
    }

    /// Check whether a source file belongs to the target's own code
    pub fn contains(&self, file: &str) -> bool {
        if file.is_empty() || is_library_path(file) {
            return false;
        }
        let path = Path::new(file);
        self.roots.iter().any(|root| path.starts_with(root))
    }
}

/// Project root for a source path: the directory above `src/` if present,
/// otherwise the file's own directory
pub fn root_for_source(file: &str) -> Option<PathBuf> {
    if let Some(idx) = file.find("/src/") {
        let root = &file[..idx];
        if !root.is_empty() {
            return Some(PathBuf::from(root));
        }
    }
    Path::new(file)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

fn is_library_path(path: &str) -> bool {
    LIBRARY_MARKERS.iter().any(|marker| path.contains(marker))
}

/// Set of event kinds that are recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKindFilter {
    kinds: BTreeSet<EventKind>,
}

impl Default for EventKindFilter {
    /// `line` and `exception`: one event per executed own line, plus faults
    fn default() -> Self {
        Self {
            kinds: [EventKind::Line, EventKind::Exception].into_iter().collect(),
        }
    }
}

impl EventKindFilter {
    pub fn all() -> Self {
        Self {
            kinds: EventKind::ALL.into_iter().collect(),
        }
    }

    /// Parse a comma-separated kind list like `line,call,return` or `all`
    pub fn from_expr(expr: &str) -> Result<Self> {
        let mut kinds = BTreeSet::new();

        for part in expr.split(',') {
            let part = part.trim();
            match part {
                "" => continue,
                "all" => kinds.extend(EventKind::ALL),
                // call + return together, as a pair
                "calls" => kinds.extend([EventKind::Call, EventKind::Return]),
                _ => {
                    let kind = part.parse::<EventKind>().map_err(|e| {
                        TraceError::Config(format!(
                            "{} in event expression '{}'. Expected call, line, return, exception, calls or all",
                            e, expr
                        ))
                    })?;
                    kinds.insert(kind);
                }
            }
        }

        if kinds.is_empty() {
            return Err(TraceError::Config(format!(
                "event expression '{}' selects no event kinds",
                expr
            )));
        }

        Ok(Self { kinds })
    }

    pub fn records(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.kinds.iter().copied()
    }
}
