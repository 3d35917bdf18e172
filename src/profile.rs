//! Event log and the finalized profile aggregate
//!
//! `EventLog` is the append-only buffer owned by a recorder while the target
//! runs. `finalize` freezes it into a `ProfileAggregate`, which is what the
//! stats endpoint serves.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::event::{CodeEvent, EventKind};

/// Append-only event buffer, in emission order
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<CodeEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: CodeEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&CodeEvent> {
        self.events.last()
    }

    /// Freeze the log into an immutable aggregate
    pub fn finalize(self, program_name: impl Into<String>) -> ProfileAggregate {
        ProfileAggregate {
            program_name: program_name.into(),
            code_events: self.events.into(),
        }
    }
}

/// Finalized trace of one program execution
///
/// `total_events` is derived from the event slice, so it always equals the
/// number of events.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileAggregate {
    program_name: String,
    code_events: Arc<[CodeEvent]>,
}

/// Largest memory reading seen on a source line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMaximum {
    pub rss_mb: f64,
    pub hits: usize,
}

impl ProfileAggregate {
    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    pub fn code_events(&self) -> &[CodeEvent] {
        &self.code_events
    }

    pub fn total_events(&self) -> usize {
        self.code_events.len()
    }

    /// Event with the highest resident set size (first one wins on ties)
    pub fn peak(&self) -> Option<&CodeEvent> {
        self.code_events
            .iter()
            .filter(|e| !e.memory_unavailable())
            .fold(None, |best: Option<&CodeEvent>, e| match best {
                Some(b) if b.rss_mb >= e.rss_mb => Some(b),
                _ => Some(e),
            })
    }

    /// Per-line maximum resident set size over `line` events
    pub fn line_maxima(&self) -> BTreeMap<u32, LineMaximum> {
        let mut maxima: BTreeMap<u32, LineMaximum> = BTreeMap::new();
        for event in self.code_events.iter().filter(|e| e.kind == EventKind::Line) {
            let entry = maxima.entry(event.line).or_insert(LineMaximum {
                rss_mb: event.rss_mb,
                hits: 0,
            });
            entry.hits += 1;
            if event.rss_mb > entry.rss_mb {
                entry.rss_mb = event.rss_mb;
            }
        }
        maxima
    }

    /// Number of recorded events per enclosing function
    pub fn function_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for event in self.code_events.iter() {
            *counts.entry(event.function.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.code_events.iter().filter(|e| e.kind == kind).count()
    }
}

impl Serialize for ProfileAggregate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ProfileAggregate", 3)?;
        state.serialize_field("programName", &self.program_name)?;
        state.serialize_field("totalEvents", &self.total_events())?;
        state.serialize_field("codeEvents", &*self.code_events)?;
        state.end()
    }
}

/// Wire form used when reading a served profile back
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDocument {
    pub program_name: String,
    pub total_events: usize,
    pub code_events: Vec<CodeEvent>,
}
