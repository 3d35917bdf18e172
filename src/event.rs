//! Code events recorded during a trace
//!
//! Internally every event is a named-field record. Only at the serialization
//! boundary does it become the positional array consumers expect:
//! `[rss_mb, rss_delta_mb, line, kind, function]`.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Function name reported for the program's top-level (entry) code
pub const MODULE_SENTINEL: &str = "<module>";

/// Value reported when a memory sample could not be taken
pub const MEMORY_UNAVAILABLE: f64 = -1.0;

/// Classification of an instrumentation point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Call,
    Line,
    Return,
    Exception,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Call,
        EventKind::Line,
        EventKind::Return,
        EventKind::Exception,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Call => "call",
            EventKind::Line => "line",
            EventKind::Return => "return",
            EventKind::Exception => "exception",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call" => Ok(EventKind::Call),
            "line" => Ok(EventKind::Line),
            "return" => Ok(EventKind::Return),
            "exception" => Ok(EventKind::Exception),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

/// One instrumentation sample
#[derive(Debug, Clone, PartialEq)]
pub struct CodeEvent {
    /// Resident set size of the target in MiB
    pub rss_mb: f64,
    /// Resident set growth in MiB relative to the first sample of the session
    pub rss_delta_mb: f64,
    /// 1-based source line
    pub line: u32,
    pub kind: EventKind,
    /// Enclosing function, or [`MODULE_SENTINEL`] for the entry function
    pub function: String,
}

impl CodeEvent {
    /// True when the memory fields carry the sentinel instead of a measurement
    pub fn memory_unavailable(&self) -> bool {
        self.rss_mb == MEMORY_UNAVAILABLE
    }
}

impl Serialize for CodeEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(5)?;
        tuple.serialize_element(&self.rss_mb)?;
        tuple.serialize_element(&self.rss_delta_mb)?;
        tuple.serialize_element(&self.line)?;
        tuple.serialize_element(&self.kind)?;
        tuple.serialize_element(&self.function)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for CodeEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (rss_mb, rss_delta_mb, line, kind, function) =
            <(f64, f64, u32, EventKind, String)>::deserialize(deserializer)?;
        Ok(CodeEvent {
            rss_mb,
            rss_delta_mb,
            line,
            kind,
            function,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> CodeEvent {
        CodeEvent {
            rss_mb: 2.5,
            rss_delta_mb: 0.25,
            line: 7,
            kind: EventKind::Line,
            function: "fixture::fib".to_string(),
        }
    }

    #[test]
    fn test_code_event_serializes_positionally() {
        let json = serde_json::to_string(&sample_event()).unwrap();
        assert_eq!(json, r#"[2.5,0.25,7,"line","fixture::fib"]"#);
    }

    #[test]
    fn test_event_kind_wire_names() {
        let names: Vec<String> = EventKind::ALL
            .iter()
            .map(|k| serde_json::to_string(k).unwrap())
            .collect();
        assert_eq!(names, [r#""call""#, r#""line""#, r#""return""#, r#""exception""#]);
    }

    #[test]
    fn test_code_event_parses_wire_array() {
        let event: CodeEvent =
            serde_json::from_str(r#"[1.0, 0.0, 2, "return", "<module>"]"#).unwrap();
        assert_eq!(event.line, 2);
        assert_eq!(event.kind, EventKind::Return);
        assert_eq!(event.function, MODULE_SENTINEL);
    }

    #[test]
    fn test_code_event_rejects_reordered_fields() {
        let result: Result<CodeEvent, _> =
            serde_json::from_str(r#"["line", 1.0, 0.0, 2, "<module>"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_event_kind_from_str() {
        assert_eq!("exception".parse::<EventKind>().unwrap(), EventKind::Exception);
        assert!("opcode".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_memory_unavailable_sentinel() {
        let mut event = sample_event();
        assert!(!event.memory_unavailable());
        event.rss_mb = MEMORY_UNAVAILABLE;
        assert!(event.memory_unavailable());
    }
}
