//! Error types for the tracing library
//!
//! The binary wraps these in `anyhow` with context; library code returns
//! `Result<T, TraceError>` everywhere.

use std::fmt;

use thiserror::Error;

use crate::profile::ProfileAggregate;

/// How the traced program terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Exited normally with the given exit code
    Exited(i32),
    /// Terminated by a signal (raw signal number)
    Signaled(i32),
}

impl TargetStatus {
    pub fn success(&self) -> bool {
        matches!(self, TargetStatus::Exited(0))
    }

    /// Shell-style exit code (128 + signal for signal deaths)
    pub fn exit_code(&self) -> i32 {
        match self {
            TargetStatus::Exited(code) => *code,
            TargetStatus::Signaled(sig) => 128 + sig,
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStatus::Exited(code) => write!(f, "exit code {}", code),
            TargetStatus::Signaled(sig) => write!(f, "signal {}", sig),
        }
    }
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Missing debug info in {path}. Recompile with `-g` or `debug = true` in Cargo.toml")]
    MissingDebugInfo { path: String },

    #[error("ptrace {op} failed: {source}")]
    Ptrace {
        op: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("DWARF error: {0}")]
    Dwarf(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Target program failed ({status}) after {} recorded events", .partial.total_events())]
    TargetFailed {
        status: TargetStatus,
        partial: Box<ProfileAggregate>,
    },

    #[error("Failed to serialize profile: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to bind stats endpoint on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TraceError {
    pub(crate) fn ptrace(op: &'static str) -> impl FnOnce(nix::Error) -> TraceError {
        move |source| TraceError::Ptrace { op, source }
    }

    /// Partial profile carried by a failed run, if any
    pub fn into_partial(self) -> Option<ProfileAggregate> {
        match self {
            TraceError::TargetFailed { partial, .. } => Some(*partial),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::EventLog;

    #[test]
    fn test_target_status_success() {
        assert!(TargetStatus::Exited(0).success());
        assert!(!TargetStatus::Exited(101).success());
        assert!(!TargetStatus::Signaled(11).success());
    }

    #[test]
    fn test_target_status_exit_code() {
        assert_eq!(TargetStatus::Exited(3).exit_code(), 3);
        assert_eq!(TargetStatus::Signaled(9).exit_code(), 137);
    }

    #[test]
    fn test_target_failed_message_counts_events() {
        let err = TraceError::TargetFailed {
            status: TargetStatus::Exited(101),
            partial: Box::new(EventLog::new().finalize("crash")),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 101"));
        assert!(msg.contains("0 recorded events"));
    }

    #[test]
    fn test_into_partial_only_for_target_failures() {
        let err = TraceError::Config("bad".to_string());
        assert!(err.into_partial().is_none());

        let err = TraceError::TargetFailed {
            status: TargetStatus::Signaled(6),
            partial: Box::new(EventLog::new().finalize("abort")),
        };
        let partial = err.into_partial().unwrap();
        assert_eq!(partial.program_name(), "abort");
    }
}
