//! Configuration file support
//!
//! Options can be set in a `memtrace.toml` file:
//!
//! ```toml
//! [trace]
//! events = "line,exception"
//! source_roots = ["/home/dev/app"]
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! shutdown_timeout_ms = 2000
//! ```
//!
//! Command-line flags override file values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::cli::Cli;
use crate::error::{Result, TraceError};
use crate::filter::EventKindFilter;
use crate::server::ServerConfig;
use crate::session::{TargetOutput, TraceConfig};

/// Looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "memtrace.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub trace: TraceSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TraceSection {
    pub events: Option<String>,
    pub source_roots: Vec<PathBuf>,
    pub program_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            shutdown_timeout_ms: defaults.shutdown_timeout.as_millis() as u64,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TraceError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| TraceError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TraceError::Config(e.to_string()))
    }

    /// Load an explicit config file, or `memtrace.toml` when it exists
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                debug!(file = DEFAULT_CONFIG_FILE, "using config file");
                Self::from_file(DEFAULT_CONFIG_FILE)
            }
            None => Ok(Self::default()),
        }
    }

    /// Override file values with the flags given on the command line
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(events) = &cli.events {
            self.trace.events = Some(events.clone());
        }
        if !cli.source_roots.is_empty() {
            self.trace.source_roots = cli.source_roots.clone();
        }
        if let Some(name) = &cli.program_name {
            self.trace.program_name = Some(name.clone());
        }
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
    }

    pub fn trace_config(&self, target_stdout: TargetOutput) -> Result<TraceConfig> {
        let events = match &self.trace.events {
            Some(expr) => EventKindFilter::from_expr(expr)?,
            None => EventKindFilter::default(),
        };
        Ok(TraceConfig {
            events,
            source_roots: self.trace.source_roots.clone(),
            program_name: self.trace.program_name.clone(),
            target_stdout,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            shutdown_timeout: Duration::from_millis(self.server.shutdown_timeout_ms),
        }
    }
}
