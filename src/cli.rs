//! CLI argument parsing for memtrace

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// What to do with the finished profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Summary on stderr, profile served over HTTP (default)
    Text,
    /// Profile JSON on stdout, nothing served
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "memtrace")]
#[command(version)]
#[command(about = "Line-level memory tracer that serves the trace as JSON", long_about = None)]
pub struct Cli {
    /// Host the stats endpoint binds to [default: 127.0.0.1]
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port of the stats endpoint, 0 picks a free one [default: 8000]
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Event kinds to record (e.g., --events line,call,return or --events all)
    #[arg(short = 'e', long = "events", value_name = "EXPR")]
    pub events: Option<String>,

    /// Directory whose sources count as own code (repeatable)
    #[arg(long = "source-root", value_name = "DIR")]
    pub source_roots: Vec<PathBuf>,

    /// Program name reported in the profile
    #[arg(long = "program-name", value_name = "NAME")]
    pub program_name: Option<String>,

    /// Configuration file [default: ./memtrace.toml if present]
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Print the summary and exit without serving
    #[arg(long = "no-serve")]
    pub no_serve: bool,

    /// Serve the partial profile when the target fails
    #[arg(long = "serve-partial")]
    pub serve_partial: bool,

    /// Stop serving after the first /profile response
    #[arg(long)]
    pub once: bool,

    /// Enable debug tracing output to stderr
    #[arg(long)]
    pub debug: bool,

    /// Program to trace and its arguments (everything after --)
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}
