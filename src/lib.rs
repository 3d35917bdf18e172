//! memtrace - line-level memory tracer for native programs
//!
//! Runs a program built with debug info under ptrace, records the resident
//! set size at every executed line of the program's own sources, and serves
//! the resulting trace as JSON on a local HTTP endpoint.
//!
//! ```no_run
//! use memtrace::server::{ServerConfig, StatsServer};
//! use memtrace::session::{TraceConfig, TraceSession};
//!
//! # fn main() -> memtrace::error::Result<()> {
//! let session = TraceSession::new(vec!["./fib".to_string()], TraceConfig::default());
//! let profile = session.run()?;
//! let mut server = StatsServer::start(&ServerConfig::default(), profile)?;
//! server.wait(true)?;
//! # Ok(())
//! # }
//! ```

pub mod breakpoint;
pub mod cli;
pub mod config;
pub mod dwarf;
pub mod error;
pub mod event;
pub mod filter;
pub mod image;
pub mod maps;
pub mod memory;
pub mod profile;
pub mod recorder;
pub mod server;
pub mod session;
pub mod summary;
pub mod tracee;
pub mod tracer;
