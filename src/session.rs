//! Trace session: one traced execution of one program
//!
//! A session validates the target, spawns it under ptrace, installs the
//! instrumentation, drives the engine to completion and finalizes the event
//! log into a [`ProfileAggregate`].

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::dwarf::DwarfContext;
use crate::error::{Result, TraceError};
use crate::filter::{EventKindFilter, SourceFilter};
use crate::image::TargetImage;
use crate::maps::MemoryMaps;
use crate::memory::StatmProbe;
use crate::profile::ProfileAggregate;
use crate::recorder::EventRecorder;
use crate::tracee::Tracee;
use crate::tracer::{Engine, Instrumentation};

/// Where the target's standard output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetOutput {
    #[default]
    Inherit,
    /// Keep our stdout free for machine-readable output
    Stderr,
    Null,
}

impl TargetOutput {
    fn stdio(self) -> Stdio {
        match self {
            TargetOutput::Inherit => Stdio::inherit(),
            TargetOutput::Stderr => Stdio::from(io::stderr()),
            TargetOutput::Null => Stdio::null(),
        }
    }
}

/// Resolved tracing options
#[derive(Debug, Clone, Default)]
pub struct TraceConfig {
    pub events: EventKindFilter,
    /// Own-code roots; empty means derive from the file defining `main`
    pub source_roots: Vec<PathBuf>,
    /// Display name, defaults to the program as given on the command line
    pub program_name: Option<String>,
    pub target_stdout: TargetOutput,
}

#[derive(Debug)]
pub struct TraceSession {
    command: Vec<String>,
    config: TraceConfig,
}

impl TraceSession {
    pub fn new(command: Vec<String>, config: TraceConfig) -> Self {
        Self { command, config }
    }

    pub fn program_name(&self) -> String {
        self.config
            .program_name
            .clone()
            .or_else(|| self.command.first().cloned())
            .unwrap_or_default()
    }

    /// Execute the target under tracing and return its profile
    ///
    /// A target that exits non-zero or dies from a signal yields
    /// [`TraceError::TargetFailed`] carrying everything recorded so far.
    pub fn run(self) -> Result<ProfileAggregate> {
        let program_name = self.program_name();
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| TraceError::InvalidTarget("command is empty".to_string()))?;

        let path = resolve_program(program)?;
        let dwarf = DwarfContext::load(&path)?;
        let mut sources = SourceFilter::with_roots(self.config.source_roots.clone());
        let image = TargetImage::build(&dwarf, &mut sources)?;
        let mut recorder = EventRecorder::new(sources, self.config.events.clone());

        let mut command = Command::new(&path);
        command.args(args).stdout(self.config.target_stdout.stdio());
        let tracee = Tracee::spawn(command)?;
        let pid = tracee.pid();

        let exe = fs::read_link(format!("/proc/{}/exe", pid))?;
        let bias = MemoryMaps::for_pid(pid)?.load_bias(&exe, dwarf.image_base());
        let instr = Instrumentation::install(tracee, &image, bias)?;

        let probe = Box::new(StatmProbe::for_pid(pid));
        let status = Engine::new(instr, &image, bias, &mut recorder, probe).run()?;

        info!(
            program = %program_name,
            %status,
            events = recorder.event_count(),
            failed_samples = recorder.failed_samples(),
            "trace finished"
        );

        let profile = recorder.finalize(program_name);
        if status.success() {
            Ok(profile)
        } else {
            Err(TraceError::TargetFailed {
                status,
                partial: Box::new(profile),
            })
        }
    }
}

/// Resolve a program name the way `execvp` would
fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(TraceError::InvalidTarget(format!("{} does not exist", program)))
        };
    }

    let found = env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    });
    debug!(program, resolved = ?found, "resolved program");
    found.ok_or_else(|| TraceError::InvalidTarget(format!("{} not found in PATH", program)))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
