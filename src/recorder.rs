//! Event recorder: the hook invoked by the execution engine
//!
//! The engine calls [`TraceHook::on_event`] synchronously at every stop it
//! considers an event. The recorder decides whether the frame is own code,
//! samples memory for accepted events, appends to its log, and tells the
//! engine whether to keep stepping into the frame.

use tracing::trace;

use crate::event::{CodeEvent, EventKind, MEMORY_UNAVAILABLE, MODULE_SENTINEL};
use crate::filter::{EventKindFilter, SourceFilter};
use crate::memory::MemoryProbe;
use crate::profile::{EventLog, ProfileAggregate};

/// Source position of the frame an event fired in
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo<'a> {
    /// Source file, empty when no line info exists for the address
    pub file: &'a str,
    pub line: u32,
    pub function: &'a str,
    /// The frame belongs to the program's entry function
    pub is_entry: bool,
}

/// Continuation decision returned by the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceDecision {
    /// Keep single-stepping inside this frame
    StepInto,
    /// Run this frame untraced until it returns
    StepOver,
}

/// Instrumentation capability installed for the duration of a trace
pub trait TraceHook {
    fn on_event(
        &mut self,
        kind: EventKind,
        frame: &FrameInfo<'_>,
        probe: &mut dyn MemoryProbe,
    ) -> TraceDecision;
}

/// Records own-code events into an append-only log
#[derive(Debug)]
pub struct EventRecorder {
    sources: SourceFilter,
    kinds: EventKindFilter,
    log: EventLog,
    baseline_mb: Option<f64>,
    failed_samples: usize,
}

impl EventRecorder {
    pub fn new(sources: SourceFilter, kinds: EventKindFilter) -> Self {
        Self {
            sources,
            kinds,
            log: EventLog::new(),
            baseline_mb: None,
            failed_samples: 0,
        }
    }

    pub fn event_count(&self) -> usize {
        self.log.len()
    }

    /// Samples that degraded to the sentinel value
    pub fn failed_samples(&self) -> usize {
        self.failed_samples
    }

    pub fn finalize(self, program_name: impl Into<String>) -> ProfileAggregate {
        self.log.finalize(program_name)
    }

    fn sample(&mut self, probe: &mut dyn MemoryProbe) -> (f64, f64) {
        match probe.resident_mb() {
            Ok(rss) => {
                let baseline = *self.baseline_mb.get_or_insert(rss);
                (rss, rss - baseline)
            }
            Err(e) => {
                self.failed_samples += 1;
                trace!(error = %e, "memory sample unavailable");
                (MEMORY_UNAVAILABLE, MEMORY_UNAVAILABLE)
            }
        }
    }
}

impl TraceHook for EventRecorder {
    fn on_event(
        &mut self,
        kind: EventKind,
        frame: &FrameInfo<'_>,
        probe: &mut dyn MemoryProbe,
    ) -> TraceDecision {
        if !self.sources.contains(frame.file) {
            return TraceDecision::StepOver;
        }

        if self.kinds.records(kind) {
            let (rss_mb, rss_delta_mb) = self.sample(probe);
            let function = if frame.is_entry {
                MODULE_SENTINEL.to_string()
            } else {
                frame.function.to_string()
            };
            trace!(%kind, line = frame.line, function = %function, rss_mb, "event");
            self.log.push(CodeEvent {
                rss_mb,
                rss_delta_mb,
                line: frame.line,
                kind,
                function,
            });
        }

        TraceDecision::StepInto
    }
}
