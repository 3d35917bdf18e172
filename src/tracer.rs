//! Execution engine: drives a ptrace'd target to completion
//!
//! The engine alternates between two modes:
//! - **Running**: breakpoints armed, the target runs freely (PTRACE_CONT)
//!   until it enters an own function, reaches a pending return site, or
//!   starts panicking.
//! - **Stepping**: breakpoints disarmed, own code is single-stepped and every
//!   new statement row is reported as a `line` event.
//!
//! Calls into foreign code are never stepped: the engine plants a return
//! site at the caller's return address and switches to Running.

use std::collections::HashMap;

use nix::sys::signal::Signal;
use tracing::{debug, trace, warn};

use crate::breakpoint::Breakpoints;
use crate::error::{Result, TargetStatus};
use crate::event::EventKind;
use crate::image::TargetImage;
use crate::memory::MemoryProbe;
use crate::recorder::{FrameInfo, TraceDecision, TraceHook};
use crate::tracee::{Registers, Stop, Tracee};

/// Longest x86-64 instruction, bounds the call-site check
const MAX_INSN_LEN: u64 = 15;

/// Signals reported as `exception` events
const FATAL_SIGNALS: &[Signal] = &[
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGABRT,
];

/// Breakpoints installed in a live tracee
///
/// Dropping the guard restores the original code and kills a tracee that is
/// still running.
#[derive(Debug)]
pub struct Instrumentation {
    tracee: Tracee,
    breakpoints: Breakpoints,
}

impl Instrumentation {
    /// Plant breakpoints at every own function entry and fault hook
    pub fn install(tracee: Tracee, image: &TargetImage, bias: u64) -> Result<Self> {
        let mut instr = Self {
            tracee,
            breakpoints: Breakpoints::new(),
        };
        let addrs = image
            .functions()
            .iter()
            .map(|f| f.start)
            .chain(image.fault_hooks().iter().copied());
        for addr in addrs {
            instr.breakpoints.insert(&mut instr.tracee, addr + bias)?;
        }
        instr.breakpoints.arm(&mut instr.tracee)?;

        debug!(
            breakpoints = instr.breakpoints.len(),
            bias = %format!("{:#x}", bias),
            "instrumentation installed"
        );
        Ok(instr)
    }

}

impl Drop for Instrumentation {
    fn drop(&mut self) {
        if !self.tracee.is_alive() {
            return;
        }
        if let Err(e) = self.breakpoints.disarm(&mut self.tracee) {
            warn!(error = %e, "failed to restore original code");
        }
        self.tracee.kill();
        debug!("tracee killed during cleanup");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Running,
    Stepping,
}

/// Activation of an own function being stepped
#[derive(Debug, Clone)]
struct Frame {
    function: usize,
    /// `rsp` once the activation has returned
    exit_rsp: u64,
    ret_addr: u64,
    lines: LineCursor,
}

/// Statement rows seen so far in one activation
#[derive(Debug, Clone, Default)]
struct LineCursor {
    /// Line of the last `line` event
    last_line: Option<u32>,
    /// Address of the last statement row stepped onto
    last_stmt: Option<u64>,
    /// Address of the row that produced the last `line` event
    emitted_at: Option<u64>,
}

impl LineCursor {
    /// Advance onto the statement row at `addr`; true when it starts a new line
    ///
    /// Rows on `prologue_line` are skipped until the first event. A jump back
    /// onto the line just reported, straight from the row that reported it,
    /// is the same pass over that line (a loop's closing jump and its head).
    fn advance(&mut self, addr: u64, line: u32, prologue_line: Option<u32>) -> bool {
        if self.last_line.is_none() && prologue_line == Some(line) {
            self.last_stmt = Some(addr);
            return false;
        }

        let back_edge = self.last_stmt.is_some_and(|last| addr <= last);
        let same_pass = self.last_line == Some(line)
            && self.last_stmt == self.emitted_at
            && self.emitted_at != Some(addr);
        let changed = self.last_line != Some(line) || (back_edge && !same_pass);
        self.last_stmt = Some(addr);
        if !changed {
            return false;
        }
        self.last_line = Some(line);
        self.emitted_at = Some(addr);
        true
    }
}

/// Where stepping resumes after untraced code finishes
#[derive(Debug, Clone)]
struct ReturnSite {
    addr: u64,
    rsp: u64,
    /// Frame stack depth when the site was planted
    depth: usize,
    /// Resume at an instruction that was already reported
    in_place: bool,
}

pub struct Engine<'a> {
    instr: Instrumentation,
    image: &'a TargetImage,
    bias: u64,
    hook: &'a mut dyn TraceHook,
    probe: Box<dyn MemoryProbe>,
    mode: Mode,
    frames: Vec<Frame>,
    return_sites: Vec<ReturnSite>,
    /// Registers before the pending single-step
    prev: Option<Registers>,
    ret_cache: HashMap<u64, bool>,
    last_fault: Option<u64>,
    steps: u64,
}

impl<'a> Engine<'a> {
    pub fn new(
        instr: Instrumentation,
        image: &'a TargetImage,
        bias: u64,
        hook: &'a mut dyn TraceHook,
        probe: Box<dyn MemoryProbe>,
    ) -> Self {
        Self {
            instr,
            image,
            bias,
            hook,
            probe,
            mode: Mode::Running,
            frames: Vec::new(),
            return_sites: Vec::new(),
            prev: None,
            ret_cache: HashMap::new(),
            last_fault: None,
            steps: 0,
        }
    }

    /// Run the target until it exits
    pub fn run(mut self) -> Result<TargetStatus> {
        self.instr.tracee.cont(None)?;
        let mut pending: Option<Stop> = None;

        loop {
            let stop = match pending.take() {
                Some(stop) => stop,
                None => self.instr.tracee.wait()?,
            };
            pending = match stop {
                Stop::Exited(code) => {
                    debug!(code, steps = self.steps, "target exited");
                    return Ok(TargetStatus::Exited(code));
                }
                Stop::Signaled(sig) => {
                    debug!(signal = %sig, steps = self.steps, "target killed by signal");
                    return Ok(TargetStatus::Signaled(sig as i32));
                }
                Stop::Trap => match self.mode {
                    Mode::Stepping => self.on_step()?,
                    Mode::Running => self.on_breakpoint()?,
                },
                Stop::Signal(sig) => self.on_signal(sig)?,
            };
        }
    }

    fn on_step(&mut self) -> Result<Option<Stop>> {
        let regs = self.instr.tracee.registers()?;
        let Some(prev) = self.prev.take() else {
            return self.resume_stepping(regs, true);
        };
        self.steps += 1;

        if self.is_return(prev.rip)? {
            while self.frames.last().is_some_and(|f| f.exit_rsp <= regs.rsp) {
                self.pop_frame();
            }
            return if self.in_top_frame(regs.rip) {
                self.resume_stepping(regs, true)
            } else {
                self.run_from(regs.rip)
            };
        }

        if regs.rsp == prev.rsp.wrapping_sub(8) {
            let ret_addr = self.instr.tracee.read_u64(regs.rsp)?;
            if ret_addr > prev.rip && ret_addr <= prev.rip + MAX_INSN_LEN {
                return self.on_call(regs, ret_addr);
            }
        }

        if self.in_top_frame(regs.rip) {
            return self.resume_stepping(regs, true);
        }
        self.on_frame_escape(regs)
    }

    /// A call instruction just executed inside a stepped frame
    fn on_call(&mut self, regs: Registers, ret_addr: u64) -> Result<Option<Stop>> {
        let link = regs.rip.wrapping_sub(self.bias);
        match self.image.function_starting_at(link) {
            Some(idx) => self.call_into(idx, regs, regs.rsp + 8, ret_addr),
            None => {
                trace!(target_addr = %format!("{:#x}", link), "stepping over foreign call");
                self.add_return_site(ret_addr, regs.rsp + 8, false)?;
                self.run_from(regs.rip)
            }
        }
    }

    /// Control left the top frame without a call or return (tail jump)
    fn on_frame_escape(&mut self, regs: Registers) -> Result<Option<Stop>> {
        let Some(frame) = self.pop_frame() else {
            return self.run_from(regs.rip);
        };
        let link = regs.rip.wrapping_sub(self.bias);
        if let Some(idx) = self.image.function_starting_at(link) {
            return self.call_into(idx, regs, frame.exit_rsp, frame.ret_addr);
        }
        self.add_return_site(frame.ret_addr, frame.exit_rsp, false)?;
        self.run_from(regs.rip)
    }

    fn on_breakpoint(&mut self) -> Result<Option<Stop>> {
        let regs = self.instr.tracee.registers()?;
        let addr = regs.rip.wrapping_sub(1);
        if !self.instr.breakpoints.contains(addr) {
            trace!(rip = %format!("{:#x}", regs.rip), "trap outside any breakpoint");
            self.instr.tracee.cont(None)?;
            return Ok(None);
        }
        self.instr.tracee.set_pc(addr)?;
        let regs = Registers {
            rip: addr,
            rsp: regs.rsp,
        };

        if let Some(pos) = self
            .return_sites
            .iter()
            .rposition(|s| s.addr == addr && s.rsp == regs.rsp)
        {
            let site = self.return_sites.remove(pos);
            self.release_site(addr)?;
            while self.frames.len() > site.depth {
                self.pop_frame();
            }
            return if self.in_top_frame(addr) {
                self.resume_stepping(regs, !site.in_place)
            } else {
                self.run_from(addr)
            };
        }

        let link = addr.wrapping_sub(self.bias);
        if self.image.is_fault_hook(link) {
            self.on_fault()?;
            return self.run_from(addr);
        }
        if let Some(idx) = self.image.function_starting_at(link) {
            let ret_addr = self.instr.tracee.read_u64(regs.rsp)?;
            return self.call_into(idx, regs, regs.rsp + 8, ret_addr);
        }

        // Return site of another activation
        self.run_from(addr)
    }

    fn on_signal(&mut self, sig: Signal) -> Result<Option<Stop>> {
        let regs = self.instr.tracee.registers()?;
        if FATAL_SIGNALS.contains(&sig) && self.last_fault != Some(regs.rip) {
            self.last_fault = Some(regs.rip);
            debug!(signal = %sig, rip = %format!("{:#x}", regs.rip), "fault in target");
            self.emit_at_top(EventKind::Exception);
        }

        if self.mode == Mode::Stepping {
            // Pick up stepping here once a handler returns
            self.add_return_site(regs.rip, regs.rsp, true)?;
            self.mode = Mode::Running;
            self.prev = None;
            self.instr.breakpoints.arm(&mut self.instr.tracee)?;
        }
        self.instr.tracee.cont(Some(sig))?;
        Ok(None)
    }

    /// A panic started: report it and drop every traced activation
    fn on_fault(&mut self) -> Result<()> {
        debug!(depth = self.frames.len(), "panic in target");
        self.emit_at_top(EventKind::Exception);
        while !self.frames.is_empty() {
            self.pop_frame();
        }
        for site in std::mem::take(&mut self.return_sites) {
            self.release_site(site.addr)?;
        }
        Ok(())
    }

    /// Enter own function `idx` whose first instruction is at `regs.rip`
    fn call_into(
        &mut self,
        idx: usize,
        regs: Registers,
        exit_rsp: u64,
        ret_addr: u64,
    ) -> Result<Option<Stop>> {
        let image = self.image;
        let function = image.function(idx);
        match self.emit(EventKind::Call, idx, &function.file, function.line) {
            TraceDecision::StepInto => {
                self.frames.push(Frame {
                    function: idx,
                    exit_rsp,
                    ret_addr,
                    lines: LineCursor::default(),
                });
                self.resume_stepping(regs, true)
            }
            TraceDecision::StepOver => {
                self.add_return_site(ret_addr, exit_rsp, false)?;
                self.run_from(regs.rip)
            }
        }
    }

    /// Switch to (or stay in) Stepping and execute one instruction
    fn resume_stepping(&mut self, regs: Registers, check_statement: bool) -> Result<Option<Stop>> {
        self.instr.breakpoints.disarm(&mut self.instr.tracee)?;
        self.mode = Mode::Stepping;
        if check_statement {
            self.on_instruction(regs.rip);
        }
        self.prev = Some(regs);
        self.instr.tracee.step(None)?;
        Ok(None)
    }

    /// Switch to Running from `pc`, stepping over a breakpoint there
    fn run_from(&mut self, pc: u64) -> Result<Option<Stop>> {
        self.mode = Mode::Running;
        self.prev = None;
        let Instrumentation {
            tracee,
            breakpoints,
        } = &mut self.instr;
        breakpoints.arm(tracee)?;

        if !breakpoints.contains(pc) {
            tracee.cont(None)?;
            return Ok(None);
        }

        breakpoints.lift(tracee, pc)?;
        tracee.step(None)?;
        let stop = tracee.wait()?;
        if tracee.is_alive() {
            breakpoints.restore(tracee, pc)?;
        }
        match stop {
            Stop::Trap => {
                tracee.cont(None)?;
                Ok(None)
            }
            other => Ok(Some(other)),
        }
    }

    /// Report a `line` event when `pc` starts a new statement in the top frame
    fn on_instruction(&mut self, pc: u64) {
        let image = self.image;
        let link = pc.wrapping_sub(self.bias);
        let Some(stmt) = image.statement_at(link) else {
            return;
        };
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        let function = image.function(frame.function);

        // Prologue rows carry the header line, unless the whole body sits on it
        let prologue_line = (!function.single_line).then_some(function.line);
        if !frame.lines.advance(link, stmt.line, prologue_line) {
            return;
        }

        let info = FrameInfo {
            file: &stmt.file,
            line: stmt.line,
            function: &function.name,
            is_entry: function.is_entry,
        };
        self.hook.on_event(EventKind::Line, &info, self.probe.as_mut());
    }

    fn emit(&mut self, kind: EventKind, idx: usize, file: &str, line: u32) -> TraceDecision {
        let function = self.image.function(idx);
        let info = FrameInfo {
            file,
            line,
            function: &function.name,
            is_entry: function.is_entry,
        };
        self.hook.on_event(kind, &info, self.probe.as_mut())
    }

    fn emit_at_top(&mut self, kind: EventKind) {
        let image = self.image;
        let Some((idx, last_line)) = self
            .frames
            .last()
            .map(|f| (f.function, f.lines.last_line))
        else {
            return;
        };
        let function = image.function(idx);
        self.emit(kind, idx, &function.file, last_line.unwrap_or(function.line));
    }

    /// Pop the top frame, reporting its `return`
    fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        let image = self.image;
        let function = image.function(frame.function);
        let line = frame.lines.last_line.unwrap_or(function.line);
        self.emit(EventKind::Return, frame.function, &function.file, line);
        Some(frame)
    }

    fn in_top_frame(&self, pc: u64) -> bool {
        let link = pc.wrapping_sub(self.bias);
        self.frames.last().is_some_and(|frame| {
            let function = self.image.function(frame.function);
            link >= function.start && link < function.end
        })
    }

    fn add_return_site(&mut self, addr: u64, rsp: u64, in_place: bool) -> Result<()> {
        self.return_sites.push(ReturnSite {
            addr,
            rsp,
            depth: self.frames.len(),
            in_place,
        });
        self.instr.breakpoints.insert(&mut self.instr.tracee, addr)
    }

    /// Remove the breakpoint of a consumed return site unless still needed
    fn release_site(&mut self, addr: u64) -> Result<()> {
        let link = addr.wrapping_sub(self.bias);
        let shared = self.return_sites.iter().any(|s| s.addr == addr);
        let permanent =
            self.image.function_starting_at(link).is_some() || self.image.is_fault_hook(link);
        if shared || permanent {
            return Ok(());
        }
        self.instr.breakpoints.remove(&mut self.instr.tracee, addr)
    }

    fn is_return(&mut self, addr: u64) -> Result<bool> {
        if let Some(&is_ret) = self.ret_cache.get(&addr) {
            return Ok(is_ret);
        }
        let mut code = [0u8; 2];
        self.instr.tracee.read_bytes(addr, &mut code)?;
        let is_ret = is_ret_opcode(code);
        self.ret_cache.insert(addr, is_ret);
        Ok(is_ret)
    }
}

/// `ret`, `ret imm16`, and the `rep`/`bnd` prefixed forms
fn is_ret_opcode(code: [u8; 2]) -> bool {
    matches!(code, [0xc3, _] | [0xc2, _] | [0xf3, 0xc3] | [0xf2, 0xc3])
}
