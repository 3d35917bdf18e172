//! The traced child process
//!
//! Owns the child's PID and a handle on `/proc/<pid>/mem`. The child is
//! started with PTRACE_TRACEME and stops at its exec trap before any of its
//! code runs.

use std::fs::{File, OpenOptions};
use std::io::{self, IoSliceMut};
use std::os::unix::fs::FileExt;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{Result, TraceError};

/// Why the tracee stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// SIGTRAP: single-step completion or breakpoint hit
    Trap,
    /// Any other signal about to be delivered
    Signal(Signal),
    Exited(i32),
    Signaled(Signal),
}

/// Register values the engine looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub rip: u64,
    pub rsp: u64,
}

/// Byte-level access to the tracee's code
pub trait CodeMemory {
    fn read_byte(&mut self, addr: u64) -> Result<u8>;
    fn write_byte(&mut self, addr: u64, byte: u8) -> Result<()>;
}

#[derive(Debug)]
pub struct Tracee {
    pid: Pid,
    mem: File,
    alive: bool,
}

impl Tracee {
    /// Start `command` under ptrace, stopped at its exec trap
    pub fn spawn(mut command: Command) -> Result<Self> {
        let program = command.get_program().to_string_lossy().into_owned();

        // SAFETY: traceme is async-signal-safe and touches no parent state
        unsafe {
            command.pre_exec(|| ptrace::traceme().map_err(io::Error::from));
        }
        let child = command
            .spawn()
            .map_err(|e| TraceError::InvalidTarget(format!("failed to start {}: {}", program, e)))?;
        let pid = Pid::from_raw(child.id() as i32);

        match waitpid(pid, None).map_err(TraceError::ptrace("waitpid"))? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
            WaitStatus::Exited(_, code) => {
                return Err(TraceError::InvalidTarget(format!(
                    "{} exited with code {} before it could be traced",
                    program, code
                )));
            }
            other => {
                let _ = signal::kill(pid, Signal::SIGKILL);
                let _ = waitpid(pid, None);
                return Err(TraceError::InvalidTarget(format!(
                    "{} did not stop at exec: {:?}",
                    program, other
                )));
            }
        }

        ptrace::setoptions(pid, ptrace::Options::PTRACE_O_EXITKILL)
            .map_err(TraceError::ptrace("setoptions"))?;

        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/proc/{}/mem", pid))?;

        debug!(%pid, program = %program, "tracee stopped at exec");
        Ok(Self {
            pid,
            mem,
            alive: true,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Wait for the next stop
    pub fn wait(&mut self) -> Result<Stop> {
        loop {
            match waitpid(self.pid, None).map_err(TraceError::ptrace("waitpid"))? {
                WaitStatus::Stopped(_, Signal::SIGTRAP) => return Ok(Stop::Trap),
                WaitStatus::Stopped(_, sig) => return Ok(Stop::Signal(sig)),
                WaitStatus::Exited(_, code) => {
                    self.alive = false;
                    return Ok(Stop::Exited(code));
                }
                WaitStatus::Signaled(_, sig, _) => {
                    self.alive = false;
                    return Ok(Stop::Signaled(sig));
                }
                // Event and syscall stops are not requested
                _ => continue,
            }
        }
    }

    pub fn registers(&self) -> Result<Registers> {
        let regs = ptrace::getregs(self.pid).map_err(TraceError::ptrace("getregs"))?;
        Ok(Registers {
            rip: regs.rip,
            rsp: regs.rsp,
        })
    }

    pub fn set_pc(&self, pc: u64) -> Result<()> {
        let mut regs = ptrace::getregs(self.pid).map_err(TraceError::ptrace("getregs"))?;
        regs.rip = pc;
        ptrace::setregs(self.pid, regs).map_err(TraceError::ptrace("setregs"))
    }

    pub fn step(&self, sig: Option<Signal>) -> Result<()> {
        ptrace::step(self.pid, sig).map_err(TraceError::ptrace("singlestep"))
    }

    pub fn cont(&self, sig: Option<Signal>) -> Result<()> {
        ptrace::cont(self.pid, sig).map_err(TraceError::ptrace("cont"))
    }

    /// Read a u64 from the tracee's address space
    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        let mut buffer = [0u8; 8];
        let mut local_iov = [IoSliceMut::new(&mut buffer)];
        let remote_iov = [RemoteIoVec {
            base: addr as usize,
            len: 8,
        }];
        process_vm_readv(self.pid, &mut local_iov, &remote_iov)
            .map_err(TraceError::ptrace("process_vm_readv"))?;
        Ok(u64::from_ne_bytes(buffer))
    }

    pub fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        self.mem.read_exact_at(buf, addr)?;
        Ok(())
    }

    /// Kill and reap the tracee
    pub fn kill(&mut self) {
        if !self.alive {
            return;
        }
        if let Err(e) = signal::kill(self.pid, Signal::SIGKILL) {
            warn!(pid = %self.pid, error = %e, "failed to kill tracee");
        }
        while let Ok(status) = waitpid(self.pid, None) {
            if matches!(status, WaitStatus::Exited(..) | WaitStatus::Signaled(..)) {
                break;
            }
        }
        self.alive = false;
    }
}

impl CodeMemory for Tracee {
    fn read_byte(&mut self, addr: u64) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_bytes(addr, &mut byte)?;
        Ok(byte[0])
    }

    fn write_byte(&mut self, addr: u64, byte: u8) -> Result<()> {
        self.mem.write_all_at(&[byte], addr)?;
        Ok(())
    }
}

impl Drop for Tracee {
    fn drop(&mut self) {
        self.kill();
    }
}
