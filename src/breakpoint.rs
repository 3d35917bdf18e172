//! Software breakpoints
//!
//! A breakpoint replaces the first byte of an instruction with `int3`. The
//! set is armed and disarmed as a whole when the engine switches between
//! running and single-stepping; individual addresses can be lifted to step
//! over them.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::tracee::CodeMemory;

pub const INT3: u8 = 0xcc;

#[derive(Debug, Default)]
pub struct Breakpoints {
    /// Original byte under each breakpoint
    saved: BTreeMap<u64, u8>,
    armed: bool,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mem: &mut dyn CodeMemory, addr: u64) -> Result<()> {
        if self.saved.contains_key(&addr) {
            return Ok(());
        }
        let original = mem.read_byte(addr)?;
        self.saved.insert(addr, original);
        if self.armed {
            mem.write_byte(addr, INT3)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, mem: &mut dyn CodeMemory, addr: u64) -> Result<()> {
        if let Some(original) = self.saved.remove(&addr) {
            if self.armed {
                mem.write_byte(addr, original)?;
            }
        }
        Ok(())
    }

    pub fn arm(&mut self, mem: &mut dyn CodeMemory) -> Result<()> {
        if self.armed {
            return Ok(());
        }
        for &addr in self.saved.keys() {
            mem.write_byte(addr, INT3)?;
        }
        self.armed = true;
        Ok(())
    }

    pub fn disarm(&mut self, mem: &mut dyn CodeMemory) -> Result<()> {
        if !self.armed {
            return Ok(());
        }
        for (&addr, &original) in &self.saved {
            mem.write_byte(addr, original)?;
        }
        self.armed = false;
        Ok(())
    }

    /// Temporarily restore the original byte at an armed breakpoint
    pub fn lift(&self, mem: &mut dyn CodeMemory, addr: u64) -> Result<()> {
        match self.saved.get(&addr) {
            Some(&original) if self.armed => mem.write_byte(addr, original),
            _ => Ok(()),
        }
    }

    /// Put back a breakpoint removed with [`Breakpoints::lift`]
    pub fn restore(&self, mem: &mut dyn CodeMemory, addr: u64) -> Result<()> {
        if self.armed && self.saved.contains_key(&addr) {
            mem.write_byte(addr, INT3)?;
        }
        Ok(())
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.saved.contains_key(&addr)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn len(&self) -> usize {
        self.saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}
