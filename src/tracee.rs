//! Thin wrapper over the kernel tracing primitives.
//!
//! Everything the debugger does to the traced child goes through
//! [`Tracee`]: resuming, single-stepping, reading and writing words and
//! the register block, fetching signal information, and waiting for the
//! next stop. All operations block the calling thread; only
//! [`Tracee::wait`] blocks for an unbounded time.

use nix::libc::{siginfo_t, user_regs_struct};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::errors::{DebuggerError, Result};
use crate::regs::{block_words, block_words_mut, Register};
use crate::{Addr, Word};

/// Handle to the process under debugger control.
#[derive(Debug, Clone, Copy)]
pub struct Tracee {
    pid: Pid,
}

impl Tracee {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn ptrace_err(op: &'static str) -> impl Fn(nix::Error) -> DebuggerError {
        move |source| DebuggerError::Ptrace { op, source }
    }

    /// Resume the tracee until its next stop, optionally delivering a signal.
    pub fn cont(&self, signal: Option<Signal>) -> Result<()> {
        ptrace::cont(self.pid, signal).map_err(Self::ptrace_err("cont"))
    }

    /// Execute exactly one instruction, then stop.
    pub fn single_step(&self) -> Result<()> {
        ptrace::step(self.pid, None).map_err(Self::ptrace_err("step"))
    }

    /// Read one machine word from the tracee's memory.
    pub fn read_word(&self, addr: Addr) -> Result<Word> {
        ptrace::read(self.pid, addr.raw_pointer()).map_err(Self::ptrace_err("peekdata"))
    }

    /// Write one machine word into the tracee's memory, replacing
    /// whatever is there.
    pub fn write_word(&self, addr: Addr, word: Word) -> Result<()> {
        ptrace::write(self.pid, addr.raw_pointer(), word).map_err(Self::ptrace_err("pokedata"))
    }

    pub fn read_registers(&self) -> Result<user_regs_struct> {
        ptrace::getregs(self.pid).map_err(Self::ptrace_err("getregs"))
    }

    pub fn write_registers(&self, regs: user_regs_struct) -> Result<()> {
        ptrace::setregs(self.pid, regs).map_err(Self::ptrace_err("setregs"))
    }

    /// Read a single register: one `getregs` round trip and a
    /// positional index into the block.
    pub fn read_register(&self, reg: Register) -> Result<u64> {
        let regs = self.read_registers()?;
        Ok(block_words(&regs)[reg.index()])
    }

    /// Overwrite a single register, leaving the rest of the block as is.
    pub fn write_register(&self, reg: Register, value: u64) -> Result<()> {
        let mut regs = self.read_registers()?;
        block_words_mut(&mut regs)[reg.index()] = value;
        self.write_registers(regs)
    }

    /// Signal information for the stop the tracee is currently in.
    pub fn siginfo(&self) -> Result<siginfo_t> {
        ptrace::getsiginfo(self.pid).map_err(Self::ptrace_err("getsiginfo"))
    }

    /// Block until the tracee reports a state change.
    pub fn wait(&self) -> Result<WaitStatus> {
        Ok(waitpid(self.pid, None)?)
    }

    pub fn kill(&self) -> Result<()> {
        ptrace::kill(self.pid).map_err(Self::ptrace_err("kill"))
    }
}
