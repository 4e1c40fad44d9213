//! # Debugger Engine
//!
//! The state machine at the heart of minidbg. It owns the debuggee
//! (tracee handle, breakpoint map, debug info), dispatches the commands
//! coming from the UI, and implements the stepping primitives on top of
//! the kernel tracing calls and the DWARF line table.
//!
//! The subtle parts are concentrated here: the instruction pointer
//! points one past the INT3 after a breakpoint trap and must be pulled
//! back; a stopped-on breakpoint is passed by disabling it, stepping
//! one instruction, and re-arming it; and the source-level steps are
//! driven entirely by line-table geometry (step-in re-steps until the
//! line *changes*, step-over blankets the enclosing function's
//! statements with temporary breakpoints).

use std::ffi::CString;
use std::path::Path;

use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::{execv, fork, ForkResult};
use tracing::{debug, error, info, trace, warn};

use crate::breakpoint::Breakpoint;
use crate::consts::{segv_reason, SI_KERNEL, TRAP_BRKPT, TRAP_TRACE};
use crate::dbginfo::DebugInfo;
use crate::debuggee::Debuggee;
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::regs::Register;
use crate::source;
use crate::tracee::Tracee;
use crate::ui::{DebuggerUI, Status};
use crate::{Addr, Word, WORD_BYTES};

/// Source lines shown around a stop location.
const SOURCE_CONTEXT_LINES: u64 = 2;

pub struct Debugger<UI: DebuggerUI> {
    pub(crate) debuggee: Option<Debuggee>,
    pub(crate) ui: UI,
}

impl<UI: DebuggerUI> Debugger<UI> {
    pub fn build(ui: UI) -> Result<Self> {
        Ok(Debugger { debuggee: None, ui })
    }

    fn debuggee(&self) -> Result<&Debuggee> {
        self.debuggee.as_ref().ok_or(DebuggerError::NoDebuggee)
    }

    fn debuggee_mut(&mut self) -> Result<&mut Debuggee> {
        self.debuggee.as_mut().ok_or(DebuggerError::NoDebuggee)
    }

    /// Fork and execute the debuggee, traced from its first
    /// instruction, and load its debug information.
    pub fn launch(&mut self, path: impl AsRef<Path>, args: &[CString]) -> Result<()> {
        if self.debuggee.is_some() {
            return Err(DebuggerError::AlreadyRunning);
        }

        let path: &Path = path.as_ref();
        if !path.exists() {
            let err = DebuggerError::ExecutableDoesNotExist(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }
        if !path.is_file() {
            let err = DebuggerError::ExecutableIsNotAFile(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }

        let data = std::fs::read(path)?;
        let dbginfo = DebugInfo::build(&data)?;

        let fork_res = unsafe { fork() };
        match fork_res {
            Err(e) => {
                error!("could not start executable: {e}");
                Err(e.into())
            }
            Ok(ForkResult::Parent { child }) => {
                info!("launched {} as debuggee {child}", path.display());
                self.debuggee = Some(Debuggee::build(Tracee::new(child), dbginfo));
                Ok(())
            }
            Ok(ForkResult::Child) => {
                let cpath = CString::new(path.to_string_lossy().to_string().as_str())?;
                // DWARF addresses are only runtime addresses with ASLR off
                personality::set(Persona::ADDR_NO_RANDOMIZE)
                    .inspect_err(|e| eprintln!("error while disabling ASLR: {e}"))?;
                ptrace::traceme().inspect_err(|e| eprintln!("error while doing traceme: {e}"))?;
                let mut argv = vec![cpath.clone()];
                argv.extend_from_slice(args);
                execv(&cpath, &argv)?;
                unreachable!()
            }
        }
    }

    /// Wait for the initial stop of the tracee, then hand control to
    /// the command loop.
    pub fn run_debugger(&mut self) -> Result<()> {
        if let Some(dbge) = self.debuggee.as_ref() {
            dbge.tracee.wait()?; // the stop right after execv
            debug!("debuggee {} reached its first instruction", dbge.tracee.pid());
        } else {
            info!("debuggee not yet launched");
        }

        let mut feedback = Feedback::Ok;
        loop {
            let status = match self.ui.process(&feedback) {
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
                Ok(s) => s,
            };
            feedback = match status {
                Status::DebuggerQuit => break,
                Status::Continue => self.cont(None),
                Status::SetBreakpoint(addr) => self.set_bp(addr),
                Status::SetBreakpointAtFunction(name) => self.set_bp_at_function(&name),
                Status::SetBreakpointAtLine(file, line) => self.set_bp_at_source_line(&file, line),
                Status::DelBreakpoint(addr) => self.del_bp(addr),
                Status::StepInto => self.step_into(),
                Status::StepOver => self.step_over(),
                Status::StepOut => self.step_out(),
                Status::StepSingle => self.step_single(),
                Status::DumpRegisters => self.dump_regs(),
                Status::ReadRegister(r) => self.read_reg(r),
                Status::SetRegister(r, v) => self.set_reg(r, v),
                Status::ReadMem(addr) => self.read_mem(addr),
                Status::WriteMem(addr, value) => self.write_mem(addr, value),
                Status::GetSymbolsByName(name) => self.get_symbol_by_name(&name),
            }
            .into();

            // the tracee is gone, drop everything we kept about it
            if let Feedback::Exit(_) = feedback {
                self.debuggee = None;
            }
        }

        Ok(())
    }

    /// Resume the tracee, hopping over a breakpoint at the current PC
    /// if there is one, and wait for the next stop.
    pub fn cont(&mut self, sig: Option<Signal>) -> Result<Feedback> {
        let fb = self.step_over_breakpoint()?;
        if let Feedback::Exit(_) = fb {
            return Ok(fb);
        }

        self.debuggee()?.tracee.cont(sig)?;
        self.wait_signal()
    }

    /// Block until the next tracee stop and classify it.
    pub fn wait_signal(&self) -> Result<Feedback> {
        let dbge = self.debuggee()?;

        match dbge.tracee.wait()? {
            WaitStatus::Exited(_, exit_code) => {
                info!("debuggee exited with code {exit_code}");
                Ok(Feedback::Exit(exit_code))
            }
            WaitStatus::Signaled(_, signal, _) => {
                info!("debuggee terminated by signal {signal}");
                Ok(Feedback::Exit(-1))
            }
            _ => {
                let siginfo = dbge.tracee.siginfo()?;
                let signal = Signal::try_from(siginfo.si_signo)?;
                match signal {
                    Signal::SIGTRAP => self.handle_sigtrap(siginfo.si_code)?,
                    Signal::SIGSEGV => {
                        info!("debuggee segfaulted: {}", segv_reason(siginfo.si_code));
                    }
                    other => info!("debuggee received {}", other.as_str()),
                }
                Ok(Feedback::Ok)
            }
        }
    }

    fn handle_sigtrap(&self, si_code: i32) -> Result<()> {
        match si_code {
            SI_KERNEL | TRAP_BRKPT => {
                // the cpu has already consumed the INT3, so the
                // reported PC is one past the breakpointed instruction
                let dbge = self.debuggee()?;
                let pc = Addr::from(dbge.tracee.read_register(Register::Rip)?) - 1usize;
                dbge.tracee.write_register(Register::Rip, pc.u64())?;
                info!("hit breakpoint at {pc}");
                self.report_source_context(pc);
            }
            TRAP_TRACE => trace!("single step done"),
            other => warn!("unknown SIGTRAP code: {other}"),
        }
        Ok(())
    }

    fn report_source_context(&self, pc: Addr) {
        let Ok(dbge) = self.debuggee() else {
            return;
        };
        let Some(entry) = dbge.dbginfo.line_entry_for(pc) else {
            debug!("no line entry for {pc}");
            return;
        };
        match source::listing(&entry.path, entry.line, SOURCE_CONTEXT_LINES) {
            Ok(text) => info!("{}:{}\n{text}", entry.path.display(), entry.line),
            Err(e) => debug!("could not read source {}: {e}", entry.path.display()),
        }
    }

    /// Install a new enabled breakpoint at `addr`.
    pub fn set_bp(&mut self, addr: Addr) -> Result<Feedback> {
        let dbge = self.debuggee_mut()?;
        if dbge.breakpoints.contains_key(&addr) {
            warn!("breakpoint at {addr} already exists, keeping the old one");
            return Ok(Feedback::Ok);
        }

        let mut bp = Breakpoint::new(dbge.tracee, addr);
        bp.enable()?;
        dbge.breakpoints.insert(addr, bp);
        debug!("set breakpoint at {addr}");

        Ok(Feedback::Ok)
    }

    /// Disable and remove the breakpoint at `addr`.
    pub fn del_bp(&mut self, addr: Addr) -> Result<Feedback> {
        let dbge = self.debuggee_mut()?;
        if let Some(bp) = dbge.breakpoints.get_mut(&addr) {
            if bp.is_enabled() {
                bp.disable()?;
            }
            dbge.breakpoints.remove(&addr);
        } else {
            warn!("removed a breakpoint at {addr} that did not exist");
        }

        Ok(Feedback::Ok)
    }

    /// Breakpoint on every subprogram named `name`, one line-table
    /// entry past its start so the prologue is skipped.
    pub fn set_bp_at_function(&mut self, name: &str) -> Result<Feedback> {
        let targets: Vec<Addr> = {
            let dbge = self.debuggee()?;
            let functions = dbge.dbginfo.functions_by_name(name);
            if functions.is_empty() {
                return Err(DebuggerError::FunctionNotFound(name.to_string()));
            }
            functions
                .iter()
                .filter_map(|fun| match dbge.dbginfo.entry_after(fun.low_addr) {
                    Some(entry) => Some(entry.addr),
                    None => {
                        warn!(
                            "no line table entry after the start of {name:?} at {}",
                            fun.low_addr
                        );
                        None
                    }
                })
                .collect()
        };

        for addr in targets {
            self.set_bp(addr)?;
        }
        Ok(Feedback::Ok)
    }

    /// Breakpoint at `file:line`: the first statement row matching the
    /// location in every compilation unit that has one.
    pub fn set_bp_at_source_line(&mut self, file: &str, line: u64) -> Result<Feedback> {
        let targets: Vec<Addr> = self
            .debuggee()?
            .dbginfo
            .stmt_entries_for_line(Path::new(file), line)
            .iter()
            .map(|entry| entry.addr)
            .collect();

        if targets.is_empty() {
            return Err(DebuggerError::SourceLineNotFound {
                file: file.to_string(),
                line,
            });
        }

        for addr in targets {
            self.set_bp(addr)?;
        }
        Ok(Feedback::Ok)
    }

    /// If an enabled breakpoint sits at the current PC, pass it:
    /// disable, step one instruction, re-arm.
    fn step_over_breakpoint(&mut self) -> Result<Feedback> {
        let here = self.get_current_addr()?;
        if self
            .debuggee()?
            .breakpoints
            .get(&here)
            .is_some_and(Breakpoint::is_enabled)
        {
            self.dse(here)
        } else {
            trace!("no enabled breakpoint at {here}, nothing to hop over");
            Ok(Feedback::Ok)
        }
    }

    // disable, step, enable. The map is re-borrowed around the wait
    // because wait_signal needs the debuggee too.
    fn dse(&mut self, here: Addr) -> Result<Feedback> {
        trace!("disabling the breakpoint at {here}");
        self.debuggee_mut()?
            .breakpoints
            .get_mut(&here)
            .unwrap()
            .disable()?;

        trace!("single step over the restored instruction");
        self.debuggee()?.tracee.single_step()?;
        let fb = self.wait_signal()?;
        if let Feedback::Exit(_) = fb {
            // that was the last instruction, nothing left to re-arm
            return Ok(fb);
        }

        trace!("re-arming the breakpoint at {here}");
        self.debuggee_mut()?
            .breakpoints
            .get_mut(&here)
            .unwrap()
            .enable()?;

        Ok(Feedback::Ok)
    }

    fn atomic_single_step(&self) -> Result<Feedback> {
        self.debuggee()?.tracee.single_step()?;
        self.wait_signal()
    }

    /// One instruction, hopping a breakpoint at the current PC if
    /// necessary.
    pub fn single_step(&mut self) -> Result<Feedback> {
        let here = self.get_current_addr()?;
        if self.debuggee()?.breakpoints.contains_key(&here) {
            trace!("step over instruction with breakpoint");
            self.step_over_breakpoint()
        } else {
            trace!("step regular instruction");
            self.atomic_single_step()
        }
    }

    /// The `stepi` command: one instruction, then show where we are.
    pub fn step_single(&mut self) -> Result<Feedback> {
        let fb = self.single_step()?;
        if let Feedback::Exit(_) = fb {
            return Ok(fb);
        }

        let pc = self.get_current_addr()?;
        trace!("now at {pc}");
        self.report_source_context(pc);
        Ok(Feedback::Ok)
    }

    /// Step into: single-step until the source line changes.
    ///
    /// The line table is not monotonic across loops and inlining, so
    /// the only reliable predicate is that the line *changed*.
    pub fn step_into(&mut self) -> Result<Feedback> {
        let pc = self.get_current_addr()?;
        let start_line = self
            .debuggee()?
            .dbginfo
            .line_entry_for(pc)
            .ok_or(DebuggerError::NoLineEntry(pc))?
            .line;

        loop {
            let fb = self.single_step()?;
            if let Feedback::Exit(_) = fb {
                return Ok(fb);
            }

            let pc = self.get_current_addr()?;
            let entry = self
                .debuggee()?
                .dbginfo
                .line_entry_for(pc)
                .ok_or(DebuggerError::NoLineEntry(pc))?;
            if entry.line != start_line {
                break;
            }
        }

        let pc = self.get_current_addr()?;
        self.report_source_context(pc);
        Ok(Feedback::Ok)
    }

    /// Step over ("next"): stop at the next statement executed in the
    /// enclosing function without entering callees.
    ///
    /// Every line-table row of the function except the current one gets
    /// a temporary breakpoint, plus one at the return address, so the
    /// next stop is the next executed statement in this frame no matter
    /// which way control flows. Callees run to completion under the
    /// return-address breakpoint.
    pub fn step_over(&mut self) -> Result<Feedback> {
        let pc = self.get_current_addr()?;

        let (low, high) = {
            let dbge = self.debuggee()?;
            let fun = dbge
                .dbginfo
                .function_containing(pc)
                .ok_or(DebuggerError::NotInFunction(pc))?;
            (fun.low_addr, fun.high_addr)
        };
        let start_addr = self
            .debuggee()?
            .dbginfo
            .line_entry_for(pc)
            .ok_or(DebuggerError::NoLineEntry(pc))?
            .addr;

        // collect the target addresses before touching the map
        let candidates: Vec<Addr> = {
            let dbge = self.debuggee()?;
            dbge.dbginfo
                .entries_in_range(low, high)
                .filter(|entry| {
                    entry.addr != start_addr && !dbge.breakpoints.contains_key(&entry.addr)
                })
                .map(|entry| entry.addr)
                .collect()
        };

        let mut to_delete = Vec::new();
        for addr in candidates {
            self.set_bp(addr)?;
            to_delete.push(addr);
        }

        let frame_pointer = Addr::from(self.get_reg(Register::Rbp)?);
        let return_addr =
            Addr::from(self.debuggee()?.tracee.read_word(frame_pointer + WORD_BYTES)?);
        if !self.debuggee()?.breakpoints.contains_key(&return_addr) {
            self.set_bp(return_addr)?;
            to_delete.push(return_addr);
        }

        let result = self.cont(None);

        self.remove_temporary_breakpoints(&result, &to_delete);
        result
    }

    /// Step out ("finish"): run until the current function returns.
    pub fn step_out(&mut self) -> Result<Feedback> {
        let pc = self.get_current_addr()?;
        {
            let dbge = self.debuggee()?;
            if let Some(fun) = dbge.dbginfo.function_containing(pc) {
                if fun.name == "main" {
                    error!("no stepping out of the earliest stack frame allowed");
                    return Err(DebuggerError::StepOutMain);
                }
            } else {
                warn!("no debug symbol for the current address {pc}");
            }
        }

        let frame_pointer = Addr::from(self.get_reg(Register::Rbp)?);
        let return_addr =
            Addr::from(self.debuggee()?.tracee.read_word(frame_pointer + WORD_BYTES)?);
        trace!("frame pointer: {frame_pointer}");
        trace!("return address: {return_addr}");

        let mut to_delete = Vec::new();
        if !self.debuggee()?.breakpoints.contains_key(&return_addr) {
            self.set_bp(return_addr)?;
            to_delete.push(return_addr);
        }

        let result = self.cont(None);

        self.remove_temporary_breakpoints(&result, &to_delete);
        result
    }

    // Tear down temporaries on every exit path. When the resume ended
    // the tracee the whole map is about to be dropped instead, and a
    // failed removal must not mask the resume's own result.
    fn remove_temporary_breakpoints(&mut self, result: &Result<Feedback>, addrs: &[Addr]) {
        if let Ok(Feedback::Exit(_)) = result {
            return;
        }
        for addr in addrs {
            if let Err(e) = self.del_bp(*addr) {
                warn!("could not remove temporary breakpoint at {addr}: {e}");
            }
        }
    }

    pub fn get_current_addr(&self) -> Result<Addr> {
        Ok(self.get_reg(Register::Rip)?.into())
    }

    pub fn get_reg(&self, r: Register) -> Result<u64> {
        self.debuggee()?.tracee.read_register(r)
    }

    pub fn set_reg(&self, r: Register, value: u64) -> Result<Feedback> {
        self.debuggee()?.tracee.write_register(r, value)?;
        Ok(Feedback::Ok)
    }

    pub fn read_reg(&self, r: Register) -> Result<Feedback> {
        Ok(Feedback::Register(self.get_reg(r)?))
    }

    pub fn dump_regs(&self) -> Result<Feedback> {
        let regs = self.debuggee()?.tracee.read_registers()?;
        Ok(Feedback::Registers(regs))
    }

    pub fn read_mem(&self, addr: Addr) -> Result<Feedback> {
        let word = self.debuggee()?.tracee.read_word(addr)?;
        Ok(Feedback::Word(word))
    }

    pub fn write_mem(&self, addr: Addr, value: Word) -> Result<Feedback> {
        self.debuggee()?.tracee.write_word(addr, value)?;
        Ok(Feedback::Ok)
    }

    pub fn get_symbol_by_name(&self, name: &str) -> Result<Feedback> {
        let symbols = self.debuggee()?.dbginfo.symbols_by_name(name);
        Ok(Feedback::Symbols(symbols))
    }

    /// Kill a still-attached debuggee on the way out.
    pub fn cleanup(&self) -> Result<()> {
        if let Some(dbge) = &self.debuggee {
            dbge.kill()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct NoUi;

    impl DebuggerUI for NoUi {
        fn process(&mut self, _feedback: &Feedback) -> Result<Status> {
            Ok(Status::DebuggerQuit)
        }
    }

    #[test]
    fn test_operations_without_debuggee_are_rejected() {
        let mut dbg = Debugger::build(NoUi).unwrap();
        assert!(matches!(dbg.cont(None), Err(DebuggerError::NoDebuggee)));
        assert!(matches!(
            dbg.set_bp(Addr::from(0x1000usize)),
            Err(DebuggerError::NoDebuggee)
        ));
        assert!(matches!(dbg.step_into(), Err(DebuggerError::NoDebuggee)));
        assert!(matches!(dbg.step_over(), Err(DebuggerError::NoDebuggee)));
        assert!(matches!(dbg.step_out(), Err(DebuggerError::NoDebuggee)));
        assert!(matches!(dbg.dump_regs(), Err(DebuggerError::NoDebuggee)));
        assert!(matches!(
            dbg.read_mem(Addr::from(0x1000usize)),
            Err(DebuggerError::NoDebuggee)
        ));
        assert!(matches!(
            dbg.get_symbol_by_name("main"),
            Err(DebuggerError::NoDebuggee)
        ));
    }

    #[test]
    fn test_launch_rejects_missing_executable() {
        let mut dbg = Debugger::build(NoUi).unwrap();
        assert!(matches!(
            dbg.launch("/nonexistent/program", &[]),
            Err(DebuggerError::ExecutableDoesNotExist(_))
        ));
    }
}
