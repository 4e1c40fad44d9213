//! # Error Types
//!
//! Defines error types and a result alias used throughout the [crate].
//!
//! All fallible debugger operations return [`Result`]. Errors fall into
//! a few families: kernel tracing calls that failed (tagged with the
//! operation name), debug-information lookups that found nothing for an
//! address or name (reported to the user, never fatal), and malformed
//! input from the command line.

use thiserror::Error;

use crate::Addr;

/// Type alias for Results returned by minidbg functions
pub type Result<T> = std::result::Result<T, DebuggerError>;

#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("os error: {0}")]
    Os(#[from] nix::Error),
    #[error("ptrace {op} failed: {source}")]
    Ptrace {
        op: &'static str,
        source: nix::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("no debuggee is running")]
    NoDebuggee,
    #[error("tried to launch a program while one was already being debugged")]
    AlreadyRunning,
    #[error("tried to enable breakpoint again")]
    BreakpointIsAlreadyEnabled,
    #[error("tried to disable breakpoint again")]
    BreakpointIsAlreadyDisabled,
    #[error("could not parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("error while getting cli input: {0}")]
    CliUiDialogueError(#[from] dialoguer::Error),
    #[error("error while reading information from the executable file: {0}")]
    Object(#[from] object::Error),
    #[error("error while working with the DWARF debug information: {0}")]
    Dwarf(#[from] gimli::Error),
    #[error("cannot find a line table entry for address {0}")]
    NoLineEntry(Addr),
    #[error("address {0} is not inside a known function")]
    NotInFunction(Addr),
    #[error("no function {0:?} in the debug information")]
    FunctionNotFound(String),
    #[error("no statement for {file}:{line} in any line table")]
    SourceLineNotFound { file: String, line: u64 },
    #[error("unknown register: {0}")]
    UnknownRegisterName(String),
    #[error("no register is mapped to DWARF register number {0}")]
    UnknownDwarfRegister(i32),
    #[error("tried stepping out of the main function, this makes no sense")]
    StepOutMain,
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    BadArgs(&'static str),
}
