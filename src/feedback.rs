//! Results the engine hands back to the UI after each operation.

use std::fmt::Display;

use nix::libc::user_regs_struct;

use crate::dbginfo::OwnedSymbol;
use crate::errors::DebuggerError;
use crate::regs;
use crate::Word;

#[derive(Debug)]
pub enum Feedback {
    Ok,
    /// The debuggee is gone; carries its exit code.
    Exit(i32),
    Word(Word),
    Register(u64),
    Registers(user_regs_struct),
    Symbols(Vec<OwnedSymbol>),
    Error(DebuggerError),
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Ok => write!(f, "ok")?,
            Feedback::Exit(code) => write!(f, "debuggee exited with code {code}")?,
            Feedback::Word(w) => write!(f, "{w:#018x}")?,
            Feedback::Register(v) => write!(f, "{v:#018x}")?,
            Feedback::Registers(regs) => write!(f, "\n{}", regs::format_dump(regs))?,
            Feedback::Symbols(symbols) => {
                if symbols.is_empty() {
                    write!(f, "no matching symbols")?;
                }
                for (idx, symbol) in symbols.iter().enumerate() {
                    if idx > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{symbol}")?;
                }
            }
            Feedback::Error(e) => write!(f, "error: {e}")?,
        }

        Ok(())
    }
}

impl From<Result<Feedback, DebuggerError>> for Feedback {
    fn from(result: Result<Feedback, DebuggerError>) -> Self {
        match result {
            Ok(feedback) => feedback,
            Err(e) => Feedback::Error(e),
        }
    }
}
