//! Interactive command line front end.
//!
//! Reads one line at a time from a `minidbg` prompt, matches the first
//! word against the command table by prefix, and turns the rest into a
//! [`Status`] for the engine. Bad input is reported and the prompt
//! restored; only a well-formed command leaves the input loop.

use std::str::FromStr;

use dialoguer::BasicHistory;
use tracing::{error, info, trace, warn};

use super::{DebuggerUI, Status};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::regs::Register;
use crate::{Addr, Word};

pub struct CliUi {
    buf: String,
    buf_preparsed: Vec<String>,
    history: BasicHistory,
}

impl CliUi {
    pub fn build() -> Result<Self> {
        let ui = CliUi {
            buf: String::new(),
            buf_preparsed: Vec::new(),
            history: BasicHistory::new(),
        };
        Ok(ui)
    }

    /// Read the next input line. Returns `false` on end of input.
    fn get_input(&mut self) -> Result<bool> {
        let input = dialoguer::Input::<String>::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("minidbg")
            .history_with(&mut self.history)
            .allow_empty(true)
            .interact_text();

        match input {
            Ok(line) => {
                self.buf = line;
                trace!("processing '{}'", self.buf);
                self.buf_preparsed = self.buf.split_whitespace().map(ToString::to_string).collect();
                Ok(true)
            }
            Err(dialoguer::Error::IO(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl DebuggerUI for CliUi {
    fn process(&mut self, feedback: &Feedback) -> Result<Status> {
        match feedback {
            Feedback::Ok => (),
            Feedback::Error(e) => warn!("{e}"),
            other => info!("{other}"),
        }

        loop {
            if !self.get_input()? {
                return Ok(Status::DebuggerQuit);
            }
            if self.buf_preparsed.is_empty() {
                continue;
            }
            match parse_command(&self.buf_preparsed) {
                Ok(status) => return Ok(status),
                Err(e) => error!("{e}"),
            }
        }
    }
}

/// `input` names `command` if it is a non-empty prefix of it.
fn is_prefix(input: &str, command: &str) -> bool {
    !input.is_empty() && command.starts_with(input)
}

/// Match one preparsed input line against the command table.
///
/// Commands are tried in a fixed order, so the shortest prefix that
/// reaches a command selects it (`c` continues, `b` breaks, `sy` is
/// needed for symbols). `stepi` is matched exactly since `step` shades
/// it.
fn parse_command(words: &[String]) -> Result<Status> {
    let command = words[0].as_str();

    if command == "stepi" {
        return Ok(Status::StepSingle);
    }

    if is_prefix(command, "continue") {
        Ok(Status::Continue)
    } else if is_prefix(command, "break") {
        let target = words
            .get(1)
            .ok_or(DebuggerError::BadArgs("break 0xADDR|FILE:LINE|FUNCTION"))?;
        parse_break_target(target)
    } else if is_prefix(command, "delete") {
        let addr = words
            .get(1)
            .ok_or(DebuggerError::BadArgs("delete 0xADDR"))?;
        Ok(Status::DelBreakpoint(Addr::from(
            get_number(addr)? as usize
        )))
    } else if is_prefix(command, "step") {
        Ok(Status::StepInto)
    } else if is_prefix(command, "next") {
        Ok(Status::StepOver)
    } else if is_prefix(command, "finish") {
        Ok(Status::StepOut)
    } else if is_prefix(command, "register") {
        // subcommands are only considered once the command itself
        // matched; `foo read` must not reach this arm
        match words.get(1).map(String::as_str) {
            Some("dump") => Ok(Status::DumpRegisters),
            Some("read") => {
                let name = words
                    .get(2)
                    .ok_or(DebuggerError::BadArgs("register read NAME"))?;
                Ok(Status::ReadRegister(Register::from_str(name)?))
            }
            Some("write") => {
                if words.len() < 4 {
                    return Err(DebuggerError::BadArgs("register write NAME 0xVAL"));
                }
                let register = Register::from_str(&words[2])?;
                let value = get_number(&words[3])?;
                Ok(Status::SetRegister(register, value))
            }
            _ => Err(DebuggerError::BadArgs(
                "register dump|read NAME|write NAME 0xVAL",
            )),
        }
    } else if is_prefix(command, "memory") {
        match words.get(1).map(String::as_str) {
            Some("read") => {
                let addr = words
                    .get(2)
                    .ok_or(DebuggerError::BadArgs("memory read 0xADDR"))?;
                Ok(Status::ReadMem(Addr::from(get_number(addr)? as usize)))
            }
            Some("write") => {
                if words.len() < 4 {
                    return Err(DebuggerError::BadArgs("memory write 0xADDR 0xVAL"));
                }
                let addr = Addr::from(get_number(&words[2])? as usize);
                let value = get_number(&words[3])? as Word;
                Ok(Status::WriteMem(addr, value))
            }
            _ => Err(DebuggerError::BadArgs(
                "memory read 0xADDR|write 0xADDR 0xVAL",
            )),
        }
    } else if is_prefix(command, "symbol") {
        let name = words.get(1).ok_or(DebuggerError::BadArgs("symbol NAME"))?;
        Ok(Status::GetSymbolsByName(name.clone()))
    } else if is_prefix(command, "quit") {
        Ok(Status::DebuggerQuit)
    } else {
        Err(DebuggerError::UnknownCommand(command.to_string()))
    }
}

/// Classify a `break` argument: hex address, `FILE:LINE`, or function
/// name.
fn parse_break_target(target: &str) -> Result<Status> {
    if let Some(hex) = target.strip_prefix("0x") {
        let addr = u64::from_str_radix(hex, 16)?;
        Ok(Status::SetBreakpoint(Addr::from(addr as usize)))
    } else if let Some((file, line)) = target.rsplit_once(':') {
        Ok(Status::SetBreakpointAtLine(file.to_string(), line.parse()?))
    } else {
        Ok(Status::SetBreakpointAtFunction(target.to_string()))
    }
}

fn get_number(mut raw: &str) -> Result<u64> {
    if let Some(stripped) = raw.strip_prefix("0x") {
        raw = stripped;
    }

    Ok(u64::from_str_radix(raw, 16)?)
}

#[cfg(test)]
mod test {
    use super::*;

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(ToString::to_string).collect()
    }

    #[test]
    fn test_get_number() {
        assert_eq!(0x19u64, get_number("19").unwrap());
        assert_eq!(0x19u64, get_number("0x19").unwrap());
        assert_eq!(0x19u64, get_number("0x00019").unwrap());
        assert_eq!(0x19u64, get_number("00019").unwrap());
        assert!(get_number("xyz").is_err());
    }

    #[test]
    fn test_break_target_forms() {
        assert_eq!(
            parse_command(&words("break 0x401126")).unwrap(),
            Status::SetBreakpoint(Addr::from(0x401126usize))
        );
        assert_eq!(
            parse_command(&words("break hello.c:7")).unwrap(),
            Status::SetBreakpointAtLine("hello.c".to_string(), 7)
        );
        assert_eq!(
            parse_command(&words("break main")).unwrap(),
            Status::SetBreakpointAtFunction("main".to_string())
        );
    }

    #[test]
    fn test_prefix_matching() {
        assert_eq!(parse_command(&words("c")).unwrap(), Status::Continue);
        assert_eq!(parse_command(&words("cont")).unwrap(), Status::Continue);
        assert_eq!(parse_command(&words("continue")).unwrap(), Status::Continue);
        assert_eq!(parse_command(&words("n")).unwrap(), Status::StepOver);
        assert_eq!(parse_command(&words("fin")).unwrap(), Status::StepOut);
        assert_eq!(parse_command(&words("q")).unwrap(), Status::DebuggerQuit);
    }

    #[test]
    fn test_step_shades_stepi_and_symbol() {
        assert_eq!(parse_command(&words("s")).unwrap(), Status::StepInto);
        assert_eq!(parse_command(&words("step")).unwrap(), Status::StepInto);
        assert_eq!(parse_command(&words("stepi")).unwrap(), Status::StepSingle);
        assert_eq!(
            parse_command(&words("sy main")).unwrap(),
            Status::GetSymbolsByName("main".to_string())
        );
        assert_eq!(
            parse_command(&words("symbol main")).unwrap(),
            Status::GetSymbolsByName("main".to_string())
        );
    }

    #[test]
    fn test_register_subcommands() {
        assert_eq!(
            parse_command(&words("register dump")).unwrap(),
            Status::DumpRegisters
        );
        assert_eq!(
            parse_command(&words("register read rip")).unwrap(),
            Status::ReadRegister(Register::Rip)
        );
        assert_eq!(
            parse_command(&words("reg write rax 0x42")).unwrap(),
            Status::SetRegister(Register::Rax, 0x42)
        );
        assert!(matches!(
            parse_command(&words("register")),
            Err(DebuggerError::BadArgs(_))
        ));
        assert!(matches!(
            parse_command(&words("register read")),
            Err(DebuggerError::BadArgs(_))
        ));
        assert!(matches!(
            parse_command(&words("register write rax")),
            Err(DebuggerError::BadArgs(_))
        ));
    }

    #[test]
    fn test_memory_subcommands() {
        assert_eq!(
            parse_command(&words("memory read 0x7fff0000")).unwrap(),
            Status::ReadMem(Addr::from(0x7fff0000usize))
        );
        assert_eq!(
            parse_command(&words("mem write 0x7fff0000 0xdeadbeefcafebabe")).unwrap(),
            Status::WriteMem(Addr::from(0x7fff0000usize), 0xdeadbeefcafebabeu64 as Word)
        );
        assert!(matches!(
            parse_command(&words("memory peek 0x10")),
            Err(DebuggerError::BadArgs(_))
        ));
    }

    #[test]
    fn test_subcommands_only_route_under_matched_command() {
        // a second word of read/write must never select the
        // register/memory handlers on its own
        assert!(matches!(
            parse_command(&words("foo read rax")),
            Err(DebuggerError::UnknownCommand(_))
        ));
        assert!(matches!(
            parse_command(&words("foo write 0x10 0x20")),
            Err(DebuggerError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(
            parse_command(&words("xyzzy")),
            Err(DebuggerError::UnknownCommand(_))
        ));
    }
}
