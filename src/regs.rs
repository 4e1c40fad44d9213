//! # Register File
//!
//! Names the 27 general-purpose, segment and flag registers of x86-64
//! and maps each to its slot in the kernel's user-area register block,
//! its DWARF register number, and its human readable name.
//!
//! The descriptor table is ordered exactly like `user_regs_struct`, so
//! the index of a descriptor doubles as the word index into the block
//! returned by `PTRACE_GETREGS`. Reading or writing a single register
//! is therefore one kernel round trip and a positional array access,
//! with no per-register case analysis. That ordering is load-bearing;
//! do not reorder the enum or the table.

use std::fmt::Display;
use std::fmt::Write as _;
use std::str::FromStr;

use nix::libc::user_regs_struct;

use crate::errors::{DebuggerError, Result};

/// Number of words in the kernel's user-area register block on x86-64.
pub const REGISTER_COUNT: usize = 27;

// Positional indexing below relies on the register block being exactly
// 27 words.
const _: () = assert!(std::mem::size_of::<user_regs_struct>() == REGISTER_COUNT * 8);

/// One of the registers exposed through the user-area register block.
///
/// Declared in user-area order, so `reg as usize` is the word index of
/// that register in [`user_regs_struct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    R15,
    R14,
    R13,
    R12,
    Rbp,
    Rbx,
    R11,
    R10,
    R9,
    R8,
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    OrigRax,
    Rip,
    Cs,
    Eflags,
    Rsp,
    Ss,
    FsBase,
    GsBase,
    Ds,
    Es,
    Fs,
    Gs,
}

/// Static description of one register: identity, DWARF register number
/// (`-1` if DWARF has none), and name.
pub struct RegisterDescriptor {
    pub reg: Register,
    pub dwarf: i32,
    pub name: &'static str,
}

impl RegisterDescriptor {
    const fn new(reg: Register, dwarf: i32, name: &'static str) -> Self {
        Self { reg, dwarf, name }
    }
}

/// All register descriptors, in user-area order.
pub const REGISTERS: [RegisterDescriptor; REGISTER_COUNT] = [
    RegisterDescriptor::new(Register::R15, 15, "r15"),
    RegisterDescriptor::new(Register::R14, 14, "r14"),
    RegisterDescriptor::new(Register::R13, 13, "r13"),
    RegisterDescriptor::new(Register::R12, 12, "r12"),
    RegisterDescriptor::new(Register::Rbp, 6, "rbp"),
    RegisterDescriptor::new(Register::Rbx, 3, "rbx"),
    RegisterDescriptor::new(Register::R11, 11, "r11"),
    RegisterDescriptor::new(Register::R10, 10, "r10"),
    RegisterDescriptor::new(Register::R9, 9, "r9"),
    RegisterDescriptor::new(Register::R8, 8, "r8"),
    RegisterDescriptor::new(Register::Rax, 0, "rax"),
    RegisterDescriptor::new(Register::Rcx, 2, "rcx"),
    RegisterDescriptor::new(Register::Rdx, 1, "rdx"),
    RegisterDescriptor::new(Register::Rsi, 4, "rsi"),
    RegisterDescriptor::new(Register::Rdi, 5, "rdi"),
    RegisterDescriptor::new(Register::OrigRax, -1, "orig_rax"),
    RegisterDescriptor::new(Register::Rip, -1, "rip"),
    RegisterDescriptor::new(Register::Cs, 51, "cs"),
    RegisterDescriptor::new(Register::Eflags, 49, "eflags"),
    RegisterDescriptor::new(Register::Rsp, 7, "rsp"),
    RegisterDescriptor::new(Register::Ss, 52, "ss"),
    RegisterDescriptor::new(Register::FsBase, 58, "fs_base"),
    RegisterDescriptor::new(Register::GsBase, 59, "gs_base"),
    RegisterDescriptor::new(Register::Ds, 53, "ds"),
    RegisterDescriptor::new(Register::Es, 50, "es"),
    RegisterDescriptor::new(Register::Fs, 54, "fs"),
    RegisterDescriptor::new(Register::Gs, 55, "gs"),
];

impl Register {
    /// Word index of this register inside the user-area block.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        REGISTERS[self.index()].name
    }

    /// Find the register for a DWARF register number.
    pub fn from_dwarf(dwarf: i32) -> Result<Self> {
        REGISTERS
            .iter()
            .find(|d| d.dwarf == dwarf && d.dwarf != -1)
            .map(|d| d.reg)
            .ok_or(DebuggerError::UnknownDwarfRegister(dwarf))
    }
}

impl FromStr for Register {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self> {
        REGISTERS
            .iter()
            .find(|d| d.name == s)
            .map(|d| d.reg)
            .ok_or_else(|| DebuggerError::UnknownRegisterName(s.to_string()))
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// View the register block as words, indexed like [`REGISTERS`].
pub(crate) fn block_words(regs: &user_regs_struct) -> &[u64; REGISTER_COUNT] {
    // sound per the size assertion above: the block is 27 consecutive u64
    unsafe { &*std::ptr::from_ref(regs).cast() }
}

pub(crate) fn block_words_mut(regs: &mut user_regs_struct) -> &mut [u64; REGISTER_COUNT] {
    unsafe { &mut *std::ptr::from_mut(regs).cast() }
}

/// Format every register as `name value`, one per line, in table order.
pub fn format_dump(regs: &user_regs_struct) -> String {
    let words = block_words(regs);
    let mut out = String::new();
    for descriptor in &REGISTERS {
        let _ = writeln!(
            out,
            "{:<8} {:#018x}",
            descriptor.name,
            words[descriptor.reg.index()]
        );
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_descriptor_order_matches_enum() {
        for (idx, descriptor) in REGISTERS.iter().enumerate() {
            assert_eq!(descriptor.reg.index(), idx, "table order broken at {idx}");
        }
    }

    #[test]
    fn test_user_area_order_spot_checks() {
        // layout of user_regs_struct: r15 first, rip at word 16, gs last
        assert_eq!(REGISTERS[0].name, "r15");
        assert_eq!(Register::Rip.index(), 16);
        assert_eq!(Register::Rbp.index(), 4);
        assert_eq!(REGISTERS[REGISTER_COUNT - 1].name, "gs");
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(Register::from_str("rip").unwrap(), Register::Rip);
        assert_eq!(Register::from_str("orig_rax").unwrap(), Register::OrigRax);
        assert!(matches!(
            Register::from_str("zmm0"),
            Err(DebuggerError::UnknownRegisterName(_))
        ));
    }

    #[test]
    fn test_lookup_by_dwarf_number() {
        assert_eq!(Register::from_dwarf(0).unwrap(), Register::Rax);
        assert_eq!(Register::from_dwarf(6).unwrap(), Register::Rbp);
        assert_eq!(Register::from_dwarf(59).unwrap(), Register::GsBase);
        // -1 marks "no DWARF number" and must never resolve
        assert!(matches!(
            Register::from_dwarf(-1),
            Err(DebuggerError::UnknownDwarfRegister(-1))
        ));
    }

    #[test]
    fn test_block_indexing() {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        regs.rip = 0xdead_beef;
        regs.r15 = 17;
        let words = block_words(&regs);
        assert_eq!(words[Register::Rip.index()], 0xdead_beef);
        assert_eq!(words[Register::R15.index()], 17);

        block_words_mut(&mut regs)[Register::Rbp.index()] = 0x7fff_0000;
        assert_eq!(regs.rbp, 0x7fff_0000);
    }
}
