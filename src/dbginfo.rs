//! # Debug Information
//!
//! Read-only queries over the debuggee's ELF and DWARF data.
//!
//! [`DebugInfo`] is built once at launch time and materializes
//! everything the engine asks about: the address ranges of all
//! subprograms, the complete line table of every compilation unit
//! (sorted by address), and the ELF symbols from both the regular and
//! the dynamic symbol table. Keeping it plain data means the engine's
//! source-level logic can be exercised in tests against hand-built
//! tables instead of real binaries.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gimli::{AttributeValue, Reader, Unit, DW_AT_high_pc, DW_AT_low_pc, DW_AT_name, DW_TAG_subprogram};
use object::{Object, ObjectSection, ObjectSymbol};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::Addr;

// the gimli::Reader we use; owns the section bytes
pub(crate) type GimliReader = gimli::EndianRcSlice<gimli::RunTimeEndian>;

/// Kind of an ELF symbol, as stored in `st_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    NoType,
    Object,
    Func,
    Section,
    File,
}

impl From<object::SymbolKind> for SymbolKind {
    fn from(kind: object::SymbolKind) -> Self {
        match kind {
            object::SymbolKind::Text => SymbolKind::Func,
            object::SymbolKind::Data => SymbolKind::Object,
            object::SymbolKind::Section => SymbolKind::Section,
            object::SymbolKind::File => SymbolKind::File,
            _ => SymbolKind::NoType,
        }
    }
}

impl Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SymbolKind::NoType => "notype",
            SymbolKind::Object => "object",
            SymbolKind::Func => "func",
            SymbolKind::Section => "section",
            SymbolKind::File => "file",
        };
        write!(f, "{name}")
    }
}

/// An ELF symbol table entry, detached from the object file.
#[derive(Debug, Clone)]
pub struct OwnedSymbol {
    pub kind: SymbolKind,
    pub name: String,
    pub addr: Addr,
}

impl Display for OwnedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<8} {} {}", self.kind, self.addr, self.name)
    }
}

/// A subprogram from the DWARF tree with a resolved code range.
#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    pub name: String,
    pub low_addr: Addr,
    /// End-exclusive.
    pub high_addr: Addr,
}

impl FunctionSymbol {
    pub fn contains(&self, addr: Addr) -> bool {
        self.low_addr <= addr && addr < self.high_addr
    }
}

/// One row of a DWARF line table.
#[derive(Debug, Clone)]
pub struct LineEntry {
    pub addr: Addr,
    pub path: PathBuf,
    pub line: u64,
    pub column: u64,
    /// Recommended breakpoint location for this address.
    pub is_stmt: bool,
    /// Marked end of the function prologue. Parsed but not consulted;
    /// prologue skipping advances one row past the function start
    /// instead.
    pub prologue_end: bool,
    /// Sentinel row: `addr` is one past the end of a sequence and does
    /// not belong to an instruction.
    pub end_sequence: bool,
    /// Index of the compilation unit this row came from.
    pub unit: usize,
}

/// Materialized debug information of the debuggee executable.
pub struct DebugInfo {
    functions: Vec<FunctionSymbol>,
    /// All line rows of all units, sorted by address.
    lines: Vec<LineEntry>,
    symbols: Vec<OwnedSymbol>,
}

impl DebugInfo {
    /// Parse the executable's ELF symbols and DWARF data.
    pub fn build(data: &[u8]) -> Result<Self> {
        let obj = object::File::parse(data)?;
        let dwarf = load_dwarf(&obj)?;

        let mut functions = Vec::new();
        let mut lines = Vec::new();
        let mut iter = dwarf.units();
        let mut unit_idx = 0;
        while let Some(header) = iter.next()? {
            let unit = dwarf.unit(header)?;
            collect_functions(&dwarf, &unit, &mut functions)?;
            collect_lines(&dwarf, &unit, unit_idx, &mut lines)?;
            unit_idx += 1;
        }
        lines.sort_by_key(|entry| entry.addr);

        let symbols = collect_elf_symbols(&obj);
        debug!(
            "loaded debug info: {} functions, {} line rows, {} symbols",
            functions.len(),
            lines.len(),
            symbols.len()
        );

        Ok(Self {
            functions,
            lines,
            symbols,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        functions: Vec<FunctionSymbol>,
        mut lines: Vec<LineEntry>,
        symbols: Vec<OwnedSymbol>,
    ) -> Self {
        lines.sort_by_key(|entry| entry.addr);
        Self {
            functions,
            lines,
            symbols,
        }
    }

    /// The subprogram whose range contains `addr`, if any.
    pub fn function_containing(&self, addr: Addr) -> Option<&FunctionSymbol> {
        self.functions.iter().find(|f| f.contains(addr))
    }

    /// Every subprogram with exactly this name.
    pub fn functions_by_name(&self, name: &str) -> Vec<&FunctionSymbol> {
        self.functions.iter().filter(|f| f.name == name).collect()
    }

    /// The line row covering `addr`: the last row at or before it.
    ///
    /// Returns `None` past the end of a sequence, where the found row
    /// is only a sentinel.
    pub fn line_entry_for(&self, addr: Addr) -> Option<&LineEntry> {
        let idx = self.lines.partition_point(|e| e.addr <= addr);
        let entry = self.lines[..idx].last()?;
        if entry.end_sequence {
            None
        } else {
            Some(entry)
        }
    }

    /// The first row strictly after the row covering `addr`.
    ///
    /// This is the prologue-skip heuristic: the row at a function's low
    /// PC describes the prologue, the next one the first real
    /// statement.
    pub fn entry_after(&self, addr: Addr) -> Option<&LineEntry> {
        let idx = self.lines.partition_point(|e| e.addr <= addr);
        let entry = self.lines.get(idx)?;
        if entry.end_sequence {
            None
        } else {
            Some(entry)
        }
    }

    /// All rows with `low <= addr < high`, excluding sequence sentinels.
    pub fn entries_in_range(&self, low: Addr, high: Addr) -> impl Iterator<Item = &LineEntry> {
        let start = self.lines.partition_point(|e| e.addr < low);
        let end = self.lines.partition_point(|e| e.addr < high);
        self.lines[start..end].iter().filter(|e| !e.end_sequence)
    }

    /// Breakpointable statements for `file:line`: the first `is_stmt`
    /// row matching the location in *every* compilation unit that has
    /// one. `file` matches by trailing path components, so both
    /// `hello.c` and `src/hello.c` work.
    pub fn stmt_entries_for_line(&self, file: &Path, line: u64) -> Vec<&LineEntry> {
        let mut seen_units = HashSet::new();
        let mut found = Vec::new();
        for entry in &self.lines {
            if seen_units.contains(&entry.unit) {
                continue;
            }
            if entry.is_stmt && entry.line == line && entry.path.ends_with(file) {
                seen_units.insert(entry.unit);
                found.push(entry);
            }
        }
        found
    }

    /// Exact-name matches from both ELF symbol tables.
    pub fn symbols_by_name(&self, name: &str) -> Vec<OwnedSymbol> {
        self.symbols
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }
}

fn load_dwarf(obj: &object::File<'_>) -> Result<gimli::Dwarf<GimliReader>> {
    let endian = if obj.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let loader = |section: gimli::SectionId| -> std::result::Result<GimliReader, gimli::Error> {
        let data = obj
            .section_by_name(section.name())
            .and_then(|s| s.uncompressed_data().ok())
            .unwrap_or_default();
        Ok(GimliReader::new(Rc::from(data.as_ref()), endian))
    };

    Ok(gimli::Dwarf::load(loader)?)
}

fn collect_functions(
    dwarf: &gimli::Dwarf<GimliReader>,
    unit: &Unit<GimliReader>,
    out: &mut Vec<FunctionSymbol>,
) -> Result<()> {
    let mut entries = unit.entries();
    while let Some((_, entry)) = entries.next_dfs()? {
        if entry.tag() != DW_TAG_subprogram {
            continue;
        }
        let Some(name) = parse_string(dwarf, unit, entry.attr(DW_AT_name)?)? else {
            continue;
        };
        let Some(low) = parse_addr(dwarf, unit, entry.attr(DW_AT_low_pc)?)? else {
            // declarations and inlined instances have no range of their own
            debug!("skipping subprogram {name:?} without a low pc");
            continue;
        };
        let Some(high) = parse_high_addr(entry.attr(DW_AT_high_pc)?, low)? else {
            warn!("subprogram {name:?} has a low pc but no high pc, skipping");
            continue;
        };
        out.push(FunctionSymbol {
            name,
            low_addr: low,
            high_addr: high,
        });
    }
    Ok(())
}

fn parse_string(
    dwarf: &gimli::Dwarf<GimliReader>,
    unit: &Unit<GimliReader>,
    attribute: Option<gimli::Attribute<GimliReader>>,
) -> Result<Option<String>> {
    match attribute {
        Some(attr) => string_value(dwarf, unit, attr.value()),
        None => Ok(None),
    }
}

fn string_value(
    dwarf: &gimli::Dwarf<GimliReader>,
    unit: &Unit<GimliReader>,
    value: AttributeValue<GimliReader>,
) -> Result<Option<String>> {
    Ok(Some(
        dwarf.attr_string(unit, value)?.to_string_lossy()?.to_string(),
    ))
}

fn parse_addr(
    dwarf: &gimli::Dwarf<GimliReader>,
    unit: &Unit<GimliReader>,
    attribute: Option<gimli::Attribute<GimliReader>>,
) -> Result<Option<Addr>> {
    Ok(match attribute {
        Some(attr) => dwarf.attr_address(unit, attr.value())?.map(Addr::from),
        None => None,
    })
}

// DW_AT_high_pc is either an absolute address or an offset from the low pc
fn parse_high_addr(
    attribute: Option<gimli::Attribute<GimliReader>>,
    low: Addr,
) -> Result<Option<Addr>> {
    Ok(match attribute {
        Some(attr) => match attr.value() {
            AttributeValue::Addr(a) => Some(Addr::from(a)),
            AttributeValue::Udata(offset) => Some(low + offset as usize),
            other => {
                warn!("unexpected DW_AT_high_pc form: {other:?}");
                None
            }
        },
        None => None,
    })
}

fn collect_lines(
    dwarf: &gimli::Dwarf<GimliReader>,
    unit: &Unit<GimliReader>,
    unit_idx: usize,
    out: &mut Vec<LineEntry>,
) -> Result<()> {
    let Some(program) = unit.line_program.clone() else {
        return Ok(());
    };

    let mut files: HashMap<u64, PathBuf> = HashMap::new();
    let mut rows = program.rows();
    while let Some((header, row)) = rows.next_row()? {
        if row.end_sequence() {
            out.push(LineEntry {
                addr: Addr::from(row.address()),
                path: PathBuf::new(),
                line: 0,
                column: 0,
                is_stmt: false,
                prologue_end: false,
                end_sequence: true,
                unit: unit_idx,
            });
            continue;
        }

        let path = match files.entry(row.file_index()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(slot) => {
                let mut path = PathBuf::new();
                if let Some(file) = header.file(row.file_index()) {
                    if let Some(dir) = file.directory(header) {
                        if let Some(dir) = string_value(dwarf, unit, dir)? {
                            path.push(dir);
                        }
                    }
                    if let Some(name) = string_value(dwarf, unit, file.path_name())? {
                        path.push(name);
                    }
                }
                slot.insert(path).clone()
            }
        };

        out.push(LineEntry {
            addr: Addr::from(row.address()),
            path,
            line: row.line().map(|l| l.get()).unwrap_or(0),
            column: match row.column() {
                gimli::ColumnType::LeftEdge => 0,
                gimli::ColumnType::Column(c) => c.get(),
            },
            is_stmt: row.is_stmt(),
            prologue_end: row.prologue_end(),
            end_sequence: false,
            unit: unit_idx,
        });
    }
    Ok(())
}

fn collect_elf_symbols(obj: &object::File<'_>) -> Vec<OwnedSymbol> {
    obj.symbols()
        .chain(obj.dynamic_symbols())
        .filter_map(|sym| {
            let name = sym.name().ok()?;
            if name.is_empty() {
                return None;
            }
            Some(OwnedSymbol {
                kind: sym.kind().into(),
                name: name.to_string(),
                addr: Addr::from(sym.address()),
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(addr: usize, line: u64, is_stmt: bool) -> LineEntry {
        LineEntry {
            addr: Addr::from(addr),
            path: PathBuf::from("src/hello.c"),
            line,
            column: 0,
            is_stmt,
            prologue_end: false,
            end_sequence: false,
            unit: 0,
        }
    }

    fn sentinel(addr: usize) -> LineEntry {
        LineEntry {
            addr: Addr::from(addr),
            path: PathBuf::new(),
            line: 0,
            column: 0,
            is_stmt: false,
            prologue_end: false,
            end_sequence: true,
            unit: 0,
        }
    }

    fn test_info() -> DebugInfo {
        DebugInfo::from_parts(
            vec![
                FunctionSymbol {
                    name: "main".to_string(),
                    low_addr: Addr::from(0x1000usize),
                    high_addr: Addr::from(0x1040usize),
                },
                FunctionSymbol {
                    name: "f".to_string(),
                    low_addr: Addr::from(0x1040usize),
                    high_addr: Addr::from(0x1060usize),
                },
            ],
            vec![
                entry(0x1000, 5, true),
                entry(0x1008, 6, true),
                entry(0x1010, 7, true),
                entry(0x1020, 8, false),
                entry(0x1030, 9, true),
                entry(0x1040, 1, true),
                entry(0x1048, 2, true),
                sentinel(0x1060),
            ],
            vec![OwnedSymbol {
                kind: SymbolKind::Func,
                name: "main".to_string(),
                addr: Addr::from(0x1000usize),
            }],
        )
    }

    #[test]
    fn test_function_containment_boundaries() {
        let info = test_info();
        assert_eq!(
            info.function_containing(Addr::from(0x1000usize)).unwrap().name,
            "main"
        );
        assert_eq!(
            info.function_containing(Addr::from(0x103fusize)).unwrap().name,
            "main"
        );
        // high pc is end-exclusive
        assert_eq!(
            info.function_containing(Addr::from(0x1040usize)).unwrap().name,
            "f"
        );
        assert!(info.function_containing(Addr::from(0x2000usize)).is_none());
    }

    #[test]
    fn test_line_entry_covers_addresses_between_rows() {
        let info = test_info();
        assert_eq!(info.line_entry_for(Addr::from(0x1008usize)).unwrap().line, 6);
        // addresses between rows belong to the previous row
        assert_eq!(info.line_entry_for(Addr::from(0x100cusize)).unwrap().line, 6);
        assert!(info.line_entry_for(Addr::from(0x0800usize)).is_none());
    }

    #[test]
    fn test_line_entry_refuses_sequence_end() {
        let info = test_info();
        // 0x1060 is only the end-of-sequence sentinel
        assert!(info.line_entry_for(Addr::from(0x1060usize)).is_none());
        assert!(info.line_entry_for(Addr::from(0x2000usize)).is_none());
    }

    #[test]
    fn test_prologue_skip_advances_one_row() {
        let info = test_info();
        let entry = info.entry_after(Addr::from(0x1000usize)).unwrap();
        assert_eq!(entry.addr, Addr::from(0x1008usize));
        assert_eq!(entry.line, 6);
        // last row of the last sequence has only the sentinel after it
        assert!(info.entry_after(Addr::from(0x1048usize)).is_none());
    }

    #[test]
    fn test_entries_in_range_excludes_high_and_sentinels() {
        let info = test_info();
        let addrs: Vec<Addr> = info
            .entries_in_range(Addr::from(0x1040usize), Addr::from(0x1060usize))
            .map(|e| e.addr)
            .collect();
        assert_eq!(addrs, vec![Addr::from(0x1040usize), Addr::from(0x1048usize)]);

        let all: Vec<u64> = info
            .entries_in_range(Addr::from(0x1000usize), Addr::from(0x1040usize))
            .map(|e| e.line)
            .collect();
        assert_eq!(all, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_stmt_entries_for_line_filters_and_matches_by_suffix() {
        let info = test_info();
        let hits = info.stmt_entries_for_line(Path::new("hello.c"), 6);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].addr, Addr::from(0x1008usize));

        let hits = info.stmt_entries_for_line(Path::new("src/hello.c"), 6);
        assert_eq!(hits.len(), 1);

        // line 8 exists but is not a statement
        assert!(info.stmt_entries_for_line(Path::new("hello.c"), 8).is_empty());
        // suffix must match whole components
        assert!(info.stmt_entries_for_line(Path::new("llo.c"), 6).is_empty());
    }

    #[test]
    fn test_stmt_entries_for_line_one_hit_per_unit() {
        let mut second_unit = entry(0x1048, 6, true);
        second_unit.unit = 1;
        let mut dupe_in_first = entry(0x1010, 6, true);
        dupe_in_first.unit = 0;
        let info = DebugInfo::from_parts(
            Vec::new(),
            vec![entry(0x1008, 6, true), dupe_in_first, second_unit],
            Vec::new(),
        );

        let hits = info.stmt_entries_for_line(Path::new("hello.c"), 6);
        // first match of unit 0, plus the one of unit 1
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].addr, Addr::from(0x1008usize));
        assert_eq!(hits[1].addr, Addr::from(0x1048usize));
    }

    #[test]
    fn test_symbols_by_name_is_exact() {
        let info = test_info();
        assert_eq!(info.symbols_by_name("main").len(), 1);
        assert!(info.symbols_by_name("mai").is_empty());
    }
}
