//! DWARF debug info and symbol table access
//!
//! Uses addr2line for address → file:line lookups and the ELF symbol table
//! (via object) for function boundaries and names. All addresses here are
//! link-time addresses; callers subtract the load bias first.

use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol};
use std::fs::File;
use std::path::Path;

use crate::error::{Result, TraceError};

const PAGE_MASK: u64 = !0xfff;

/// Source location information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source file path
    pub file: String,
    /// Line number
    pub line: u32,
}

/// A function symbol from the ELF symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub start: u64,
    pub end: u64,
    /// Demangled name without the hash suffix
    pub name: String,
}

impl Symbol {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// One row of the line table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRow {
    pub address: u64,
    pub file: String,
    pub line: u32,
}

/// DWARF debug info context for a binary
pub struct DwarfContext {
    /// addr2line context for DWARF lookups
    context: addr2line::Context<gimli::EndianRcSlice<gimli::RunTimeEndian>>,
    /// Function symbols sorted by start address
    symbols: Vec<Symbol>,
    /// Lowest page-aligned segment address, subtracted when computing the load bias
    image_base: u64,
}

impl DwarfContext {
    /// Load DWARF debug info and the function symbol table from an ELF binary
    pub fn load(binary_path: &Path) -> Result<Self> {
        if !binary_path.exists() {
            return Err(TraceError::InvalidTarget(format!(
                "binary does not exist: {}",
                binary_path.display()
            )));
        }

        let file = File::open(binary_path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file) }?;

        let object = object::File::parse(&*mmap).map_err(|e| {
            TraceError::InvalidTarget(format!(
                "{} is not a loadable executable: {}",
                binary_path.display(),
                e
            ))
        })?;

        if object.section_by_name(".debug_info").is_none() {
            return Err(TraceError::MissingDebugInfo {
                path: binary_path.display().to_string(),
            });
        }

        let endian = if object.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let load_section =
            |id: gimli::SectionId| -> gimli::Result<gimli::EndianRcSlice<gimli::RunTimeEndian>> {
                let data = object
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[]));
                let bytes: std::rc::Rc<[u8]> = std::rc::Rc::from(data.into_owned());
                Ok(gimli::EndianRcSlice::new(bytes, endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)
            .map_err(|e| TraceError::Dwarf(format!("Failed to load DWARF sections: {}", e)))?;

        let context = addr2line::Context::from_dwarf(dwarf)
            .map_err(|e| TraceError::Dwarf(format!("Failed to create DWARF context: {}", e)))?;

        let image_base = object
            .segments()
            .map(|segment| segment.address())
            .min()
            .unwrap_or(0)
            & PAGE_MASK;

        Ok(Self {
            context,
            symbols: collect_symbols(&object),
            image_base,
        })
    }

    /// Look up the line-table location for an address
    pub fn lookup(&self, addr: u64) -> Option<SourceLocation> {
        let location = self.context.find_location(addr).ok().flatten()?;
        let file = location.file?;
        let line = location.line.filter(|&l| l > 0)?;
        Some(SourceLocation {
            file: file.to_string(),
            line,
        })
    }

    /// Line-table rows starting inside `[start, end)`, in address order
    pub fn line_rows(&self, start: u64, end: u64) -> Vec<LineRow> {
        let Ok(rows) = self.context.find_location_range(start, end) else {
            return Vec::new();
        };
        let mut out: Vec<LineRow> = rows
            .filter(|(address, _, _)| *address >= start && *address < end)
            .filter_map(|(address, _, location)| {
                Some(LineRow {
                    address,
                    file: location.file?.to_string(),
                    line: location.line.filter(|&l| l > 0)?,
                })
            })
            .collect();
        out.sort_by_key(|row| row.address);
        out.dedup_by_key(|row| row.address);
        out
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Function symbol containing an address
    pub fn symbol_at(&self, addr: u64) -> Option<&Symbol> {
        let idx = self.symbols.partition_point(|s| s.start <= addr);
        let symbol = self.symbols.get(idx.checked_sub(1)?)?;
        symbol.contains(addr).then_some(symbol)
    }

    pub fn image_base(&self) -> u64 {
        self.image_base
    }
}

/// Sized text symbols, demangled, sorted and deduplicated by address
fn collect_symbols(object: &object::File<'_>) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = object
        .symbols()
        .filter(|symbol| symbol.kind() == object::SymbolKind::Text && symbol.size() > 0)
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            Some(Symbol {
                start: symbol.address(),
                end: symbol.address() + symbol.size(),
                name: demangle(name),
            })
        })
        .collect();
    symbols.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    symbols.dedup_by_key(|s| s.start);
    symbols
}

/// Demangle a Rust symbol, dropping the trailing hash
pub fn demangle(name: &str) -> String {
    format!("{:#}", rustc_demangle::demangle(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    const SOURCE: &str = "fn helper(x: u32) -> u32 {\n    x * 2\n}\n\nfn main() {\n    let v = helper(21);\n    println!(\"{}\", v);\n}\n";

    fn compile_test_binary(debug: bool) -> (TempDir, std::path::PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let src_file = temp_dir.path().join("test.rs");
        let bin_file = temp_dir.path().join("test_bin");

        fs::write(&src_file, SOURCE).unwrap();

        let mut cmd = Command::new("rustc");
        cmd.arg(&src_file).arg("-o").arg(&bin_file);
        if debug {
            cmd.arg("-g");
        } else {
            cmd.arg("-C").arg("debuginfo=0").arg("-C").arg("strip=debuginfo");
        }
        cmd.status().unwrap();

        (temp_dir, bin_file)
    }

    #[test]
    fn test_dwarf_context_loads() {
        let (_temp_dir, bin_file) = compile_test_binary(true);
        let result = DwarfContext::load(&bin_file);
        assert!(result.is_ok(), "Should load DWARF context: {:?}", result.err());
    }

    #[test]
    fn test_missing_binary_is_invalid_target() {
        let result = DwarfContext::load(Path::new("/nonexistent/memtrace/bin"));
        assert!(matches!(result, Err(TraceError::InvalidTarget(_))));
    }

    #[test]
    fn test_binary_without_debug_info() {
        let (_temp_dir, bin_file) = compile_test_binary(false);
        let result = DwarfContext::load(&bin_file);
        assert!(matches!(result, Err(TraceError::MissingDebugInfo { .. })));
    }

    #[test]
    fn test_non_elf_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("script.py");
        fs::write(&path, "print('hello')\n").unwrap();
        assert!(matches!(DwarfContext::load(&path), Err(TraceError::InvalidTarget(_))));
    }

    #[test]
    fn test_symbols_resolve_to_own_source() {
        let (_temp_dir, bin_file) = compile_test_binary(true);
        let ctx = DwarfContext::load(&bin_file).unwrap();

        let helper = ctx
            .symbols()
            .iter()
            .find(|s| s.name.ends_with("::helper"))
            .expect("helper symbol");
        let location = ctx.lookup(helper.start).expect("helper has line info");
        assert!(location.file.ends_with("test.rs"));
        assert_eq!(location.line, 1);

        assert_eq!(ctx.symbol_at(helper.start).unwrap().name, helper.name);
        let rows = ctx.line_rows(helper.start, helper.end);
        assert!(rows.iter().any(|row| row.line == 2));
    }

    #[test]
    fn test_symbol_at_outside_any_function() {
        let (_temp_dir, bin_file) = compile_test_binary(true);
        let ctx = DwarfContext::load(&bin_file).unwrap();
        assert!(ctx.symbol_at(0).is_none());
    }

    #[test]
    fn test_demangle_drops_hash() {
        assert_eq!(
            demangle("_ZN4test6helper17h0123456789abcdefE"),
            "test::helper"
        );
        assert_eq!(demangle("main"), "main");
    }
}
