//! Own-code view of a target binary
//!
//! Built once per session from the DWARF context: the entry function, every
//! function whose source lies inside the own-code boundary, the statement
//! rows used to detect line events, and the runtime fault hooks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::dwarf::DwarfContext;
use crate::error::{Result, TraceError};
use crate::filter::SourceFilter;

/// Runtime functions whose entry marks a panic in progress
const FAULT_HOOK_SUFFIXES: &[&str] = &[
    "rust_begin_unwind",
    "rust_panic_with_hook",
    "__rust_start_panic",
];

/// A function defined in the target's own sources
#[derive(Debug, Clone)]
pub struct OwnFunction {
    pub start: u64,
    pub end: u64,
    pub name: String,
    pub file: Arc<str>,
    /// Line of the function header
    pub line: u32,
    /// Every own statement row sits on the header line (`|k| k * 2`)
    pub single_line: bool,
    pub is_entry: bool,
}

/// Start of a line-table row inside own code
#[derive(Debug, Clone)]
pub struct Statement {
    pub file: Arc<str>,
    pub line: u32,
}

#[derive(Debug)]
pub struct TargetImage {
    functions: Vec<OwnFunction>,
    statements: HashMap<u64, Statement>,
    fault_hooks: Vec<u64>,
}

impl TargetImage {
    /// Resolve the own-code view of a binary
    ///
    /// When `sources` has no roots yet, the directory of the file defining
    /// `main` becomes the root.
    pub fn build(dwarf: &DwarfContext, sources: &mut SourceFilter) -> Result<Self> {
        let entry = find_entry(dwarf)?;
        let entry_file = dwarf
            .lookup(entry)
            .map(|loc| loc.file)
            .ok_or_else(|| {
                TraceError::Dwarf("entry function has no line information".to_string())
            })?;
        if sources.is_empty() {
            sources.add_root_for_entry(&entry_file);
        }
        debug!(
            entry = %format!("{:#x}", entry),
            file = %entry_file,
            roots = ?sources.roots(),
            "resolved entry point"
        );

        let entry_is_rust = dwarf
            .symbols()
            .iter()
            .any(|s| s.start == entry && s.name.ends_with("::main"));

        let mut files: HashMap<String, Arc<str>> = HashMap::new();
        let mut intern = |file: String| -> Arc<str> {
            files.entry(file).or_insert_with_key(|k| Arc::from(k.as_str())).clone()
        };

        let mut functions = Vec::new();
        let mut statements = HashMap::new();
        for symbol in dwarf.symbols() {
            // The C `main` shim emitted by rustc only forwards to lang_start
            if entry_is_rust && symbol.name == "main" {
                continue;
            }
            let Some(location) = dwarf.lookup(symbol.start) else {
                continue;
            };
            if !sources.contains(&location.file) {
                continue;
            }

            let mut single_line = true;
            for row in dwarf.line_rows(symbol.start, symbol.end) {
                if sources.contains(&row.file) {
                    single_line &= row.line == location.line;
                    statements.insert(
                        row.address,
                        Statement {
                            file: intern(row.file),
                            line: row.line,
                        },
                    );
                }
            }

            functions.push(OwnFunction {
                start: symbol.start,
                end: symbol.end,
                name: symbol.name.clone(),
                file: intern(location.file),
                line: location.line,
                single_line,
                is_entry: symbol.start == entry,
            });
        }

        let mut fault_hooks: Vec<u64> = dwarf
            .symbols()
            .iter()
            .filter(|s| FAULT_HOOK_SUFFIXES.iter().any(|suffix| s.name.ends_with(suffix)))
            .map(|s| s.start)
            .collect();
        fault_hooks.sort_unstable();
        fault_hooks.dedup();

        debug!(
            functions = functions.len(),
            statements = statements.len(),
            fault_hooks = fault_hooks.len(),
            "built target image"
        );

        Ok(Self::from_parts(functions, statements, fault_hooks))
    }

    pub fn from_parts(
        mut functions: Vec<OwnFunction>,
        statements: HashMap<u64, Statement>,
        fault_hooks: Vec<u64>,
    ) -> Self {
        functions.sort_by_key(|f| f.start);
        Self {
            functions,
            statements,
            fault_hooks,
        }
    }

    pub fn functions(&self) -> &[OwnFunction] {
        &self.functions
    }

    pub fn function(&self, index: usize) -> &OwnFunction {
        &self.functions[index]
    }

    /// Index of the own function containing an address
    pub fn function_at(&self, addr: u64) -> Option<usize> {
        let idx = self.functions.partition_point(|f| f.start <= addr).checked_sub(1)?;
        let function = &self.functions[idx];
        (addr < function.end).then_some(idx)
    }

    /// Index of the own function whose first instruction is `addr`
    pub fn function_starting_at(&self, addr: u64) -> Option<usize> {
        self.function_at(addr)
            .filter(|&idx| self.functions[idx].start == addr)
    }

    pub fn statement_at(&self, addr: u64) -> Option<&Statement> {
        self.statements.get(&addr)
    }

    pub fn fault_hooks(&self) -> &[u64] {
        &self.fault_hooks
    }

    pub fn is_fault_hook(&self, addr: u64) -> bool {
        self.fault_hooks.binary_search(&addr).is_ok()
    }
}

/// Entry function: the Rust `crate::main` when present, otherwise C `main`
fn find_entry(dwarf: &DwarfContext) -> Result<u64> {
    let has_line_info = |addr: u64| dwarf.lookup(addr).is_some();
    let symbols = dwarf.symbols();

    symbols
        .iter()
        .filter(|s| s.name.ends_with("::main") && !s.name.contains('<'))
        .find(|s| has_line_info(s.start) && s.name.matches("::").count() == 1)
        .or_else(|| {
            symbols
                .iter()
                .find(|s| s.name == "main" && has_line_info(s.start))
        })
        .map(|s| s.start)
        .ok_or_else(|| {
            TraceError::InvalidTarget("no `main` function with debug line info".to_string())
        })
}
