//! The disassembler host: everything the recovery consumes about the binary.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::il::Function;

/// A section of the binary image, spanning `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub start: u64,
    pub end: u64,
    pub executable: bool,
    /// Sections synthesised for external (imported) symbols
    pub external: bool,
}

impl Section {
    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolKind {
    Function,
    ImportedFunction,
    Data,
    ImportedData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub address: u64,
    pub name: String,
    pub kind: SymbolKind,
}

/// A code location referring to a data variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeRef {
    pub function_start: u64,
    pub address: u64,
}

/// Queries against the analysed binary.
pub trait AnalysisHost {
    /// Size of a pointer, in bytes
    fn address_size(&self) -> u64;
    fn sections(&self) -> &[Section];
    fn symbols(&self) -> &[Symbol];
    /// The address of the next data variable after `addr`; returns `addr` itself once there are
    /// no more.
    fn next_data_var_after(&self, addr: u64) -> u64;
    fn is_data_variable(&self, addr: u64) -> bool;
    fn code_refs(&self, addr: u64) -> Vec<CodeRef>;
    fn function_at(&self, addr: u64) -> Option<&Function>;
    /// Start addresses of all functions, ascending
    fn function_starts(&self) -> Vec<u64>;

    fn section_at(&self, addr: u64) -> Option<&Section> {
        self.sections().iter().find(|s| s.contains(addr))
    }

    fn is_executable(&self, addr: u64) -> bool {
        self.section_at(addr).map_or(false, |s| s.executable)
    }

    /// Whether `addr` is plain data: inside a section that is neither executable nor external
    fn is_data_address(&self, addr: u64) -> bool {
        self.section_at(addr)
            .map_or(false, |s| !s.executable && !s.external)
    }

    fn symbols_by_name(&self, name: &str) -> Vec<&Symbol> {
        self.symbols().iter().filter(|s| s.name == name).collect()
    }

    fn symbol_at(&self, addr: u64) -> Option<&Symbol> {
        self.symbols().iter().find(|s| s.address == addr)
    }
}

/// An in-memory host, populated from an analysis export (see
/// [`export_lifter`](crate::export_lifter)) or built directly.
#[derive(Debug)]
pub struct ExportedBinary {
    pub name: String,
    pub address_size: u64,
    sections: Vec<Section>,
    symbols: Vec<Symbol>,
    data_variables: BTreeSet<u64>,
    code_refs: BTreeMap<u64, Vec<CodeRef>>,
    functions: BTreeMap<u64, Function>,
}

impl ExportedBinary {
    pub fn new(name: impl Into<String>, address_size: u64) -> Self {
        Self {
            name: name.into(),
            address_size,
            sections: vec![],
            symbols: vec![],
            data_variables: Default::default(),
            code_refs: Default::default(),
            functions: Default::default(),
        }
    }

    pub fn add_section(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub fn add_symbol(&mut self, symbol: Symbol) {
        self.symbols.push(symbol);
    }

    pub fn add_data_variable(&mut self, addr: u64) {
        self.data_variables.insert(addr);
    }

    pub fn add_code_ref(&mut self, data_var: u64, code_ref: CodeRef) {
        self.code_refs.entry(data_var).or_default().push(code_ref);
    }

    /// Add `function`, replacing any earlier function with the same start address
    pub fn add_function(&mut self, function: Function) -> Option<Function> {
        self.functions.insert(function.start, function)
    }
}

impl AnalysisHost for ExportedBinary {
    fn address_size(&self) -> u64 {
        self.address_size
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    fn next_data_var_after(&self, addr: u64) -> u64 {
        self.data_variables
            .range(addr.saturating_add(1)..)
            .next()
            .cloned()
            .unwrap_or(addr)
    }

    fn is_data_variable(&self, addr: u64) -> bool {
        self.data_variables.contains(&addr)
    }

    fn code_refs(&self, addr: u64) -> Vec<CodeRef> {
        self.code_refs.get(&addr).cloned().unwrap_or_default()
    }

    fn function_at(&self, addr: u64) -> Option<&Function> {
        self.functions.get(&addr)
    }

    fn function_starts(&self) -> Vec<u64> {
        self.functions.keys().cloned().collect()
    }
}
