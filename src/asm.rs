//! Assembling microcode source into microcode programs.
//!
//! This module is used to convert microcode source text into a [`MicrocodeProgram`]
//! that can be executed by the simulator.
//!
//! The assembler module notably consists of:
//! - [`assemble`]: The main function which assembles source text into a program.
//! - [`SymbolTable`]: a struct holding every label defined or referenced by the source,
//!     which stores the microcode index of each label once assembly succeeds
//! - [`MicrocodeProgram`]: a struct holding the parsed lines, which can be loaded into the simulator and executed

pub mod encoding;

use std::collections::HashMap;

use crate::ast::code::{Branch, CodeLine, MicroCode, Specification};
use crate::ast::CpuType;
use crate::err::ErrSpan;
use crate::parse::{parse_line, ParseErr, ParseErrKind};

/// The label the control section begins execution at (if defined).
pub const START_SYMBOL: &str = "start";

/// Configuration for the assembler.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct AsmFlags {
    /// The CPU the source is written for.
    ///
    /// This determines which signal mnemonics are recognized.
    pub cpu_type: CpuType,
    /// Whether labels and branches (`goto`, `if`, `stopCPU`, decoders) are allowed.
    ///
    /// If false, every line falls through to the next line.
    pub extended: bool,
}
#[allow(clippy::derivable_impls)]
impl Default for AsmFlags {
    fn default() -> Self {
        Self {
            cpu_type: CpuType::OneByteDataBus,
            extended: true
        }
    }
}

/// Assembles microcode source text into a microcode program.
///
/// This parses each line, assigns every label the index of its line among the microcode lines,
/// and checks that every referenced label is defined.
///
/// # Example
/// ```
/// use pep9_micro::asm::{assemble, AsmFlags};
///
/// let src = "
///     // Fetch the instruction specifier
///     start: A=6, B=7; MARCk
///     MemRead
///     MemRead
///     MemRead, MDRMux=0; MDRCk; goto start
/// ";
///
/// let prog = assemble(src, AsmFlags::default()).unwrap();
/// assert_eq!(prog.microcode_len(), 4);
/// assert_eq!(prog.symbol_table().lookup_value("start"), Some(0));
/// ```
pub fn assemble(src: &str, flags: AsmFlags) -> Result<MicrocodeProgram, AsmErr> {
    let mut sym = SymbolTable::new();
    let mut lines = vec![];

    for (lno, line) in src.split('\n').enumerate() {
        let code = parse_line(&mut sym, line, flags)
            .map_err(|e| AsmErr::from_parse(e, lno))?;
        lines.push(code);
    }

    let micro: Vec<_> = lines.iter()
        .enumerate()
        .filter(|(_, l)| l.is_microcode())
        .map(|(lno, _)| lno)
        .collect();

    // Labels take the index of their line among microcode lines.
    for (index, &lno) in micro.iter().enumerate() {
        if let Some(id) = lines[lno].as_microcode().and_then(|mc| mc.symbol) {
            sym.set_value(id, index);
        }
    }

    if let Some((id, entry)) = sym.iter().find(|(_, e)| !e.is_defined()) {
        let lno = lines.iter()
            .position(|l| l.as_microcode().is_some_and(|mc| branch_targets(mc.branch).contains(&Some(id))))
            .unwrap_or(0);

        return Err(AsmErr::new(AsmErrKind::UndefinedSymbol(entry.name().to_string()), lno));
    }

    tracing::debug!(lines = lines.len(), microcode = micro.len(), symbols = sym.len(), "assembled microcode program");
    Ok(MicrocodeProgram { lines, micro, sym, cpu_type: flags.cpu_type })
}

fn branch_targets(branch: Branch) -> [Option<SymbolId>; 2] {
    match branch {
        Branch::Goto(t) => [Some(t), None],
        Branch::If { on_true, on_false, .. } => [Some(on_true), Some(on_false)],
        _ => [None, None]
    }
}

/// Kinds of errors that can occur from assembling given microcode.
///
/// See [`AsmErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum AsmErrKind {
    /// A line could not be parsed.
    Parse(ParseErrKind),
    /// A label was referenced but never defined.
    UndefinedSymbol(String),
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e)           => e.fmt(f),
            Self::UndefinedSymbol(s) => write!(f, "// ERROR: Undefined symbol {s}"),
        }
    }
}

/// Error from assembling given microcode.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsmErr {
    /// The kind of error.
    pub kind: AsmErrKind,
    /// The span in the source associated with this value.
    pub span: ErrSpan
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new<E: Into<ErrSpan>>(kind: AsmErrKind, span: E) -> Self {
        AsmErr { kind, span: span.into() }
    }

    fn from_parse(e: ParseErr, lno: usize) -> Self {
        AsmErr { kind: AsmErrKind::Parse(e.kind), span: e.span.with_line(lno) }
    }

    /// The (0-indexed) source line this error occurred on.
    pub fn line(&self) -> Option<usize> {
        self.span.line()
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for AsmErr {}
impl crate::err::Error for AsmErr {
    fn span(&self) -> Option<crate::err::ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            AsmErrKind::Parse(e)           => e.help(),
            AsmErrKind::UndefinedSymbol(_) => Some("try adding this label before a line of microcode".into()),
        }
    }
}

/// A handle to a symbol in a [`SymbolTable`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct SymbolId(usize);

/// A single label in the symbol table.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SymbolEntry {
    name: String,
    value: Option<usize>,
    defined: bool,
}
impl SymbolEntry {
    /// The name of this symbol.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The microcode index this symbol refers to (assigned once assembly succeeds).
    pub fn value(&self) -> Option<usize> {
        self.value
    }
    /// Whether this symbol has been defined as a label.
    pub fn is_defined(&self) -> bool {
        self.defined
    }
}

/// The symbol table created while assembling microcode.
///
/// Symbols are created the first time they are referenced (or defined),
/// and they are kept in that order. A name is unique in the table.
///
/// Lines refer to symbols by [`SymbolId`], which are only meaningful for the table that created them.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    by_name: HashMap<String, SymbolId>,
}
impl SymbolTable {
    /// Creates a new, empty symbol table.
    pub fn new() -> Self {
        Default::default()
    }

    /// Gets the symbol with the given name, creating it (undefined) if it does not exist.
    pub fn insert(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }

        let id = SymbolId(self.entries.len());
        self.entries.push(SymbolEntry { name: name.to_string(), value: None, defined: false });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Marks a symbol as defined, creating it if it does not exist.
    ///
    /// This returns `None` if the symbol was already defined.
    pub fn define(&mut self, name: &str) -> Option<SymbolId> {
        let id = self.insert(name);
        let entry = &mut self.entries[id.0];
        match entry.defined {
            true  => None,
            false => {
                entry.defined = true;
                Some(id)
            }
        }
    }

    /// Sets the value of a symbol.
    pub fn set_value(&mut self, id: SymbolId, value: usize) {
        if let Some(entry) = self.entries.get_mut(id.0) {
            entry.value = Some(value);
        }
    }

    /// Finds the symbol with a given name.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    /// Finds the value of the symbol with a given name.
    pub fn lookup_value(&self, name: &str) -> Option<usize> {
        self.get(self.lookup(name)?)?.value
    }

    /// Gets the entry for a symbol.
    pub fn get(&self, id: SymbolId) -> Option<&SymbolEntry> {
        self.entries.get(id.0)
    }

    /// The name of a symbol (or `"?"` if this symbol is not from this table).
    pub fn name(&self, id: SymbolId) -> &str {
        self.get(id).map_or("?", SymbolEntry::name)
    }

    /// The number of symbols.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no symbols.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the symbols in the order they were first seen.
    pub fn iter(&self) -> impl Iterator<Item=(SymbolId, &SymbolEntry)> + '_ {
        self.entries.iter()
            .enumerate()
            .map(|(i, e)| (SymbolId(i), e))
    }
}

/// An assembled microcode program.
///
/// This holds every source line (one [`CodeLine`] per line) and the symbol table,
/// and it is immutable once assembled.
///
/// Execution addresses lines by *microcode index*:
/// the position of a line among only the microcode lines of the program.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MicrocodeProgram {
    lines: Vec<CodeLine>,
    micro: Vec<usize>,
    sym: SymbolTable,
    cpu_type: CpuType,
}
impl MicrocodeProgram {
    /// Creates an empty program.
    pub fn empty(cpu_type: CpuType) -> Self {
        Self { lines: vec![], micro: vec![], sym: SymbolTable::new(), cpu_type }
    }

    /// All lines of the program, one per source line.
    pub fn lines(&self) -> &[CodeLine] {
        &self.lines
    }

    /// The symbol table of the program.
    pub fn symbol_table(&self) -> &SymbolTable {
        &self.sym
    }

    /// The CPU this program was assembled for.
    pub fn cpu_type(&self) -> CpuType {
        self.cpu_type
    }

    /// The number of microcode lines.
    pub fn microcode_len(&self) -> usize {
        self.micro.len()
    }

    /// Gets the microcode line at a given microcode index.
    pub fn microcode(&self, index: usize) -> Option<&MicroCode> {
        let &lno = self.micro.get(index)?;
        self.lines[lno].as_microcode()
    }

    /// Iterates over all microcode lines, in order.
    pub fn microcode_iter(&self) -> impl Iterator<Item=&MicroCode> + '_ {
        self.lines.iter().filter_map(CodeLine::as_microcode)
    }

    /// The source line of the microcode line at a given microcode index.
    pub fn source_line(&self, index: usize) -> Option<usize> {
        self.micro.get(index).copied()
    }

    /// The microcode index of the given source line (if that line is microcode).
    pub fn microcode_index(&self, lno: usize) -> Option<usize> {
        self.micro.binary_search(&lno).ok()
    }

    /// The microcode index execution begins at:
    /// the line labeled `start` if there is one, otherwise the first line.
    pub fn start_index(&self) -> usize {
        self.sym.lookup_value(START_SYMBOL).unwrap_or(0)
    }

    /// The microcode index a symbol refers to.
    pub fn resolve(&self, id: SymbolId) -> Option<usize> {
        self.sym.get(id)?.value
    }

    /// Every `UnitPre:` specification in the program, in source order.
    pub fn preconditions(&self) -> impl Iterator<Item=&Specification> + '_ {
        self.lines.iter()
            .filter_map(|l| match l {
                CodeLine::UnitPre(s) => Some(&s.specs),
                _ => None
            })
            .flatten()
    }

    /// Every `UnitPost:` specification in the program, in source order.
    pub fn postconditions(&self) -> impl Iterator<Item=&Specification> + '_ {
        self.lines.iter()
            .filter_map(|l| match l {
                CodeLine::UnitPost(s) => Some(&s.specs),
                _ => None
            })
            .flatten()
    }

    pub(crate) fn from_microcode(code: Vec<MicroCode>, cpu_type: CpuType) -> Self {
        let micro = (0..code.len()).collect();
        let lines = code.into_iter().map(CodeLine::MicroCode).collect();
        Self { lines, micro, sym: SymbolTable::new(), cpu_type }
    }
}
