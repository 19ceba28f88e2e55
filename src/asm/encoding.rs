//! Rendering microcode programs back to text.
//!
//! Parsed lines can be rendered back into canonical source text
//! (see [`CodeLine::source`] and [`MicrocodeProgram::format`]),
//! and microcode lines can be rendered as columns of object code (see [`MicroCode::object_code`]).
//!
//! The [`ProgramFormat`] trait describes reading/writing a whole program in some text format.
//! This module provides two implementations of the trait:
//! - [`SourceFormat`]: canonical microcode source
//! - [`ObjectCodeFormat`]: a column of signal values per microcode line

use std::fmt::Write;

use super::{assemble, AsmFlags, MicrocodeProgram, SymbolTable};
use crate::ast::code::{Branch, CodeLine, MicroCode, SpecLine, Specification};
use crate::ast::{ClockSignal, ControlSignal, CpuType};

impl MicroCode {
    /// Renders this line as canonical source text.
    ///
    /// Control signals and clock signals are listed in their display order,
    /// so parsing the result produces the same microcode.
    ///
    /// # Example
    /// ```
    /// use pep9_micro::asm::{AsmFlags, SymbolTable};
    /// use pep9_micro::parse::parse_line;
    ///
    /// let mut sym = SymbolTable::new();
    /// let line = parse_line(&mut sym, "b=7,a=6;marck,nck", AsmFlags::default()).unwrap();
    /// assert_eq!(line.source(&sym), "A=6, B=7; NCk, MARCk");
    /// ```
    pub fn source(&self, sym: &SymbolTable) -> String {
        let mut out = String::new();
        if let Some(id) = self.symbol {
            out.push_str(sym.name(id));
            out.push(':');
        }

        let mut body = self.controls()
            .map(|(sig, value)| match sig.is_mem() {
                true  => sig.to_string(),
                false => format!("{sig}={value}"),
            })
            .collect::<Vec<_>>()
            .join(", ");

        let clocks: Vec<_> = self.clocks().map(ClockSignal::mnemonic).collect();
        if !clocks.is_empty() {
            body.push_str("; ");
            body.push_str(&clocks.join(", "));
        }

        let branch = match self.branch {
            Branch::Next => String::new(),
            Branch::Goto(t) => format!("goto {}", sym.name(t)),
            Branch::If { cond, on_true, on_false } => format!("if {cond} {} else {}", sym.name(on_true), sym.name(on_false)),
            Branch::Stop => String::from("stopCPU"),
            Branch::DecodeAddrMode => String::from("DecodeAddrMode"),
            Branch::DecodeInstrSpec => String::from("DecodeInstrSpec"),
        };
        if !branch.is_empty() {
            if !body.is_empty() {
                body.push_str("; ");
            }
            body.push_str(&branch);
        }

        push_separated(&mut out, &body);
        if let Some(comment) = &self.comment {
            push_separated(&mut out, comment);
        }
        out
    }

    /// Renders this line as a row of object code.
    ///
    /// Each signal the CPU supports occupies a fixed-width, left-aligned column
    /// (3 characters for `A`, `B`, `C`, and `ALU`, 2 for everything else),
    /// which is blank if the signal is not asserted.
    ///
    /// Branches, labels, and comments are not part of object code.
    pub fn object_code(&self, cpu: CpuType) -> String {
        let mut out = String::new();
        for &col in columns(cpu) {
            let cell = match col {
                Column::Control(sig) => self.control(sig).map(|v| v.to_string()),
                Column::Clock(ck) => self.clock(ck).then(|| String::from("1")),
            };
            // writing to a String cannot fail
            let _ = write!(out, "{:<1$}", cell.unwrap_or_default(), col.width());
        }
        out
    }
}

impl SpecLine {
    /// Renders the specifications of this line (without the `UnitPre:`/`UnitPost:` label).
    pub fn source(&self) -> String {
        let mut out = self.specs.iter()
            .map(|spec| match *spec {
                Specification::Mem { addr, value, width } => {
                    let digits = 2 * usize::from(width.clamp(1, 2));
                    format!("Mem[0x{addr:04X}]=0x{value:0digits$X}")
                },
                Specification::Reg { reg, value } => {
                    let digits = reg.hex_digits();
                    format!("{reg}=0x{value:0digits$X}")
                },
                Specification::Status { bit, value } => format!("{bit}={}", u8::from(value)),
            })
            .collect::<Vec<_>>()
            .join(", ");

        if let Some(comment) = &self.comment {
            push_separated(&mut out, comment);
        }
        out
    }
}

impl CodeLine {
    /// Renders this line as canonical source text.
    ///
    /// The symbol table is needed to name labels and branch targets.
    pub fn source(&self, sym: &SymbolTable) -> String {
        match self {
            CodeLine::MicroCode(mc) => mc.source(sym),
            CodeLine::CommentOnly(c) => c.clone(),
            CodeLine::UnitPre(s) => labeled("UnitPre:", &s.source()),
            CodeLine::UnitPost(s) => labeled("UnitPost:", &s.source()),
            CodeLine::Blank => String::new(),
        }
    }
}

impl MicrocodeProgram {
    /// Renders every line of the program as canonical source text.
    pub fn format(&self) -> String {
        self.lines()
            .iter()
            .map(|l| l.source(self.symbol_table()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Renders every microcode line of the program as object code (one row per line).
    pub fn object_code(&self) -> String {
        let cpu = self.cpu_type();
        self.microcode_iter()
            .map(|mc| mc.object_code(cpu) + "\n")
            .collect()
    }
}

fn push_separated(out: &mut String, text: &str) {
    if text.is_empty() { return; }
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(text);
}
fn labeled(label: &str, body: &str) -> String {
    let mut out = String::from(label);
    push_separated(&mut out, body);
    out
}

#[derive(Clone, Copy)]
enum Column {
    Control(ControlSignal),
    Clock(ClockSignal),
}
impl Column {
    fn width(self) -> usize {
        match self {
            Column::Control(ControlSignal::A | ControlSignal::B | ControlSignal::C | ControlSignal::ALU) => 3,
            _ => 2,
        }
    }
}

const ONE_BYTE_COLUMNS: &[Column] = {
    use ClockSignal as K;
    use Column::{Clock, Control};
    use ControlSignal as S;

    &[
        Clock(K::LoadCk), Control(S::C), Control(S::B), Control(S::A), Clock(K::MARCk), Clock(K::MDRCk),
        Control(S::AMux), Control(S::MDRMux), Control(S::CMux), Control(S::ALU), Control(S::CSMux),
        Clock(K::SCk), Clock(K::CCk), Clock(K::VCk), Control(S::AndZ), Clock(K::ZCk), Clock(K::NCk),
        Control(S::MemWrite), Control(S::MemRead),
    ]
};
const TWO_BYTE_COLUMNS: &[Column] = {
    use ClockSignal as K;
    use Column::{Clock, Control};
    use ControlSignal as S;

    &[
        Clock(K::LoadCk), Control(S::C), Control(S::B), Control(S::A), Control(S::MARMux), Clock(K::MARCk),
        Clock(K::MDROCk), Control(S::MDROMux), Clock(K::MDRECk), Control(S::MDREMux), Control(S::EOMux),
        Control(S::AMux), Control(S::CMux), Control(S::ALU), Control(S::CSMux),
        Clock(K::SCk), Clock(K::CCk), Clock(K::VCk), Control(S::AndZ), Clock(K::ZCk), Clock(K::NCk),
        Control(S::MemWrite), Control(S::MemRead),
    ]
};
fn columns(cpu: CpuType) -> &'static [Column] {
    match cpu {
        CpuType::OneByteDataBus => ONE_BYTE_COLUMNS,
        CpuType::TwoByteDataBus => TWO_BYTE_COLUMNS,
    }
}

/// A trait defining text formats for whole microcode programs.
pub trait ProgramFormat {
    /// Serializes a program into this format.
    fn serialize(p: &MicrocodeProgram) -> String;
    /// Deserializes a program for the given CPU from this format,
    /// returning `None` if the input is not valid.
    fn deserialize(i: &str, cpu: CpuType) -> Option<MicrocodeProgram>;
}

/// Canonical microcode source.
///
/// Deserializing assembles the source (with control-flow features enabled).
pub struct SourceFormat;
impl ProgramFormat for SourceFormat {
    fn serialize(p: &MicrocodeProgram) -> String {
        p.format()
    }

    fn deserialize(i: &str, cpu: CpuType) -> Option<MicrocodeProgram> {
        assemble(i, AsmFlags { cpu_type: cpu, extended: true }).ok()
    }
}

/// Object code: one row of fixed-width signal columns per microcode line.
///
/// Only signals are carried, so deserialized lines always fall through to the next line.
pub struct ObjectCodeFormat;
impl ProgramFormat for ObjectCodeFormat {
    fn serialize(p: &MicrocodeProgram) -> String {
        p.object_code()
    }

    fn deserialize(i: &str, cpu: CpuType) -> Option<MicrocodeProgram> {
        let code = i.lines()
            .map(|row| parse_row(row, cpu))
            .collect::<Option<Vec<_>>>()?;

        Some(MicrocodeProgram::from_microcode(code, cpu))
    }
}

fn parse_row(row: &str, cpu: CpuType) -> Option<MicroCode> {
    let mut mc = MicroCode::new();
    let mut pos = 0;

    for &col in columns(cpu) {
        let start = pos.min(row.len());
        let end = (pos + col.width()).min(row.len());
        pos += col.width();

        let cell = row.get(start..end)?.trim();
        if cell.is_empty() { continue; }

        match col {
            Column::Control(sig) => {
                let value = cell.parse::<u8>().ok()
                    .filter(|v| sig.range().contains(v))?;
                mc.set_control(sig, Some(value));
            },
            Column::Clock(ck) => {
                if cell != "1" { return None; }
                mc.set_clock(ck, true);
            },
        }
    }

    // nothing but whitespace may follow the last column
    match row.get(pos.min(row.len())..)?.trim().is_empty() {
        true  => Some(mc),
        false => None,
    }
}
