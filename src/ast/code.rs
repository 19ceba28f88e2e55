//! The structured form of a parsed line of microcode.
//!
//! Every source line parses into exactly one [`CodeLine`]:
//! - a [`MicroCode`] line (signals to assert on one cycle plus how to pick the next line),
//! - a comment-only line,
//! - a `UnitPre:` or `UnitPost:` line (a list of [`Specification`]s),
//! - or a blank line.

use crate::asm::SymbolId;

use super::{BranchCondition, ClockSignal, ControlSignal, RegSpec, StatusBit};

/// A single parsed line of microcode.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CodeLine {
    /// A line which executes on the datapath.
    MicroCode(MicroCode),
    /// A line consisting only of a comment (the text includes the leading `//`).
    CommentOnly(String),
    /// `UnitPre:` specifications, applied before a unit test run.
    UnitPre(SpecLine),
    /// `UnitPost:` specifications, checked after a unit test run.
    UnitPost(SpecLine),
    /// An empty line.
    Blank,
}
impl CodeLine {
    /// Whether this line executes on the datapath.
    pub fn is_microcode(&self) -> bool {
        matches!(self, CodeLine::MicroCode(_))
    }

    /// Gets the microcode in this line, if this is a microcode line.
    pub fn as_microcode(&self) -> Option<&MicroCode> {
        match self {
            CodeLine::MicroCode(mc) => Some(mc),
            _ => None
        }
    }

    /// Whether this line has any preconditions.
    pub fn has_unit_pre(&self) -> bool {
        matches!(self, CodeLine::UnitPre(s) if !s.specs.is_empty())
    }

    /// Whether this line has any postconditions.
    pub fn has_unit_post(&self) -> bool {
        matches!(self, CodeLine::UnitPost(s) if !s.specs.is_empty())
    }
}

/// How the control section computes the next line after a [`MicroCode`] line.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum Branch {
    /// No branch was written, so execution falls through to the next microcode line
    /// (or stops, if this is the last one).
    #[default]
    Next,
    /// `goto <target>`
    Goto(SymbolId),
    /// `if <cond> <on_true> else <on_false>`
    If {
        /// The test.
        cond: BranchCondition,
        /// Target if the test holds.
        on_true: SymbolId,
        /// Target if the test fails.
        on_false: SymbolId,
    },
    /// `stopCPU`
    Stop,
    /// `DecodeAddrMode`, which jumps to the handler for the instruction's addressing mode.
    DecodeAddrMode,
    /// `DecodeInstrSpec`, which jumps to the handler for the instruction.
    DecodeInstrSpec,
}

/// A line of microcode which executes on the datapath.
///
/// Control signals are `None` when not driven on this line,
/// and clock signals are `false` when not pulsed.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct MicroCode {
    pub(crate) controls: [Option<u8>; ControlSignal::COUNT],
    pub(crate) clocks: [bool; ClockSignal::COUNT],
    /// How the next line is chosen.
    pub branch: Branch,
    /// The label defined on this line.
    pub symbol: Option<SymbolId>,
    /// The trailing comment (the text includes the leading `//`).
    pub comment: Option<String>,
}
impl MicroCode {
    /// Creates a microcode line with nothing asserted that falls through to the next line.
    pub fn new() -> Self {
        Default::default()
    }

    /// The value of a control signal on this line.
    pub fn control(&self, sig: ControlSignal) -> Option<u8> {
        self.controls[sig.index()]
    }
    /// Whether this line drives the given control signal.
    pub fn has_control(&self, sig: ControlSignal) -> bool {
        self.control(sig).is_some()
    }
    /// Sets (or clears) a control signal.
    pub fn set_control(&mut self, sig: ControlSignal, value: Option<u8>) {
        self.controls[sig.index()] = value;
    }
    /// Whether this line pulses the given clock signal.
    pub fn clock(&self, sig: ClockSignal) -> bool {
        self.clocks[sig.index()]
    }
    /// Sets (or clears) a clock signal.
    pub fn set_clock(&mut self, sig: ClockSignal, value: bool) {
        self.clocks[sig.index()] = value;
    }

    /// All driven control signals and their values, in display order.
    pub fn controls(&self) -> impl Iterator<Item=(ControlSignal, u8)> + '_ {
        ControlSignal::ALL.iter()
            .filter_map(|&sig| Some((sig, self.control(sig)?)))
    }
    /// All pulsed clock signals, in display order.
    pub fn clocks(&self) -> impl Iterator<Item=ClockSignal> + '_ {
        ClockSignal::ALL.iter()
            .copied()
            .filter(|&sig| self.clock(sig))
    }

    /// The raw control signal vector.
    pub fn control_vector(&self) -> &[Option<u8>; ControlSignal::COUNT] {
        &self.controls
    }
    /// The raw clock signal vector.
    pub fn clock_vector(&self) -> &[bool; ClockSignal::COUNT] {
        &self.clocks
    }
}

/// The specifications on a `UnitPre:`/`UnitPost:` line.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct SpecLine {
    /// Specifications, in source order.
    pub specs: Vec<Specification>,
    /// The trailing comment (the text includes the leading `//`).
    pub comment: Option<String>,
}

/// A single assertion about datapath state.
///
/// As a precondition, this sets the state. As a postcondition, this checks the state.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Specification {
    /// `Mem[0xADDR]=0xVALUE`
    Mem {
        /// The address of the (first) byte.
        addr: u16,
        /// The expected value.
        value: u16,
        /// Number of bytes covered (1 or 2). Two bytes are big-endian starting at `addr`.
        width: u8,
    },
    /// `REG=0xVALUE`
    Reg {
        /// The register.
        reg: RegSpec,
        /// The expected value.
        value: u32,
    },
    /// `BIT=0` or `BIT=1`
    Status {
        /// The status bit.
        bit: StatusBit,
        /// The expected value.
        value: bool,
    },
}
