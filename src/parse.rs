//! Parsing microcode source lines.
//!
//! Microcode is parsed one line at a time by [`parse_line`], which drives a finite-state machine
//! over the tokens of a line (see [`lex`]) and produces a single [`CodeLine`].
//!
//! Labels and branch targets are recorded in a shared [`SymbolTable`] as they are seen,
//! so a line can refer to labels defined on later lines.
//!
//! # Example
//! ```
//! use pep9_micro::asm::{AsmFlags, SymbolTable};
//! use pep9_micro::ast::ControlSignal;
//! use pep9_micro::ast::code::CodeLine;
//! use pep9_micro::parse::parse_line;
//!
//! let mut sym = SymbolTable::new();
//! let line = parse_line(&mut sym, "A=6, B=7; MARCk // fetch", AsmFlags::default()).unwrap();
//!
//! let CodeLine::MicroCode(mc) = line else { panic!("expected microcode") };
//! assert_eq!(mc.control(ControlSignal::A), Some(6));
//! assert_eq!(mc.comment.as_deref(), Some("// fetch"));
//! ```

pub mod lex;

use std::borrow::Cow;
use std::ops::Range;

use crate::asm::{AsmFlags, SymbolId, SymbolTable};
use crate::ast::code::{Branch, CodeLine, MicroCode, SpecLine, Specification};
use crate::ast::{BranchCondition, ClockSignal, ControlSignal, RegSpec, StatusBit};
use crate::err::ErrSpan;
use lex::{get_token, HexConst, Ident, Label, LexErr, Token};

/// Kinds of errors that can occur while parsing a line.
///
/// See [`ParseErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ParseErrKind {
    /// The line could not be tokenized.
    Lex(LexErr),
    /// A label or branch was used while control-flow features are disabled.
    ExtendedDisabled,
    /// A label was defined on more than one line.
    MultiplyDefined(String),
    /// A clock signal appeared among the control signals.
    ClockBeforeSemicolon(ClockSignal),
    /// An identifier which is not a control signal appeared among the control signals.
    UnrecognizedControl(String),
    /// The line starts with `;`.
    NoControlsBeforeSemicolon,
    /// Something other than a control signal, label, branch or comment started a line.
    ExpectedControlOrComment,
    /// A signal or specification was not followed by `=`.
    ExpectedEquals(&'static str),
    /// A control signal was assigned more than once.
    DuplicateControl(ControlSignal),
    /// A control signal was assigned a value outside of its range.
    OutOfRange {
        /// The signal.
        signal: ControlSignal,
        /// The value it was assigned.
        value: u32
    },
    /// A control signal's `=` was not followed by a decimal number.
    ExpectedDecimal(ControlSignal),
    /// A control signal was not followed by `,` or `;`.
    ExpectedCommaOrSemicolon,
    /// Both MemRead and MemWrite were asserted (the signal is the second one seen).
    MemReadAndWrite(ControlSignal),
    /// A `,` in the control signals was followed by `;`.
    ExpectedControlAfterComma,
    /// A clock signal was pulsed more than once.
    DuplicateClock(ClockSignal),
    /// A control signal appeared among the clock signals.
    ControlAfterSemicolon(ControlSignal),
    /// A memory control signal appeared among the clock signals.
    MemControlAfterSemicolon(ControlSignal),
    /// An identifier which is not a clock signal appeared among the clock signals.
    UnrecognizedClock(String),
    /// A `;` appeared where a clock signal was expected.
    MultipleSemicolons,
    /// Something other than a clock signal, branch or comment appeared after `;`.
    ExpectedClockOrComment,
    /// A clock signal was not followed by `,`.
    ExpectedCommaAfterClock,
    /// An identifier which cannot be specified appeared in a specification.
    UnrecognizedSpec(String),
    /// Something other than an identifier started a specification.
    SpecSyntax(String),
    /// `Mem` was not followed by `[`.
    ExpectedLeftBracket,
    /// A memory address does not fit in 16 bits.
    AddrOutOfRange,
    /// `Mem[` was not followed by a hex address.
    ExpectedMemAddr,
    /// A memory address was not followed by `]`.
    ExpectedRightBracket,
    /// `Mem[...]` was not followed by `=`.
    ExpectedMemEquals,
    /// A memory value does not fit in 16 bits.
    MemValueOutOfRange,
    /// A specification's `=` was not followed by a hex constant.
    ExpectedHex,
    /// A register value does not fit in the register.
    RegValueOutOfRange(RegSpec),
    /// A status bit was specified as something other than 0 or 1.
    StatusOutOfRange,
    /// A status bit's `=` was not followed by a digit.
    ExpectedStatusValue,
    /// A specification was not followed by `,`, a comment, or the end of the line.
    ExpectedSpecSeparator,
    /// Something other than a branch appeared after a second `;`.
    ExpectedBranchAfterSemicolon,
    /// `goto` was not followed by a label.
    ExpectedGotoTarget,
    /// `if` was not followed by a branch condition.
    ExpectedCondition,
    /// `if <cond>` was not followed by a label.
    ExpectedTrueTarget,
    /// `if <cond> <label>` was not followed by `else`.
    ExpectedElse,
    /// `else` was not followed by a label.
    ExpectedFalseTarget,
    /// A branch was not followed by a comment or the end of the line.
    ExpectedEndAfterBranch,
    /// Something appeared after a comment.
    UnexpectedAfterComment,
}
impl std::fmt::Display for ParseErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("// ERROR: ")?;
        match self {
            Self::Lex(e)                       => e.fmt(f),
            Self::ExtendedDisabled             => f.write_str("A control flow / symbol token was hit. These have been disabled."),
            Self::MultiplyDefined(s)           => write!(f, "Multiply defined symbol: {s}."),
            Self::ClockBeforeSemicolon(s)      => write!(f, "Clock signal {s} must appear after semicolon."),
            Self::UnrecognizedControl(s)       => write!(f, "Unrecognized control signal: {s}."),
            Self::NoControlsBeforeSemicolon    => f.write_str("No control signals before semicolon."),
            Self::ExpectedControlOrComment     => f.write_str("Syntax error where control signal or comment expected."),
            Self::ExpectedEquals(s)            => write!(f, "Expected = after {s}."),
            Self::DuplicateControl(s)          => write!(f, "Duplicate control signal, {s}."),
            Self::OutOfRange { signal, value } => write!(f, "Value {value} is out of range for {signal}."),
            Self::ExpectedDecimal(s)           => write!(f, "Expected decimal number after {s}=."),
            Self::ExpectedCommaOrSemicolon     => f.write_str("Expected ',' or ';' after control signal."),
            Self::MemReadAndWrite(ControlSignal::MemWrite) => f.write_str("MemWrite not allowed with MemRead."),
            Self::MemReadAndWrite(_)           => f.write_str("MemRead not allowed with MemWrite."),
            Self::ExpectedControlAfterComma    => f.write_str("Control signal expected after comma."),
            Self::DuplicateClock(s)            => write!(f, "Duplicate clock signal, {s}."),
            Self::ControlAfterSemicolon(s)     => write!(f, "Control signal {s} after ';'."),
            Self::MemControlAfterSemicolon(s)  => write!(f, "Memory control signal {s} after ';'."),
            Self::UnrecognizedClock(s)         => write!(f, "Unrecognized clock signal: {s}."),
            Self::MultipleSemicolons           => f.write_str("Multiple semicolons."),
            Self::ExpectedClockOrComment       => f.write_str("Syntax error where clock signal or comment expected."),
            Self::ExpectedCommaAfterClock      => f.write_str("Expected ',' after clock signal."),
            Self::UnrecognizedSpec(s)          => write!(f, "Unrecognized specification symbol: {s}."),
            Self::SpecSyntax(s)                => write!(f, "Syntax error starting with: {s}."),
            Self::ExpectedLeftBracket          => f.write_str("Expected [ after Mem."),
            Self::AddrOutOfRange               => f.write_str("Hexadecimal address is out of range (0x0000..0xFFFF)."),
            Self::ExpectedMemAddr              => f.write_str("Expected hex memory address after [."),
            Self::ExpectedRightBracket         => f.write_str("Expected ] after memory address."),
            Self::ExpectedMemEquals            => f.write_str("Expected = after ]."),
            Self::MemValueOutOfRange           => f.write_str("Hexadecimal memory value is out of range (0x0000..0xFFFF)."),
            Self::ExpectedHex                  => f.write_str("Expected hex constant after =."),
            Self::RegValueOutOfRange(r)        => {
                let digits = r.max_hex_digits();
                write!(f, "Hexadecimal register value is out of range (0x{:0>digits$}..0x{:F>digits$}).", "", "")
            },
            Self::StatusOutOfRange             => f.write_str("Status bit value is out of range (0..1)."),
            Self::ExpectedStatusValue          => f.write_str("Expected '1' or '0' after =."),
            Self::ExpectedSpecSeparator        => f.write_str("Expected ',' comment, or end of line."),
            Self::ExpectedBranchAfterSemicolon => f.write_str("Expected branch after semicolon."),
            Self::ExpectedGotoTarget           => f.write_str("No symbol after goto."),
            Self::ExpectedCondition            => f.write_str("Expected conditional instruction after \"if\"."),
            Self::ExpectedTrueTarget           => f.write_str("Expected a symbol for true target of \"if\"."),
            Self::ExpectedElse                 => f.write_str("Expected \"else\" after \"if\"."),
            Self::ExpectedFalseTarget          => f.write_str("Expected a symbol for false target of \"if\"."),
            Self::ExpectedEndAfterBranch       => f.write_str("Expected comment or end of line after branch."),
            Self::UnexpectedAfterComment       => f.write_str("Problem detected after comment."),
        }
    }
}
impl ParseErrKind {
    pub(crate) fn help(&self) -> Option<Cow<str>> {
        match self {
            Self::Lex(e) => crate::err::Error::help(e),
            Self::ExtendedDisabled => Some("enable control-flow features in the assembler flags".into()),
            Self::MultiplyDefined(_) => Some("labels must be unique within a program, try renaming one of the labels".into()),
            Self::ClockBeforeSemicolon(_) => Some("clock signals are listed after control signals, separated by ';'".into()),
            Self::OutOfRange { signal, .. } => {
                let range = signal.range();
                Some(format!("{signal} must be between {} and {}", range.start(), range.end()).into())
            },
            Self::MemReadAndWrite(_) => Some("memory can only be read or written in a given cycle, not both".into()),
            Self::ControlAfterSemicolon(_) | Self::MemControlAfterSemicolon(_) => Some("try moving this signal before the ';'".into()),
            Self::ExpectedCondition => {
                let conds: Vec<_> = BranchCondition::ALL.iter().map(|c| c.mnemonic()).collect();
                Some(format!("branch conditions are: {}", conds.join(", ")).into())
            },
            Self::RegValueOutOfRange(r) => Some(format!("{r} accepts at most {} hex digits", r.max_hex_digits()).into()),
            _ => None
        }
    }
}

/// Error from parsing a line of microcode.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseErr {
    /// The kind of error.
    pub kind: ParseErrKind,
    /// The span of the offending token within the line.
    pub span: ErrSpan
}
impl ParseErr {
    /// Creates a new [`ParseErr`].
    pub fn new<E: Into<ErrSpan>>(kind: ParseErrKind, span: E) -> Self {
        ParseErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for ParseErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrKind::Lex(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for ParseErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<Cow<str>> {
        self.kind.help()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum State {
    Start,
    PostComma,
    EqualDec(ControlSignal),
    DecControl(ControlSignal),
    ContinuePreSemicolon,
    StartPostSemicolon,
    ContinuePostSemicolon,
    AfterSemicolon,
    LoneGoto,
    If,
    TrueTarget(BranchCondition),
    Else(BranchCondition, SymbolId),
    FalseTarget(BranchCondition, SymbolId),
    OptionalComment,
    StartSpec,
    ExpectLeftBracket,
    ExpectMemAddr,
    ExpectRightBracket(u16),
    ExpectMemEquals(u16),
    ExpectMemValue(u16),
    RegEquals(RegSpec),
    RegValue(RegSpec),
    StatusEquals(StatusBit),
    StatusValue(StatusBit),
    SpecComma,
    ExpectEmpty,
    Finish,
}

enum LineKind {
    Blank,
    Micro,
    Pre,
    Post,
    Comment(String),
}

struct LineParser<'a> {
    sym: &'a mut SymbolTable,
    flags: AsmFlags,
    kind: LineKind,
    micro: MicroCode,
    spec: SpecLine,
}

/// Parses a single line of microcode.
///
/// Labels defined on this line are marked as defined in `sym`,
/// and branch targets are added to `sym` if they do not already exist.
///
/// If this fails, no partially parsed line is returned.
/// The span of the error is the offending token's byte range within `line`.
pub fn parse_line(sym: &mut SymbolTable, line: &str, flags: AsmFlags) -> Result<CodeLine, ParseErr> {
    let mut parser = LineParser {
        sym,
        flags,
        kind: LineKind::Blank,
        micro: MicroCode::new(),
        spec: SpecLine::default(),
    };

    let mut rest = line;
    let mut state = State::Start;
    while state != State::Finish {
        let (tok, text) = get_token(&mut rest).map_err(|e| {
            let start = line.len() - rest.trim_start().len();
            ParseErr::new(ParseErrKind::Lex(e), start..line.len().min(start + 1))
        })?;

        let end = line.len() - rest.len();
        let span: Range<usize> = (end - text.len())..end;
        state = parser.step(state, tok, text)
            .map_err(|kind| ParseErr::new(kind, span))?;
    }

    Ok(parser.finish())
}

/// Reads a hex constant. A bare `0` also counts as a hex constant.
fn hex_const(tok: &Token) -> Option<HexConst> {
    match *tok {
        Token::Hex(h) => Some(h),
        Token::Digit(0) => Some(HexConst { value: 0, width: 1 }),
        _ => None
    }
}

impl LineParser<'_> {
    fn step(&mut self, state: State, tok: Token, text: &str) -> Result<State, ParseErrKind> {
        use ParseErrKind as E;

        if !self.flags.extended {
            let control_flow = match &tok {
                Token::Label(Label::Symbol(_)) => true,
                Token::Ident(id) => id.is_control_flow(),
                _ => false
            };
            if control_flow {
                return Err(E::ExtendedDisabled);
            }
        }

        match state {
            State::Start => match tok {
                Token::Label(Label::Symbol(name)) => {
                    self.kind = LineKind::Micro;
                    let id = self.sym.define(&name).ok_or(E::MultiplyDefined(name))?;
                    self.micro.symbol = Some(id);
                    Ok(State::PostComma)
                },
                Token::Label(Label::UnitPre) => {
                    self.kind = LineKind::Pre;
                    Ok(State::StartSpec)
                },
                Token::Label(Label::UnitPost) => {
                    self.kind = LineKind::Post;
                    Ok(State::StartSpec)
                },
                Token::Ident(Ident::Name(name)) => {
                    self.kind = LineKind::Micro;
                    self.control(&name)
                },
                Token::Ident(kw) => {
                    self.kind = LineKind::Micro;
                    self.branch_keyword(kw).ok_or(E::ExpectedControlOrComment)
                },
                Token::Semicolon => Err(E::NoControlsBeforeSemicolon),
                Token::Comment(c) => {
                    self.kind = LineKind::Comment(c);
                    Ok(State::ExpectEmpty)
                },
                Token::Empty => Ok(State::Finish),
                _ => Err(E::ExpectedControlOrComment)
            },
            State::PostComma => match tok {
                Token::Ident(Ident::Name(name)) => self.control(&name),
                Token::Ident(kw) => self.branch_keyword(kw).ok_or(E::ExpectedControlOrComment),
                Token::Semicolon => Err(E::ExpectedControlAfterComma),
                Token::Comment(c) => Ok(self.micro_comment(c)),
                Token::Empty => Ok(State::Finish),
                _ => Err(E::ExpectedControlOrComment)
            },
            State::EqualDec(sig) => match tok {
                Token::Equals => Ok(State::DecControl(sig)),
                _ => Err(E::ExpectedEquals(sig.mnemonic()))
            },
            State::DecControl(sig) => match tok {
                Token::Digit(value) => {
                    if self.micro.has_control(sig) {
                        return Err(E::DuplicateControl(sig));
                    }
                    let value = u8::try_from(value).ok()
                        .filter(|v| sig.range().contains(v))
                        .ok_or(E::OutOfRange { signal: sig, value })?;

                    self.micro.set_control(sig, Some(value));
                    Ok(State::ContinuePreSemicolon)
                },
                _ => Err(E::ExpectedDecimal(sig))
            },
            State::ContinuePreSemicolon => match tok {
                Token::Comma => Ok(State::PostComma),
                Token::Semicolon => Ok(State::StartPostSemicolon),
                Token::Comment(c) => Ok(self.micro_comment(c)),
                Token::Empty => Ok(State::Finish),
                _ => Err(E::ExpectedCommaOrSemicolon)
            },
            State::StartPostSemicolon => match tok {
                Token::Ident(Ident::Name(name)) => self.clock(name),
                Token::Ident(kw) => self.branch_keyword(kw).ok_or(E::ExpectedClockOrComment),
                Token::Semicolon => Err(E::MultipleSemicolons),
                Token::Comment(c) => Ok(self.micro_comment(c)),
                Token::Empty => Ok(State::Finish),
                _ => Err(E::ExpectedClockOrComment)
            },
            State::ContinuePostSemicolon => match tok {
                Token::Comma => Ok(State::StartPostSemicolon),
                Token::Semicolon if self.flags.extended => Ok(State::AfterSemicolon),
                Token::Semicolon => Err(E::MultipleSemicolons),
                Token::Comment(c) => Ok(self.micro_comment(c)),
                Token::Empty => Ok(State::Finish),
                _ => Err(E::ExpectedCommaAfterClock)
            },
            State::AfterSemicolon => match tok {
                Token::Ident(kw) => self.branch_keyword(kw).ok_or(E::ExpectedBranchAfterSemicolon),
                _ => Err(E::ExpectedBranchAfterSemicolon)
            },
            State::LoneGoto => match tok {
                Token::Ident(Ident::Name(target)) => {
                    self.micro.branch = Branch::Goto(self.sym.insert(&target));
                    Ok(State::OptionalComment)
                },
                _ => Err(E::ExpectedGotoTarget)
            },
            State::If => match tok {
                Token::Ident(Ident::Name(cond)) => BranchCondition::from_mnemonic(&cond)
                    .map(State::TrueTarget)
                    .ok_or(E::ExpectedCondition),
                _ => Err(E::ExpectedCondition)
            },
            State::TrueTarget(cond) => match tok {
                Token::Ident(Ident::Name(target)) => Ok(State::Else(cond, self.sym.insert(&target))),
                _ => Err(E::ExpectedTrueTarget)
            },
            State::Else(cond, on_true) => match tok {
                Token::Ident(Ident::Else) => Ok(State::FalseTarget(cond, on_true)),
                _ => Err(E::ExpectedElse)
            },
            State::FalseTarget(cond, on_true) => match tok {
                Token::Ident(Ident::Name(target)) => {
                    let on_false = self.sym.insert(&target);
                    self.micro.branch = Branch::If { cond, on_true, on_false };
                    Ok(State::OptionalComment)
                },
                _ => Err(E::ExpectedFalseTarget)
            },
            State::OptionalComment => match tok {
                Token::Comment(c) => Ok(self.micro_comment(c)),
                Token::Empty => Ok(State::Finish),
                _ => Err(E::ExpectedEndAfterBranch)
            },
            State::StartSpec => match tok {
                Token::Ident(Ident::Name(name)) => {
                    if name.eq_ignore_ascii_case("Mem") {
                        Ok(State::ExpectLeftBracket)
                    } else if let Some(reg) = RegSpec::from_mnemonic(&name, self.flags.cpu_type) {
                        Ok(State::RegEquals(reg))
                    } else if let Some(bit) = StatusBit::from_mnemonic(&name) {
                        Ok(State::StatusEquals(bit))
                    } else {
                        Err(E::UnrecognizedSpec(name))
                    }
                },
                Token::Comment(c) => Ok(self.spec_comment(c)),
                Token::Empty => Ok(State::Finish),
                _ => Err(E::SpecSyntax(text.to_string()))
            },
            State::ExpectLeftBracket => match tok {
                Token::LeftBracket => Ok(State::ExpectMemAddr),
                _ => Err(E::ExpectedLeftBracket)
            },
            State::ExpectMemAddr => match hex_const(&tok) {
                Some(h) => u16::try_from(h.value)
                    .map(State::ExpectRightBracket)
                    .map_err(|_| E::AddrOutOfRange),
                None => Err(E::ExpectedMemAddr)
            },
            State::ExpectRightBracket(addr) => match tok {
                Token::RightBracket => Ok(State::ExpectMemEquals(addr)),
                _ => Err(E::ExpectedRightBracket)
            },
            State::ExpectMemEquals(addr) => match tok {
                Token::Equals => Ok(State::ExpectMemValue(addr)),
                _ => Err(E::ExpectedMemEquals)
            },
            State::ExpectMemValue(addr) => match hex_const(&tok) {
                Some(h) => {
                    let value = u16::try_from(h.value).map_err(|_| E::MemValueOutOfRange)?;
                    self.spec.specs.push(Specification::Mem { addr, value, width: h.width });
                    Ok(State::SpecComma)
                },
                None => Err(E::ExpectedHex)
            },
            State::RegEquals(reg) => match tok {
                Token::Equals => Ok(State::RegValue(reg)),
                _ => Err(E::ExpectedEquals(reg.mnemonic()))
            },
            State::RegValue(reg) => match hex_const(&tok) {
                Some(h) if h.value > reg.max_value() => Err(E::RegValueOutOfRange(reg)),
                Some(h) => {
                    self.spec.specs.push(Specification::Reg { reg, value: h.value });
                    Ok(State::SpecComma)
                },
                None => Err(E::ExpectedHex)
            },
            State::StatusEquals(bit) => match tok {
                Token::Equals => Ok(State::StatusValue(bit)),
                _ => Err(E::ExpectedEquals(bit.mnemonic()))
            },
            State::StatusValue(bit) => match tok {
                Token::Digit(value @ (0 | 1)) => {
                    self.spec.specs.push(Specification::Status { bit, value: value == 1 });
                    Ok(State::SpecComma)
                },
                Token::Digit(_) => Err(E::StatusOutOfRange),
                _ => Err(E::ExpectedStatusValue)
            },
            State::SpecComma => match tok {
                Token::Comma => Ok(State::StartSpec),
                Token::Comment(c) => Ok(self.spec_comment(c)),
                Token::Empty => Ok(State::Finish),
                _ => Err(E::ExpectedSpecSeparator)
            },
            State::ExpectEmpty => match tok {
                Token::Empty => Ok(State::Finish),
                _ => Err(E::UnexpectedAfterComment)
            },
            State::Finish => Ok(State::Finish),
        }
    }

    /// Handles a control signal mnemonic in the control section of a line.
    fn control(&mut self, name: &str) -> Result<State, ParseErrKind> {
        let AsmFlags { cpu_type, extended } = self.flags;

        if let Some(sig) = ControlSignal::from_mnemonic(name, cpu_type, extended) {
            if self.micro.has_control(sig) {
                return Err(ParseErrKind::DuplicateControl(sig));
            }
            if !sig.is_mem() {
                return Ok(State::EqualDec(sig));
            }

            let other = match sig {
                ControlSignal::MemRead => ControlSignal::MemWrite,
                _ => ControlSignal::MemRead,
            };
            if self.micro.has_control(other) {
                return Err(ParseErrKind::MemReadAndWrite(sig));
            }
            self.micro.set_control(sig, Some(1));
            Ok(State::ContinuePreSemicolon)
        } else if let Some(ck) = ClockSignal::from_mnemonic(name, cpu_type, extended) {
            Err(ParseErrKind::ClockBeforeSemicolon(ck))
        } else {
            Err(ParseErrKind::UnrecognizedControl(name.to_string()))
        }
    }

    /// Handles a clock signal mnemonic in the clock section of a line.
    fn clock(&mut self, name: String) -> Result<State, ParseErrKind> {
        let AsmFlags { cpu_type, extended } = self.flags;

        if let Some(ck) = ClockSignal::from_mnemonic(&name, cpu_type, extended) {
            if self.micro.clock(ck) {
                return Err(ParseErrKind::DuplicateClock(ck));
            }
            self.micro.set_clock(ck, true);
            Ok(State::ContinuePostSemicolon)
        } else if let Some(sig) = ControlSignal::from_mnemonic(&name, cpu_type, extended) {
            match sig.is_mem() {
                true  => Err(ParseErrKind::MemControlAfterSemicolon(sig)),
                false => Err(ParseErrKind::ControlAfterSemicolon(sig)),
            }
        } else {
            Err(ParseErrKind::UnrecognizedClock(name))
        }
    }

    /// Handles a branch keyword, returning `None` if the keyword cannot start a branch.
    fn branch_keyword(&mut self, kw: Ident) -> Option<State> {
        match kw {
            Ident::If   => Some(State::If),
            Ident::Goto => Some(State::LoneGoto),
            Ident::Stop => {
                self.micro.branch = Branch::Stop;
                Some(State::OptionalComment)
            },
            Ident::DecodeAddrMode => {
                self.micro.branch = Branch::DecodeAddrMode;
                Some(State::OptionalComment)
            },
            Ident::DecodeInstrSpec => {
                self.micro.branch = Branch::DecodeInstrSpec;
                Some(State::OptionalComment)
            },
            Ident::Else | Ident::Name(_) => None,
        }
    }

    fn micro_comment(&mut self, comment: String) -> State {
        self.micro.comment = Some(comment);
        State::ExpectEmpty
    }

    fn spec_comment(&mut self, comment: String) -> State {
        self.spec.comment = Some(comment);
        State::ExpectEmpty
    }

    fn finish(self) -> CodeLine {
        match self.kind {
            LineKind::Blank      => CodeLine::Blank,
            LineKind::Micro      => CodeLine::MicroCode(self.micro),
            LineKind::Pre        => CodeLine::UnitPre(self.spec),
            LineKind::Post       => CodeLine::UnitPost(self.spec),
            LineKind::Comment(c) => CodeLine::CommentOnly(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::asm::{AsmFlags, SymbolTable};
    use crate::ast::code::{Branch, CodeLine, MicroCode, SpecLine, Specification};
    use crate::ast::{BranchCondition, ClockSignal, ControlSignal, CpuType, RegSpec, StatusBit};
    use crate::err::{ErrSpan, LexErr};

    use super::{parse_line, ParseErrKind};

    const ONE_BYTE: AsmFlags = AsmFlags { cpu_type: CpuType::OneByteDataBus, extended: true };
    const TWO_BYTE: AsmFlags = AsmFlags { cpu_type: CpuType::TwoByteDataBus, extended: true };

    fn parse(line: &str) -> CodeLine {
        parse_line(&mut SymbolTable::new(), line, ONE_BYTE).unwrap()
    }
    fn parse_micro(line: &str) -> MicroCode {
        match parse(line) {
            CodeLine::MicroCode(mc) => mc,
            l => panic!("expected microcode, got {l:?}"),
        }
    }
    fn assert_parse_fail(line: &str, kind: ParseErrKind) {
        assert_parse_fail_with(line, ONE_BYTE, kind)
    }
    fn assert_parse_fail_with(line: &str, flags: AsmFlags, kind: ParseErrKind) {
        let result = parse_line(&mut SymbolTable::new(), line, flags);
        assert_eq!(result.unwrap_err().kind, kind, "{line}");
    }

    #[test]
    fn test_basic_line() {
        let mc = parse_micro("A=6, B=7, MemRead; MARCk, NCk");
        assert_eq!(mc.control(ControlSignal::A), Some(6));
        assert_eq!(mc.control(ControlSignal::B), Some(7));
        assert_eq!(mc.control(ControlSignal::MemRead), Some(1));
        assert_eq!(mc.control(ControlSignal::C), None);
        assert!(mc.clock(ClockSignal::MARCk));
        assert!(mc.clock(ClockSignal::NCk));
        assert!(!mc.clock(ClockSignal::LoadCk));
        assert_eq!(mc.branch, Branch::Next);
        assert_eq!(mc.comment, None);

        // case insensitive
        let mc = parse_micro("amux=1, alu=0; loadck");
        assert_eq!(mc.control(ControlSignal::AMux), Some(1));
        assert_eq!(mc.control(ControlSignal::ALU), Some(0));
        assert!(mc.clock(ClockSignal::LoadCk));

        // zero is a value, not absence
        let mc = parse_micro("CMux=0");
        assert_eq!(mc.control(ControlSignal::CMux), Some(0));
    }

    #[test]
    fn test_other_line_kinds() {
        assert_eq!(parse(""), CodeLine::Blank);
        assert_eq!(parse("   \t "), CodeLine::Blank);
        assert_eq!(parse("// just a comment"), CodeLine::CommentOnly("// just a comment".to_string()));

        assert_eq!(parse("UnitPre: Mem[0x0A]=0x12, Mem[0xFFFE]=0x1234, A=0xBEEF, N=1 // setup"), CodeLine::UnitPre(SpecLine {
            specs: vec![
                Specification::Mem { addr: 0x0A, value: 0x12, width: 1 },
                Specification::Mem { addr: 0xFFFE, value: 0x1234, width: 2 },
                Specification::Reg { reg: RegSpec::A, value: 0xBEEF },
                Specification::Status { bit: StatusBit::N, value: true },
            ],
            comment: Some("// setup".to_string()),
        }));
        assert_eq!(parse("unitpost: IR=0x123456, T1=0x00, Z=0"), CodeLine::UnitPost(SpecLine {
            specs: vec![
                Specification::Reg { reg: RegSpec::IR, value: 0x123456 },
                Specification::Reg { reg: RegSpec::T1, value: 0 },
                Specification::Status { bit: StatusBit::Z, value: false },
            ],
            comment: None,
        }));

        // bare 0 is a hex constant
        assert_eq!(parse("UnitPre: X=0"), CodeLine::UnitPre(SpecLine {
            specs: vec![Specification::Reg { reg: RegSpec::X, value: 0 }],
            comment: None
        }));
    }

    #[test]
    fn test_comments() {
        let mc = parse_micro("A=1; LoadCk // load");
        assert_eq!(mc.comment.as_deref(), Some("// load"));
        let mc = parse_micro("A=1 // no clocks");
        assert_eq!(mc.comment.as_deref(), Some("// no clocks"));
        let mc = parse_micro("MemRead; stopCPU // halt");
        assert_eq!(mc.branch, Branch::Stop);
        assert_eq!(mc.comment.as_deref(), Some("// halt"));
    }

    #[test]
    fn test_branches() {
        let mut sym = SymbolTable::new();

        let line = parse_line(&mut sym, "loop: A=1; NCk; if LT loop else done // test", ONE_BYTE).unwrap();
        let CodeLine::MicroCode(mc) = line else { panic!("expected microcode") };
        let lp = sym.lookup("loop").unwrap();
        let done = sym.lookup("done").unwrap();
        assert_eq!(mc.symbol, Some(lp));
        assert_eq!(mc.branch, Branch::If { cond: BranchCondition::LT, on_true: lp, on_false: done });
        assert!(sym.get(lp).unwrap().is_defined());
        assert!(!sym.get(done).unwrap().is_defined());

        let line = parse_line(&mut sym, "goto loop", ONE_BYTE).unwrap();
        assert_eq!(line.as_microcode().map(|mc| mc.branch), Some(Branch::Goto(lp)));

        let line = parse_line(&mut sym, "if IsUnary loop else done", ONE_BYTE).unwrap();
        assert_eq!(line.as_microcode().map(|mc| mc.branch), Some(Branch::If { cond: BranchCondition::IsUnary, on_true: lp, on_false: done }));

        let line = parse_line(&mut sym, "A=1, if EQ loop else done", ONE_BYTE).unwrap();
        assert!(line.as_microcode().is_some_and(|mc| mc.has_control(ControlSignal::A)));

        assert_eq!(parse_micro("DecodeInstrSpec").branch, Branch::DecodeInstrSpec);
        assert_eq!(parse_micro("A=8; LoadCk; AMD").branch, Branch::DecodeAddrMode);
        assert_eq!(parse_micro("A=8; stop").branch, Branch::Stop);
        assert_eq!(parse_micro("A=8, stopCPU").branch, Branch::Stop);

        // label alone
        let mc = parse_micro("empty:");
        assert_eq!(mc, MicroCode { symbol: mc.symbol, ..MicroCode::new() });
    }

    #[test]
    fn test_branch_positions() {
        // a branch can start a line, follow a label, or follow a comma
        for prefix in ["", "here: ", "A=1, "] {
            let mut sym = SymbolTable::new();
            let line = parse_line(&mut sym, &format!("{prefix}goto next // done"), ONE_BYTE).unwrap();
            let mc = line.as_microcode().unwrap();
            assert_eq!(mc.branch, Branch::Goto(sym.lookup("next").unwrap()), "{prefix}goto");
            assert_eq!(mc.comment.as_deref(), Some("// done"));

            assert_eq!(parse_micro(&format!("{prefix}stop")).branch, Branch::Stop, "{prefix}stop");
            assert_eq!(parse_micro(&format!("{prefix}AMD")).branch, Branch::DecodeAddrMode, "{prefix}AMD");
            assert_eq!(parse_micro(&format!("{prefix}ISD")).branch, Branch::DecodeInstrSpec, "{prefix}ISD");
        }
        assert_parse_fail("A=1, else", ParseErrKind::ExpectedControlOrComment);
    }

    #[test]
    fn test_branch_errors() {
        assert_parse_fail("A=1; NCk; NCk", ParseErrKind::ExpectedBranchAfterSemicolon);
        assert_parse_fail("goto", ParseErrKind::ExpectedGotoTarget);
        assert_parse_fail("goto 5", ParseErrKind::ExpectedGotoTarget);
        assert_parse_fail("if", ParseErrKind::ExpectedCondition);
        assert_parse_fail("if XYZ a else b", ParseErrKind::ExpectedCondition);
        assert_parse_fail("if EQ", ParseErrKind::ExpectedTrueTarget);
        assert_parse_fail("if EQ a b", ParseErrKind::ExpectedElse);
        assert_parse_fail("if EQ a else", ParseErrKind::ExpectedFalseTarget);
        assert_parse_fail("goto a b", ParseErrKind::ExpectedEndAfterBranch);
        assert_parse_fail("else", ParseErrKind::ExpectedControlOrComment);
    }

    #[test]
    fn test_control_errors() {
        assert_parse_fail("LoadCk", ParseErrKind::ClockBeforeSemicolon(ClockSignal::LoadCk));
        assert_parse_fail("A=1, MARCk", ParseErrKind::ClockBeforeSemicolon(ClockSignal::MARCk));
        assert_parse_fail("Foo=1", ParseErrKind::UnrecognizedControl("Foo".to_string()));
        assert_parse_fail("; LoadCk", ParseErrKind::NoControlsBeforeSemicolon);
        assert_parse_fail("=", ParseErrKind::ExpectedControlOrComment);
        assert_parse_fail("A 5", ParseErrKind::ExpectedEquals("A"));
        assert_parse_fail("A=", ParseErrKind::ExpectedDecimal(ControlSignal::A));
        assert_parse_fail("A=0x1", ParseErrKind::ExpectedDecimal(ControlSignal::A));
        assert_parse_fail("A=1 B=2", ParseErrKind::ExpectedCommaOrSemicolon);
        assert_parse_fail("A=1, ;", ParseErrKind::ExpectedControlAfterComma);
        assert_parse_fail("A=1; B", ParseErrKind::ControlAfterSemicolon(ControlSignal::B));
        assert_parse_fail("A=1; MemRead", ParseErrKind::MemControlAfterSemicolon(ControlSignal::MemRead));
        assert_parse_fail("A=1; Foo", ParseErrKind::UnrecognizedClock("Foo".to_string()));
        assert_parse_fail("A=1;;", ParseErrKind::MultipleSemicolons);
        assert_parse_fail("A=1; =", ParseErrKind::ExpectedClockOrComment);
        assert_parse_fail("A=1; NCk ZCk", ParseErrKind::ExpectedCommaAfterClock);
        assert_parse_fail("A=1; NCk, NCk", ParseErrKind::DuplicateClock(ClockSignal::NCk));
        assert_parse_fail("A=1 # 2", ParseErrKind::Lex(LexErr::UnexpectedChar('#')));
        assert_parse_fail("A=1 / 2", ParseErrKind::Lex(LexErr::MalformedComment));

        // mnemonics for the other bus aren't recognized
        assert_parse_fail("MARMux=1", ParseErrKind::UnrecognizedControl("MARMux".to_string()));
        assert_parse_fail_with("MDRMux=1", TWO_BYTE, ParseErrKind::UnrecognizedControl("MDRMux".to_string()));
        assert_parse_fail_with("A=1; MDRCk", TWO_BYTE, ParseErrKind::UnrecognizedClock("MDRCk".to_string()));
    }

    #[test]
    fn test_duplicate_signals() {
        for flags in [ONE_BYTE, TWO_BYTE] {
            for &sig in ControlSignal::ALL.iter().filter(|s| s.available(flags.cpu_type, flags.extended)) {
                let line = match sig.is_mem() {
                    true  => format!("{sig}, {sig}"),
                    false => format!("{sig}=0, {sig}=1"),
                };
                assert_parse_fail_with(&line, flags, ParseErrKind::DuplicateControl(sig));
            }
        }
    }

    #[test]
    fn test_ranges() {
        assert!(parse_micro("A=0").has_control(ControlSignal::A));
        assert_eq!(parse_micro("A=31").control(ControlSignal::A), Some(31));
        assert_parse_fail("A=32", ParseErrKind::OutOfRange { signal: ControlSignal::A, value: 32 });
        assert_parse_fail("C=255", ParseErrKind::OutOfRange { signal: ControlSignal::C, value: 255 });
        assert_parse_fail("B=99999999999", ParseErrKind::OutOfRange { signal: ControlSignal::B, value: u32::MAX });

        assert_eq!(parse_micro("AMux=0").control(ControlSignal::AMux), Some(0));
        assert_eq!(parse_micro("AMux=1").control(ControlSignal::AMux), Some(1));
        assert_parse_fail("AMux=2", ParseErrKind::OutOfRange { signal: ControlSignal::AMux, value: 2 });

        assert_eq!(parse_micro("ALU=15").control(ControlSignal::ALU), Some(15));
        assert_parse_fail("ALU=16", ParseErrKind::OutOfRange { signal: ControlSignal::ALU, value: 16 });

        assert_parse_fail("PValid=2", ParseErrKind::OutOfRange { signal: ControlSignal::PValid, value: 2 });
    }

    #[test]
    fn test_mem_exclusion() {
        assert_parse_fail("MemRead, MemWrite", ParseErrKind::MemReadAndWrite(ControlSignal::MemWrite));
        assert_parse_fail("MemWrite, MemRead", ParseErrKind::MemReadAndWrite(ControlSignal::MemRead));
        assert_parse_fail("MemWrite, A=5, MemRead; MARCk", ParseErrKind::MemReadAndWrite(ControlSignal::MemRead));
    }

    #[test]
    fn test_spec_errors() {
        assert_parse_fail("UnitPre: Foo=0x1", ParseErrKind::UnrecognizedSpec("Foo".to_string()));
        assert_parse_fail("UnitPre: =", ParseErrKind::SpecSyntax("=".to_string()));
        assert_parse_fail("UnitPre: Mem 0x1", ParseErrKind::ExpectedLeftBracket);
        assert_parse_fail("UnitPre: Mem[0x10000]=0x1", ParseErrKind::AddrOutOfRange);
        assert_parse_fail("UnitPre: Mem[5]=0x1", ParseErrKind::ExpectedMemAddr);
        assert_parse_fail("UnitPre: Mem[0x1=0x1", ParseErrKind::ExpectedRightBracket);
        assert_parse_fail("UnitPre: Mem[0x1] 0x1", ParseErrKind::ExpectedMemEquals);
        assert_parse_fail("UnitPre: Mem[0x1]=0x10000", ParseErrKind::MemValueOutOfRange);
        assert_parse_fail("UnitPre: Mem[0x1]=1", ParseErrKind::ExpectedHex);
        assert_parse_fail("UnitPre: A 0x1", ParseErrKind::ExpectedEquals("A"));
        assert_parse_fail("UnitPre: A=0x10000", ParseErrKind::RegValueOutOfRange(RegSpec::A));
        assert_parse_fail("UnitPre: T1=0x100", ParseErrKind::RegValueOutOfRange(RegSpec::T1));
        assert_parse_fail("UnitPre: IR=0x1000000", ParseErrKind::RegValueOutOfRange(RegSpec::IR));
        assert_parse_fail("UnitPre: MARA=0x10000", ParseErrKind::RegValueOutOfRange(RegSpec::MARA));

        // memory registers accept a word (truncated when applied)
        assert_eq!(parse("UnitPre: MARA=0x100, MDR=0x1FF"), CodeLine::UnitPre(SpecLine {
            specs: vec![
                Specification::Reg { reg: RegSpec::MARA, value: 0x100 },
                Specification::Reg { reg: RegSpec::MDR, value: 0x1FF },
            ],
            comment: None
        }));
        assert_parse_fail("UnitPre: N 1", ParseErrKind::ExpectedEquals("N"));
        assert_parse_fail("UnitPre: N=2", ParseErrKind::StatusOutOfRange);
        assert_parse_fail("UnitPre: N=0x1", ParseErrKind::ExpectedStatusValue);
        assert_parse_fail("UnitPre: N=1 Z=1", ParseErrKind::ExpectedSpecSeparator);
        assert_parse_fail_with("UnitPre: MDR=0x1", TWO_BYTE, ParseErrKind::UnrecognizedSpec("MDR".to_string()));
        assert_parse_fail("UnitPre: MDRE=0x1", ParseErrKind::UnrecognizedSpec("MDRE".to_string()));
    }

    #[test]
    fn test_multiply_defined() {
        let mut sym = SymbolTable::new();
        parse_line(&mut sym, "here: A=1", ONE_BYTE).unwrap();
        let err = parse_line(&mut sym, "here: A=2", ONE_BYTE).unwrap_err();
        assert_eq!(err.kind, ParseErrKind::MultiplyDefined("here".to_string()));
        assert_eq!(err.span, ErrSpan::Range(0..5));

        // forward references can still be defined later
        parse_line(&mut sym, "goto there", ONE_BYTE).unwrap();
        parse_line(&mut sym, "there: A=3", ONE_BYTE).unwrap();
    }

    #[test]
    fn test_error_span_and_message() {
        let err = parse_line(&mut SymbolTable::new(), "A=5, B=12, A=6", ONE_BYTE).unwrap_err();
        assert_eq!(err.span, ErrSpan::Range(11..12));
        assert_eq!(err.to_string(), "// ERROR: Duplicate control signal, A.");

        let err = parse_line(&mut SymbolTable::new(), "A=32", ONE_BYTE).unwrap_err();
        assert_eq!(err.to_string(), "// ERROR: Value 32 is out of range for A.");

        let err = parse_line(&mut SymbolTable::new(), "UnitPre: IR=0x1000000", ONE_BYTE).unwrap_err();
        assert_eq!(err.to_string(), "// ERROR: Hexadecimal register value is out of range (0x000000..0xFFFFFF).");

        let err = parse_line(&mut SymbolTable::new(), "MemRead, MemWrite", ONE_BYTE).unwrap_err();
        assert_eq!(err.to_string(), "// ERROR: MemWrite not allowed with MemRead.");
    }

    #[test]
    fn test_failed_line_leaves_no_code() {
        let mut sym = SymbolTable::new();
        let result = parse_line(&mut sym, "A=1, B=2; LoadCk, LoadCk", ONE_BYTE);
        assert!(result.is_err());
    }
}
