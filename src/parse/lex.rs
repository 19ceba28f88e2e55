//! Tokenizing Pep/9 microcode.
//!
//! This module holds the tokens that characterize a line of microcode ([`Token`]).
//! The line parser pulls tokens off the front of a line one at a time with [`get_token`].
//!
//! Microcode is line-oriented, so a token never spans a newline and an exhausted
//! line produces [`Token::Empty`].

use logos::{Lexer, Logos};

/// A unit of information in a line of microcode.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\n\f]+", error = LexErr)]
pub enum Token {
    /// A comma, which separates signals and specifications.
    #[token(",")]
    Comma,

    /// `[`, which opens the address of a memory specification.
    #[token("[")]
    LeftBracket,

    /// `]`, which closes the address of a memory specification.
    #[token("]")]
    RightBracket,

    /// `=`, which assigns a value to a signal or specification.
    #[token("=")]
    Equals,

    /// A semicolon, which separates control signals from clock signals.
    #[token(";")]
    Semicolon,

    /// A comment, which starts with `//` and spans the remaining part of the line.
    ///
    /// The text of the comment includes the leading `//`.
    #[regex(r"/[^\n]*", lex_comment)]
    Comment(String),

    /// A hex constant (e.g., `0x0A`, `0XFFFF`).
    #[regex(r"0[xX][0-9A-Fa-f]*", lex_hex)]
    Hex(HexConst),

    /// An unsigned decimal value (e.g., `0`, `31`).
    #[regex(r"[0-9]+", lex_digit)]
    Digit(u32),

    /// A colon-terminated identifier: a line label or a `UnitPre:`/`UnitPost:` keyword.
    #[regex(r"[A-Za-z]\w*:", lex_label)]
    Label(Label),

    /// An identifier.
    ///
    /// This can refer to either:
    /// - a branch keyword (e.g., `if`, `goto`, `stopCPU`)
    /// - a signal, register, or condition mnemonic (e.g. `MARCk`, `ALU`, `GT`)
    /// - a branch target (e.g., `fetch`)
    ///
    /// This token type is case-insensitive.
    #[regex(r"[A-Za-z]\w*", lex_ident)]
    Ident(Ident),

    /// The end of the line.
    Empty,
}

/// A hex constant, along with the number of bytes its literal spells out.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct HexConst {
    /// The value of the constant.
    ///
    /// Literals which do not fit in a `u32` saturate to [`u32::MAX`].
    pub value: u32,
    /// 2 if the literal has more than 2 hex digits, 1 otherwise.
    pub width: u8,
}

/// A colon-terminated identifier.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Label {
    /// `UnitPre:` (case-insensitive)
    UnitPre,
    /// `UnitPost:` (case-insensitive)
    UnitPost,
    /// A label defining a microcode symbol (colon stripped).
    Symbol(String),
}

macro_rules! ident_enum {
    ($($kw:ident($disp:literal) => $($s:literal)|+),+) => {
        /// An identifier.
        ///
        /// This can refer to either:
        /// - a branch keyword (e.g., `if`, `goto`, `stopCPU`)
        /// - any other name, which is resolved by the parser
        ///
        /// This token type is case insensitive.
        #[derive(Debug, PartialEq, Eq, Clone)]
        pub enum Ident {
            $(
                #[allow(missing_docs)]
                $kw
            ),+,
            #[allow(missing_docs)]
            Name(String)
        }

        impl std::str::FromStr for Ident {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match &*s.to_uppercase() {
                    $($($s)|+ => Ok(Self::$kw)),*,
                    _ => Ok(Self::Name(s.to_string()))
                }
            }
        }

        impl std::fmt::Display for Ident {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$kw => f.write_str($disp)),*,
                    Self::Name(id) => f.write_str(id)
                }
            }
        }
    };
}
ident_enum! {
    If("if")                           => "IF",
    Else("else")                       => "ELSE",
    Goto("goto")                       => "GOTO",
    Stop("stopCPU")                    => "STOPCPU" | "STOP",
    DecodeAddrMode("DecodeAddrMode")   => "DECODEADDRMODE" | "DECODEADDRSPEC" | "AMD",
    DecodeInstrSpec("DecodeInstrSpec") => "DECODEINSTRSPEC" | "ISD"
}

impl Ident {
    /// Whether this identifier is only valid with control-flow features enabled.
    pub(crate) fn is_control_flow(&self) -> bool {
        !matches!(self, Ident::Name(_))
    }
}

/// Any errors raised in attempting to tokenize a line.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum LexErr {
    /// A `/` which is not followed by another `/`.
    MalformedComment,
    /// A `0x` prefix without any hex digits after it.
    MalformedHex,
    /// A character which cannot start any token.
    UnexpectedChar(char),
    /// A symbol was used which is not allowed in microcode (position unknown)
    #[default]
    InvalidSymbol
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::MalformedComment  => f.write_str("Malformed comment"),
            LexErr::MalformedHex      => f.write_str("Malformed hex constant."),
            LexErr::UnexpectedChar(c) => write!(f, "Syntax error starting with {c}"),
            LexErr::InvalidSymbol     => f.write_str("Syntax error"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::MalformedComment  => Some("comments start with two slashes (//)".into()),
            LexErr::MalformedHex      => Some("there should be hex digits (0-9, A-F) after 0x".into()),
            LexErr::UnexpectedChar(_) => Some("this char does not occur in any token in Pep/9 microcode".into()),
            LexErr::InvalidSymbol     => None,
        }
    }
}

fn lex_comment(lx: &Lexer<'_, Token>) -> Result<String, LexErr> {
    match lx.slice().starts_with("//") {
        true  => Ok(lx.slice().to_string()),
        false => Err(LexErr::MalformedComment),
    }
}
fn lex_hex(lx: &Lexer<'_, Token>) -> Result<HexConst, LexErr> {
    let digits = &lx.slice()[2..];
    if digits.is_empty() {
        return Err(LexErr::MalformedHex);
    }

    let value = u32::from_str_radix(digits, 16).unwrap_or(u32::MAX);
    let width = if digits.len() > 2 { 2 } else { 1 };
    Ok(HexConst { value, width })
}
fn lex_digit(lx: &Lexer<'_, Token>) -> u32 {
    // only overflow can fail here, which is then caught as out of range
    lx.slice().parse().unwrap_or(u32::MAX)
}
fn lex_label(lx: &Lexer<'_, Token>) -> Label {
    let name = &lx.slice()[..lx.slice().len() - 1];
    match &*name.to_uppercase() {
        "UNITPRE"  => Label::UnitPre,
        "UNITPOST" => Label::UnitPost,
        _ => Label::Symbol(name.to_string())
    }
}
fn lex_ident(lx: &Lexer<'_, Token>) -> Ident {
    match lx.slice().parse::<Ident>() {
        Ok(id) => id,
        Err(e) => match e {},
    }
}

/// Pulls the next token off the front of a line.
///
/// On success, this returns the token alongside the text it was read from,
/// and `line` is advanced past the token.
/// If `line` has no more tokens, this returns [`Token::Empty`] with empty text.
///
/// On failure, `line` is left unchanged.
///
/// # Example
/// ```
/// use pep9_micro::parse::lex::{get_token, Token};
///
/// let mut line = "A=5, B=6; LoadCk";
/// let (tok, text) = get_token(&mut line).unwrap();
/// assert_eq!(text, "A");
/// assert!(matches!(tok, Token::Ident(_)));
/// assert_eq!(line, "=5, B=6; LoadCk");
/// ```
pub fn get_token<'s>(line: &mut &'s str) -> Result<(Token, &'s str), LexErr> {
    let mut lx = Token::lexer(*line);
    match lx.next() {
        None => {
            *line = "";
            Ok((Token::Empty, ""))
        },
        Some(Ok(tok)) => {
            let text = lx.slice();
            *line = lx.remainder();
            Ok((tok, text))
        },
        Some(Err(LexErr::InvalidSymbol)) => {
            let c = lx.slice().chars().next().unwrap_or(' ');
            Err(LexErr::UnexpectedChar(c))
        },
        Some(Err(e)) => Err(e),
    }
}
