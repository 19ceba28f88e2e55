//! Error interface for this crate.
//!
//! Every error raised by this crate (lexing, parsing, assembling, simulating)
//! implements [`Error`], which extends [`std::error::Error`] with
//! an optional source location and an optional help message.

use std::borrow::Cow;
use std::ops::Range;

pub use crate::parse::lex::LexErr;
pub use crate::parse::{ParseErr, ParseErrKind};
pub use crate::asm::{AsmErr, AsmErrKind};
pub use crate::sim::SimErr;
pub use crate::sim::data::DataErr;
pub use crate::sim::spec::SpecFailure;

/// The location in source code an error is associated with.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ErrSpan {
    /// A byte range within a single source line.
    Range(Range<usize>),
    /// A whole source line (0-indexed).
    Line(usize),
    /// A byte range within a given source line (0-indexed).
    LineRange(usize, Range<usize>),
}
impl From<Range<usize>> for ErrSpan {
    fn from(value: Range<usize>) -> Self {
        ErrSpan::Range(value)
    }
}
impl From<usize> for ErrSpan {
    fn from(value: usize) -> Self {
        ErrSpan::Line(value)
    }
}
impl ErrSpan {
    /// The line this span refers to, if known.
    pub fn line(&self) -> Option<usize> {
        match self {
            ErrSpan::Range(_) => None,
            ErrSpan::Line(l) | ErrSpan::LineRange(l, _) => Some(*l),
        }
    }

    /// Attaches a line number to this span.
    pub fn with_line(self, line: usize) -> Self {
        match self {
            ErrSpan::Range(r) | ErrSpan::LineRange(_, r) => ErrSpan::LineRange(line, r),
            ErrSpan::Line(_) => ErrSpan::Line(line),
        }
    }
}

/// Common interface for errors raised by this crate.
pub trait Error: std::error::Error {
    /// The span in source associated with this error, if there is one.
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A hint describing how to resolve this error, if there is one.
    fn help(&self) -> Option<Cow<str>>;
}
