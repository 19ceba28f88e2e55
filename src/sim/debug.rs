//! Utilities to debug simulation.
//!
//! The key type here is [`Breakpoint`], which can be added to the [`Simulator`]'s
//! breakpoint set to cause the simulator to break.
use std::fmt::Write;

use crate::ast::RegSpec;

use super::mem::MemoryDevice;
use super::Simulator;

/// Common breakpoints.
#[derive(PartialEq, Eq, Hash)]
pub enum Breakpoint {
    /// Break when an instruction is about to start with the PC equal to the given value.
    Addr(u16),

    /// Break when the microprogram counter is equal to the given line.
    Micro(usize),

    /// Break when the provided register is set to a given value.
    Reg {
        /// Register to check.
        reg: RegSpec,
        /// Predicate to break against.
        value: Comparator
    },
    /// Break when the provided memory address holds a given value.
    Mem {
        /// Address to check.
        addr: u16,
        /// Predicate to break against.
        value: Comparator
    },
}

impl Breakpoint where Breakpoint: Send + Sync { /* assert Breakpoint is send/sync */ }

impl Breakpoint {
    /// Checks if a break should occur.
    pub fn check(&self, sim: &Simulator) -> bool {
        match self {
            Breakpoint::Addr(expected) => sim.at_instruction_start() && *expected == sim.pc(),
            Breakpoint::Micro(expected) => *expected == sim.upc(),
            Breakpoint::Reg { reg, value: cmp } => cmp.check(sim.data.reg(*reg)),
            Breakpoint::Mem { addr, value: cmp } => cmp.check(u32::from(sim.mem.peek_byte(*addr))), // do not consume input
        }
    }

    fn fmt_bp(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Addr(expected) => {
                write!(f, "PC == 0x{expected:04X}")?;
            },
            Self::Micro(expected) => {
                write!(f, "µPC == {expected}")?;
            },
            Self::Reg { reg, value } => {
                write!(f, "{reg} ")?;
                value.fmt_cmp(f)?;
            },
            Self::Mem { addr, value } => {
                write!(f, "Mem[0x{addr:04X}] ")?;
                value.fmt_cmp(f)?;
            },
        }
        Ok(())
    }
}
impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Breakpoint(")?;
        self.fmt_bp(f)?;
        f.write_char(')')
    }
}
/// Predicate checking whether the current value is equal to the value.
#[derive(PartialEq, Eq, Hash, Debug)]
pub enum Comparator {
    /// Never breaks.
    Never,
    /// Break if the desired value is less than the provided value.
    Lt(u32),
    /// Break if the desired value is equal to the provided value.
    Eq(u32),
    /// Break if the desired value is less than or equal to the provided value.
    Le(u32),
    /// Break if the desired value is greater than the provided value.
    Gt(u32),
    /// Break if the desired value is not equal to the provided value.
    Ne(u32),
    /// Break if the desired value is greater than or equal to the provided value.
    Ge(u32),
    /// Always breaks.
    Always
}
impl Comparator {
    /// Checks if the operand passes the comparator.
    pub fn check(&self, operand: u32) -> bool {
        match *self {
            Comparator::Never  => false,
            Comparator::Lt(r)  => operand < r,
            Comparator::Eq(r)  => operand == r,
            Comparator::Le(r)  => operand <= r,
            Comparator::Gt(r)  => operand > r,
            Comparator::Ne(r)  => operand != r,
            Comparator::Ge(r)  => operand >= r,
            Comparator::Always => true,
        }
    }

    fn fmt_cmp(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Never  => f.write_str("never"),
            Comparator::Lt(r)  => write!(f, "< 0x{r:X}"),
            Comparator::Eq(r)  => write!(f, "== 0x{r:X}"),
            Comparator::Le(r)  => write!(f, "<= 0x{r:X}"),
            Comparator::Gt(r)  => write!(f, "> 0x{r:X}"),
            Comparator::Ne(r)  => write!(f, "!= 0x{r:X}"),
            Comparator::Ge(r)  => write!(f, ">= 0x{r:X}"),
            Comparator::Always => f.write_str("always"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::RegSpec;

    use super::{Breakpoint, Comparator};

    #[test]
    fn test_comparator() {
        assert!(Comparator::Lt(5).check(4));
        assert!(!Comparator::Lt(5).check(5));
        assert!(Comparator::Ge(5).check(5));
        assert!(Comparator::Ne(5).check(6));
        assert!(Comparator::Always.check(0));
        assert!(!Comparator::Never.check(0));
    }

    #[test]
    fn test_fmt() {
        let bp = Breakpoint::Reg { reg: RegSpec::A, value: Comparator::Eq(0x12) };
        assert_eq!(format!("{bp:?}"), "Breakpoint(A == 0x12)");
        assert_eq!(format!("{:?}", Breakpoint::Addr(0x10)), "Breakpoint(PC == 0x0010)");
        assert_eq!(format!("{:?}", Breakpoint::Micro(3)), "Breakpoint(µPC == 3)");
    }
}
