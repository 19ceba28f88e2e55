//! Applying and checking unit test specifications.
//!
//! A [`Specification`] on a `UnitPre:` line is applied to the datapath before a run,
//! and a [`Specification`] on a `UnitPost:` line is checked after one.

use crate::ast::code::Specification;

use super::data::DataSection;
use super::mem::MemoryDevice;

/// A postcondition which did not hold.
///
/// This is not a crash. The caller decides whether it fails a test run.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct SpecFailure {
    /// The specification which failed.
    pub spec: Specification,
    /// The value actually found.
    pub actual: u32,
}
impl std::fmt::Display for SpecFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.spec {
            Specification::Mem { addr, .. } => write!(f, "// ERROR: Unit test failed for byte Mem[0x{addr:04X}]."),
            Specification::Reg { reg, .. } => match reg.memory_register() {
                Some(mreg) => write!(f, "// ERROR: Unit test failed for {mreg}."),
                None => write!(f, "// ERROR: Unit test failed for register {reg}."),
            },
            Specification::Status { bit, .. } => write!(f, "// ERROR: Unit test failed for status bit {bit}."),
        }
    }
}
impl std::error::Error for SpecFailure {}
impl crate::err::Error for SpecFailure {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        let (expected, digits) = match self.spec {
            Specification::Mem { value, width, .. } => (u32::from(value), 2 * usize::from(width)),
            Specification::Reg { reg, value } => (value, reg.hex_digits()),
            Specification::Status { value, .. } => return Some(format!("expected {}, found {}", u8::from(value), self.actual).into()),
        };
        Some(format!("expected 0x{expected:0digits$X}, found 0x{:0digits$X}", self.actual).into())
    }
}

/// Addresses covered by a memory specification, in big-endian order.
fn mem_addrs(addr: u16, width: u8) -> impl Iterator<Item=u16> {
    (0..u16::from(width.max(1))).map(move |i| addr.wrapping_add(i))
}

impl Specification {
    /// Sets the state this specification describes.
    pub fn apply<M: MemoryDevice + ?Sized>(&self, data: &mut DataSection, mem: &mut M) {
        match *self {
            Specification::Mem { addr, value, width } => {
                let bytes = value.to_be_bytes();
                let bytes = &bytes[(2 - usize::from(width.clamp(1, 2)))..];
                for (a, &b) in mem_addrs(addr, width).zip(bytes) {
                    mem.poke_byte(a, b);
                }
            },
            Specification::Reg { reg, value } => data.set_reg(reg, value),
            Specification::Status { bit, value } => data.set_status(bit, value),
        }
    }

    /// Reads the current value of the state this specification describes.
    pub fn actual<M: MemoryDevice + ?Sized>(&self, data: &DataSection, mem: &M) -> u32 {
        match *self {
            Specification::Mem { addr, width, .. } => mem_addrs(addr, width)
                .fold(0, |acc, a| (acc << 8) | u32::from(mem.peek_byte(a))),
            Specification::Reg { reg, .. } => data.reg(reg),
            Specification::Status { bit, .. } => u32::from(data.status(bit)),
        }
    }

    /// Checks whether the state matches this specification.
    pub fn check<M: MemoryDevice + ?Sized>(&self, data: &DataSection, mem: &M) -> Result<(), SpecFailure> {
        let expected = match *self {
            Specification::Mem { value, .. } => u32::from(value),
            // Memory registers only keep the low byte
            Specification::Reg { reg, value } => value & reg.mask(),
            Specification::Status { value, .. } => u32::from(value),
        };
        let actual = self.actual(data, mem);

        match actual == expected {
            true  => Ok(()),
            false => Err(SpecFailure { spec: *self, actual }),
        }
    }
}
