//! The arithmetic logic unit.
//!
//! The ALU is purely combinational: [`evaluate`] computes its output
//! from the selected function, the A and B inputs, and the carry in.

use crate::ast::StatusBit;

/// A function the ALU can compute, selected by the `ALU` control signal.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AluFunction {
    /// `A`
    A,
    /// `A plus B`
    APlusB,
    /// `A plus B plus Cin`
    APlusBPlusCin,
    /// `A plus ~B plus 1`
    APlusNotBPlus1,
    /// `A plus ~B plus Cin`
    APlusNotBPlusCin,
    /// `A and B`
    AAndB,
    /// `~(A and B)`
    ANandB,
    /// `A or B`
    AOrB,
    /// `~(A or B)`
    ANorB,
    /// `A xor B`
    AXorB,
    /// `~A`
    NotA,
    /// `ASL A`
    AslA,
    /// `ROL A`
    RolA,
    /// `ASR A`
    AsrA,
    /// `ROR A`
    RorA,
    /// `0`, moving A into the NZVC bits.
    NzvcA,
}
impl AluFunction {
    const ALL: [AluFunction; 16] = [
        AluFunction::A,
        AluFunction::APlusB,
        AluFunction::APlusBPlusCin,
        AluFunction::APlusNotBPlus1,
        AluFunction::APlusNotBPlusCin,
        AluFunction::AAndB,
        AluFunction::ANandB,
        AluFunction::AOrB,
        AluFunction::ANorB,
        AluFunction::AXorB,
        AluFunction::NotA,
        AluFunction::AslA,
        AluFunction::RolA,
        AluFunction::AsrA,
        AluFunction::RorA,
        AluFunction::NzvcA,
    ];

    /// Gets the function for a value of the `ALU` control signal.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Whether this function only uses the A input.
    pub fn is_unary(self) -> bool {
        matches!(self,
            AluFunction::A
            | AluFunction::NotA
            | AluFunction::AslA
            | AluFunction::RolA
            | AluFunction::AsrA
            | AluFunction::RorA
            | AluFunction::NzvcA
        )
    }

    /// Whether this function uses the carry in.
    pub fn uses_carry(self) -> bool {
        matches!(self,
            AluFunction::APlusBPlusCin
            | AluFunction::APlusNotBPlusCin
            | AluFunction::RolA
            | AluFunction::RorA
        )
    }

    /// A short description of this function.
    pub fn description(self) -> &'static str {
        match self {
            AluFunction::A                => "A",
            AluFunction::APlusB           => "A plus B",
            AluFunction::APlusBPlusCin    => "A plus B plus Cin",
            AluFunction::APlusNotBPlus1   => "A plus ~B plus 1",
            AluFunction::APlusNotBPlusCin => "A plus ~B plus Cin",
            AluFunction::AAndB            => "A and B",
            AluFunction::ANandB           => "~(A and B)",
            AluFunction::AOrB             => "A + B",
            AluFunction::ANorB            => "~(A + B)",
            AluFunction::AXorB            => "A xor B",
            AluFunction::NotA             => "~A",
            AluFunction::AslA             => "ASL A",
            AluFunction::RolA             => "ROL A",
            AluFunction::AsrA             => "ASR A",
            AluFunction::RorA             => "ROR A",
            AluFunction::NzvcA            => "0",
        }
    }
}
impl std::fmt::Display for AluFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// The output of the ALU.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct AluOutput {
    /// The result byte.
    pub result: u8,
    /// The computed status bits, packed as `NZVC` (see [`StatusBit::mask`]).
    pub nzvc: u8,
}
impl AluOutput {
    /// Whether the given status bit was computed as set.
    pub fn bit(&self, bit: StatusBit) -> bool {
        self.nzvc & bit.mask() != 0
    }
}

const N: u8 = 0x08;
const Z: u8 = 0x04;
const V: u8 = 0x02;
const C: u8 = 0x01;

/// Adds with carry, computing the result, carry out, and signed overflow.
fn add(a: u8, b: u8, cin: bool) -> (u8, u8) {
    let wide = u16::from(a) + u16::from(b) + u16::from(cin);
    let [carry, res] = wide.to_be_bytes();

    let mut nzvc = 0;
    if carry != 0 { nzvc |= C };
    // overflow iff the operands share a sign which differs from the result's
    if (!(a ^ b) & (a ^ res)) & 0x80 != 0 { nzvc |= V };
    (res, nzvc)
}

/// Evaluates the ALU.
///
/// `a` is the output of the AMux, `b` is the B bus, and `cin` is the output of the CSMux
/// (each is `None` if not driven).
///
/// This returns `None` if the ALU has no meaningful output, which occurs when:
/// - `func` is not a valid function,
/// - A is not driven (or B is not driven for a binary function),
/// - the function requires a carry in which is not driven.
pub fn evaluate(func: Option<u8>, a: Option<u8>, b: Option<u8>, cin: Option<bool>) -> Option<AluOutput> {
    let func = AluFunction::from_code(func?)?;
    let a = a?;
    let b = match func.is_unary() {
        true  => b.unwrap_or(0),
        false => b?,
    };

    let (result, mut nzvc) = match func {
        AluFunction::A                => (a, 0),
        AluFunction::APlusB           => add(a, b, false),
        AluFunction::APlusBPlusCin    => add(a, b, cin?),
        AluFunction::APlusNotBPlus1   => add(a, !b, true),
        AluFunction::APlusNotBPlusCin => add(a, !b, cin?),
        AluFunction::AAndB            => (a & b, 0),
        AluFunction::ANandB           => (!(a & b), 0),
        AluFunction::AOrB             => (a | b, 0),
        AluFunction::ANorB            => (!(a | b), 0),
        AluFunction::AXorB            => (a ^ b, 0),
        AluFunction::NotA             => (!a, 0),
        AluFunction::AslA | AluFunction::RolA => {
            let shift_in = match func {
                AluFunction::RolA => u8::from(cin?),
                _ => 0
            };
            let mut nzvc = 0;
            if a & 0x80 != 0 { nzvc |= C };
            if ((a << 1) ^ a) & 0x80 != 0 { nzvc |= V };
            ((a << 1) | shift_in, nzvc)
        },
        AluFunction::AsrA | AluFunction::RorA => {
            let shift_in = match func {
                AluFunction::AsrA => a & 0x80,
                _ => u8::from(cin?) << 7
            };
            let nzvc = if a & 1 != 0 { C } else { 0 };
            ((a >> 1) | shift_in, nzvc)
        },
        // N/Z are taken from A rather than computed.
        AluFunction::NzvcA => return Some(AluOutput { result: 0, nzvc: a & (N | Z | V | C) }),
    };

    if result & 0x80 != 0 { nzvc |= N };
    if result == 0 { nzvc |= Z };
    Some(AluOutput { result, nzvc })
}
