//! Decoding of Pep/9 instruction specifiers.
//!
//! The control section's `DecodeInstrSpec` and `DecodeAddrMode` branches
//! jump on the instruction specifier held in the IR.
//! This module maps each of the 256 instruction specifiers to its [`Mnemonic`] and [`AddrMode`],
//! and maps each of those to the microcode symbol its handler is labelled with.

/// A Pep/9 instruction mnemonic.
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Mnemonic {
    STOP, RET, RETTR, MOVSPA, MOVFLGA, MOVAFLG,
    NOTA, NOTX, NEGA, NEGX, ASLA, ASLX, ASRA, ASRX, ROLA, ROLX, RORA, RORX,
    BR, BRLE, BRLT, BREQ, BRNE, BRGE, BRGT, BRV, BRC, CALL,
    NOP0, NOP1, NOP, DECI, DECO, HEXO, STRO,
    ADDSP, SUBSP, ADDA, ADDX, SUBA, SUBX, ANDA, ANDX, ORA, ORX,
    CPWA, CPWX, CPBA, CPBX, LDWA, LDWX, LDBA, LDBX, STWA, STWX, STBA, STBX,
}
impl Mnemonic {
    /// Whether this instruction has no operand specifier.
    pub fn is_unary(self) -> bool {
        use Mnemonic::*;
        matches!(self,
            STOP | RET | RETTR | MOVSPA | MOVFLGA | MOVAFLG
            | NOTA | NOTX | NEGA | NEGX | ASLA | ASLX | ASRA | ASRX
            | ROLA | ROLX | RORA | RORX
        )
    }

    /// Whether this instruction is a trap (handled by the operating system).
    pub fn is_trap(self) -> bool {
        use Mnemonic::*;
        matches!(self, NOP0 | NOP1 | NOP | DECI | DECO | HEXO | STRO)
    }

    /// Whether this instruction enters a subroutine (or trap handler).
    pub fn is_call(self) -> bool {
        self == Mnemonic::CALL || self.is_trap()
    }

    /// Whether this instruction returns from a subroutine (or trap handler).
    pub fn is_return(self) -> bool {
        matches!(self, Mnemonic::RET | Mnemonic::RETTR)
    }

    /// The symbol which labels the microcode handler for this instruction.
    pub fn symbol(self) -> &'static str {
        use Mnemonic::*;
        match self {
            STOP => "stop", RET => "ret", RETTR => "rettr",
            MOVSPA => "movspa", MOVFLGA => "movflga", MOVAFLG => "movaflg",
            NOTA => "nota", NOTX => "notx", NEGA => "nega", NEGX => "negx",
            ASLA => "asla", ASLX => "aslx", ASRA => "asra", ASRX => "asrx",
            ROLA => "rola", ROLX => "rolx", RORA => "rora", RORX => "rorx",
            BR => "br", BRLE => "brle", BRLT => "brlt", BREQ => "breq", BRNE => "brne",
            BRGE => "brge", BRGT => "brgt", BRV => "brv", BRC => "brc", CALL => "call",
            // Traps are labelled by the opcode they are dispatched from
            NOP0 => "nop0", NOP1 => "opcode27", NOP => "opcode28",
            DECI => "opcode30", DECO => "opcode38", HEXO => "opcode40", STRO => "opcode48",
            ADDSP => "addsp", SUBSP => "subsp", ADDA => "adda", ADDX => "addx",
            SUBA => "suba", SUBX => "subx", ANDA => "anda", ANDX => "andx",
            ORA => "ora", ORX => "orx", CPWA => "cpwa", CPWX => "cpwx",
            CPBA => "cpba", CPBX => "cpbx", LDWA => "ldwa", LDWX => "ldwx",
            LDBA => "ldba", LDBX => "ldbx", STWA => "stwa", STWX => "stwx",
            STBA => "stba", STBX => "stbx",
        }
    }
}
impl std::fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A Pep/9 addressing mode.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AddrMode {
    /// No operand (unary instructions and traps).
    None,
    /// Immediate.
    I,
    /// Direct.
    D,
    /// Indirect.
    N,
    /// Stack-relative.
    S,
    /// Stack-relative deferred.
    SF,
    /// Indexed.
    X,
    /// Stack-indexed.
    SX,
    /// Stack-deferred indexed.
    SFX,
}
impl AddrMode {
    const AAA: [AddrMode; 8] = [AddrMode::I, AddrMode::D, AddrMode::N, AddrMode::S, AddrMode::SF, AddrMode::X, AddrMode::SX, AddrMode::SFX];

    /// The symbol which labels the microcode handler for this addressing mode.
    pub fn symbol(self) -> &'static str {
        match self {
            AddrMode::None => "stop",
            AddrMode::I    => "iAddr",
            AddrMode::D    => "dAddr",
            AddrMode::N    => "nAddr",
            AddrMode::S    => "sAddr",
            AddrMode::SF   => "sfAddr",
            AddrMode::X    => "xAddr",
            AddrMode::SX   => "sxAddr",
            AddrMode::SFX  => "sfxAddr",
        }
    }
}

/// Decodes an instruction specifier into its mnemonic and addressing mode.
pub fn decode(spec: u8) -> (Mnemonic, AddrMode) {
    use Mnemonic::*;

    const UNARY: [Mnemonic; 18] = [
        STOP, RET, RETTR, MOVSPA, MOVFLGA, MOVAFLG,
        NOTA, NOTX, NEGA, NEGX, ASLA, ASLX, ASRA, ASRX, ROLA, ROLX, RORA, RORX,
    ];
    // 'a' field: immediate or indexed
    const BRANCH: [Mnemonic; 10] = [BR, BRLE, BRLT, BREQ, BRNE, BRGE, BRGT, BRV, BRC, CALL];
    // 'aaa' field
    const NONUNARY: [Mnemonic; 22] = [
        ADDSP, SUBSP, ADDA, ADDX, SUBA, SUBX, ANDA, ANDX, ORA, ORX,
        CPWA, CPWX, CPBA, CPBX, LDWA, LDWX, LDBA, LDBX, STWA, STWX, STBA, STBX,
    ];

    let s = usize::from(spec);
    match spec {
        0..=17  => (UNARY[s], AddrMode::None),
        18..=37 => {
            let mode = if spec % 2 == 0 { AddrMode::I } else { AddrMode::X };
            (BRANCH[(s - 18) / 2], mode)
        },
        38      => (NOP0, AddrMode::None),
        39      => (NOP1, AddrMode::None),
        40..=47 => (NOP, AddrMode::None),
        48..=55 => (DECI, AddrMode::None),
        56..=63 => (DECO, AddrMode::None),
        64..=71 => (HEXO, AddrMode::None),
        72..=79 => (STRO, AddrMode::None),
        80..=255 => (NONUNARY[(s - 80) / 8], AddrMode::AAA[s % 8]),
    }
}

/// Whether the instruction specifier does not read an operand specifier
/// (it is unary or a trap).
pub fn is_unary_or_trap(spec: u8) -> bool {
    let (mn, _) = decode(spec);
    mn.is_unary() || mn.is_trap()
}

#[cfg(test)]
mod tests {
    use super::{decode, is_unary_or_trap, AddrMode, Mnemonic};

    #[test]
    fn test_decode() {
        assert_eq!(decode(0), (Mnemonic::STOP, AddrMode::None));
        assert_eq!(decode(17), (Mnemonic::RORX, AddrMode::None));
        assert_eq!(decode(18), (Mnemonic::BR, AddrMode::I));
        assert_eq!(decode(19), (Mnemonic::BR, AddrMode::X));
        assert_eq!(decode(37), (Mnemonic::CALL, AddrMode::X));
        assert_eq!(decode(39), (Mnemonic::NOP1, AddrMode::None));
        assert_eq!(decode(79), (Mnemonic::STRO, AddrMode::None));
        assert_eq!(decode(80), (Mnemonic::ADDSP, AddrMode::I));
        assert_eq!(decode(0xC1), (Mnemonic::LDWA, AddrMode::D));
        assert_eq!(decode(0xFF), (Mnemonic::STBX, AddrMode::SFX));
    }

    #[test]
    fn test_unary() {
        let unary = (0..=255u8).filter(|&s| is_unary_or_trap(s)).count();
        assert_eq!(unary, 80);
        assert!(!is_unary_or_trap(0x12));
        assert!(is_unary_or_trap(0x30));
    }

    #[test]
    fn test_symbols() {
        assert_eq!(decode(0xC0).0.symbol(), "ldwa");
        assert_eq!(decode(40).0.symbol(), "opcode28");
        assert_eq!(decode(0xC0).1.symbol(), "iAddr");
        assert_eq!(decode(0x05).1.symbol(), "stop");
        assert!(Mnemonic::DECO.is_call());
        assert!(Mnemonic::RETTR.is_return());
        assert!(!Mnemonic::BR.is_call());
    }
}
