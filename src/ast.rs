//! Components relating to the representation of Pep/9 microcode.
//!
//! This module holds the mnemonic tables shared by the parser and the datapath:
//! - [`ControlSignal`] and [`ClockSignal`] (the signals a line of microcode asserts),
//! - [`BranchCondition`] (the tests a conditional microbranch can make),
//! - [`RegSpec`], [`StatusBit`], and [`MemoryRegister`] (the datapath state a specification can name).
//!
//! The structured form of a parsed line is found in [`code`].

pub mod code;

use std::ops::RangeInclusive;

/// The variant of the Pep/9 CPU being targeted.
///
/// This determines which signals exist and how the datapath steps.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum CpuType {
    /// A datapath with an 8-bit data bus and a single MDR.
    #[default]
    OneByteDataBus,
    /// A datapath with a 16-bit data bus and an even/odd MDR pair.
    TwoByteDataBus,
}

/// Declares a mnemonic table: a fieldless enum whose variants are listed in display order.
macro_rules! mnemonic_table {
    ($(#[$m:meta])* $name:ident { $($(#[$vm:meta])* $v:ident => $mn:literal),+ $(,)? }) => {
        $(#[$m])*
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
        pub enum $name {
            $($(#[$vm])* $v),+
        }
        impl $name {
            /// Every variant, in the order they are displayed.
            pub const ALL: &'static [$name] = &[$($name::$v),+];
            /// Number of variants.
            pub const COUNT: usize = Self::ALL.len();

            /// The mnemonic for this value.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $($name::$v => $mn),+
                }
            }

            /// The index of this value in [`Self::ALL`].
            pub fn index(self) -> usize {
                self as usize
            }
        }
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.mnemonic())
            }
        }
    };
}

mnemonic_table! {
    /// A control signal, which is held for the duration of a cycle.
    ///
    /// Most control signals carry a small decimal value (e.g., `A=5`, `ALU=1`).
    /// `MemRead` and `MemWrite` carry no value and are simply asserted.
    ControlSignal {
        #[allow(missing_docs)] MemRead  => "MemRead",
        #[allow(missing_docs)] MemWrite => "MemWrite",
        #[allow(missing_docs)] A        => "A",
        #[allow(missing_docs)] B        => "B",
        #[allow(missing_docs)] MARMux   => "MARMux",
        #[allow(missing_docs)] EOMux    => "EOMux",
        #[allow(missing_docs)] AMux     => "AMux",
        #[allow(missing_docs)] CSMux    => "CSMux",
        #[allow(missing_docs)] ALU      => "ALU",
        #[allow(missing_docs)] AndZ     => "AndZ",
        #[allow(missing_docs)] CMux     => "CMux",
        #[allow(missing_docs)] MDRMux   => "MDRMux",
        #[allow(missing_docs)] MDREMux  => "MDREMux",
        #[allow(missing_docs)] MDROMux  => "MDROMux",
        #[allow(missing_docs)] C        => "C",
        #[allow(missing_docs)] PValid   => "PValid",
    }
}
impl ControlSignal {
    /// Whether this is a memory control signal (which carries no value).
    pub fn is_mem(self) -> bool {
        matches!(self, ControlSignal::MemRead | ControlSignal::MemWrite)
    }

    /// The inclusive range of values this signal can be set to.
    pub fn range(self) -> RangeInclusive<u8> {
        match self {
            ControlSignal::A | ControlSignal::B | ControlSignal::C => 0..=31,
            ControlSignal::ALU => 0..=15,
            _ => 0..=1,
        }
    }

    /// Whether this signal exists on the given CPU.
    ///
    /// `extended` enables the signals only present with a full control section (`PValid`).
    pub fn available(self, cpu: CpuType, extended: bool) -> bool {
        match self {
            ControlSignal::MDRMux => cpu == CpuType::OneByteDataBus,
            ControlSignal::MARMux
            | ControlSignal::EOMux
            | ControlSignal::MDREMux
            | ControlSignal::MDROMux => cpu == CpuType::TwoByteDataBus,
            ControlSignal::PValid => extended,
            _ => true,
        }
    }

    /// Looks up a control signal by mnemonic (case-insensitive).
    pub fn from_mnemonic(s: &str, cpu: CpuType, extended: bool) -> Option<Self> {
        Self::ALL.iter()
            .copied()
            .filter(|sig| sig.available(cpu, extended))
            .find(|sig| sig.mnemonic().eq_ignore_ascii_case(s))
    }
}

mnemonic_table! {
    /// A clock signal, which is pulsed at the end of a cycle.
    ClockSignal {
        #[allow(missing_docs)] NCk      => "NCk",
        #[allow(missing_docs)] ZCk      => "ZCk",
        #[allow(missing_docs)] VCk      => "VCk",
        #[allow(missing_docs)] CCk      => "CCk",
        #[allow(missing_docs)] SCk      => "SCk",
        #[allow(missing_docs)] MARCk    => "MARCk",
        #[allow(missing_docs)] LoadCk   => "LoadCk",
        #[allow(missing_docs)] MDRCk    => "MDRCk",
        #[allow(missing_docs)] MDRECk   => "MDRECk",
        #[allow(missing_docs)] MDROCk   => "MDROCk",
        #[allow(missing_docs)] PValidCk => "PValidCk",
    }
}
impl ClockSignal {
    /// Whether this signal exists on the given CPU.
    pub fn available(self, cpu: CpuType, extended: bool) -> bool {
        match self {
            ClockSignal::MDRCk => cpu == CpuType::OneByteDataBus,
            ClockSignal::MDRECk | ClockSignal::MDROCk => cpu == CpuType::TwoByteDataBus,
            ClockSignal::PValidCk => extended,
            _ => true,
        }
    }

    /// Looks up a clock signal by mnemonic (case-insensitive).
    pub fn from_mnemonic(s: &str, cpu: CpuType, extended: bool) -> Option<Self> {
        Self::ALL.iter()
            .copied()
            .filter(|sig| sig.available(cpu, extended))
            .find(|sig| sig.mnemonic().eq_ignore_ascii_case(s))
    }
}

mnemonic_table! {
    /// The test made by a conditional microbranch (`if <cond> <true> else <false>`).
    BranchCondition {
        /// `!N && !Z`
        GT          => "GT",
        /// `!N`
        GE          => "GE",
        /// `Z`
        EQ          => "EQ",
        /// `!Z`
        NE          => "NE",
        /// `N || Z`
        LE          => "LE",
        /// `N`
        LT          => "LT",
        /// `V`
        VBit        => "VBit",
        /// `C`
        CBit        => "CBit",
        /// `S`
        SBit        => "SBit",
        /// Whether the prefetch buffer holds a valid byte.
        HasPrefetch => "HasPrefetch",
        /// Whether the instruction specifier is a unary instruction (or a trap).
        IsUnary     => "IsUnary",
        /// Whether the low byte of the PC is even.
        IsPCEven    => "IsPCEven",
    }
}
impl BranchCondition {
    /// Looks up a branch condition by mnemonic (case-insensitive).
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Self::ALL.iter()
            .copied()
            .find(|c| c.mnemonic().eq_ignore_ascii_case(s))
    }
}

mnemonic_table! {
    /// A register which can be named in a unit pre/postcondition (e.g., `A=0x1234`).
    RegSpec {
        /// The accumulator.
        A    => "A",
        /// The index register.
        X    => "X",
        /// The stack pointer.
        SP   => "SP",
        /// The program counter.
        PC   => "PC",
        /// The 24-bit instruction register (instruction specifier and operand specifier).
        IR   => "IR",
        /// The 8-bit temporary register.
        T1   => "T1",
        #[allow(missing_docs)] T2   => "T2",
        #[allow(missing_docs)] T3   => "T3",
        #[allow(missing_docs)] T4   => "T4",
        #[allow(missing_docs)] T5   => "T5",
        #[allow(missing_docs)] T6   => "T6",
        /// The high byte of the memory address register.
        MARA => "MARA",
        /// The low byte of the memory address register.
        MARB => "MARB",
        /// The memory data register (one-byte data bus).
        MDR  => "MDR",
        /// The even memory data register (two-byte data bus).
        MDRE => "MDRE",
        /// The odd memory data register (two-byte data bus).
        MDRO => "MDRO",
    }
}
impl RegSpec {
    /// Whether this register exists on the given CPU.
    pub fn available(self, cpu: CpuType) -> bool {
        match self {
            RegSpec::MDR => cpu == CpuType::OneByteDataBus,
            RegSpec::MDRE | RegSpec::MDRO => cpu == CpuType::TwoByteDataBus,
            _ => true,
        }
    }

    /// Looks up a register by mnemonic (case-insensitive).
    pub fn from_mnemonic(s: &str, cpu: CpuType) -> Option<Self> {
        Self::ALL.iter()
            .copied()
            .filter(|r| r.available(cpu))
            .find(|r| r.mnemonic().eq_ignore_ascii_case(s))
    }

    /// The number of hex digits that make up this register.
    pub fn hex_digits(self) -> usize {
        match self {
            RegSpec::IR => 6,
            RegSpec::T1 => 2,
            _ if self.memory_register().is_some() => 2,
            _ => 4,
        }
    }

    /// The mask of bits this register can hold.
    pub fn mask(self) -> u32 {
        (1 << (4 * self.hex_digits())) - 1
    }

    /// The largest value a `UnitPre:`/`UnitPost:` specification can assign this register.
    ///
    /// Memory registers accept a word and are truncated to a byte when applied.
    pub fn max_value(self) -> u32 {
        match self {
            RegSpec::IR => 0xFF_FFFF,
            RegSpec::T1 => 0xFF,
            _ => 0xFFFF,
        }
    }

    /// The number of hex digits of [`RegSpec::max_value`].
    pub fn max_hex_digits(self) -> usize {
        (32 - self.max_value().leading_zeros()) as usize / 4
    }

    /// The memory register this refers to (if it refers to one).
    pub fn memory_register(self) -> Option<MemoryRegister> {
        match self {
            RegSpec::MARA => Some(MemoryRegister::MARA),
            RegSpec::MARB => Some(MemoryRegister::MARB),
            RegSpec::MDR  => Some(MemoryRegister::MDR),
            RegSpec::MDRE => Some(MemoryRegister::MDRE),
            RegSpec::MDRO => Some(MemoryRegister::MDRO),
            _ => None
        }
    }
}

mnemonic_table! {
    /// A status bit.
    StatusBit {
        /// Negative.
        N => "N",
        /// Zero.
        Z => "Z",
        /// Overflow.
        V => "V",
        /// Carry.
        C => "C",
        /// Secondary carry, selectable by CSMux.
        S => "S",
    }
}
impl StatusBit {
    /// The mask of this bit within the packed status byte.
    pub fn mask(self) -> u8 {
        match self {
            StatusBit::S => 0x10,
            StatusBit::N => 0x08,
            StatusBit::Z => 0x04,
            StatusBit::V => 0x02,
            StatusBit::C => 0x01,
        }
    }

    /// Looks up a status bit by mnemonic (case-insensitive).
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Self::ALL.iter()
            .copied()
            .find(|b| b.mnemonic().eq_ignore_ascii_case(s))
    }
}

mnemonic_table! {
    /// A register sitting between the CPU and main memory.
    MemoryRegister {
        /// High byte of the memory address.
        MARA => "MARA",
        /// Low byte of the memory address.
        MARB => "MARB",
        /// Memory data register (one-byte data bus).
        MDR  => "MDR",
        /// Even memory data register (two-byte data bus).
        MDRE => "MDRE",
        /// Odd memory data register (two-byte data bus).
        MDRO => "MDRO",
    }
}

#[cfg(test)]
mod tests {
    use super::{BranchCondition, ClockSignal, ControlSignal, CpuType, RegSpec, StatusBit};

    #[test]
    fn test_control_lookup() {
        let one = CpuType::OneByteDataBus;
        let two = CpuType::TwoByteDataBus;

        assert_eq!(ControlSignal::from_mnemonic("amux", one, false), Some(ControlSignal::AMux));
        assert_eq!(ControlSignal::from_mnemonic("MEMREAD", one, false), Some(ControlSignal::MemRead));
        assert_eq!(ControlSignal::from_mnemonic("MDRMux", one, false), Some(ControlSignal::MDRMux));
        assert_eq!(ControlSignal::from_mnemonic("MDRMux", two, false), None);
        assert_eq!(ControlSignal::from_mnemonic("EOMux", two, false), Some(ControlSignal::EOMux));
        assert_eq!(ControlSignal::from_mnemonic("EOMux", one, false), None);
        assert_eq!(ControlSignal::from_mnemonic("PValid", one, false), None);
        assert_eq!(ControlSignal::from_mnemonic("PValid", one, true), Some(ControlSignal::PValid));
        assert_eq!(ControlSignal::from_mnemonic("LoadCk", one, true), None);
    }

    #[test]
    fn test_control_ranges() {
        assert_eq!(ControlSignal::A.range(), 0..=31);
        assert_eq!(ControlSignal::C.range(), 0..=31);
        assert_eq!(ControlSignal::ALU.range(), 0..=15);
        assert_eq!(ControlSignal::AMux.range(), 0..=1);
        assert_eq!(ControlSignal::MDROMux.range(), 0..=1);
        assert_eq!(ControlSignal::PValid.range(), 0..=1);
    }

    #[test]
    fn test_clock_lookup() {
        let one = CpuType::OneByteDataBus;
        let two = CpuType::TwoByteDataBus;

        assert_eq!(ClockSignal::from_mnemonic("marck", one, false), Some(ClockSignal::MARCk));
        assert_eq!(ClockSignal::from_mnemonic("MDRCk", one, false), Some(ClockSignal::MDRCk));
        assert_eq!(ClockSignal::from_mnemonic("MDRCk", two, false), None);
        assert_eq!(ClockSignal::from_mnemonic("MDROCk", two, false), Some(ClockSignal::MDROCk));
        assert_eq!(ClockSignal::from_mnemonic("PValidCk", two, true), Some(ClockSignal::PValidCk));
    }

    #[test]
    fn test_spec_tables() {
        assert_eq!(BranchCondition::from_mnemonic("ispceven"), Some(BranchCondition::IsPCEven));
        assert_eq!(BranchCondition::from_mnemonic("Foo"), None);

        assert_eq!(RegSpec::IR.max_value(), 0xFF_FFFF);
        assert_eq!(RegSpec::T1.max_value(), 0xFF);
        assert_eq!(RegSpec::A.max_value(), 0xFFFF);
        assert_eq!(RegSpec::MARA.max_value(), 0xFFFF);
        assert_eq!(RegSpec::MARA.mask(), 0xFF);
        assert_eq!(RegSpec::MDR.max_hex_digits(), 4);
        assert_eq!(RegSpec::IR.max_hex_digits(), 6);
        assert_eq!(RegSpec::from_mnemonic("mdr", CpuType::OneByteDataBus), Some(RegSpec::MDR));
        assert_eq!(RegSpec::from_mnemonic("mdr", CpuType::TwoByteDataBus), None);

        let all_masks = StatusBit::ALL.iter().fold(0, |acc, b| acc | b.mask());
        assert_eq!(all_masks, 0x1F);
    }
}
