//! The datapath of the Pep/9 CPU.
//!
//! The [`DataSection`] holds every piece of datapath state
//! (the register bank, the memory registers, the status bits, and the main bus state)
//! along with the control and clock signals currently asserted on it.
//!
//! Each clock cycle is performed by [`DataSection::step`], which applies the asserted signals
//! in a fixed order:
//! 1. The main bus handshake advances (see [`MainBusState`]).
//! 2. If a write is ready, it is committed to memory.
//! 3. `MARCk`, then `LoadCk`, then the memory data register clocks (`MDRCk` or `MDRECk`/`MDROCk`).
//! 4. The status bit clocks (`NCk`, `ZCk`, `VCk`, `CCk`, `SCk`).
//!
//! A cycle stops applying signals at the first error,
//! so the datapath reflects exactly the signals applied before the failure.

use crate::ast::code::MicroCode;
use crate::ast::{ClockSignal, ControlSignal, CpuType, MemoryRegister, RegSpec, StatusBit};

use super::alu::{self, AluOutput};
use super::mem::{MemErr, MemoryDevice};
use super::observer::{AccessSet, ChangeObserver};

/// The number of byte registers in the register bank.
pub const REG_COUNT: usize = 32;
/// Index of the first read-only register.
pub const FIRST_STATIC_REG: u8 = 22;
/// The values of the read-only registers 22 to 31.
pub const STATIC_REGS: [u8; 10] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x08, 0xF0, 0xF6, 0xFE, 0xFF];

/// Register bank index of the instruction specifier.
pub const IS_REG: u8 = 8;
/// Register bank index of the (high byte of the) program counter.
pub const PC_REG: u8 = 6;

/// The state of the handshake between the CPU and main memory.
///
/// A read or write completes after its signal is held for three consecutive cycles
/// with the memory address register unchanged:
/// `None -> FirstWait -> SecondWait -> Ready`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum MainBusState {
    /// No memory access is in progress.
    #[default]
    None,
    /// `MemRead` was asserted for one cycle.
    MemReadFirstWait,
    /// `MemRead` was asserted for two cycles.
    MemReadSecondWait,
    /// The data bus holds the value read from memory.
    MemReadReady,
    /// `MemWrite` was asserted for one cycle.
    MemWriteFirstWait,
    /// `MemWrite` was asserted for two cycles.
    MemWriteSecondWait,
    /// The value in the memory data register(s) is written to memory this cycle.
    MemWriteReady,
}
impl MainBusState {
    /// Computes the next bus state.
    ///
    /// `mar_changed` is whether the memory address register is clocked to a new address this cycle.
    /// An address change never lets an access progress past its first wait.
    pub fn next(self, mar_changed: bool, read: bool, write: bool) -> Self {
        use MainBusState::*;

        match self {
            None => match (mar_changed, read, write) {
                (true, _, _)  => None,
                (_, true, _)  => MemReadFirstWait,
                (_, _, true)  => MemWriteFirstWait,
                _ => None
            },
            MemReadFirstWait | MemReadSecondWait => match (read, write) {
                (true, _) if mar_changed => MemReadFirstWait,
                (true, _) if self == MemReadFirstWait => MemReadSecondWait,
                (true, _) => MemReadReady,
                (_, true) => MemWriteFirstWait,
                _ => None
            },
            MemWriteFirstWait | MemWriteSecondWait => match (read, write) {
                (_, true) if mar_changed => MemWriteFirstWait,
                (_, true) if self == MemWriteFirstWait => MemWriteSecondWait,
                (_, true) => MemWriteReady,
                (true, _) => MemReadFirstWait,
                _ => None
            },
            MemReadReady | MemWriteReady => match (read, write) {
                (true, _) => MemReadFirstWait,
                (_, true) => MemWriteFirstWait,
                _ => None
            },
        }
    }
}

/// Errors raised while stepping the datapath.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum DataErr {
    /// `MARCk` was pulsed without values on both the A and B buses.
    MarNoValue,
    /// `MARCk` was pulsed without an output from the MARMux.
    MarMuxNoOutput,
    /// `LoadCk` was pulsed without `C` set.
    LoadNoDest,
    /// `LoadCk` was pulsed with no value on the C bus.
    LoadNoValue,
    /// A memory data register was clocked from memory, but no read had completed.
    MdrNoBusValue(MemoryRegister),
    /// A memory data register was clocked from the C bus, but the C bus had no value.
    MdrNoCValue(MemoryRegister),
    /// A memory data register was clocked without its mux set.
    MdrNoMux(MemoryRegister),
    /// A status bit was clocked, but the ALU had no output (or `AndZ` was not set for `ZCk`).
    StatusNoAlu,
    /// Memory could not complete an access.
    ///
    /// If this is [`MemErr::WouldBlock`], the cycle had no effect and can be retried.
    Memory(MemErr),
}
impl DataErr {
    /// Whether this error is memory waiting on input
    /// (in which case the cycle had no effect).
    pub fn is_blocking(&self) -> bool {
        matches!(self, DataErr::Memory(MemErr::WouldBlock { .. }))
    }
}
impl std::fmt::Display for DataErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataErr::MarNoValue       => f.write_str("No values on A & B during MARCk."),
            DataErr::MarMuxNoOutput   => f.write_str("MARMux has no output but MARCk."),
            DataErr::LoadNoDest       => f.write_str("No destination register specified for LoadCk."),
            DataErr::LoadNoValue      => f.write_str("No value on C Bus to clock in."),
            DataErr::MdrNoBusValue(r) => write!(f, "No value from data bus to write to {r}."),
            DataErr::MdrNoCValue(r)   => write!(f, "No value on C bus to write to {r}."),
            DataErr::MdrNoMux(r)      => write!(f, "No value to clock into {r}."),
            DataErr::StatusNoAlu      => f.write_str("ALU Error: No output from ALU to clock into status bits."),
            DataErr::Memory(e)        => std::fmt::Display::fmt(e, f),
        }
    }
}
impl std::error::Error for DataErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataErr::Memory(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for DataErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            DataErr::MarNoValue       => Some("set both A and B when pulsing MARCk".into()),
            DataErr::MarMuxNoOutput   => Some("set MARMux (and A and B if MARMux=1) when pulsing MARCk".into()),
            DataErr::LoadNoDest       => Some("set C to the register to load into".into()),
            DataErr::LoadNoValue      => Some("set CMux, and if CMux=1, make sure the ALU has an output".into()),
            DataErr::MdrNoBusValue(_) => Some("assert MemRead for three consecutive cycles before clocking from memory".into()),
            DataErr::MdrNoCValue(_)   => Some("make sure CMux is set and the C bus has a value".into()),
            DataErr::MdrNoMux(r)      => Some(format!("set {r}Mux when pulsing {r}Ck").into()),
            DataErr::StatusNoAlu      => Some("make sure the ALU function has all of its inputs (and set AndZ when pulsing ZCk)".into()),
            DataErr::Memory(e)        => crate::err::Error::help(e),
        }
    }
}

/// The datapath.
#[derive(Debug, Clone)]
pub struct DataSection {
    cpu_type: CpuType,
    regs: [u8; REG_COUNT],
    mem_regs: [u8; MemoryRegister::COUNT],
    status: u8,
    controls: [Option<u8>; ControlSignal::COUNT],
    clocks: [bool; ClockSignal::COUNT],
    bus_state: MainBusState,
    error: Option<DataErr>,

    /// Tracks changes made to the datapath.
    pub observer: ChangeObserver,
}
impl DataSection {
    /// Creates a cleared datapath for the given CPU.
    pub fn new(cpu_type: CpuType) -> Self {
        let mut data = Self {
            cpu_type,
            regs: [0; REG_COUNT],
            mem_regs: [0; MemoryRegister::COUNT],
            status: 0,
            controls: [None; ControlSignal::COUNT],
            clocks: [false; ClockSignal::COUNT],
            bus_state: MainBusState::None,
            error: None,
            observer: ChangeObserver::new(),
        };
        data.clear_registers();
        data
    }

    /// The CPU this datapath models.
    pub fn cpu_type(&self) -> CpuType {
        self.cpu_type
    }

    // ------------------ SIGNALS ------------------

    /// The value of a control signal (`None` if not driven).
    pub fn control(&self, sig: ControlSignal) -> Option<u8> {
        self.controls[sig.index()]
    }
    /// Drives (or releases) a control signal.
    pub fn set_control(&mut self, sig: ControlSignal, value: Option<u8>) {
        self.controls[sig.index()] = value;
    }
    /// Whether a clock signal is pulsed.
    pub fn clock(&self, sig: ClockSignal) -> bool {
        self.clocks[sig.index()]
    }
    /// Sets a clock signal.
    pub fn set_clock(&mut self, sig: ClockSignal, value: bool) {
        self.clocks[sig.index()] = value;
    }
    fn asserted(&self, sig: ControlSignal) -> bool {
        self.control(sig).is_some()
    }

    /// Copies the signals of a microcode line onto the datapath,
    /// returning whether any signal changed.
    pub fn set_signals(&mut self, mc: &MicroCode) -> bool {
        let changed = &self.controls != mc.control_vector() || &self.clocks != mc.clock_vector();
        self.controls = *mc.control_vector();
        self.clocks = *mc.clock_vector();
        changed
    }

    /// Releases all control signals and lowers all clock signals.
    pub fn clear_signals(&mut self) {
        self.controls = [None; ControlSignal::COUNT];
        self.clocks = [false; ClockSignal::COUNT];
    }

    // ------------------ REGISTERS ------------------

    /// Reads a byte from the register bank.
    ///
    /// Indices past the end of the bank read as 0.
    pub fn reg_byte(&self, reg: u8) -> u8 {
        self.regs.get(usize::from(reg)).copied().unwrap_or(0)
    }
    /// Reads a big-endian word from the register bank, starting at the given byte.
    pub fn reg_word(&self, reg: u8) -> u16 {
        u16::from_be_bytes([self.reg_byte(reg), self.reg_byte(reg.wrapping_add(1))])
    }
    /// Writes a byte to the register bank.
    ///
    /// Writes to the read-only registers (22 to 31) are ignored.
    pub fn set_reg_byte(&mut self, reg: u8, value: u8) {
        if reg >= FIRST_STATIC_REG { return };

        let slot = &mut self.regs[usize::from(reg)];
        if *slot != value {
            *slot = value;
            self.observer.set_reg_changed(reg);
        }
    }
    /// Writes a big-endian word to the register bank, starting at the given byte.
    ///
    /// The write is ignored if either byte is read-only.
    pub fn set_reg_word(&mut self, reg: u8, value: u16) {
        if reg.saturating_add(1) >= FIRST_STATIC_REG { return };

        let [hi, lo] = value.to_be_bytes();
        self.set_reg_byte(reg, hi);
        self.set_reg_byte(reg + 1, lo);
    }

    /// Reads a named register.
    pub fn reg(&self, reg: RegSpec) -> u32 {
        if let Some(mreg) = reg.memory_register() {
            return u32::from(self.mem_reg(mreg));
        }
        match reg {
            RegSpec::IR => u32::from_be_bytes([0, self.reg_byte(IS_REG), self.reg_byte(9), self.reg_byte(10)]),
            RegSpec::T1 => u32::from(self.reg_byte(11)),
            _ => u32::from(self.reg_word(word_reg_index(reg)))
        }
    }
    /// Writes a named register.
    ///
    /// The value is truncated to the size of the register.
    pub fn set_reg(&mut self, reg: RegSpec, value: u32) {
        let [_, b2, b1, b0] = value.to_be_bytes();
        if let Some(mreg) = reg.memory_register() {
            return self.set_mem_reg(mreg, b0);
        }
        match reg {
            RegSpec::IR => {
                self.set_reg_byte(IS_REG, b2);
                self.set_reg_word(9, u16::from_be_bytes([b1, b0]));
            },
            RegSpec::T1 => self.set_reg_byte(11, b0),
            _ => self.set_reg_word(word_reg_index(reg), u16::from_be_bytes([b1, b0]))
        }
    }

    /// Reads a memory register.
    pub fn mem_reg(&self, reg: MemoryRegister) -> u8 {
        self.mem_regs[reg.index()]
    }
    /// Writes a memory register.
    pub fn set_mem_reg(&mut self, reg: MemoryRegister, value: u8) {
        let slot = &mut self.mem_regs[reg.index()];
        if *slot != value {
            *slot = value;
            self.observer.set_mem_reg_changed(reg);
        }
    }
    /// The address held in the memory address register.
    pub fn mar(&self) -> u16 {
        u16::from_be_bytes([self.mem_reg(MemoryRegister::MARA), self.mem_reg(MemoryRegister::MARB)])
    }

    /// The packed status bits (see [`StatusBit::mask`]).
    pub fn status_bits(&self) -> u8 {
        self.status
    }
    /// Reads a status bit.
    pub fn status(&self, bit: StatusBit) -> bool {
        self.status & bit.mask() != 0
    }
    /// Writes a status bit.
    pub fn set_status(&mut self, bit: StatusBit, value: bool) {
        if self.status(bit) != value {
            self.status ^= bit.mask();
            self.observer.set_status_changed(bit);
        }
    }

    /// Clears the register bank (restoring the read-only registers) and the memory registers.
    pub fn clear_registers(&mut self) {
        self.regs = [0; REG_COUNT];
        self.regs[usize::from(FIRST_STATIC_REG)..].copy_from_slice(&STATIC_REGS);
        self.mem_regs = [0; MemoryRegister::COUNT];
    }
    /// Clears all status bits.
    pub fn clear_status(&mut self) {
        self.status = 0;
    }
    /// Clears the error from the last step.
    pub fn clear_error(&mut self) {
        self.error = None;
    }
    /// Fully resets the datapath: signals, registers, status bits, bus state, errors, and observed changes.
    pub fn clear_cpu(&mut self) {
        self.clear_signals();
        self.clear_registers();
        self.clear_status();
        self.clear_error();
        self.bus_state = MainBusState::None;
        self.observer.clear();
    }

    /// The state of the main bus handshake.
    pub fn bus_state(&self) -> MainBusState {
        self.bus_state
    }
    /// The error raised on the last step (if one occurred).
    pub fn error(&self) -> Option<&DataErr> {
        self.error.as_ref()
    }

    // ------------------ BUSES ------------------

    /// The value on the A bus.
    pub fn a_bus(&self) -> Option<u8> {
        self.control(ControlSignal::A).map(|r| self.reg_byte(r))
    }
    /// The value on the B bus.
    pub fn b_bus(&self) -> Option<u8> {
        self.control(ControlSignal::B).map(|r| self.reg_byte(r))
    }
    /// The output of the AMux (the ALU's A input).
    pub fn amux_output(&self) -> Option<u8> {
        match (self.control(ControlSignal::AMux)?, self.cpu_type) {
            (0, CpuType::OneByteDataBus) => Some(self.mem_reg(MemoryRegister::MDR)),
            (0, CpuType::TwoByteDataBus) => match self.control(ControlSignal::EOMux)? {
                0 => Some(self.mem_reg(MemoryRegister::MDRE)),
                1 => Some(self.mem_reg(MemoryRegister::MDRO)),
                _ => None
            },
            (1, _) => self.a_bus(),
            _ => None
        }
    }
    /// The output of the CSMux (the ALU's carry in).
    pub fn csmux_output(&self) -> Option<bool> {
        match self.control(ControlSignal::CSMux)? {
            0 => Some(self.status(StatusBit::C)),
            1 => Some(self.status(StatusBit::S)),
            _ => None
        }
    }
    /// The output of the ALU.
    pub fn alu_output(&self) -> Option<AluOutput> {
        alu::evaluate(self.control(ControlSignal::ALU), self.amux_output(), self.b_bus(), self.csmux_output())
    }
    /// The value on the C bus.
    pub fn c_bus(&self) -> Option<u8> {
        match self.control(ControlSignal::CMux)? {
            0 => Some(self.status & !StatusBit::S.mask()),
            1 => self.alu_output().map(|o| o.result),
            _ => None
        }
    }
    /// The output of the MARMux (the address clocked into MAR on `MARCk`).
    pub fn marmux_output(&self) -> Option<(u8, u8)> {
        let from_ab = || Some((self.a_bus()?, self.b_bus()?));
        match self.cpu_type {
            CpuType::OneByteDataBus => from_ab(),
            CpuType::TwoByteDataBus => match self.control(ControlSignal::MARMux)? {
                0 => Some((self.mem_reg(MemoryRegister::MDRE), self.mem_reg(MemoryRegister::MDRO))),
                1 => from_ab(),
                _ => None
            },
        }
    }

    // ------------------ STEPPING ------------------

    /// Performs one clock cycle with the currently asserted signals.
    ///
    /// On error, the error is also kept until the next step (see [`DataSection::error`]),
    /// and the main bus state is left as it was before the cycle.
    /// Registers clocked before the failing signal keep their new values.
    /// If memory blocks (see [`DataErr::is_blocking`]), the cycle has no effect at all.
    pub fn step<M: MemoryDevice + ?Sized>(&mut self, mem: &mut M) -> Result<(), DataErr> {
        self.error = None;
        let prev_bus_state = self.bus_state;
        let result = self.step_inner(mem);
        match &result {
            Ok(()) => tracing::trace!(bus = ?self.bus_state, "datapath cycle"),
            Err(e) if e.is_blocking() => tracing::trace!(error = %e, "datapath cycle blocked"),
            Err(e) => {
                tracing::warn!(error = %e, "datapath error");
                self.error = Some(*e);
                // A failed cycle does not count towards the handshake.
                self.bus_state = prev_bus_state;
            }
        }
        result
    }

    fn step_inner<M: MemoryDevice + ?Sized>(&mut self, mem: &mut M) -> Result<(), DataErr> {
        let prev_bus_state = self.bus_state;

        let mar_candidate = self.marmux_output();
        let mar_changed = self.clock(ClockSignal::MARCk)
            && mar_candidate.is_some_and(|(a, b)| u16::from_be_bytes([a, b]) != self.mar());
        self.bus_state = self.bus_state.next(
            mar_changed,
            self.asserted(ControlSignal::MemRead),
            self.asserted(ControlSignal::MemWrite)
        );

        // Every input is computed before any state changes.
        let c = self.c_bus();
        let alu = self.alu_output();

        // Reads happen before anything is committed,
        // so a blocked read leaves the cycle without effect.
        let fetched = match self.fetch(mem) {
            Ok(f) => f,
            Err(e) => {
                self.bus_state = prev_bus_state;
                return Err(e);
            }
        };

        if self.bus_state == MainBusState::MemWriteReady {
            self.commit_write(mem)?;
        }

        // MARCk
        if self.clock(ClockSignal::MARCk) {
            let (a, b) = mar_candidate.ok_or(match self.cpu_type {
                CpuType::OneByteDataBus => DataErr::MarNoValue,
                CpuType::TwoByteDataBus => DataErr::MarMuxNoOutput,
            })?;
            self.set_mem_reg(MemoryRegister::MARA, a);
            self.set_mem_reg(MemoryRegister::MARB, b);
        }

        // LoadCk
        if self.clock(ClockSignal::LoadCk) {
            let dest = self.control(ControlSignal::C).ok_or(DataErr::LoadNoDest)?;
            let value = c.ok_or(DataErr::LoadNoValue)?;
            self.set_reg_byte(dest, value);
        }

        // MDRCk, MDRECk, MDROCk
        for (reg, value) in self.mdr_clocks() {
            let value = match value {
                Some(0) => fetched[reg.index()].ok_or(DataErr::MdrNoBusValue(reg))?,
                Some(1) => c.ok_or(DataErr::MdrNoCValue(reg))?,
                _ => return Err(DataErr::MdrNoMux(reg)),
            };
            self.set_mem_reg(reg, value);
        }

        // Status bits
        let status_clocks = [ClockSignal::NCk, ClockSignal::ZCk, ClockSignal::VCk, ClockSignal::CCk, ClockSignal::SCk];
        if status_clocks.iter().any(|&ck| self.clock(ck)) {
            let alu = alu.ok_or(DataErr::StatusNoAlu)?;
            let and_z = match self.clock(ClockSignal::ZCk) {
                true => match self.control(ControlSignal::AndZ) {
                    Some(0) => false,
                    Some(1) => true,
                    _ => return Err(DataErr::StatusNoAlu),
                },
                false => false,
            };

            if self.clock(ClockSignal::NCk) { self.set_status(StatusBit::N, alu.bit(StatusBit::N)) };
            if self.clock(ClockSignal::ZCk) {
                let z = alu.bit(StatusBit::Z) && (!and_z || self.status(StatusBit::Z));
                self.set_status(StatusBit::Z, z);
            }
            if self.clock(ClockSignal::VCk) { self.set_status(StatusBit::V, alu.bit(StatusBit::V)) };
            if self.clock(ClockSignal::CCk) { self.set_status(StatusBit::C, alu.bit(StatusBit::C)) };
            // S takes the carry out
            if self.clock(ClockSignal::SCk) { self.set_status(StatusBit::S, alu.bit(StatusBit::C)) };
        }

        Ok(())
    }

    /// The memory data registers clocked this cycle, and the value of each one's mux.
    fn mdr_clocks(&self) -> Vec<(MemoryRegister, Option<u8>)> {
        let table = match self.cpu_type {
            CpuType::OneByteDataBus => &[
                (MemoryRegister::MDR, ClockSignal::MDRCk, ControlSignal::MDRMux),
            ][..],
            CpuType::TwoByteDataBus => &[
                (MemoryRegister::MDRE, ClockSignal::MDRECk, ControlSignal::MDREMux),
                (MemoryRegister::MDRO, ClockSignal::MDROCk, ControlSignal::MDROMux),
            ][..],
        };

        table.iter()
            .filter(|&&(_, ck, _)| self.clock(ck))
            .map(|&(reg, _, mux)| (reg, self.control(mux)))
            .collect()
    }

    /// Reads memory for every memory data register that clocks from memory this cycle.
    ///
    /// The result is indexed by [`MemoryRegister::index`].
    fn fetch<M: MemoryDevice + ?Sized>(&mut self, mem: &mut M) -> Result<[Option<u8>; MemoryRegister::COUNT], DataErr> {
        let mut fetched = [None; MemoryRegister::COUNT];
        if self.bus_state != MainBusState::MemReadReady { return Ok(fetched) };

        let addr = self.mar();
        for (reg, mux) in self.mdr_clocks() {
            if mux != Some(0) { continue };

            let addr = match reg {
                MemoryRegister::MDRE => addr & !1,
                MemoryRegister::MDRO => addr | 1,
                _ => addr
            };
            let value = mem.read_byte(addr).map_err(DataErr::Memory)?;
            self.observer.update_mem_accesses(addr, AccessSet::READ);
            fetched[reg.index()] = Some(value);
        }
        Ok(fetched)
    }

    fn commit_write<M: MemoryDevice + ?Sized>(&mut self, mem: &mut M) -> Result<(), DataErr> {
        let addr = self.mar();
        let writes = match self.cpu_type {
            CpuType::OneByteDataBus => vec![(addr, self.mem_reg(MemoryRegister::MDR))],
            CpuType::TwoByteDataBus => vec![
                (addr & !1, self.mem_reg(MemoryRegister::MDRE)),
                (addr | 1, self.mem_reg(MemoryRegister::MDRO)),
            ],
        };

        for (addr, value) in writes {
            let modified = mem.peek_byte(addr) != value;
            mem.write_byte(addr, value).map_err(DataErr::Memory)?;

            let mut set = AccessSet::WRITTEN;
            if modified { set |= AccessSet::MODIFIED };
            self.observer.update_mem_accesses(addr, set);
        }
        Ok(())
    }
}

fn word_reg_index(reg: RegSpec) -> u8 {
    match reg {
        RegSpec::A  => 0,
        RegSpec::X  => 2,
        RegSpec::SP => 4,
        RegSpec::PC => PC_REG,
        RegSpec::T2 => 12,
        RegSpec::T3 => 14,
        RegSpec::T4 => 16,
        RegSpec::T5 => 18,
        // T6 (and anything else not handled by the caller)
        _ => 20,
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::code::MicroCode;
    use crate::ast::{ClockSignal, ControlSignal, CpuType, MemoryRegister, RegSpec, StatusBit};
    use crate::sim::mem::{MainMemory, MemoryDevice};

    use super::{DataErr, DataSection, MainBusState};

    fn micro(controls: &[(ControlSignal, u8)], clocks: &[ClockSignal]) -> MicroCode {
        let mut mc = MicroCode::new();
        for &(sig, v) in controls {
            mc.set_control(sig, Some(v));
        }
        for &ck in clocks {
            mc.set_clock(ck, true);
        }
        mc
    }
    fn cycle(data: &mut DataSection, mem: &mut MainMemory, controls: &[(ControlSignal, u8)], clocks: &[ClockSignal]) -> Result<(), DataErr> {
        data.set_signals(&micro(controls, clocks));
        data.step(mem)
    }

    #[test]
    fn test_clear_registers() {
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        data.set_reg_word(0, 0x1234);
        data.set_mem_reg(MemoryRegister::MDR, 0x56);
        data.clear_registers();

        assert_eq!(data.reg_byte(22), 0x00);
        assert_eq!(data.reg_byte(23), 0x01);
        assert_eq!(data.reg_byte(27), 0x08);
        assert_eq!(data.reg_byte(29), 0xF6);
        assert_eq!(data.reg_byte(31), 0xFF);
        assert!((0..22).all(|r| data.reg_byte(r) == 0));
        assert_eq!(data.mem_reg(MemoryRegister::MDR), 0);
    }

    #[test]
    fn test_static_regs_read_only() {
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        data.set_reg_byte(22, 0x99);
        data.set_reg_word(21, 0x9999);
        assert_eq!(data.reg_byte(21), 0);
        assert_eq!(data.reg_byte(22), 0);

        data.set_reg_byte(21, 0x99);
        assert_eq!(data.reg_byte(21), 0x99);
    }

    #[test]
    fn test_named_registers() {
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        data.set_reg(RegSpec::IR, 0xC1_2345);
        assert_eq!(data.reg_byte(8), 0xC1);
        assert_eq!(data.reg_word(9), 0x2345);
        assert_eq!(data.reg(RegSpec::IR), 0xC1_2345);

        data.set_reg(RegSpec::PC, 0xABCD);
        assert_eq!(data.reg_byte(6), 0xAB);
        assert_eq!(data.reg_byte(7), 0xCD);

        data.set_reg(RegSpec::T1, 0x1FF);
        assert_eq!(data.reg(RegSpec::T1), 0xFF);

        data.set_reg(RegSpec::T6, 0x0102);
        assert_eq!(data.reg_word(20), 0x0102);

        data.set_reg(RegSpec::MARB, 0x42);
        assert_eq!(data.mem_reg(MemoryRegister::MARB), 0x42);
    }

    #[test]
    fn test_buses() {
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        data.set_reg_word(0, 0x1234);
        assert_eq!(data.a_bus(), None);
        assert_eq!(data.c_bus(), None);

        data.set_signals(&micro(&[(ControlSignal::A, 0), (ControlSignal::B, 1)], &[]));
        assert_eq!(data.a_bus(), Some(0x12));
        assert_eq!(data.b_bus(), Some(0x34));

        // AMux=1 routes the A bus, AMux=0 routes MDR
        data.set_control(ControlSignal::AMux, Some(1));
        data.set_control(ControlSignal::ALU, Some(1));
        data.set_control(ControlSignal::CMux, Some(1));
        assert_eq!(data.c_bus(), Some(0x46));

        data.set_mem_reg(MemoryRegister::MDR, 0x01);
        data.set_control(ControlSignal::AMux, Some(0));
        assert_eq!(data.c_bus(), Some(0x35));

        // CMux=0 routes NZVC
        data.set_status(StatusBit::N, true);
        data.set_status(StatusBit::S, true);
        data.set_control(ControlSignal::CMux, Some(0));
        assert_eq!(data.c_bus(), Some(0x08));
    }

    #[test]
    fn test_load() {
        let mut mem = MainMemory::default();
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        data.set_reg_byte(1, 0x20);

        // T1 <- r1 + 1
        use ControlSignal::*;
        cycle(&mut data, &mut mem, &[(A, 1), (B, 23), (AMux, 1), (ALU, 1), (CMux, 1), (C, 11)], &[ClockSignal::LoadCk]).unwrap();
        assert_eq!(data.reg_byte(11), 0x21);
        assert!(data.observer.reg_changed(11));
    }

    #[test]
    fn test_error_atomicity() {
        let mut mem = MainMemory::default();
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        data.set_reg_word(0, 0x1234);
        let before = data.clone();

        use ControlSignal::*;
        let err = cycle(&mut data, &mut mem, &[(A, 0), (AMux, 1), (ALU, 0), (CMux, 1)], &[ClockSignal::LoadCk]).unwrap_err();
        assert_eq!(err, DataErr::LoadNoDest);
        assert_eq!(data.error(), Some(&DataErr::LoadNoDest));
        assert_eq!(err.to_string(), "No destination register specified for LoadCk.");
        assert_eq!(data.regs, before.regs);

        let err = cycle(&mut data, &mut mem, &[(C, 4)], &[ClockSignal::LoadCk]).unwrap_err();
        assert_eq!(err.to_string(), "No value on C Bus to clock in.");
        assert_eq!(data.regs, before.regs);

        // Errors are cleared on the next step
        cycle(&mut data, &mut mem, &[(A, 0), (AMux, 1), (ALU, 0), (CMux, 1), (C, 4)], &[ClockSignal::LoadCk]).unwrap();
        assert_eq!(data.error(), None);
        assert_eq!(data.reg_byte(4), 0x12);
    }

    #[test]
    fn test_error_stops_signals() {
        let mut mem = MainMemory::default();
        let mut data = DataSection::new(CpuType::OneByteDataBus);

        // MARCk is applied, then LoadCk fails, and MDRCk is never applied
        use ControlSignal::*;
        let err = cycle(
            &mut data, &mut mem,
            &[(A, 23), (B, 24), (MDRMux, 1), (CMux, 0)],
            &[ClockSignal::MARCk, ClockSignal::LoadCk, ClockSignal::MDRCk]
        ).unwrap_err();
        assert_eq!(err, DataErr::LoadNoDest);
        assert_eq!(data.mar(), 0x0102);
        assert!(!data.observer.mem_reg_changed(MemoryRegister::MDR));

        let err = cycle(&mut data, &mut mem, &[], &[ClockSignal::MARCk]).unwrap_err();
        assert_eq!(err.to_string(), "No values on A & B during MARCk.");
    }

    #[test]
    fn test_bus_handshake() {
        use MainBusState::*;

        assert_eq!(None.next(false, true, false), MemReadFirstWait);
        assert_eq!(MemReadFirstWait.next(false, true, false), MemReadSecondWait);
        assert_eq!(MemReadSecondWait.next(false, true, false), MemReadReady);
        assert_eq!(MemReadReady.next(false, true, false), MemReadFirstWait);

        // MAR change resets
        assert_eq!(None.next(true, true, false), None);
        assert_eq!(MemReadFirstWait.next(true, true, false), MemReadFirstWait);
        assert_eq!(MemReadSecondWait.next(true, true, false), MemReadFirstWait);
        assert_eq!(MemWriteSecondWait.next(true, false, true), MemWriteFirstWait);

        // switching and dropping
        assert_eq!(MemReadSecondWait.next(false, false, true), MemWriteFirstWait);
        assert_eq!(MemWriteFirstWait.next(false, true, false), MemReadFirstWait);
        assert_eq!(MemWriteSecondWait.next(false, false, false), None);
        assert_eq!(MemWriteSecondWait.next(false, false, true), MemWriteReady);
        assert_eq!(MemWriteReady.next(false, false, false), None);
    }

    #[test]
    fn test_memory_read() {
        let mut mem = MainMemory::default();
        mem.poke_byte(0x0102, 0xAB);
        let mut data = DataSection::new(CpuType::OneByteDataBus);

        use ControlSignal::*;
        cycle(&mut data, &mut mem, &[(A, 23), (B, 24)], &[ClockSignal::MARCk]).unwrap();
        cycle(&mut data, &mut mem, &[(MemRead, 1)], &[]).unwrap();
        assert_eq!(data.bus_state(), MainBusState::MemReadFirstWait);

        // too early
        let err = cycle(&mut data, &mut mem, &[(MemRead, 1), (MDRMux, 0)], &[ClockSignal::MDRCk]).unwrap_err();
        assert_eq!(err.to_string(), "No value from data bus to write to MDR.");
        // the failed cycle does not advance the handshake
        assert_eq!(data.bus_state(), MainBusState::MemReadFirstWait);

        cycle(&mut data, &mut mem, &[(MemRead, 1)], &[]).unwrap();
        assert_eq!(data.bus_state(), MainBusState::MemReadSecondWait);
        cycle(&mut data, &mut mem, &[(MemRead, 1), (MDRMux, 0)], &[ClockSignal::MDRCk]).unwrap();
        assert_eq!(data.bus_state(), MainBusState::MemReadReady);
        assert_eq!(data.mem_reg(MemoryRegister::MDR), 0xAB);
        assert!(data.observer.get_mem_accesses(0x0102).read());
    }

    #[test]
    fn test_mar_change_restarts_read() {
        let mut mem = MainMemory::default();
        let mut data = DataSection::new(CpuType::OneByteDataBus);

        use ControlSignal::*;
        cycle(&mut data, &mut mem, &[(MemRead, 1)], &[]).unwrap();
        cycle(&mut data, &mut mem, &[(MemRead, 1), (A, 23), (B, 24)], &[ClockSignal::MARCk]).unwrap();
        assert_eq!(data.bus_state(), MainBusState::MemReadFirstWait);

        // clocking the same address is not a change
        cycle(&mut data, &mut mem, &[(MemRead, 1), (A, 23), (B, 24)], &[ClockSignal::MARCk]).unwrap();
        assert_eq!(data.bus_state(), MainBusState::MemReadSecondWait);
    }

    #[test]
    fn test_memory_write() {
        let mut mem = MainMemory::default();
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        data.set_mem_reg(MemoryRegister::MARA, 0x00);
        data.set_mem_reg(MemoryRegister::MARB, 0x10);
        data.set_mem_reg(MemoryRegister::MDR, 0x77);

        use ControlSignal::*;
        for _ in 0..2 {
            cycle(&mut data, &mut mem, &[(MemWrite, 1)], &[]).unwrap();
            assert_eq!(mem.peek_byte(0x0010), 0);
        }
        cycle(&mut data, &mut mem, &[(MemWrite, 1)], &[]).unwrap();
        assert_eq!(data.bus_state(), MainBusState::MemWriteReady);
        assert_eq!(mem.peek_byte(0x0010), 0x77);
        assert!(data.observer.get_mem_accesses(0x0010).modified());
    }

    #[test]
    fn test_status_bits() {
        let mut mem = MainMemory::default();
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        data.set_reg_byte(0, 0xFF);

        use ControlSignal::*;
        use ClockSignal::{NCk, ZCk, VCk, CCk, SCk};
        // 0xFF + 0x01
        cycle(&mut data, &mut mem, &[(A, 0), (B, 23), (AMux, 1), (ALU, 1), (AndZ, 0)], &[NCk, ZCk, VCk, CCk, SCk]).unwrap();
        assert!(!data.status(StatusBit::N));
        assert!(data.status(StatusBit::Z));
        assert!(!data.status(StatusBit::V));
        assert!(data.status(StatusBit::C));
        assert!(data.status(StatusBit::S));

        // AndZ=1 keeps Z only if both are zero
        cycle(&mut data, &mut mem, &[(A, 22), (AMux, 1), (ALU, 0), (AndZ, 1)], &[ZCk]).unwrap();
        assert!(data.status(StatusBit::Z));
        cycle(&mut data, &mut mem, &[(A, 23), (AMux, 1), (ALU, 0), (AndZ, 1)], &[ZCk]).unwrap();
        assert!(!data.status(StatusBit::Z));
        cycle(&mut data, &mut mem, &[(A, 22), (AMux, 1), (ALU, 0), (AndZ, 1)], &[ZCk]).unwrap();
        assert!(!data.status(StatusBit::Z));

        // no ALU output
        let err = cycle(&mut data, &mut mem, &[(A, 0), (AMux, 1), (ALU, 1)], &[NCk]).unwrap_err();
        assert_eq!(err.to_string(), "ALU Error: No output from ALU to clock into status bits.");
        // ZCk needs AndZ
        let err = cycle(&mut data, &mut mem, &[(A, 0), (AMux, 1), (ALU, 0)], &[ZCk]).unwrap_err();
        assert_eq!(err, DataErr::StatusNoAlu);
    }

    #[test]
    fn test_two_byte_bus() {
        let mut mem = MainMemory::default();
        mem.poke_byte(0x0102, 0xAA);
        mem.poke_byte(0x0103, 0xBB);
        let mut data = DataSection::new(CpuType::TwoByteDataBus);

        use ControlSignal::*;
        use ClockSignal::{MARCk, MDRECk, MDROCk};
        // MARMux selects A/B; odd address reads the aligned word
        cycle(&mut data, &mut mem, &[(A, 23), (B, 25), (MARMux, 1)], &[MARCk]).unwrap();
        assert_eq!(data.mar(), 0x0103);
        for _ in 0..2 {
            cycle(&mut data, &mut mem, &[(MemRead, 1)], &[]).unwrap();
        }
        cycle(&mut data, &mut mem, &[(MemRead, 1), (MDREMux, 0), (MDROMux, 0)], &[MDRECk, MDROCk]).unwrap();
        assert_eq!(data.mem_reg(MemoryRegister::MDRE), 0xAA);
        assert_eq!(data.mem_reg(MemoryRegister::MDRO), 0xBB);

        // MARMux=0 routes MDRE/MDRO into MAR
        cycle(&mut data, &mut mem, &[(MARMux, 0)], &[MARCk]).unwrap();
        assert_eq!(data.mar(), 0xAABB);

        // EOMux selects which MDR feeds the AMux
        data.set_signals(&micro(&[(AMux, 0), (EOMux, 1)], &[]));
        assert_eq!(data.amux_output(), Some(0xBB));
        data.set_control(EOMux, Some(0));
        assert_eq!(data.amux_output(), Some(0xAA));
        data.set_control(EOMux, None);
        assert_eq!(data.amux_output(), None);

        // word write
        for _ in 0..3 {
            cycle(&mut data, &mut mem, &[(MemWrite, 1)], &[]).unwrap();
        }
        assert_eq!(mem.peek_byte(0xAABA), 0xAA);
        assert_eq!(mem.peek_byte(0xAABB), 0xBB);

        let err = cycle(&mut data, &mut mem, &[], &[MARCk]).unwrap_err();
        assert_eq!(err.to_string(), "MARMux has no output but MARCk.");
        let err = cycle(&mut data, &mut mem, &[], &[MDROCk]).unwrap_err();
        assert_eq!(err.to_string(), "No value to clock into MDRO.");
    }

    #[test]
    fn test_blocked_read() {
        let mut mem = MainMemory::default();
        mem.set_input_port(Some(0x0102));
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        data.set_mem_reg(MemoryRegister::MARA, 0x01);
        data.set_mem_reg(MemoryRegister::MARB, 0x02);
        data.set_reg_byte(0, 0x10);

        use ControlSignal::*;
        for _ in 0..2 {
            cycle(&mut data, &mut mem, &[(MemRead, 1)], &[]).unwrap();
        }
        let signals: &[(ControlSignal, u8)] = &[(MemRead, 1), (MDRMux, 0), (A, 0), (AMux, 1), (ALU, 0), (CMux, 1), (C, 1)];
        let clocks = &[ClockSignal::MDRCk, ClockSignal::LoadCk];

        let err = cycle(&mut data, &mut mem, signals, clocks).unwrap_err();
        assert!(err.is_blocking());
        assert_eq!(data.error(), None);
        assert_eq!(data.bus_state(), MainBusState::MemReadSecondWait);
        assert_eq!(data.reg_byte(1), 0);

        mem.push_input(b"x");
        cycle(&mut data, &mut mem, signals, clocks).unwrap();
        assert_eq!(data.mem_reg(MemoryRegister::MDR), b'x');
        assert_eq!(data.reg_byte(1), 0x10);
    }

    #[test]
    fn test_set_signals_changed() {
        let mut data = DataSection::new(CpuType::OneByteDataBus);
        let mc = micro(&[(ControlSignal::A, 5)], &[ClockSignal::NCk]);
        assert!(data.set_signals(&mc));
        assert!(!data.set_signals(&mc));
        data.clear_signals();
        assert_eq!(data.control(ControlSignal::A), None);
        assert!(!data.clock(ClockSignal::NCk));
    }
}
