//! Main memory for the Pep/9 datapath.
//!
//! This module consists of:
//! - [`MemoryDevice`]: The interface the datapath uses to reach memory.
//! - [`MainMemory`]: 64 KiB of byte-addressable memory with optional memory-mapped character ports.
//! - [`MemInitStrategy`]: How memory is filled before a program writes to it.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::Rng;

/// The number of bytes in main memory.
pub const MEM_SIZE: usize = 1 << 16;

/// Errors raised by a memory device.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MemErr {
    /// A read was made from an input port which has no buffered input.
    ///
    /// The access has no effect, and can be retried once input is available.
    WouldBlock {
        /// The address of the input port.
        addr: u16
    },
}
impl std::fmt::Display for MemErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemErr::WouldBlock { addr } => write!(f, "Waiting for input at Mem[0x{addr:04X}]."),
        }
    }
}
impl std::error::Error for MemErr {}
impl crate::err::Error for MemErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            MemErr::WouldBlock { .. } => Some("provide input to the input port and resume execution".into()),
        }
    }
}

/// A byte-addressable memory which the datapath can read from and write to.
///
/// `read_byte` and `write_byte` are accesses made by the datapath
/// (and may have side effects, such as consuming input).
/// `peek_byte` and `poke_byte` inspect or edit memory directly without side effects.
pub trait MemoryDevice {
    /// Reads a byte, triggering any side effects of the access.
    fn read_byte(&mut self, addr: u16) -> Result<u8, MemErr>;
    /// Writes a byte, triggering any side effects of the access.
    fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), MemErr>;
    /// Gets the byte stored at the address without side effects.
    fn peek_byte(&self, addr: u16) -> u8;
    /// Sets the byte stored at the address without side effects.
    fn poke_byte(&mut self, addr: u16, value: u8);

    /// Reads a big-endian word.
    ///
    /// Word accesses ignore the lowest bit of the address.
    fn read_word(&mut self, addr: u16) -> Result<u16, MemErr> {
        let even = addr & !1;
        let hi = self.read_byte(even)?;
        let lo = self.read_byte(even | 1)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }
    /// Writes a big-endian word.
    ///
    /// Word accesses ignore the lowest bit of the address.
    fn write_word(&mut self, addr: u16, value: u16) -> Result<(), MemErr> {
        let even = addr & !1;
        let [hi, lo] = value.to_be_bytes();
        self.write_byte(even, hi)?;
        self.write_byte(even | 1, lo)
    }
}

/// Trait that describes types that can be used to create the data for an uninitialized byte of memory.
pub trait ByteFiller {
    /// Generate the data.
    fn generate(&mut self) -> u8;
}
impl ByteFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u8 {
        rand::random()
    }
}
impl ByteFiller for u8 {
    /// Sets each byte to the given value.
    fn generate(&mut self) -> u8 {
        *self
    }
}
impl ByteFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u8 {
        self.gen()
    }
}

/// Strategy used to fill main memory when the simulator is created or reset.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MemInitStrategy {
    /// Fills each byte with a known value.
    Known {
        /// The value to fill with.
        value: u8
    },

    /// Fills each byte randomly and non-deterministically.
    Unseeded,

    /// Fills each byte randomly and deterministically.
    Seeded {
        /// The seed the RNG is initialized with.
        seed: u64
    },
}
impl Default for MemInitStrategy {
    fn default() -> Self {
        MemInitStrategy::Known { value: 0 }
    }
}
impl MemInitStrategy {
    pub(super) fn generator(&self) -> impl ByteFiller {
        use rand::SeedableRng;

        match self {
            MemInitStrategy::Known { value } => MIGenerator::Known(*value),
            MemInitStrategy::Unseeded => MIGenerator::Unseeded,
            MemInitStrategy::Seeded { seed } => MIGenerator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
        }
    }
}

enum MIGenerator {
    Known(u8),
    Unseeded,
    Seeded(Box<StdRng>),
}
impl ByteFiller for MIGenerator {
    fn generate(&mut self) -> u8 {
        match self {
            MIGenerator::Known(k)  => k.generate(),
            MIGenerator::Unseeded  => ().generate(),
            MIGenerator::Seeded(r) => r.generate(),
        }
    }
}

/// The 64 KiB main memory.
///
/// An input port and an output port can be mapped onto addresses.
/// Reading the input port consumes one buffered byte of input
/// (and fails with [`MemErr::WouldBlock`] if there is none),
/// and writing to the output port appends the byte to the output buffer.
///
/// Note that the data is held in the heap, as it is too large for the stack.
#[derive(Debug, Clone)]
pub struct MainMemory {
    data: Box<[u8; MEM_SIZE]>,
    input_port: Option<u16>,
    output_port: Option<u16>,
    input: VecDeque<u8>,
    output: Vec<u8>,
}
impl MainMemory {
    /// Creates a new memory, filling every byte with the filler.
    pub fn new(filler: &mut impl ByteFiller) -> Self {
        Self {
            data: Self::filled(filler),
            input_port: None,
            output_port: None,
            input: VecDeque::new(),
            output: vec![],
        }
    }

    fn filled(filler: &mut impl ByteFiller) -> Box<[u8; MEM_SIZE]> {
        std::iter::repeat_with(|| filler.generate())
            .take(MEM_SIZE)
            .collect::<Box<_>>()
            .try_into()
            .unwrap_or_else(|_| unreachable!("iterator should have had {MEM_SIZE} elements"))
    }

    /// Refills memory with the filler and clears the IO buffers.
    ///
    /// The port mappings are kept.
    pub fn clear(&mut self, filler: &mut impl ByteFiller) {
        self.data = Self::filled(filler);
        self.input.clear();
        self.output.clear();
    }

    /// Copies bytes into memory starting at the given address (wrapping at the end of memory).
    pub fn load(&mut self, start: u16, bytes: &[u8]) {
        for (addr, &b) in std::iter::successors(Some(start), |a| Some(a.wrapping_add(1))).zip(bytes) {
            self.data[usize::from(addr)] = b;
        }
    }

    /// Gets an immutable reference to the whole memory.
    pub fn as_slice(&self) -> &[u8] {
        &*self.data
    }

    /// Maps the input port to an address (or unmaps it).
    pub fn set_input_port(&mut self, addr: Option<u16>) {
        self.input_port = addr;
    }
    /// Maps the output port to an address (or unmaps it).
    pub fn set_output_port(&mut self, addr: Option<u16>) {
        self.output_port = addr;
    }
    /// The address of the input port (if mapped).
    pub fn input_port(&self) -> Option<u16> {
        self.input_port
    }
    /// The address of the output port (if mapped).
    pub fn output_port(&self) -> Option<u16> {
        self.output_port
    }

    /// Buffers input for the input port.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }
    /// Input which has not yet been read.
    pub fn input(&self) -> &VecDeque<u8> {
        &self.input
    }
    /// Everything written to the output port so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }
    /// Takes everything written to the output port so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}
impl Default for MainMemory {
    fn default() -> Self {
        Self::new(&mut 0)
    }
}
impl MemoryDevice for MainMemory {
    fn read_byte(&mut self, addr: u16) -> Result<u8, MemErr> {
        if self.input_port == Some(addr) {
            let b = self.input.pop_front().ok_or(MemErr::WouldBlock { addr })?;
            self.data[usize::from(addr)] = b;
        }
        Ok(self.data[usize::from(addr)])
    }

    fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), MemErr> {
        if self.output_port == Some(addr) {
            self.output.push(value);
        }
        self.data[usize::from(addr)] = value;
        Ok(())
    }

    fn peek_byte(&self, addr: u16) -> u8 {
        self.data[usize::from(addr)]
    }

    fn poke_byte(&mut self, addr: u16, value: u8) {
        self.data[usize::from(addr)] = value;
    }
}
