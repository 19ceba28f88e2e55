//! Simulating microcode on the Pep/9 CPU.
//!
//! This module is focused on executing assembled microcode (i.e., [`MicrocodeProgram`]).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates the control section and drives the datapath.
//! - [`data`]: The module handling the datapath (registers, buses, and the main bus handshake).
//! - [`alu`]: The module handling the arithmetic logic unit.
//! - [`mem`]: The module handling main memory.
//! - [`spec`]: The module applying and checking unit test specifications.
//! - [`isa`]: The module decoding Pep/9 instruction specifiers.
//! - [`debug`]: The module handling types of breakpoints for the simulator.
//! - [`frame`]: The module handling the frame stack and call frame management.
//! - [`observer`]: The module tracking changes to the datapath.
//!
//! # Usage
//!
//! To simulate some microcode, you need to instantiate a Simulator and load a program to it:
//!
//! ```
//! use pep9_micro::asm::{assemble, AsmFlags};
//! use pep9_micro::sim::Simulator;
//!
//! let src = "
//!     UnitPre: A=0x1203
//!     // A<low> <- A<low> + A<high>
//!     A=1, B=0, AMux=1, ALU=1, CMux=1, C=1; LoadCk
//!     UnitPost: A=0x1215
//! ";
//! let program = assemble(src, AsmFlags::default()).unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_program(program);
//! sim.apply_preconditions();
//! sim.run().unwrap();
//!
//! assert!(sim.hit_stop());
//! assert!(sim.check_postconditions().is_empty());
//! ```
//!
//! ## Flags
//!
//! The simulator can be configured by editing its flags. For example,
//! to fill memory with random (but reproducible) data:
//!
//! ```
//! # use pep9_micro::sim::{Simulator, SimFlags};
//! # use pep9_micro::sim::mem::MemInitStrategy;
//! let mut simulator = Simulator::new(SimFlags { mem_init: MemInitStrategy::Seeded { seed: 2110 }, ..Default::default() });
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Execution
//!
//! Beyond the basic [`Simulator::run`] (which runs until the microcode stops),
//! there are also:
//! - [`Simulator::step_micro`]: execute one cycle
//! - [`Simulator::step_instruction`], [`Simulator::step_over`], [`Simulator::step_out`]: execute by Pep/9 instruction
//! - [`Simulator::run_while`], [`Simulator::run_with_limit`]: more advanced programmatic execution
//!
//! An instruction starts whenever the microprogram counter is at the line labeled `start`
//! (or the first line, if there is no such label).
//!
//! ## Querying State
//!
//! - The datapath (registers, status bits, signals) is accessible through the `sim.data` field.
//! - Main memory is accessible through the `sim.mem` field.
//! - The microprogram counter is accessible through [`Simulator::upc`].
//!
//! ### Frames
//!
//! The simulator also keeps track of call depth, accessible on the `frame_stack` field of [`Simulator`].
//! - When a `CALL` or trap instruction completes, the frame count increases by 1.
//! - When a `RET` or `RETTR` instruction completes, the frame count decreases by 1.
pub mod alu;
pub mod data;
pub mod debug;
pub mod frame;
pub mod isa;
pub mod mem;
pub mod observer;
pub mod spec;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::asm::{MicrocodeProgram, SymbolId};
use crate::ast::code::Branch;
use crate::ast::{BranchCondition, ClockSignal, ControlSignal, CpuType, StatusBit};
use debug::Breakpoint;

use self::data::{DataErr, DataSection, IS_REG, PC_REG};
use self::frame::FrameStack;
use self::mem::{MainMemory, MemInitStrategy};
use self::spec::SpecFailure;

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimErr {
    /// The datapath raised an error.
    Data(DataErr),
    /// A microcode line branched to itself.
    SelfBranch,
    /// `DecodeAddrMode` jumped to an addressing mode with no handler.
    UndefinedAddrMode(&'static str),
    /// `DecodeInstrSpec` jumped to an instruction with no handler.
    UndefinedInstr(&'static str),
    /// A branch targeted a label which does not refer to a microcode line.
    UndefinedTarget,
    /// `PValidCk` was pulsed without `PValid` set.
    PValidDisabled,
    /// The loaded program has no microcode lines.
    NoMicrocode,
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::Data(e)              => std::fmt::Display::fmt(e, f),
            SimErr::SelfBranch           => f.write_str("ERROR: µInstructions cannot branch to themselves"),
            SimErr::UndefinedAddrMode(s) => write!(f, "ERROR: AMD jumped to undefined addressing mode - {s}"),
            SimErr::UndefinedInstr(s)    => write!(f, "ERROR: ISD jumped to undefined inst - {s}"),
            SimErr::UndefinedTarget      => f.write_str("ERROR: µBranch target does not refer to a line of microcode"),
            SimErr::PValidDisabled       => f.write_str("Error: Asserted PValidCk, but PValid was disabled."),
            SimErr::NoMicrocode          => f.write_str("ERROR: No microcode to execute"),
        }
    }
}
impl std::error::Error for SimErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimErr::Data(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for SimErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            SimErr::Data(e)              => crate::err::Error::help(e),
            SimErr::SelfBranch           => Some("a line which repeats itself would never finish, so branch to a different line".into()),
            SimErr::UndefinedAddrMode(s) => Some(format!("define a label `{s}` for this addressing mode's handler").into()),
            SimErr::UndefinedInstr(s)    => Some(format!("define a label `{s}` for this instruction's handler").into()),
            SimErr::UndefinedTarget      => None,
            SimErr::PValidDisabled       => Some("set PValid when pulsing PValidCk".into()),
            SimErr::NoMicrocode          => Some("load a program with at least one line of microcode".into()),
        }
    }
}
impl From<DataErr> for SimErr {
    fn from(value: DataErr) -> Self {
        SimErr::Data(value)
    }
}

/// Anything that can cause a step to abruptly fail to finish.
enum StepBreak {
    /// The microcode stopped.
    Stop,
    /// Memory is waiting for input, and the cycle had no effect.
    Blocked,
    /// A simulation error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}

/// Reason for why execution paused if it wasn't due to an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
enum PauseCondition {
    /// Microcode reached a stop.
    Stop,
    /// Memory is waiting for input.
    Blocked,
    /// The run flag was turned off.
    RunFlagOff,
    /// Program hit a breakpoint.
    Breakpoint,
    /// Program hit a tripwire condition.
    Tripwire,
    /// Program hit an error and did not pause successfully.
    #[default]
    Unsuccessful
}

/// Configuration flags for [`Simulator`].
///
/// These are preserved between resets.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// The CPU being simulated.
    ///
    /// This only goes into effect after a `Simulator::new` or `Simulator::reset` call
    /// (and is replaced with the program's CPU by [`Simulator::load_program`]).
    ///
    /// By default, this is [`CpuType::OneByteDataBus`].
    pub cpu_type: CpuType,

    /// The creation strategy for main memory.
    ///
    /// By default, this is [`MemInitStrategy::default`].
    pub mem_init: MemInitStrategy,

    /// The maximum number of cycles [`Simulator::run`] executes before pausing.
    ///
    /// By default, this is `None` (no limit).
    pub max_cycles: Option<u64>,

    /// Whether to store debugging information about call frames.
    ///
    /// This flag only goes into effect after a `Simulator::new` or `Simulator::reset` call.
    ///
    /// By default, this flag is `false`.
    pub debug_frames: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            cpu_type: CpuType::OneByteDataBus,
            mem_init: Default::default(),
            max_cycles: None,
            debug_frames: false,
        }
    }
}

/// Number of instruction specifiers.
const SPEC_COUNT: usize = 256;

/// Executes microcode.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values.

    /// The datapath.
    pub data: DataSection,

    /// Main memory.
    pub mem: MainMemory,

    /// The microprogram counter.
    upc: usize,

    /// The PC at the start of the current instruction.
    instr_start_pc: u16,

    /// Whether the microcode has stopped.
    stopped: bool,

    /// Whether the prefetch buffer holds a valid byte.
    prefetch_valid: bool,

    /// The frame stack.
    pub frame_stack: FrameStack,

    /// The number of cycles successfully run since this `Simulator` was reset.
    ///
    /// This can be set to 0 to reset the counter.
    pub cycles_run: u64,

    /// The number of instructions successfully run since this `Simulator` was reset.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// Indicates the reason why the last execution (via [`Simulator::run_while`] and adjacent)
    /// had paused.
    pause_condition: PauseCondition,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// The loaded microprogram.
    program: MicrocodeProgram,

    /// Microcode index of the handler for each instruction specifier (`DecodeInstrSpec`).
    instr_jt: Box<[Option<usize>]>,

    /// Microcode index of the handler for each instruction specifier's addressing mode (`DecodeAddrMode`).
    addr_jt: Box<[Option<usize>]>,

    /// Run flag.
    /// If unset, execution pauses.
    ///
    /// This is publicly accessible via a reference through [`Simulator::run_flag`].
    run_flag: RunFlag,

    /// Configuration settings for the simulator.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,

    /// Breakpoints for the simulator.
    pub breakpoints: HashSet<Breakpoint>,
}
impl Simulator where Simulator: Send + Sync {}

impl Simulator {
    /// Creates a new simulator with the provided flags and an empty program.
    ///
    /// This also allows providing a run flag atomic which is used by the Simulator.
    fn new_with_run_flag(flags: SimFlags, run_flag: RunFlag) -> Self {
        let mut filler = flags.mem_init.generator();

        Self {
            data: DataSection::new(flags.cpu_type),
            mem: MainMemory::new(&mut filler),
            upc: 0,
            instr_start_pc: 0,
            stopped: false,
            prefetch_valid: false,
            frame_stack: FrameStack::new(flags.debug_frames),
            cycles_run: 0,
            instructions_run: 0,
            pause_condition: Default::default(),

            program: MicrocodeProgram::empty(flags.cpu_type),
            instr_jt: vec![None; SPEC_COUNT].into_boxed_slice(),
            addr_jt: vec![None; SPEC_COUNT].into_boxed_slice(),
            run_flag,
            flags,
            breakpoints: Default::default(),
        }
    }

    /// Creates a new simulator with the provided flags and an empty program.
    pub fn new(flags: SimFlags) -> Self {
        Self::new_with_run_flag(flags, Arc::default())
    }

    /// Resets the simulator.
    ///
    /// This resets the datapath, memory, and control section back to before any execution calls,
    /// while preserving configuration and debug state.
    ///
    /// Note that this function preserves:
    /// - Flags
    /// - Breakpoints
    /// - The loaded program
    /// - The memory port mappings
    /// - The run flag reference (i.e., anything with access to the Simulator's run flag can still control it)
    pub fn reset(&mut self) {
        let run_flag = Arc::clone(&self.run_flag);
        let flags = self.flags;
        let breakpoints = std::mem::take(&mut self.breakpoints);
        let program = std::mem::replace(&mut self.program, MicrocodeProgram::empty(flags.cpu_type));
        let (input_port, output_port) = (self.mem.input_port(), self.mem.output_port());

        *self = Simulator::new_with_run_flag(flags, run_flag);
        self.breakpoints = breakpoints;
        self.mem.set_input_port(input_port);
        self.mem.set_output_port(output_port);
        self.install(program);
        tracing::debug!(cpu = ?flags.cpu_type, "simulator reset");
    }

    /// Loads a microprogram into the control section.
    ///
    /// The microprogram counter is moved to the program's start line.
    /// If the program targets a different CPU than the current one,
    /// the datapath is replaced with a cleared datapath for that CPU.
    /// Memory is left untouched.
    pub fn load_program(&mut self, program: MicrocodeProgram) {
        if program.cpu_type() != self.data.cpu_type() {
            self.data = DataSection::new(program.cpu_type());
        }
        self.flags.cpu_type = program.cpu_type();
        self.install(program);
    }

    fn install(&mut self, program: MicrocodeProgram) {
        let sym = program.symbol_table();
        for spec in 0..=u8::MAX {
            let (mnemonic, mode) = isa::decode(spec);
            self.instr_jt[usize::from(spec)] = sym.lookup_value(mnemonic.symbol());
            self.addr_jt[usize::from(spec)] = sym.lookup_value(mode.symbol());
        }
        tracing::debug!(
            instructions = self.instr_jt.iter().flatten().count(),
            addr_modes = self.addr_jt.iter().flatten().count(),
            "built decoder jump tables"
        );

        self.upc = program.start_index();
        self.program = program;
        self.stopped = false;
        self.pause_condition = Default::default();
    }

    /// The loaded microprogram.
    pub fn program(&self) -> &MicrocodeProgram {
        &self.program
    }

    /// The microprogram counter (the microcode index of the next line to execute).
    pub fn upc(&self) -> usize {
        self.upc
    }

    /// The program counter.
    pub fn pc(&self) -> u16 {
        self.data.reg_word(PC_REG)
    }

    /// Whether the next cycle begins a new instruction.
    pub fn at_instruction_start(&self) -> bool {
        self.upc == self.program.start_index()
    }

    /// Whether the prefetch buffer holds a valid byte (set by `PValidCk`).
    pub fn prefetch_valid(&self) -> bool {
        self.prefetch_valid
    }

    /// Gets a reference to the run flag.
    ///
    /// Storing `false` into it pauses any ongoing execution.
    pub fn run_flag(&self) -> &RunFlag {
        &self.run_flag
    }

    /// Indicates whether the last execution of the simulator hit a breakpoint.
    pub fn hit_breakpoint(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Breakpoint)
    }

    /// Indicates whether the microcode has stopped (via `stopCPU` or by falling off the last line).
    ///
    /// Once stopped, execution does not continue until the simulator is reset or a program is loaded.
    pub fn hit_stop(&self) -> bool {
        self.stopped
    }

    /// Indicates whether the last execution paused because memory is waiting for input.
    ///
    /// Execution can be continued once input is provided to memory.
    pub fn is_blocked(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Blocked)
    }

    /// Clears the CPU, then applies every `UnitPre:` specification of the program in order.
    pub fn apply_preconditions(&mut self) {
        self.data.clear_cpu();
        self.prefetch_valid = false;
        for spec in self.program.preconditions() {
            spec.apply(&mut self.data, &mut self.mem);
        }
    }

    /// Checks every `UnitPost:` specification of the program,
    /// returning every specification which does not hold.
    pub fn check_postconditions(&self) -> Vec<SpecFailure> {
        self.program.postconditions()
            .filter_map(|spec| spec.check(&self.data, &self.mem).err())
            .collect()
    }

    fn branch_target(&self, id: SymbolId) -> Result<usize, SimErr> {
        self.program.resolve(id).ok_or(SimErr::UndefinedTarget)
    }

    fn test_condition(&self, cond: BranchCondition) -> bool {
        let bit = |b| self.data.status(b);
        match cond {
            BranchCondition::GT => !bit(StatusBit::N) && !bit(StatusBit::Z),
            BranchCondition::GE => !bit(StatusBit::N),
            BranchCondition::EQ => bit(StatusBit::Z),
            BranchCondition::NE => !bit(StatusBit::Z),
            BranchCondition::LE => bit(StatusBit::N) || bit(StatusBit::Z),
            BranchCondition::LT => bit(StatusBit::N),
            BranchCondition::VBit => bit(StatusBit::V),
            BranchCondition::CBit => bit(StatusBit::C),
            BranchCondition::SBit => bit(StatusBit::S),
            BranchCondition::HasPrefetch => self.prefetch_valid,
            // Traps are unary at the hardware level
            BranchCondition::IsUnary => isa::is_unary_or_trap(self.data.reg_byte(IS_REG)),
            BranchCondition::IsPCEven => self.data.reg_byte(PC_REG + 1) % 2 == 0,
        }
    }

    /// Computes the line after the current line (or `None` if the microcode stops).
    fn next_upc(&self, branch: Branch) -> Result<Option<usize>, SimErr> {
        let is = usize::from(self.data.reg_byte(IS_REG));

        let next = match branch {
            Branch::Next => Some(self.upc + 1).filter(|&n| n < self.program.microcode_len()),
            Branch::Goto(target) => Some(self.branch_target(target)?),
            Branch::If { cond, on_true, on_false } => {
                let target = if self.test_condition(cond) { on_true } else { on_false };
                Some(self.branch_target(target)?)
            },
            Branch::Stop => None,
            Branch::DecodeAddrMode => {
                let target = self.addr_jt[is]
                    .ok_or_else(|| SimErr::UndefinedAddrMode(isa::decode(is as u8).1.symbol()))?;
                Some(target)
            },
            Branch::DecodeInstrSpec => {
                let target = self.instr_jt[is]
                    .ok_or_else(|| SimErr::UndefinedInstr(isa::decode(is as u8).0.symbol()))?;
                Some(target)
            },
        };

        match next {
            Some(n) if n == self.upc => Err(SimErr::SelfBranch),
            n => Ok(n)
        }
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - the microcode stops
    /// - memory is waiting for input
    /// - the run flag is set to false
    /// - A breakpoint matches
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), SimErr> {
        use std::sync::atomic::Ordering;

        self.data.observer.clear();
        self.pause_condition = Default::default();
        self.run_flag.store(true, Ordering::Relaxed);

        // event loop
        // run until:
        // 1. the run flag is set to false
        // 2. the tripwire condition returns false
        // 3. the microcode stops or blocks on input
        // 4. any of the breakpoints are hit
        let result = loop {
            // Run flag turned off:
            if !self.run_flag.load(Ordering::Relaxed) {
                break Ok(PauseCondition::RunFlagOff);
            }
            // Tripwire turned off:
            if !tripwire(self) {
                break Ok(PauseCondition::Tripwire);
            }

            // Run a step:
            match self.step() {
                Ok(_) => {},
                Err(StepBreak::Stop) => break Ok(PauseCondition::Stop),
                Err(StepBreak::Blocked) => break Ok(PauseCondition::Blocked),
                Err(StepBreak::Err(e)) => break Err(e)
            }

            // After executing, check that any breakpoints were hit.
            if self.breakpoints.iter().any(|bp| bp.check(self)) {
                break Ok(PauseCondition::Breakpoint);
            }
        };

        self.run_flag.store(false, Ordering::Relaxed);
        match &result {
            Ok(PauseCondition::Stop) => tracing::info!(
                cycles = self.cycles_run,
                instructions = self.instructions_run,
                "execution finished"
            ),
            Ok(cond) => tracing::debug!(reason = ?cond, upc = self.upc, "execution paused"),
            Err(e) => tracing::debug!(error = %e, upc = self.upc, "execution failed"),
        }
        self.pause_condition = result?;
        Ok(())
    }

    /// Execute the microcode.
    ///
    /// This blocks until the microcode stops (or until [`SimFlags::max_cycles`] cycles have been executed).
    pub fn run(&mut self) -> Result<(), SimErr> {
        let start = self.cycles_run;
        let max_cycles = self.flags.max_cycles;
        self.run_while(|sim| max_cycles.map_or(true, |m| sim.cycles_run.wrapping_sub(start) < m))
    }

    /// Execute the microcode with a limit on how many instructions to execute.
    ///
    /// This blocks until the microcode stops or until the number of instructions to execute has been hit.
    pub fn run_with_limit(&mut self, max_instrs: u64) -> Result<(), SimErr> {
        let i = self.instructions_run;
        self.run_while(|sim| sim.instructions_run.wrapping_sub(i) < max_instrs)
    }

    /// Simulate one cycle, executing one line of microcode.
    ///
    /// If the cycle fails with a control section error, the microcode is stopped.
    /// If the cycle fails with a datapath error, the microprogram counter is not advanced.
    fn step(&mut self) -> Result<(), StepBreak> {
        if self.stopped { return Err(StepBreak::Stop) };

        let start = self.program.start_index();
        let Some(mc) = self.program.microcode(self.upc) else {
            return Err(SimErr::NoMicrocode.into());
        };

        if self.upc == start {
            // Store PC at the start of the cycle, so that we know where the instruction started from.
            self.instr_start_pc = self.data.reg_word(PC_REG);
        }

        let branch = mc.branch;
        let pvalid = match mc.clock(ClockSignal::PValidCk) {
            true  => Some(mc.control(ControlSignal::PValid).ok_or(SimErr::PValidDisabled)? != 0),
            false => None,
        };
        self.data.set_signals(mc);

        match self.data.step(&mut self.mem) {
            Ok(()) => {},
            Err(e) if e.is_blocking() => return Err(StepBreak::Blocked),
            Err(e) => return Err(SimErr::Data(e).into()),
        }
        if let Some(pvalid) = pvalid {
            self.prefetch_valid = pvalid;
        }
        self.cycles_run += 1;
        tracing::trace!(upc = self.upc, cycle = self.cycles_run, "microcode step");

        let next = match self.next_upc(branch) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, upc = self.upc, "control section error");
                self.stopped = true;
                return Err(e.into());
            }
        };
        match next {
            Some(n) => self.upc = n,
            None => self.stopped = true,
        }

        if self.upc == start || self.stopped {
            let (mnemonic, _) = isa::decode(self.data.reg_byte(IS_REG));
            self.frame_stack.on_instruction(mnemonic, self.instr_start_pc, self.pc());
            self.instructions_run += 1;
            tracing::trace!(%mnemonic, pc = self.instr_start_pc, depth = self.frame_stack.len(), "instruction complete");

            // The instruction at the current PC will not execute,
            // so the PC is restored to where this instruction started.
            if self.stopped {
                self.data.set_reg_word(PC_REG, self.instr_start_pc);
            }
        }

        match self.stopped {
            true  => Err(StepBreak::Stop),
            false => Ok(()),
        }
    }

    /// Simulate one cycle, executing one line of microcode.
    pub fn step_micro(&mut self) -> Result<(), SimErr> {
        let mut first = Some(()); // is Some if this is the first cycle executed in this call
        self.run_while(|_| first.take().is_some())
    }

    /// Simulate one instruction, executing microcode until the microprogram counter returns to the start line.
    pub fn step_instruction(&mut self) -> Result<(), SimErr> {
        let mut first = Some(()); // is Some if this is the first cycle executed in this call

        // this function should do at least one step before checking its condition
        // condition: run until we have landed back at the start line
        self.run_while(|sim| first.take().is_some() || !sim.at_instruction_start())
    }

    /// Simulate one instruction, running through entire subroutines and traps as a single step.
    pub fn step_over(&mut self) -> Result<(), SimErr> {
        let curr_frame = self.frame_stack.len();
        let mut first = Some(()); // is Some if this is the first cycle executed in this call

        // this function should do at least one step before checking its condition
        // condition: run until we have landed back in the same frame at an instruction start
        self.run_while(|sim| first.take().is_some() || !sim.at_instruction_start() || curr_frame < sim.frame_stack.len())
    }

    /// Run through the simulator's execution until the subroutine is exited.
    pub fn step_out(&mut self) -> Result<(), SimErr> {
        let curr_frame = self.frame_stack.len();
        let mut first = Some(()); // is Some if this is the first cycle executed in this call

        // this function should do at least one step before checking its condition
        // condition: run until we've landed in a smaller frame at an instruction start
        if curr_frame != 0 {
            self.run_while(|sim| first.take().is_some() || !sim.at_instruction_start() || curr_frame <= sim.frame_stack.len())?;
        }

        Ok(())
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

/// A type alias for the run flag.
pub type RunFlag = Arc<AtomicBool>;

#[cfg(test)]
mod tests {
    use crate::asm::{assemble, AsmFlags, MicrocodeProgram};
    use crate::ast::{CpuType, RegSpec, StatusBit};
    use crate::sim::data::DataErr;

    use super::debug::Breakpoint;
    use super::{SimErr, SimFlags, Simulator};

    fn assemble_src(src: &str) -> MicrocodeProgram {
        assemble(src, AsmFlags::default()).unwrap()
    }
    fn load(src: &str) -> Simulator {
        let mut sim = Simulator::new(Default::default());
        sim.load_program(assemble_src(src));
        sim.apply_preconditions();
        sim
    }

    /// Fetches one byte into the instruction specifier, increments PC, and decodes.
    const FETCH_DECODE: &str = "
        start: A=6, B=7; MARCk
        MemRead
        MemRead
        MemRead, MDRMux=0; MDRCk
        AMux=0, ALU=0, CMux=1, C=8; LoadCk
        A=7, B=23, AMux=1, ALU=1, CMux=1, C=7; LoadCk; DecodeInstrSpec
    ";

    #[test]
    fn test_straight_line() {
        let mut sim = load("
            UnitPre: A=0x1203, N=1
            A=1, B=0, AMux=1, ALU=1, CMux=1, C=1; LoadCk
            A=0, AMux=1, ALU=0, AndZ=0; NCk, ZCk
            UnitPost: A=0x1215, N=0, Z=0
        ");
        assert!(sim.data.status(StatusBit::N));

        sim.run().unwrap();
        assert!(sim.hit_stop());
        assert_eq!(sim.cycles_run, 2);
        assert_eq!(sim.instructions_run, 1);
        assert_eq!(sim.data.reg(RegSpec::A), 0x1215);
        assert!(sim.check_postconditions().is_empty());

        // stopped microcode does not continue
        sim.run().unwrap();
        assert!(sim.hit_stop());
        assert_eq!(sim.cycles_run, 2);
    }

    #[test]
    fn test_postcondition_failure() {
        let mut sim = load("
            UnitPre: X=0x0001
            A=3, AMux=1, ALU=10, CMux=1, C=3; LoadCk
            UnitPost: X=0x0001, V=0
        ");
        sim.run().unwrap();

        let failures = sim.check_postconditions();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].to_string(), "// ERROR: Unit test failed for register X.");
        assert_eq!(failures[0].actual, 0x00FE);
    }

    #[test]
    fn test_conditional_branch() {
        let src = "
            start: A=0, B=1, AMux=1, ALU=3, AndZ=0; ZCk
            if EQ equal else notEqual
            equal: A=23, AMux=1, ALU=0, CMux=1, C=4; LoadCk; stopCPU
            notEqual: A=24, AMux=1, ALU=0, CMux=1, C=4; LoadCk; stopCPU
        ";

        let mut sim = load(src);
        sim.data.set_reg_byte(0, 5);
        sim.data.set_reg_byte(1, 5);
        sim.run().unwrap();
        assert_eq!(sim.data.reg_byte(4), 0x01);
        assert_eq!(sim.cycles_run, 3);

        let mut sim = load(src);
        sim.data.set_reg_byte(0, 5);
        sim.data.set_reg_byte(1, 6);
        sim.run().unwrap();
        assert_eq!(sim.data.reg_byte(4), 0x02);
    }

    #[test]
    fn test_self_branch() {
        let mut sim = load("loop: MemRead; goto loop");
        assert_eq!(sim.run(), Err(SimErr::SelfBranch));
        assert_eq!(sim.cycles_run, 1);
        assert_eq!(SimErr::SelfBranch.to_string(), "ERROR: µInstructions cannot branch to themselves");

        // a control error stops the microcode
        assert!(sim.hit_stop());
    }

    #[test]
    fn test_data_error() {
        let mut sim = load("A=1, B=2; LoadCk");
        assert_eq!(sim.run(), Err(SimErr::Data(DataErr::LoadNoDest)));
        assert_eq!(sim.upc(), 0);
        assert_eq!(sim.cycles_run, 0);
        assert!(!sim.hit_stop());
    }

    #[test]
    fn test_instruction_decode() {
        let src = format!("{FETCH_DECODE}
            nota: A=1, AMux=1, ALU=10, CMux=1, C=1; LoadCk; goto start
        ");
        let mut sim = load(&src);
        sim.data.set_reg(RegSpec::A, 0x0F0F);
        sim.mem.load(0x0000, &[0x06, 0x06, 0x00]);

        sim.step_instruction().unwrap();
        assert_eq!(sim.instructions_run, 1);
        assert_eq!(sim.cycles_run, 7);
        assert!(sim.at_instruction_start());
        assert_eq!(sim.data.reg(RegSpec::A), 0x0FF0);
        assert_eq!(sim.pc(), 0x0001);

        sim.step_instruction().unwrap();
        assert_eq!(sim.data.reg(RegSpec::A), 0x0F0F);
        assert_eq!(sim.pc(), 0x0002);

        // STOP has no handler
        let err = sim.run().unwrap_err();
        assert_eq!(err, SimErr::UndefinedInstr("stop"));
        assert_eq!(err.to_string(), "ERROR: ISD jumped to undefined inst - stop");
        assert_eq!(sim.cycles_run, 20);
    }

    #[test]
    fn test_addr_mode_decode() {
        let src = "
            start: A=8, AMux=1, ALU=0, CMux=1, C=1; LoadCk; DecodeAddrMode
            dAddr: A=23, AMux=1, ALU=0, CMux=1, C=2; LoadCk; stopCPU
        ";
        let mut sim = load(src);
        // LDWA direct
        sim.data.set_reg_byte(8, 0xC1);
        sim.run().unwrap();
        assert_eq!(sim.data.reg_byte(2), 0x01);

        let mut sim = load(src);
        // LDWA indexed
        sim.data.set_reg_byte(8, 0xC5);
        let err = sim.run().unwrap_err();
        assert_eq!(err.to_string(), "ERROR: AMD jumped to undefined addressing mode - xAddr");
    }

    #[test]
    fn test_breakpoints() {
        let src = format!("{FETCH_DECODE}
            nota: A=1, AMux=1, ALU=10, CMux=1, C=1; LoadCk; goto start
        ");
        let mut sim = load(&src);
        sim.mem.load(0x0000, &[0x06, 0x06, 0x06, 0x00]);

        sim.breakpoints.insert(Breakpoint::Addr(0x0002));
        sim.run().unwrap();
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.instructions_run, 2);
        assert!(sim.at_instruction_start());

        sim.breakpoints.clear();
        sim.breakpoints.insert(Breakpoint::Micro(4));
        sim.run().unwrap();
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.upc(), 4);
        assert_eq!(sim.cycles_run, 18);
    }

    #[test]
    fn test_step_over_out() {
        let src = format!("{FETCH_DECODE}
            call: A=0, AMux=1, ALU=0, CMux=1, C=12; LoadCk; goto start
            ret: A=0, AMux=1, ALU=0, CMux=1, C=13; LoadCk; goto start
        ");
        // CALL; RET; RET
        let mut sim = load(&src);
        sim.mem.load(0x0000, &[0x24, 0x01, 0x01]);

        sim.step_over().unwrap();
        assert_eq!(sim.instructions_run, 2);
        assert_eq!(sim.pc(), 0x0002);
        assert!(sim.frame_stack.is_empty());

        let mut sim = load(&src);
        sim.mem.load(0x0000, &[0x24, 0x01, 0x01]);
        sim.step_instruction().unwrap();
        assert_eq!(sim.frame_stack.len(), 1);

        sim.step_out().unwrap();
        assert_eq!(sim.instructions_run, 2);
        assert!(sim.frame_stack.is_empty());

        // no frame to step out of
        sim.step_out().unwrap();
        assert_eq!(sim.instructions_run, 2);
    }

    #[test]
    fn test_blocked_input() {
        let mut sim = load("
            A=23, B=24; MARCk
            MemRead
            MemRead
            MemRead, MDRMux=0; MDRCk
            AMux=0, ALU=0, CMux=1, C=1; LoadCk
        ");
        sim.mem.set_input_port(Some(0x0102));

        sim.run().unwrap();
        assert!(sim.is_blocked());
        assert!(!sim.hit_stop());
        assert_eq!(sim.upc(), 3);
        assert_eq!(sim.cycles_run, 3);

        sim.mem.push_input(b"A");
        sim.run().unwrap();
        assert!(sim.hit_stop());
        assert_eq!(sim.data.reg_byte(1), b'A');
    }

    #[test]
    fn test_prefetch() {
        let src = "
            A=1; PValidCk
        ";
        let flags = AsmFlags::default();
        let mut sim = Simulator::new(Default::default());
        sim.load_program(assemble(src, flags).unwrap());
        assert_eq!(sim.run(), Err(SimErr::PValidDisabled));
        assert_eq!(sim.cycles_run, 0);

        let src = "
            start: PValid=1; PValidCk; if HasPrefetch yes else no
            yes: A=23, AMux=1, ALU=0, CMux=1, C=1; LoadCk; stopCPU
            no: A=24, AMux=1, ALU=0, CMux=1, C=1; LoadCk; stopCPU
        ";
        let mut sim = load(src);
        sim.run().unwrap();
        assert!(sim.prefetch_valid());
        assert_eq!(sim.data.reg_byte(1), 0x01);
    }

    #[test]
    fn test_max_cycles() {
        let mut sim = Simulator::new(SimFlags { max_cycles: Some(10), ..Default::default() });
        sim.load_program(assemble_src("
            start: A=23, B=24; MARCk
            goto start
        "));
        sim.run().unwrap();
        assert!(!sim.hit_stop());
        assert_eq!(sim.cycles_run, 10);
        assert_eq!(sim.instructions_run, 5);

        sim.step_micro().unwrap();
        assert_eq!(sim.cycles_run, 11);
        assert_eq!(sim.upc(), 1);
    }

    #[test]
    fn test_reset() {
        let mut sim = load("
            A=23, B=24; MARCk
            A=1, B=2; MARCk
        ");
        sim.breakpoints.insert(Breakpoint::Micro(1));
        sim.mem.set_output_port(Some(0xFC16));
        sim.run().unwrap();
        assert!(sim.hit_breakpoint());

        sim.reset();
        assert_eq!(sim.upc(), 0);
        assert_eq!(sim.cycles_run, 0);
        assert_eq!(sim.data.mar(), 0);
        assert_eq!(sim.breakpoints.len(), 1);
        assert_eq!(sim.mem.output_port(), Some(0xFC16));
        assert_eq!(sim.program().microcode_len(), 2);
    }

    #[test]
    fn test_two_byte_program() {
        let flags = AsmFlags { cpu_type: CpuType::TwoByteDataBus, extended: true };
        let program = assemble("
            A=23, B=24, MARMux=1; MARCk
            MemRead
            MemRead
            MemRead, MDREMux=0, MDROMux=0; MDRECk, MDROCk
            AMux=0, EOMux=1, ALU=0, CMux=1, C=1; LoadCk
        ", flags).unwrap();

        let mut sim = Simulator::new(Default::default());
        sim.load_program(program);
        assert_eq!(sim.flags.cpu_type, CpuType::TwoByteDataBus);
        sim.mem.load(0x0102, &[0xAB, 0xCD]);

        sim.run().unwrap();
        assert_eq!(sim.data.reg_byte(1), 0xCD);
    }

    #[test]
    fn test_run_with_limit() {
        let src = format!("{FETCH_DECODE}
            nota: A=1, AMux=1, ALU=10, CMux=1, C=1; LoadCk; goto start
        ");
        let mut sim = load(&src);
        sim.mem.load(0x0000, &[0x06; 8]);

        sim.run_with_limit(3).unwrap();
        assert_eq!(sim.instructions_run, 3);
        assert_eq!(sim.pc(), 0x0003);
    }
}
