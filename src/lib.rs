//! A Pep/9 microcode assembler and CPU simulator.
//!
//! This is meant to be a general suite to use Pep/9 microcode
//! (both the one-byte and the two-byte data bus CPU).
//!
//! # Usage
//!
//! To convert microcode source text to an executable program, it must be assembled:
//! ```
//! use pep9_micro::asm::{assemble, AsmFlags, MicrocodeProgram};
//!
//! let code = "
//!     // MAR <- PC
//!     start: A=6, B=7; MARCk
//!     MemRead
//!     MemRead
//!     MemRead, MDRMux=0; MDRCk; stopCPU
//! ";
//! let program: MicrocodeProgram = assemble(code, AsmFlags::default()).unwrap();
//! ```
//!
//! Single lines can also be parsed on their own:
//! ```
//! use pep9_micro::asm::{AsmFlags, SymbolTable};
//! use pep9_micro::parse::parse_line;
//!
//! let mut sym = SymbolTable::new();
//! let line = parse_line(&mut sym, "A=1, B=2; MARCk", AsmFlags::default()).unwrap();
//! assert!(line.is_microcode());
//! ```
//!
//! Once a program has been assembled, it can be executed with the simulator:
//! ```
//! # use pep9_micro::asm::{assemble, AsmFlags};
//! # let program = assemble("A=6, B=7; MARCk", AsmFlags::default()).unwrap();
//! use pep9_micro::sim::Simulator;
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load_program(program);
//! simulator.run().unwrap(); // <-- Result can be handled accordingly
//! ```
//!
//! If more granularity is needed for simulation, there are also cycle and instruction stepping functions.
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
pub mod err;
