//! The frame stack and call frame management.
//!
//! This module exposes:
//! - [`FrameStack`]: The frame stack used by the Simulator.
//! - [`Frame`]: All the data from a given frame.
//!
//! The control section only sees microcode, so frames are tracked
//! at instruction boundaries from the instruction specifier which just completed.

use super::isa::Mnemonic;

/// Where this frame came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Frame came from a `CALL` instruction.
    Subroutine,
    /// Frame came from a trap instruction.
    Trap,
}

/// A frame entry.
///
/// This information is only exposed by the Simulator if the `debug_frames` flag is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The address of the calling instruction.
    pub caller_addr: u16,

    /// The address execution continued at after the call.
    ///
    /// For subroutines, this is the start of the callee subroutine.
    /// For traps, this is wherever the trap handler was entered.
    pub callee_addr: u16,

    /// The instruction which created this frame.
    pub mnemonic: Mnemonic,

    /// Whether this frame is from a subroutine call or a trap call.
    pub frame_type: FrameType,
}

/// The stack of call frames.
///
/// - If the `debug_frames` flag is true, this keeps track of a Vec of [`Frame`]s.
/// - If the `debug_frames` flag is false, this only keeps track of the number of frames traversed.
#[derive(Debug, Clone)]
pub struct FrameStack {
    /// The number of frames traversed.
    ///
    /// At top level execution, `frame_no` == 0.
    /// Every `CALL` and trap increments this value,
    /// and every `RET` and `RETTR` decrements this value.
    frame_no: u64,

    frames: Option<Vec<Frame>>,
}

impl FrameStack {
    /// Creates a new frame stack.
    pub(super) fn new(debug_frames: bool) -> Self {
        Self {
            frame_no: 0,
            frames: debug_frames.then(Vec::new),
        }
    }

    /// Gets the current number of frames entered.
    pub fn len(&self) -> u64 {
        self.frame_no
    }

    /// Tests whether the frame stack is at top level execution.
    pub fn is_empty(&self) -> bool {
        self.frame_no == 0
    }

    /// Gets the list of current frames (if debug frames are enabled).
    pub fn frames(&self) -> Option<&[Frame]> {
        self.frames.as_deref()
    }

    /// Updates the frame stack after an instruction completes.
    ///
    /// `caller` is the PC when the instruction started,
    /// and `next_pc` is the PC after the instruction completed.
    pub(super) fn on_instruction(&mut self, mnemonic: Mnemonic, caller: u16, next_pc: u16) {
        if mnemonic.is_call() {
            let frame_type = match mnemonic {
                Mnemonic::CALL => FrameType::Subroutine,
                _ => FrameType::Trap,
            };
            self.push_frame(Frame { caller_addr: caller, callee_addr: next_pc, mnemonic, frame_type });
        } else if mnemonic.is_return() {
            self.pop_frame();
        }
    }

    /// Pushes a new frame to the frame stack.
    fn push_frame(&mut self, frame: Frame) {
        self.frame_no += 1;
        if let Some(frames) = self.frames.as_mut() {
            frames.push(frame);
        }
    }

    /// Pops a frame from the frame stack.
    fn pop_frame(&mut self) {
        self.frame_no = self.frame_no.saturating_sub(1);
        if let Some(frames) = self.frames.as_mut() {
            frames.pop();
        }
    }
}
impl Default for FrameStack {
    fn default() -> Self {
        Self::new(false)
    }
}
