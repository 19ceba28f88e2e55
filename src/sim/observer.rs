//! Module handles change observers,
//! which store which parts of the datapath changed during the last cycle.
//!
//! You would typically access an observer via the [`DataSection::observer`] field.
//! A display layer can poll the [`ChangeObserver`] after a step
//! instead of diffing the whole datapath.
//!
//! [`DataSection::observer`]: crate::sim::data::DataSection::observer

use std::collections::BTreeMap;

use crate::ast::{MemoryRegister, StatusBit};

/// The set of accesses which have occurred at this location.
///
/// ## Example
///
/// ```
/// # use pep9_micro::sim::observer::AccessSet;
///
/// let accesses = AccessSet::READ;
/// assert!(accesses.accessed());
/// assert!(accesses.read());
/// assert!(!accesses.written());
/// assert!(!accesses.modified());
/// ```
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct AccessSet(u8);
impl AccessSet {
    /// Set with only the read flag enabled.
    pub const READ: Self = Self(1 << 0);
    /// Set with only the write flag enabled.
    pub const WRITTEN: Self = Self(1 << 1);
    /// Set with only the modify flag enabled.
    pub const MODIFIED: Self = Self(1 << 2);

    /// True if any access has occurred.
    pub fn accessed(&self) -> bool {
        self.0 != 0
    }

    /// True if a read has occurred.
    pub fn read(&self) -> bool {
        self.0 & Self::READ.0 != 0
    }
    /// True if a write has occurred (does not necessarily have to change data).
    pub fn written(&self) -> bool {
        self.0 & Self::WRITTEN.0 != 0
    }
    /// True if a write has occurred (data must change).
    pub fn modified(&self) -> bool {
        self.0 & Self::MODIFIED.0 != 0
    }
}
impl std::ops::BitOr for AccessSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
impl std::ops::BitOrAssign for AccessSet {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}
impl std::fmt::Debug for AccessSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessSet")
            .field("read", &self.read())
            .field("written", &self.written())
            .field("modified", &self.modified())
            .finish()
    }
}

/// A struct that tracks changes to the datapath.
///
/// Register bytes, memory registers, and status bits are tracked when their value changes.
/// Memory is tracked per access (see [`AccessSet`]).
#[derive(Debug, Default, Clone)]
pub struct ChangeObserver {
    regs: u32,
    mem_regs: u8,
    status: u8,
    mem: BTreeMap<u16, AccessSet>,
}
impl ChangeObserver {
    /// Creates a new change observer.
    pub fn new() -> Self {
        Default::default()
    }

    /// Clears all changes.
    pub fn clear(&mut self) {
        std::mem::take(self);
    }

    /// Whether any change was recorded since the last clear.
    pub fn any_changed(&self) -> bool {
        self.regs != 0
            || self.mem_regs != 0
            || self.status != 0
            || self.mem.values().any(AccessSet::modified)
    }

    pub(super) fn set_reg_changed(&mut self, reg: u8) {
        self.regs |= 1u32.checked_shl(u32::from(reg)).unwrap_or(0);
    }
    /// Whether the register byte (0-31) was changed.
    pub fn reg_changed(&self, reg: u8) -> bool {
        1u32.checked_shl(u32::from(reg)).is_some_and(|m| self.regs & m != 0)
    }

    pub(super) fn set_mem_reg_changed(&mut self, reg: MemoryRegister) {
        self.mem_regs |= 1 << reg.index();
    }
    /// Whether the memory register was changed.
    pub fn mem_reg_changed(&self, reg: MemoryRegister) -> bool {
        self.mem_regs & (1 << reg.index()) != 0
    }

    pub(super) fn set_status_changed(&mut self, bit: StatusBit) {
        self.status |= bit.mask();
    }
    /// Whether the status bit was changed.
    pub fn status_changed(&self, bit: StatusBit) -> bool {
        self.status & bit.mask() != 0
    }

    /// Gets the access set for the given memory location.
    pub fn get_mem_accesses(&self, addr: u16) -> AccessSet {
        self.mem.get(&addr).copied().unwrap_or_default()
    }

    /// Adds new flags to the access set for the given memory location.
    pub fn update_mem_accesses(&mut self, addr: u16, set: AccessSet) {
        *self.mem.entry(addr).or_default() |= set;
    }

    /// Takes all memory accesses which have occurred since last clear,
    /// as well as clearing memory accesses.
    ///
    /// This iterator is sorted in address order.
    pub fn take_mem_accesses(&mut self) -> impl Iterator<Item=(u16, AccessSet)> {
        std::mem::take(&mut self.mem).into_iter()
    }
}
