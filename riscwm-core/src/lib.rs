#[macro_use]
extern crate static_assertions;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub mod address_map;
pub mod address_range;
pub mod csr;
pub mod hart;
pub mod instruction;
pub mod memory;
pub mod mmu;
pub mod registers;
pub mod time;
pub mod vm;

pub use address_range::AddressRange;
pub use hart::Hart;
pub use vm::Vm;

/// A 2-bit privilege level field as found in CSR addresses and in `mstatus.MPP`.
///
/// Unlike [`PrivilegeLevel`], this can hold the reserved encoding `0b10`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum RawPrivilegeLevel {
    User = 0,
    Supervisor = 1,
    Reserved = 2,
    Machine = 3,
}

impl RawPrivilegeLevel {
    /// Panics if `bits` does not fit in 2 bits.
    pub fn from_u2(bits: u8) -> Self {
        match bits {
            0b00 => Self::User,
            0b01 => Self::Supervisor,
            0b10 => Self::Reserved,
            0b11 => Self::Machine,
            _ => panic!("{bits:#x} is not a 2-bit privilege level"),
        }
    }
}

impl From<PrivilegeLevel> for RawPrivilegeLevel {
    fn from(level: PrivilegeLevel) -> Self {
        Self::from_u2(level as u8)
    }
}

impl PartialEq<PrivilegeLevel> for RawPrivilegeLevel {
    fn eq(&self, other: &PrivilegeLevel) -> bool {
        *self == Self::from(*other)
    }
}

impl PartialOrd<PrivilegeLevel> for RawPrivilegeLevel {
    fn partial_cmp(&self, other: &PrivilegeLevel) -> Option<Ordering> {
        Some(self.cmp(&Self::from(*other)))
    }
}

/// Privilege mode a hart runs in. Ordered from least (`U`) to most (`M`) privileged.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum PrivilegeLevel {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

impl TryFrom<RawPrivilegeLevel> for PrivilegeLevel {
    type Error = ReservedPrivilegeLevelError;

    fn try_from(raw: RawPrivilegeLevel) -> Result<Self, Self::Error> {
        match raw {
            RawPrivilegeLevel::User => Ok(Self::User),
            RawPrivilegeLevel::Supervisor => Ok(Self::Supervisor),
            RawPrivilegeLevel::Machine => Ok(Self::Machine),
            RawPrivilegeLevel::Reserved => Err(ReservedPrivilegeLevelError),
        }
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::User => 'U',
            Self::Supervisor => 'S',
            Self::Machine => 'M',
        };
        write!(f, "{letter}")
    }
}

#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
#[error("privilege level 0b10 is reserved")]
pub struct ReservedPrivilegeLevelError;

/// The kind of memory access performed by a hart.
///
/// The discriminants double as the bit index of the matching permission in a page table entry's
/// `R`/`W`/`X` field (after shifting out the valid bit).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AccessType {
    Read = 0,
    Write = 1,
    Execute = 2,
}

/// Address alignment ranging from no alignment (`1`) to `1 << 31` alignment.
// Maintains the invariant that self.0 is a power of two.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment(u32);

impl Alignment {
    /// Byte alignment is equivalent to no alignment.
    pub const BYTE: Self = Self(1);

    /// Halfword alignment means the address is a multiple of 2 (`address & 0b1 == 0`).
    pub const HALFWORD: Self = Self(2);

    /// Word alignment means the address is a multiple of 4 (`address & 0b11 == 0`).
    pub const WORD: Self = Self(4);

    /// Doubleword alignment means the address is a multiple of 8 (`address & 0b111 == 0`).
    pub const DOUBLEWORD: Self = Self(8);

    /// Creates the natural alignment for a unit of size `size`. Returns `None` if `size` is not a
    /// power of two.
    pub fn natural_for_size(size: u32) -> Option<Self> {
        size.is_power_of_two().then_some(Self(size))
    }

    /// Returns `true` if `address` is aligned to this alignment.
    pub fn is_aligned(self, address: u32) -> bool {
        address & self.0.wrapping_sub(1) == 0
    }
}
