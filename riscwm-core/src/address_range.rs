use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;
use thiserror::Error;

/// A non-empty range in the 32-bit physical address space bounded inclusively below and above.
///
/// Enforces the invariant that `self.start() <= self.end()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AddressRange {
    start: u32,
    end: u32,
}

impl Display for AddressRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#010x}, {:#010x}]", self.start, self.end)
    }
}

impl AddressRange {
    pub fn new(start: u32, end: u32) -> Result<Self, InvalidBoundsError> {
        (start <= end)
            .then_some(Self { start, end })
            .ok_or(InvalidBoundsError { start, end })
    }

    /// Creates the range `start..(start + length)` as used by memory devices.
    ///
    /// Fails if `length == 0` or if the range would run past the end of the address space.
    pub fn from_start_length(start: u32, length: u32) -> Result<Self, InvalidBoundsError> {
        length
            .checked_sub(1)
            .and_then(|delta| start.checked_add(delta))
            .map(|end| Self { start, end })
            .ok_or(InvalidBoundsError {
                start,
                end: start.wrapping_add(length),
            })
    }

    pub fn start(self) -> u32 {
        self.start
    }

    pub fn end(self) -> u32 {
        self.end
    }

    /// Check if an address is contained within this address range.
    pub fn contains(self, address: u32) -> bool {
        self.start <= address && address <= self.end
    }

    /// Returns `true` if both ranges have at least one address in common.
    pub fn overlaps(self, other: Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns `self.end() - self.start()`, which is the size minus 1.
    pub fn delta(self) -> u32 {
        self.end - self.start
    }

    /// Returns the size of this address range as a `u64`, which can always represent it.
    pub fn size(self) -> u64 {
        self.delta() as u64 + 1
    }
}

impl From<AddressRange> for RangeInclusive<u32> {
    fn from(value: AddressRange) -> Self {
        value.start..=value.end
    }
}

#[derive(Error, Debug, Clone)]
#[error("bounds [{start:#x}, {end:#x}] do not form a valid 32-bit address range")]
pub struct InvalidBoundsError {
    start: u32,
    end: u32,
}

#[macro_export]
macro_rules! address_range {
    ($start:expr, $end:expr) => {
        $crate::address_range::AddressRange::new($start, $end).unwrap()
    };
}
