use crate::AddressRange;
use std::cmp::Ordering;
use thiserror::Error;

/// Generic map of 32-bit address ranges to values of type `T`.
///
/// The ranges cannot overlap. Lookups are a binary search over the ranges ordered by start
/// address.
#[derive(Debug)]
pub struct AddressMap<T> {
    ordered_ranges: Vec<(AddressRange, T)>,
}

impl<T> Default for AddressMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AddressMap<T> {
    /// Create new empty map.
    pub fn new() -> Self {
        Self {
            ordered_ranges: Vec::new(),
        }
    }

    /// Returns the number of mapped ranges.
    pub fn len(&self) -> usize {
        self.ordered_ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_ranges.is_empty()
    }

    /// Maps `range` to `value`.
    ///
    /// Fails without modifying the map if `range` overlaps with an already mapped range.
    pub fn insert(&mut self, range: AddressRange, value: T) -> Result<(), AddressMapError> {
        let index = self
            .ordered_ranges
            .partition_point(|(existing, _)| existing.start() < range.start());
        let overlaps_previous = index
            .checked_sub(1)
            .and_then(|i| self.ordered_ranges.get(i))
            .is_some_and(|(previous, _)| previous.overlaps(range));
        let overlaps_next = self
            .ordered_ranges
            .get(index)
            .is_some_and(|(next, _)| next.overlaps(range));
        if overlaps_previous || overlaps_next {
            return Err(AddressMapError::OverlappingAddressRanges(range));
        }
        self.ordered_ranges.insert(index, (range, value));
        Ok(())
    }

    /// Returns the address range that contains `address`, and the value that it maps to, or
    /// `None` if `address` is in a vacant region.
    pub fn range_value(&self, address: u32) -> Option<(AddressRange, &T)> {
        self.search(address).ok().map(|index| {
            let (range, value) = &self.ordered_ranges[index];
            (*range, value)
        })
    }

    /// Mutable variant of [`range_value`](Self::range_value).
    pub fn range_value_mut(&mut self, address: u32) -> Option<(AddressRange, &mut T)> {
        self.search(address).ok().map(|index| {
            let (range, value) = &mut self.ordered_ranges[index];
            (*range, value)
        })
    }

    /// Iterates over all mapped ranges in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (AddressRange, &T)> {
        self.ordered_ranges.iter().map(|(range, value)| (*range, value))
    }

    fn search(&self, address: u32) -> Result<usize, usize> {
        self.ordered_ranges.binary_search_by(|(range, _)| {
            if address < range.start() {
                Ordering::Greater
            } else if address <= range.end() {
                Ordering::Equal
            } else {
                Ordering::Less
            }
        })
    }
}

#[derive(Error, Debug, Clone)]
pub enum AddressMapError {
    /// Attempt to add an address range that overlaps with a previously added address range.
    #[error("address range {0} overlaps with previously added address range")]
    OverlappingAddressRanges(AddressRange),
}
