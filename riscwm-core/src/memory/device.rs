//! The interface between the physical memory space and the memory-mapped devices it routes to.

use crate::address_range::{AddressRange, InvalidBoundsError};
use std::fmt::Debug;

/// A device occupying the physical addresses `start()..start() + length()`.
///
/// All addresses passed to the access methods are absolute physical addresses, the device
/// computes its own local offset. The physical memory space routes an access by its first byte
/// only, so a wide access may run past the end of the device. Devices must handle that without
/// panicking and return a defined value for every read.
///
/// Values are serialized in little-endian byte order. Only [`read8`](Self::read8) and
/// [`write8`](Self::write8) are required; the wider accesses are composed of byte accesses by
/// default, which devices with register semantics override.
///
/// Reads take `&mut self` because reading a device register may have side effects (e.g. popping
/// a byte from a FIFO).
pub trait MemoryDevice: Debug + Send {
    /// The lowest physical address of this device.
    fn start(&self) -> u32;

    /// The number of bytes this device occupies. Must be at least one.
    fn length(&self) -> u32;

    /// Short machine-friendly name, e.g. `"ram"`.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    fn read8(&mut self, address: u32) -> u8;

    fn write8(&mut self, address: u32, value: u8);

    fn read16(&mut self, address: u32) -> u16 {
        u16::from_le_bytes([self.read8(address), self.read8(address.wrapping_add(1))])
    }

    fn read32(&mut self, address: u32) -> u32 {
        self.read16(address) as u32 | (self.read16(address.wrapping_add(2)) as u32) << 16
    }

    fn read64(&mut self, address: u32) -> u64 {
        self.read32(address) as u64 | (self.read32(address.wrapping_add(4)) as u64) << 32
    }

    fn write16(&mut self, address: u32, value: u16) {
        let [low, high] = value.to_le_bytes();
        self.write8(address, low);
        self.write8(address.wrapping_add(1), high);
    }

    fn write32(&mut self, address: u32, value: u32) {
        self.write16(address, value as u16);
        self.write16(address.wrapping_add(2), (value >> 16) as u16);
    }

    fn write64(&mut self, address: u32, value: u64) {
        self.write32(address, value as u32);
        self.write32(address.wrapping_add(4), (value >> 32) as u32);
    }

    /// Changes the number of bytes this device occupies.
    ///
    /// Returns `false` if the device has a fixed size, which is the default.
    fn resize(&mut self, _length: u32) -> bool {
        false
    }

    /// The range of physical addresses this device occupies.
    fn range(&self) -> Result<AddressRange, InvalidBoundsError> {
        AddressRange::from_start_length(self.start(), self.length())
    }
}
