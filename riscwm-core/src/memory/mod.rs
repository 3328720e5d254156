//! The physical address space and the memory-mapped devices that populate it.

mod clint;
mod device;
mod fifo;
mod print;
mod ram;
mod ram_size;
mod rom;

pub use clint::{Clint, ClintRegisters, CLINT_BASE, CLINT_LENGTH};
pub use device::MemoryDevice;
pub use fifo::{BasicFifo, FifoHandle};
pub use print::{CaptureSink, FifoPrint};
pub use ram::Ram;
pub use ram_size::RamSizeDevice;
pub use rom::Rom;

use crate::address_map::{AddressMap, AddressMapError};
use crate::address_range::InvalidBoundsError;
use log::debug;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Size of the naturally aligned block covered by an `LR.W` reservation.
const RESERVATION_GRANULE_MASK: u32 = !0xF;

/// Sparse 32-bit physical address space made of non-overlapping [`MemoryDevice`]s.
///
/// An access is routed to the device that claims its first byte, and the device decides what the
/// remaining bytes mean. This lets a one-byte register take a word store. Accesses starting at
/// an address that no device claims fail with a [`BusError`], which the MMU turns into an access
/// fault.
///
/// The space also owns the lock that makes atomic memory operations indivisible across harts,
/// and the `LR.W`/`SC.W` reservations.
#[derive(Debug, Default)]
pub struct PhysicalMemorySpace {
    devices: Vec<Box<dyn MemoryDevice>>,
    map: AddressMap<usize>,
    atomic_lock: Arc<Mutex<()>>,
    /// `(hart_id, granule address)` pairs.
    reservations: Vec<(usize, u32)>,
}

impl PhysicalMemorySpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `device` to the address space and returns its index.
    ///
    /// Fails if the device's range is empty, runs past the end of the address space, or overlaps
    /// a device that was added before.
    pub fn add_device(&mut self, device: Box<dyn MemoryDevice>) -> Result<usize, MapError> {
        let range = device.range().map_err(|source| MapError::InvalidBounds {
            name: device.name().to_owned(),
            source,
        })?;
        let index = self.devices.len();
        self.map.insert(range, index)?;
        debug!(
            "Mapped device {} ({}) at {range}",
            device.name(),
            device.description()
        );
        self.devices.push(device);
        Ok(index)
    }

    /// Returns the device with index `index`.
    pub fn device(&self, index: usize) -> Option<&dyn MemoryDevice> {
        self.devices.get(index).map(|device| device.as_ref())
    }

    /// Iterates over all devices in the order they were added.
    pub fn devices(&self) -> impl Iterator<Item = &dyn MemoryDevice> {
        self.devices.iter().map(|device| device.as_ref())
    }

    /// Resizes the device with index `index` and updates the address map accordingly.
    ///
    /// On failure the device keeps its previous size.
    pub fn resize_device(&mut self, index: usize, length: u32) -> Result<(), MapError> {
        let device = self
            .devices
            .get_mut(index)
            .ok_or(MapError::UnknownDevice(index))?;
        let previous_length = device.length();
        if !device.resize(length) {
            return Err(MapError::FixedSize(device.name().to_owned()));
        }
        match self.rebuild_map() {
            Ok(map) => {
                self.map = map;
                Ok(())
            }
            Err(err) => {
                self.devices[index].resize(previous_length);
                Err(err)
            }
        }
    }

    fn rebuild_map(&self) -> Result<AddressMap<usize>, MapError> {
        let mut map = AddressMap::new();
        for (index, device) in self.devices.iter().enumerate() {
            let range = device.range().map_err(|source| MapError::InvalidBounds {
                name: device.name().to_owned(),
                source,
            })?;
            map.insert(range, index)?;
        }
        Ok(map)
    }

    /// Returns a handle to the lock that must be held for the full duration of an atomic memory
    /// operation.
    pub fn atomic_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.atomic_lock)
    }

    /// Finds the device that claims `address`.
    fn route(&mut self, address: u32) -> Result<&mut dyn MemoryDevice, BusError> {
        let (_, &index) = self
            .map
            .range_value(address)
            .ok_or(BusError::Unmapped { address })?;
        Ok(self.devices[index].as_mut())
    }

    pub fn read8(&mut self, address: u32) -> Result<u8, BusError> {
        Ok(self.route(address)?.read8(address))
    }

    pub fn read16(&mut self, address: u32) -> Result<u16, BusError> {
        Ok(self.route(address)?.read16(address))
    }

    pub fn read32(&mut self, address: u32) -> Result<u32, BusError> {
        Ok(self.route(address)?.read32(address))
    }

    pub fn read64(&mut self, address: u32) -> Result<u64, BusError> {
        Ok(self.route(address)?.read64(address))
    }

    pub fn write8(&mut self, address: u32, value: u8) -> Result<(), BusError> {
        self.route(address)?.write8(address, value);
        self.clear_reservations(address, 1);
        Ok(())
    }

    pub fn write16(&mut self, address: u32, value: u16) -> Result<(), BusError> {
        self.route(address)?.write16(address, value);
        self.clear_reservations(address, 2);
        Ok(())
    }

    pub fn write32(&mut self, address: u32, value: u32) -> Result<(), BusError> {
        self.route(address)?.write32(address, value);
        self.clear_reservations(address, 4);
        Ok(())
    }

    pub fn write64(&mut self, address: u32, value: u64) -> Result<(), BusError> {
        self.route(address)?.write64(address, value);
        self.clear_reservations(address, 8);
        Ok(())
    }

    /// Writes `bytes` starting at `address` one byte at a time, e.g. to load a program image.
    /// Stops at the first byte that cannot be written.
    pub fn load(&mut self, address: u32, bytes: &[u8]) -> Result<(), BusError> {
        for (offset, &byte) in (0u32..).zip(bytes) {
            self.write8(address.wrapping_add(offset), byte)?;
        }
        Ok(())
    }

    /// Registers a reservation for `hart_id` on the granule containing `address`, replacing any
    /// reservation the hart held before.
    pub fn reserve(&mut self, hart_id: usize, address: u32) {
        self.reservations.retain(|&(hart, _)| hart != hart_id);
        self.reservations
            .push((hart_id, address & RESERVATION_GRANULE_MASK));
    }

    /// Removes the reservation of `hart_id`, returning `true` if it covered `address`.
    pub fn take_reservation(&mut self, hart_id: usize, address: u32) -> bool {
        let granule = address & RESERVATION_GRANULE_MASK;
        match self
            .reservations
            .iter()
            .position(|&(hart, _)| hart == hart_id)
        {
            Some(index) => self.reservations.swap_remove(index).1 == granule,
            None => false,
        }
    }

    /// Removes every reservation on a granule touched by a write of `size` bytes at `address`.
    fn clear_reservations(&mut self, address: u32, size: u32) {
        if self.reservations.is_empty() {
            return;
        }
        let first = address & RESERVATION_GRANULE_MASK;
        let last = address.wrapping_add(size - 1) & RESERVATION_GRANULE_MASK;
        self.reservations
            .retain(|&(_, granule)| granule != first && granule != last);
    }
}

/// Failure to add or resize a device in a [`PhysicalMemorySpace`].
#[derive(Error, Debug)]
pub enum MapError {
    #[error("device {name} does not occupy a valid address range")]
    InvalidBounds {
        name: String,
        #[source]
        source: InvalidBoundsError,
    },
    #[error(transparent)]
    Overlap(#[from] AddressMapError),
    #[error("device {0} cannot be resized")]
    FixedSize(String),
    #[error("no device with index {0}")]
    UnknownDevice(usize),
}

/// A physical access that no device can serve.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum BusError {
    #[error("no device mapped at physical address {address:#010x}")]
    Unmapped { address: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> PhysicalMemorySpace {
        let mut space = PhysicalMemorySpace::new();
        space
            .add_device(Box::new(Ram::new(0x8000_0000, 0x100).unwrap()))
            .unwrap();
        space
            .add_device(Box::new(Rom::new(0x1000, vec![1, 2, 3, 4]).unwrap()))
            .unwrap();
        space
    }

    #[test]
    fn test_routing() {
        let mut space = space();
        space.write32(0x8000_0010, 0xCAFE_BABE).unwrap();
        assert_eq!(Ok(0xCAFE_BABE), space.read32(0x8000_0010));
        assert_eq!(Ok(0x0403_0201), space.read32(0x1000));
        assert_eq!(
            Err(BusError::Unmapped { address: 0x2000 }),
            space.read8(0x2000)
        );
        // Bytes past the end of a memory device read as zero and are never written
        assert_eq!(Ok(0), space.read32(0x1002));
        assert_eq!(Ok(()), space.write64(0x8000_00FC, u64::MAX));
        assert_eq!(Ok(0), space.read32(0x8000_00FC));
    }

    #[test]
    fn test_wide_access_to_byte_registers() {
        let mut space = PhysicalMemorySpace::new();
        let sink = CaptureSink::new();
        space
            .add_device(Box::new(FifoPrint::with_sink(0x1000_0000, Box::new(sink.clone()))))
            .unwrap();
        let fifo = BasicFifo::new(0x1000_1000);
        let handle = fifo.handle();
        space.add_device(Box::new(fifo)).unwrap();
        let ram = Ram::new(0x8000_0000, 0x100).unwrap();
        space.add_device(Box::new(RamSizeDevice::new(&ram))).unwrap();
        space.add_device(Box::new(ram)).unwrap();

        space.write32(0x1000_0000, b'O' as u32).unwrap();
        space.write16(0x1000_0000, b'k' as u16).unwrap();
        assert_eq!("Ok", sink.text());

        handle.set_read_buffer(b"x");
        assert_eq!(Ok(1), space.read32(0x1000_1001));
        assert_eq!(Ok(b'x' as u32), space.read32(0x1000_1000));
        space.write32(0x1000_1000, 7).unwrap();
        space.write32(0x1000_1002, 1).unwrap();
        assert_eq!(Some(vec![7]), handle.write_buffer_if_ready());

        assert_eq!(Ok(0x100), space.read64(0x7FFF_0000));
    }

    #[test]
    fn test_overlap_rejected() {
        let mut space = space();
        let result = space.add_device(Box::new(Ram::new(0x8000_00F0, 0x100).unwrap()));
        assert!(matches!(result, Err(MapError::Overlap(_))));
        assert_eq!(2, space.devices().count());
    }

    #[test]
    fn test_resize_device() {
        let mut space = space();
        assert!(space.read8(0x8000_0100).is_err());
        space.resize_device(0, 0x200).unwrap();
        assert_eq!(Ok(0), space.read8(0x8000_0100));
        assert!(matches!(
            space.resize_device(1, 8),
            Err(MapError::FixedSize(_))
        ));
    }

    #[test]
    fn test_reservations() {
        let mut space = space();
        space.reserve(0, 0x8000_0010);
        space.reserve(1, 0x8000_0014);
        // A write by anyone to the granule clears every reservation on it
        space.write8(0x8000_001F, 1).unwrap();
        assert!(!space.take_reservation(0, 0x8000_0010));
        assert!(!space.take_reservation(1, 0x8000_0014));

        space.reserve(0, 0x8000_0010);
        space.write32(0x8000_0020, 1).unwrap();
        assert!(space.take_reservation(0, 0x8000_001C));
        // Taking a reservation consumes it
        assert!(!space.take_reservation(0, 0x8000_0010));

        space.reserve(0, 0x8000_0010);
        assert!(!space.take_reservation(0, 0x8000_0040));
    }

    #[test]
    fn test_load() {
        let mut space = space();
        space.load(0x8000_0000, &[0x13, 0, 0, 0]).unwrap();
        assert_eq!(Ok(0x13), space.read32(0x8000_0000));
        assert!(space.load(0x8000_00FE, &[1, 2, 3]).is_err());
    }
}
