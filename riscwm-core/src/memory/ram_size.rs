use super::device::MemoryDevice;
use super::Ram;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Read-only 32-bit register reporting the current size of a [`Ram`] device.
///
/// It sits at `(ram.start - 1) & 0xFFFF_0000`, just below the RAM it describes. Only the register
/// address itself reads the size, any other byte reads as `0`. Writes are ignored.
#[derive(Debug)]
pub struct RamSizeDevice {
    start: u32,
    ram_length: Arc<AtomicU32>,
}

impl RamSizeDevice {
    pub fn new(ram: &Ram) -> Self {
        Self {
            start: ram.start().wrapping_sub(1) & 0xFFFF_0000,
            ram_length: ram.length_handle(),
        }
    }
}

impl MemoryDevice for RamSizeDevice {
    fn start(&self) -> u32 {
        self.start
    }

    fn length(&self) -> u32 {
        4
    }

    fn name(&self) -> &str {
        "ram_size"
    }

    fn description(&self) -> &str {
        "RAM size"
    }

    fn read8(&mut self, address: u32) -> u8 {
        self.read32(address) as u8
    }

    fn write8(&mut self, _address: u32, _value: u8) {}

    fn read16(&mut self, address: u32) -> u16 {
        self.read32(address) as u16
    }

    fn read32(&mut self, address: u32) -> u32 {
        if address == self.start {
            self.ram_length.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    fn read64(&mut self, address: u32) -> u64 {
        self.read32(address) as u64
    }

    fn write16(&mut self, _address: u32, _value: u16) {}

    fn write32(&mut self, _address: u32, _value: u32) {}

    fn write64(&mut self, _address: u32, _value: u64) {}
}
