use super::device::MemoryDevice;
use log::trace;

/// Read-only memory holding a firmware image. Writes are silently discarded.
#[derive(Debug)]
pub struct Rom {
    start: u32,
    data: Vec<u8>,
}

impl Rom {
    /// Create a ROM device holding `data`, starting at `start`.
    ///
    /// Returns `None` if `data` is empty or does not fit in the address space.
    pub fn new(start: u32, data: Vec<u8>) -> Option<Self> {
        let length = u32::try_from(data.len()).ok()?;
        if length == 0 || start.checked_add(length - 1).is_none() {
            return None;
        }
        Some(Self { start, data })
    }

    fn read_bytes<const N: usize>(&self, address: u32) -> [u8; N] {
        let mut bytes = [0; N];
        let offset = address.wrapping_sub(self.start) as usize;
        if let Some(source) = self.data.get(offset..offset + N) {
            bytes.copy_from_slice(source);
        }
        bytes
    }
}

impl MemoryDevice for Rom {
    fn start(&self) -> u32 {
        self.start
    }

    fn length(&self) -> u32 {
        self.data.len() as u32
    }

    fn name(&self) -> &str {
        "rom"
    }

    fn description(&self) -> &str {
        "Firmware ROM"
    }

    fn read8(&mut self, address: u32) -> u8 {
        self.read_bytes::<1>(address)[0]
    }

    fn write8(&mut self, address: u32, value: u8) {
        trace!("Ignoring write of {value:#04x} to ROM at {address:#010x}");
    }

    fn read16(&mut self, address: u32) -> u16 {
        u16::from_le_bytes(self.read_bytes(address))
    }

    fn read32(&mut self, address: u32) -> u32 {
        u32::from_le_bytes(self.read_bytes(address))
    }

    fn read64(&mut self, address: u32) -> u64 {
        u64::from_le_bytes(self.read_bytes(address))
    }
}
