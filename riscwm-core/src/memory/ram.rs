use super::device::MemoryDevice;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Byte-based RAM with support for misaligned memory access.
///
/// This can be categorized as *main memory* according to the types of memory resources defined by
/// the RISC-V spec. The backing buffer can be resized, which truncates or zero-extends it.
#[derive(Debug)]
pub struct Ram {
    start: u32,
    data: Vec<u8>,
    /// Shared with observers such as [`RamSizeDevice`](super::RamSizeDevice).
    length: Arc<AtomicU32>,
}

impl Ram {
    /// Create a new zero-initialized RAM device of `size` bytes starting at `start`.
    ///
    /// Returns `None` if `size` is zero or the device would not fit in the address space.
    pub fn new(start: u32, size: u32) -> Option<Self> {
        if size == 0 || start.checked_add(size - 1).is_none() {
            return None;
        }
        Some(Self {
            start,
            data: vec![0; size as usize],
            length: Arc::new(AtomicU32::new(size)),
        })
    }

    /// Returns a handle that always reflects the current size of this RAM.
    pub fn length_handle(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.length)
    }

    /// Copies `bytes` into RAM starting at physical address `address`, ignoring any bytes that
    /// fall outside of this device.
    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        let Some(offset) = self.offset(address) else {
            return;
        };
        let end = (offset + bytes.len()).min(self.data.len());
        if offset < end {
            self.data[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn offset(&self, address: u32) -> Option<usize> {
        address.checked_sub(self.start).map(|offset| offset as usize)
    }

    fn read_bytes<const N: usize>(&self, address: u32) -> [u8; N] {
        let mut bytes = [0; N];
        if let Some(source) = self
            .offset(address)
            .and_then(|offset| self.data.get(offset..offset + N))
        {
            bytes.copy_from_slice(source);
        }
        bytes
    }

    fn write_bytes<const N: usize>(&mut self, address: u32, bytes: [u8; N]) {
        if let Some(offset) = self.offset(address) {
            if let Some(destination) = self.data.get_mut(offset..offset + N) {
                destination.copy_from_slice(&bytes);
            }
        }
    }
}

impl MemoryDevice for Ram {
    fn start(&self) -> u32 {
        self.start
    }

    fn length(&self) -> u32 {
        self.data.len() as u32
    }

    fn name(&self) -> &str {
        "ram"
    }

    fn description(&self) -> &str {
        "Main memory"
    }

    fn read8(&mut self, address: u32) -> u8 {
        self.read_bytes::<1>(address)[0]
    }

    fn write8(&mut self, address: u32, value: u8) {
        self.write_bytes(address, [value]);
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

    fn write16(&mut self, address: u32, value: u16) {
        self.write_bytes(address, value.to_le_bytes());
    }

    fn write32(&mut self, address: u32, value: u32) {
        self.write_bytes(address, value.to_le_bytes());
    }

    fn write64(&mut self, address: u32, value: u64) {
        self.write_bytes(address, value.to_le_bytes());
    }

    fn resize(&mut self, length: u32) -> bool {
        if length == 0 || self.start.checked_add(length - 1).is_none() {
            return false;
        }
        self.data.resize(length as usize, 0);
        self.length.store(length, Ordering::Relaxed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian() {
        let mut ram = Ram::new(0x8000_0000, 16).unwrap();
        ram.write32(0x8000_0000, 0x1234_5678);
        assert_eq!(0x78, ram.read8(0x8000_0000));
        assert_eq!(0x12, ram.read8(0x8000_0003));
        assert_eq!(0x1234, ram.read16(0x8000_0002));
        ram.write64(0x8000_0008, 0x0102_0304_0506_0708);
        assert_eq!(0x0506_0708, ram.read32(0x8000_0008));
        assert_eq!(0x0102_0304_0506_0708, ram.read64(0x8000_0008));
        // Misaligned, bytes 6 and 7 were never written
        assert_eq!(0x0708_0000, ram.read32(0x8000_0006));
        assert_eq!(0x0000_1234, ram.read32(0x8000_0002));
        assert_eq!(0x0800, ram.read16(0x8000_0007));
    }

    #[test]
    fn test_resize() {
        let mut ram = Ram::new(0x8000_0000, 8).unwrap();
        let length = ram.length_handle();
        ram.write8(0x8000_0007, 0xAB);
        assert!(ram.resize(4));
        assert_eq!(4, length.load(Ordering::Relaxed));
        assert!(ram.resize(16));
        assert_eq!(16, ram.length());
        // Truncated bytes come back zeroed
        assert_eq!(0, ram.read8(0x8000_0007));
        assert!(!ram.resize(0));
    }

    #[test]
    fn test_load_clips() {
        let mut ram = Ram::new(0x100, 4).unwrap();
        ram.load(0x102, &[1, 2, 3, 4]);
        assert_eq!(&[0, 0, 1, 2], ram.as_bytes());
        assert!(Ram::new(0xFFFF_FFF0, 0x20).is_none());
    }
}
