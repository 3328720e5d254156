//! Core Local Interruptor

use super::device::MemoryDevice;
use crate::time::TimeBase;
use log::warn;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Default physical base address of the CLINT.
pub const CLINT_BASE: u32 = 0x0200_0000;
/// Size of the CLINT register window (64 KiB).
pub const CLINT_LENGTH: u32 = 0x1_0000;

/// Offset of the first `msip` register (one 32-bit register per hart).
pub const MSIP_OFFSET: u32 = 0x0000;
/// Offset of the first `mtimecmp` register (one 64-bit register per hart).
pub const MTIMECMP_OFFSET: u32 = 0x4000;
/// Offset of the low word of the global `mtime` register.
pub const MTIME_OFFSET_LO: u32 = 0xBFF8;
/// Offset of the high word of the global `mtime` register.
pub const MTIME_OFFSET_HI: u32 = MTIME_OFFSET_LO + 4;

/// The per-hart CLINT registers, shared between the memory-mapped device and the harts that
/// derive their machine software and timer interrupt pending bits from them.
#[derive(Debug)]
pub struct ClintRegisters {
    msip: Box<[AtomicU32]>,
    mtimecmp: Box<[AtomicU64]>,
}

impl ClintRegisters {
    /// Registers for `harts` harts, with `msip` clear and `mtimecmp` at its maximum so no timer
    /// interrupt is pending until software programs one.
    pub fn new(harts: usize) -> Self {
        Self {
            msip: (0..harts).map(|_| AtomicU32::new(0)).collect(),
            mtimecmp: (0..harts)
                .map(|_| AtomicU64::new(i64::MAX as u64))
                .collect(),
        }
    }

    pub fn harts(&self) -> usize {
        self.msip.len()
    }

    /// Machine software interrupt pending for `hart`. `false` for unknown harts.
    pub fn msip(&self, hart: usize) -> bool {
        self.msip
            .get(hart)
            .is_some_and(|msip| msip.load(Ordering::Relaxed) & 1 != 0)
    }

    pub fn set_msip(&self, hart: usize, pending: bool) {
        if let Some(msip) = self.msip.get(hart) {
            msip.store(u32::from(pending), Ordering::Relaxed);
        }
    }

    /// The timer comparator of `hart`. `u64::MAX` for unknown harts.
    pub fn mtimecmp(&self, hart: usize) -> u64 {
        self.mtimecmp
            .get(hart)
            .map_or(u64::MAX, |mtimecmp| mtimecmp.load(Ordering::Relaxed))
    }

    pub fn set_mtimecmp(&self, hart: usize, value: u64) {
        if let Some(mtimecmp) = self.mtimecmp.get(hart) {
            mtimecmp.store(value, Ordering::Relaxed);
        }
    }
}

/// The memory-mapped CLINT register block.
///
/// Only 32-bit and 64-bit accesses are supported, 64-bit accesses are split into two 32-bit
/// accesses. Byte and halfword accesses are ignored and read as `0`.
#[derive(Debug)]
pub struct Clint {
    start: u32,
    registers: Arc<ClintRegisters>,
    time: Arc<TimeBase>,
}

impl Clint {
    pub fn new(start: u32, registers: Arc<ClintRegisters>, time: Arc<TimeBase>) -> Self {
        Self {
            start,
            registers,
            time,
        }
    }

    fn read_u32(&self, offset: u32) -> u32 {
        match offset {
            MSIP_OFFSET..=0x3FFF => {
                let hart = ((offset - MSIP_OFFSET) / 4) as usize;
                u32::from(self.registers.msip(hart))
            }
            MTIMECMP_OFFSET..=0xBFF7 => {
                let hart = ((offset - MTIMECMP_OFFSET) / 8) as usize;
                if hart >= self.registers.harts() {
                    return 0;
                }
                let mtimecmp = self.registers.mtimecmp(hart);
                if offset % 8 == 4 {
                    (mtimecmp >> 32) as u32
                } else {
                    mtimecmp as u32
                }
            }
            MTIME_OFFSET_LO => self.time.now() as u32,
            MTIME_OFFSET_HI => (self.time.now() >> 32) as u32,
            _ => 0,
        }
    }

    fn write_u32(&self, offset: u32, value: u32) {
        match offset {
            MSIP_OFFSET..=0x3FFF => {
                let hart = ((offset - MSIP_OFFSET) / 4) as usize;
                self.registers.set_msip(hart, value & 1 != 0);
            }
            MTIMECMP_OFFSET..=0xBFF7 => {
                let hart = ((offset - MTIMECMP_OFFSET) / 8) as usize;
                let old = self.registers.mtimecmp(hart);
                let new = if offset % 8 == 4 {
                    (old & 0xFFFF_FFFF) | (value as u64) << 32
                } else {
                    (old & 0xFFFF_FFFF_0000_0000) | value as u64
                };
                self.registers.set_mtimecmp(hart, new);
            }
            MTIME_OFFSET_LO => {
                let old = self.time.now();
                self.time.set((old & 0xFFFF_FFFF_0000_0000) | value as u64);
            }
            MTIME_OFFSET_HI => {
                let old = self.time.now();
                self.time.set((old & 0xFFFF_FFFF) | (value as u64) << 32);
            }
            _ => {}
        }
    }
}

impl MemoryDevice for Clint {
    fn start(&self) -> u32 {
        self.start
    }

    fn length(&self) -> u32 {
        CLINT_LENGTH
    }

    fn name(&self) -> &str {
        "clint"
    }

    fn description(&self) -> &str {
        "Core local interruptor"
    }

    fn read8(&mut self, address: u32) -> u8 {
        warn!("Ignoring byte read from CLINT at {address:#010x}");
        0
    }

    fn write8(&mut self, address: u32, _value: u8) {
        warn!("Ignoring byte write to CLINT at {address:#010x}");
    }

    fn read16(&mut self, address: u32) -> u16 {
        warn!("Ignoring halfword read from CLINT at {address:#010x}");
        0
    }

    fn write16(&mut self, address: u32, _value: u16) {
        warn!("Ignoring halfword write to CLINT at {address:#010x}");
    }

    fn read32(&mut self, address: u32) -> u32 {
        self.read_u32(address.wrapping_sub(self.start))
    }

    fn write32(&mut self, address: u32, value: u32) {
        self.write_u32(address.wrapping_sub(self.start), value);
    }

    fn read64(&mut self, address: u32) -> u64 {
        let offset = address.wrapping_sub(self.start);
        self.read_u32(offset) as u64 | (self.read_u32(offset.wrapping_add(4)) as u64) << 32
    }

    fn write64(&mut self, address: u32, value: u64) {
        let offset = address.wrapping_sub(self.start);
        self.write_u32(offset, value as u32);
        self.write_u32(offset.wrapping_add(4), (value >> 32) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clint(harts: usize) -> (Clint, Arc<ClintRegisters>, Arc<TimeBase>) {
        let registers = Arc::new(ClintRegisters::new(harts));
        let time = Arc::new(TimeBase::new());
        let clint = Clint::new(CLINT_BASE, Arc::clone(&registers), Arc::clone(&time));
        (clint, registers, time)
    }

    #[test]
    fn test_msip() {
        let (mut clint, registers, _) = clint(2);
        clint.write32(CLINT_BASE + 4, 1);
        assert!(!registers.msip(0));
        assert!(registers.msip(1));
        assert_eq!(1, clint.read32(CLINT_BASE + 4));
        clint.write32(CLINT_BASE + 4, 0);
        assert!(!registers.msip(1));
        // Out of range harts are ignored
        clint.write32(CLINT_BASE + 8, 1);
        assert_eq!(0, clint.read32(CLINT_BASE + 8));
    }

    #[test]
    fn test_mtimecmp() {
        let (mut clint, registers, _) = clint(2);
        assert_eq!(i64::MAX as u64, registers.mtimecmp(1));
        clint.write64(CLINT_BASE + 0x4008, 0x1234_5678_9ABC_DEF0);
        assert_eq!(0x1234_5678_9ABC_DEF0, registers.mtimecmp(1));
        clint.write32(CLINT_BASE + 0x400C, 0);
        assert_eq!(0x9ABC_DEF0, clint.read64(CLINT_BASE + 0x4008));
        assert_eq!(i64::MAX as u64, registers.mtimecmp(0));
    }

    #[test]
    fn test_mtime_write_then_read() {
        let (mut clint, _, time) = clint(1);
        clint.write32(CLINT_BASE + MTIME_OFFSET_LO, 0x0000_1000);
        clint.write32(CLINT_BASE + MTIME_OFFSET_HI, 0x0000_0002);
        let mtime = clint.read64(CLINT_BASE + MTIME_OFFSET_LO);
        let written = 0x0000_0002_0000_1000;
        assert!(mtime >= written);
        assert!(mtime - written < 1_000_000);
        assert!(time.now() >= written);
    }

    #[test]
    fn test_narrow_accesses_ignored() {
        let (mut clint, registers, _) = clint(1);
        clint.write8(CLINT_BASE, 1);
        clint.write16(CLINT_BASE, 1);
        assert!(!registers.msip(0));
        assert_eq!(0, clint.read8(CLINT_BASE + MTIME_OFFSET_LO));
    }
}
