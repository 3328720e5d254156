//! Sv32 page-based virtual memory.
//!
//! > Sv32 implementations support a 32-bit virtual address space, divided into 4 KiB pages. An
//! > Sv32 virtual address is partitioned into a virtual page number (VPN) and page offset. When
//! > Sv32 virtual memory mode is selected in the MODE field of the satp register, supervisor
//! > virtual addresses are translated into supervisor physical addresses via a two-level page
//! > table.
//!
//! The accessed and dirty bits of page table entries are neither checked nor updated.

use super::{AccessContext, MemoryError};
use crate::memory::PhysicalMemorySpace;
use crate::{AccessType, PrivilegeLevel};
use log::trace;

pub const PAGE_SIZE: u32 = 1 << 12;
const PAGE_MASK: u32 = !(PAGE_SIZE - 1);
const PTE_SIZE: u32 = 4;

/// A page table entry, as a transient view over the word read from memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct PageTableEntry(u32);

impl PageTableEntry {
    fn is_valid(self) -> bool {
        self.0 & 0b1 != 0
    }

    /// The `X`, `W` and `R` bits (in that order from most to least significant).
    fn xwr(self) -> u32 {
        (self.0 >> 1) & 0b111
    }

    fn is_user(self) -> bool {
        (self.0 >> 4) & 0b1 != 0
    }

    fn ppn0(self) -> u32 {
        (self.0 >> 10) & 0x3FF
    }

    fn ppn1(self) -> u32 {
        (self.0 >> 20) & 0xFFF
    }

    fn ppn(self) -> u32 {
        self.0 >> 10
    }
}

fn vpn0(address: u32) -> u32 {
    (address >> 12) & 0x3FF
}

fn vpn1(address: u32) -> u32 {
    (address >> 22) & 0x3FF
}

/// Physical page number of the root page table, from `satp`.
fn satp_ppn(satp: u32) -> u32 {
    satp & 0x003F_FFFF
}

/// Remembers the last translated page for one (privilege level, access type) pair.
#[derive(Debug, Copy, Clone, Default)]
struct CacheEntry {
    valid: bool,
    virtual_page: u32,
    physical_page: u32,
}

/// One cache entry per privilege level that can be translated (`U`, `S`) and access type.
type HartCache = [[CacheEntry; 3]; 2];

#[derive(Debug, Default)]
pub struct VirtualMemoryManager {
    caches: Vec<HartCache>,
}

impl VirtualMemoryManager {
    pub fn new(harts: usize) -> Self {
        Self {
            caches: vec![HartCache::default(); harts],
        }
    }

    /// Drops all cached translations of hart `hart_id`.
    pub fn invalidate(&mut self, hart_id: usize) {
        if let Some(cache) = self.caches.get_mut(hart_id) {
            *cache = HartCache::default();
        }
    }

    /// Translates `address` for a `U` or `S` mode access with paging enabled.
    pub fn translate(
        &mut self,
        physical: &mut PhysicalMemorySpace,
        context: &AccessContext,
        address: u32,
        access_type: AccessType,
    ) -> Result<u32, MemoryError> {
        let level = match context.privilege {
            PrivilegeLevel::User => 0,
            PrivilegeLevel::Supervisor => 1,
            PrivilegeLevel::Machine => unreachable!("machine mode accesses are never translated"),
        };
        if self.caches.len() <= context.hart_id {
            self.caches
                .resize(context.hart_id + 1, HartCache::default());
        }
        let entry = &mut self.caches[context.hart_id][level][access_type as usize];
        if entry.valid && entry.virtual_page == address & PAGE_MASK {
            return Ok(entry.physical_page | (address & !PAGE_MASK));
        }
        let translated = walk(physical, context, address, access_type)?;
        trace!(
            "Translated {address:#010x} to {translated:#010x} for {access_type:?} in {} mode",
            context.privilege
        );
        *entry = CacheEntry {
            valid: true,
            virtual_page: address & PAGE_MASK,
            physical_page: translated & PAGE_MASK,
        };
        Ok(translated)
    }
}

/// Performs the two-level page table walk, checking permissions of the leaf entry.
fn walk(
    physical: &mut PhysicalMemorySpace,
    context: &AccessContext,
    address: u32,
    access_type: AccessType,
) -> Result<u32, MemoryError> {
    let read_pte = |physical: &mut PhysicalMemorySpace, pte_address: u32| {
        physical
            .read32(pte_address)
            .map(PageTableEntry)
            .map_err(|_| MemoryError::AccessFault)
    };

    let root = satp_ppn(context.satp).wrapping_mul(PAGE_SIZE);
    let mut pte = read_pte(physical, root.wrapping_add(vpn1(address) * PTE_SIZE))?;
    if !pte.is_valid() {
        return Err(MemoryError::PageFault);
    }
    let superpage = pte.xwr() != 0;
    if !superpage {
        // Pointer to the next level of the page table
        let table = pte.ppn().wrapping_mul(PAGE_SIZE);
        pte = read_pte(physical, table.wrapping_add(vpn0(address) * PTE_SIZE))?;
        if !pte.is_valid() || pte.xwr() == 0 {
            return Err(MemoryError::PageFault);
        }
    } else if pte.ppn0() != 0 {
        // Misaligned superpage
        return Err(MemoryError::PageFault);
    }

    // Write-only and write-execute pages are reserved
    if pte.xwr() & 0b011 == 0b010 {
        return Err(MemoryError::PageFault);
    }
    let mut permissions = pte.xwr();
    if context.mxr && permissions & 0b100 != 0 {
        permissions |= 0b001;
    }
    if permissions & (1 << access_type as u32) == 0 {
        return Err(MemoryError::PageFault);
    }
    match context.privilege {
        PrivilegeLevel::User if !pte.is_user() => return Err(MemoryError::PageFault),
        PrivilegeLevel::Supervisor
            if pte.is_user() && (!context.sum || access_type == AccessType::Execute) =>
        {
            return Err(MemoryError::PageFault)
        }
        _ => {}
    }

    let page_offset = address & !PAGE_MASK;
    let ppn0 = if superpage { vpn0(address) } else { pte.ppn0() };
    Ok(page_offset | (ppn0 << 12) | (pte.ppn1() << 22))
}
