//! Hart-side view of memory: address translation on top of the physical memory space.

mod sv32;

pub use sv32::{VirtualMemoryManager, PAGE_SIZE};

use crate::memory::PhysicalMemorySpace;
use crate::{AccessType, Alignment, PrivilegeLevel};
use std::sync::PoisonError;
use thiserror::Error;

macro_rules! access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        $(
            /// Invoke a read for the specified address.
            ///
            /// The address doesn't need to be naturally aligned, but the access fails with
            /// [`MemoryError::MisalignedAccess`] if the context doesn't support misaligned
            /// accesses.
            pub fn $read_fn(
                &mut self,
                context: &AccessContext,
                address: u32,
            ) -> Result<$u, MemoryError> {
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                self.read(context, &mut buf, address).map(|()| $u::from_le_bytes(buf))
            }

            /// Invoke a write for the specified address.
            ///
            /// The address doesn't need to be naturally aligned, but the access fails with
            /// [`MemoryError::MisalignedAccess`] if the context doesn't support misaligned
            /// accesses.
            pub fn $write_fn(
                &mut self,
                context: &AccessContext,
                address: u32,
                value: $u,
            ) -> Result<(), MemoryError> {
                self.write(context, &value.to_le_bytes(), address)
            }
        )*
    };
}

/// Everything about the accessing hart that determines how an address is translated.
///
/// Built by the hart for every access. `privilege` is the effective privilege of the access,
/// i.e. already takes `mstatus.MPRV` into account for loads and stores.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AccessContext {
    pub hart_id: usize,
    pub privilege: PrivilegeLevel,
    pub satp: u32,
    /// Permit supervisor user memory access.
    pub sum: bool,
    /// Make executable readable.
    pub mxr: bool,
    pub support_misaligned_memory_access: bool,
}

impl AccessContext {
    /// Context of a machine mode access, which is never translated.
    pub fn machine(hart_id: usize) -> Self {
        Self {
            hart_id,
            privilege: PrivilegeLevel::Machine,
            satp: 0,
            sum: false,
            mxr: false,
            support_misaligned_memory_access: true,
        }
    }

    fn paging_enabled(&self) -> bool {
        self.privilege != PrivilegeLevel::Machine && self.satp >> 31 != 0
    }
}

/// Access wrapper around the physical memory space to address it as memory from a hart's point
/// of view.
///
/// All hart-initiated accesses pass through here: instruction fetches, loads, stores and atomic
/// memory operations. Virtual addresses are translated through Sv32 when paging is enabled for
/// the access, physical accesses no device serves become access faults.
#[derive(Debug)]
pub struct Mmu {
    physical: PhysicalMemorySpace,
    vmm: VirtualMemoryManager,
}

impl Mmu {
    pub fn new(physical: PhysicalMemorySpace, harts: usize) -> Self {
        Self {
            physical,
            vmm: VirtualMemoryManager::new(harts),
        }
    }

    pub fn physical(&self) -> &PhysicalMemorySpace {
        &self.physical
    }

    pub fn physical_mut(&mut self) -> &mut PhysicalMemorySpace {
        &mut self.physical
    }

    /// Drops the cached translations of `hart_id`, e.g. after its page table root changed.
    pub fn invalidate(&mut self, hart_id: usize) {
        self.vmm.invalidate(hart_id);
    }

    /// Translates a virtual address into a physical one.
    ///
    /// Machine mode accesses and accesses with `satp.MODE` set to bare are not translated.
    pub fn translate(
        &mut self,
        context: &AccessContext,
        address: u32,
        access_type: AccessType,
    ) -> Result<u32, MemoryError> {
        if context.paging_enabled() {
            self.vmm
                .translate(&mut self.physical, context, address, access_type)
        } else {
            Ok(address)
        }
    }

    pub fn read_byte(&mut self, context: &AccessContext, address: u32) -> Result<u8, MemoryError> {
        let mut buf = [0];
        self.read(context, &mut buf, address).map(|()| buf[0])
    }

    pub fn write_byte(
        &mut self,
        context: &AccessContext,
        address: u32,
        value: u8,
    ) -> Result<(), MemoryError> {
        self.write(context, &[value], address)
    }

    access_fns! {
        read_halfword, write_halfword => u16,
        read_word, write_word => u32,
        read_doubleword, write_doubleword => u64,
    }

    /// Fetches one 16-bit instruction parcel.
    ///
    /// > Instructions are stored in memory as a sequence of 16-bit little-endian parcels,
    /// > regardless of memory system endianness. Parcels forming one instruction are stored at
    /// > increasing halfword addresses, with the lowest-addressed parcel holding the
    /// > lowest-numbered bits in the instruction specification.
    ///
    /// A 32-bit instruction is fetched as two parcels, so the second parcel may lie on another
    /// page than the first and fault on its own.
    pub fn fetch_parcel(
        &mut self,
        context: &AccessContext,
        address: u32,
    ) -> Result<u16, MemoryError> {
        if !Alignment::HALFWORD.is_aligned(address) {
            return Err(MemoryError::MisalignedAccess);
        }
        let physical_address = self.translate(context, address, AccessType::Execute)?;
        self.physical
            .read16(physical_address)
            .map_err(|_| MemoryError::AccessFault)
    }

    /// Atomically replaces the word at `address` with `operation(old)` and returns `old`.
    ///
    /// The physical memory space's atomic lock is held for the full read-modify-write.
    pub fn atomic_word(
        &mut self,
        context: &AccessContext,
        address: u32,
        operation: impl FnOnce(u32) -> u32,
    ) -> Result<u32, MemoryError> {
        let physical_address = self.atomic_address(context, address, AccessType::Write)?;
        let lock = self.physical.atomic_lock();
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let old = self
            .physical
            .read32(physical_address)
            .map_err(|_| MemoryError::AccessFault)?;
        self.physical
            .write32(physical_address, operation(old))
            .map_err(|_| MemoryError::AccessFault)?;
        Ok(old)
    }

    /// Loads the word at `address` and registers a reservation on it for the context's hart.
    pub fn load_reserved(
        &mut self,
        context: &AccessContext,
        address: u32,
    ) -> Result<u32, MemoryError> {
        let physical_address = self.atomic_address(context, address, AccessType::Read)?;
        let lock = self.physical.atomic_lock();
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let value = self
            .physical
            .read32(physical_address)
            .map_err(|_| MemoryError::AccessFault)?;
        self.physical.reserve(context.hart_id, physical_address);
        Ok(value)
    }

    /// Stores `value` at `address` only if the context's hart still holds a reservation on it.
    ///
    /// Returns whether the store happened. The hart's reservation is gone afterwards either way.
    pub fn store_conditional(
        &mut self,
        context: &AccessContext,
        address: u32,
        value: u32,
    ) -> Result<bool, MemoryError> {
        let physical_address = self.atomic_address(context, address, AccessType::Write)?;
        let lock = self.physical.atomic_lock();
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self
            .physical
            .take_reservation(context.hart_id, physical_address)
        {
            return Ok(false);
        }
        self.physical
            .write32(physical_address, value)
            .map_err(|_| MemoryError::AccessFault)?;
        Ok(true)
    }

    /// Atomic accesses must always be naturally aligned.
    fn atomic_address(
        &mut self,
        context: &AccessContext,
        address: u32,
        access_type: AccessType,
    ) -> Result<u32, MemoryError> {
        if !Alignment::WORD.is_aligned(address) {
            return Err(MemoryError::MisalignedAccess);
        }
        self.translate(context, address, access_type)
    }

    fn read(
        &mut self,
        context: &AccessContext,
        buf: &mut [u8],
        address: u32,
    ) -> Result<(), MemoryError> {
        if self.check_alignment(context, address, buf.len())? {
            let physical_address = self.translate(context, address, AccessType::Read)?;
            let result = match buf.len() {
                1 => self.physical.read8(physical_address).map(|v| buf.copy_from_slice(&[v])),
                2 => self
                    .physical
                    .read16(physical_address)
                    .map(|v| buf.copy_from_slice(&v.to_le_bytes())),
                4 => self
                    .physical
                    .read32(physical_address)
                    .map(|v| buf.copy_from_slice(&v.to_le_bytes())),
                8 => self
                    .physical
                    .read64(physical_address)
                    .map(|v| buf.copy_from_slice(&v.to_le_bytes())),
                size => unreachable!("unsupported access size {size}"),
            };
            return result.map_err(|_| MemoryError::AccessFault);
        }
        // Misaligned access crossing a page boundary, each byte is translated on its own
        for (offset, byte) in (0u32..).zip(buf.iter_mut()) {
            let physical_address =
                self.translate(context, address.wrapping_add(offset), AccessType::Read)?;
            *byte = self
                .physical
                .read8(physical_address)
                .map_err(|_| MemoryError::AccessFault)?;
        }
        Ok(())
    }

    fn write(
        &mut self,
        context: &AccessContext,
        buf: &[u8],
        address: u32,
    ) -> Result<(), MemoryError> {
        if self.check_alignment(context, address, buf.len())? {
            let physical_address = self.translate(context, address, AccessType::Write)?;
            let result = match *buf {
                [b0] => self.physical.write8(physical_address, b0),
                [b0, b1] => self
                    .physical
                    .write16(physical_address, u16::from_le_bytes([b0, b1])),
                [b0, b1, b2, b3] => self
                    .physical
                    .write32(physical_address, u32::from_le_bytes([b0, b1, b2, b3])),
                [b0, b1, b2, b3, b4, b5, b6, b7] => self.physical.write64(
                    physical_address,
                    u64::from_le_bytes([b0, b1, b2, b3, b4, b5, b6, b7]),
                ),
                _ => unreachable!("unsupported access size {}", buf.len()),
            };
            return result.map_err(|_| MemoryError::AccessFault);
        }
        // Translate every byte before writing any, so a fault leaves memory untouched
        let mut physical_addresses = [0u32; 8];
        for (offset, physical_address) in (0u32..).zip(&mut physical_addresses[..buf.len()]) {
            *physical_address =
                self.translate(context, address.wrapping_add(offset), AccessType::Write)?;
        }
        for (&physical_address, &byte) in physical_addresses.iter().zip(buf) {
            self.physical
                .write8(physical_address, byte)
                .map_err(|_| MemoryError::AccessFault)?;
        }
        Ok(())
    }

    /// Performs the alignment checks for an access at `address` of `size` bytes.
    ///
    /// Returns `true` if the access can be translated as a whole, and `false` if it is a
    /// misaligned access that crosses a page boundary and must be split into byte accesses.
    fn check_alignment(
        &self,
        context: &AccessContext,
        address: u32,
        size: usize,
    ) -> Result<bool, MemoryError> {
        let size = u32::try_from(size).map_err(|_| MemoryError::AccessFault)?;
        let aligned = Alignment::natural_for_size(size)
            .map(|alignment| alignment.is_aligned(address))
            // If `size` is not a power of two, then the access is always considered unaligned
            .unwrap_or(false);
        if aligned {
            return Ok(true);
        }
        if !context.support_misaligned_memory_access {
            return Err(MemoryError::MisalignedAccess);
        }
        Ok((address % PAGE_SIZE) + size <= PAGE_SIZE)
    }
}

/// Reason a hart-initiated memory access failed. The hart turns it into the exception matching
/// the kind of access it performed.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryError {
    #[error("misaligned access")]
    MisalignedAccess,
    #[error("access fault")]
    AccessFault,
    #[error("page fault")]
    PageFault,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Ram;

    const RAM_BASE: u32 = 0x8000_0000;
    const ROOT: u32 = RAM_BASE;
    const LEAF_TABLE: u32 = RAM_BASE + 0x1000;

    const PTE_V: u32 = 1 << 0;
    const PTE_R: u32 = 1 << 1;
    const PTE_W: u32 = 1 << 2;
    const PTE_X: u32 = 1 << 3;
    const PTE_U: u32 = 1 << 4;

    fn mmu() -> Mmu {
        let mut physical = PhysicalMemorySpace::new();
        physical
            .add_device(Box::new(Ram::new(RAM_BASE, 0x10_0000).unwrap()))
            .unwrap();
        Mmu::new(physical, 2)
    }

    fn pte(physical_address: u32, flags: u32) -> u32 {
        (physical_address >> 12) << 10 | flags
    }

    fn context(privilege: PrivilegeLevel) -> AccessContext {
        AccessContext {
            hart_id: 0,
            privilege,
            satp: 1 << 31 | ROOT >> 12,
            sum: false,
            mxr: false,
            support_misaligned_memory_access: true,
        }
    }

    /// Maps virtual page `0x4000_0000` to `RAM_BASE + 0x8000` through a two-level walk.
    fn map_page(mmu: &mut Mmu, flags: u32) {
        let physical = mmu.physical_mut();
        physical
            .write32(ROOT + (0x4000_0000 >> 22) * 4, pte(LEAF_TABLE, PTE_V))
            .unwrap();
        physical
            .write32(LEAF_TABLE, pte(RAM_BASE + 0x8000, flags | PTE_V))
            .unwrap();
    }

    #[test]
    fn test_identity_without_paging() {
        let mut mmu = mmu();
        let machine = AccessContext::machine(0);
        mmu.write_word(&machine, RAM_BASE + 8, 0xDEAD_BEEF).unwrap();
        assert_eq!(Ok(0xDEAD_BEEF), mmu.read_word(&machine, RAM_BASE + 8));
        let mut bare = context(PrivilegeLevel::Supervisor);
        bare.satp = 0;
        assert_eq!(Ok(0xBEEF), mmu.read_halfword(&bare, RAM_BASE + 8));
        assert_eq!(
            Err(MemoryError::AccessFault),
            mmu.read_word(&machine, 0x1000)
        );
    }

    #[test]
    fn test_two_level_walk() {
        let mut mmu = mmu();
        map_page(&mut mmu, PTE_R | PTE_W);
        let supervisor = context(PrivilegeLevel::Supervisor);
        mmu.write_word(&supervisor, 0x4000_0010, 42).unwrap();
        assert_eq!(
            Ok(42),
            mmu.physical_mut().read32(RAM_BASE + 0x8010)
        );
        assert_eq!(
            Ok(RAM_BASE + 0x8FFC),
            mmu.translate(&supervisor, 0x4000_0FFC, AccessType::Read)
        );
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(&supervisor, 0x4000_0000, AccessType::Execute)
        );
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.read_word(&supervisor, 0x4000_1000)
        );
    }

    #[test]
    fn test_user_pages() {
        let mut mmu = mmu();
        map_page(&mut mmu, PTE_R | PTE_X | PTE_U);
        let user = context(PrivilegeLevel::User);
        assert!(mmu.read_word(&user, 0x4000_0000).is_ok());

        let mut supervisor = context(PrivilegeLevel::Supervisor);
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.read_word(&supervisor, 0x4000_0000)
        );
        supervisor.sum = true;
        assert!(mmu.read_word(&supervisor, 0x4000_0000).is_ok());
        // Never executable from supervisor mode, even with SUM
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.fetch_parcel(&supervisor, 0x4000_0000)
        );
    }

    #[test]
    fn test_user_cannot_access_supervisor_page() {
        let mut mmu = mmu();
        map_page(&mut mmu, PTE_R | PTE_W);
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.read_word(&context(PrivilegeLevel::User), 0x4000_0000)
        );
    }

    #[test]
    fn test_make_executable_readable() {
        let mut mmu = mmu();
        map_page(&mut mmu, PTE_X);
        let mut supervisor = context(PrivilegeLevel::Supervisor);
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.read_word(&supervisor, 0x4000_0000)
        );
        supervisor.mxr = true;
        mmu.invalidate(0);
        assert!(mmu.read_word(&supervisor, 0x4000_0000).is_ok());
    }

    #[test]
    fn test_superpage() {
        let mut mmu = mmu();
        // 4 MiB superpage at virtual 0xC000_0000 onto physical 0x8000_0000
        mmu.physical_mut()
            .write32(ROOT + (0xC000_0000 >> 22) * 4, pte(RAM_BASE, PTE_V | PTE_R))
            .unwrap();
        let supervisor = context(PrivilegeLevel::Supervisor);
        assert_eq!(
            Ok(RAM_BASE + 0x1_2345),
            mmu.translate(&supervisor, 0xC001_2345, AccessType::Read)
        );
    }

    #[test]
    fn test_misaligned_superpage_faults() {
        let mut mmu = mmu();
        mmu.physical_mut()
            .write32(
                ROOT + (0xC000_0000 >> 22) * 4,
                pte(RAM_BASE + 0x1000, PTE_V | PTE_R),
            )
            .unwrap();
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(
                &context(PrivilegeLevel::Supervisor),
                0xC000_0000,
                AccessType::Read
            )
        );
    }

    #[test]
    fn test_cache_is_stale_until_invalidated() {
        let mut mmu = mmu();
        map_page(&mut mmu, PTE_R);
        let supervisor = context(PrivilegeLevel::Supervisor);
        assert!(mmu.read_word(&supervisor, 0x4000_0000).is_ok());
        mmu.physical_mut().write32(LEAF_TABLE, 0).unwrap();
        assert!(mmu.read_word(&supervisor, 0x4000_0000).is_ok());
        mmu.invalidate(0);
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.read_word(&supervisor, 0x4000_0000)
        );
    }

    #[test]
    fn test_misaligned_accesses() {
        let mut mmu = mmu();
        let mut machine = AccessContext::machine(0);
        mmu.write_word(&machine, RAM_BASE + 0xFFE, 0x1122_3344).unwrap();
        assert_eq!(Ok(0x1122_3344), mmu.read_word(&machine, RAM_BASE + 0xFFE));
        assert_eq!(Ok(0x2233), mmu.read_halfword(&machine, RAM_BASE + 0xFFF));
        machine.support_misaligned_memory_access = false;
        assert_eq!(
            Err(MemoryError::MisalignedAccess),
            mmu.read_word(&machine, RAM_BASE + 0xFFE)
        );
        assert_eq!(
            Err(MemoryError::MisalignedAccess),
            mmu.atomic_word(&AccessContext::machine(0), RAM_BASE + 2, |v| v)
        );
    }

    #[test]
    fn test_atomic_and_reservations() {
        let mut mmu = mmu();
        let hart0 = AccessContext::machine(0);
        let hart1 = AccessContext::machine(1);
        mmu.write_word(&hart0, RAM_BASE, 5).unwrap();
        assert_eq!(Ok(5), mmu.atomic_word(&hart0, RAM_BASE, |v| v + 3));
        assert_eq!(Ok(8), mmu.read_word(&hart1, RAM_BASE));

        assert_eq!(Ok(8), mmu.load_reserved(&hart0, RAM_BASE));
        assert_eq!(Ok(true), mmu.store_conditional(&hart0, RAM_BASE, 9));
        assert_eq!(Ok(false), mmu.store_conditional(&hart0, RAM_BASE, 10));
        assert_eq!(Ok(9), mmu.read_word(&hart0, RAM_BASE));

        mmu.load_reserved(&hart0, RAM_BASE).unwrap();
        mmu.write_byte(&hart1, RAM_BASE + 3, 0).unwrap();
        assert_eq!(Ok(false), mmu.store_conditional(&hart0, RAM_BASE, 11));
    }
}
