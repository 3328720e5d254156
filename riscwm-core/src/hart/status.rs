use crate::{PrivilegeLevel, RawPrivilegeLevel};
use bitvec::{field::BitField, order::Lsb0, view::BitView};

/// Mask to be applied to mstatus to get sstatus.
pub const SSTATUS_MASK: u32 = 1 << idx::SD
    | 1 << idx::MXR
    | 1 << idx::SUM
    | 0b11 << idx::XS
    | 0b11 << idx::FS
    | 1 << idx::SPP
    | 1 << idx::SPIE
    | 1 << idx::UPIE
    | 1 << idx::SIE
    | 1 << idx::UIE;

/// Mask to be applied to mstatus to get ustatus.
pub const USTATUS_MASK: u32 = 1 << idx::UPIE | 1 << idx::UIE;

/// View of the mstatus register, of which sstatus and ustatus are restricted views.
///
/// The raw value lives in the hart's CSR file. Reading a field from a copy and writing it back
/// through [`CsrFile::set_status`](super::csr_file::CsrFile::set_status) is the way to update it.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Status(pub u32);

impl Status {
    /// Returns the xIE (Interrupt Enable) bit of `level`.
    pub fn ie(self, level: PrivilegeLevel) -> bool {
        self.0.view_bits::<Lsb0>()[idx::UIE + level as usize]
    }

    pub fn set_ie(&mut self, level: PrivilegeLevel, value: bool) {
        self.0
            .view_bits_mut::<Lsb0>()
            .set(idx::UIE + level as usize, value);
    }

    /// Returns the xPIE (Previous Interrupt Enable) bit of `level`.
    pub fn pie(self, level: PrivilegeLevel) -> bool {
        self.0.view_bits::<Lsb0>()[idx::UPIE + level as usize]
    }

    pub fn set_pie(&mut self, level: PrivilegeLevel, value: bool) {
        self.0
            .view_bits_mut::<Lsb0>()
            .set(idx::UPIE + level as usize, value);
    }

    /// Returns the previous privilege level saved by a trap into `level`.
    ///
    /// `U` mode has no previous privilege field, traps into it always came from `U` mode.
    pub fn pp(self, level: PrivilegeLevel) -> PrivilegeLevel {
        match level {
            PrivilegeLevel::Machine => self.mpp(),
            PrivilegeLevel::Supervisor => self.spp(),
            PrivilegeLevel::User => PrivilegeLevel::User,
        }
    }

    pub fn set_pp(&mut self, level: PrivilegeLevel, value: PrivilegeLevel) {
        match level {
            PrivilegeLevel::Machine => self.set_mpp(value.into()),
            PrivilegeLevel::Supervisor => self.set_spp(value.into()),
            PrivilegeLevel::User => {}
        }
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous Privilege level) field.
    ///
    /// The MPP field is **WARL**, the reserved level is never stored.
    pub fn mpp(self) -> PrivilegeLevel {
        let raw = RawPrivilegeLevel::from_u2(
            self.0.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        );
        PrivilegeLevel::try_from(raw).unwrap_or(PrivilegeLevel::User)
    }

    pub fn set_mpp(&mut self, value: RawPrivilegeLevel) {
        let Ok(value) = PrivilegeLevel::try_from(value) else {
            // MPP is a WARL field, so ignore illegal values.
            return;
        };
        self.0.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value as u8);
    }

    /// Returns the privilege level encoded by the SPP (S-mode Previous Privilege level) field.
    pub fn spp(self) -> PrivilegeLevel {
        match self.0.view_bits::<Lsb0>()[idx::SPP] {
            false => PrivilegeLevel::User,
            true => PrivilegeLevel::Supervisor,
        }
    }

    pub fn set_spp(&mut self, value: RawPrivilegeLevel) {
        match PrivilegeLevel::try_from(value) {
            Ok(value) if value <= PrivilegeLevel::Supervisor => {
                let bit = value as u8 != 0;
                self.0.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
            }
            _ => {} // SPP is a WARL field, so ignore illegal values.
        };
    }

    /// Returns `true` if the MPRV (Modify PRiVilege) bit is set.
    pub fn mprv(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MPRV]
    }

    pub fn set_mprv(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::MPRV, value);
    }

    /// Returns `true` if the TVM (Trap Virtual Memory) bit is set.
    pub fn tvm(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::TVM]
    }

    /// Returns `true` if the TSR (Trap SRET) bit is set.
    pub fn tsr(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::TSR]
    }

    /// Returns `true` if the SUM (permit Supervisor User Memory access) bit is set.
    pub fn sum(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::SUM]
    }

    /// Returns `true` if the MXR (Make eXecutable Readable) bit is set.
    pub fn mxr(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MXR]
    }

    /// Returns the 2-bit FS (F extension Status) field.
    pub fn fs(self) -> u8 {
        self.0.view_bits::<Lsb0>()[idx::FS..(idx::FS + 2)].load_le()
    }

    /// Applies a CSR write of `value` to the bits selected by `mask`.
    ///
    /// Fields are updated through their setters so WARL fields keep legal values. XS is
    /// read-only zero, and SD is recomputed from FS.
    pub fn written(self, value: u32, mask: u32) -> Self {
        let updated = self.0 & !mask | value & mask;
        let updated_bits = updated.view_bits::<Lsb0>();
        let plain_fields = (1 << idx::UIE
            | 1 << idx::SIE
            | 1 << idx::MIE
            | 1 << idx::UPIE
            | 1 << idx::SPIE
            | 1 << idx::MPIE
            | 0b11 << idx::FS
            | 1 << idx::MPRV
            | 1 << idx::SUM
            | 1 << idx::MXR
            | 1 << idx::TVM
            | 1 << idx::TW
            | 1 << idx::TSR)
            & mask;

        let mut status = Self(self.0 & !plain_fields | updated & plain_fields);
        if mask.view_bits::<Lsb0>()[idx::SPP] {
            status.set_spp(RawPrivilegeLevel::from_u2(updated_bits[idx::SPP] as u8));
        }
        if mask & (0b11 << idx::MPP) != 0 {
            status.set_mpp(RawPrivilegeLevel::from_u2(
                updated_bits[idx::MPP..(idx::MPP + 2)].load_le(),
            ));
        }
        let dirty = status.fs() == 0b11;
        status.0.view_bits_mut::<Lsb0>().set(idx::SD, dirty);
        status
    }
}

/// Bit indices into mstatus register.
mod idx {
    pub const UIE: usize = 0;
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const UPIE: usize = 4;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11;
    pub const FS: usize = 13;
    pub const XS: usize = 15;
    pub const MPRV: usize = 17;
    pub const SUM: usize = 18;
    pub const MXR: usize = 19;
    pub const TVM: usize = 20;
    pub const TW: usize = 21;
    pub const TSR: usize = 22;
    pub const SD: usize = 31;
}
