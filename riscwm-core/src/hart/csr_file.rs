//! The control and status registers of a hart.

use super::status::{Status, SSTATUS_MASK, USTATUS_MASK};
use super::trap::{Exception, Tvec};
use super::Hart;
use crate::csr::{self, CsrSpecifier};
use crate::instruction::CsrOp;
use crate::PrivilegeLevel;

const_assert_eq!(csr::COUNT, 4096);

/// Exceptions that can be delegated to a lower privilege level (`medeleg`, `sedeleg`).
#[allow(clippy::identity_op)]
const DELEGATABLE_EXCEPTIONS_MASK: u32 = 0
    | (1 << 0) // instruction address misaligned
    | (1 << 1) // instruction access fault
    | (1 << 2) // illegal instruction
    | (1 << 3) // breakpoint
    | (1 << 4) // load address misaligned
    | (1 << 5) // load access fault
    | (1 << 6) // store/AMO address misaligned
    | (1 << 7) // store/AMO access fault
    | (1 << 8) // environment call from U-mode
    | (1 << 9) // environment call from S-mode
    | (1 << 12) // instruction page fault
    | (1 << 13) // load page fault
    | (1 << 15); // store/AMO page fault

/// Interrupt bits visible at the supervisor level (`sie`, `sip`, `mideleg`).
const SUPERVISOR_INTERRUPTS_MASK: u32 = 0x333;
/// Interrupt bits visible at the user level (`uie`, `uip`, `sideleg`).
const USER_INTERRUPTS_MASK: u32 = 0x111;
/// Interrupt bits that exist at all.
const ALL_INTERRUPTS_MASK: u32 = 0xBBB;
/// Pending bits software may set through `sip`: SSIP and USIP.
const SIP_WRITABLE_MASK: u32 = 0x3;
/// Pending bits software may set through `uip`: USIP.
const UIP_WRITABLE_MASK: u32 = 0x1;

/// Raw storage for all 4096 CSRs.
///
/// Registers with dedicated behavior (counters, `time`, views like `sstatus`) are resolved by
/// [`Hart::read_csr`] and [`Hart::write_csr`]; this only stores words.
#[derive(Debug, Clone)]
pub struct CsrFile {
    values: Vec<u32>,
}

impl Default for CsrFile {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrFile {
    pub fn new() -> Self {
        Self {
            values: vec![0; csr::COUNT],
        }
    }

    /// Creates a CSR file from previously saved values. Returns `None` on a length mismatch.
    pub fn from_values(values: Vec<u32>) -> Option<Self> {
        (values.len() == csr::COUNT).then_some(Self { values })
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    pub fn get(&self, specifier: CsrSpecifier) -> u32 {
        self.values[specifier as usize & (csr::COUNT - 1)]
    }

    pub fn set(&mut self, specifier: CsrSpecifier, value: u32) {
        self.values[specifier as usize & (csr::COUNT - 1)] = value;
    }

    pub fn status(&self) -> Status {
        Status(self.get(csr::MSTATUS))
    }

    pub fn set_status(&mut self, status: Status) {
        self.set(csr::MSTATUS, status.0);
    }

    /// The trap vector of `level`.
    pub fn tvec(&self, level: PrivilegeLevel) -> Tvec {
        Tvec(self.get(level_csr(level, csr::MTVEC)))
    }

    /// Returns `true` if exception or interrupt `code` is delegated away from `level` to the
    /// next lower level.
    pub fn delegates(&self, level: PrivilegeLevel, interrupt: bool, code: u32) -> bool {
        let deleg = match interrupt {
            false => level_csr(level, csr::MEDELEG),
            true => level_csr(level, csr::MIDELEG),
        };
        level != PrivilegeLevel::User && self.get(deleg) & (1 << code) != 0
    }
}

/// Maps a machine-level CSR onto its counterpart at `level`. The trap setup and handling CSRs
/// of the three levels share their low 8 bits.
pub fn level_csr(level: PrivilegeLevel, machine_csr: CsrSpecifier) -> CsrSpecifier {
    (machine_csr & 0xFF) | (level as CsrSpecifier) << 8
}

/// Side effects of a CSR write that the hart must act upon.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[must_use]
pub struct CsrWriteEffect {
    /// Cached address translations are stale.
    pub flush_translations: bool,
}

impl Hart {
    /// Executes the read-modify-write of a CSR instruction, returning the old value.
    ///
    /// `write_value` is `None` when the instruction does not write the CSR (`CSRRS`/`CSRRC` with
    /// a zero source). `read` is `false` for `CSRRW` with `rd = x0`, which must not cause any
    /// read side effects.
    pub(super) fn csr_instruction(
        &mut self,
        specifier: CsrSpecifier,
        op: CsrOp,
        write_value: Option<u32>,
        read: bool,
    ) -> Result<(u32, CsrWriteEffect), Exception> {
        if csr::required_privilege_level(specifier) > self.privilege {
            return Err(Exception::IllegalInstruction);
        }
        if write_value.is_some() && csr::is_read_only(specifier) {
            return Err(Exception::IllegalInstruction);
        }
        if specifier == csr::SATP
            && self.privilege == PrivilegeLevel::Supervisor
            && self.csrs.status().tvm()
        {
            return Err(Exception::IllegalInstruction);
        }
        let old = if read { self.read_csr(specifier) } else { 0 };
        let Some(value) = write_value else {
            return Ok((old, CsrWriteEffect::default()));
        };
        let current = if read { old } else { self.read_csr(specifier) };
        let new = match op {
            CsrOp::ReadWrite => value,
            CsrOp::ReadSet => current | value,
            CsrOp::ReadClear => current & !value,
        };
        Ok((old, self.write_csr(specifier, new)))
    }

    /// Reads a CSR the way a CSR instruction would, without any privilege checks.
    pub fn read_csr(&self, specifier: CsrSpecifier) -> u32 {
        match specifier {
            csr::CYCLE | csr::INSTRET | csr::MCYCLE | csr::MINSTRET => self.cycles as u32,
            csr::CYCLEH | csr::INSTRETH | csr::MCYCLEH | csr::MINSTRETH => {
                (self.cycles >> 32) as u32
            }
            csr::TIME => self.time.now() as u32,
            csr::TIMEH => (self.time.now() >> 32) as u32,
            csr::MHARTID => self.config.hart_id as u32,
            csr::MISA | csr::MVENDORID | csr::MARCHID | csr::MIMPID => 0,
            csr::FFLAGS | csr::FRM | csr::FCSR => 0,
            csr::USTATUS => self.csrs.get(csr::MSTATUS) & USTATUS_MASK,
            csr::SSTATUS => self.csrs.get(csr::MSTATUS) & SSTATUS_MASK,
            csr::UIE => self.csrs.get(csr::MIE) & USER_INTERRUPTS_MASK,
            csr::SIE => self.csrs.get(csr::MIE) & SUPERVISOR_INTERRUPTS_MASK,
            csr::UIP => self.pending_interrupts() & USER_INTERRUPTS_MASK,
            csr::SIP => self.pending_interrupts() & SUPERVISOR_INTERRUPTS_MASK,
            csr::MIP => self.pending_interrupts(),
            _ => self.csrs.get(specifier),
        }
    }

    /// Writes a CSR the way a CSR instruction would, without any privilege checks.
    ///
    /// Read-only fields and read-only registers keep their value.
    pub fn write_csr(&mut self, specifier: CsrSpecifier, value: u32) -> CsrWriteEffect {
        let mut effect = CsrWriteEffect::default();
        match specifier {
            csr::MCYCLE | csr::MINSTRET => {
                self.cycles = self.cycles & !0xFFFF_FFFF | value as u64;
            }
            csr::MCYCLEH | csr::MINSTRETH => {
                self.cycles = self.cycles & 0xFFFF_FFFF | (value as u64) << 32;
            }
            csr::FFLAGS | csr::FRM | csr::FCSR => {}
            csr::MSTATUS | csr::SSTATUS | csr::USTATUS => {
                let mask = match specifier {
                    csr::MSTATUS => !0,
                    csr::SSTATUS => SSTATUS_MASK,
                    _ => USTATUS_MASK,
                };
                let old = self.csrs.status();
                let new = old.written(value, mask);
                effect.flush_translations = old.sum() != new.sum() || old.mxr() != new.mxr();
                self.csrs.set_status(new);
            }
            csr::MIE => self.write_masked(csr::MIE, value, ALL_INTERRUPTS_MASK),
            csr::SIE => self.write_masked(csr::MIE, value, SUPERVISOR_INTERRUPTS_MASK),
            csr::UIE => self.write_masked(csr::MIE, value, USER_INTERRUPTS_MASK),
            // Machine level pending bits come from the CLINT
            csr::MIP => self.write_masked(csr::MIP, value, SUPERVISOR_INTERRUPTS_MASK),
            csr::SIP => self.write_masked(csr::MIP, value, SIP_WRITABLE_MASK),
            csr::UIP => self.write_masked(csr::MIP, value, UIP_WRITABLE_MASK),
            csr::MEDELEG | csr::SEDELEG => {
                self.csrs.set(specifier, value & DELEGATABLE_EXCEPTIONS_MASK)
            }
            csr::MIDELEG => self
                .csrs
                .set(specifier, value & SUPERVISOR_INTERRUPTS_MASK),
            csr::SIDELEG => self.csrs.set(specifier, value & USER_INTERRUPTS_MASK),
            csr::MTVEC | csr::STVEC | csr::UTVEC => {
                let tvec = Tvec(self.csrs.get(specifier)).written(value);
                self.csrs.set(specifier, tvec.0);
            }
            // Exception program counters are always at least 2-byte aligned
            csr::MEPC | csr::SEPC | csr::UEPC => self.csrs.set(specifier, value & !0b1),
            csr::SATP => {
                self.csrs.set(specifier, value);
                effect.flush_translations = true;
            }
            _ if csr::is_read_only(specifier) => {}
            _ => self.csrs.set(specifier, value),
        }
        effect
    }

    fn write_masked(&mut self, specifier: CsrSpecifier, value: u32, mask: u32) {
        let old = self.csrs.get(specifier);
        self.csrs.set(specifier, old & !mask | value & mask);
    }
}
