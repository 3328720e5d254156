//! Specifiers for all CSRs with dedicated behavior.
//!
//! Any other 12-bit specifier still addresses a plain storage word in the hart's CSR file.
//! Debug-mode CSRs and the hypervisor extension are not supported.

use crate::RawPrivilegeLevel;

/// 12-bit CSR address. Unused addresses are valid specifiers too.
pub type CsrSpecifier = u16;

pub const COUNT: usize = 1 << 12;

// User trap setup and handling (`0x000..=0x044`).
pub const USTATUS: CsrSpecifier = 0x000;
pub const UIE: CsrSpecifier = 0x004;
pub const UTVEC: CsrSpecifier = 0x005;
pub const USCRATCH: CsrSpecifier = 0x040;
pub const UEPC: CsrSpecifier = 0x041;
pub const UCAUSE: CsrSpecifier = 0x042;
pub const UTVAL: CsrSpecifier = 0x043;
pub const UIP: CsrSpecifier = 0x044;

// Unprivileged floating-point CSRs (`0x001..=0x003`).
pub const FFLAGS: CsrSpecifier = 0x001;
pub const FRM: CsrSpecifier = 0x002;
/// [`FRM`] and [`FFLAGS`] in one register.
pub const FCSR: CsrSpecifier = 0x003;

// Unprivileged counters/timers (`0xC00..=0xC02`, `0xC80..=0xC82`).
pub const CYCLE: CsrSpecifier = 0xC00;
pub const TIME: CsrSpecifier = 0xC01;
pub const INSTRET: CsrSpecifier = 0xC02;
pub const CYCLEH: CsrSpecifier = 0xC80;
pub const TIMEH: CsrSpecifier = 0xC81;
pub const INSTRETH: CsrSpecifier = 0xC82;

// Supervisor trap setup (`0x100..=0x106`).
pub const SSTATUS: CsrSpecifier = 0x100;
pub const SEDELEG: CsrSpecifier = 0x102;
pub const SIDELEG: CsrSpecifier = 0x103;
pub const SIE: CsrSpecifier = 0x104;
pub const STVEC: CsrSpecifier = 0x105;
pub const SCOUNTEREN: CsrSpecifier = 0x106;

// Supervisor trap handling (`0x140..=0x144`).
pub const SSCRATCH: CsrSpecifier = 0x140;
pub const SEPC: CsrSpecifier = 0x141;
pub const SCAUSE: CsrSpecifier = 0x142;
pub const STVAL: CsrSpecifier = 0x143;
pub const SIP: CsrSpecifier = 0x144;

// Supervisor protection and translation (`0x180`).
/// `MODE` in bit 31, `ASID` in bits 30:22, root page table PPN in bits 21:0.
pub const SATP: CsrSpecifier = 0x180;

// Machine information registers (`0xF11..=0xF14`).
pub const MVENDORID: CsrSpecifier = 0xF11;
pub const MARCHID: CsrSpecifier = 0xF12;
pub const MIMPID: CsrSpecifier = 0xF13;
pub const MHARTID: CsrSpecifier = 0xF14;

// Machine trap setup (`0x300..=0x306`).
pub const MSTATUS: CsrSpecifier = 0x300;
/// Reads as zero, so the ISA has to be discovered by other means.
pub const MISA: CsrSpecifier = 0x301;
pub const MEDELEG: CsrSpecifier = 0x302;
pub const MIDELEG: CsrSpecifier = 0x303;
pub const MIE: CsrSpecifier = 0x304;
pub const MTVEC: CsrSpecifier = 0x305;
pub const MCOUNTEREN: CsrSpecifier = 0x306;

// Machine trap handling (`0x340..=0x344`).
pub const MSCRATCH: CsrSpecifier = 0x340;
pub const MEPC: CsrSpecifier = 0x341;
pub const MCAUSE: CsrSpecifier = 0x342;
pub const MTVAL: CsrSpecifier = 0x343;
pub const MIP: CsrSpecifier = 0x344;

// Machine memory protection (`0x3A0..=0x3A3`, `0x3B0..=0x3BF`).
// These only provide storage, physical memory protection is not enforced.
pub const PMPCFG0: CsrSpecifier = 0x3A0;
pub const PMPCFG3: CsrSpecifier = 0x3A3;
pub const PMPADDR0: CsrSpecifier = 0x3B0;
pub const PMPADDR15: CsrSpecifier = 0x3BF;

// Machine counters/timers (`0xB00..=0xB02`, `0xB80..=0xB82`).
pub const MCYCLE: CsrSpecifier = 0xB00;
pub const MINSTRET: CsrSpecifier = 0xB02;
pub const MCYCLEH: CsrSpecifier = 0xB80;
pub const MINSTRETH: CsrSpecifier = 0xB82;

/// Whether `specifier` fits in 12 bits.
pub fn is_valid(specifier: CsrSpecifier) -> bool {
    (specifier as usize) < COUNT
}

/// Address bits 11:10 set to `0b11` mark a read-only CSR.
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    (specifier >> 10) & 0b11 == 0b11
}

/// Lowest privilege level allowed to access the CSR, taken from address bits 9:8.
///
/// The reserved level `0b10` can show up here, in which case only M-mode has access.
pub fn required_privilege_level(specifier: CsrSpecifier) -> RawPrivilegeLevel {
    RawPrivilegeLevel::from_u2(((specifier >> 8) & 0b11) as u8)
}
