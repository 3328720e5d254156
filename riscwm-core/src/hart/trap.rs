//! Exceptions, interrupts, and the trap values that carry them to trap delivery.

use bitvec::{field::BitField, order::Lsb0, view::BitView};
use std::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a two-byte aligned boundary in memory.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved or unsupported instruction.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    /// - Attempt to execute a privileged instruction from a lower privilege level.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    pub fn code(self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreOrAmoAddressMisaligned => 6,
            Self::StoreOrAmoAccessFault => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::EnvironmentCallFromMMode => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StoreOrAmoPageFault => 15,
        }
    }
}

/// The nine interrupts of the machine, supervisor, and user levels.
///
/// The discriminants are the interrupt codes, which double as the bit index in `mip` and `mie`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Interrupt {
    UserSoftwareInterrupt = 0,
    SupervisorSoftwareInterrupt = 1,
    MachineSoftwareInterrupt = 3,
    UserTimerInterrupt = 4,
    SupervisorTimerInterrupt = 5,
    MachineTimerInterrupt = 7,
    UserExternalInterrupt = 8,
    SupervisorExternalInterrupt = 9,
    MachineExternalInterrupt = 11,
}

impl Interrupt {
    /// All interrupts, from highest to lowest priority.
    pub const PRIORITY_ORDER: [Self; 9] = [
        Self::MachineExternalInterrupt,
        Self::MachineSoftwareInterrupt,
        Self::MachineTimerInterrupt,
        Self::SupervisorExternalInterrupt,
        Self::SupervisorSoftwareInterrupt,
        Self::SupervisorTimerInterrupt,
        Self::UserExternalInterrupt,
        Self::UserSoftwareInterrupt,
        Self::UserTimerInterrupt,
    ];

    /// Returns the exception code (cause) for this interrupt.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Bit of this interrupt in the `mip` and `mie` registers.
    pub fn mask(self) -> u32 {
        1 << self.code()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl TrapCause {
    pub fn is_interrupt(self) -> bool {
        matches!(self, Self::Interrupt(_))
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Exception(exception) => exception.code(),
            Self::Interrupt(interrupt) => interrupt.code(),
        }
    }

    /// The value written to `xcause`: the code, with the most significant bit set for interrupts.
    pub fn xcause(self) -> u32 {
        let mut value = self.code();
        value.view_bits_mut::<Lsb0>().set(31, self.is_interrupt());
        value
    }
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

/// A trap waiting to be delivered.
///
/// `epc` is the address of the instruction that trapped, or of the instruction that would have
/// executed next for interrupts. `tval` holds the faulting address or instruction bits, `0` if
/// the cause has no associated value.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Trap {
    pub cause: TrapCause,
    pub epc: u32,
    pub tval: u32,
}

impl Trap {
    pub fn exception(exception: Exception, epc: u32, tval: u32) -> Self {
        Self {
            cause: exception.into(),
            epc,
            tval,
        }
    }

    pub fn interrupt(interrupt: Interrupt, epc: u32) -> Self {
        Self {
            cause: interrupt.into(),
            epc,
            tval: 0,
        }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            TrapCause::Exception(exception) => write!(f, "{exception:?}")?,
            TrapCause::Interrupt(interrupt) => write!(f, "{interrupt:?}")?,
        }
        write!(f, " at {:#010x} (tval {:#010x})", self.epc, self.tval)
    }
}

/// View of a trap vector base address register (`mtvec`, `stvec`, `utvec`).
///
/// Only interrupts are vectored, exceptions always land on BASE.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Tvec(pub u32);

impl Tvec {
    /// Returns the vector base address (stored in BASE field).
    pub fn base(self) -> u32 {
        self.0.view_bits::<Lsb0>()[2..].load_le::<u32>() << 2
    }

    /// Returns the vector mode (stored in MODE field).
    pub fn mode(self) -> VectorMode {
        match self.0 & 0b11 {
            1 => VectorMode::Vectored,
            _ => VectorMode::Direct,
        }
    }

    /// Applies a CSR write, keeping the old value if the new MODE is reserved (`>= 2`).
    pub fn written(self, value: u32) -> Self {
        if value & 0b11 >= 2 {
            self
        } else {
            Self(value)
        }
    }

    /// Address of the handler for `cause`.
    pub fn target(self, cause: TrapCause) -> u32 {
        match (self.mode(), cause) {
            (VectorMode::Vectored, TrapCause::Interrupt(interrupt)) => {
                self.base().wrapping_add(4 * interrupt.code())
            }
            _ => self.base(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMode {
    Direct,
    Vectored,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xcause() {
        assert_eq!(
            3,
            TrapCause::from(Exception::Breakpoint).xcause()
        );
        assert_eq!(
            0x8000_0007,
            TrapCause::from(Interrupt::MachineTimerInterrupt).xcause()
        );
    }

    #[test]
    fn test_tvec() {
        let direct = Tvec(0x8000_0100);
        assert_eq!(
            0x8000_0100,
            direct.target(Interrupt::MachineTimerInterrupt.into())
        );
        let vectored = Tvec(0x8000_0101);
        assert_eq!(0x8000_0100, vectored.base());
        assert_eq!(
            0x8000_011C,
            vectored.target(Interrupt::MachineTimerInterrupt.into())
        );
        assert_eq!(
            0x8000_0100,
            vectored.target(Exception::IllegalInstruction.into())
        );
        assert_eq!(vectored, vectored.written(0x1234_0002));
        assert_eq!(Tvec(0x1234_0000), vectored.written(0x1234_0000));
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(
            Interrupt::MachineExternalInterrupt,
            Interrupt::PRIORITY_ORDER[0]
        );
        assert_eq!(0x80, Interrupt::MachineTimerInterrupt.mask());
        assert_eq!(9, Interrupt::PRIORITY_ORDER.len());
    }
}
