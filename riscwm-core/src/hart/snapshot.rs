//! Persistence of the architectural state of a hart.

use super::{CsrFile, Hart};
use crate::registers::{self, Registers};
use crate::PrivilegeLevel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything needed to resume a hart where it left off.
///
/// The CLINT `msip` bit and the time base are shared between harts, so they are not part of the
/// state of a single hart. The timer comparator is, since each hart owns one.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct HartState {
    pub pc: u32,
    pub x: [u32; registers::LEN as usize],
    pub f: [u64; registers::LEN as usize],
    pub privilege: PrivilegeLevel,
    pub cycles: u64,
    pub mtimecmp: u64,
    pub csrs: Vec<u32>,
}

impl HartState {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to encode or decode hart state: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("hart state holds {0} CSRs, expected 4096")]
    CsrCount(usize),
}

impl Hart {
    pub fn state(&self) -> HartState {
        HartState {
            pc: self.registers.pc(),
            x: self.registers.x_all(),
            f: self.registers.f_all(),
            privilege: self.privilege,
            cycles: self.cycles,
            mtimecmp: self.clint.mtimecmp(self.config.hart_id),
            csrs: self.csrs.values().to_vec(),
        }
    }

    /// Restores a state produced by [`Hart::state`].
    ///
    /// Address translations cached for this hart are not dropped here, the caller must
    /// invalidate them through the MMU.
    pub fn restore(&mut self, state: &HartState) -> Result<(), SnapshotError> {
        let csrs = CsrFile::from_values(state.csrs.clone())
            .ok_or(SnapshotError::CsrCount(state.csrs.len()))?;
        let mut registers = Registers::default();
        registers.load_all(state.pc, state.x, state.f);
        self.registers = registers;
        self.csrs = csrs;
        self.privilege = state.privilege;
        self.cycles = state.cycles;
        self.clint
            .set_mtimecmp(self.config.hart_id, state.mtimecmp);
        Ok(())
    }
}
