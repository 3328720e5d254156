//! Provides a simulatable RV32IMAFC hart.

mod csr_file;
mod execute;
mod float;
mod snapshot;
mod status;
mod trap;

pub use csr_file::{level_csr, CsrFile, CsrWriteEffect};
pub use snapshot::{HartState, SnapshotError};
pub use status::{Status, SSTATUS_MASK, USTATUS_MASK};
pub use trap::{Exception, Interrupt, Trap, TrapCause, Tvec, VectorMode};

use crate::csr;
use crate::instruction::{
    AmoOp, BranchCondition, FpWidth, Instruction, LoadWidth, RegImmOp, RegRegOp, RegShiftImmOp,
    StoreWidth,
};
use crate::memory::ClintRegisters;
use crate::mmu::{AccessContext, MemoryError, Mmu};
use crate::registers::Registers;
use crate::time::TimeBase;
use crate::PrivilegeLevel;
use execute::Executor;
use log::trace;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Config {
    /// Value of the `mhartid` CSR, and the index of this hart's CLINT registers.
    pub hart_id: usize,
    /// Address to which the hart's PC register is reset.
    pub reset_vector: u32,
    /// If `true`, `EBREAK` (and the `slt x0, x1, rs2` hint) stop execution with
    /// [`ExecutionResult::Break`]. If `false`, `EBREAK` raises a breakpoint exception and the
    /// hint is a no-op.
    pub halt_on_ebreak: bool,
    /// If `true`, non-naturally-aligned memory accesses are supported.
    /// If `false`, they will generate an address-misaligned exception.
    pub support_misaligned_memory_access: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hart_id: 0,
            reset_vector: 0,
            halt_on_ebreak: true,
            support_misaligned_memory_access: true,
        }
    }
}

/// RISC-V hart implementing RV32IMAFC with machine, supervisor, and user modes.
///
/// A hart owns its registers and CSRs. All memory accesses go through the [`Mmu`] passed to
/// [`step`](Self::step), which is shared by all harts of a VM. The CLINT registers and the time
/// base are shared with the CLINT device.
#[derive(Debug)]
pub struct Hart {
    config: Config,
    registers: Registers,
    csrs: CsrFile,
    privilege: PrivilegeLevel,
    /// Counts cycles and retired instructions alike (every instruction takes one cycle).
    cycles: u64,
    clint: Arc<ClintRegisters>,
    time: Arc<TimeBase>,
}

impl Hart {
    pub fn new(config: Config, clint: Arc<ClintRegisters>, time: Arc<TimeBase>) -> Self {
        Self {
            registers: Registers::new(config.reset_vector),
            csrs: CsrFile::new(),
            privilege: PrivilegeLevel::Machine,
            cycles: 0,
            config,
            clint,
            time,
        }
    }

    /// Force this hart to its reset state.
    pub fn reset(&mut self) {
        self.registers = Registers::new(self.config.reset_vector);
        self.csrs = CsrFile::new();
        self.privilege = PrivilegeLevel::Machine;
        self.cycles = 0;
    }

    /// Provide a read-only view of this hart's configuration.
    ///
    /// It is not possible to modify the configuration after creation.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn csrs(&self) -> &CsrFile {
        &self.csrs
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Fetches, decodes, and executes a single instruction, delivering any trap it raises.
    ///
    /// A returned [`ExecutionResult::Trap`] has already been delivered: the PC points to the
    /// trap handler.
    pub fn step(&mut self, mmu: &mut Mmu) -> ExecutionResult {
        self.cycles = self.cycles.wrapping_add(1);
        let result = match self.fetch(mmu) {
            Ok((instruction, raw_instruction, length)) => {
                self.execute_instruction(mmu, instruction, raw_instruction, length)
            }
            Err(trap) => ExecutionResult::Trap(trap),
        };
        if let ExecutionResult::Trap(trap) = result {
            self.take_trap(trap);
        }
        result
    }

    /// "Independent instruction fetch unit"
    ///
    /// Fetches the low parcel first, and only fetches the high parcel if the low one indicates a
    /// 32-bit instruction. Returns the decoded instruction, its raw bits, and its length.
    fn fetch(&mut self, mmu: &mut Mmu) -> Result<(Instruction, u32, u32), Trap> {
        let pc = self.registers.pc();
        let context = self.access_context(self.privilege);
        let low = mmu
            .fetch_parcel(&context, pc)
            .map_err(|err| Trap::exception(fetch_exception(err), pc, pc))?;
        if low & 0b11 != 0b11 {
            let raw_instruction = low as u32;
            return Instruction::decode_compressed(low)
                .map(|instruction| (instruction, raw_instruction, 2))
                .map_err(|_| Trap::exception(Exception::IllegalInstruction, pc, raw_instruction));
        }
        let high_address = pc.wrapping_add(2);
        let high = mmu
            .fetch_parcel(&context, high_address)
            .map_err(|err| Trap::exception(fetch_exception(err), pc, high_address))?;
        let raw_instruction = low as u32 | (high as u32) << 16;
        Instruction::decode(raw_instruction)
            .map(|instruction| (instruction, raw_instruction, 4))
            .map_err(|_| Trap::exception(Exception::IllegalInstruction, pc, raw_instruction))
    }

    /// Execute a single decoded instruction on this hart.
    ///
    /// This only takes care of the instruction-specific operations, such as updating registers,
    /// memory, the `pc` register, and CSRs. Traps are returned, not delivered, and counters are
    /// not updated.
    pub fn execute_instruction(
        &mut self,
        mmu: &mut Mmu,
        instruction: Instruction,
        raw_instruction: u32,
        length: u32,
    ) -> ExecutionResult {
        let mut executor = Executor {
            hart: self,
            mmu,
            raw_instruction,
            length,
        };
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let op = match op {
                    RegImmOp::Addi => Executor::addi,
                    RegImmOp::Slti => Executor::slti,
                    RegImmOp::Sltiu => Executor::sltiu,
                    RegImmOp::Xori => Executor::xori,
                    RegImmOp::Ori => Executor::ori,
                    RegImmOp::Andi => Executor::andi,
                };
                op(&mut executor, dest, src, immediate)
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u5,
            } => {
                let op = match op {
                    RegShiftImmOp::Slli => Executor::slli,
                    RegShiftImmOp::Srli => Executor::srli,
                    RegShiftImmOp::Srai => Executor::srai,
                };
                op(&mut executor, dest, src, shift_amount_u5)
            }
            Instruction::Auipc { dest, immediate } => executor.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => executor.lui(dest, immediate),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    RegRegOp::Add => Executor::add,
                    RegRegOp::Slt => Executor::slt,
                    RegRegOp::Sltu => Executor::sltu,
                    RegRegOp::And => Executor::and,
                    RegRegOp::Or => Executor::or,
                    RegRegOp::Xor => Executor::xor,
                    RegRegOp::Sll => Executor::sll,
                    RegRegOp::Srl => Executor::srl,
                    RegRegOp::Sub => Executor::sub,
                    RegRegOp::Sra => Executor::sra,
                    RegRegOp::Mul => Executor::mul,
                    RegRegOp::Mulh => Executor::mulh,
                    RegRegOp::Mulhsu => Executor::mulhsu,
                    RegRegOp::Mulhu => Executor::mulhu,
                    RegRegOp::Div => Executor::div,
                    RegRegOp::Divu => Executor::divu,
                    RegRegOp::Rem => Executor::rem,
                    RegRegOp::Remu => Executor::remu,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::Jal { dest, offset } => executor.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let op = match condition {
                    BranchCondition::Beq => Executor::beq,
                    BranchCondition::Bne => Executor::bne,
                    BranchCondition::Blt => Executor::blt,
                    BranchCondition::Bltu => Executor::bltu,
                    BranchCondition::Bge => Executor::bge,
                    BranchCondition::Bgeu => Executor::bgeu,
                };
                op(&mut executor, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let op = match width {
                    LoadWidth::Lb => Executor::lb,
                    LoadWidth::Lh => Executor::lh,
                    LoadWidth::Lw => Executor::lw,
                    LoadWidth::Lbu => Executor::lbu,
                    LoadWidth::Lhu => Executor::lhu,
                };
                op(&mut executor, dest, base, offset)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let op = match width {
                    StoreWidth::Sb => Executor::sb,
                    StoreWidth::Sh => Executor::sh,
                    StoreWidth::Sw => Executor::sw,
                };
                op(&mut executor, src, base, offset)
            }
            Instruction::Fence | Instruction::FenceI => executor.fence(),
            Instruction::Ecall => executor.ecall(),
            Instruction::Ebreak => executor.ebreak(),
            Instruction::BreakHint => executor.break_hint(),
            Instruction::Uret => executor.xret(PrivilegeLevel::User),
            Instruction::Sret => executor.xret(PrivilegeLevel::Supervisor),
            Instruction::Mret => executor.xret(PrivilegeLevel::Machine),
            Instruction::Wfi => executor.wfi(),
            Instruction::SfenceVma { .. } => executor.sfence_vma(),
            Instruction::Csr { op, dest, src, csr } => executor.csr(op, dest, src, csr),
            Instruction::LoadFp {
                width,
                dest,
                base,
                offset,
            } => match width {
                FpWidth::W => executor.flw(dest, base, offset),
                FpWidth::D => executor.fld(dest, base, offset),
            },
            Instruction::StoreFp {
                width,
                src,
                base,
                offset,
            } => match width {
                FpWidth::W => executor.fsw(src, base, offset),
                FpWidth::D => executor.fsd(src, base, offset),
            },
            Instruction::OpFp {
                op,
                dest,
                src1,
                src2,
                rounding,
            } => executor.op_fp(op, dest, src1, src2, rounding),
            Instruction::FusedFp {
                op,
                dest,
                src1,
                src2,
                src3,
                rounding: _,
            } => executor.fused_fp(op, dest, src1, src2, src3),
            Instruction::Amo {
                op,
                dest,
                address,
                src,
            } => {
                let op: fn(u32, u32) -> u32 = match op {
                    AmoOp::Swap => |_, src| src,
                    AmoOp::Add => |old, src| old.wrapping_add(src),
                    AmoOp::Xor => |old, src| old ^ src,
                    AmoOp::And => |old, src| old & src,
                    AmoOp::Or => |old, src| old | src,
                    AmoOp::Min => |old, src| (old as i32).min(src as i32) as u32,
                    AmoOp::Max => |old, src| (old as i32).max(src as i32) as u32,
                    AmoOp::Minu => |old, src| old.min(src),
                    AmoOp::Maxu => |old, src| old.max(src),
                };
                executor.amo(dest, address, src, op)
            }
            Instruction::LrW { dest, address } => executor.lr_w(dest, address),
            Instruction::ScW { dest, address, src } => executor.sc_w(dest, address, src),
        }
    }

    /// Bits of the `mip` register: the software-writable supervisor and user bits, plus the
    /// machine software and timer interrupts derived from the CLINT.
    pub fn pending_interrupts(&self) -> u32 {
        let mut pending = self.csrs.get(csr::MIP);
        let hart_id = self.config.hart_id;
        if self.clint.msip(hart_id) {
            pending |= Interrupt::MachineSoftwareInterrupt.mask();
        }
        if self.time.now() >= self.clint.mtimecmp(hart_id) {
            pending |= Interrupt::MachineTimerInterrupt.mask();
        }
        pending
    }

    /// Delivers the highest priority interrupt that is both pending and enabled, if any.
    ///
    /// An interrupt is only taken if it targets a higher privilege level than the current one,
    /// or the current level with its global interrupt enable bit set.
    pub fn check_interrupts(&mut self) -> Option<Trap> {
        let pending = self.pending_interrupts() & self.csrs.get(csr::MIE);
        if pending == 0 {
            return None;
        }
        let status = self.csrs.status();
        let interrupt = Interrupt::PRIORITY_ORDER
            .into_iter()
            .filter(|interrupt| pending & interrupt.mask() != 0)
            .find(|&interrupt| {
                let target = self.target_level(interrupt.into());
                target > self.privilege || (target == self.privilege && status.ie(target))
            })?;
        let trap = Trap::interrupt(interrupt, self.registers.pc());
        self.take_trap(trap);
        Some(trap)
    }

    /// The privilege level that handles `cause`, following `medeleg`/`mideleg` and then
    /// `sedeleg`/`sideleg`.
    fn target_level(&self, cause: TrapCause) -> PrivilegeLevel {
        let (interrupt, code) = (cause.is_interrupt(), cause.code());
        if !self.csrs.delegates(PrivilegeLevel::Machine, interrupt, code) {
            PrivilegeLevel::Machine
        } else if !self.csrs.delegates(PrivilegeLevel::Supervisor, interrupt, code) {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::User
        }
    }

    /// Delivers `trap`: saves the trap state in the CSRs of the handling privilege level,
    /// switches to that level, and jumps to its trap vector.
    ///
    /// Exceptions are never handled by a lower privilege level than the current one.
    pub fn take_trap(&mut self, trap: Trap) {
        let mut target = self.target_level(trap.cause);
        if !trap.cause.is_interrupt() {
            target = target.max(self.privilege);
        }
        trace!(
            "Hart {} delivering {trap} from {} mode to {target} mode",
            self.config.hart_id,
            self.privilege
        );

        self.csrs.set(level_csr(target, csr::MEPC), trap.epc);
        self.csrs
            .set(level_csr(target, csr::MCAUSE), trap.cause.xcause());
        self.csrs.set(level_csr(target, csr::MTVAL), trap.tval);

        let mut status = self.csrs.status();
        status.set_pie(target, status.ie(target));
        status.set_ie(target, false);
        status.set_pp(target, self.privilege);
        self.csrs.set_status(status);

        self.privilege = target;
        *self.registers.pc_mut() = self.csrs.tvec(target).target(trap.cause);
    }

    /// Returns from a trap handled at `level` (`MRET`, `SRET`, `URET`).
    fn trap_return(&mut self, level: PrivilegeLevel) -> Result<(), Exception> {
        let mut status = self.csrs.status();
        if self.privilege < level
            || (level == PrivilegeLevel::Supervisor
                && self.privilege == PrivilegeLevel::Supervisor
                && status.tsr())
        {
            return Err(Exception::IllegalInstruction);
        }
        let previous = status.pp(level);
        status.set_ie(level, status.pie(level));
        status.set_pie(level, true);
        status.set_pp(level, PrivilegeLevel::User);
        if previous != PrivilegeLevel::Machine {
            status.set_mprv(false);
        }
        self.csrs.set_status(status);

        self.privilege = previous;
        *self.registers.pc_mut() = self.csrs.get(level_csr(level, csr::MEPC));
        Ok(())
    }

    /// Context for accesses at `privilege`, with the current translation settings.
    fn access_context(&self, privilege: PrivilegeLevel) -> AccessContext {
        let status = self.csrs.status();
        AccessContext {
            hart_id: self.config.hart_id,
            privilege,
            satp: self.csrs.get(csr::SATP),
            sum: status.sum(),
            mxr: status.mxr(),
            support_misaligned_memory_access: self.config.support_misaligned_memory_access,
        }
    }

    /// Context for loads and stores, which use the MPP privilege when `mstatus.MPRV` is set.
    fn data_access_context(&self) -> AccessContext {
        let status = self.csrs.status();
        let privilege = match self.privilege {
            PrivilegeLevel::Machine if status.mprv() => status.mpp(),
            privilege => privilege,
        };
        self.access_context(privilege)
    }
}

fn fetch_exception(err: MemoryError) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::InstructionAddressMisaligned,
        MemoryError::AccessFault => Exception::InstructionAccessFault,
        MemoryError::PageFault => Exception::InstructionPageFault,
    }
}

fn load_exception(err: MemoryError) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::LoadAddressMisaligned,
        MemoryError::AccessFault => Exception::LoadAccessFault,
        MemoryError::PageFault => Exception::LoadPageFault,
    }
}

fn store_exception(err: MemoryError) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::StoreOrAmoAddressMisaligned,
        MemoryError::AccessFault => Exception::StoreOrAmoAccessFault,
        MemoryError::PageFault => Exception::StoreOrAmoPageFault,
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum ExecutionResult {
    /// Execution went normal
    #[default]
    Ok,
    /// Execution raised a trap
    Trap(Trap),
    /// A breakpoint asked to stop execution. The PC already points past the instruction.
    Break,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{PhysicalMemorySpace, Ram};

    const RAM_BASE: u32 = 0x8000_0000;

    fn setup() -> (Hart, Mmu) {
        let mut physical = PhysicalMemorySpace::new();
        physical
            .add_device(Box::new(Ram::new(RAM_BASE, 0x1_0000).unwrap()))
            .unwrap();
        let clint = Arc::new(ClintRegisters::new(1));
        let hart = Hart::new(
            Config {
                reset_vector: RAM_BASE,
                ..Config::default()
            },
            clint,
            Arc::new(TimeBase::new()),
        );
        (hart, Mmu::new(physical, 1))
    }

    fn load_program(mmu: &mut Mmu, words: &[u32]) {
        for (address, word) in (RAM_BASE..).step_by(4).zip(words) {
            mmu.physical_mut().write32(address, *word).unwrap();
        }
    }

    #[test]
    fn test_compressed_and_full_instructions() {
        let (mut hart, mut mmu) = setup();
        // c.li x10, 5 ; c.addi x10, 3 ; addi x11, x10, 1
        load_program(&mut mmu, &[0x050D_4515, 0x0015_0593]);
        assert_eq!(ExecutionResult::Ok, hart.step(&mut mmu));
        assert_eq!(RAM_BASE + 2, hart.registers().pc());
        assert_eq!(ExecutionResult::Ok, hart.step(&mut mmu));
        assert_eq!(ExecutionResult::Ok, hart.step(&mut mmu));
        assert_eq!(8, hart.registers().x(crate::registers::Specifier::from_u5(10)));
        assert_eq!(9, hart.registers().x(crate::registers::Specifier::from_u5(11)));
        assert_eq!(RAM_BASE + 8, hart.registers().pc());
        assert_eq!(3, hart.cycles());
    }

    #[test]
    fn test_illegal_instruction_trap() {
        let (mut hart, mut mmu) = setup();
        let _ = hart.write_csr(csr::MTVEC, RAM_BASE + 0x100);
        load_program(&mut mmu, &[0xFFFF_FFFF]);
        let result = hart.step(&mut mmu);
        assert_eq!(
            ExecutionResult::Trap(Trap::exception(
                Exception::IllegalInstruction,
                RAM_BASE,
                0xFFFF_FFFF
            )),
            result
        );
        assert_eq!(RAM_BASE + 0x100, hart.registers().pc());
        assert_eq!(2, hart.read_csr(csr::MCAUSE));
        assert_eq!(RAM_BASE, hart.read_csr(csr::MEPC));
        assert_eq!(0xFFFF_FFFF, hart.read_csr(csr::MTVAL));
    }

    #[test]
    fn test_fetch_access_fault() {
        let (mut hart, mut mmu) = setup();
        *hart.registers_mut().pc_mut() = 0x1000;
        hart.step(&mut mmu);
        assert_eq!(1, hart.read_csr(csr::MCAUSE));
        assert_eq!(0x1000, hart.read_csr(csr::MTVAL));
    }

    #[test]
    fn test_timer_interrupt() {
        let (mut hart, _) = setup();
        let _ = hart.write_csr(csr::MTVEC, RAM_BASE + 0x201);
        let _ = hart.write_csr(csr::MIE, Interrupt::MachineTimerInterrupt.mask());
        hart.clint.set_mtimecmp(0, 0);
        // Interrupts at the current level need MIE
        assert_eq!(None, hart.check_interrupts());

        let _ = hart.write_csr(csr::MSTATUS, 1 << 3);
        let trap = hart.check_interrupts().unwrap();
        assert_eq!(TrapCause::Interrupt(Interrupt::MachineTimerInterrupt), trap.cause);
        assert_eq!(RAM_BASE + 0x200 + 4 * 7, hart.registers().pc());
        assert_eq!(0x8000_0007, hart.read_csr(csr::MCAUSE));
        let status = hart.csrs().status();
        assert!(!status.ie(PrivilegeLevel::Machine));
        assert!(status.pie(PrivilegeLevel::Machine));
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
    }

    #[test]
    fn test_interrupt_priority() {
        let (mut hart, _) = setup();
        hart.privilege = PrivilegeLevel::User;
        let _ = hart.write_csr(csr::MIE, 0xBBB);
        let _ = hart.write_csr(csr::MIP, Interrupt::SupervisorSoftwareInterrupt.mask());
        hart.clint.set_msip(0, true);
        let trap = hart.check_interrupts().unwrap();
        assert_eq!(TrapCause::Interrupt(Interrupt::MachineSoftwareInterrupt), trap.cause);
        assert_eq!(PrivilegeLevel::Machine, hart.privilege());
    }

    #[test]
    fn test_delegated_interrupt_does_not_preempt_machine_mode() {
        let (mut hart, _) = setup();
        let _ = hart.write_csr(csr::MIDELEG, Interrupt::SupervisorSoftwareInterrupt.mask());
        let _ = hart.write_csr(csr::MIE, Interrupt::SupervisorSoftwareInterrupt.mask());
        let _ = hart.write_csr(csr::MIP, Interrupt::SupervisorSoftwareInterrupt.mask());
        let _ = hart.write_csr(csr::MSTATUS, 0b1010);
        assert_eq!(None, hart.check_interrupts());
        hart.privilege = PrivilegeLevel::User;
        assert!(hart.check_interrupts().is_some());
        assert_eq!(PrivilegeLevel::Supervisor, hart.privilege());
        assert_eq!(0x8000_0001, hart.read_csr(csr::SCAUSE));
    }

    #[test]
    fn test_trap_return() {
        let (mut hart, _) = setup();
        let _ = hart.write_csr(csr::MEPC, 0x8000_1000);
        let _ = hart.write_csr(csr::MSTATUS, 1 << 7 | 1 << 11 | 1 << 17);
        hart.trap_return(PrivilegeLevel::Machine).unwrap();
        assert_eq!(PrivilegeLevel::Supervisor, hart.privilege());
        assert_eq!(0x8000_1000, hart.registers().pc());
        let status = hart.csrs().status();
        assert!(status.ie(PrivilegeLevel::Machine));
        assert!(status.pie(PrivilegeLevel::Machine));
        assert_eq!(PrivilegeLevel::User, status.mpp());
        assert!(!status.mprv());

        assert_eq!(
            Err(Exception::IllegalInstruction),
            hart.trap_return(PrivilegeLevel::Machine)
        );
    }
}
