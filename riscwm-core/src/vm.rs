//! Provides a virtual machine made of one or more harts sharing a physical memory space.

use crate::hart::{self, ExecutionResult, Hart};
use crate::memory::{
    BusError, Clint, ClintRegisters, MapError, MemoryDevice, PhysicalMemorySpace, CLINT_BASE,
};
use crate::mmu::Mmu;
use crate::time::TimeBase;
use log::debug;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of harts, with IDs `0..harts`.
    pub harts: usize,
    /// Number of cycles a hart runs before the next hart gets its turn. Interrupts are checked
    /// at the start of every slice.
    pub slice_cycles: u64,
    /// Initial PC of every hart.
    pub reset_vector: u32,
    /// See [`hart::Config::halt_on_ebreak`].
    pub halt_on_ebreak: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            harts: 1,
            slice_cycles: 16,
            reset_vector: 0x8000_0000,
            halt_on_ebreak: true,
        }
    }
}

/// Outcome of [`Vm::interpret`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InterpretResult {
    /// All requested cycles were executed.
    Completed,
    /// A hart hit a breakpoint. Calling [`Vm::interpret`] again resumes execution.
    Break { hart_id: usize },
}

/// The container of a RISC-V system: harts, the MMU in front of the physical memory space, and
/// the time base shared by the `time` CSR and the CLINT.
///
/// A CLINT is mapped at [`CLINT_BASE`] on creation. All other devices are added by the host.
#[derive(Debug)]
pub struct Vm {
    config: Config,
    mmu: Mmu,
    harts: Vec<Hart>,
    time: Arc<TimeBase>,
    clint: Arc<ClintRegisters>,
    executed_cycles: u64,
}

impl Vm {
    pub fn new(config: Config) -> Result<Self, MapError> {
        let time = Arc::new(TimeBase::new());
        let clint = Arc::new(ClintRegisters::new(config.harts));

        let mut physical = PhysicalMemorySpace::new();
        physical.add_device(Box::new(Clint::new(
            CLINT_BASE,
            Arc::clone(&clint),
            Arc::clone(&time),
        )))?;

        let harts = (0..config.harts)
            .map(|hart_id| {
                Hart::new(
                    hart::Config {
                        hart_id,
                        reset_vector: config.reset_vector,
                        halt_on_ebreak: config.halt_on_ebreak,
                        ..hart::Config::default()
                    },
                    Arc::clone(&clint),
                    Arc::clone(&time),
                )
            })
            .collect();
        debug!(
            "Created VM with {} harts, reset vector {:#010x}",
            config.harts, config.reset_vector
        );

        Ok(Self {
            mmu: Mmu::new(physical, config.harts),
            harts,
            time,
            clint,
            executed_cycles: 0,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Maps `device` into the physical address space, returning its device index.
    pub fn add_device(&mut self, device: Box<dyn MemoryDevice>) -> Result<usize, MapError> {
        self.mmu.physical_mut().add_device(device)
    }

    /// Writes `bytes` into the physical address space. Writes to read-only devices are ignored.
    pub fn load(&mut self, address: u32, bytes: &[u8]) -> Result<(), BusError> {
        self.mmu.physical_mut().load(address, bytes)
    }

    pub fn harts(&self) -> &[Hart] {
        &self.harts
    }

    pub fn hart(&self, hart_id: usize) -> Option<&Hart> {
        self.harts.get(hart_id)
    }

    pub fn hart_mut(&mut self, hart_id: usize) -> Option<&mut Hart> {
        self.harts.get_mut(hart_id)
    }

    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut Mmu {
        &mut self.mmu
    }

    pub fn time(&self) -> &Arc<TimeBase> {
        &self.time
    }

    pub fn clint(&self) -> &Arc<ClintRegisters> {
        &self.clint
    }

    /// Total number of cycles run by [`interpret`](Self::interpret) so far.
    pub fn executed_cycles(&self) -> u64 {
        self.executed_cycles
    }

    /// Force all harts back to their reset state. Memory contents are kept.
    pub fn reset(&mut self) {
        for hart in &mut self.harts {
            hart.reset();
            self.mmu.invalidate(hart.config().hart_id);
        }
    }

    /// Runs every hart for `cycles` cycles, in round-robin slices of
    /// [`Config::slice_cycles`].
    ///
    /// Stops early after the instruction that requested a break, leaving the remainder of the
    /// slice and of the other harts' slices unexecuted.
    pub fn interpret(&mut self, cycles: u64) -> InterpretResult {
        let slice_cycles = self.config.slice_cycles.max(1);
        let mut remaining = cycles;
        while remaining > 0 {
            let slice = remaining.min(slice_cycles);
            for hart in &mut self.harts {
                hart.check_interrupts();
                for executed in 1..=slice {
                    if hart.step(&mut self.mmu) == ExecutionResult::Break {
                        self.executed_cycles += executed;
                        return InterpretResult::Break {
                            hart_id: hart.config().hart_id,
                        };
                    }
                }
            }
            self.executed_cycles += slice;
            remaining -= slice;
        }
        InterpretResult::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr;
    use crate::memory::{CaptureSink, FifoPrint, Ram, Rom};
    use crate::registers::{Specifier, CANONICAL_NAN_F32};
    use crate::PrivilegeLevel;

    const ROM_BASE: u32 = 0x1100_0000;
    const RAM_BASE: u32 = 0x8000_0000;
    const RAM_SIZE: u32 = 0x10_0000;

    /// Tiny RV32 assembler for the programs below.
    mod asm {
        fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
            (imm as u32 & 0xFFF) << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
        }

        fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
            funct7 << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
        }

        pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
            i_type(imm, rs1, 0b000, rd, 0x13)
        }

        pub fn srli(rd: u32, rs1: u32, shamt: u32) -> u32 {
            i_type(shamt as i32, rs1, 0b101, rd, 0x13)
        }

        pub fn srai(rd: u32, rs1: u32, shamt: u32) -> u32 {
            i_type((0x400 | shamt) as i32, rs1, 0b101, rd, 0x13)
        }

        pub fn lui(rd: u32, upper: u32) -> u32 {
            upper << 12 | rd << 7 | 0x37
        }

        pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
            r_type(0, rs2, rs1, 0b000, rd, 0x33)
        }

        pub fn div(rd: u32, rs1: u32, rs2: u32) -> u32 {
            r_type(1, rs2, rs1, 0b100, rd, 0x33)
        }

        pub fn rem(rd: u32, rs1: u32, rs2: u32) -> u32 {
            r_type(1, rs2, rs1, 0b110, rd, 0x33)
        }

        pub fn remu(rd: u32, rs1: u32, rs2: u32) -> u32 {
            r_type(1, rs2, rs1, 0b111, rd, 0x33)
        }

        pub fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
            i_type(imm, rs1, 0b010, rd, 0x03)
        }

        pub fn sb(rs2: u32, rs1: u32, imm: i32) -> u32 {
            let imm = imm as u32;
            (imm >> 5 & 0x7F) << 25 | rs2 << 20 | rs1 << 15 | (imm & 0x1F) << 7 | 0x23
        }

        pub fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
            sb(rs2, rs1, imm) | 0b010 << 12
        }

        pub fn sh(rs2: u32, rs1: u32, imm: i32) -> u32 {
            sb(rs2, rs1, imm) | 0b001 << 12
        }

        pub fn fsw(rs2: u32, rs1: u32, imm: i32) -> u32 {
            (sb(rs2, rs1, imm) & !0x7F) | 0b010 << 12 | 0x27
        }

        /// Single-precision OP-FP instruction with round-to-nearest-even.
        pub fn op_fp(funct7: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
            r_type(funct7, rs2, rs1, 0b000, rd, 0x53)
        }

        pub fn fmv_w_x(rd: u32, rs1: u32) -> u32 {
            op_fp(0x78, rd, rs1, 0)
        }

        pub fn fmadd_s(rd: u32, rs1: u32, rs2: u32, rs3: u32) -> u32 {
            rs3 << 27 | r_type(0, rs2, rs1, 0b000, rd, 0x43)
        }

        /// `AMO*.W` selected by `funct5`, with `aq` and `rl` clear.
        pub fn amo(funct5: u32, rd: u32, rs2: u32, rs1: u32) -> u32 {
            r_type(funct5 << 2, rs2, rs1, 0b010, rd, 0x2F)
        }

        pub fn amoadd_w(rd: u32, rs2: u32, rs1: u32) -> u32 {
            amo(0b00000, rd, rs2, rs1)
        }

        pub fn lr_w(rd: u32, rs1: u32) -> u32 {
            amo(0b00010, rd, 0, rs1)
        }

        pub fn sc_w(rd: u32, rs2: u32, rs1: u32) -> u32 {
            amo(0b00011, rd, rs2, rs1)
        }

        fn csr_type(funct3: u32, rd: u32, csr: u32, rs1: u32) -> u32 {
            csr << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | 0x73
        }

        pub fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
            csr_type(0b010, rd, csr, rs1)
        }

        pub fn csrrc(rd: u32, csr: u32, rs1: u32) -> u32 {
            csr_type(0b011, rd, csr, rs1)
        }

        pub fn csrrci(rd: u32, csr: u32, uimm: u32) -> u32 {
            csr_type(0b111, rd, csr, uimm)
        }

        pub fn ecall() -> u32 {
            0x0000_0073
        }

        /// `jal x0, 0`: loops forever.
        pub fn spin() -> u32 {
            0x0000_006F
        }

        pub fn mret() -> u32 {
            0x3020_0073
        }

        pub fn ebreak() -> u32 {
            0x0010_0073
        }

        pub fn to_bytes(program: &[u32]) -> Vec<u8> {
            program.iter().flat_map(|word| word.to_le_bytes()).collect()
        }
    }

    fn vm_with_ram(config: Config) -> Vm {
        let mut vm = Vm::new(config).unwrap();
        vm.add_device(Box::new(Ram::new(RAM_BASE, RAM_SIZE).unwrap()))
            .unwrap();
        vm
    }

    fn x(vm: &Vm, hart_id: usize, register: u8) -> u32 {
        vm.hart(hart_id)
            .unwrap()
            .registers()
            .x(Specifier::from_u5(register))
    }

    fn f(vm: &Vm, hart_id: usize, register: u8) -> u64 {
        vm.hart(hart_id)
            .unwrap()
            .registers()
            .f(Specifier::from_u5(register))
    }

    #[test]
    fn test_program_in_rom_stops_at_ebreak() {
        let program = [
            asm::addi(1, 0, 5),
            asm::addi(2, 0, 7),
            asm::add(3, 1, 2),
            asm::ebreak(),
        ];
        let mut vm = Vm::new(Config {
            reset_vector: ROM_BASE,
            ..Config::default()
        })
        .unwrap();
        vm.add_device(Box::new(
            Rom::new(ROM_BASE, asm::to_bytes(&program)).unwrap(),
        ))
        .unwrap();

        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));
        assert_eq!(12, x(&vm, 0, 3));
        assert_eq!(ROM_BASE + 16, vm.hart(0).unwrap().registers().pc());
        assert_eq!(4, vm.executed_cycles());
    }

    #[test]
    fn test_compressed_ebreak() {
        // c.li x10, 5 ; c.ebreak
        let mut vm = Vm::new(Config {
            reset_vector: ROM_BASE,
            ..Config::default()
        })
        .unwrap();
        vm.add_device(Box::new(
            Rom::new(ROM_BASE, vec![0x15, 0x45, 0x02, 0x90]).unwrap(),
        ))
        .unwrap();
        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(10));
        assert_eq!(5, x(&vm, 0, 10));
        assert_eq!(ROM_BASE + 4, vm.hart(0).unwrap().registers().pc());
    }

    #[test]
    fn test_runs_requested_cycles() {
        let mut vm = vm_with_ram(Config::default());
        vm.load(RAM_BASE, &asm::to_bytes(&[asm::spin()])).unwrap();
        assert_eq!(InterpretResult::Completed, vm.interpret(100));
        assert_eq!(100, vm.executed_cycles());
        assert_eq!(100, vm.hart(0).unwrap().cycles());
        assert_eq!(100, vm.hart(0).unwrap().read_csr(csr::CYCLE));
    }

    #[test]
    fn test_print_device() {
        let sink = CaptureSink::new();
        let mut vm = vm_with_ram(Config::default());
        vm.add_device(Box::new(FifoPrint::with_sink(
            0x1000_0000,
            Box::new(sink.clone()),
        )))
        .unwrap();
        let program = [
            asm::lui(1, 0x10000),
            asm::addi(2, 0, 'H' as i32),
            asm::sb(2, 1, 0),
            asm::addi(2, 0, 'i' as i32),
            asm::sb(2, 1, 0),
            asm::ebreak(),
        ];
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));
        assert_eq!("Hi", sink.text());
    }

    #[test]
    fn test_integer_edge_cases() {
        let program = [
            asm::addi(1, 0, -7),
            asm::addi(2, 0, 2),
            asm::div(3, 1, 2),
            asm::rem(4, 1, 2),
            asm::div(5, 1, 0),
            asm::remu(6, 1, 0),
            asm::srai(7, 1, 1),
            asm::srli(8, 1, 28),
            asm::addi(0, 0, 5),
            asm::lui(9, 0x80000),
            asm::addi(10, 0, -1),
            asm::div(11, 9, 10),
            asm::rem(12, 9, 10),
            asm::ebreak(),
        ];
        let mut vm = vm_with_ram(Config::default());
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));
        assert_eq!(-3, x(&vm, 0, 3) as i32);
        assert_eq!(-1, x(&vm, 0, 4) as i32);
        assert_eq!(u32::MAX, x(&vm, 0, 5));
        assert_eq!(-7, x(&vm, 0, 6) as i32);
        assert_eq!(-4, x(&vm, 0, 7) as i32);
        assert_eq!(0xF, x(&vm, 0, 8));
        assert_eq!(0, x(&vm, 0, 0));
        assert_eq!(0x8000_0000, x(&vm, 0, 11));
        assert_eq!(0, x(&vm, 0, 12));
    }

    #[test]
    fn test_word_stores_to_print_device() {
        let sink = CaptureSink::new();
        let mut vm = vm_with_ram(Config::default());
        vm.add_device(Box::new(FifoPrint::with_sink(
            0x1000_0000,
            Box::new(sink.clone()),
        )))
        .unwrap();
        let program = [
            asm::lui(1, 0x10000),
            asm::addi(2, 0, 'O' as i32),
            asm::sw(2, 1, 0),
            asm::addi(2, 0, 'k' as i32),
            asm::sh(2, 1, 0),
            asm::addi(3, 0, 9),
            asm::lw(3, 1, 0),
            asm::ebreak(),
        ];
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));
        assert_eq!("Ok", sink.text());
        assert_eq!(0, x(&vm, 0, 3));
        assert_eq!(0, vm.hart(0).unwrap().read_csr(csr::MCAUSE));
    }

    #[test]
    fn test_shift_right_immediate() {
        let program = [
            asm::addi(1, 0, 1000),
            asm::srli(2, 1, 3),
            asm::srai(3, 1, 3),
            asm::lui(4, 0x40000),
            asm::srli(5, 4, 30),
            asm::srai(6, 4, 30),
            asm::srai(7, 1, 0),
            asm::ebreak(),
        ];
        let mut vm = vm_with_ram(Config::default());
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));
        assert_eq!(125, x(&vm, 0, 2));
        assert_eq!(125, x(&vm, 0, 3));
        assert_eq!(1, x(&vm, 0, 5));
        assert_eq!(1, x(&vm, 0, 6));
        assert_eq!(1000, x(&vm, 0, 7));
    }

    #[test]
    fn test_float_results_are_canonical_and_boxed() {
        const NAN_BOXED: u64 = 0xFFFF_FFFF_0000_0000;
        let program = [
            // f1 = 0.0, f3 = +inf, f6 = 1.5
            asm::fmv_w_x(1, 0),
            asm::lui(5, 0x7F800),
            asm::fmv_w_x(3, 5),
            asm::lui(6, 0x3FC00),
            asm::fmv_w_x(6, 6),
            // fdiv.s f2, f1, f1
            asm::op_fp(0x0C, 2, 1, 1),
            // fsub.s f4, f3, f3
            asm::op_fp(0x04, 4, 3, 3),
            asm::fmadd_s(5, 3, 1, 1),
            // fadd.s f7, f6, f6
            asm::op_fp(0x00, 7, 6, 6),
            asm::fmadd_s(8, 6, 6, 6),
            // fadd.s f10, f9, f6 with f9 holding a double
            asm::op_fp(0x00, 10, 9, 6),
            asm::lui(1, 0x80001),
            asm::fsw(2, 1, 0),
            asm::ebreak(),
        ];
        let mut vm = vm_with_ram(Config::default());
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        vm.hart_mut(0)
            .unwrap()
            .registers_mut()
            .set_f(Specifier::from_u5(9), 1.5f64.to_bits());
        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));

        let canonical_nan = NAN_BOXED | u64::from(CANONICAL_NAN_F32);
        assert_eq!(canonical_nan, f(&vm, 0, 2));
        assert_eq!(canonical_nan, f(&vm, 0, 4));
        assert_eq!(canonical_nan, f(&vm, 0, 5));
        assert_eq!(canonical_nan, f(&vm, 0, 10));
        assert_eq!(NAN_BOXED | 0x4040_0000, f(&vm, 0, 7));
        assert_eq!(NAN_BOXED | 0x4070_0000, f(&vm, 0, 8));
        let stored = vm.mmu_mut().physical_mut().read32(RAM_BASE + 0x1000);
        assert_eq!(Ok(CANONICAL_NAN_F32), stored);
    }

    #[test]
    fn test_csr_set_and_clear_without_write() {
        let (cycle, mhartid) = (u32::from(csr::CYCLE), u32::from(csr::MHARTID));
        let program = [
            asm::csrrs(5, cycle, 0),
            asm::csrrci(6, mhartid, 0),
            asm::csrrc(7, cycle, 0),
            asm::addi(1, 0, 1),
            // Writes the read-only cycle counter
            asm::csrrs(8, cycle, 1),
        ];
        let mut vm = vm_with_ram(Config::default());
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        vm.load(RAM_BASE + 0x100, &asm::to_bytes(&[asm::ebreak()]))
            .unwrap();
        let _ = vm
            .hart_mut(0)
            .unwrap()
            .write_csr(csr::MTVEC, RAM_BASE + 0x100);
        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));
        let hart = vm.hart(0).unwrap();
        // Only the last instruction trapped
        assert_eq!(2, hart.read_csr(csr::MCAUSE));
        assert_eq!(RAM_BASE + 16, hart.read_csr(csr::MEPC));
        assert_eq!(program[4], hart.read_csr(csr::MTVAL));
        assert_eq!(0, x(&vm, 0, 6));
        assert_eq!(0, x(&vm, 0, 8));
    }

    /// Enters `mpp` through `mret` and executes `ecall` there, with nothing delegated.
    fn environment_call_from(mpp: u32) -> Vm {
        let mut vm = vm_with_ram(Config::default());
        vm.load(RAM_BASE, &asm::to_bytes(&[asm::mret()])).unwrap();
        vm.load(RAM_BASE + 0x10, &asm::to_bytes(&[asm::ecall()]))
            .unwrap();
        vm.load(RAM_BASE + 0x20, &asm::to_bytes(&[asm::spin()]))
            .unwrap();
        let hart = vm.hart_mut(0).unwrap();
        let _ = hart.write_csr(csr::MSTATUS, mpp << 11);
        let _ = hart.write_csr(csr::MEPC, RAM_BASE + 0x10);
        let _ = hart.write_csr(csr::MTVEC, RAM_BASE + 0x20);
        let _ = hart.write_csr(csr::MEDELEG, 0);
        assert_eq!(InterpretResult::Completed, vm.interpret(8));
        vm
    }

    #[test]
    fn test_environment_call_causes() {
        for (mpp, level, cause) in [
            (0b00, PrivilegeLevel::User, 8),
            (0b01, PrivilegeLevel::Supervisor, 9),
            (0b11, PrivilegeLevel::Machine, 11),
        ] {
            let vm = environment_call_from(mpp);
            let hart = vm.hart(0).unwrap();
            assert_eq!(cause, hart.read_csr(csr::MCAUSE), "ecall from {level:?}");
            assert_eq!(RAM_BASE + 0x10, hart.read_csr(csr::MEPC));
            assert_eq!(0, hart.read_csr(csr::MTVAL));
            assert_eq!(level, hart.csrs().status().mpp());
            assert_eq!(PrivilegeLevel::Machine, hart.privilege());
            assert_eq!(RAM_BASE + 0x20, hart.registers().pc());
        }
    }

    #[test]
    fn test_atomic_min_max_swap() {
        let program = [
            asm::lui(1, 0x80001),
            asm::addi(2, 0, 3),
            asm::addi(8, 0, -5),
            asm::sw(8, 1, 0),
            asm::addi(10, 0, -1),
            // amomin.w x3, x2, (x1)
            asm::amo(0b10000, 3, 2, 1),
            // amominu.w x4, x2, (x1)
            asm::amo(0b11000, 4, 2, 1),
            // amomaxu.w x5, x10, (x1)
            asm::amo(0b11100, 5, 10, 1),
            // amomax.w x6, x2, (x1)
            asm::amo(0b10100, 6, 2, 1),
            // amoswap.w x7, x10, (x1)
            asm::amo(0b00001, 7, 10, 1),
            asm::lw(9, 1, 0),
            asm::ebreak(),
        ];
        let mut vm = vm_with_ram(Config::default());
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));
        assert_eq!(-5, x(&vm, 0, 3) as i32);
        assert_eq!(-5, x(&vm, 0, 4) as i32);
        assert_eq!(3, x(&vm, 0, 5));
        assert_eq!(u32::MAX, x(&vm, 0, 6));
        assert_eq!(3, x(&vm, 0, 7));
        assert_eq!(u32::MAX, x(&vm, 0, 9));
    }

    #[test]
    fn test_load_reserved_store_conditional() {
        let program = [
            asm::lui(1, 0x80001),
            asm::lr_w(2, 1),
            asm::addi(2, 2, 7),
            asm::sc_w(3, 2, 1),
            // The reservation was consumed
            asm::sc_w(4, 2, 1),
            asm::lr_w(5, 1),
            // A plain store to the granule drops the reservation
            asm::sw(0, 1, 0),
            asm::sc_w(6, 2, 1),
            asm::lw(7, 1, 0),
            asm::ebreak(),
        ];
        let mut vm = vm_with_ram(Config::default());
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));
        assert_eq!(0, x(&vm, 0, 3));
        assert_eq!(1, x(&vm, 0, 4));
        assert_eq!(7, x(&vm, 0, 5));
        assert_eq!(1, x(&vm, 0, 6));
        assert_eq!(0, x(&vm, 0, 7));
    }

    #[test]
    fn test_timer_interrupt_through_clint() {
        let mut vm = vm_with_ram(Config::default());
        let program = [
            // Program mtimecmp to 0 through the CLINT
            asm::lui(1, 0x02004),
            asm::sw(0, 1, 0),
            asm::sw(0, 1, 4),
            asm::spin(),
        ];
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        vm.load(RAM_BASE + 0x100, &asm::to_bytes(&[asm::ebreak()]))
            .unwrap();
        let hart = vm.hart_mut(0).unwrap();
        let _ = hart.write_csr(csr::MTVEC, RAM_BASE + 0x100);
        let _ = hart.write_csr(csr::MIE, 1 << 7);
        let _ = hart.write_csr(csr::MSTATUS, 1 << 3);

        assert_eq!(InterpretResult::Break { hart_id: 0 }, vm.interpret(100));
        assert_eq!(0, vm.clint().mtimecmp(0));
        let hart = vm.hart(0).unwrap();
        assert_eq!(0x8000_0007, hart.read_csr(csr::MCAUSE));
        assert_eq!(RAM_BASE + 12, hart.read_csr(csr::MEPC));
        assert_eq!(RAM_BASE + 0x104, hart.registers().pc());
    }

    #[test]
    fn test_atomic_add_from_two_harts() {
        let mut vm = vm_with_ram(Config {
            harts: 2,
            ..Config::default()
        });
        let program = [
            asm::lui(1, 0x80001),
            asm::addi(2, 0, 1),
            asm::amoadd_w(3, 2, 1),
            asm::spin(),
        ];
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        assert_eq!(InterpretResult::Completed, vm.interpret(32));

        let accumulator = vm.mmu_mut().physical_mut().read32(RAM_BASE + 0x1000);
        assert_eq!(Ok(2), accumulator);
        let mut old_values = [x(&vm, 0, 3), x(&vm, 1, 3)];
        old_values.sort();
        assert_eq!([0, 1], old_values);
        assert_eq!(1, vm.hart(1).unwrap().read_csr(csr::MHARTID));
    }

    /// Drops to user mode and executes `ebreak` there, with breakpoints raised as exceptions.
    fn user_mode_breakpoint(medeleg: u32) -> Vm {
        let mut vm = vm_with_ram(Config {
            halt_on_ebreak: false,
            ..Config::default()
        });
        vm.load(RAM_BASE, &asm::to_bytes(&[asm::mret()])).unwrap();
        vm.load(RAM_BASE + 0x10, &asm::to_bytes(&[asm::ebreak()]))
            .unwrap();
        vm.load(RAM_BASE + 0x20, &asm::to_bytes(&[asm::spin()]))
            .unwrap();
        vm.load(RAM_BASE + 0x30, &asm::to_bytes(&[asm::spin()]))
            .unwrap();
        let hart = vm.hart_mut(0).unwrap();
        // MPP = U, SIE set
        let _ = hart.write_csr(csr::MSTATUS, 1 << 1);
        let _ = hart.write_csr(csr::MEPC, RAM_BASE + 0x10);
        let _ = hart.write_csr(csr::MTVEC, RAM_BASE + 0x20);
        let _ = hart.write_csr(csr::STVEC, RAM_BASE + 0x30);
        let _ = hart.write_csr(csr::MEDELEG, medeleg);
        assert_eq!(InterpretResult::Completed, vm.interpret(8));
        vm
    }

    #[test]
    fn test_delegated_breakpoint() {
        let vm = user_mode_breakpoint(1 << 3);
        let hart = vm.hart(0).unwrap();
        assert_eq!(PrivilegeLevel::Supervisor, hart.privilege());
        assert_eq!(RAM_BASE + 0x30, hart.registers().pc());
        assert_eq!(3, hart.read_csr(csr::SCAUSE));
        assert_eq!(RAM_BASE + 0x10, hart.read_csr(csr::SEPC));
        assert_eq!(RAM_BASE + 0x10, hart.read_csr(csr::STVAL));
        assert_eq!(0, hart.read_csr(csr::MCAUSE));
        let status = hart.csrs().status();
        assert_eq!(PrivilegeLevel::User, status.spp());
        assert!(status.pie(PrivilegeLevel::Supervisor));
        assert!(!status.ie(PrivilegeLevel::Supervisor));
    }

    #[test]
    fn test_undelegated_breakpoint() {
        let vm = user_mode_breakpoint(0);
        let hart = vm.hart(0).unwrap();
        assert_eq!(PrivilegeLevel::Machine, hart.privilege());
        assert_eq!(RAM_BASE + 0x20, hart.registers().pc());
        assert_eq!(3, hart.read_csr(csr::MCAUSE));
        assert_eq!(RAM_BASE + 0x10, hart.read_csr(csr::MEPC));
        assert_eq!(PrivilegeLevel::User, hart.csrs().status().mpp());
        assert_eq!(0, hart.read_csr(csr::SCAUSE));
    }

    #[test]
    fn test_superpage_translation() {
        const ROOT_TABLE: u32 = RAM_BASE + 0x2000;
        let mut vm = vm_with_ram(Config::default());
        let program = [
            asm::mret(),
            asm::spin(),
            asm::spin(),
            asm::spin(),
            // Supervisor code
            asm::lui(8, 0x80000),
            asm::lw(7, 8, 0x80),
            asm::lui(6, 0x40000),
            asm::lw(5, 6, 0),
            asm::ebreak(),
        ];
        vm.load(RAM_BASE, &asm::to_bytes(&program)).unwrap();
        vm.load(RAM_BASE + 0x80, &0x1234_5678u32.to_le_bytes())
            .unwrap();
        // Identity mapped RWX superpage at 0x8000_0000
        vm.load(ROOT_TABLE + 4 * 0x200, &0x2000_000Fu32.to_le_bytes())
            .unwrap();
        // Superpage at 0x4000_0000 whose PPN[0] is not zero
        vm.load(ROOT_TABLE + 4 * 0x100, &0x2000_0407u32.to_le_bytes())
            .unwrap();

        let hart = vm.hart_mut(0).unwrap();
        let _ = hart.write_csr(csr::MSTATUS, 0b01 << 11);
        let _ = hart.write_csr(csr::MEPC, RAM_BASE + 0x10);
        let _ = hart.write_csr(csr::MTVEC, RAM_BASE + 0x4);
        let _ = hart.write_csr(csr::SATP, 1 << 31 | ROOT_TABLE >> 12);

        assert_eq!(InterpretResult::Completed, vm.interpret(16));
        let hart = vm.hart(0).unwrap();
        assert_eq!(0x1234_5678, x(&vm, 0, 7));
        assert_eq!(PrivilegeLevel::Machine, hart.privilege());
        assert_eq!(13, hart.read_csr(csr::MCAUSE));
        assert_eq!(0x4000_0000, hart.read_csr(csr::MTVAL));
        assert_eq!(RAM_BASE + 0x1C, hart.read_csr(csr::MEPC));
        assert_eq!(PrivilegeLevel::Supervisor, hart.csrs().status().mpp());
    }

    #[test]
    fn test_reset() {
        let mut vm = vm_with_ram(Config::default());
        vm.load(RAM_BASE, &asm::to_bytes(&[asm::addi(1, 0, 1), asm::spin()]))
            .unwrap();
        vm.interpret(4);
        assert_eq!(1, x(&vm, 0, 1));
        vm.reset();
        assert_eq!(0, x(&vm, 0, 1));
        assert_eq!(RAM_BASE, vm.hart(0).unwrap().registers().pc());
    }
}
