use super::{float, load_exception, store_exception, Exception, ExecutionResult, Hart, Trap};
use crate::csr::CsrSpecifier;
use crate::instruction::{CsrOp, CsrSource, FpOp, FusedOp, RoundingMode};
use crate::mmu::{AccessContext, MemoryError, Mmu};
use crate::registers::{Registers, Specifier};
use crate::{Alignment, PrivilegeLevel};

#[derive(Debug)]
pub(super) struct Executor<'h, 'm> {
    pub hart: &'h mut Hart,
    pub mmu: &'m mut Mmu,
    /// The instruction bits, reported as `tval` of illegal instruction exceptions.
    pub raw_instruction: u32,
    /// Length of the executing instruction in bytes: 2 if compressed, 4 otherwise.
    pub length: u32,
}

impl<'h, 'm> Executor<'h, 'm> {
    /// Executes an `addi` instruction. Overflow wraps.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add_signed(imm))
    }

    /// Executes a `slti` instruction.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i32) < imm) as u32)
    }

    /// Executes a `sltiu` instruction.
    ///
    /// The immediate is sign-extended before the unsigned compare, so `sltiu rd, rs1, -1` is
    /// `rs1 != u32::MAX`.
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| (s < (imm as u32)) as u32)
    }

    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u32))
    }

    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u32))
    }

    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u32))
    }

    pub fn slli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s << shamt)
    }

    pub fn srli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s >> shamt)
    }

    pub fn srai(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| {
            ((s as i32) >> shamt) as u32
        })
    }

    /// Executes a `lui` instruction.
    ///
    /// `immediate` already holds the upper 20 bits in place.
    pub fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        let registers = &mut self.hart.registers;
        registers.set_x(dest, immediate as u32);
        increment_pc(registers, self.length);
        ExecutionResult::Ok
    }

    pub fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        let registers = &mut self.hart.registers;
        registers.set_x(dest, registers.pc().wrapping_add_signed(immediate));
        increment_pc(registers, self.length);
        ExecutionResult::Ok
    }

    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| ((s1 as i32) < (s2 as i32)) as u32)
    }

    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u32)
    }

    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// Executes a `sll` instruction.
    ///
    /// > SLL, SRL, and SRA perform logical left, logical right, and arithmetic right shifts on
    /// > the value in register rs1 by the shift amount held in the lower 5 bits of register rs2.
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x1F))
    }

    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x1F))
    }

    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) >> (s2 & 0x1F)) as u32
        })
    }

    pub fn mul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_mul(s2))
    }

    /// Executes a `mulh` instruction.
    ///
    /// > MULH, MULHU, and MULHSU perform the same multiplication but return the upper XLEN bits
    /// > of the full 2×XLEN-bit product, for signed×signed, unsigned×unsigned, and signed rs1
    /// > ×unsigned rs2 multiplication, respectively.
    pub fn mulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32 as i64 * s2 as i32 as i64) >> 32) as u32
        })
    }

    pub fn mulhsu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32 as i64).wrapping_mul(s2 as i64) >> 32) as u32
        })
    }

    pub fn mulhu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u64 * s2 as u64) >> 32) as u32
        })
    }

    /// Executes a `div` instruction.
    ///
    /// > The quotient of division by zero has all bits set, and the remainder of division by zero
    /// > equals the dividend. Signed division overflow occurs only when the most-negative integer
    /// > is divided by −1. The quotient of a signed division with overflow is equal to the
    /// > dividend, and the remainder is zero.
    pub fn div(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 {
            0 => u32::MAX,
            _ => (s1 as i32).wrapping_div(s2 as i32) as u32,
        })
    }

    pub fn divu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_div(s2).unwrap_or(u32::MAX))
    }

    pub fn rem(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 {
            0 => s1,
            _ => (s1 as i32).wrapping_rem(s2 as i32) as u32,
        })
    }

    pub fn remu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_rem(s2).unwrap_or(s1))
    }

    pub fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        self.jump_op(dest, |registers| registers.pc().wrapping_add_signed(offset))
    }

    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.jump_op(dest, |registers| {
            registers.x(base).wrapping_add_signed(offset) & !1
        })
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) < (s2 as i32))
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) >= (s2 as i32))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, context, address| {
            mmu.read_byte(context, address).map(|value| value as i8 as u32)
        })
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, context, address| {
            mmu.read_byte(context, address).map(|value| value as u32)
        })
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, context, address| {
            mmu.read_halfword(context, address)
                .map(|value| value as i16 as u32)
        })
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, context, address| {
            mmu.read_halfword(context, address).map(|value| value as u32)
        })
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |mmu, context, address| {
            mmu.read_word(context, address)
        })
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        let value = self.hart.registers.x(src);
        self.store_op(base, offset, |mmu, context, address| {
            mmu.write_byte(context, address, value as u8)
        })
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        let value = self.hart.registers.x(src);
        self.store_op(base, offset, |mmu, context, address| {
            mmu.write_halfword(context, address, value as u16)
        })
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        let value = self.hart.registers.x(src);
        self.store_op(base, offset, |mmu, context, address| {
            mmu.write_word(context, address, value)
        })
    }

    /// `FENCE` and `FENCE.I`.
    ///
    /// Every memory access is performed in program order and immediately visible to all harts,
    /// and instructions are always fetched from memory, so both are no-ops.
    pub fn fence(&mut self) -> ExecutionResult {
        increment_pc(&mut self.hart.registers, self.length);
        ExecutionResult::Ok
    }

    pub fn wfi(&mut self) -> ExecutionResult {
        increment_pc(&mut self.hart.registers, self.length);
        ExecutionResult::Ok
    }

    /// Drops all cached translations of this hart. Address and ASID operands are ignored.
    pub fn sfence_vma(&mut self) -> ExecutionResult {
        if self.hart.privilege < PrivilegeLevel::Supervisor
            || (self.hart.privilege == PrivilegeLevel::Supervisor && self.hart.csrs.status().tvm())
        {
            return self.illegal_instruction();
        }
        self.mmu.invalidate(self.hart.config.hart_id);
        increment_pc(&mut self.hart.registers, self.length);
        ExecutionResult::Ok
    }

    pub fn ecall(&mut self) -> ExecutionResult {
        let exception = match self.hart.privilege {
            PrivilegeLevel::User => Exception::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Exception::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Exception::EnvironmentCallFromMMode,
        };
        self.exception(exception, 0)
    }

    /// Stops execution when breaking on `EBREAK` is configured, or raises a breakpoint exception
    /// otherwise.
    pub fn ebreak(&mut self) -> ExecutionResult {
        if self.hart.config.halt_on_ebreak {
            increment_pc(&mut self.hart.registers, self.length);
            ExecutionResult::Break
        } else {
            let pc = self.hart.registers.pc();
            self.exception(Exception::Breakpoint, pc)
        }
    }

    /// The `slt x0, x1, rs2` breakpoint marker: a no-op unless breaking on `EBREAK` is
    /// configured.
    pub fn break_hint(&mut self) -> ExecutionResult {
        increment_pc(&mut self.hart.registers, self.length);
        match self.hart.config.halt_on_ebreak {
            true => ExecutionResult::Break,
            false => ExecutionResult::Ok,
        }
    }

    /// `MRET`, `SRET`, and `URET`.
    pub fn xret(&mut self, level: PrivilegeLevel) -> ExecutionResult {
        match self.hart.trap_return(level) {
            Ok(()) => ExecutionResult::Ok,
            Err(exception) => self.exception(exception, self.raw_instruction),
        }
    }

    /// Executes one of the six CSR instructions.
    ///
    /// > If rd=x0, then CSRRW shall not read the CSR and shall not cause any of the side effects
    /// > that might occur on a CSR read. [...] For both CSRRS and CSRRC, if rs1=x0, then the
    /// > instruction will not write to the CSR at all, and so shall not cause any of the side
    /// > effects that might otherwise occur on a CSR write.
    ///
    /// The same holds for the immediate forms with a zero immediate.
    pub fn csr(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        src: CsrSource,
        csr: CsrSpecifier,
    ) -> ExecutionResult {
        let (value, source_is_zero) = match src {
            CsrSource::Register(src) => (self.hart.registers.x(src), src == Specifier::X0),
            CsrSource::Immediate(immediate) => (immediate, immediate == 0),
        };
        let (write_value, read) = match op {
            CsrOp::ReadWrite => (Some(value), dest != Specifier::X0),
            CsrOp::ReadSet | CsrOp::ReadClear => ((!source_is_zero).then_some(value), true),
        };
        match self.hart.csr_instruction(csr, op, write_value, read) {
            Ok((old, effect)) => {
                if effect.flush_translations {
                    self.mmu.invalidate(self.hart.config.hart_id);
                }
                let registers = &mut self.hart.registers;
                registers.set_x(dest, old);
                increment_pc(registers, self.length);
                ExecutionResult::Ok
            }
            Err(exception) => self.exception(exception, self.raw_instruction),
        }
    }

    pub fn flw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        let address = self.hart.registers.x(base).wrapping_add_signed(offset);
        let context = self.hart.data_access_context();
        match self.mmu.read_word(&context, address) {
            Ok(value) => {
                let registers = &mut self.hart.registers;
                registers.set_f32_bits(dest, value);
                increment_pc(registers, self.length);
                ExecutionResult::Ok
            }
            Err(err) => self.exception(load_exception(err), address),
        }
    }

    pub fn fld(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        let address = self.hart.registers.x(base).wrapping_add_signed(offset);
        let context = self.hart.data_access_context();
        match self.mmu.read_doubleword(&context, address) {
            Ok(value) => {
                let registers = &mut self.hart.registers;
                registers.set_f(dest, value);
                increment_pc(registers, self.length);
                ExecutionResult::Ok
            }
            Err(err) => self.exception(load_exception(err), address),
        }
    }

    /// Stores the low 32 bits of an `f` register, whether NaN-boxed or not.
    pub fn fsw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        let value = self.hart.registers.f(src) as u32;
        self.store_op(base, offset, |mmu, context, address| {
            mmu.write_word(context, address, value)
        })
    }

    pub fn fsd(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        let value = self.hart.registers.f(src);
        self.store_op(base, offset, |mmu, context, address| {
            mmu.write_doubleword(context, address, value)
        })
    }

    /// Executes a single-precision `OP-FP` instruction.
    ///
    /// Depending on `op`, `dest`, `src1`, and `src2` name `f` or `x` registers.
    pub fn op_fp(
        &mut self,
        op: FpOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        rounding: RoundingMode,
    ) -> ExecutionResult {
        let registers = &mut self.hart.registers;
        let (a, b) = (registers.f32(src1), registers.f32(src2));
        let (a_bits, b_bits) = (registers.f32_bits(src1), registers.f32_bits(src2));
        match op {
            FpOp::Add => registers.set_f32(dest, a + b),
            FpOp::Sub => registers.set_f32(dest, a - b),
            FpOp::Mul => registers.set_f32(dest, a * b),
            FpOp::Div => registers.set_f32(dest, a / b),
            FpOp::Sqrt => registers.set_f32(dest, a.sqrt()),
            FpOp::Sgnj => registers.set_f32_bits(dest, float::sgnj(a_bits, b_bits)),
            FpOp::Sgnjn => registers.set_f32_bits(dest, float::sgnjn(a_bits, b_bits)),
            FpOp::Sgnjx => registers.set_f32_bits(dest, float::sgnjx(a_bits, b_bits)),
            FpOp::Min => registers.set_f32_bits(dest, float::min(a_bits, b_bits)),
            FpOp::Max => registers.set_f32_bits(dest, float::max(a_bits, b_bits)),
            FpOp::CvtWS => registers.set_x(dest, float::to_i32(a, rounding) as u32),
            FpOp::CvtWuS => registers.set_x(dest, float::to_u32(a, rounding)),
            FpOp::CvtSW => registers.set_f32(dest, registers.x(src1) as i32 as f32),
            FpOp::CvtSWu => registers.set_f32(dest, registers.x(src1) as f32),
            // Moves the raw low bits, without checking the NaN-boxing
            FpOp::MvXW => registers.set_x(dest, registers.f(src1) as u32),
            FpOp::MvWX => registers.set_f32_bits(dest, registers.x(src1)),
            FpOp::Class => registers.set_x(dest, float::classify(a_bits)),
            FpOp::Eq => registers.set_x(dest, (a == b) as u32),
            FpOp::Lt => registers.set_x(dest, (a < b) as u32),
            FpOp::Le => registers.set_x(dest, (a <= b) as u32),
        }
        increment_pc(registers, self.length);
        ExecutionResult::Ok
    }

    /// Executes a fused multiply-add, computed with a single rounding.
    pub fn fused_fp(
        &mut self,
        op: FusedOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        src3: Specifier,
    ) -> ExecutionResult {
        let registers = &mut self.hart.registers;
        let (a, b, c) = (registers.f32(src1), registers.f32(src2), registers.f32(src3));
        let result = match op {
            FusedOp::Madd => a.mul_add(b, c),
            FusedOp::Msub => a.mul_add(b, -c),
            FusedOp::Nmsub => (-a).mul_add(b, c),
            FusedOp::Nmadd => (-a).mul_add(b, -c),
        };
        registers.set_f32(dest, result);
        increment_pc(registers, self.length);
        ExecutionResult::Ok
    }

    /// Executes an `AMO*.W` instruction: atomically loads the word at `x[address]` into `dest`
    /// and stores `op(old, x[src])` back.
    pub fn amo(
        &mut self,
        dest: Specifier,
        address: Specifier,
        src: Specifier,
        op: fn(u32, u32) -> u32,
    ) -> ExecutionResult {
        let address = self.hart.registers.x(address);
        let value = self.hart.registers.x(src);
        let context = self.hart.data_access_context();
        match self
            .mmu
            .atomic_word(&context, address, |old| op(old, value))
        {
            Ok(old) => {
                let registers = &mut self.hart.registers;
                registers.set_x(dest, old);
                increment_pc(registers, self.length);
                ExecutionResult::Ok
            }
            Err(err) => self.exception(store_exception(err), address),
        }
    }

    pub fn lr_w(&mut self, dest: Specifier, address: Specifier) -> ExecutionResult {
        let address = self.hart.registers.x(address);
        let context = self.hart.data_access_context();
        match self.mmu.load_reserved(&context, address) {
            Ok(value) => {
                let registers = &mut self.hart.registers;
                registers.set_x(dest, value);
                increment_pc(registers, self.length);
                ExecutionResult::Ok
            }
            Err(err) => self.exception(load_exception(err), address),
        }
    }

    /// Writes `0` to `dest` if the store happened, `1` otherwise.
    pub fn sc_w(&mut self, dest: Specifier, address: Specifier, src: Specifier) -> ExecutionResult {
        let address = self.hart.registers.x(address);
        let value = self.hart.registers.x(src);
        let context = self.hart.data_access_context();
        match self.mmu.store_conditional(&context, address, value) {
            Ok(stored) => {
                let registers = &mut self.hart.registers;
                registers.set_x(dest, (!stored) as u32);
                increment_pc(registers, self.length);
                ExecutionResult::Ok
            }
            Err(err) => self.exception(store_exception(err), address),
        }
    }

    /// An exception raised by the current instruction.
    fn exception(&self, exception: Exception, tval: u32) -> ExecutionResult {
        ExecutionResult::Trap(Trap::exception(
            exception,
            self.hart.registers.pc(),
            tval,
        ))
    }

    fn illegal_instruction(&self) -> ExecutionResult {
        self.exception(Exception::IllegalInstruction, self.raw_instruction)
    }

    #[inline]
    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let length = self.length;
        let registers = &mut self.hart.registers;
        registers.set_x(dest, op(registers.x(src), immediate));
        increment_pc(registers, length);
        ExecutionResult::Ok
    }

    #[inline]
    fn reg_shamt_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        if shift_amount_u5 > 31 {
            panic!("out of range u5 used");
        }
        let length = self.length;
        let registers = &mut self.hart.registers;
        registers.set_x(dest, op(registers.x(src), shift_amount_u5));
        increment_pc(registers, length);
        ExecutionResult::Ok
    }

    #[inline]
    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let length = self.length;
        let registers = &mut self.hart.registers;
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        increment_pc(registers, length);
        ExecutionResult::Ok
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Registers) -> u32,
    {
        let length = self.length;
        // Compute target pc
        let new_pc = compute_target(&self.hart.registers);
        // With compressed instructions, targets only need to be halfword-aligned
        if !Alignment::HALFWORD.is_aligned(new_pc) {
            return self.exception(Exception::InstructionAddressMisaligned, new_pc);
        }
        let registers = &mut self.hart.registers;
        // Update pc to target
        let old_pc = std::mem::replace(registers.pc_mut(), new_pc);
        // Write incremented old pc to `dest` register
        registers.set_x(dest, old_pc.wrapping_add(length));
        ExecutionResult::Ok
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u32, u32) -> bool,
    {
        let length = self.length;
        let registers = &mut self.hart.registers;
        if predicate(registers.x(src1), registers.x(src2)) {
            let new_pc = registers.pc().wrapping_add_signed(offset);
            if !Alignment::HALFWORD.is_aligned(new_pc) {
                return self.exception(Exception::InstructionAddressMisaligned, new_pc);
            }
            *registers.pc_mut() = new_pc;
        } else {
            increment_pc(registers, length);
        }
        ExecutionResult::Ok
    }

    #[inline]
    fn load_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        offset: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&mut Mmu, &AccessContext, u32) -> Result<u32, MemoryError>,
    {
        let address = self.hart.registers.x(base).wrapping_add_signed(offset);
        let context = self.hart.data_access_context();
        match op(&mut *self.mmu, &context, address) {
            Ok(value) => {
                let length = self.length;
                let registers = &mut self.hart.registers;
                registers.set_x(dest, value);
                increment_pc(registers, length);
                ExecutionResult::Ok
            }
            Err(err) => self.exception(load_exception(err), address),
        }
    }

    #[inline]
    fn store_op<F>(&mut self, base: Specifier, offset: i32, op: F) -> ExecutionResult
    where
        F: FnOnce(&mut Mmu, &AccessContext, u32) -> Result<(), MemoryError>,
    {
        let address = self.hart.registers.x(base).wrapping_add_signed(offset);
        let context = self.hart.data_access_context();
        match op(&mut *self.mmu, &context, address) {
            Ok(()) => {
                let length = self.length;
                increment_pc(&mut self.hart.registers, length);
                ExecutionResult::Ok
            }
            Err(err) => self.exception(store_exception(err), address),
        }
    }
}

fn increment_pc(registers: &mut Registers, length: u32) {
    let pc = registers.pc_mut();
    *pc = pc.wrapping_add(length);
}
