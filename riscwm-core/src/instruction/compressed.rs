//! Expansion of RV32C (including the `F` and `D` load/store forms) into base instructions.

use super::{
    sign_extend, BranchCondition, DecodeError, FpWidth, Instruction, LoadWidth, RegImmOp,
    RegRegOp, RegShiftImmOp, StoreWidth,
};
use crate::registers::Specifier;

pub(super) fn decode(raw_instruction: u16) -> Result<Instruction, DecodeError> {
    match c_opcode(raw_instruction) {
        0b00 => decode_quadrant0(raw_instruction),
        0b01 => decode_quadrant1(raw_instruction),
        0b10 => decode_quadrant2(raw_instruction),
        _ => Err(DecodeError::UnsupportedOpcode),
    }
}

fn decode_quadrant0(raw_instruction: u16) -> Result<Instruction, DecodeError> {
    let rs1 = c_rs1_prime(raw_instruction);
    let rd = c_rs2_prime(raw_instruction);
    match c_funct3(raw_instruction) {
        // C.ADDI4SPN, the all-zero instruction is illegal and also has a zero immediate
        0b000 => match ciw_imm(raw_instruction) {
            0 => Err(DecodeError::IllegalInstruction),
            immediate => Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: rd,
                src: Specifier::X2,
                immediate,
            }),
        },
        0b001 => Ok(Instruction::LoadFp {
            width: FpWidth::D,
            dest: rd,
            base: rs1,
            offset: cl_imm_d(raw_instruction),
        }),
        0b010 => Ok(Instruction::Load {
            width: LoadWidth::Lw,
            dest: rd,
            base: rs1,
            offset: cl_imm_w(raw_instruction),
        }),
        0b011 => Ok(Instruction::LoadFp {
            width: FpWidth::W,
            dest: rd,
            base: rs1,
            offset: cl_imm_w(raw_instruction),
        }),
        0b101 => Ok(Instruction::StoreFp {
            width: FpWidth::D,
            src: rd,
            base: rs1,
            offset: cl_imm_d(raw_instruction),
        }),
        0b110 => Ok(Instruction::Store {
            width: StoreWidth::Sw,
            src: rd,
            base: rs1,
            offset: cl_imm_w(raw_instruction),
        }),
        0b111 => Ok(Instruction::StoreFp {
            width: FpWidth::W,
            src: rd,
            base: rs1,
            offset: cl_imm_w(raw_instruction),
        }),
        _ => Err(DecodeError::IllegalInstruction),
    }
}

fn decode_quadrant1(raw_instruction: u16) -> Result<Instruction, DecodeError> {
    let rd = c_rs1(raw_instruction);
    match c_funct3(raw_instruction) {
        // C.NOP, C.ADDI
        0b000 => Ok(Instruction::OpImm {
            op: RegImmOp::Addi,
            dest: rd,
            src: rd,
            immediate: ci_imm(raw_instruction),
        }),
        0b001 => Ok(Instruction::Jal {
            dest: Specifier::X1,
            offset: cj_imm(raw_instruction),
        }),
        0b010 => Ok(Instruction::OpImm {
            op: RegImmOp::Addi,
            dest: rd,
            src: Specifier::X0,
            immediate: ci_imm(raw_instruction),
        }),
        0b011 if rd == Specifier::X2 => match ci_addi16sp_imm(raw_instruction) {
            0 => Err(DecodeError::IllegalInstruction),
            immediate => Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::X2,
                src: Specifier::X2,
                immediate,
            }),
        },
        0b011 => match ci_imm(raw_instruction) {
            0 => Err(DecodeError::IllegalInstruction),
            immediate => Ok(Instruction::Lui {
                dest: rd,
                immediate: immediate << 12,
            }),
        },
        0b100 => decode_quadrant1_arithmetic(raw_instruction),
        0b101 => Ok(Instruction::Jal {
            dest: Specifier::X0,
            offset: cj_imm(raw_instruction),
        }),
        0b110 => Ok(Instruction::Branch {
            condition: BranchCondition::Beq,
            src1: c_rs1_prime(raw_instruction),
            src2: Specifier::X0,
            offset: cb_imm(raw_instruction),
        }),
        0b111 => Ok(Instruction::Branch {
            condition: BranchCondition::Bne,
            src1: c_rs1_prime(raw_instruction),
            src2: Specifier::X0,
            offset: cb_imm(raw_instruction),
        }),
        _ => unreachable!("funct3 is a 3-bit field"),
    }
}

fn decode_quadrant1_arithmetic(raw_instruction: u16) -> Result<Instruction, DecodeError> {
    let rd = c_rs1_prime(raw_instruction);
    let shift = |op| {
        // shamt[5] must be zero on RV32
        if bit(raw_instruction, 12) != 0 {
            return Err(DecodeError::IllegalInstruction);
        }
        Ok(Instruction::OpShiftImm {
            op,
            dest: rd,
            src: rd,
            shift_amount_u5: ci_imm(raw_instruction) as u32 & 0x1F,
        })
    };
    match (raw_instruction >> 10) & 0b11 {
        0b00 => shift(RegShiftImmOp::Srli),
        0b01 => shift(RegShiftImmOp::Srai),
        0b10 => Ok(Instruction::OpImm {
            op: RegImmOp::Andi,
            dest: rd,
            src: rd,
            immediate: ci_imm(raw_instruction),
        }),
        _ => {
            // C.SUBW and C.ADDW only exist on RV64
            if bit(raw_instruction, 12) != 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            let op = match c_funct2(raw_instruction) {
                0b00 => RegRegOp::Sub,
                0b01 => RegRegOp::Xor,
                0b10 => RegRegOp::Or,
                _ => RegRegOp::And,
            };
            Ok(Instruction::Op {
                op,
                dest: rd,
                src1: rd,
                src2: c_rs2_prime(raw_instruction),
            })
        }
    }
}

fn decode_quadrant2(raw_instruction: u16) -> Result<Instruction, DecodeError> {
    let rd = c_rs1(raw_instruction);
    let rs2 = c_rs2(raw_instruction);
    match c_funct3(raw_instruction) {
        0b000 => {
            if bit(raw_instruction, 12) != 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            Ok(Instruction::OpShiftImm {
                op: RegShiftImmOp::Slli,
                dest: rd,
                src: rd,
                shift_amount_u5: ci_imm(raw_instruction) as u32 & 0x1F,
            })
        }
        0b001 => Ok(Instruction::LoadFp {
            width: FpWidth::D,
            dest: rd,
            base: Specifier::X2,
            offset: ci_ldsp_imm(raw_instruction),
        }),
        0b010 if rd == Specifier::X0 => Err(DecodeError::IllegalInstruction),
        0b010 => Ok(Instruction::Load {
            width: LoadWidth::Lw,
            dest: rd,
            base: Specifier::X2,
            offset: ci_lwsp_imm(raw_instruction),
        }),
        0b011 => Ok(Instruction::LoadFp {
            width: FpWidth::W,
            dest: rd,
            base: Specifier::X2,
            offset: ci_lwsp_imm(raw_instruction),
        }),
        0b100 => {
            let link = bit(raw_instruction, 12) != 0;
            match (link, rd == Specifier::X0, rs2 == Specifier::X0) {
                // C.JR with rs1 = x0 is reserved
                (false, true, true) => Err(DecodeError::IllegalInstruction),
                (false, false, true) => Ok(Instruction::Jalr {
                    dest: Specifier::X0,
                    base: rd,
                    offset: 0,
                }),
                // C.MV (rd = x0 is a hint)
                (false, _, false) => Ok(Instruction::Op {
                    op: RegRegOp::Add,
                    dest: rd,
                    src1: Specifier::X0,
                    src2: rs2,
                }),
                (true, true, true) => Ok(Instruction::Ebreak),
                (true, false, true) => Ok(Instruction::Jalr {
                    dest: Specifier::X1,
                    base: rd,
                    offset: 0,
                }),
                // C.ADD (rd = x0 is a hint)
                (true, _, false) => Ok(Instruction::Op {
                    op: RegRegOp::Add,
                    dest: rd,
                    src1: rd,
                    src2: rs2,
                }),
            }
        }
        0b101 => Ok(Instruction::StoreFp {
            width: FpWidth::D,
            src: rs2,
            base: Specifier::X2,
            offset: css_sdsp_imm(raw_instruction),
        }),
        0b110 => Ok(Instruction::Store {
            width: StoreWidth::Sw,
            src: rs2,
            base: Specifier::X2,
            offset: css_swsp_imm(raw_instruction),
        }),
        0b111 => Ok(Instruction::StoreFp {
            width: FpWidth::W,
            src: rs2,
            base: Specifier::X2,
            offset: css_swsp_imm(raw_instruction),
        }),
        _ => unreachable!("funct3 is a 3-bit field"),
    }
}

/// Returns bit `index` of the instruction as `0` or `1`.
fn bit(raw_instruction: u16, index: u32) -> i32 {
    ((raw_instruction >> index) & 1) as i32
}

/// Returns bits `low..=high` of the instruction, shifted down to bit 0.
fn bits(raw_instruction: u16, low: u32, high: u32) -> i32 {
    ((raw_instruction >> low) & ((1 << (high - low + 1)) - 1)) as i32
}

/// Returns the 2-bit compressed *opcode* (the quadrant).
pub fn c_opcode(raw_instruction: u16) -> u8 {
    (raw_instruction & 0b11) as u8
}

/// Returns the 3-bit *funct3* of a compressed instruction.
pub fn c_funct3(raw_instruction: u16) -> u8 {
    (raw_instruction >> 13) as u8
}

/// Returns the 4-bit *funct4* of a CR-format instruction.
pub fn c_funct4(raw_instruction: u16) -> u8 {
    (raw_instruction >> 12) as u8
}

/// Returns the 6-bit *funct6* of a CA-format instruction.
pub fn c_funct6(raw_instruction: u16) -> u8 {
    (raw_instruction >> 10) as u8
}

/// Returns the 2-bit *funct2* of a CA-format instruction.
pub fn c_funct2(raw_instruction: u16) -> u8 {
    ((raw_instruction >> 5) & 0b11) as u8
}

/// Returns the full 5-bit *rd/rs1* field of CR/CI-format instructions.
pub fn c_rs1(raw_instruction: u16) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// Returns the full 5-bit *rs2* field of CR/CSS-format instructions.
pub fn c_rs2(raw_instruction: u16) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 2) & 0x1F) as u8)
}

/// Returns the 3-bit *rs1'* (or *rd'*) field, which maps to `x8..=x15`.
pub fn c_rs1_prime(raw_instruction: u16) -> Specifier {
    Specifier::from_u3_prime(((raw_instruction >> 7) & 0b111) as u8)
}

/// Returns the 3-bit *rs2'* (or *rd'*) field, which maps to `x8..=x15`.
pub fn c_rs2_prime(raw_instruction: u16) -> Specifier {
    Specifier::from_u3_prime(((raw_instruction >> 2) & 0b111) as u8)
}

/// `imm[5|4:0]` sign-extended (C.ADDI, C.LI, C.ANDI, C.LUI, shift amounts).
fn ci_imm(raw_instruction: u16) -> i32 {
    sign_extend(
        (bit(raw_instruction, 12) << 5) | bits(raw_instruction, 2, 6),
        6,
    )
}

/// `nzimm[9|4|6|8:7|5]` sign-extended (C.ADDI16SP).
fn ci_addi16sp_imm(raw_instruction: u16) -> i32 {
    let imm = (bit(raw_instruction, 12) << 9)
        | (bit(raw_instruction, 6) << 4)
        | (bit(raw_instruction, 5) << 6)
        | (bits(raw_instruction, 3, 4) << 7)
        | (bit(raw_instruction, 2) << 5);
    sign_extend(imm, 10)
}

/// `uimm[5|4:2|7:6]` (C.LWSP, C.FLWSP).
fn ci_lwsp_imm(raw_instruction: u16) -> i32 {
    (bit(raw_instruction, 12) << 5)
        | (bits(raw_instruction, 4, 6) << 2)
        | (bits(raw_instruction, 2, 3) << 6)
}

/// `uimm[5|4:3|8:6]` (C.FLDSP).
fn ci_ldsp_imm(raw_instruction: u16) -> i32 {
    (bit(raw_instruction, 12) << 5)
        | (bits(raw_instruction, 5, 6) << 3)
        | (bits(raw_instruction, 2, 4) << 6)
}

/// `uimm[5:2|7:6]` (C.SWSP, C.FSWSP).
fn css_swsp_imm(raw_instruction: u16) -> i32 {
    (bits(raw_instruction, 9, 12) << 2) | (bits(raw_instruction, 7, 8) << 6)
}

/// `uimm[5:3|8:6]` (C.FSDSP).
fn css_sdsp_imm(raw_instruction: u16) -> i32 {
    (bits(raw_instruction, 10, 12) << 3) | (bits(raw_instruction, 7, 9) << 6)
}

/// `nzuimm[5:4|9:6|2|3]` (C.ADDI4SPN).
fn ciw_imm(raw_instruction: u16) -> i32 {
    (bits(raw_instruction, 11, 12) << 4)
        | (bits(raw_instruction, 7, 10) << 6)
        | (bit(raw_instruction, 6) << 2)
        | (bit(raw_instruction, 5) << 3)
}

/// `uimm[5:3|2|6]` (C.LW, C.SW, C.FLW, C.FSW).
fn cl_imm_w(raw_instruction: u16) -> i32 {
    (bits(raw_instruction, 10, 12) << 3)
        | (bit(raw_instruction, 6) << 2)
        | (bit(raw_instruction, 5) << 6)
}

/// `uimm[5:3|7:6]` (C.FLD, C.FSD).
fn cl_imm_d(raw_instruction: u16) -> i32 {
    (bits(raw_instruction, 10, 12) << 3) | (bits(raw_instruction, 5, 6) << 6)
}

/// `offset[11|4|9:8|10|6|7|3:1|5]` sign-extended (C.J, C.JAL).
fn cj_imm(raw_instruction: u16) -> i32 {
    let imm = (bit(raw_instruction, 12) << 11)
        | (bit(raw_instruction, 11) << 4)
        | (bits(raw_instruction, 9, 10) << 8)
        | (bit(raw_instruction, 8) << 10)
        | (bit(raw_instruction, 7) << 6)
        | (bit(raw_instruction, 6) << 7)
        | (bits(raw_instruction, 3, 5) << 1)
        | (bit(raw_instruction, 2) << 5);
    sign_extend(imm, 12)
}

/// `offset[8|4:3|7:6|2:1|5]` sign-extended (C.BEQZ, C.BNEZ).
fn cb_imm(raw_instruction: u16) -> i32 {
    let imm = (bit(raw_instruction, 12) << 8)
        | (bits(raw_instruction, 10, 11) << 3)
        | (bits(raw_instruction, 5, 6) << 6)
        | (bits(raw_instruction, 3, 4) << 1)
        | (bit(raw_instruction, 2) << 5);
    sign_extend(imm, 9)
}
