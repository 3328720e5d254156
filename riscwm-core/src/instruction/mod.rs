//! Instruction decoding for RV32IMAF (plus `FLD`/`FSD`) and the compressed extension.
//!
//! Decoding is a pure function of the instruction bits. Any encoding that is not supported
//! results in a [`DecodeError`], which the hart turns into an illegal instruction exception.

mod compressed;

pub use compressed::{
    c_funct2, c_funct3, c_funct4, c_funct6, c_opcode, c_rs1, c_rs1_prime, c_rs2, c_rs2_prime,
};

use crate::csr::CsrSpecifier;
use crate::registers::Specifier;
use thiserror::Error;

/// Data structure that can hold any supported instruction in its decoded form.
///
/// Compressed instructions decode into their 32-bit equivalents.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    },
    Auipc {
        dest: Specifier,
        immediate: i32,
    },
    Lui {
        dest: Specifier,
        immediate: i32,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Jal {
        dest: Specifier,
        offset: i32,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    Fence,
    FenceI,
    Ecall,
    Ebreak,
    /// `slt x0, x1, rs2`: a no-op encoding used as a debugger breakpoint marker.
    BreakHint,
    Uret,
    Sret,
    Mret,
    Wfi,
    SfenceVma {
        vaddr: Specifier,
        asid: Specifier,
    },
    Csr {
        op: CsrOp,
        dest: Specifier,
        src: CsrSource,
        csr: CsrSpecifier,
    },
    LoadFp {
        width: FpWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    StoreFp {
        width: FpWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    OpFp {
        op: FpOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        rounding: RoundingMode,
    },
    FusedFp {
        op: FusedOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        src3: Specifier,
        rounding: RoundingMode,
    },
    Amo {
        op: AmoOp,
        dest: Specifier,
        address: Specifier,
        src: Specifier,
    },
    LrW {
        dest: Specifier,
        address: Specifier,
    },
    ScW {
        dest: Specifier,
        address: Specifier,
        src: Specifier,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add,
    Slt,
    Sltu,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sub,
    Sra,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bltu,
    Bge,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
}

/// The read-modify-write flavor of a CSR instruction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp {
    ReadWrite,
    ReadSet,
    ReadClear,
}

/// The second operand of a CSR instruction: either a register or a 5-bit zero-extended
/// immediate (`CSRR*I`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrSource {
    Register(Specifier),
    Immediate(u32),
}

/// Width of a floating-point load or store.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpWidth {
    /// 32-bit, NaN-boxed into the destination.
    W,
    /// 64-bit, moved as raw bits.
    D,
}

/// Single-precision `OP-FP` operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpOp {
    Add,
    Sub,
    Mul,
    Div,
    Sqrt,
    Sgnj,
    Sgnjn,
    Sgnjx,
    Min,
    Max,
    /// `FCVT.W.S`
    CvtWS,
    /// `FCVT.WU.S`
    CvtWuS,
    /// `FCVT.S.W`
    CvtSW,
    /// `FCVT.S.WU`
    CvtSWu,
    /// `FMV.X.W`
    MvXW,
    Class,
    Eq,
    Lt,
    Le,
    /// `FMV.W.X`
    MvWX,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FusedOp {
    Madd,
    Msub,
    Nmsub,
    Nmadd,
}

/// Floating-point rounding mode from the `rm` field.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RoundingMode {
    /// Round to nearest, ties to even.
    Rne,
    /// Round towards zero.
    Rtz,
    /// Round down (towards -infinity).
    Rdn,
    /// Round up (towards +infinity).
    Rup,
    /// Round to nearest, ties to max magnitude.
    Rmm,
    /// Use the mode in `frm`.
    Dynamic,
}

/// Word-sized atomic memory operations (excluding `LR.W`/`SC.W`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoOp {
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

impl Instruction {
    /// Decode a 32-bit instruction (lowest two bits `0b11`).
    pub fn decode(raw_instruction: u32) -> Result<Self, DecodeError> {
        use DecodeError::IllegalInstruction;
        match opcode(raw_instruction).ok_or(DecodeError::UnsupportedOpcode)? {
            Opcode::OpImm => match i_funct(raw_instruction) {
                Some(op) => Ok(Self::OpImm {
                    op,
                    dest: rd(raw_instruction),
                    src: rs1(raw_instruction),
                    immediate: i_imm(raw_instruction),
                }),
                None => match i_shfunct(raw_instruction) {
                    Some(op) => Ok(Self::OpShiftImm {
                        op,
                        dest: rd(raw_instruction),
                        src: rs1(raw_instruction),
                        shift_amount_u5: shamt(raw_instruction),
                    }),
                    None => Err(IllegalInstruction),
                },
            },
            Opcode::Auipc => Ok(Self::Auipc {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Lui => Ok(Self::Lui {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Op => {
                let op = r_funct(raw_instruction).ok_or(IllegalInstruction)?;
                if op == RegRegOp::Slt
                    && rd(raw_instruction) == Specifier::X0
                    && rs1(raw_instruction) == Specifier::X1
                {
                    return Ok(Self::BreakHint);
                }
                Ok(Self::Op {
                    op,
                    dest: rd(raw_instruction),
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                })
            }
            Opcode::Jal => Ok(Self::Jal {
                dest: rd(raw_instruction),
                offset: j_imm(raw_instruction),
            }),
            Opcode::Jalr => match funct3(raw_instruction) {
                0b000 => Ok(Self::Jalr {
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                _ => Err(IllegalInstruction),
            },
            Opcode::Branch => match b_funct(raw_instruction) {
                Some(condition) => Ok(Self::Branch {
                    condition,
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                    offset: b_imm(raw_instruction),
                }),
                None => Err(IllegalInstruction),
            },
            Opcode::Load => match i_width(raw_instruction) {
                Some(width) => Ok(Self::Load {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                None => Err(IllegalInstruction),
            },
            Opcode::Store => match s_width(raw_instruction) {
                Some(width) => Ok(Self::Store {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                }),
                None => Err(IllegalInstruction),
            },
            // Unused FENCE fields are reserved and must be treated as a normal fence, and the
            // emulator executes memory accesses in order, so all fences are no-ops.
            Opcode::MiscMem => match funct3(raw_instruction) {
                0b000 => Ok(Self::Fence),
                0b001 => Ok(Self::FenceI),
                _ => Err(IllegalInstruction),
            },
            Opcode::System => decode_system(raw_instruction),
            Opcode::LoadFp => match fp_width(raw_instruction) {
                Some(width) => Ok(Self::LoadFp {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                None => Err(IllegalInstruction),
            },
            Opcode::StoreFp => match fp_width(raw_instruction) {
                Some(width) => Ok(Self::StoreFp {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                }),
                None => Err(IllegalInstruction),
            },
            Opcode::OpFp => decode_op_fp(raw_instruction),
            Opcode::Fused(op) => {
                // Only the single-precision format is supported
                if (raw_instruction >> 25) & 0b11 != 0b00 {
                    return Err(IllegalInstruction);
                }
                Ok(Self::FusedFp {
                    op,
                    dest: rd(raw_instruction),
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                    src3: rs3(raw_instruction),
                    rounding: rounding_mode(raw_instruction).ok_or(IllegalInstruction)?,
                })
            }
            Opcode::Amo => decode_amo(raw_instruction),
        }
    }

    /// Decode a 16-bit compressed instruction (lowest two bits not `0b11`) into its 32-bit
    /// equivalent.
    pub fn decode_compressed(raw_instruction: u16) -> Result<Self, DecodeError> {
        compressed::decode(raw_instruction)
    }
}

fn decode_system(raw_instruction: u32) -> Result<Instruction, DecodeError> {
    use DecodeError::IllegalInstruction;
    let csr_source_register = CsrSource::Register(rs1(raw_instruction));
    let csr_source_immediate = CsrSource::Immediate(u8::from(rs1(raw_instruction)).into());
    let (op, src) = match funct3(raw_instruction) {
        0b000 => return decode_privileged(raw_instruction),
        0b001 => (CsrOp::ReadWrite, csr_source_register),
        0b010 => (CsrOp::ReadSet, csr_source_register),
        0b011 => (CsrOp::ReadClear, csr_source_register),
        0b101 => (CsrOp::ReadWrite, csr_source_immediate),
        0b110 => (CsrOp::ReadSet, csr_source_immediate),
        0b111 => (CsrOp::ReadClear, csr_source_immediate),
        _ => return Err(IllegalInstruction),
    };
    Ok(Instruction::Csr {
        op,
        dest: rd(raw_instruction),
        src,
        csr: (raw_instruction >> 20) as CsrSpecifier,
    })
}

fn decode_privileged(raw_instruction: u32) -> Result<Instruction, DecodeError> {
    if rd(raw_instruction) != Specifier::X0 {
        return Err(DecodeError::IllegalInstruction);
    }
    if funct7(raw_instruction) == 0b0001001 {
        return Ok(Instruction::SfenceVma {
            vaddr: rs1(raw_instruction),
            asid: rs2(raw_instruction),
        });
    }
    if rs1(raw_instruction) != Specifier::X0 {
        return Err(DecodeError::IllegalInstruction);
    }
    match raw_instruction >> 20 {
        0x000 => Ok(Instruction::Ecall),
        0x001 => Ok(Instruction::Ebreak),
        0x002 => Ok(Instruction::Uret),
        0x102 => Ok(Instruction::Sret),
        0x302 => Ok(Instruction::Mret),
        0x105 => Ok(Instruction::Wfi),
        _ => Err(DecodeError::IllegalInstruction),
    }
}

fn decode_op_fp(raw_instruction: u32) -> Result<Instruction, DecodeError> {
    use DecodeError::IllegalInstruction;
    let rs2_index = u8::from(rs2(raw_instruction));
    let rm = funct3(raw_instruction);
    let op = match (funct7(raw_instruction), rs2_index, rm) {
        (0x00, _, _) => FpOp::Add,
        (0x04, _, _) => FpOp::Sub,
        (0x08, _, _) => FpOp::Mul,
        (0x0C, _, _) => FpOp::Div,
        (0x2C, 0, _) => FpOp::Sqrt,
        (0x10, _, 0b000) => FpOp::Sgnj,
        (0x10, _, 0b001) => FpOp::Sgnjn,
        (0x10, _, 0b010) => FpOp::Sgnjx,
        (0x14, _, 0b000) => FpOp::Min,
        (0x14, _, 0b001) => FpOp::Max,
        (0x60, 0, _) => FpOp::CvtWS,
        (0x60, 1, _) => FpOp::CvtWuS,
        (0x68, 0, _) => FpOp::CvtSW,
        (0x68, 1, _) => FpOp::CvtSWu,
        (0x70, 0, 0b000) => FpOp::MvXW,
        (0x70, 0, 0b001) => FpOp::Class,
        (0x50, _, 0b010) => FpOp::Eq,
        (0x50, _, 0b001) => FpOp::Lt,
        (0x50, _, 0b000) => FpOp::Le,
        (0x78, 0, 0b000) => FpOp::MvWX,
        // Includes every double-precision (fmt = 01) operation
        _ => return Err(IllegalInstruction),
    };
    let rounding = match op {
        FpOp::Add
        | FpOp::Sub
        | FpOp::Mul
        | FpOp::Div
        | FpOp::Sqrt
        | FpOp::CvtWS
        | FpOp::CvtWuS
        | FpOp::CvtSW
        | FpOp::CvtSWu => rounding_mode(raw_instruction).ok_or(IllegalInstruction)?,
        _ => RoundingMode::Dynamic,
    };
    Ok(Instruction::OpFp {
        op,
        dest: rd(raw_instruction),
        src1: rs1(raw_instruction),
        src2: rs2(raw_instruction),
        rounding,
    })
}

fn decode_amo(raw_instruction: u32) -> Result<Instruction, DecodeError> {
    use DecodeError::IllegalInstruction;
    // Only word-sized atomics exist on RV32
    if funct3(raw_instruction) != 0b010 {
        return Err(IllegalInstruction);
    }
    let dest = rd(raw_instruction);
    let address = rs1(raw_instruction);
    let src = rs2(raw_instruction);
    // The aq and rl bits (26 and 25) are irrelevant, all accesses are sequentially consistent
    let op = match raw_instruction >> 27 {
        0b00000 => AmoOp::Add,
        0b00001 => AmoOp::Swap,
        0b00010 if src == Specifier::X0 => return Ok(Instruction::LrW { dest, address }),
        0b00011 => return Ok(Instruction::ScW { dest, address, src }),
        0b00100 => AmoOp::Xor,
        0b01000 => AmoOp::Or,
        0b01100 => AmoOp::And,
        0b10000 => AmoOp::Min,
        0b10100 => AmoOp::Max,
        0b11000 => AmoOp::Minu,
        0b11100 => AmoOp::Maxu,
        _ => return Err(IllegalInstruction),
    };
    Ok(Instruction::Amo {
        op,
        dest,
        address,
        src,
    })
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("instruction has unsupported opcode")]
    UnsupportedOpcode,
    #[error("illegal instruction")]
    IllegalInstruction,
}

/// Returns the 7-bit *opcode* value of the instruction, or `None` if it isn't supported.
fn opcode(raw_instruction: u32) -> Option<Opcode> {
    #[allow(clippy::unusual_byte_groupings)]
    match raw_instruction & 0x7F {
        0b00_000_11 => Some(Opcode::Load),
        0b00_001_11 => Some(Opcode::LoadFp),
        // custom-0
        0b00_011_11 => Some(Opcode::MiscMem),
        0b00_100_11 => Some(Opcode::OpImm),
        0b00_101_11 => Some(Opcode::Auipc),
        // OP-IMM-32
        // 48b
        0b01_000_11 => Some(Opcode::Store),
        0b01_001_11 => Some(Opcode::StoreFp),
        // custom-1
        0b01_011_11 => Some(Opcode::Amo),
        0b01_100_11 => Some(Opcode::Op),
        0b01_101_11 => Some(Opcode::Lui),
        // OP-32
        // 64b
        0b10_000_11 => Some(Opcode::Fused(FusedOp::Madd)),
        0b10_001_11 => Some(Opcode::Fused(FusedOp::Msub)),
        0b10_010_11 => Some(Opcode::Fused(FusedOp::Nmsub)),
        0b10_011_11 => Some(Opcode::Fused(FusedOp::Nmadd)),
        0b10_100_11 => Some(Opcode::OpFp),
        // reserved
        // custom-2/rv128
        // 48b
        0b11_000_11 => Some(Opcode::Branch),
        0b11_001_11 => Some(Opcode::Jalr),
        // reserved
        0b11_011_11 => Some(Opcode::Jal),
        0b11_100_11 => Some(Opcode::System),
        // reserved
        // custom-3/rv128
        // >= 80b
        _ => None,
    }
}

/// Returns the 5-bit *rd* value for R-type, I-type, U-type, J-type instructions.
pub fn rd(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// Returns the 5-bit *rs1* value for R-type, I-type, S-type, B-type instructions.
pub fn rs1(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 15) & 0x1F) as u8)
}

/// Returns the 5-bit *rs2* value for R-type, S-type, B-type instructions.
pub fn rs2(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 20) & 0x1F) as u8)
}

/// Returns the 5-bit *rs3* value for R4-type (fused multiply-add) instructions.
pub fn rs3(raw_instruction: u32) -> Specifier {
    Specifier::from_u5((raw_instruction >> 27) as u8)
}

fn i_funct(raw_instruction: u32) -> Option<RegImmOp> {
    match funct3(raw_instruction) {
        0b000 => Some(RegImmOp::Addi),
        0b010 => Some(RegImmOp::Slti),
        0b011 => Some(RegImmOp::Sltiu),
        0b100 => Some(RegImmOp::Xori),
        0b110 => Some(RegImmOp::Ori),
        0b111 => Some(RegImmOp::Andi),
        _ => None,
    }
}

/// Any funct7 other than these two, including `shamt[5]` in bit 25, is illegal on RV32.
fn i_shfunct(raw_instruction: u32) -> Option<RegShiftImmOp> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b000_0000, 0b001) => Some(RegShiftImmOp::Slli),
        (0b000_0000, 0b101) => Some(RegShiftImmOp::Srli),
        (0b010_0000, 0b101) => Some(RegShiftImmOp::Srai),
        _ => None,
    }
}

fn i_width(raw_instruction: u32) -> Option<LoadWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(LoadWidth::Lb),
        0b001 => Some(LoadWidth::Lh),
        0b010 => Some(LoadWidth::Lw),
        0b100 => Some(LoadWidth::Lbu),
        0b101 => Some(LoadWidth::Lhu),
        _ => None,
    }
}

fn s_width(raw_instruction: u32) -> Option<StoreWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(StoreWidth::Sb),
        0b001 => Some(StoreWidth::Sh),
        0b010 => Some(StoreWidth::Sw),
        _ => None,
    }
}

fn fp_width(raw_instruction: u32) -> Option<FpWidth> {
    match funct3(raw_instruction) {
        0b010 => Some(FpWidth::W),
        0b011 => Some(FpWidth::D),
        _ => None,
    }
}

fn r_funct(raw_instruction: u32) -> Option<RegRegOp> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b0000000, 0b000) => Some(RegRegOp::Add),
        (0b0000000, 0b001) => Some(RegRegOp::Sll),
        (0b0000000, 0b010) => Some(RegRegOp::Slt),
        (0b0000000, 0b011) => Some(RegRegOp::Sltu),
        (0b0000000, 0b100) => Some(RegRegOp::Xor),
        (0b0000000, 0b101) => Some(RegRegOp::Srl),
        (0b0000000, 0b110) => Some(RegRegOp::Or),
        (0b0000000, 0b111) => Some(RegRegOp::And),
        (0b0100000, 0b000) => Some(RegRegOp::Sub),
        (0b0100000, 0b101) => Some(RegRegOp::Sra),
        (0b0000001, 0b000) => Some(RegRegOp::Mul),
        (0b0000001, 0b001) => Some(RegRegOp::Mulh),
        (0b0000001, 0b010) => Some(RegRegOp::Mulhsu),
        (0b0000001, 0b011) => Some(RegRegOp::Mulhu),
        (0b0000001, 0b100) => Some(RegRegOp::Div),
        (0b0000001, 0b101) => Some(RegRegOp::Divu),
        (0b0000001, 0b110) => Some(RegRegOp::Rem),
        (0b0000001, 0b111) => Some(RegRegOp::Remu),
        _ => None,
    }
}

fn b_funct(raw_instruction: u32) -> Option<BranchCondition> {
    match funct3(raw_instruction) {
        0b000 => Some(BranchCondition::Beq),
        0b001 => Some(BranchCondition::Bne),
        0b100 => Some(BranchCondition::Blt),
        0b101 => Some(BranchCondition::Bge),
        0b110 => Some(BranchCondition::Bltu),
        0b111 => Some(BranchCondition::Bgeu),
        _ => None,
    }
}

fn rounding_mode(raw_instruction: u32) -> Option<RoundingMode> {
    match funct3(raw_instruction) {
        0b000 => Some(RoundingMode::Rne),
        0b001 => Some(RoundingMode::Rtz),
        0b010 => Some(RoundingMode::Rdn),
        0b011 => Some(RoundingMode::Rup),
        0b100 => Some(RoundingMode::Rmm),
        0b111 => Some(RoundingMode::Dynamic),
        // 0b101 and 0b110 are reserved
        _ => None,
    }
}

/// Returns the 3-bit *funct3* value for R-type, I-type, S-type, B-type instructions.
pub fn funct3(raw_instruction: u32) -> u8 {
    ((raw_instruction >> 12) & 0b111) as u8
}

/// Returns the 7-bit *funct7* value for R-type instructions.
pub fn funct7(raw_instruction: u32) -> u8 {
    (raw_instruction >> 25) as u8
}

/// Returns the 5-bit *funct5* value for atomic instructions.
pub fn funct5(raw_instruction: u32) -> u8 {
    (raw_instruction >> 27) as u8
}

/// Returns the 5-bit *shamt* value for S-type shift instructions.
pub fn shamt(raw_instruction: u32) -> u32 {
    (raw_instruction >> 20) & 0x1F
}

/// Returns the 12-bit I-immediate sign-extended to 32 bits.
pub fn i_imm(raw_instruction: u32) -> i32 {
    raw_instruction as i32 >> 20
}

/// `imm[11:5]` from bits 31:25, `imm[4:0]` from bits 11:7.
pub fn s_imm(raw_instruction: u32) -> i32 {
    let imm = field(raw_instruction, 25, 7) << 5 | field(raw_instruction, 7, 5);
    sign_extend(imm as i32, 12)
}

/// `imm[12|10:5]` from bits 31:25, `imm[4:1|11]` from bits 11:7.
pub fn b_imm(raw_instruction: u32) -> i32 {
    let imm = field(raw_instruction, 31, 1) << 12
        | field(raw_instruction, 7, 1) << 11
        | field(raw_instruction, 25, 6) << 5
        | field(raw_instruction, 8, 4) << 1;
    sign_extend(imm as i32, 13)
}

/// Upper 20 bits in place, lower 12 bits zero.
pub fn u_imm(raw_instruction: u32) -> i32 {
    (raw_instruction & !0xFFF) as i32
}

/// `imm[20|10:1|11|19:12]` from bits 31:12.
pub fn j_imm(raw_instruction: u32) -> i32 {
    let imm = field(raw_instruction, 31, 1) << 20
        | field(raw_instruction, 12, 8) << 12
        | field(raw_instruction, 20, 1) << 11
        | field(raw_instruction, 21, 10) << 1;
    sign_extend(imm as i32, 21)
}

/// `width` bits of `raw_instruction` starting at bit `low`.
fn field(raw_instruction: u32, low: u32, width: u32) -> u32 {
    (raw_instruction >> low) & ((1 << width) - 1)
}

/// Sign-extends the lowest `width` bits of `value`.
fn sign_extend(value: i32, width: u32) -> i32 {
    (value << (32 - width)) >> (32 - width)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Opcode {
    OpImm,
    Auipc,
    Lui,
    Op,
    Jal,
    Jalr,
    Branch,
    Load,
    Store,
    MiscMem,
    System,
    LoadFp,
    StoreFp,
    OpFp,
    Fused(FusedOp),
    Amo,
}
