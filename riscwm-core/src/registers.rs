//! General purpose and floating-point registers.

use std::fmt;

/// Number of registers in both the `x` and the `f` register file.
pub const LEN: u8 = 32;

/// The upper half of a NaN-boxed single-precision value.
const NAN_BOX: u64 = 0xFFFF_FFFF_0000_0000;

/// The canonical quiet NaN produced by single-precision operations.
pub const CANONICAL_NAN_F32: u32 = 0x7FC0_0000;

/// Integer registers `x0..x31`, the program counter, and floating-point registers `f0..f31`.
///
/// `x0` reads as zero no matter what is written to it, which is why the `x` registers are only
/// reachable through [`Registers::x`] and [`Registers::set_x`].
///
/// The `f` registers are 64 bits wide so `FLD`/`FSD` can move doubles around. Single-precision
/// values live in the low half with the upper half set to all ones (NaN-boxing).
#[derive(Debug, Clone)]
pub struct Registers {
    pc: u32,
    x: [u32; LEN as usize],
    f: [u64; LEN as usize],
}

impl Default for Registers {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Registers {
    /// All registers zero, except the program counter.
    pub fn new(pc: u32) -> Self {
        Self {
            pc,
            x: [0; LEN as usize],
            f: [0; LEN as usize],
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn pc_mut(&mut self) -> &mut u32 {
        &mut self.pc
    }

    pub fn x(&self, register: Specifier) -> u32 {
        self.x[usize::from(register)]
    }

    /// Writes to `x0` are dropped.
    pub fn set_x(&mut self, register: Specifier, value: u32) {
        if register != Specifier::X0 {
            self.x[usize::from(register)] = value;
        }
    }

    /// Raw 64-bit contents of an `f` register.
    pub fn f(&self, register: Specifier) -> u64 {
        self.f[usize::from(register)]
    }

    pub fn set_f(&mut self, register: Specifier, value: u64) {
        self.f[usize::from(register)] = value;
    }

    /// Bits of the single held in an `f` register. Anything not NaN-boxed reads as the
    /// canonical NaN.
    pub fn f32_bits(&self, register: Specifier) -> u32 {
        match self.f(register) {
            boxed if boxed & NAN_BOX == NAN_BOX => boxed as u32,
            _ => CANONICAL_NAN_F32,
        }
    }

    pub fn f32(&self, register: Specifier) -> f32 {
        f32::from_bits(self.f32_bits(register))
    }

    /// NaN-boxes `bits` into an `f` register, as is.
    pub fn set_f32_bits(&mut self, register: Specifier, bits: u32) {
        self.set_f(register, NAN_BOX | u64::from(bits));
    }

    /// Like [`Registers::set_f32_bits`], with any NaN canonicalized.
    pub fn set_f32(&mut self, register: Specifier, value: f32) {
        let bits = match value.is_nan() {
            true => CANONICAL_NAN_F32,
            false => value.to_bits(),
        };
        self.set_f32_bits(register, bits);
    }

    pub fn x_all(&self) -> [u32; LEN as usize] {
        self.x
    }

    pub fn f_all(&self) -> [u64; LEN as usize] {
        self.f
    }

    /// Overwrites every register. Whatever is given for `x0` is discarded.
    pub fn load_all(&mut self, pc: u32, x: [u32; LEN as usize], f: [u64; LEN as usize]) {
        self.pc = pc;
        self.x = x;
        self.x[0] = 0;
        self.f = f;
    }
}

/// Index into the `x` or `f` register file, always below [`LEN`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Specifier(u8);

impl Specifier {
    /// `zero`
    pub const X0: Self = Self(0);
    /// `ra`
    pub const X1: Self = Self(1);
    /// `sp`
    pub const X2: Self = Self(2);

    /// Specifier from a full 5-bit register field. Panics on values above 31.
    pub fn from_u5(field: u8) -> Self {
        const_assert_eq!(LEN, 32);
        assert!(field < LEN, "register field {field} does not fit in 5 bits");
        Self(field)
    }

    /// Specifier from a 3-bit compressed register field, which addresses `x8..=x15`
    /// (or `f8..=f15`). Panics on values above 7.
    pub fn from_u3_prime(field: u8) -> Self {
        assert!(field < 8, "register field {field} does not fit in 3 bits");
        Self(field + 8)
    }
}

impl From<Specifier> for u8 {
    fn from(register: Specifier) -> Self {
        register.0
    }
}

impl From<Specifier> for usize {
    fn from(register: Specifier) -> Self {
        register.0.into()
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}
