//! Single-precision helpers for the F extension, operating on raw bit patterns.
//!
//! Exception flags are not tracked (`fflags` always reads zero). Arithmetic results are rounded
//! to nearest, ties to even, by the host; only float-to-integer conversions honour the static
//! rounding mode of the instruction.

use crate::instruction::RoundingMode;
use crate::registers::CANONICAL_NAN_F32;

const SIGN_MASK: u32 = 0x8000_0000;
const NEGATIVE_ZERO: u32 = SIGN_MASK;
const POSITIVE_ZERO: u32 = 0;

/// Sign injection: magnitude of `a`, sign of `b`.
pub fn sgnj(a: u32, b: u32) -> u32 {
    (a & !SIGN_MASK) | (b & SIGN_MASK)
}

/// Sign injection: magnitude of `a`, negated sign of `b`.
pub fn sgnjn(a: u32, b: u32) -> u32 {
    (a & !SIGN_MASK) | (!b & SIGN_MASK)
}

/// Sign injection: magnitude of `a`, xor of both signs.
pub fn sgnjx(a: u32, b: u32) -> u32 {
    a ^ (b & SIGN_MASK)
}

/// `FMIN.S`: the smaller operand, where `-0.0 < +0.0` and a NaN operand is ignored unless both
/// are NaN, which gives the canonical NaN.
pub fn min(a: u32, b: u32) -> u32 {
    let (af, bf) = (f32::from_bits(a), f32::from_bits(b));
    match (af.is_nan(), bf.is_nan()) {
        (true, true) => CANONICAL_NAN_F32,
        (true, false) => b,
        (false, true) => a,
        _ if a == NEGATIVE_ZERO && b == POSITIVE_ZERO => a,
        _ if a == POSITIVE_ZERO && b == NEGATIVE_ZERO => b,
        _ if af < bf => a,
        _ => b,
    }
}

/// `FMAX.S`: the larger operand, with the same NaN and signed zero rules as [`min`].
pub fn max(a: u32, b: u32) -> u32 {
    let (af, bf) = (f32::from_bits(a), f32::from_bits(b));
    match (af.is_nan(), bf.is_nan()) {
        (true, true) => CANONICAL_NAN_F32,
        (true, false) => b,
        (false, true) => a,
        _ if a == NEGATIVE_ZERO && b == POSITIVE_ZERO => b,
        _ if a == POSITIVE_ZERO && b == NEGATIVE_ZERO => a,
        _ if af > bf => a,
        _ => b,
    }
}

/// Rounds `value` to an integral value according to `rounding`.
///
/// The dynamic rounding mode resolves to round to nearest, ties to even, since `frm` is
/// hard-wired to zero.
pub fn round(value: f32, rounding: RoundingMode) -> f32 {
    match rounding {
        RoundingMode::Rne | RoundingMode::Dynamic => value.round_ties_even(),
        RoundingMode::Rtz => value.trunc(),
        RoundingMode::Rdn => value.floor(),
        RoundingMode::Rup => value.ceil(),
        RoundingMode::Rmm => value.round(),
    }
}

/// `FCVT.W.S`: NaN converts to `i32::MAX`, out of range values saturate.
pub fn to_i32(value: f32, rounding: RoundingMode) -> i32 {
    if value.is_nan() {
        return i32::MAX;
    }
    // Float to integer `as` casts saturate
    round(value, rounding) as i32
}

/// `FCVT.WU.S`: NaN converts to `u32::MAX`, out of range values saturate.
pub fn to_u32(value: f32, rounding: RoundingMode) -> u32 {
    if value.is_nan() {
        return u32::MAX;
    }
    round(value, rounding) as u32
}

/// `FCLASS.S`: a one-hot mask describing the class of the value.
pub fn classify(bits: u32) -> u32 {
    let negative = bits & SIGN_MASK != 0;
    let exponent = (bits >> 23) & 0xFF;
    let fraction = bits & 0x7F_FFFF;
    let index = match (exponent, fraction) {
        (0, 0) => {
            if negative {
                3
            } else {
                4
            }
        }
        (0, _) => {
            if negative {
                2
            } else {
                5
            }
        }
        (0xFF, 0) => {
            if negative {
                0
            } else {
                7
            }
        }
        // Quiet NaN if the most significant fraction bit is set
        (0xFF, _) if fraction & 0x40_0000 != 0 => 9,
        (0xFF, _) => 8,
        _ => {
            if negative {
                1
            } else {
                6
            }
        }
    };
    1 << index
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNALING_NAN: u32 = 0x7F80_0001;

    #[test]
    fn test_min_max() {
        let one = 1.0f32.to_bits();
        let two = 2.0f32.to_bits();
        assert_eq!(one, min(one, two));
        assert_eq!(two, max(one, two));
        assert_eq!(NEGATIVE_ZERO, min(POSITIVE_ZERO, NEGATIVE_ZERO));
        assert_eq!(POSITIVE_ZERO, max(NEGATIVE_ZERO, POSITIVE_ZERO));
        assert_eq!(one, min(CANONICAL_NAN_F32, one));
        assert_eq!(one, max(one, SIGNALING_NAN));
        assert_eq!(CANONICAL_NAN_F32, min(SIGNALING_NAN, CANONICAL_NAN_F32));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(2, to_i32(2.5, RoundingMode::Rne));
        assert_eq!(3, to_i32(2.5, RoundingMode::Rmm));
        assert_eq!(2, to_i32(2.5, RoundingMode::Rtz));
        assert_eq!(-3, to_i32(-2.5, RoundingMode::Rdn));
        assert_eq!(3, to_i32(2.1, RoundingMode::Rup));
        assert_eq!(i32::MAX, to_i32(f32::NAN, RoundingMode::Rne));
        assert_eq!(i32::MIN, to_i32(-1e20, RoundingMode::Rtz));
        assert_eq!(u32::MAX, to_u32(f32::NAN, RoundingMode::Rne));
        assert_eq!(0, to_u32(-3.0, RoundingMode::Rtz));
        assert_eq!(u32::MAX, to_u32(1e20, RoundingMode::Rtz));
    }

    #[test]
    fn test_classify() {
        assert_eq!(1 << 0, classify(f32::NEG_INFINITY.to_bits()));
        assert_eq!(1 << 1, classify((-1.5f32).to_bits()));
        assert_eq!(1 << 2, classify(0x8000_0001));
        assert_eq!(1 << 3, classify(NEGATIVE_ZERO));
        assert_eq!(1 << 4, classify(POSITIVE_ZERO));
        assert_eq!(1 << 5, classify(0x0000_0001));
        assert_eq!(1 << 6, classify(1.0f32.to_bits()));
        assert_eq!(1 << 7, classify(f32::INFINITY.to_bits()));
        assert_eq!(1 << 8, classify(SIGNALING_NAN));
        assert_eq!(1 << 9, classify(CANONICAL_NAN_F32));
    }

    #[test]
    fn test_sign_injection() {
        let one = 1.0f32.to_bits();
        let minus_two = (-2.0f32).to_bits();
        assert_eq!((-1.0f32).to_bits(), sgnj(one, minus_two));
        assert_eq!(one, sgnjn(one, minus_two));
        assert_eq!((-1.0f32).to_bits(), sgnjx(one, minus_two));
        assert_eq!(2.0f32.to_bits(), sgnjx(minus_two, minus_two));
    }
}
