//! Fixed-point encodings for the oscillator registers.
//!
//! The firmware represents phases as two's-complement fixed-point numbers
//! in units of π, so the representable range is exactly (−π, π] and
//! wrapping in the hardware phase accumulator matches wrapping of the
//! register code. Amplitude scales are unsigned fixed point with saturation
//! above 1.0.

use crate::error::{Error, Result};
use std::f64::consts::PI;

/// Bit position of the oscillator enable flag in the phase increment
/// register.
const ENABLE_BIT: u32 = 31;

/// Mask of the 31-bit phase code below the enable flag.
const PHASE_MASK: u32 = (1 << ENABLE_BIT) - 1;

/// Encodes a phase in radians as a fixed-point code with `fractional_bits`
/// fractional bits.
///
/// The phase is first normalized into (−π, π], with +π wrapping to the −π
/// end of the range, then scaled and truncated toward zero. The returned
/// code is in `[-2^fractional_bits, 2^fractional_bits)`.
pub fn encode_phase(radians: f64, fractional_bits: u32) -> i64 {
    // normalized to units of pi, in [-1, 1)
    let norm = (radians / PI + 1.0).rem_euclid(2.0) - 1.0;
    (norm * (1u64 << fractional_bits) as f64) as i64
}

/// Decodes a fixed-point phase code back to radians.
///
/// Round-trips with [`encode_phase`] up to the quantization step
/// `π / 2^fractional_bits`.
pub fn decode_phase(code: i64, fractional_bits: u32) -> f64 {
    code as f64 / (1u64 << fractional_bits) as f64 * PI
}

/// Encodes a phase increment and its enable flag into a 32-bit register
/// word.
///
/// Bit 31 is the oscillator enable; bits 0-30 hold the phase code in
/// 31-bit two's complement. `None` encodes a disabled oscillator with zero
/// phase.
///
/// The field is one bit narrower than the full phase code range, so with
/// `fractional_bits = 31` only increments in (−π/2, π/2) are
/// representable; larger increments alias, as they do in the hardware
/// phase accumulator.
pub fn encode_enable_and_phase(radians: Option<f64>, fractional_bits: u32) -> u32 {
    match radians {
        None => 0,
        Some(radians) => {
            let code = encode_phase(radians, fractional_bits) as u32 & PHASE_MASK;
            (1 << ENABLE_BIT) | code
        }
    }
}

/// Decodes a phase increment register word into radians and the enable
/// flag.
pub fn decode_enable_and_phase(word: u32, fractional_bits: u32) -> (f64, bool) {
    let enabled = word >> ENABLE_BIT != 0;
    let mut code = i64::from(word & PHASE_MASK);
    if code > 1 << (ENABLE_BIT - 1) {
        // 31-bit two's complement
        code -= 1 << ENABLE_BIT;
    }
    (decode_phase(code, fractional_bits), enabled)
}

/// Encodes an amplitude scale as an `n_scale_bits`-bit unsigned fixed-point
/// code.
///
/// The scale must be strictly positive. Values at or above 1.0 saturate to
/// the maximum code `2^n_scale_bits - 1`, which is how the hardware
/// documents "scale ≥ 1". Values small enough to round to zero encode as
/// zero (fully attenuated); they are not an error.
pub fn encode_scale(scale: f64, n_scale_bits: u32) -> Result<u32> {
    if scale <= 0.0 {
        return Err(Error::InvalidScale(scale));
    }
    let max = (1u64 << n_scale_bits) - 1;
    let code = (scale * (1u64 << n_scale_bits) as f64).round() as u64;
    Ok(code.min(max) as u32)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn phase_roundtrip_within_quantization_step() {
        for &fractional_bits in &[1, 4, 8, 16, 24, 31] {
            let step = PI / (1u64 << fractional_bits) as f64;
            let mut radians = -PI + 1e-9;
            while radians <= PI {
                let code = encode_phase(radians, fractional_bits);
                let decoded = decode_phase(code, fractional_bits);
                assert!(
                    (decoded - radians).abs() <= step,
                    "radians {radians} bits {fractional_bits}: decoded {decoded}"
                );
                radians += 0.1;
            }
        }
    }

    #[test]
    fn plus_pi_wraps_to_minus_pi() {
        assert_eq!(encode_phase(PI, 8), encode_phase(-PI, 8));
        assert_eq!(encode_phase(PI, 8), -256);
        // one quantization step inside the range stays positive
        assert!(encode_phase(PI - 0.1, 8) > 0);
    }

    #[test]
    fn truncates_toward_zero() {
        // 0.3 / pi * 2^4 = 1.527..., truncated to 1
        assert_eq!(encode_phase(0.3, 4), 1);
        assert_eq!(encode_phase(-0.3, 4), -1);
    }

    #[test]
    fn disabled_encodes_to_zero() {
        for &bits in &[1, 8, 16, 31] {
            let word = encode_enable_and_phase(None, bits);
            assert_eq!(word, 0);
            let (radians, enabled) = decode_enable_and_phase(word, bits);
            assert!(!enabled);
            assert_eq!(radians, 0.0);
        }
    }

    #[test]
    fn enable_and_phase_roundtrip() {
        for &radians in &[0.01029, -1.5, 1.2, -0.7, 0.0] {
            let word = encode_enable_and_phase(Some(radians), 31);
            assert_eq!(word >> 31, 1);
            let (decoded, enabled) = decode_enable_and_phase(word, 31);
            assert!(enabled);
            assert!((decoded - radians).abs() <= PI / (1u64 << 31) as f64);
        }
    }

    #[test]
    fn scale_saturates_above_one() {
        assert_eq!(encode_scale(1.5, 8).unwrap(), 255);
        assert_eq!(encode_scale(1.0, 8).unwrap(), 255);
        assert_eq!(encode_scale(0.5, 8).unwrap(), 128);
    }

    #[test]
    fn scale_must_be_positive() {
        assert!(matches!(encode_scale(0.0, 8), Err(Error::InvalidScale(_))));
        assert!(matches!(encode_scale(-0.1, 8), Err(Error::InvalidScale(_))));
    }

    #[test]
    fn tiny_scale_rounds_to_zero() {
        // below one encoding step: fully attenuated, not an error
        assert_eq!(encode_scale(1e-6, 8).unwrap(), 0);
    }
}
