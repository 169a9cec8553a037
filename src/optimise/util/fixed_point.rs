//! Integer fixed-point arithmetic matching the reference kernels.
//!
//! All multiplier arguments use the left-shift-positive `Multiplier` form.
//! Callers holding a `QuantizedScale` convert with `Multiplier::from`.

use crate::ir::{Multiplier, QuantizedScale};

/// `round(a * b / 2^31)` with the single overflow case saturated.
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let ab = a as i64 * b as i64;
    let nudge = if ab >= 0 { 1i64 << 30 } else { 1 - (1i64 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// Arithmetic right shift by `exponent` rounding half away from zero.
pub fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    debug_assert!((0..=31).contains(&exponent));
    let mask = ((1i64 << exponent) - 1) as i32;
    let remainder = x & mask;
    let threshold = (mask >> 1) + i32::from(x < 0);
    (x >> exponent) + i32::from(remainder > threshold)
}

/// `x * multiplier` rounded the way the integer reference kernels do.
pub fn multiply_by_quantized_multiplier(x: i32, multiplier: Multiplier) -> i32 {
    let left = multiplier.left_shift.clamp(0, 62) as u32;
    let right = (-multiplier.left_shift).max(0);
    match i32::try_from((x as i128) << left) {
        Ok(shifted) => rounding_divide_by_pot(
            saturating_rounding_doubling_high_mul(shifted, multiplier.scale),
            right.min(31),
        ),
        // `x << left` leaves the i32 range: evaluate the product exactly.
        Err(_) => {
            let product = (x as i128 * multiplier.scale as i128) << left;
            let nudge = if product >= 0 { 1i128 << 30 } else { 1 - (1i128 << 30) };
            ((product + nudge) / (1i128 << 31)).clamp(i32::MIN as i128, i32::MAX as i128) as i32
        }
    }
}

/// Output scale of an elementwise multiply by the real constant `factor`.
pub fn elementwise_mul_scale(input_scale: f64, factor: f64, output_scale: f64) -> QuantizedScale {
    QuantizedScale::from_f64(input_scale * factor / output_scale)
}
