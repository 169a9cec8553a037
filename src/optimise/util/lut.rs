//! Lookup-table synthesis.
//!
//! 8-bit tables hold one output per input value. 16-bit tables hold 512
//! entries that pack a 16-bit base with a 16-bit slope (`base + slope << 16`)
//! and are linearly interpolated by the hardware.

use super::fixed_point::{elementwise_mul_scale, multiply_by_quantized_multiplier};
use super::tables::{RSQRT_TABLE, SIGMOID_TABLE};
use crate::ir::{DataType, Multiplier, Quantization, QuantizedScale};

/// Number of entries in an interpolating 16-bit table.
pub const LUT16_ENTRIES: usize = 512;

fn range8(dtype: DataType) -> Option<(i64, i64)> {
    match dtype {
        DataType::Int8 => Some((-128, 127)),
        DataType::UInt8 => Some((0, 255)),
        _ => None,
    }
}

/// Pack a base and slope into the bit pattern of one Int32 table entry.
fn pack(base: i32, slope: i32) -> i64 {
    let word = (base as u32).wrapping_add((slope as u32) << 16);
    word as i32 as i64
}

/// Tabulate `f` over every value of an 8-bit type: dequantize with `ifm`,
/// apply `f`, requantize with `ofm`, round and clamp. `None` when `dtype`
/// is not an 8-bit integer.
pub fn lut8_from_fn<F>(dtype: DataType, ifm: &Quantization, ofm: &Quantization, f: F) -> Option<Vec<i64>>
where
    F: Fn(f64) -> f64,
{
    let (q_min, q_max) = range8(dtype)?;
    let ifm_scale = ifm.dequantized_scale();
    let ofm_scale = ofm.dequantized_scale();
    let zp_in = ifm.zero_point();
    let zp_out = ofm.zero_point() as f64;
    let table = (q_min..=q_max)
        .map(|x| {
            let real = f(ifm_scale * (x - zp_in) as f64);
            let value = (zp_out + real / ofm_scale).round();
            (value as i64).clamp(q_min, q_max)
        })
        .collect();
    Some(table)
}

/// 512-entry interpolating table for an Int16 operator computing `f`.
pub fn interpolating_lut16_from_fn<F>(ifm: &Quantization, ofm: &Quantization, f: F) -> Vec<i64>
where
    F: Fn(f32) -> f32,
{
    let ifm_scale = ifm.dequantized_scale() as f32;
    let ofm_scale = ofm.dequantized_scale() as f32;
    let zp_in = ifm.zero_point() as f32;
    let zp_out = ofm.zero_point() as f32;
    let q_min = i16::MIN as f32;
    let q_max = i16::MAX as f32;
    let input_min = ifm_scale * (q_min - zp_in);
    let input_max = ifm_scale * (q_max - zp_in);
    let output_min = ofm_scale * (q_min - zp_out);
    let output_max = ofm_scale * (q_max - zp_out);
    let steps = LUT16_ENTRIES;
    let step = (input_max - input_min) / steps as f32;
    let half_step = step / 2.0;
    let output_scaling_inv = (q_max - q_min + 1.0) / (output_max - output_min);

    let mut lut = vec![0i64; steps];
    let mut prev = 0f32;
    for i in 0..steps {
        let x = input_min + i as f32 * step;
        let sample = (f(x) * output_scaling_inv).round();
        let next = f(input_min + (i + 1) as f32 * step) * output_scaling_inv;
        // Bias each sample so the interpolated midpoint error is split evenly.
        let midpoint_interp = ((next + sample) / 2.0).round();
        let midpoint = (f(x + half_step) * output_scaling_inv).round();
        let bias = ((midpoint_interp - midpoint) / 2.0).round();
        let result = (sample - bias).clamp(q_min, q_max);
        if i > 0 {
            lut[i - 1] = pack(prev as i32, (result - prev) as i32);
        }
        prev = result;
    }
    let last = (f(input_max) * output_scaling_inv).round().clamp(q_min, q_max);
    lut[steps - 1] = pack(prev as i32, (last - prev) as i32);
    lut
}

/// Convert a 513-entry Int16 sample table into 1024 interleaved
/// base/slope entries. `None` for any other length.
pub fn table16_to_lut(values: &[i64]) -> Option<Vec<i64>> {
    if values.len() != LUT16_ENTRIES + 1 {
        return None;
    }
    let mut lut = Vec::with_capacity(2 * LUT16_ENTRIES);
    for pair in values.windows(2) {
        lut.push(pair[0]);
        lut.push((pair[1] - pair[0]) as i16 as i64);
    }
    Some(lut)
}

/// Native Int16 sigmoid/tanh table, mirrored around zero from
/// `SIGMOID_TABLE`. The two functions differ only in the last negative
/// segment.
pub fn sigmoid_tanh_lut16(sigmoid: bool) -> Vec<i64> {
    let table = |j: usize| SIGMOID_TABLE[j] as i32;
    let mut lut = vec![0i64; LUT16_ENTRIES];
    for i in -256i32..256 {
        let (v0, v1) = if i >= 0 {
            let j0 = i as usize;
            let j1 = if i == 255 { 255 } else { j0 + 1 };
            (table(j0) - 0x8000, table(j1) - 0x8000)
        } else {
            let j0 = if i == -256 { 255 } else { (-i) as usize };
            let j1 = if !sigmoid && i == -256 { 255 } else { j0 - 1 };
            (0x8000 - table(j0), 0x8000 - table(j1))
        };
        let base = (v0 & 0xffff) as u32;
        let slope = (v1 - v0).max(0) as u32;
        lut[(256 + i) as usize] = ((slope << 16) | base) as i32 as i64;
    }
    lut
}

/// Int8 reciprocal square root table built from the fixed reference table.
pub fn rsqrt_lut8(ifm: &Quantization, ofm: &Quantization) -> Vec<i64> {
    const K_SHIFT: i32 = 20;
    let (q_min, q_max) = (-128i64, 127i64);
    let zp_in = ifm.zero_point();
    let zp_out = ofm.zero_point();
    let ifm_scale = ifm.dequantized_scale() as f32;
    let ofm_scale = ofm.dequantized_scale() as f32;
    let scale = 1.0 / (ifm_scale.sqrt() * ofm_scale) as f64;
    let multiplier = Multiplier::from(QuantizedScale::from_f64(scale)).shifted_right(K_SHIFT);

    let mut lut = Vec::with_capacity(256);
    // Zero and below map to the largest representable output.
    lut.push(q_max);
    for x in (q_min + 1)..=q_max {
        let index = (x - zp_in).clamp(0, 255) as usize;
        let value = zp_out + multiply_by_quantized_multiplier(RSQRT_TABLE[index], multiplier) as i64;
        lut.push(value.clamp(q_min, q_max));
    }
    lut
}

/// 8-bit leaky ReLU table. `alpha_scalar` multiplies the zero-point
/// corrected input on the negative side before `alpha_scale` is applied.
pub fn leaky_relu_lut8(
    dtype: DataType,
    ifm: &Quantization,
    ofm: &Quantization,
    alpha_scale: QuantizedScale,
    alpha_scalar: i64,
) -> Option<Vec<i64>> {
    let (q_min, q_max) = range8(dtype)?;
    let identity = Multiplier::from(elementwise_mul_scale(
        ifm.dequantized_scale(),
        1.0,
        ofm.dequantized_scale(),
    ));
    let alpha = Multiplier::from(alpha_scale);
    let zp_in = ifm.zero_point();
    let zp_out = ofm.zero_point();
    let table = (q_min..=q_max)
        .map(|x| {
            let value = if x < zp_in {
                multiply_by_quantized_multiplier((alpha_scalar * (x - zp_in)) as i32, alpha)
            } else {
                multiply_by_quantized_multiplier((x - zp_in) as i32, identity)
            };
            (zp_out + value as i64).clamp(q_min, q_max)
        })
        .collect();
    Some(table)
}
