//! Fixed-point quantization parameters.
//!
//! A `QuantizedScale` represents `scale * 2^-shift` (right-shift
//! positive). A `Multiplier` represents `scale * 2^-31 * 2^left_shift`
//! (left-shift positive), the form consumed by the integer kernels in
//! `optimise::util::fixed_point`. Conversions between the two happen only
//! through the `From` impls below.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer multiplier with a right shift: `value = scale * 2^-shift`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantizedScale {
    pub scale: i32,
    pub shift: i32,
}

impl QuantizedScale {
    pub const fn new(scale: i32, shift: i32) -> Self {
        Self { scale, shift }
    }

    /// The identity scale `{1, 0}`.
    pub const fn unit() -> Self {
        Self { scale: 1, shift: 0 }
    }

    /// Closest representation of `value` with a 31-bit normalised mantissa.
    pub fn from_f64(value: f64) -> Self {
        if value == 0.0 || !value.is_finite() {
            return Self::new(0, 0);
        }
        let (mantissa, exponent) = frexp(value);
        let mut scale = (mantissa * (1i64 << 31) as f64).round() as i64;
        let mut exponent = exponent;
        if scale.abs() == 1i64 << 31 {
            scale /= 2;
            exponent += 1;
        }
        let mut shift = 31 - exponent;
        // Keep the shift inside the range the hardware scale path accepts.
        while shift > 62 {
            scale >>= 1;
            shift -= 1;
        }
        while shift < 0 {
            scale = scale.saturating_mul(2).clamp(i32::MIN as i64, i32::MAX as i64);
            shift += 1;
        }
        Self::new(scale as i32, shift)
    }

    pub fn dequantize(&self) -> f64 {
        self.scale as f64 / 2f64.powi(self.shift)
    }

    pub fn is_unit(&self) -> bool {
        *self == Self::unit()
    }

    /// Drop the shift when it divides the scale exactly, e.g. `{16384, 14}`
    /// becomes `{1, 0}`.
    pub fn reduced(self) -> Self {
        if self.shift > 0 && self.shift < 31 && self.scale % (1 << self.shift) == 0 {
            Self::new(self.scale >> self.shift, 0)
        } else {
            self
        }
    }
}

impl Default for QuantizedScale {
    fn default() -> Self {
        Self::unit()
    }
}

impl fmt::Display for QuantizedScale {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}>>{}", self.scale, self.shift)
    }
}

/// Split a finite, non-zero `value` into `mantissa * 2^exponent` with
/// `0.5 <= |mantissa| < 1`.
fn frexp(value: f64) -> (f64, i32) {
    let mut exponent = value.abs().log2().floor() as i32 + 1;
    let mut mantissa = value / 2f64.powi(exponent);
    // log2 can land one off for values near a power of two.
    if mantissa.abs() >= 1.0 {
        mantissa /= 2.0;
        exponent += 1;
    } else if mantissa.abs() < 0.5 {
        mantissa *= 2.0;
        exponent -= 1;
    }
    (mantissa, exponent)
}

/// Integer multiplier with a left shift: `value = scale * 2^(left_shift - 31)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Multiplier {
    pub scale: i32,
    pub left_shift: i32,
}

impl Multiplier {
    /// Apply an additional right shift of `bits`.
    pub fn shifted_right(self, bits: i32) -> Self {
        Self {
            scale: self.scale,
            left_shift: self.left_shift - bits,
        }
    }
}

impl From<QuantizedScale> for Multiplier {
    fn from(q: QuantizedScale) -> Self {
        Self {
            scale: q.scale,
            left_shift: 31 - q.shift,
        }
    }
}

impl From<Multiplier> for QuantizedScale {
    fn from(m: Multiplier) -> Self {
        Self {
            scale: m.scale,
            shift: 31 - m.left_shift,
        }
    }
}

/// Whether scaling was derived from the frontend or set explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantizationType {
    #[default]
    Implicit,
    Explicit,
}

/// Per-connection quantization.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quantization {
    #[serde(rename = "type")]
    pub kind: QuantizationType,
    pub scales: Vec<QuantizedScale>,
    pub zero_points: Vec<i64>,
    pub quant_min: Vec<i64>,
    pub quant_max: Vec<i64>,
}

impl Quantization {
    /// Explicit `{1, 0}` scale with a zero zero-point: the fusible identity.
    pub fn unit() -> Self {
        Self {
            kind: QuantizationType::Explicit,
            scales: vec![QuantizedScale::unit()],
            zero_points: vec![0],
            quant_min: Vec::new(),
            quant_max: Vec::new(),
        }
    }

    pub fn with_scale(scale: QuantizedScale, zero_point: i64) -> Self {
        Self {
            kind: QuantizationType::Explicit,
            scales: vec![scale],
            zero_points: vec![zero_point],
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.scales.is_empty() && !self.zero_points.is_empty()
    }

    /// Every scale is `{1, 0}` and every zero-point is 0.
    pub fn is_unit_scale(&self) -> bool {
        self.scales.iter().all(QuantizedScale::is_unit) && self.zero_points.iter().all(|&z| z == 0)
    }

    pub fn equal_scales(&self, other: &Quantization) -> bool {
        self.scales == other.scales && self.zero_points == other.zero_points
    }

    /// True when the zero-points match the unit quantization exactly.
    pub fn has_unit_zero_points(&self) -> bool {
        self.zero_points == Quantization::unit().zero_points
    }

    pub fn zero_point(&self) -> i64 {
        self.zero_points.first().copied().unwrap_or(0)
    }

    /// First scale as a real number, 1.0 when absent.
    pub fn dequantized_scale(&self) -> f64 {
        self.scales.first().map(QuantizedScale::dequantize).unwrap_or(1.0)
    }

    /// Both connections carry valid and identical scaling.
    pub fn scaling_valid_and_equal(a: &Quantization, b: &Quantization) -> bool {
        a.is_valid() && b.is_valid() && a.equal_scales(b)
    }
}
