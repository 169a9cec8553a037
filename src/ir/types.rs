//! Element types, axis orders and connection tags.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Data Types ────────────────────────────────────────────────────

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool8,
    Int4Packed8,
    Int8,
    Int16,
    Int32,
    Int48,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt48,
    UInt64,
    BFloat16,
    Float16,
    Float32,
}

impl DataType {
    /// Width of one element in bits (packed int4 reports 4).
    pub fn size_bits(self) -> u32 {
        match self {
            DataType::Int4Packed8 => 4,
            DataType::Bool8 | DataType::Int8 | DataType::UInt8 => 8,
            DataType::Int16 | DataType::UInt16 | DataType::BFloat16 | DataType::Float16 => 16,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 32,
            DataType::Int48 | DataType::UInt48 => 48,
            DataType::Int64 | DataType::UInt64 => 64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DataType::BFloat16 | DataType::Float16 | DataType::Float32
        )
    }

    pub fn is_bool(self) -> bool {
        self == DataType::Bool8
    }

    /// True for every fixed-point integer type, including packed int4.
    pub fn is_integer(self) -> bool {
        !self.is_float() && !self.is_bool()
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DataType::Int4Packed8
                | DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int48
                | DataType::Int64
                | DataType::Bool8
        ) || self.is_float()
    }

    pub fn is_unsigned(self) -> bool {
        self.is_integer() && !self.is_signed()
    }

    /// Smallest representable integer value.
    pub fn integer_min(self) -> i64 {
        if !self.is_signed() {
            return 0;
        }
        match self.size_bits() {
            64 => i64::MIN,
            bits => -(1i64 << (bits - 1)),
        }
    }

    /// Largest representable integer value.
    pub fn integer_max(self) -> i64 {
        match (self.is_signed(), self.size_bits()) {
            (true, 64) => i64::MAX,
            (false, 64) => i64::MAX,
            (true, bits) => (1i64 << (bits - 1)) - 1,
            (false, bits) => (1i64 << bits) - 1,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DataType::Bool8 => "bool8",
            DataType::Int4Packed8 => "int4",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int48 => "int48",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt48 => "uint48",
            DataType::UInt64 => "uint64",
            DataType::BFloat16 => "bfloat16",
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
        };
        write!(f, "{}", name)
    }
}

// ─── Axis Order ────────────────────────────────────────────────────

/// Storage layout of weight tensors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisOrder {
    #[default]
    Unknown,
    /// Output channels, height, width, input channels.
    OHWI,
    /// Input channels, height, width, output channels.
    IHWO,
    /// Fully connected weights: output, input.
    OI,
    /// Depthwise weights: height, width, channels, multiplier.
    HWCM,
}

// ─── Tensor Usage ──────────────────────────────────────────────────

/// Role of a tensor connection on an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TensorUsage {
    Ifm(u8),
    Ofm(u8),
    Weights,
    Scales,
    Params(u8),
    Lut,
}

impl TensorUsage {
    pub const IFM: TensorUsage = TensorUsage::Ifm(0);
    pub const IFM1: TensorUsage = TensorUsage::Ifm(1);
    pub const IFM2: TensorUsage = TensorUsage::Ifm(2);
    pub const OFM: TensorUsage = TensorUsage::Ofm(0);
    pub const PARAMS: TensorUsage = TensorUsage::Params(0);
    pub const PARAMS1: TensorUsage = TensorUsage::Params(1);

    pub fn is_output(self) -> bool {
        matches!(self, TensorUsage::Ofm(_))
    }

    pub fn is_input(self) -> bool {
        !self.is_output()
    }

    pub fn is_ifm(self) -> bool {
        matches!(self, TensorUsage::Ifm(_))
    }

    pub fn is_params(self) -> bool {
        matches!(self, TensorUsage::Params(_))
    }

    /// Index within the usage family (IFM1 -> 1, Params1 -> 1).
    pub fn index(self) -> usize {
        match self {
            TensorUsage::Ifm(i) | TensorUsage::Ofm(i) | TensorUsage::Params(i) => i as usize,
            _ => 0,
        }
    }
}

impl fmt::Display for TensorUsage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TensorUsage::Ifm(i) => write!(f, "ifm{}", i),
            TensorUsage::Ofm(i) => write!(f, "ofm{}", i),
            TensorUsage::Weights => write!(f, "weights"),
            TensorUsage::Scales => write!(f, "scales"),
            TensorUsage::Params(i) => write!(f, "params{}", i),
            TensorUsage::Lut => write!(f, "lut"),
        }
    }
}

// ─── Transpose / Reverse Tags ──────────────────────────────────────

/// Axis permutation packed one nibble per axis, outermost axis in the
/// most significant nibble. `0x0123` is the identity on NHWC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransposeType(pub u32);

impl TransposeType {
    pub const NONE: TransposeType = TransposeType(0x0123);
    pub const NWHC: TransposeType = TransposeType(0x0213);
    pub const NHCW: TransposeType = TransposeType(0x0132);
    pub const NWCH: TransposeType = TransposeType(0x0231);
    pub const NCHW: TransposeType = TransposeType(0x0312);
    pub const NCWH: TransposeType = TransposeType(0x0321);

    /// Pack a permutation vector. Returns `None` for anything that is not a
    /// permutation of `0..len` or is longer than 8 axes.
    pub fn from_perm(perm: &[i32]) -> Option<TransposeType> {
        if perm.is_empty() || perm.len() > 8 {
            return None;
        }
        let mut seen = [false; 8];
        let mut packed = 0u32;
        for &axis in perm {
            if axis < 0 || axis as usize >= perm.len() || seen[axis as usize] {
                return None;
            }
            seen[axis as usize] = true;
            packed = (packed << 4) | axis as u32;
        }
        Some(TransposeType(packed).normalized(perm.len()))
    }

    /// Express the permutation on at least four axes so short
    /// permutations compare equal to their NHWC forms.
    fn normalized(self, rank: usize) -> TransposeType {
        if rank >= 4 {
            return self;
        }
        let pad = 4 - rank;
        let mut packed = 0u32;
        for i in 0..pad {
            packed = (packed << 4) | i as u32;
        }
        for i in (0..rank).rev() {
            let axis = (self.0 >> (4 * i)) & 0xF;
            packed = (packed << 4) | (axis + pad as u32);
        }
        TransposeType(packed)
    }

    pub fn is_none(self) -> bool {
        (4..=8).any(|rank| {
            let identity = (0..rank).fold(0u32, |acc, axis| (acc << 4) | axis);
            self.0 == identity
        })
    }
}

impl Default for TransposeType {
    fn default() -> Self {
        TransposeType::NONE
    }
}

/// Bit mask of reversed axes, counted from the innermost axis
/// (bit 0 = C, bit 1 = W, bit 2 = H, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReverseType(pub u32);

impl ReverseType {
    pub const NONE: ReverseType = ReverseType(0);
    pub const C: ReverseType = ReverseType(1);
    pub const W: ReverseType = ReverseType(2);
    pub const H: ReverseType = ReverseType(4);

    /// Mask for reversing `axis` of a tensor of the given rank.
    pub fn for_axis(axis: usize, rank: usize) -> ReverseType {
        ReverseType(1 << (rank - 1 - axis))
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}
