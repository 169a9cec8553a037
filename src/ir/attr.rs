//! Per-operator attributes, kernel descriptors and rounding modes.

use serde::{Deserialize, Serialize};

use super::shape::{Point2, Shape};

/// Rounding applied by the output scaling stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundMode {
    /// Double rounding (TFLite reference behaviour).
    #[default]
    Dbl,
    /// Round half up.
    Natural,
    /// Round towards negative infinity.
    TruncateToLower,
    /// Round half away from zero.
    Symmetric,
}

/// Padding around the spatial (and depth) axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Margin {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
    pub near: i32,
    pub far: i32,
}

impl Margin {
    pub fn new(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
            near: 0,
            far: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Margin::default()
    }
}

/// Kernel geometry of convolution and pooling operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Kernel {
    pub size: Point2,
    pub stride: Point2,
    pub dilation: Point2,
    pub padding: Margin,
    pub depth_multiplier: i32,
}

impl Default for Kernel {
    fn default() -> Self {
        Self {
            size: Point2::new(1, 1),
            stride: Point2::new(1, 1),
            dilation: Point2::new(1, 1),
            padding: Margin::default(),
            depth_multiplier: 1,
        }
    }
}

impl Kernel {
    pub fn new(size: Point2, stride: Point2) -> Self {
        Self {
            size,
            stride,
            ..Self::default()
        }
    }

    /// Footprint of the kernel once dilation is applied.
    pub fn dilated_wh(&self) -> Point2 {
        Point2::new(
            (self.size.x - 1) * self.dilation.x + 1,
            (self.size.y - 1) * self.dilation.y + 1,
        )
    }

    pub fn with_stride(mut self, stride: Point2) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: Margin) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_size(mut self, size: Point2) -> Self {
        self.size = size;
        self
    }
}

/// Rational number `n / d` used by resize scale factors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fraction {
    pub n: i32,
    pub d: i32,
}

impl Fraction {
    pub fn new(n: i32, d: i32) -> Self {
        Self { n, d }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResizeMode {
    Nearest,
    Bilinear,
}

// ─── Attribute Payloads ────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisAttr {
    pub axis: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransposeAttr {
    pub perm: Shape,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PadAttr {
    pub pad_const: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RescaleAttr {
    pub scale32: bool,
    pub double_round: bool,
    pub per_channel: bool,
    pub input_unsigned: bool,
    pub output_unsigned: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResizeAttr {
    pub scale_x: Fraction,
    pub scale_y: Fraction,
    pub offset: Point2,
    pub border: Point2,
    pub mode: ResizeMode,
}

/// Frontend (TFLite) flavour of resize, before it is normalised to `ResizeAttr`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeFrontendAttr {
    pub align_corners: bool,
    pub half_pixel_centers: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliceAttr {
    pub begin: Shape,
    pub size: Shape,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StridedSliceAttr {
    pub begin_mask: u32,
    pub end_mask: u32,
    pub ellipsis_mask: u32,
    pub new_axis_mask: u32,
    pub shrink_axis_mask: u32,
    pub offset: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeakyReluAttr {
    pub alpha: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClampAttr {
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MulAttr {
    pub shift: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AsrAttr {
    pub round: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransposeConvAttr {
    /// Output padding: top, bottom, left, right.
    pub out_pad_tblr: [i32; 4],
    pub out_shape: Shape,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatherAttr {
    pub axis: i32,
    pub batch_dims: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchMatMulAttr {
    pub adj_x: bool,
    pub adj_y: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReduceAttr {
    pub axis: i32,
    pub keep_dims: bool,
}

/// Operator attribute payload, one variant per attribute family.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Attr {
    #[default]
    None,
    Axis(AxisAttr),
    Transpose(TransposeAttr),
    Pad(PadAttr),
    Rescale(RescaleAttr),
    Resize(ResizeAttr),
    ResizeFrontend(ResizeFrontendAttr),
    Slice(SliceAttr),
    StridedSlice(StridedSliceAttr),
    LeakyRelu(LeakyReluAttr),
    Clamp(ClampAttr),
    Mul(MulAttr),
    Asr(AsrAttr),
    TransposeConv(TransposeConvAttr),
    Gather(GatherAttr),
    BatchMatMul(BatchMatMulAttr),
    Reduce(ReduceAttr),
}

impl Attr {
    /// Axis of axis-carrying attributes.
    pub fn axis(&self) -> Option<i32> {
        match self {
            Attr::Axis(a) => Some(a.axis),
            Attr::Gather(a) => Some(a.axis),
            Attr::Reduce(a) => Some(a.axis),
            _ => None,
        }
    }
}
