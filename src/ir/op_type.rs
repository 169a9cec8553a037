//! Operator kinds.
//!
//! The set mixes frontend-flavoured operators (TFLite/TOSA: `Pack`,
//! `StridedSlice`, `ResizeBilinear`, ...) with the canonical operators the
//! optimiser lowers them to (`MemoryCopy`, `Lut`, `Reverse`, `Gather`, ...).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    // ── Elementwise binary ──
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
    And,
    AndNot,
    Or,
    Xor,
    Shl,
    Shr,
    Asr,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    LogicalAnd,
    LogicalOr,
    SquaredDifference,
    Prelu,
    // ── Elementwise unary ──
    Abs,
    Neg,
    Not,
    LogicalNot,
    Clz,
    Cast,
    Rescale,
    Quantize,
    Exp,
    Log,
    Rsqrt,
    Sigmoid,
    Tanh,
    HardSwish,
    // ── Activations ──
    Relu,
    Relu0To1,
    Relu6,
    ReluN1To1,
    LeakyRelu,
    Clamp,
    Table,
    Lut,
    // ── Convolution / pooling ──
    Conv2D,
    Conv3D,
    DepthwiseConv2D,
    TransposeConv2D,
    FullyConnected,
    MatMul,
    BatchMatMul,
    AvgPool,
    MaxPool,
    // ── Reductions ──
    ArgMax,
    Mean,
    ReduceAll,
    ReduceAny,
    ReduceMax,
    ReduceMin,
    ReduceSum,
    Softmax,
    // ── Data movement ──
    MemoryCopy,
    Concat,
    Pack,
    Unpack,
    Split,
    SplitV,
    Slice,
    StridedSlice,
    Pad,
    PadV2,
    Tile,
    Transpose,
    Reverse,
    ReverseV2,
    Gather,
    GatherV2,
    Scatter,
    ScatterNd,
    Select,
    SelectV2,
    Resize,
    ResizeBilinear,
    ResizeNearestNeighbor,
    SpaceToBatchNd,
    BatchToSpaceNd,
    // ── Reshape-like ──
    Reshape,
    Squeeze,
    ExpandDims,
    Identity,
}

impl OpType {
    pub fn is_binary_elementwise(self) -> bool {
        use OpType::*;
        matches!(
            self,
            Add | Sub
                | Mul
                | Div
                | Maximum
                | Minimum
                | And
                | AndNot
                | Or
                | Xor
                | Shl
                | Shr
                | Asr
                | Equal
                | NotEqual
                | Greater
                | GreaterEqual
                | LogicalAnd
                | LogicalOr
                | SquaredDifference
                | Prelu
        )
    }

    pub fn is_unary_elementwise(self) -> bool {
        use OpType::*;
        matches!(
            self,
            Abs | Neg
                | Not
                | LogicalNot
                | Clz
                | Cast
                | Rescale
                | Quantize
                | Exp
                | Log
                | Rsqrt
                | Sigmoid
                | Tanh
                | HardSwish
                | LeakyRelu
        )
    }

    pub fn is_elementwise(self) -> bool {
        self.is_binary_elementwise() || self.is_unary_elementwise()
    }

    pub fn is_activation(self) -> bool {
        use OpType::*;
        matches!(
            self,
            Relu | Relu0To1 | Relu6 | ReluN1To1 | Clamp | Sigmoid | Tanh | Table | Lut | LeakyRelu
        )
    }

    pub fn is_convolution(self) -> bool {
        matches!(
            self,
            OpType::Conv2D | OpType::Conv3D | OpType::DepthwiseConv2D | OpType::TransposeConv2D
        )
    }

    pub fn is_pooling(self) -> bool {
        matches!(self, OpType::AvgPool | OpType::MaxPool)
    }

    pub fn is_depthwise(self) -> bool {
        self == OpType::DepthwiseConv2D
    }

    /// Operators that only reinterpret the shape of their input.
    pub fn is_reshape_like(self) -> bool {
        matches!(
            self,
            OpType::Reshape | OpType::Squeeze | OpType::ExpandDims | OpType::Identity
        )
    }

    /// Operators with an accumulator that can absorb an output rescale.
    pub fn is_scaling_producer(self) -> bool {
        self.is_convolution()
            || matches!(
                self,
                OpType::FullyConnected | OpType::AvgPool | OpType::MaxPool | OpType::MatMul
            )
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
