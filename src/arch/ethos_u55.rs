use super::{
    broadcasts_to, rescale_fits, same_padded, ArchitectureConstraints, ExecutionQuery,
    ResizeQuery,
};
use crate::ir::attr::ResizeMode;
use crate::ir::{DataType, OpType, Quantization, ReverseType, Shape, TensorUsage, TransposeType};

/// Hardware block an operator is executed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NpuOp {
    Convolution,
    Depthwise,
    VectorProduct,
    Pooling,
    ReduceSum,
    Elementwise,
    Dma,
}

/// Ethos-U55 (and the register-compatible Ethos-U65).
///
/// Convolution, pooling and elementwise blocks with a global output scale
/// path. No native matmul, gather, scatter, reverse or argmax.
#[derive(Clone, Debug)]
pub struct EthosU55Constraints {
    name: &'static str,
}

impl EthosU55Constraints {
    pub fn new() -> Self {
        Self { name: "ethos-u55" }
    }

    pub fn u65() -> Self {
        Self { name: "ethos-u65" }
    }

    fn hw_op(op_type: OpType) -> Option<NpuOp> {
        use OpType::*;
        let npu = match op_type {
            Conv2D | TransposeConv2D => NpuOp::Convolution,
            DepthwiseConv2D => NpuOp::Depthwise,
            FullyConnected => NpuOp::VectorProduct,
            AvgPool | MaxPool | Resize => NpuOp::Pooling,
            ReduceSum => NpuOp::ReduceSum,
            Add | Sub | Mul | Maximum | Minimum | Shl | Asr | Abs | Clz | LeakyRelu | Relu
            | Relu0To1 | Relu6 | ReluN1To1 | Clamp | Lut | And | Or | Xor | Not | Equal
            | NotEqual | Greater | GreaterEqual | Rescale => NpuOp::Elementwise,
            MemoryCopy | Transpose => NpuOp::Dma,
            _ => return None,
        };
        Some(npu)
    }
}

impl Default for EthosU55Constraints {
    fn default() -> Self {
        Self::new()
    }
}

fn is_8_or_16_bit(dtype: DataType) -> bool {
    dtype.is_integer() && matches!(dtype.size_bits(), 8 | 16)
}

impl ArchitectureConstraints for EthosU55Constraints {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports_op(&self, op_type: OpType) -> bool {
        Self::hw_op(op_type).is_some()
    }

    fn supports_matmul(&self, _query: &ExecutionQuery) -> bool {
        false
    }

    fn supports_reverse(&self, _op_type: OpType, reverse: ReverseType) -> bool {
        reverse.is_none()
    }

    fn supports_gather(&self, _query: &ExecutionQuery) -> bool {
        false
    }

    fn supports_scatter(&self, _query: &ExecutionQuery) -> bool {
        false
    }

    fn supports_argmax(&self, _query: &ExecutionQuery) -> bool {
        false
    }

    fn supports_cast(&self, query: &ExecutionQuery) -> bool {
        let ok = |t: DataType| t.is_integer() && matches!(t.size_bits(), 8 | 16 | 32);
        ok(query.ifm_type) && ok(query.ofm_type)
    }

    /// Nearest or bilinear upscaling by an integer factor of 1 or 2.
    fn supports_resize(&self, query: &ResizeQuery) -> bool {
        let factor = |f: crate::ir::attr::Fraction| {
            if f.d <= 0 || f.n % f.d != 0 {
                None
            } else {
                Some(f.n / f.d)
            }
        };
        match (factor(query.scale_x), factor(query.scale_y)) {
            (Some(x), Some(y)) if x == y && (x == 1 || x == 2) => match query.mode {
                ResizeMode::Nearest => query.offset_x == 0 && query.offset_y == 0,
                ResizeMode::Bilinear => query.offset_x <= 0 && query.offset_y <= 0,
            },
            _ => false,
        }
    }

    fn supports_leaky_relu(&self, query: &ExecutionQuery) -> bool {
        !query.quant_scaling_invalid_or_unequal && is_8_or_16_bit(query.ifm_type)
    }

    /// IFM2 may broadcast against an IFM that already has the OFM shape,
    /// or the other way round.
    fn supports_non_matching_shapes(&self, ifm: &Shape, ifm2: &Shape, ofm: &Shape) -> bool {
        if same_padded(ifm, ofm) {
            return ifm2.is_empty() || broadcasts_to(ifm2, ofm);
        }
        if same_padded(ifm2, ofm) {
            return broadcasts_to(ifm, ofm);
        }
        false
    }

    fn supports_fused_rescale(
        &self,
        op_type: OpType,
        usage: TensorUsage,
        from: DataType,
        to: DataType,
        quantization: &Quantization,
    ) -> bool {
        let Some(npu) = Self::hw_op(op_type) else {
            return false;
        };
        let global_scale = quantization.scales.len() <= 1;
        let unit_scale = quantization.is_unit_scale();

        if usage.is_ifm() {
            match npu {
                NpuOp::Elementwise if global_scale => {
                    let from_ok = (from.is_integer() && from.size_bits() == 8)
                        || from == DataType::Int16;
                    let to_ok = is_8_or_16_bit(to) || to == DataType::Int32;
                    let fits = rescale_fits(from, to, quantization);
                    if matches!(op_type, OpType::Add | OpType::Sub) {
                        from_ok && to_ok && fits
                    } else {
                        from_ok && to_ok && fits && unit_scale
                    }
                }
                NpuOp::ReduceSum => global_scale && unit_scale,
                _ => false,
            }
        } else if usage.is_output() {
            match npu {
                NpuOp::Convolution | NpuOp::Depthwise | NpuOp::Pooling | NpuOp::VectorProduct => {
                    !op_type.is_activation() && is_8_or_16_bit(to)
                }
                NpuOp::Elementwise if global_scale => {
                    !op_type.is_activation()
                        && !matches!(op_type, OpType::Rescale | OpType::Shl | OpType::Asr)
                        && is_8_or_16_bit(to)
                        && rescale_fits(from, to, quantization)
                }
                _ => false,
            }
        } else {
            false
        }
    }

    fn supports_transpose(&self, op_type: OpType, transpose: TransposeType) -> bool {
        if transpose.is_none() {
            return true;
        }
        matches!(op_type, OpType::Transpose | OpType::MemoryCopy)
            && (transpose == TransposeType::NWHC || transpose == TransposeType::NHCW)
    }

    fn supports_accumulator_save_restore(&self) -> bool {
        false
    }
}
