use super::{broadcasts_to, rescale_fits, ArchitectureConstraints, ExecutionQuery, ResizeQuery};
use crate::ir::attr::Fraction;
use crate::ir::{DataType, OpType, Quantization, ReverseType, Shape, TensorUsage, TransposeType};

/// Ethos-U85.
///
/// Adds native matmul, gather/scatter, argmax, single-axis reverse,
/// arbitrary transposes up to rank 4, per-operand input scaling and
/// accumulator save/restore.
#[derive(Clone, Debug, Default)]
pub struct EthosU85Constraints;

impl EthosU85Constraints {
    pub fn new() -> Self {
        Self
    }
}

fn supported_integer(dtype: DataType) -> bool {
    dtype.is_integer() && matches!(dtype.size_bits(), 8 | 16 | 32)
}

/// Integer power-of-two upscale factor no larger than 2048.
fn power_of_two_factor(f: Fraction) -> bool {
    if f.d <= 0 || f.n % f.d != 0 {
        return false;
    }
    let k = f.n / f.d;
    k > 0 && k <= 2048 && (k & (k - 1)) == 0
}

impl ArchitectureConstraints for EthosU85Constraints {
    fn name(&self) -> &'static str {
        "ethos-u85"
    }

    fn supports_op(&self, op_type: OpType) -> bool {
        use OpType::*;
        matches!(
            op_type,
            Conv2D
                | Conv3D
                | DepthwiseConv2D
                | TransposeConv2D
                | FullyConnected
                | MatMul
                | AvgPool
                | MaxPool
                | ReduceSum
                | ReduceMin
                | ReduceMax
                | ReduceAny
                | ReduceAll
                | ArgMax
                | Resize
                | MemoryCopy
                | Transpose
                | Reverse
                | Gather
                | Scatter
                | Tile
                | Cast
                | Add
                | Sub
                | Mul
                | Maximum
                | Minimum
                | Shl
                | Shr
                | Asr
                | Abs
                | Clz
                | LeakyRelu
                | Relu
                | Relu0To1
                | Relu6
                | ReluN1To1
                | Clamp
                | Lut
                | And
                | AndNot
                | Or
                | Xor
                | Not
                | Equal
                | NotEqual
                | Greater
                | GreaterEqual
                | Rescale
        )
    }

    fn supports_matmul(&self, query: &ExecutionQuery) -> bool {
        supported_integer(query.ifm_type)
            && query.ifm2_type.map_or(true, |t| t == query.ifm_type)
            && query.ifm_type.size_bits() <= 16
    }

    /// One reversed axis among H, W and C.
    fn supports_reverse(&self, _op_type: OpType, reverse: ReverseType) -> bool {
        matches!(
            reverse,
            ReverseType::NONE | ReverseType::C | ReverseType::W | ReverseType::H
        )
    }

    fn supports_gather(&self, query: &ExecutionQuery) -> bool {
        supported_integer(query.ifm_type)
            && query
                .ifm2_type
                .map_or(false, |t| t == DataType::Int32 || t == DataType::Int16)
    }

    fn supports_scatter(&self, query: &ExecutionQuery) -> bool {
        self.supports_gather(query)
    }

    fn supports_argmax(&self, query: &ExecutionQuery) -> bool {
        supported_integer(query.ifm_type) && query.ifm_type.size_bits() <= 16
    }

    fn supports_cast(&self, query: &ExecutionQuery) -> bool {
        (supported_integer(query.ifm_type) || query.ifm_type.is_bool())
            && (supported_integer(query.ofm_type) || query.ofm_type.is_bool())
    }

    fn supports_resize(&self, query: &ResizeQuery) -> bool {
        power_of_two_factor(query.scale_x)
            && power_of_two_factor(query.scale_y)
            && query.offset_x.abs() < query.scale_x.n.max(1)
            && query.offset_y.abs() < query.scale_y.n.max(1)
    }

    fn supports_leaky_relu(&self, query: &ExecutionQuery) -> bool {
        supported_integer(query.ifm_type) && query.ifm_type.size_bits() <= 16
    }

    /// Both operands may broadcast independently.
    fn supports_non_matching_shapes(&self, ifm: &Shape, ifm2: &Shape, ofm: &Shape) -> bool {
        broadcasts_to(ifm, ofm) && (ifm2.is_empty() || broadcasts_to(ifm2, ofm))
    }

    fn supports_fused_rescale(
        &self,
        op_type: OpType,
        usage: TensorUsage,
        from: DataType,
        to: DataType,
        quantization: &Quantization,
    ) -> bool {
        if !self.supports_op(op_type) || from.is_float() || to.is_float() {
            return false;
        }
        let global_scale = quantization.scales.len() <= 1;
        let unit_scale = quantization.is_unit_scale();
        let advanced = to.size_bits() == 32 && !unit_scale;

        if usage.is_ifm() {
            if !global_scale || !rescale_fits(from, to, quantization) {
                return false;
            }
            if op_type.is_binary_elementwise() {
                // Only the arithmetic ops have an advanced input scaler and
                // it serves a single operand.
                return !advanced || matches!(op_type, OpType::Add | OpType::Sub);
            }
            op_type.is_unary_elementwise() || op_type == OpType::ReduceSum
        } else if usage.is_output() {
            !op_type.is_activation() && op_type != OpType::Rescale && supported_integer(to)
        } else {
            false
        }
    }

    fn supports_transpose(&self, _op_type: OpType, transpose: TransposeType) -> bool {
        // Any permutation of at most four axes.
        transpose.0 <= 0xFFFF
    }

    fn supports_accumulator_save_restore(&self) -> bool {
        true
    }
}
