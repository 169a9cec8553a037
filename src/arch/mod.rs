//! Architecture constraints: capability queries answered per hardware target.
//!
//! Rewrite rules consult an `ArchitectureConstraints` object to decide
//! whether a configuration can run directly or must be lowered further.
//! Rules never branch on which target is active; each target implements
//! the trait and is selected once through `create_constraints`.

mod ethos_u55;
mod ethos_u85;

use crate::ir::attr::{Fraction, ResizeMode};
use crate::ir::{DataType, OpType, Quantization, ReverseType, Shape, TensorUsage, TransposeType};

pub use ethos_u55::EthosU55Constraints;
pub use ethos_u85::EthosU85Constraints;

/// Target names accepted by `create_constraints`.
pub const KNOWN_TARGETS: &[&str] = &["ethos-u55", "ethos-u65", "ethos-u85"];

// ─── Queries ───────────────────────────────────────────────────────

/// Resize configuration of an `ExecutionQuery`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResizeQuery {
    pub scale_x: Fraction,
    pub scale_y: Fraction,
    pub offset_x: i32,
    pub offset_y: i32,
    pub ifm_shape: Shape,
    pub mode: ResizeMode,
}

/// Everything a target needs to know to decide whether an operator
/// configuration is executable.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionQuery {
    pub op_type: OpType,
    /// Operator the configuration will be executed as, when it differs
    /// from `op_type` (e.g. a Transpose run as a MemoryCopy).
    pub target_type: Option<OpType>,
    pub ifm_type: DataType,
    pub ifm2_type: Option<DataType>,
    pub ofm_type: DataType,
    pub ifm_shape: Shape,
    pub ifm2_shape: Shape,
    pub ofm_shape: Shape,
    pub quant_scaling_invalid_or_unequal: bool,
    pub resize: Option<ResizeQuery>,
    pub reverse: ReverseType,
    pub transpose: TransposeType,
}

impl ExecutionQuery {
    pub fn new(op_type: OpType, ifm_type: DataType, ofm_type: DataType) -> Self {
        Self {
            op_type,
            target_type: None,
            ifm_type,
            ifm2_type: None,
            ofm_type,
            ifm_shape: Shape::default(),
            ifm2_shape: Shape::default(),
            ofm_shape: Shape::default(),
            quant_scaling_invalid_or_unequal: false,
            resize: None,
            reverse: ReverseType::NONE,
            transpose: TransposeType::NONE,
        }
    }

    pub fn with_shapes(mut self, ifm: Shape, ifm2: Shape, ofm: Shape) -> Self {
        self.ifm_shape = ifm;
        self.ifm2_shape = ifm2;
        self.ofm_shape = ofm;
        self
    }

    pub fn with_ifm2_type(mut self, dtype: DataType) -> Self {
        self.ifm2_type = Some(dtype);
        self
    }

    fn has_float_operand(&self) -> bool {
        self.ifm_type.is_float()
            || self.ifm2_type.is_some_and(DataType::is_float)
            || self.ofm_type.is_float()
    }
}

// ─── Constraints Trait ─────────────────────────────────────────────

/// Capability queries for one hardware target.
///
/// All methods are pure. Anything outside a target's known-good set
/// answers `false`.
pub trait ArchitectureConstraints {
    /// Target name as accepted by `create_constraints`.
    fn name(&self) -> &'static str;

    /// Whether the target has a native execution unit for `op_type`.
    fn supports_op(&self, op_type: OpType) -> bool;

    fn supports_matmul(&self, query: &ExecutionQuery) -> bool;

    fn supports_reverse(&self, op_type: OpType, reverse: ReverseType) -> bool;

    fn supports_gather(&self, query: &ExecutionQuery) -> bool;

    fn supports_scatter(&self, query: &ExecutionQuery) -> bool;

    fn supports_argmax(&self, query: &ExecutionQuery) -> bool;

    fn supports_cast(&self, query: &ExecutionQuery) -> bool;

    fn supports_resize(&self, query: &ResizeQuery) -> bool;

    /// Native leaky ReLU for the queried type and scaling.
    fn supports_leaky_relu(&self, query: &ExecutionQuery) -> bool;

    /// Broadcast legality of an elementwise operator's operand shapes.
    fn supports_non_matching_shapes(&self, ifm: &Shape, ifm2: &Shape, ofm: &Shape) -> bool;

    /// Whether a standalone rescale from `from` to `to` can be folded into
    /// the input (`usage` IFM) or output (`usage` OFM) scaling of `op_type`.
    fn supports_fused_rescale(
        &self,
        op_type: OpType,
        usage: TensorUsage,
        from: DataType,
        to: DataType,
        quantization: &Quantization,
    ) -> bool;

    fn supports_transpose(&self, op_type: OpType, transpose: TransposeType) -> bool;

    fn supports_accumulator_save_restore(&self) -> bool;

    /// Whether the exact configuration in `query` can run on the target.
    /// Floating-point operands are always rejected.
    fn can_execute(&self, query: &ExecutionQuery) -> bool {
        if query.has_float_operand() {
            return false;
        }
        let op_type = query.target_type.unwrap_or(query.op_type);
        match op_type {
            OpType::MatMul => return self.supports_matmul(query),
            OpType::Reverse | OpType::ReverseV2 => {
                return self.supports_reverse(op_type, query.reverse)
            }
            OpType::Gather => return self.supports_gather(query),
            OpType::Scatter => return self.supports_scatter(query),
            OpType::ArgMax => return self.supports_argmax(query),
            OpType::Cast => return self.supports_cast(query),
            OpType::Resize => {
                return query
                    .resize
                    .as_ref()
                    .is_some_and(|resize| self.supports_resize(resize))
            }
            OpType::Transpose => return self.supports_transpose(op_type, query.transpose),
            OpType::LeakyRelu => return self.supports_leaky_relu(query),
            _ => {}
        }
        if !self.supports_op(op_type) {
            return false;
        }
        if op_type.is_binary_elementwise() {
            return self.supports_non_matching_shapes(
                &query.ifm_shape,
                &query.ifm2_shape,
                &query.ofm_shape,
            );
        }
        if op_type.is_unary_elementwise() {
            return self.supports_non_matching_shapes(
                &query.ifm_shape,
                &query.ifm_shape,
                &query.ofm_shape,
            );
        }
        true
    }
}

/// Create the constraints object for a target name. Unknown names fall
/// back to Ethos-U55; `config::resolve_target` rejects them earlier.
pub fn create_constraints(target: &str) -> Box<dyn ArchitectureConstraints> {
    match target {
        "ethos-u85" => Box::new(EthosU85Constraints::new()),
        "ethos-u65" => Box::new(EthosU55Constraints::u65()),
        _ => Box::new(EthosU55Constraints::new()),
    }
}

// ─── Shared Helpers ────────────────────────────────────────────────

/// Apply a global rescale to the extreme value of `from` that lies
/// furthest from the zero-point and check it stays representable in `to`.
pub(crate) fn rescale_fits(from: DataType, to: DataType, quantization: &Quantization) -> bool {
    let Some(scale) = quantization.scales.first() else {
        return true;
    };
    let zp = quantization.zero_point();
    let extreme = if zp < 0 {
        from.integer_max()
    } else {
        from.integer_min()
    };
    let product = (extreme - zp) as i128 * scale.scale as i128;
    // A negative shift scales up.
    let value = if scale.shift >= 0 {
        product >> scale.shift.min(127)
    } else if scale.shift < -63 {
        return product == 0;
    } else {
        product << -scale.shift
    };
    value >= to.integer_min() as i128 && value <= to.integer_max() as i128
}

/// Shapes are equal once both are padded to the same rank with ones.
pub(crate) fn same_padded(a: &Shape, b: &Shape) -> bool {
    let rank = a.rank().max(b.rank());
    a.pad_axes(rank, 1) == b.pad_axes(rank, 1)
}

/// Every axis of `small` is 1 or matches `full`, aligned innermost.
pub(crate) fn broadcasts_to(small: &Shape, full: &Shape) -> bool {
    if small.rank() > full.rank() {
        return small.dims()[..small.rank() - full.rank()].iter().all(|&d| d == 1)
            && broadcasts_to(&Shape::from(&small.dims()[small.rank() - full.rank()..]), full);
    }
    (0..small.rank()).all(|i| {
        let d = small.from_end(i);
        d == 1 || d == full.from_end(i)
    })
}
