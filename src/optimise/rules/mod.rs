//! Rewrite rules.
//!
//! Every rule has the `OpRewrite` (or `TensorRewrite`) shape: it checks the
//! operator kind first and returns its argument untouched when it does not
//! match. A rule that replaces an operation connects the replacement, records
//! it on the context and disconnects the original before returning.

pub mod activation;
pub mod attributes;
pub mod conv;
pub mod decompose;
pub mod fusion;
pub mod mean;
pub mod pad;
pub mod reduce;
pub mod reshape;
pub mod tensors;
pub mod tflite;

#[cfg(test)]
pub(crate) mod testutil;

use crate::arch::ExecutionQuery;
use crate::ir::{
    DataType, Graph, OpId, OpType, Quantization, QuantizationType, QuantizedScale, RoundMode,
    Shape, Tensor, TensorConnection, TensorId, TensorUsage,
};

// ─── Construction Helpers ──────────────────────────────────────────

/// Build an operation of `op_type` carrying every connection, attribute,
/// kernel and rounding mode of `op`. The caller records the replacement
/// and disconnects `op`.
pub(crate) fn replace_op(graph: &mut Graph, op: OpId, op_type: OpType) -> OpId {
    let original = graph.op(op).clone();
    let new_op = graph.add_op_with(op_type, original.attr.clone());
    {
        let target = graph.op_mut(new_op);
        target.kernel = original.kernel;
        target.rounding = original.rounding;
    }
    for (usage, conn) in original.inputs() {
        graph.copy_input(new_op, usage, conn);
    }
    for (usage, conn) in original.outputs() {
        graph.copy_output(new_op, usage, conn);
    }
    new_op
}

/// Owned copy of a connection, so it can be reused while the graph is
/// being edited.
pub(crate) fn input_conn(graph: &Graph, op: OpId, usage: TensorUsage) -> Option<TensorConnection> {
    graph.op(op).input(usage).cloned()
}

pub(crate) fn output_conn(graph: &Graph, op: OpId, usage: TensorUsage) -> Option<TensorConnection> {
    graph.op(op).output(usage).cloned()
}

/// Constant values connected at `usage`, or `None` when absent or variable.
pub(crate) fn const_values(graph: &Graph, op: OpId, usage: TensorUsage) -> Option<Vec<i64>> {
    let tensor = graph.op(op).input(usage)?.tensor();
    graph.tensor(tensor).values().map(<[i64]>::to_vec)
}

pub(crate) fn dtype_of(graph: &Graph, conn: &TensorConnection) -> DataType {
    graph.tensor(conn.tensor()).dtype
}

pub(crate) fn name_of<'g>(graph: &'g Graph, conn: &TensorConnection) -> &'g str {
    &graph.tensor(conn.tensor()).name
}

/// Fresh variable tensor.
pub(crate) fn add_tensor(
    graph: &mut Graph,
    name: impl Into<String>,
    dtype: DataType,
    shape: impl Into<Shape>,
) -> TensorId {
    graph.add_tensor(Tensor::new(name, dtype, shape))
}

/// Variable copy of `like` (type and shape) for an intermediate result.
pub(crate) fn scratch_tensor(graph: &mut Graph, like: TensorId, name: impl Into<String>) -> TensorId {
    let tensor = graph.clone_tensor(like, name);
    graph.tensor_mut(tensor).buffer = None;
    tensor
}

/// Explicit `{1, 0}` scale with the given zero-point.
pub(crate) fn unit_scale_with_zp(zero_point: i64) -> Quantization {
    Quantization::with_scale(QuantizedScale::unit(), zero_point)
}

/// `quant` with its scales replaced by one explicit `scale`.
pub(crate) fn with_explicit_scale(quant: &Quantization, scale: QuantizedScale) -> Quantization {
    let mut out = quant.clone();
    out.kind = QuantizationType::Explicit;
    out.scales = vec![scale];
    out
}

/// Table lookup of `ifm` through `lut` into the OFM tensor of `ofm`.
///
/// The OFM keeps the IFM shape; the caller chooses the OFM quantization
/// (the 8-bit and 16-bit synthesized tables rescale themselves and pass
/// the IFM quantization through).
pub(crate) fn make_lut_op(
    graph: &mut Graph,
    ifm: &TensorConnection,
    lut: TensorId,
    ofm: &TensorConnection,
    ofm_quant: Quantization,
) -> OpId {
    let op = graph.add_op(OpType::Lut);
    graph.op_mut(op).rounding = RoundMode::Natural;
    graph.copy_input(op, TensorUsage::IFM, ifm);
    graph.connect_input(op, TensorUsage::Lut, lut);
    graph
        .connect_output(op, TensorUsage::OFM, ofm.tensor())
        .set_shape(ifm.shape.clone())
        .set_quantization(ofm_quant)
        .set_slice(ofm.slice.clone());
    op
}

/// Binary elementwise operation writing a new tensor named `name` whose
/// shape is the broadcast of both operand shapes.
pub(crate) fn make_binary(
    graph: &mut Graph,
    op_type: OpType,
    a: &TensorConnection,
    b: &TensorConnection,
    ofm_quant: Quantization,
    dtype: DataType,
    name: impl Into<String>,
) -> OpId {
    let shape = Shape::broadcast(&a.shape, &b.shape);
    let out = add_tensor(graph, name, dtype, shape.clone());
    let op = graph.add_op(op_type);
    graph.copy_input(op, TensorUsage::IFM, a);
    graph.copy_input(op, TensorUsage::IFM1, b);
    graph
        .connect_output(op, TensorUsage::OFM, out)
        .set_shape(shape)
        .set_quantization(ofm_quant);
    op
}

/// Capability query describing `op` as it is currently connected,
/// asked about `op_type`.
pub(crate) fn query_for(graph: &Graph, op: OpId, op_type: OpType) -> Option<ExecutionQuery> {
    let operation = graph.op(op);
    let ifm = operation.ifm()?;
    let ofm = operation.ofm()?;
    let mut query = ExecutionQuery::new(op_type, dtype_of(graph, ifm), dtype_of(graph, ofm));
    let ifm2_shape = match operation.input(TensorUsage::IFM1) {
        Some(ifm2) => {
            query = query.with_ifm2_type(dtype_of(graph, ifm2));
            ifm2.shape.clone()
        }
        None => Shape::default(),
    };
    Some(query.with_shapes(ifm.shape.clone(), ifm2_shape, ofm.shape.clone()))
}

/// Positions of the set bits of `mask`, lowest first.
pub(crate) fn mask_bits(mask: u32) -> impl Iterator<Item = usize> {
    (0..32).filter(move |bit| mask & (1 << bit) != 0)
}
