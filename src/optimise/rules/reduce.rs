//! Reductions.
//!
//! The hardware reduces along the width axis of a 3D `[H, W, C]` view, or
//! along depth for sums. Every reduction is reshaped around its axis so
//! the reduced axis lands in that position.

use log::warn;

use super::{const_values, dtype_of, input_conn, name_of, output_conn};
use crate::ir::attr::{AxisAttr, TransposeAttr};
use crate::ir::{Attr, DataType, Graph, Kernel, OpId, OpType, Point2, RoundMode, Shape, TensorUsage};
use crate::optimise::util::shape::normalize_axis;
use crate::optimise::RewriteContext;

fn is_min_max_any_all(op_type: OpType) -> bool {
    matches!(
        op_type,
        OpType::ReduceMin | OpType::ReduceMax | OpType::ReduceAny | OpType::ReduceAll
    )
}

/// Axis attribute of `op` normalised against the IFM rank.
fn reduce_axis(graph: &Graph, op: OpId) -> Option<usize> {
    let operation = graph.op(op);
    let rank = operation.ifm()?.shape.rank();
    normalize_axis(operation.attr.axis()?, rank)
}

/// View the IFM as `[outer, axis, inner]`, reduce its width to 1 and use
/// a `W x 1` kernel.
pub fn rewrite_reduce_min_max_any_all(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if !is_min_max_any_all(graph.op_type(op)) {
        return op;
    }
    let Some(axis) = reduce_axis(graph, op) else {
        return op;
    };
    let operation = graph.op_mut(op);
    let Some(ifm) = operation.input_mut(TensorUsage::IFM) else {
        return op;
    };
    let ifm3 = ifm.shape.around_axis(axis);
    ifm.shape = ifm3.clone();
    if let Some(ofm) = operation.output_mut(TensorUsage::OFM) {
        ofm.shape = ifm3.with_width(1);
    }
    operation.attr = Attr::Axis(AxisAttr { axis: 1 });
    operation.kernel = operation.kernel.with_size(Point2::new(ifm3.width(), 1));
    op
}

/// A 32-bit ReduceSum over any axis but the innermost becomes a
/// `[H, W, C] -> [H, C, W]` transpose followed by a depth reduction.
pub fn rewrite_reduce_sum(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::ReduceSum {
        return op;
    }
    let (Some(ifm), Some(ofm), Some(axis)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
        reduce_axis(graph, op),
    ) else {
        return op;
    };
    if axis + 1 == ifm.shape.rank() || dtype_of(graph, &ifm) != DataType::Int32 {
        return op;
    }
    let ifm3 = ifm.shape.around_axis(axis);
    let name = format!("{}_transpose", name_of(graph, &ifm));
    let transposed = graph.clone_tensor(ifm.tensor(), name);
    let transposed_shape = ifm3.extract(&[0, 2, 1]);
    {
        let t = graph.tensor_mut(transposed);
        t.storage_shape = transposed_shape.clone();
        t.buffer = None;
    }

    let transpose = graph.add_op_with(
        OpType::Transpose,
        Attr::Transpose(TransposeAttr {
            perm: Shape::from([0, 2, 1]),
        }),
    );
    graph.copy_input(transpose, TensorUsage::IFM, &ifm).set_shape(ifm3);
    graph.connect_output(transpose, TensorUsage::OFM, transposed);
    ctx.record(graph, op, transpose);

    let sum = graph.add_op_with(OpType::ReduceSum, Attr::Axis(AxisAttr { axis: 2 }));
    graph.connect_input(sum, TensorUsage::IFM, transposed);
    graph
        .copy_output(sum, TensorUsage::OFM, &ofm)
        .set_shape(transposed_shape.with_depth(1));
    ctx.record(graph, op, sum);
    graph.disconnect(op);
    sum
}

/// ArgMax reduces the width of a 3D view and rounds towards negative
/// infinity. A rank-reduced OFM regains the reduced axis first.
pub fn rewrite_argmax(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::ArgMax {
        return op;
    }
    let Some(raw_axis) = graph.op(op).attr.axis() else {
        return op;
    };
    let (Some(ifm), Some(mut ofm_shape)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM).map(|c| c.shape),
    ) else {
        return op;
    };
    let rank = ifm.shape.rank();
    let Some(axis) = normalize_axis(raw_axis, rank) else {
        return op;
    };
    if ofm_shape.rank() != rank {
        ofm_shape = ofm_shape.insert(axis, 1);
    }
    let mut ifm_shape = ifm.shape;
    let operation = graph.op_mut(op);
    if axis != 1 || rank != 3 {
        ifm_shape = ifm_shape.around_axis(axis);
        ofm_shape = ifm_shape.with_width(1);
        operation.attr = Attr::Axis(AxisAttr { axis: 1 });
    }
    operation.rounding = RoundMode::TruncateToLower;
    operation.kernel = Kernel::new(Point2::new(ifm_shape[1], 1), Point2::new(1, 1));
    if let Some(conn) = operation.input_mut(TensorUsage::IFM) {
        conn.shape = ifm_shape;
    }
    if let Some(conn) = operation.output_mut(TensorUsage::OFM) {
        conn.shape = ofm_shape;
    }
    op
}

/// Frontend reductions over a constant list of axes become a chain of
/// single-axis reductions, each keeping the reduced axis as size 1.
pub fn convert_reduce_min_max_any_all(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let op_type = graph.op_type(op);
    if !is_min_max_any_all(op_type) || graph.op(op).input(TensorUsage::PARAMS).is_none() {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let Some(values) = const_values(graph, op, TensorUsage::PARAMS) else {
        warn!("{} has variable reduction axes", graph.describe_op(op));
        return op;
    };
    let rank = ifm.shape.rank();
    let Some(axes) = values
        .iter()
        .map(|&a| normalize_axis(a as i32, rank))
        .collect::<Option<Vec<usize>>>()
    else {
        return op;
    };
    if axes.is_empty() {
        return op;
    }

    let mut prev = ifm;
    let mut last = op;
    for &axis in &axes {
        let reduce = graph.add_op_with(op_type, Attr::Axis(AxisAttr { axis: axis as i32 }));
        graph.op_mut(reduce).rounding = RoundMode::Natural;
        graph.copy_input(reduce, TensorUsage::IFM, &prev);
        let mut shape = prev.shape.clone();
        shape[axis] = 1;
        let name = format!("{}_reduce{}", name_of(graph, &prev), axis);
        let dtype = dtype_of(graph, &prev);
        let out = super::add_tensor(graph, name, dtype, shape);
        graph
            .connect_output(reduce, TensorUsage::OFM, out)
            .set_quantization(prev.quantization.clone());
        ctx.record(graph, op, reduce);
        last = reduce;
        if let Some(conn) = output_conn(graph, reduce, TensorUsage::OFM) {
            prev = conn;
        }
    }
    graph
        .connect_output(last, TensorUsage::OFM, ofm.tensor())
        .set_quantization(prev.quantization)
        .set_shape(prev.shape);
    graph.disconnect(op);
    last
}
