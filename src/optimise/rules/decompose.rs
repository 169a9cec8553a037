//! Decomposition of frontend-level operators into the smaller set the
//! code generator executes: memory copies with slices, bitwise
//! elementwise chains and single-axis tiles.

use log::warn;

use super::{add_tensor, const_values, dtype_of, input_conn, make_binary, name_of, output_conn, replace_op};
use crate::ir::attr::{AxisAttr, TransposeAttr};
use crate::ir::{
    Attr, DataType, Graph, OpId, OpType, Quantization, QuantizedScale, ReverseType,
    RoundMode, Shape, TensorSlice, TensorUsage, TransposeType,
};
use crate::optimise::util::lut::table16_to_lut;
use crate::optimise::util::shape::normalize_axis;
use crate::optimise::RewriteContext;

// ─── Scaling ───────────────────────────────────────────────────────

/// Move the constant multiplier/shift operands of a Rescale onto its OFM
/// quantization.
pub fn rewrite_rescale(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Rescale {
        return op;
    }
    let Attr::Rescale(attr) = graph.op(op).attr.clone() else {
        return op;
    };
    let (Some(multipliers), Some(shifts)) = (
        const_values(graph, op, TensorUsage::PARAMS),
        const_values(graph, op, TensorUsage::PARAMS1),
    ) else {
        warn!("{} has variable scaling parameters", graph.describe_op(op));
        return op;
    };
    let Some(ofm) = output_conn(graph, op, TensorUsage::OFM) else {
        return op;
    };
    let channels = if attr.per_channel {
        ofm.shape.depth() as usize
    } else {
        1
    };
    if multipliers.len() < channels || shifts.len() < channels {
        return op;
    }
    let scales = (0..channels)
        .map(|i| {
            let scale = if attr.scale32 {
                multipliers[i] as i32
            } else {
                multipliers[i] as i16 as i32
            };
            QuantizedScale::new(scale, shifts[i] as i8 as i32)
        })
        .collect();
    if let Some(conn) = graph.op_mut(op).output_mut(TensorUsage::OFM) {
        conn.quantization.scales = scales;
    }
    graph.disconnect_input(op, TensorUsage::PARAMS);
    graph.disconnect_input(op, TensorUsage::PARAMS1);
    op
}

/// Table with a constant lookup operand becomes a Lut. 16-bit tables are
/// resampled into base/slope pairs.
pub fn rewrite_table(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Table {
        return op;
    }
    let (Some(ifm), Some(params), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        input_conn(graph, op, TensorUsage::PARAMS),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let lut = match dtype_of(graph, &params) {
        DataType::Int8 => params.tensor(),
        DataType::Int16 => {
            let Some(lut) = graph
                .tensor(params.tensor())
                .values()
                .and_then(table16_to_lut)
            else {
                warn!("{} has no 513-entry table", graph.describe_op(op));
                return op;
            };
            graph.add_const("LUT", DataType::Int16, [lut.len() as i32], lut)
        }
        _ => return op,
    };
    let lut_op = graph.add_op(OpType::Lut);
    graph.op_mut(lut_op).rounding = RoundMode::Natural;
    graph.copy_input(lut_op, TensorUsage::IFM, &ifm);
    graph.connect_input(lut_op, TensorUsage::Lut, lut);
    graph.copy_output(lut_op, TensorUsage::OFM, &ofm);
    ctx.record(graph, op, lut_op);
    graph.disconnect(op);
    lut_op
}

/// Cast between the internal boolean form and integers becomes a bitwise
/// operation; integer to integer becomes an addition of zero.
pub fn rewrite_cast(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Cast {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let from = dtype_of(graph, &ifm);
    let to = dtype_of(graph, &ofm);

    let replacement = if from.is_bool() && to.is_integer() {
        let one = graph.add_scalar("const_one", DataType::Int8, 1);
        let and = graph.add_op(OpType::And);
        graph.copy_input(and, TensorUsage::IFM, &ifm);
        graph.connect_input(and, TensorUsage::IFM1, one);
        graph.copy_output(and, TensorUsage::OFM, &ofm);
        and
    } else if from.is_integer() && to.is_bool() {
        let zero = graph.add_scalar("const_zero", from, 0);
        let ne = graph.add_op(OpType::NotEqual);
        graph.copy_input(ne, TensorUsage::IFM, &ifm);
        graph.connect_input(ne, TensorUsage::IFM1, zero);
        graph.copy_output(ne, TensorUsage::OFM, &ofm);
        ne
    } else {
        let zero = graph.add_scalar("const_zero", from, 0);
        let add = replace_op(graph, op, OpType::Add);
        graph.connect_input(add, TensorUsage::IFM1, zero);
        add
    };
    ctx.record(graph, op, replacement);
    graph.disconnect(op);
    replacement
}

// ─── Data Movement ─────────────────────────────────────────────────

/// One MemoryCopy per IFM, each writing its slice of the OFM.
pub fn rewrite_concat(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Concat {
        return op;
    }
    let Some(ofm) = output_conn(graph, op, TensorUsage::OFM) else {
        return op;
    };
    let Some(axis) = graph
        .op(op)
        .attr
        .axis()
        .and_then(|a| normalize_axis(a, ofm.shape.rank()))
    else {
        return op;
    };
    let inputs: Vec<_> = graph
        .op(op)
        .inputs()
        .filter(|(u, _)| u.is_ifm())
        .map(|(_, c)| c.clone())
        .collect();

    let mut offset = ofm.shape.with_zeros();
    let mut result = op;
    for ifm in inputs {
        let copy = graph.add_op(OpType::MemoryCopy);
        graph.op_mut(copy).rounding = RoundMode::Natural;
        graph.copy_input(copy, TensorUsage::IFM, &ifm);
        graph
            .copy_output(copy, TensorUsage::OFM, &ofm)
            .set_slice(TensorSlice::new(offset.clone(), ifm.shape.clone()));
        ctx.record(graph, op, copy);
        result = copy;
        offset[axis] += ifm.shape[axis];
    }
    graph.disconnect(op);
    result
}

/// Slice becomes a MemoryCopy reading a sub-region of the IFM.
pub fn rewrite_slice(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Slice {
        return op;
    }
    let Attr::Slice(attr) = graph.op(op).attr.clone() else {
        return op;
    };
    let (Some(ifm), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let copy = graph.add_op(OpType::MemoryCopy);
    graph.op_mut(copy).rounding = RoundMode::Natural;
    graph
        .copy_input(copy, TensorUsage::IFM, &ifm)
        .set_slice(TensorSlice::new(attr.begin, attr.size));
    graph.copy_output(copy, TensorUsage::OFM, &ofm);
    ctx.record(graph, op, copy);
    graph.disconnect(op);
    copy
}

/// `Neg(x)` becomes `Sub(0, x)`.
pub fn rewrite_negate(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Neg {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let zero = graph.add_scalar("const_zero", dtype_of(graph, &ifm), 0);
    let sub = graph.add_op(OpType::Sub);
    graph.op_mut(sub).rounding = RoundMode::Natural;
    graph.connect_input(sub, TensorUsage::IFM, zero);
    graph.copy_input(sub, TensorUsage::IFM1, &ifm);
    graph.copy_output(sub, TensorUsage::OFM, &ofm);
    ctx.record(graph, op, sub);
    graph.disconnect(op);
    sub
}

/// `Select(s, a, b)` becomes `Or(And(a, s), AndNot(b, s))`, widening the
/// selector to the OFM element size first when needed.
pub fn rewrite_select(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Select {
        return op;
    }
    let (Some(mut selector), Some(on_true), Some(on_false), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        input_conn(graph, op, TensorUsage::IFM1),
        input_conn(graph, op, TensorUsage::IFM2),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let ofm_type = dtype_of(graph, &ofm);

    if dtype_of(graph, &selector).size_bits() != ofm_type.size_bits() {
        let zero = graph.add_scalar("const_zero", DataType::Int8, 0);
        let widened = add_tensor(
            graph,
            format!("{}_widened", name_of(graph, &selector)),
            ofm_type,
            selector.shape.clone(),
        );
        let add = graph.add_op(OpType::Add);
        graph.copy_input(add, TensorUsage::IFM, &selector);
        graph
            .connect_input(add, TensorUsage::IFM1, zero)
            .set_quantization(Quantization::unit());
        graph
            .connect_output(add, TensorUsage::OFM, widened)
            .set_shape(selector.shape.clone())
            .set_quantization(Quantization::unit());
        ctx.record(graph, op, add);
        if let Some(conn) = output_conn(graph, add, TensorUsage::OFM) {
            selector = conn;
        }
    }

    let ofm_name = name_of(graph, &ofm).to_string();
    let quant = ofm.quantization.clone();
    let and = make_binary(graph, OpType::And, &on_true, &selector, quant.clone(), ofm_type, format!("{}_and", ofm_name));
    let and_not = make_binary(
        graph,
        OpType::AndNot,
        &on_false,
        &selector,
        quant.clone(),
        ofm_type,
        format!("{}_and_not", ofm_name),
    );
    let or = graph.add_op(OpType::Or);
    for (usage, source) in [(TensorUsage::IFM, and), (TensorUsage::IFM1, and_not)] {
        if let Some(conn) = output_conn(graph, source, TensorUsage::OFM) {
            graph.copy_input(or, usage, &conn);
        }
    }
    graph.copy_output(or, TensorUsage::OFM, &ofm);
    ctx.record(graph, op, and);
    ctx.record(graph, op, and_not);
    ctx.record(graph, op, or);
    graph.disconnect(op);
    or
}

/// Split a Tile over several axes into a chain of single-axis tiles,
/// innermost tiled axis first.
pub fn rewrite_tile(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Tile {
        return op;
    }
    let (Some(ifm), Some(ofm), Some(params)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
        input_conn(graph, op, TensorUsage::PARAMS),
    ) else {
        return op;
    };
    if dtype_of(graph, &params) != DataType::Int32 {
        return op;
    }
    let Some(multiples) = graph.tensor(params.tensor()).values().map(<[i64]>::to_vec) else {
        warn!("{} has variable multiples", graph.describe_op(op));
        return op;
    };
    let rank = ifm.shape.rank();
    if multiples.len() != rank {
        return op;
    }
    let tiled: Vec<usize> = (0..rank).rev().filter(|&axis| multiples[axis] > 1).collect();
    if tiled.len() < 2 {
        return op;
    }

    let (ofm_name, ofm_type) = {
        let t = graph.tensor(ofm.tensor());
        (t.name.clone(), t.dtype)
    };
    let mut input = ifm;
    let mut result = op;
    for (i, &axis) in tiled.iter().enumerate() {
        let mut out_shape = input.shape.clone();
        out_shape[axis] = ofm.shape[axis];
        let out = if i + 1 == tiled.len() {
            ofm.tensor()
        } else {
            add_tensor(graph, format!("{}_tiled_axis_{}", ofm_name, axis), ofm_type, out_shape.clone())
        };
        let mut single = vec![1i64; rank];
        single[axis] = multiples[axis];
        let param = graph.add_const("multiples", DataType::Int32, [rank as i32], single);

        let tile = graph.add_op(OpType::Tile);
        graph.copy_input(tile, TensorUsage::IFM, &input);
        graph
            .connect_output(tile, TensorUsage::OFM, out)
            .set_shape(out_shape);
        graph.connect_input(tile, TensorUsage::PARAMS, param);
        ctx.record(graph, op, tile);
        result = tile;
        if let Some(conn) = output_conn(graph, tile, TensorUsage::OFM) {
            input = conn;
        }
    }
    graph.disconnect(op);
    result
}

/// Reverse of a batch or high-rank axis is reshaped so the reversed axis
/// lands on W of a 3-D view.
pub fn reshape_reverse(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Reverse {
        return op;
    }
    let Some(axis) = graph.op(op).attr.axis() else {
        return op;
    };
    let Some(ofm) = output_conn(graph, op, TensorUsage::OFM) else {
        return op;
    };
    let rank = ofm.shape.rank();
    let Some(axis) = normalize_axis(axis, rank) else {
        return op;
    };
    if rank > 4 || (rank == 4 && (ofm.shape.batch() > 1 || axis == 0)) {
        let shape = ofm.shape.around_axis(axis);
        let operation = graph.op_mut(op);
        operation.attr = Attr::Axis(AxisAttr { axis: 1 });
        if let Some(ifm) = operation.input_mut(TensorUsage::IFM) {
            ifm.shape = shape.clone();
        }
        if let Some(ofm) = operation.output_mut(TensorUsage::OFM) {
            ofm.shape = shape;
            ofm.reverse = ReverseType::W;
        }
    }
    op
}

// ─── Shape Compaction ──────────────────────────────────────────────

/// Drop unit D/W/H axes from elementwise operators of rank above 3 so
/// the remaining axes map onto the hardware's three.
pub fn optimise_elementwise(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if !graph.op_type(op).is_elementwise() {
        return op;
    }
    let Some(ofm) = output_conn(graph, op, TensorUsage::OFM) else {
        return op;
    };
    let mut shape = ofm.shape;
    let any_unit = |s: &Shape| s.depth() == 1 || s.width() == 1 || s.height() == 1;
    let spatial = shape.depth() as i64 * shape.width() as i64 * shape.height() as i64;
    if shape.rank() <= 3 || !any_unit(&shape) || shape.elements() <= spatial {
        return op;
    }

    let operation = graph.op_mut(op);
    while shape.rank() > 3 && any_unit(&shape) {
        let rank = shape.rank();
        let index = if shape.depth() == 1 {
            rank - 1
        } else if shape.width() == 1 {
            rank - 2
        } else {
            rank - 3
        };
        shape = shape.erase(index);
        for usage in [TensorUsage::IFM, TensorUsage::IFM1] {
            if let Some(conn) = operation.input_mut(usage) {
                if conn.shape.rank() > index {
                    conn.shape = conn.shape.erase(index);
                }
            }
        }
    }
    if let Some(conn) = operation.output_mut(TensorUsage::OFM) {
        conn.shape = shape;
    }
    op
}

/// When a transpose is not executable as is, drop unit OFM axes (and the
/// IFM axes they come from) and recompute the permutation.
pub fn rearrange_transpose(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Transpose {
        return op;
    }
    let Attr::Transpose(TransposeAttr { perm }) = graph.op(op).attr.clone() else {
        return op;
    };
    let (Some(ifm), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    if ctx.constraints.supports_transpose(OpType::MemoryCopy, ofm.transpose) {
        return op;
    }

    let mut ifm_shape = ifm.shape;
    let mut ofm_shape = ofm.shape.clone();
    let mut perm: Vec<i32> = perm.dims().to_vec();
    for ofm_dim in (0..perm.len().min(ofm.shape.rank())).rev() {
        if ofm.shape[ofm_dim] != 1 {
            continue;
        }
        let ifm_dim = perm[ofm_dim];
        ofm_shape = ofm_shape.erase(ofm_dim);
        ifm_shape = ifm_shape.erase(ifm_dim as usize);
        perm.remove(ofm_dim);
        for p in perm.iter_mut() {
            if *p > ifm_dim {
                *p -= 1;
            }
        }
    }
    let Some(transpose) = TransposeType::from_perm(&perm) else {
        return op;
    };
    let operation = graph.op_mut(op);
    operation.attr = Attr::Transpose(TransposeAttr {
        perm: Shape::from(perm),
    });
    if let Some(conn) = operation.input_mut(TensorUsage::IFM) {
        conn.shape = ifm_shape;
    }
    if let Some(conn) = operation.output_mut(TensorUsage::OFM) {
        conn.shape = ofm_shape;
        conn.transpose = transpose;
    }
    op
}
