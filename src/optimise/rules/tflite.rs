//! TFLite frontend normalisation.
//!
//! These rules run before the GraphIR step list and turn TFLite-flavoured
//! operators into the smaller canonical set: data movement becomes
//! `Concat` or `MemoryCopy` with slices, axis-list operators become
//! chains of single-axis operators, and `Gather`, `Scatter` and `Resize`
//! are reshaped to the 4D conventions the hardware kernels expect.

use log::{trace, warn};

use super::{add_tensor, const_values, dtype_of, input_conn, name_of, output_conn, query_for, replace_op};
use crate::arch::{ExecutionQuery, ResizeQuery};
use crate::ir::attr::{AxisAttr, Fraction, ResizeAttr, ResizeFrontendAttr, ResizeMode, TransposeAttr};
use crate::ir::{
    Attr, DataType, Graph, OpId, OpType, Point2, Quantization, QuantizationType, QuantizedScale,
    RoundMode, Shape, TensorConnection, TensorSlice, TensorUsage,
};
use crate::optimise::util::shape::normalize_axis;
use crate::optimise::RewriteContext;

// ─── Pack / Split ──────────────────────────────────────────────────

/// `Pack` is a `Concat` whose inputs gain a unit dimension at the pack axis.
pub fn rewrite_pack(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Pack {
        return op;
    }
    let Some(ofm) = output_conn(graph, op, TensorUsage::OFM) else {
        return op;
    };
    let Some(axis) = graph.op(op).attr.axis() else {
        return op;
    };
    let inputs: Vec<(TensorUsage, TensorConnection)> = graph
        .op(op)
        .inputs()
        .filter(|(usage, _)| usage.is_ifm())
        .map(|(usage, conn)| (usage, conn.clone()))
        .collect();
    let Some((_, first)) = inputs.first() else {
        return op;
    };
    let Some(axis) = normalize_axis(axis, first.shape.rank() + 1) else {
        return op;
    };

    let concat = graph.add_op_with(OpType::Concat, Attr::Axis(AxisAttr { axis: axis as i32 }));
    graph.copy_output(concat, TensorUsage::OFM, &ofm);
    for (usage, conn) in &inputs {
        let shape = conn.shape.insert(axis, 1);
        graph.copy_input(concat, *usage, conn).set_shape(shape);
    }
    ctx.record(graph, op, concat);
    graph.disconnect(op);
    concat
}

fn is_split_type(dtype: DataType) -> bool {
    matches!(dtype, DataType::Int8 | DataType::UInt8 | DataType::Int16)
}

/// Axis of a Split (first PARAMS value) or SplitV (PARAMS1) operator.
fn split_axis(graph: &Graph, op: OpId) -> Option<i32> {
    let usage = match graph.op_type(op) {
        OpType::Split => TensorUsage::PARAMS,
        OpType::SplitV => TensorUsage::PARAMS1,
        _ => return graph.op(op).attr.axis(),
    };
    let values = const_values(graph, op, usage)?;
    values.first().map(|&v| v as i32)
}

/// Where one output of a split-like operator reads from its input.
struct SplitRead {
    ofm_shape: Shape,
    offset: Shape,
    shape: Shape,
}

/// Shape of an OFM with the shrunk axes reinstated as unit dimensions and
/// the inserted axes removed, so it lines up with the IFM.
fn strided_slice_ofm_shape(shape: &Shape, new_axis_mask: u32, shrink_axis_mask: u32) -> Shape {
    let mut shape = shape.clone();
    for axis in super::mask_bits(shrink_axis_mask) {
        if axis <= shape.rank() {
            shape = shape.insert(axis, 1);
        }
    }
    let mut new_axes: Vec<usize> = super::mask_bits(new_axis_mask).collect();
    new_axes.reverse();
    for axis in new_axes {
        if axis < shape.rank() {
            shape = shape.erase(axis);
        }
    }
    shape.pad_axes(4, 1)
}

/// Begin and extent of a StridedSlice read, both in IFM coordinates.
/// Masked entries read the whole axis; negative entries count from the end.
fn strided_slice_window(graph: &Graph, op: OpId, ifm: &Shape, begin_mask: u32, end_mask: u32) -> Option<(Shape, Shape)> {
    let begin = const_values(graph, op, TensorUsage::PARAMS)?;
    let end = const_values(graph, op, TensorUsage::PARAMS1)?;
    if let Some(strides) = const_values(graph, op, TensorUsage::Params(2)) {
        if strides.iter().any(|&s| s != 1) {
            return None;
        }
    }
    let mut offset = ifm.with_zeros();
    let mut size = ifm.clone();
    for axis in 0..ifm.rank() {
        let dim = ifm[axis];
        let start = if begin_mask & (1 << axis) == 0 {
            let b = *begin.get(axis)? as i32;
            if b < 0 { b + dim } else { b }
        } else {
            0
        };
        let stop = if end_mask & (1 << axis) == 0 {
            let e = *end.get(axis)? as i32;
            if e < 0 { e + dim } else { e }
        } else {
            dim
        };
        offset[axis] = start;
        size[axis] = (stop - start).max(0);
    }
    Some((offset.pad_axes(4, 0), size.pad_axes(4, 1)))
}

/// Split, SplitV, StridedSlice, Slice and Unpack become one `MemoryCopy`
/// per OFM, each reading its window of the IFM.
pub fn rewrite_split(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let op_type = graph.op_type(op);
    if !matches!(
        op_type,
        OpType::Split | OpType::SplitV | OpType::StridedSlice | OpType::Slice | OpType::Unpack
    ) {
        return op;
    }
    let Some(ifm) = input_conn(graph, op, TensorUsage::IFM) else {
        return op;
    };
    let strided = match &graph.op(op).attr {
        Attr::StridedSlice(attr) => Some(attr.clone()),
        _ => None,
    };
    if op_type == OpType::StridedSlice {
        let Some(attr) = &strided else {
            return op;
        };
        if attr.ellipsis_mask != 0 || (attr.new_axis_mask != 0 && attr.shrink_axis_mask != 0) {
            return op;
        }
    }
    let outputs: Vec<TensorConnection> = graph.op(op).outputs().map(|(_, conn)| conn.clone()).collect();
    if !is_split_type(dtype_of(graph, &ifm)) || !outputs.iter().all(|o| is_split_type(dtype_of(graph, o))) {
        return op;
    }

    let ifm_shape = ifm.shape.pad_axes(4, 1);
    let mut running = 0;
    let mut reads = Vec::with_capacity(outputs.len());
    for ofm in &outputs {
        let read = match op_type {
            OpType::Unpack | OpType::Split | OpType::SplitV => {
                let Some(axis) = split_axis(graph, op) else {
                    return op;
                };
                // Unpack outputs lack the unpacked axis; it comes back as 1.
                let unpack = op_type == OpType::Unpack;
                let rank = ofm.shape.rank() + usize::from(unpack);
                let Some(axis) = normalize_axis(axis, rank) else {
                    return op;
                };
                let shape = if unpack {
                    ofm.shape.insert(axis, 1)
                } else {
                    ofm.shape.clone()
                };
                let axis_4d = axis + 4 - shape.rank().min(4);
                let shape = shape.pad_axes(4, 1);
                let mut offset = Shape::filled(4, 0);
                offset[axis_4d] = running;
                running += shape[axis_4d];
                SplitRead {
                    ofm_shape: shape.clone(),
                    offset,
                    shape,
                }
            }
            OpType::Slice => {
                let (Some(begin), Some(size)) = (
                    const_values(graph, op, TensorUsage::PARAMS),
                    const_values(graph, op, TensorUsage::PARAMS1),
                ) else {
                    return op;
                };
                let mut offset = ifm.shape.with_zeros();
                let mut extent = ifm.shape.with_ones();
                for axis in 0..ifm.shape.rank().min(begin.len()).min(size.len()) {
                    offset[axis] = begin[axis] as i32;
                    // -1 reads to the end of the axis.
                    extent[axis] = if size[axis] < 0 {
                        ifm.shape[axis] - begin[axis] as i32
                    } else {
                        size[axis] as i32
                    };
                }
                SplitRead {
                    ofm_shape: ofm.shape.pad_axes(4, 1),
                    offset: offset.pad_axes(4, 0),
                    shape: extent.pad_axes(4, 1),
                }
            }
            _ => {
                let Some(attr) = &strided else {
                    return op;
                };
                let Some((offset, shape)) =
                    strided_slice_window(graph, op, &ifm.shape, attr.begin_mask, attr.end_mask)
                else {
                    warn!("{}: non-constant or strided window, kept", graph.describe_op(op));
                    return op;
                };
                SplitRead {
                    ofm_shape: strided_slice_ofm_shape(&ofm.shape, attr.new_axis_mask, attr.shrink_axis_mask),
                    offset,
                    shape,
                }
            }
        };
        reads.push(read);
    }

    let mut result = op;
    for (ofm, read) in outputs.iter().zip(reads) {
        let copy = graph.add_op(OpType::MemoryCopy);
        graph.op_mut(copy).rounding = RoundMode::Natural;
        graph
            .connect_input(copy, TensorUsage::IFM, ifm.tensor())
            .set_shape(ifm_shape.clone())
            .set_quantization(ifm.quantization.clone())
            .set_slice(TensorSlice::new(read.offset, read.shape));
        graph
            .copy_output(copy, TensorUsage::OFM, ofm)
            .set_shape(read.ofm_shape);
        ctx.record(graph, op, copy);
        result = copy;
    }
    graph.disconnect(op);
    result
}

// ─── Reverse / Transpose ───────────────────────────────────────────

/// `ReverseV2` over a constant axis list becomes a chain of single-axis
/// `Reverse` operations. Only the last one carries the quantization.
pub fn convert_reverse(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::ReverseV2 {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let Some(axes) = const_values(graph, op, TensorUsage::PARAMS) else {
        return op;
    };
    if axes.is_empty() {
        return op;
    }

    let (ofm_name, ofm_type, ofm_storage) = {
        let t = graph.tensor(ofm.tensor());
        (t.name.clone(), t.dtype, t.storage_shape.clone())
    };
    let mut input = ifm.tensor();
    let mut result = op;
    for (i, &axis) in axes.iter().enumerate() {
        let output = if i + 1 < axes.len() {
            add_tensor(
                graph,
                format!("{}_reverse_axis_{}", ofm_name, axis),
                ofm_type,
                ofm_storage.clone(),
            )
        } else {
            ofm.tensor()
        };
        let reverse = graph.add_op_with(OpType::Reverse, Attr::Axis(AxisAttr { axis: axis as i32 }));
        graph
            .connect_input(reverse, TensorUsage::IFM, input)
            .set_shape(ofm.shape.clone());
        graph
            .connect_output(reverse, TensorUsage::OFM, output)
            .set_shape(ofm.shape.clone());
        ctx.record(graph, op, reverse);
        input = output;
        result = reverse;
    }
    if let Some(conn) = graph.op_mut(result).input_mut(TensorUsage::IFM) {
        conn.quantization = ifm.quantization.clone();
    }
    if let Some(conn) = graph.op_mut(result).output_mut(TensorUsage::OFM) {
        conn.quantization = ofm.quantization.clone();
    }
    graph.disconnect(op);
    result
}

/// Decode a constant permutation vector into the Transpose attribute.
pub fn convert_transpose(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Transpose {
        return op;
    }
    let Some(params) = input_conn(graph, op, TensorUsage::PARAMS) else {
        return op;
    };
    if params.shape.depth() > 8 {
        return op;
    }
    let Some(values) = graph.tensor(params.tensor()).values() else {
        return op;
    };
    let perm: Vec<i32> = values.iter().map(|&v| v as i32).collect();
    graph.op_mut(op).attr = Attr::Transpose(TransposeAttr { perm: Shape::from(perm) });
    op
}

// ─── Gather / Scatter ──────────────────────────────────────────────

/// MemoryCopy widening `conn` to Int32 with its zero-point removed.
fn cast_to_int32(graph: &mut Graph, conn: &TensorConnection, name: impl Into<String>) -> OpId {
    let mut quant = conn.quantization.clone();
    quant.scales.clear();
    quant.zero_points = vec![0];
    let shape = conn.shape.pad_axes(4, 1);
    let out = add_tensor(graph, name, DataType::Int32, shape.clone());
    let op = graph.add_op(OpType::MemoryCopy);
    graph.op_mut(op).rounding = RoundMode::Natural;
    graph.copy_input(op, TensorUsage::IFM, conn);
    graph
        .connect_output(op, TensorUsage::OFM, out)
        .set_shape(shape)
        .set_quantization(quant);
    op
}

fn product(shape: &Shape, range: std::ops::Range<usize>) -> i32 {
    range.map(|i| shape[i]).product()
}

/// `GatherV2` becomes the 4D GraphIR `Gather`: values `[1, N, K, C]`,
/// indices `[1, 1, N, W]` and output `[1, N, W, C]`.
pub fn convert_gather(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::GatherV2 {
        return op;
    }
    let Some(mut query) = query_for(graph, op, OpType::Gather) else {
        return op;
    };
    query.target_type = Some(OpType::Gather);
    if !ctx.constraints.can_execute(&query) {
        return op;
    }
    let (Some(params), Some(indices), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        input_conn(graph, op, TensorUsage::IFM1),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let params_rank = params.shape.rank();
    let idx_rank = indices.shape.rank();
    let (axis, batch_dims) = match &graph.op(op).attr {
        Attr::Gather(attr) => (attr.axis, attr.batch_dims.max(0) as usize),
        _ => (0, 0),
    };
    let Some(axis) = normalize_axis(axis, params_rank) else {
        return op;
    };
    if batch_dims > axis || batch_dims >= idx_rank {
        return op;
    }

    let n = product(&params.shape, 0..batch_dims);
    let w = product(&indices.shape, batch_dims..idx_rank);
    let k = params.shape[axis];
    let c = product(&params.shape, axis + 1..params_rank);
    if product(&params.shape, batch_dims..axis) != 1 {
        trace!("gather {} has outer dimensions, kept", graph.describe_op(op));
        return op;
    }

    let op_mut = graph.op_mut(op);
    if let Some(conn) = op_mut.input_mut(TensorUsage::IFM) {
        conn.shape = Shape::from([1, n, k, c]);
    }
    if let Some(conn) = op_mut.input_mut(TensorUsage::IFM1) {
        conn.shape = Shape::from([1, 1, n, w]);
    }
    if let Some(conn) = op_mut.output_mut(TensorUsage::OFM) {
        conn.shape = Shape::from([1, n, w, c]);
    }
    graph.tensor_mut(params.tensor()).name = "values".into();
    graph.tensor_mut(indices.tensor()).name = "indices".into();
    graph.tensor_mut(ofm.tensor()).name = "output".into();

    if dtype_of(graph, &indices) == DataType::Int16 {
        let Some(reshaped) = input_conn(graph, op, TensorUsage::IFM1) else {
            return op;
        };
        let cast = cast_to_int32(graph, &reshaped, "indices-int32");
        if let Some(cast_ofm) = output_conn(graph, cast, TensorUsage::OFM) {
            graph.copy_input(op, TensorUsage::IFM1, &cast_ofm);
        }
    }

    let gather = replace_op(graph, op, OpType::Gather);
    graph.op_mut(gather).rounding = RoundMode::Dbl;
    ctx.record(graph, op, gather);
    graph.disconnect(op);
    gather
}

/// `ScatterNd` becomes the GraphIR `Scatter` writing into a zeroed
/// `[1, N, K, C]` value tensor.
pub fn convert_scatter(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::ScatterNd {
        return op;
    }
    let (Some(indices), Some(updates), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        input_conn(graph, op, TensorUsage::IFM1),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let mut query = ExecutionQuery::new(OpType::Scatter, dtype_of(graph, &updates), dtype_of(graph, &ofm))
        .with_ifm2_type(dtype_of(graph, &indices));
    query.target_type = Some(OpType::Scatter);
    if !ctx.constraints.can_execute(&query) {
        return op;
    }
    if indices.shape.is_empty() || indices.shape.from_end(0) != 1 {
        return op;
    }
    let Some(shape) = const_values(graph, op, TensorUsage::PARAMS) else {
        warn!("{}: output shape is not constant, kept", graph.describe_op(op));
        return op;
    };
    let Some(&k) = shape.first() else {
        return op;
    };

    let n = 1;
    let k = k as i32;
    let w = product(&indices.shape, 0..indices.shape.rank() - 1);
    let c: i32 = shape[1..].iter().map(|&v| v as i32).product();
    let ofm_shape = Shape::from([1, n, k, c]);

    graph.tensor_mut(indices.tensor()).name = "indices".into();
    graph.tensor_mut(updates.tensor()).name = "input".into();
    graph.tensor_mut(ofm.tensor()).name = "values_out".into();

    let ofm_type = dtype_of(graph, &ofm);
    let zeros = graph.add_const(
        "values_in",
        ofm_type,
        ofm_shape.clone(),
        vec![0; ofm_shape.elements() as usize],
    );

    let scatter = graph.add_op(OpType::Scatter);
    graph.op_mut(scatter).rounding = RoundMode::Natural;
    graph.connect_input(scatter, TensorUsage::IFM, zeros);
    graph
        .copy_input(scatter, TensorUsage::IFM1, &indices)
        .set_shape(Shape::from([1, 1, n, w]));
    graph
        .copy_input(scatter, TensorUsage::IFM2, &updates)
        .set_shape(Shape::from([1, n, w, c]));
    graph
        .copy_output(scatter, TensorUsage::OFM, &ofm)
        .set_shape(ofm_shape);
    ctx.record(graph, op, scatter);
    graph.disconnect(op);
    scatter
}

// ─── Resize ────────────────────────────────────────────────────────

fn gcd(a: i32, b: i32) -> i32 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Scale fraction and offset along one axis from the input size `d` to
/// the output size `n`.
fn resize_fraction(n: i32, d: i32, align_corners: bool, half_pixel: bool) -> (Fraction, i32) {
    let (mut n, mut d) = (n, d);
    if align_corners && d > 1 {
        n -= 1;
        d -= 1;
    }
    let g = gcd(n, d);
    n /= g;
    d /= g;
    let mut offset = 0;
    if half_pixel {
        n *= 2;
        d *= 2;
        offset = d / 2 - n / 2;
    }
    (Fraction::new(n, d), offset)
}

/// `ResizeBilinear` and `ResizeNearestNeighbor` become a GraphIR `Resize`
/// with exact scale fractions, when the target can run that resize.
pub fn convert_resize(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let op_type = graph.op_type(op);
    if !matches!(op_type, OpType::ResizeBilinear | OpType::ResizeNearestNeighbor) {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let frontend = match &graph.op(op).attr {
        Attr::ResizeFrontend(attr) => attr.clone(),
        _ => ResizeFrontendAttr::default(),
    };
    let bilinear = op_type == OpType::ResizeBilinear;
    // Nearest neighbour follows the reference kernels: half-pixel centres
    // unless corners are aligned.
    let half_pixel = if bilinear {
        frontend.half_pixel_centers
    } else {
        !frontend.align_corners || frontend.half_pixel_centers
    };
    let (scale_x, offset_x) = resize_fraction(ofm.shape.width(), ifm.shape.width(), frontend.align_corners, half_pixel);
    let (scale_y, offset_y) = resize_fraction(ofm.shape.height(), ifm.shape.height(), frontend.align_corners, half_pixel);
    let mode = if bilinear { ResizeMode::Bilinear } else { ResizeMode::Nearest };

    let mut query = ExecutionQuery::new(op_type, dtype_of(graph, &ifm), dtype_of(graph, &ofm));
    query.target_type = Some(OpType::Resize);
    query.resize = Some(ResizeQuery {
        scale_x,
        scale_y,
        offset_x,
        offset_y,
        ifm_shape: ifm.shape.clone(),
        mode,
    });
    if !ctx.constraints.can_execute(&query) {
        trace!("{} not executable as Resize", graph.describe_op(op));
        return op;
    }

    let resize = graph.add_op_with(
        OpType::Resize,
        Attr::Resize(ResizeAttr {
            scale_x,
            scale_y,
            offset: Point2::new(offset_x, offset_y),
            border: Point2::new(0, 0),
            mode,
        }),
    );
    graph.op_mut(resize).rounding = RoundMode::Symmetric;
    graph.copy_input(resize, TensorUsage::IFM, &ifm);

    // Bilinear output is post-scaled by 1 / (scale_x.n * scale_y.n), a
    // power of two on every supported configuration.
    let mut shift = 0;
    if bilinear && (ifm.shape.width() > 1 || ifm.shape.height() > 1) {
        let area = (scale_x.n * scale_y.n).max(1) as u32;
        shift = area.ilog2() as i32;
    }
    let mut quant = ofm.quantization.clone();
    quant.kind = QuantizationType::Explicit;
    quant.scales = vec![QuantizedScale::new(1, shift)];
    quant.zero_points = vec![0];
    graph
        .copy_output(resize, TensorUsage::OFM, &ofm)
        .set_quantization(quant);
    ctx.record(graph, op, resize);
    graph.disconnect(op);
    resize
}

// ─── Squared Difference ────────────────────────────────────────────

/// Binary op on two Int32 values, both read without rescaling.
fn raw_binary(
    graph: &mut Graph,
    op_type: OpType,
    a: &TensorConnection,
    b: &TensorConnection,
    raw: &Quantization,
    name: String,
) -> OpId {
    let shape = Shape::broadcast(&a.shape, &b.shape);
    let out = add_tensor(graph, name, DataType::Int32, shape.clone());
    let op = graph.add_op(op_type);
    graph.op_mut(op).rounding = RoundMode::Dbl;
    graph.copy_input(op, TensorUsage::IFM, a).set_quantization(raw.clone());
    graph.copy_input(op, TensorUsage::IFM1, b).set_quantization(raw.clone());
    graph
        .connect_output(op, TensorUsage::OFM, out)
        .set_shape(shape)
        .set_quantization(raw.clone());
    op
}

fn explicit_scale(quant: &mut Quantization, scale: QuantizedScale) {
    quant.kind = QuantizationType::Explicit;
    quant.scales = vec![scale];
}

fn quantized_multiplier(value: f64) -> QuantizedScale {
    let mut q = QuantizedScale::from_f64(value);
    q.scale = q.scale.max(1);
    q
}

/// `(a - b)^2` on quantized inputs, computed in 32 bits the way the
/// reference kernel does: both inputs are widened and left shifted,
/// scaled to a common range, subtracted, squared and scaled to the OFM.
pub fn rewrite_squared_difference(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::SquaredDifference {
        return op;
    }
    let (Some(ifm), Some(ifm2), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        input_conn(graph, op, TensorUsage::IFM1),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    if ifm.quantization.scales.is_empty()
        || ifm2.quantization.scales.is_empty()
        || ofm.quantization.scales.is_empty()
    {
        return op;
    }
    let ifm_scale = ifm.quantization.dequantized_scale();
    let ifm2_scale = ifm2.quantization.dequantized_scale();
    let ofm_scale = ofm.quantization.dequantized_scale();

    let twice_max = 2.0 * ifm_scale.max(ifm2_scale);
    let left_shift = if dtype_of(graph, &ifm) == DataType::Int16 { 0 } else { 7 };
    let input1 = quantized_multiplier(ifm_scale / twice_max);
    let input2 = quantized_multiplier(ifm2_scale / twice_max);
    let output = quantized_multiplier(twice_max * twice_max / ((1i64 << (2 * left_shift)) as f64 * ofm_scale));

    let mut raw = ifm.quantization.clone();
    raw.scales.clear();
    raw.zero_points.clear();

    let ifm_name = name_of(graph, &ifm).to_string();
    let ifm2_name = name_of(graph, &ifm2).to_string();
    let ofm_name = name_of(graph, &ofm).to_string();

    let mut scaled = Vec::with_capacity(2);
    for (conn, name, multiplier, suffix) in [
        (&ifm, &ifm_name, input1, "input1_multiplier"),
        (&ifm2, &ifm2_name, input2, "input2_multiplier"),
    ] {
        let cast = cast_to_int32(graph, conn, format!("{}_32bit", name));
        if let Some(out) = graph.op_mut(cast).output_mut(TensorUsage::OFM) {
            explicit_scale(&mut out.quantization, QuantizedScale::new(1 << left_shift, 0));
        }
        ctx.record(graph, op, cast);
        let Some(widened) = output_conn(graph, cast, TensorUsage::OFM) else {
            return op;
        };
        let constant = graph.add_scalar(format!("{}_{}", name, suffix), DataType::Int32, multiplier.scale as i64);
        let mul = graph.add_op(OpType::Mul);
        graph.op_mut(mul).rounding = RoundMode::Dbl;
        graph.copy_input(mul, TensorUsage::IFM, &widened).set_quantization(raw.clone());
        graph
            .connect_input(mul, TensorUsage::IFM1, constant)
            .set_quantization(raw.clone());
        let out = add_tensor(graph, format!("{}_scaled", name), DataType::Int32, widened.shape.clone());
        let mut quant = raw.clone();
        explicit_scale(&mut quant, QuantizedScale::new(1, multiplier.shift));
        graph
            .connect_output(mul, TensorUsage::OFM, out)
            .set_shape(widened.shape.clone())
            .set_quantization(quant);
        ctx.record(graph, op, mul);
        let Some(result) = output_conn(graph, mul, TensorUsage::OFM) else {
            return op;
        };
        scaled.push(result);
    }

    let sub = raw_binary(graph, OpType::Sub, &scaled[0], &scaled[1], &raw, format!("{}_diff", ofm_name));
    ctx.record(graph, op, sub);
    let Some(diff) = output_conn(graph, sub, TensorUsage::OFM) else {
        return op;
    };
    let square = raw_binary(graph, OpType::Mul, &diff, &diff, &raw, format!("{}_squared", ofm_name));
    ctx.record(graph, op, square);
    let Some(squared) = output_conn(graph, square, TensorUsage::OFM) else {
        return op;
    };

    let constant = graph.add_scalar(format!("{}_output_multiplier", ofm_name), DataType::Int32, output.scale as i64);
    let result = graph.add_op(OpType::Mul);
    graph.op_mut(result).rounding = RoundMode::Dbl;
    graph.copy_input(result, TensorUsage::IFM, &squared).set_quantization(raw.clone());
    graph
        .connect_input(result, TensorUsage::IFM1, constant)
        .set_quantization(raw.clone());
    let mut quant = ofm.quantization.clone();
    explicit_scale(&mut quant, QuantizedScale::new(1, output.shift));
    graph
        .copy_output(result, TensorUsage::OFM, &ofm)
        .set_quantization(quant);
    ctx.record(graph, op, result);
    graph.disconnect(op);
    result
}

#[cfg(test)]
mod tests;
