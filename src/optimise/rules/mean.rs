//! Mean lowering.
//!
//! A Mean over height and/or width (or over depth when one of the other
//! axes is 1) becomes depthwise convolutions with all-one weights that sum
//! into an Int32 accumulator, followed by a multiply that divides by the
//! element count and applies the IFM to OFM rescale.

use log::warn;

use super::{add_tensor, const_values, dtype_of, input_conn, name_of, output_conn};
use crate::ir::{
    AxisOrder, DataType, Graph, Kernel, OpId, OpType, Point2, Quantization, QuantizationType,
    QuantizedScale, RoundMode, Shape, TensorConnection, TensorId, TensorSlice, TensorUsage,
};
use crate::optimise::util::shape::normalize_axis;
use crate::optimise::RewriteContext;

const MAX_MEAN_HEIGHT: i32 = 64;
const MAX_MEAN_KERNEL_SIZE: i32 = 64 * 64;

/// Whether a mean over the axes flagged in `reduce` (4D, non-zero means
/// reduced) can be computed without overflowing the Int32 accumulator.
fn mean_supported(dtype: DataType, reduce: &Shape, ifm: &Shape) -> bool {
    let elements: i64 = (0..4)
        .filter(|&i| reduce[i] != 0)
        .map(|i| ifm[i] as i64)
        .product();
    let limit: i64 = match dtype {
        DataType::Int8 => 2 << 23,
        DataType::UInt8 => 2 << 22,
        DataType::Int16 => 2 << 15,
        _ => return false,
    };
    if elements > limit || ifm.batch() != 1 {
        return false;
    }
    let within = |flag: i32, size: i32| flag == 0 || size <= MAX_MEAN_KERNEL_SIZE;
    if !(within(reduce.depth(), ifm.depth())
        && within(reduce.width(), ifm.width())
        && within(reduce.height(), ifm.height()))
    {
        return false;
    }
    // Depth can only be reduced after folding away a unit axis.
    reduce.depth() == 0 || (1..4).any(|i| ifm[i] == 1)
}

/// Constant operands shared by consecutive partial sums.
struct MeanOperands {
    weights: TensorId,
    bias: TensorId,
}

struct MeanPlan<'a> {
    name: &'a str,
    ifm: &'a TensorConnection,
    ifm_shape: &'a Shape,
    out_shape: &'a Shape,
    ifm_quant: &'a Quantization,
    weight_quant: &'a Quantization,
    acc_quant: &'a Quantization,
}

/// Depthwise convolution summing a `w x h` window of the slice
/// `offset`/`read` of the IFM into a new Int32 tensor.
fn depthwise_mean_op(
    graph: &mut Graph,
    plan: &MeanPlan<'_>,
    read: Shape,
    offset: Shape,
    (w, h): (i32, i32),
    operands: &mut Option<MeanOperands>,
) -> OpId {
    let ifm_type = dtype_of(graph, plan.ifm);
    let depth = plan.ifm_shape.depth();
    let shared = match operands.take() {
        Some(shared) => shared,
        None => {
            let weight_shape = Shape::from([plan.ifm_shape.batch(), h, w, depth]);
            let ones = vec![1; weight_shape.elements() as usize];
            let weights = graph.add_const(format!("{}_weights", plan.name), DataType::UInt8, weight_shape, ones);
            graph.tensor_mut(weights).axis_order = AxisOrder::IHWO;
            let bias_type = if ifm_type == DataType::Int16 {
                DataType::Int64
            } else {
                DataType::Int32
            };
            let bias = graph.add_const(format!("{}_bias", plan.name), bias_type, [depth], vec![0; depth as usize]);
            MeanOperands { weights, bias }
        }
    };

    let op = graph.add_op(OpType::DepthwiseConv2D);
    {
        let operation = graph.op_mut(op);
        operation.rounding = if ifm_type == DataType::Int16 {
            RoundMode::Natural
        } else {
            RoundMode::Dbl
        };
        operation.kernel = Kernel::new(Point2::new(w, h), Point2::new(1, 1));
    }
    let mut bias_quant = plan.ifm_quant.clone();
    bias_quant.zero_points = vec![0];
    graph
        .connect_input(op, TensorUsage::IFM, plan.ifm.tensor())
        .set_shape(plan.ifm_shape.clone())
        .set_quantization(plan.ifm_quant.clone())
        .set_slice(TensorSlice::new(offset, read));
    graph
        .connect_input(op, TensorUsage::Weights, shared.weights)
        .set_quantization(plan.weight_quant.clone());
    graph
        .connect_input(op, TensorUsage::Scales, shared.bias)
        .set_quantization(bias_quant);
    let out = add_tensor(graph, format!("{}_intermediate", plan.name), DataType::Int32, plan.out_shape.clone());
    graph
        .connect_output(op, TensorUsage::OFM, out)
        .set_quantization(plan.acc_quant.clone());
    *operands = Some(shared);
    op
}

/// Multiplier and right shift dividing a sum of `count` elements and
/// rescaling it by `scale`, arranged so the multiplier stays 32-bit.
fn mean_scale(scale: QuantizedScale, count: i32) -> (i32, i32) {
    let output_shift = 31 - scale.shift;
    let log2 = 31 - count.leading_zeros() as i32;
    let shift = log2.min(32).min(31 + output_shift).max(0);
    let multiplier = (((scale.scale as i64) << shift) / count as i64) as i32;
    (multiplier, 31 - (output_shift - shift))
}

pub fn convert_mean_ops(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Mean {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (input_conn(graph, op, TensorUsage::IFM), output_conn(graph, op, TensorUsage::OFM)) else {
        return op;
    };
    let Some(axes) = const_values(graph, op, TensorUsage::PARAMS) else {
        warn!("{} has variable reduction axes", graph.describe_op(op));
        return op;
    };
    let ifm_rank = ifm.shape.rank();
    let mut reduce = ifm.shape.with_zeros();
    for &axis in &axes {
        let Some(axis) = normalize_axis(axis as i32, ifm_rank) else {
            return op;
        };
        reduce[axis] = 1;
    }
    let mut reduce4 = reduce.pad_axes(4, 0);
    let mut ifm4 = ifm.shape.pad_axes(4, 1);
    let ifm_type = dtype_of(graph, &ifm);
    if !mean_supported(ifm_type, &reduce4, &ifm4) {
        return op;
    }

    // Reinstate reduced axes that were dropped from the OFM.
    let mut intermediate = ofm.shape.clone();
    if ofm.shape.rank() < ifm_rank {
        for i in 0..ifm_rank {
            if reduce[i] != 0 {
                intermediate = intermediate.insert(i, 1);
            }
        }
    }
    let mut intermediate = intermediate.pad_axes(4, 1);

    // Reduce over depth by moving channels into width or height.
    if reduce4.depth() != 0 && ifm4.depth() > 1 {
        let unit_axis = if ifm.shape.width() == 1 { 2 } else { 1 };
        reduce4 = reduce4.erase(unit_axis).insert(3, 0);
        ifm4 = ifm4.erase(unit_axis).insert(3, 1);
        intermediate = intermediate.erase(unit_axis).insert(3, 1);
    }

    let mut h = if reduce4.height() != 0 { ifm4.height() } else { 1 };
    let mut w = if reduce4.width() != 0 { ifm4.width() } else { 1 };
    let count = h * w;
    if h > MAX_MEAN_HEIGHT && count <= MAX_MEAN_KERNEL_SIZE && reduce4.height() != 0 && reduce4.width() != 0 {
        ifm4 = Shape::from([ifm4.batch(), 1, count, ifm4.depth()]);
        w = count;
        h = 1;
    }

    let height_per_conv = (MAX_MEAN_KERNEL_SIZE / w).min(h).min(MAX_MEAN_HEIGHT);
    let op_count = (h + height_per_conv - 1) / height_per_conv;

    let mut one_scale = ifm.quantization.clone();
    one_scale.scales = vec![QuantizedScale::unit()];
    let mut one_scale_zp0 = one_scale.clone();
    one_scale_zp0.zero_points = vec![0];
    let mut weight_quant = ifm.quantization.clone();
    weight_quant.scales = vec![QuantizedScale::unit()];
    weight_quant.zero_points = vec![0];
    weight_quant.quant_min = vec![0];
    weight_quant.quant_max = vec![255];

    let name = name_of(graph, &ofm).to_string();
    let plan = MeanPlan {
        name: &name,
        ifm: &ifm,
        ifm_shape: &ifm4,
        out_shape: &intermediate,
        ifm_quant: &one_scale,
        weight_quant: &weight_quant,
        acc_quant: &one_scale_zp0,
    };

    let mut operands = None;
    let mut acc: Option<TensorId> = None;
    for i in 0..op_count {
        let last = i == op_count - 1;
        let mut kh = height_per_conv;
        if last && h % height_per_conv != 0 {
            kh = h % height_per_conv;
            // A shorter kernel needs its own weights.
            operands = None;
        }
        let read_h = if reduce4.height() != 0 { kh } else { ifm4.height() };
        let read_w = if reduce4.width() != 0 { w } else { ifm4.width() };
        let offset = Shape::from([0, i * height_per_conv, 0, 0]);
        let read = ifm4.with_height(read_h).with_width(read_w);
        let partial = depthwise_mean_op(graph, &plan, read, offset, (w, kh), &mut operands);
        ctx.record(graph, op, partial);
        let Some(partial_out) = graph.output_tensor(partial, TensorUsage::OFM) else {
            return op;
        };

        let sum = match acc {
            Some(previous) => {
                let add = graph.add_op(OpType::Add);
                graph.op_mut(add).rounding = RoundMode::Dbl;
                graph
                    .connect_input(add, TensorUsage::IFM, previous)
                    .set_quantization(one_scale_zp0.clone());
                graph
                    .connect_input(add, TensorUsage::IFM1, partial_out)
                    .set_quantization(one_scale_zp0.clone());
                let mut sum_quant = one_scale_zp0.clone();
                sum_quant.kind = QuantizationType::Explicit;
                let out = add_tensor(graph, format!("{}_acc{}", name, i), DataType::Int32, intermediate.clone());
                graph
                    .connect_output(add, TensorUsage::OFM, out)
                    .set_quantization(sum_quant);
                ctx.record(graph, op, add);
                out
            }
            None => partial_out,
        };
        acc = Some(sum);
    }
    let Some(acc) = acc else {
        return op;
    };

    let ratio = ifm.quantization.dequantized_scale() / ofm.quantization.dequantized_scale();
    let (multiplier, shift) = mean_scale(QuantizedScale::from_f64(ratio), count);
    // Int32 inputs cannot be scaled, so the multiplier is an operand.
    let scalar = graph.add_scalar(format!("{}_scalar", name), DataType::Int32, multiplier as i64);
    let mul = graph.add_op(OpType::Mul);
    graph.op_mut(mul).rounding = RoundMode::Dbl;
    graph
        .connect_input(mul, TensorUsage::IFM, acc)
        .set_quantization(one_scale_zp0.clone());
    graph
        .connect_input(mul, TensorUsage::IFM1, scalar)
        .set_quantization(one_scale_zp0);
    let mut out_quant = ofm.quantization.clone();
    out_quant.scales = vec![QuantizedScale::new(1, shift)];
    out_quant.kind = QuantizationType::Explicit;
    graph
        .connect_output(mul, TensorUsage::OFM, ofm.tensor())
        .set_shape(intermediate)
        .set_quantization(out_quant);
    ctx.record(graph, op, mul);
    graph.disconnect(op);
    mul
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Tensor;
    use crate::optimise::rules::testutil::{apply, live_types, quant};

    fn mean(dtype: DataType, ifm: &[i32], ofm: &[i32], axes: Vec<i64>) -> (Graph, OpId) {
        let mut g = Graph::new("mean");
        let x = g.add_tensor(Tensor::new("x", dtype, ifm));
        let a = g.add_const("axes", DataType::Int32, [axes.len() as i32], axes);
        let y = g.add_tensor(Tensor::new("y", dtype, ofm));
        let op = g.add_op(OpType::Mean);
        g.connect_input(op, TensorUsage::IFM, x).set_quantization(quant(1.0, 0));
        g.connect_input(op, TensorUsage::PARAMS, a);
        g.connect_output(op, TensorUsage::OFM, y).set_quantization(quant(1.0, 0));
        g.add_input(x);
        g.add_output(y);
        (g, op)
    }

    #[test]
    fn test_mean_scale_divides_by_count() {
        let (multiplier, shift) = mean_scale(QuantizedScale::new(1 << 30, 30), 64);
        assert_eq!(multiplier, 1 << 30);
        assert_eq!(shift, 36);
    }

    #[test]
    fn test_mean_over_height_width() {
        let (mut g, op) = mean(DataType::Int8, &[1, 8, 8, 16], &[1, 1, 1, 16], vec![1, 2]);
        let (mul, log) = apply(&mut g, "ConvertMeanOps", convert_mean_ops, op);
        assert_eq!(live_types(&g), vec![OpType::DepthwiseConv2D, OpType::Mul]);
        assert_eq!(log.len(), 2);

        let dw = g.ops_of_type(OpType::DepthwiseConv2D)[0];
        assert_eq!(g.op(dw).kernel.size, Point2::new(8, 8));
        let weights = g.input_tensor(dw, TensorUsage::Weights).unwrap();
        assert_eq!(g.tensor(weights).storage_shape, Shape::from([1, 8, 8, 16]));
        assert_eq!(g.tensor(weights).axis_order, AxisOrder::IHWO);

        let scalar = g.input_tensor(mul, TensorUsage::IFM1).unwrap();
        assert_eq!(g.tensor(scalar).values(), Some(&[1i64 << 30][..]));
        let ofm = g.op(mul).ofm().unwrap();
        assert_eq!(ofm.quantization.scales, vec![QuantizedScale::new(1, 36)]);
        assert_eq!(ofm.shape, Shape::from([1, 1, 1, 16]));
    }

    #[test]
    fn test_mean_without_keep_dims_restores_axes() {
        let (mut g, op) = mean(DataType::Int8, &[1, 4, 6, 3], &[1, 3], vec![1, 2]);
        let (mul, _) = apply(&mut g, "ConvertMeanOps", convert_mean_ops, op);
        assert_eq!(g.op(mul).ofm().unwrap().shape, Shape::from([1, 1, 1, 3]));
        let dw = g.ops_of_type(OpType::DepthwiseConv2D)[0];
        assert_eq!(g.op(dw).kernel.size, Point2::new(6, 4));
    }

    #[test]
    fn test_tall_mean_split_into_partial_sums() {
        let (mut g, op) = mean(DataType::Int8, &[1, 100, 64, 1], &[1, 1, 1, 1], vec![1, 2]);
        apply(&mut g, "ConvertMeanOps", convert_mean_ops, op);
        assert_eq!(
            live_types(&g),
            vec![OpType::DepthwiseConv2D, OpType::DepthwiseConv2D, OpType::Add, OpType::Mul]
        );
        let dws = g.ops_of_type(OpType::DepthwiseConv2D);
        let second = g.op(dws[1]).ifm().unwrap();
        assert_eq!(second.slice.offset, Shape::from([0, 64, 0, 0]));
        assert_eq!(second.slice.shape, Shape::from([1, 36, 64, 1]));
        assert_eq!(g.op(dws[1]).kernel.size, Point2::new(64, 36));
        assert_ne!(
            g.input_tensor(dws[0], TensorUsage::Weights),
            g.input_tensor(dws[1], TensorUsage::Weights)
        );
    }

    #[test]
    fn test_mean_over_depth_moves_channels() {
        let (mut g, op) = mean(DataType::Int16, &[1, 1, 4, 32], &[1, 1, 4, 1], vec![3]);
        apply(&mut g, "ConvertMeanOps", convert_mean_ops, op);
        let dw = g.ops_of_type(OpType::DepthwiseConv2D)[0];
        assert_eq!(g.op(dw).kernel.size, Point2::new(32, 1));
        assert_eq!(g.op(dw).ifm().unwrap().shape, Shape::from([1, 4, 32, 1]));
        assert_eq!(g.op(dw).rounding, RoundMode::Natural);
        let bias = g.input_tensor(dw, TensorUsage::Scales).unwrap();
        assert_eq!(g.tensor(bias).dtype, DataType::Int64);
    }

    #[test]
    fn test_batched_mean_untouched() {
        let (mut g, op) = mean(DataType::Int8, &[2, 4, 4, 8], &[2, 1, 1, 8], vec![1, 2]);
        let before = g.clone();
        apply(&mut g, "ConvertMeanOps", convert_mean_ops, op);
        assert_eq!(g, before);
    }
}
