//! Padding rules.
//!
//! A `Pad` is either absorbed into the explicit margin of the convolution
//! that reads it, or expanded into fills of the border regions plus one
//! interior copy. Pad amounts come from the constant `Params` operand,
//! laid out as `[before0, after0, before1, after1, ...]`.

use super::{const_values, dtype_of, input_conn, name_of, output_conn};
use crate::ir::{Attr, Graph, Margin, OpId, OpType, Quantization, RoundMode, Shape, TensorConnection, TensorSlice, TensorUsage};
use crate::optimise::util::shape::calc_pad_after;
use crate::optimise::RewriteContext;

/// Split the flat pad operand into per-axis before/after shapes.
fn pad_amounts(values: &[i64], rank: usize) -> (Shape, Shape) {
    let at = |i: usize| values.get(i).copied().unwrap_or(0) as i32;
    let before = (0..rank).map(|axis| at(2 * axis)).collect::<Vec<_>>();
    let after = (0..rank).map(|axis| at(2 * axis + 1)).collect::<Vec<_>>();
    (Shape::from(before), Shape::from(after))
}

/// Expand a Pad into one fill per padded side of every axis and a copy of
/// the IFM into the interior of the OFM.
///
/// Each axis is handled on a 3D view `[outer, axis, inner]` of the OFM, so
/// a fill spans the full extent of every other axis. Fills are `Not` of
/// the complemented pad constant.
pub fn rewrite_pad(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Pad {
        return op;
    }
    let (Some(ifm), Some(ofm), Some(values)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
        const_values(graph, op, TensorUsage::PARAMS),
    ) else {
        return op;
    };
    let pad_const = match &graph.op(op).attr {
        Attr::Pad(attr) => attr.pad_const,
        _ => 0,
    };
    let dtype = dtype_of(graph, &ifm);
    let rank = ifm.shape.rank();
    let (before, after) = pad_amounts(&values, rank);

    for axis in 0..rank {
        let ifm3 = ifm.shape.around_axis(axis);
        let ofm3 = ofm.shape.around_axis(axis);
        let sides = [
            (before[axis], 0),
            (after[axis], before[axis] + ifm3.width()),
        ];
        for (amount, offset) in sides {
            if amount == 0 {
                continue;
            }
            let fill_value = graph.add_scalar("pad_const", dtype, !pad_const);
            let fill = graph.add_op(OpType::Not);
            graph.op_mut(fill).rounding = RoundMode::Natural;
            graph.connect_input(fill, TensorUsage::IFM, fill_value);
            graph
                .copy_output(fill, TensorUsage::OFM, &ofm)
                .set_shape(ofm3.clone())
                .set_slice(TensorSlice::new(
                    Shape::from([0, offset, 0]),
                    ofm3.with_width(amount),
                ));
            ctx.record(graph, op, fill);
        }
    }

    let copy = graph.add_op(OpType::MemoryCopy);
    graph.op_mut(copy).rounding = RoundMode::Natural;
    graph.copy_input(copy, TensorUsage::IFM, &ifm);
    graph
        .copy_output(copy, TensorUsage::OFM, &ofm)
        .set_slice(TensorSlice::new(before, ifm.shape.clone()));
    ctx.record(graph, op, copy);
    graph.disconnect(op);
    copy
}

/// Fold a Pad that only feeds this convolution into the convolution's
/// explicit padding. Declines when the padding is as large as the dilated
/// kernel, when the Pad changes type or scaling, or when the convolution
/// already pads. The Pad is removed once nothing else reads its output.
pub fn replace_pad_by_explicit_padding(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let op_type = graph.op_type(op);
    if !op_type.is_convolution() || op_type == OpType::TransposeConv2D {
        return op;
    }
    let kernel = graph.op(op).kernel;
    if !kernel.padding.is_zero() {
        return op;
    }
    let Some(conv_ifm) = graph.input_tensor(op, TensorUsage::IFM) else {
        return op;
    };
    let Some(pad) = graph.tensor(conv_ifm).sole_writer() else {
        return op;
    };
    if graph.op_type(pad) != OpType::Pad {
        return op;
    }
    let (Some(pad_ifm), Some(pad_ofm), Some(values)) = (
        input_conn(graph, pad, TensorUsage::IFM),
        output_conn(graph, pad, TensorUsage::OFM),
        const_values(graph, pad, TensorUsage::PARAMS),
    ) else {
        return op;
    };
    if dtype_of(graph, &pad_ifm) != dtype_of(graph, &pad_ofm)
        || !Quantization::scaling_valid_and_equal(&pad_ifm.quantization, &pad_ofm.quantization)
        || values.len() < 6
    {
        return op;
    }
    let (top, bottom, left, right) = (
        values[2] as i32,
        values[3] as i32,
        values[4] as i32,
        values[5] as i32,
    );
    let extent = kernel.dilated_wh();
    if left + right >= extent.x || top + bottom >= extent.y {
        return op;
    }
    let bottom = calc_pad_after(pad_ifm.shape.height(), kernel.stride.y, extent.y, top, bottom);
    let right = calc_pad_after(pad_ifm.shape.width(), kernel.stride.x, extent.x, left, right);

    graph.op_mut(op).kernel = kernel.with_padding(Margin::new(top, left, bottom, right));
    graph.copy_input(op, TensorUsage::IFM, &pad_ifm);
    if graph.tensor(pad_ofm.tensor()).readers().is_empty() {
        ctx.record(graph, pad, op);
        graph.disconnect(pad);
    }
    op
}

/// Fill one border region of the Pad's OFM with the zero-point.
fn fill_border(
    graph: &mut Graph,
    ctx: &mut RewriteContext<'_>,
    pad: OpId,
    ofm: &TensorConnection,
    side: &str,
    shape: Shape,
    offset: Shape,
) {
    let name = format!("{}/{}", name_of(graph, ofm), side);
    let dtype = dtype_of(graph, ofm);
    let zeros = vec![ofm.quantization.zero_point(); shape.elements().max(0) as usize];
    let fill_value = graph.add_const(name, dtype, shape.clone(), zeros);
    let fill = graph.add_op(OpType::MemoryCopy);
    graph.op_mut(fill).rounding = RoundMode::Natural;
    graph
        .connect_input(fill, TensorUsage::IFM, fill_value)
        .set_quantization(ofm.quantization.clone());
    graph
        .copy_output(fill, TensorUsage::OFM, ofm)
        .set_slice(TensorSlice::new(offset, shape));
    ctx.record(graph, pad, fill);
}

/// Fallback for Pads that could not be absorbed: copy the IFM into the
/// interior of the OFM and fill up to six border regions (top, bottom,
/// left, right, near, far) with the OFM zero-point.
pub fn convert_pad(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Pad {
        return op;
    }
    let (Some(ifm), Some(ofm), Some(values)) = (
        input_conn(graph, op, TensorUsage::IFM),
        output_conn(graph, op, TensorUsage::OFM),
        const_values(graph, op, TensorUsage::PARAMS),
    ) else {
        return op;
    };
    let pad = |i: usize| values.get(i).copied().unwrap_or(0) as i32;
    let (top, bottom, left, right, near, far) = (pad(2), pad(3), pad(4), pad(5), pad(6), pad(7));
    let ifm_shape = &ifm.shape;
    let ofm_shape = &ofm.shape;
    let zero = ofm_shape.with_zeros();

    let main = graph.add_op(OpType::MemoryCopy);
    graph.op_mut(main).rounding = RoundMode::Natural;
    graph.copy_input(main, TensorUsage::IFM, &ifm);
    graph.copy_output(main, TensorUsage::OFM, &ofm).set_slice(TensorSlice::new(
        zero.with_height(top).with_width(left).with_depth(near),
        ifm_shape.clone(),
    ));
    ctx.record(graph, op, main);

    let borders = [
        ("top", top, ofm_shape.with_height(top), zero.clone()),
        (
            "bottom",
            bottom,
            ofm_shape.with_height(bottom),
            zero.with_height(ofm_shape.height() - bottom),
        ),
        (
            "left",
            left,
            ifm_shape.with_width(left).with_depth(ofm_shape.depth()),
            zero.with_height(top),
        ),
        (
            "right",
            right,
            ifm_shape.with_width(right).with_depth(ofm_shape.depth()),
            zero.with_height(top).with_width(ofm_shape.width() - right),
        ),
        (
            "near",
            near,
            ifm_shape.with_depth(near),
            zero.with_height(top).with_width(left),
        ),
        (
            "far",
            far,
            ifm_shape.with_depth(far),
            zero.with_height(top)
                .with_width(left)
                .with_depth(ofm_shape.depth() - far),
        ),
    ];
    for (side, amount, shape, offset) in borders {
        if amount > 0 {
            fill_border(graph, ctx, op, &ofm, side, shape, offset);
        }
    }
    graph.disconnect(op);
    main
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::attr::PadAttr;
    use crate::ir::{DataType, Kernel, Point2, Tensor, TensorId};
    use crate::optimise::rules::testutil::{apply, live_types, quant};

    /// `x -> Pad(pads) -> p`, returning the graph, the Pad and `p`.
    fn pad_graph(ifm_shape: [i32; 4], pads: [i64; 8]) -> (Graph, OpId, TensorId, TensorId) {
        let mut ofm_shape = ifm_shape;
        for axis in 0..4 {
            ofm_shape[axis] += (pads[2 * axis] + pads[2 * axis + 1]) as i32;
        }
        let mut g = Graph::new("pad");
        let x = g.add_tensor(Tensor::new("x", DataType::Int8, ifm_shape));
        let p = g.add_tensor(Tensor::new("p", DataType::Int8, ofm_shape));
        let params = g.add_const("paddings", DataType::Int32, [4, 2], pads.to_vec());
        let pad = g.add_op_with(OpType::Pad, Attr::Pad(PadAttr { pad_const: 0 }));
        g.connect_input(pad, TensorUsage::IFM, x).set_quantization(quant(0.5, 3));
        g.connect_input(pad, TensorUsage::PARAMS, params);
        g.connect_output(pad, TensorUsage::OFM, p).set_quantization(quant(0.5, 3));
        g.add_input(x);
        (g, pad, x, p)
    }

    /// Attach a 3x3 stride 1 convolution reading `p`.
    fn add_conv(g: &mut Graph, p: TensorId, ifm_shape: [i32; 4]) -> OpId {
        let y = g.add_tensor(Tensor::new(
            "y",
            DataType::Int8,
            [1, ifm_shape[1] - 2, ifm_shape[2] - 2, 8],
        ));
        let w = g.add_const("w", DataType::Int8, [8, 3, 3, ifm_shape[3]], vec![1; 72 * ifm_shape[3] as usize]);
        let conv = g.add_op(OpType::Conv2D);
        g.op_mut(conv).kernel = Kernel::new(Point2::new(3, 3), Point2::new(1, 1));
        g.connect_input(conv, TensorUsage::IFM, p).set_quantization(quant(0.5, 3));
        g.connect_input(conv, TensorUsage::Weights, w);
        g.connect_output(conv, TensorUsage::OFM, y);
        g.add_output(y);
        conv
    }

    #[test]
    fn test_pad_absorbed_into_convolution() {
        let (mut g, pad, x, p) = pad_graph([1, 8, 8, 3], [0, 0, 1, 1, 1, 1, 0, 0]);
        let conv = add_conv(&mut g, p, [1, 10, 10, 3]);
        let (result, log) = apply(&mut g, "ReplacePadByExplicitPadding", replace_pad_by_explicit_padding, conv);
        assert_eq!(result, conv);
        assert_eq!(g.op(conv).kernel.padding, Margin::new(1, 1, 1, 1));
        assert!(!g.is_connected(pad));
        assert_eq!(g.input_tensor(conv, TensorUsage::IFM), Some(x));
        assert_eq!(g.op(conv).ifm().unwrap().shape, Shape::from([1, 8, 8, 3]));
        assert_eq!(log.len(), 1);
        assert_eq!(live_types(&g), vec![OpType::Conv2D]);
    }

    #[test]
    fn test_pad_too_large_for_kernel_is_kept() {
        let (mut g, pad, _, p) = pad_graph([1, 8, 8, 3], [0, 0, 2, 1, 1, 1, 0, 0]);
        let conv = add_conv(&mut g, p, [1, 11, 10, 3]);
        apply(&mut g, "ReplacePadByExplicitPadding", replace_pad_by_explicit_padding, conv);
        assert!(g.op(conv).kernel.padding.is_zero());
        assert!(g.is_connected(pad));
    }

    #[test]
    fn test_pad_with_other_reader_survives_absorption() {
        let (mut g, pad, x, p) = pad_graph([1, 8, 8, 3], [0, 0, 1, 1, 1, 1, 0, 0]);
        let conv = add_conv(&mut g, p, [1, 10, 10, 3]);
        g.add_output(p);
        let z = g.add_tensor(Tensor::new("z", DataType::Int8, [1, 10, 10, 3]));
        let other = g.add_op(OpType::Abs);
        g.connect_input(other, TensorUsage::IFM, p);
        g.connect_output(other, TensorUsage::OFM, z);
        apply(&mut g, "ReplacePadByExplicitPadding", replace_pad_by_explicit_padding, conv);
        assert_eq!(g.input_tensor(conv, TensorUsage::IFM), Some(x));
        assert!(g.is_connected(pad));
    }

    #[test]
    fn test_convert_pad_fills_borders() {
        let (mut g, pad, x, p) = pad_graph([1, 2, 2, 1], [0, 0, 1, 1, 1, 1, 0, 0]);
        g.add_output(p);
        let (main, log) = apply(&mut g, "ConvertPad", convert_pad, pad);
        assert_eq!(log.len(), 5);
        assert!(!g.is_connected(pad));
        assert_eq!(g.input_tensor(main, TensorUsage::IFM), Some(x));
        let slice = &g.op(main).ofm().unwrap().slice;
        assert_eq!(slice.offset, Shape::from([0, 1, 1, 0]));
        assert_eq!(slice.shape, Shape::from([1, 2, 2, 1]));

        let writers = g.tensor(p).writers().to_vec();
        assert_eq!(writers.len(), 5);
        let regions: Vec<(String, Shape, Shape)> = writers[1..]
            .iter()
            .map(|&w| {
                let ifm = g.op(w).ifm().unwrap();
                let fill = g.tensor(ifm.tensor());
                assert!(fill.values().unwrap().iter().all(|&v| v == 3));
                let slice = g.op(w).ofm().unwrap().slice.clone();
                (fill.name.clone(), slice.offset, slice.shape)
            })
            .collect();
        assert_eq!(
            regions,
            vec![
                ("p/top".to_string(), Shape::from([0, 0, 0, 0]), Shape::from([1, 1, 4, 1])),
                ("p/bottom".to_string(), Shape::from([0, 3, 0, 0]), Shape::from([1, 1, 4, 1])),
                ("p/left".to_string(), Shape::from([0, 1, 0, 0]), Shape::from([1, 2, 1, 1])),
                ("p/right".to_string(), Shape::from([0, 1, 3, 0]), Shape::from([1, 2, 1, 1])),
            ]
        );
    }

    #[test]
    fn test_rewrite_pad_per_axis_fills() {
        let (mut g, pad, _, p) = pad_graph([1, 2, 2, 1], [0, 0, 1, 2, 0, 1, 0, 0]);
        g.add_output(p);
        let (copy, log) = apply(&mut g, "RewritePad", rewrite_pad, pad);
        assert_eq!(g.op_type(copy), OpType::MemoryCopy);
        // Height before and after, width after, then the interior copy.
        assert_eq!(log.len(), 4);
        assert_eq!(
            live_types(&g),
            vec![OpType::Not, OpType::Not, OpType::Not, OpType::MemoryCopy]
        );

        let fills: Vec<(Shape, TensorSlice)> = g
            .ops_of_type(OpType::Not)
            .into_iter()
            .map(|op| {
                let fill = g.op(op).ifm().unwrap().tensor();
                assert_eq!(g.tensor(fill).values().unwrap(), &[-1]);
                let ofm = g.op(op).ofm().unwrap();
                (ofm.shape.clone(), ofm.slice.clone())
            })
            .collect();
        assert_eq!(
            fills,
            vec![
                (
                    Shape::from([1, 5, 3]),
                    TensorSlice::new(Shape::from([0, 0, 0]), Shape::from([1, 1, 3])),
                ),
                (
                    Shape::from([1, 5, 3]),
                    TensorSlice::new(Shape::from([0, 3, 0]), Shape::from([1, 2, 3])),
                ),
                (
                    Shape::from([5, 3, 1]),
                    TensorSlice::new(Shape::from([0, 2, 0]), Shape::from([5, 1, 1])),
                ),
            ]
        );
        let slice = &g.op(copy).ofm().unwrap().slice;
        assert_eq!(slice.offset, Shape::from([0, 1, 0, 0]));
        assert_eq!(slice.shape, Shape::from([1, 2, 2, 1]));
    }
}
