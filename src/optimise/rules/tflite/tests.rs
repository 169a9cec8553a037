use super::*;
use crate::ir::attr::{GatherAttr, StridedSliceAttr};
use crate::ir::{Tensor, TensorId};
use crate::optimise::rules::testutil::{apply, apply_on, live_types, quant, unary};

fn slices(g: &Graph) -> Vec<TensorSlice> {
    g.ops_of_type(OpType::MemoryCopy)
        .into_iter()
        .map(|op| g.op(op).ifm().unwrap().slice.clone())
        .collect()
}

/// `x -> op -> (outputs...)` with every tensor of `dtype`.
fn multi_output(
    op_type: OpType,
    dtype: DataType,
    ifm: [i32; 3],
    outputs: &[&[i32]],
) -> (Graph, OpId, Vec<TensorId>) {
    let mut g = Graph::new("split");
    let x = g.add_tensor(Tensor::new("x", dtype, ifm));
    let op = g.add_op(op_type);
    g.connect_input(op, TensorUsage::IFM, x);
    g.add_input(x);
    let mut ofms = Vec::new();
    for (i, shape) in outputs.iter().enumerate() {
        let y = g.add_tensor(Tensor::new(format!("y{}", i), dtype, shape.to_vec()));
        g.connect_output(op, TensorUsage::Ofm(i as u8), y);
        g.add_output(y);
        ofms.push(y);
    }
    (g, op, ofms)
}

fn strided_slice(attr: StridedSliceAttr, begin: Vec<i64>, end: Vec<i64>, ofm: &[i32]) -> (Graph, OpId) {
    let mut g = Graph::new("strided_slice");
    let x = g.add_tensor(Tensor::new("x", DataType::Int8, [1, 8, 8, 4]));
    let y = g.add_tensor(Tensor::new("y", DataType::Int8, ofm.to_vec()));
    let b = g.add_const("begin", DataType::Int32, [4], begin);
    let e = g.add_const("end", DataType::Int32, [4], end);
    let op = g.add_op_with(OpType::StridedSlice, Attr::StridedSlice(attr));
    g.connect_input(op, TensorUsage::IFM, x);
    g.connect_input(op, TensorUsage::PARAMS, b);
    g.connect_input(op, TensorUsage::PARAMS1, e);
    g.connect_output(op, TensorUsage::OFM, y);
    g.add_input(x);
    g.add_output(y);
    (g, op)
}

// ─── Pack / Split ──────────────────────────────────────────────────

#[test]
fn test_pack_becomes_concat_with_unit_axis() {
    let mut g = Graph::new("pack");
    let a = g.add_tensor(Tensor::new("a", DataType::Int8, [2, 3]));
    let b = g.add_tensor(Tensor::new("b", DataType::Int8, [2, 3]));
    let y = g.add_tensor(Tensor::new("y", DataType::Int8, [2, 2, 3]));
    let op = g.add_op_with(OpType::Pack, Attr::Axis(AxisAttr { axis: -3 }));
    g.connect_input(op, TensorUsage::IFM, a);
    g.connect_input(op, TensorUsage::IFM1, b);
    g.connect_output(op, TensorUsage::OFM, y);
    g.add_input(a);
    g.add_input(b);
    g.add_output(y);

    let (concat, log) = apply(&mut g, "RewritePack", rewrite_pack, op);
    assert_eq!(live_types(&g), vec![OpType::Concat]);
    assert_eq!(log.len(), 1);
    assert_eq!(g.op(concat).attr.axis(), Some(0));
    assert_eq!(g.op(concat).input(TensorUsage::IFM1).unwrap().shape, Shape::from([1, 2, 3]));
    assert_eq!(g.output_tensor(concat, TensorUsage::OFM), Some(y));
}

#[test]
fn test_split_reads_consecutive_windows() {
    let (mut g, op, ofms) = multi_output(OpType::Split, DataType::Int8, [1, 4, 6], &[&[1, 4, 3], &[1, 4, 3]]);
    let axis = g.add_scalar("axis", DataType::Int32, 2);
    g.connect_input(op, TensorUsage::PARAMS, axis);

    let (last, log) = apply(&mut g, "RewriteSplit", rewrite_split, op);
    assert_eq!(live_types(&g), vec![OpType::MemoryCopy, OpType::MemoryCopy]);
    assert_eq!(log.len(), 2);
    assert_eq!(
        slices(&g),
        vec![
            TensorSlice::new(Shape::from([0, 0, 0, 0]), Shape::from([1, 1, 4, 3])),
            TensorSlice::new(Shape::from([0, 0, 0, 3]), Shape::from([1, 1, 4, 3])),
        ]
    );
    assert_eq!(g.output_tensor(last, TensorUsage::OFM), Some(ofms[1]));
    assert_eq!(g.op(last).rounding, RoundMode::Natural);
    assert_eq!(g.op(last).ifm().unwrap().shape, Shape::from([1, 1, 4, 6]));
}

#[test]
fn test_unpack_outputs_keep_unit_axis() {
    let mut g = Graph::new("unpack");
    let x = g.add_tensor(Tensor::new("x", DataType::Int16, [3, 4]));
    let op = g.add_op_with(OpType::Unpack, Attr::Axis(AxisAttr { axis: 0 }));
    g.connect_input(op, TensorUsage::IFM, x);
    for i in 0..3 {
        let y = g.add_tensor(Tensor::new(format!("y{}", i), DataType::Int16, [4]));
        g.connect_output(op, TensorUsage::Ofm(i), y);
        g.add_output(y);
    }
    g.add_input(x);

    apply(&mut g, "RewriteSplit", rewrite_split, op);
    let offsets: Vec<Shape> = slices(&g).into_iter().map(|s| s.offset).collect();
    assert_eq!(
        offsets,
        vec![
            Shape::from([0, 0, 0, 0]),
            Shape::from([0, 0, 1, 0]),
            Shape::from([0, 0, 2, 0]),
        ]
    );
    let copy = g.ops_of_type(OpType::MemoryCopy)[2];
    assert_eq!(g.op(copy).ofm().unwrap().shape, Shape::from([1, 1, 1, 4]));
}

#[test]
fn test_slice_with_open_size() {
    let (mut g, op, _) = multi_output(OpType::Slice, DataType::UInt8, [2, 6, 8], &[&[1, 4, 5]]);
    let begin = g.add_const("begin", DataType::Int32, [3], vec![1, 2, 3]);
    let size = g.add_const("size", DataType::Int32, [3], vec![1, 4, -1]);
    g.connect_input(op, TensorUsage::PARAMS, begin);
    g.connect_input(op, TensorUsage::PARAMS1, size);

    apply(&mut g, "RewriteSplit", rewrite_split, op);
    assert_eq!(
        slices(&g),
        vec![TensorSlice::new(Shape::from([0, 1, 2, 3]), Shape::from([1, 1, 4, 5]))]
    );
}

#[test]
fn test_strided_slice_masks_and_negative_begin() {
    let attr = StridedSliceAttr {
        end_mask: 0b0100,
        ..StridedSliceAttr::default()
    };
    let (mut g, op) = strided_slice(attr, vec![0, 2, -4, 0], vec![1, 6, 0, 4], &[1, 4, 4, 4]);
    apply(&mut g, "RewriteSplit", rewrite_split, op);
    assert_eq!(
        slices(&g),
        vec![TensorSlice::new(Shape::from([0, 2, 4, 0]), Shape::from([1, 4, 4, 4]))]
    );
}

#[test]
fn test_strided_slice_shrink_reinstates_axis() {
    let attr = StridedSliceAttr {
        shrink_axis_mask: 0b0001,
        ..StridedSliceAttr::default()
    };
    let (mut g, op) = strided_slice(attr, vec![0, 0, 0, 0], vec![1, 8, 8, 4], &[8, 8, 4]);
    let (copy, _) = apply(&mut g, "RewriteSplit", rewrite_split, op);
    assert_eq!(g.op(copy).ofm().unwrap().shape, Shape::from([1, 8, 8, 4]));
}

#[test]
fn test_strided_slice_with_ellipsis_kept() {
    let attr = StridedSliceAttr {
        ellipsis_mask: 0b0010,
        ..StridedSliceAttr::default()
    };
    let (mut g, op) = strided_slice(attr, vec![0; 4], vec![1, 8, 8, 4], &[1, 8, 8, 4]);
    let before = g.clone();
    let (result, log) = apply(&mut g, "RewriteSplit", rewrite_split, op);
    assert_eq!(result, op);
    assert!(log.is_empty());
    assert_eq!(g, before);
}

#[test]
fn test_split_of_int32_kept() {
    let (mut g, op, _) = multi_output(OpType::Split, DataType::Int32, [1, 4, 6], &[&[1, 4, 3], &[1, 4, 3]]);
    let axis = g.add_scalar("axis", DataType::Int32, 2);
    g.connect_input(op, TensorUsage::PARAMS, axis);
    apply(&mut g, "RewriteSplit", rewrite_split, op);
    assert_eq!(live_types(&g), vec![OpType::Split]);
}

// ─── Reverse / Transpose ───────────────────────────────────────────

#[test]
fn test_reverse_v2_chains_single_axis_reverses() {
    let (mut g, op, _, ofm) = unary(OpType::ReverseV2, DataType::Int8, [1, 4, 4, 8], quant(0.5, 1), quant(0.25, 2));
    let axes = g.add_const("axes", DataType::Int32, [2], vec![1, 2]);
    g.connect_input(op, TensorUsage::PARAMS, axes);

    let (last, log) = apply(&mut g, "ConvertReverse", convert_reverse, op);
    assert_eq!(live_types(&g), vec![OpType::Reverse, OpType::Reverse]);
    assert_eq!(log.len(), 2);
    let first = g.ops_of_type(OpType::Reverse)[0];
    assert_eq!(g.op(first).attr.axis(), Some(1));
    let middle = g.output_tensor(first, TensorUsage::OFM).unwrap();
    assert_eq!(g.tensor(middle).name, "ofm_reverse_axis_1");
    assert_eq!(g.op(first).ifm().unwrap().quantization, Quantization::default());

    assert_eq!(g.op(last).attr.axis(), Some(2));
    assert_eq!(g.output_tensor(last, TensorUsage::OFM), Some(ofm));
    assert_eq!(g.op(last).ifm().unwrap().quantization, quant(0.5, 1));
    assert_eq!(g.op(last).ofm().unwrap().quantization, quant(0.25, 2));
}

#[test]
fn test_reverse_v2_variable_axes_kept() {
    let (mut g, op, _, _) = unary(OpType::ReverseV2, DataType::Int8, [1, 4], quant(1.0, 0), quant(1.0, 0));
    let axes = g.add_tensor(Tensor::new("axes", DataType::Int32, [1]));
    g.add_input(axes);
    g.connect_input(op, TensorUsage::PARAMS, axes);
    apply(&mut g, "ConvertReverse", convert_reverse, op);
    assert_eq!(live_types(&g), vec![OpType::ReverseV2]);
}

#[test]
fn test_transpose_permutation_decoded() {
    let (mut g, op, _, _) = unary(OpType::Transpose, DataType::Int8, [1, 2, 3, 4], quant(1.0, 0), quant(1.0, 0));
    let perm = g.add_const("perm", DataType::Int32, [4], vec![0, 2, 1, 3]);
    g.connect_input(op, TensorUsage::PARAMS, perm);
    let (result, _) = apply(&mut g, "ConvertTranspose", convert_transpose, op);
    assert_eq!(result, op);
    assert!(matches!(
        &g.op(op).attr,
        Attr::Transpose(TransposeAttr { perm }) if *perm == Shape::from([0, 2, 1, 3])
    ));
}

// ─── Gather / Scatter ──────────────────────────────────────────────

fn gather(index_type: DataType) -> (Graph, OpId) {
    let mut g = Graph::new("gather");
    let params = g.add_tensor(Tensor::new("table", DataType::Int8, [10, 16]));
    let indices = g.add_tensor(Tensor::new("ids", index_type, [5]));
    let y = g.add_tensor(Tensor::new("y", DataType::Int8, [5, 16]));
    let op = g.add_op_with(OpType::GatherV2, Attr::Gather(GatherAttr { axis: 0, batch_dims: 0 }));
    g.connect_input(op, TensorUsage::IFM, params);
    g.connect_input(op, TensorUsage::IFM1, indices);
    g.connect_output(op, TensorUsage::OFM, y);
    g.add_input(params);
    g.add_input(indices);
    g.add_output(y);
    (g, op)
}

#[test]
fn test_gather_on_u85_uses_4d_layout() {
    let (mut g, op) = gather(DataType::Int32);
    let (result, log) = apply_on(&mut g, "ethos-u85", "ConvertGather", convert_gather, op);
    assert_eq!(live_types(&g), vec![OpType::Gather]);
    assert_eq!(log.len(), 1);
    let gather = g.op(result);
    assert_eq!(gather.rounding, RoundMode::Dbl);
    assert_eq!(gather.ifm().unwrap().shape, Shape::from([1, 1, 10, 16]));
    assert_eq!(gather.input(TensorUsage::IFM1).unwrap().shape, Shape::from([1, 1, 1, 5]));
    assert_eq!(gather.ofm().unwrap().shape, Shape::from([1, 1, 5, 16]));
    assert_eq!(g.tensor(gather.ifm().unwrap().tensor()).name, "values");
    assert_eq!(g.tensor(gather.ofm().unwrap().tensor()).name, "output");
}

#[test]
fn test_gather_int16_indices_widened() {
    let (mut g, op) = gather(DataType::Int16);
    let (result, _) = apply_on(&mut g, "ethos-u85", "ConvertGather", convert_gather, op);
    assert_eq!(live_types(&g), vec![OpType::MemoryCopy, OpType::Gather]);
    let indices = g.input_tensor(result, TensorUsage::IFM1).unwrap();
    assert_eq!(g.tensor(indices).name, "indices-int32");
    assert_eq!(g.tensor(indices).dtype, DataType::Int32);
}

#[test]
fn test_gather_on_u55_kept() {
    let (mut g, op) = gather(DataType::Int32);
    let before = g.clone();
    apply(&mut g, "ConvertGather", convert_gather, op);
    assert_eq!(g, before);
}

fn scatter() -> (Graph, OpId) {
    let mut g = Graph::new("scatter");
    let indices = g.add_tensor(Tensor::new("ids", DataType::Int32, [4, 1]));
    let updates = g.add_tensor(Tensor::new("updates", DataType::Int8, [4, 8]));
    let shape = g.add_const("shape", DataType::Int32, [2], vec![16, 8]);
    let y = g.add_tensor(Tensor::new("y", DataType::Int8, [16, 8]));
    let op = g.add_op(OpType::ScatterNd);
    g.connect_input(op, TensorUsage::IFM, indices);
    g.connect_input(op, TensorUsage::IFM1, updates);
    g.connect_input(op, TensorUsage::PARAMS, shape);
    g.connect_output(op, TensorUsage::OFM, y);
    g.add_input(indices);
    g.add_input(updates);
    g.add_output(y);
    (g, op)
}

#[test]
fn test_scatter_writes_into_zeroed_values() {
    let (mut g, op) = scatter();
    let (result, log) = apply_on(&mut g, "ethos-u85", "ConvertScatter", convert_scatter, op);
    assert_eq!(live_types(&g), vec![OpType::Scatter]);
    assert_eq!(log.len(), 1);
    let scatter = g.op(result);
    let values_in = g.tensor(scatter.ifm().unwrap().tensor());
    assert_eq!(values_in.name, "values_in");
    assert_eq!(values_in.storage_shape, Shape::from([1, 1, 16, 8]));
    assert!(values_in.values().unwrap().iter().all(|&v| v == 0));
    assert_eq!(scatter.input(TensorUsage::IFM1).unwrap().shape, Shape::from([1, 1, 1, 4]));
    assert_eq!(scatter.input(TensorUsage::IFM2).unwrap().shape, Shape::from([1, 1, 4, 8]));
    assert_eq!(scatter.ofm().unwrap().shape, Shape::from([1, 1, 16, 8]));
    assert_eq!(g.tensor(scatter.ofm().unwrap().tensor()).name, "values_out");
}

#[test]
fn test_scatter_on_u55_kept() {
    let (mut g, op) = scatter();
    apply(&mut g, "ConvertScatter", convert_scatter, op);
    assert_eq!(live_types(&g), vec![OpType::ScatterNd]);
}

// ─── Resize ────────────────────────────────────────────────────────

fn resize(op_type: OpType, ifm: [i32; 4], ofm: [i32; 4], attr: ResizeFrontendAttr) -> (Graph, OpId) {
    let mut g = Graph::new("resize");
    let x = g.add_tensor(Tensor::new("x", DataType::Int8, ifm));
    let y = g.add_tensor(Tensor::new("y", DataType::Int8, ofm));
    let op = g.add_op_with(op_type, Attr::ResizeFrontend(attr));
    g.connect_input(op, TensorUsage::IFM, x).set_quantization(quant(0.1, 0));
    g.connect_output(op, TensorUsage::OFM, y).set_quantization(quant(0.1, 0));
    g.add_input(x);
    g.add_output(y);
    (g, op)
}

fn resize_attr(g: &Graph, op: OpId) -> ResizeAttr {
    match &g.op(op).attr {
        Attr::Resize(attr) => attr.clone(),
        other => panic!("expected resize attribute, got {:?}", other),
    }
}

#[test]
fn test_bilinear_upscale_by_two() {
    let (mut g, op) = resize(OpType::ResizeBilinear, [1, 4, 4, 8], [1, 8, 8, 8], ResizeFrontendAttr::default());
    let (result, log) = apply(&mut g, "ConvertResize", convert_resize, op);
    assert_eq!(live_types(&g), vec![OpType::Resize]);
    assert_eq!(log.len(), 1);
    let attr = resize_attr(&g, result);
    assert_eq!(attr.scale_x, Fraction::new(2, 1));
    assert_eq!(attr.scale_y, Fraction::new(2, 1));
    assert_eq!(attr.offset, Point2::new(0, 0));
    assert_eq!(attr.mode, ResizeMode::Bilinear);
    assert_eq!(g.op(result).rounding, RoundMode::Symmetric);
    let q = &g.op(result).ofm().unwrap().quantization;
    assert_eq!(q.kind, QuantizationType::Explicit);
    assert_eq!(q.scales, vec![QuantizedScale::new(1, 2)]);
    assert_eq!(q.zero_points, vec![0]);
}

#[test]
fn test_bilinear_align_corners_reduces_fraction() {
    let attr = ResizeFrontendAttr {
        align_corners: true,
        half_pixel_centers: false,
    };
    let (mut g, op) = resize(OpType::ResizeBilinear, [1, 4, 4, 8], [1, 7, 7, 8], attr);
    let (result, _) = apply(&mut g, "ConvertResize", convert_resize, op);
    assert_eq!(resize_attr(&g, result).scale_x, Fraction::new(2, 1));
}

#[test]
fn test_nearest_half_pixel_offset() {
    let (mut g, op) = resize(OpType::ResizeNearestNeighbor, [1, 4, 4, 8], [1, 8, 8, 8], ResizeFrontendAttr::default());
    // Half-pixel nearest has a non-zero offset, which Ethos-U55 cannot run.
    apply(&mut g, "ConvertResize", convert_resize, op);
    assert_eq!(live_types(&g), vec![OpType::ResizeNearestNeighbor]);

    let (result, _) = apply_on(&mut g, "ethos-u85", "ConvertResize", convert_resize, op);
    let attr = resize_attr(&g, result);
    assert_eq!(attr.scale_x, Fraction::new(4, 2));
    assert_eq!(attr.offset, Point2::new(-1, -1));
    assert_eq!(attr.mode, ResizeMode::Nearest);
    assert_eq!(g.op(result).ofm().unwrap().quantization.scales, vec![QuantizedScale::new(1, 0)]);
}

// ─── Squared Difference ────────────────────────────────────────────

#[test]
fn test_squared_difference_int8_chain() {
    let mut g = Graph::new("sqdiff");
    let a = g.add_tensor(Tensor::new("a", DataType::Int8, [1, 4]));
    let b = g.add_tensor(Tensor::new("b", DataType::Int8, [1, 4]));
    let y = g.add_tensor(Tensor::new("y", DataType::Int8, [1, 4]));
    let op = g.add_op(OpType::SquaredDifference);
    g.connect_input(op, TensorUsage::IFM, a).set_quantization(quant(0.5, 3));
    g.connect_input(op, TensorUsage::IFM1, b).set_quantization(quant(0.25, -2));
    g.connect_output(op, TensorUsage::OFM, y).set_quantization(quant(0.125, 0));
    g.add_input(a);
    g.add_input(b);
    g.add_output(y);

    let (result, log) = apply(&mut g, "RewriteSquaredDifference", rewrite_squared_difference, op);
    assert_eq!(
        live_types(&g),
        vec![
            OpType::MemoryCopy,
            OpType::Mul,
            OpType::MemoryCopy,
            OpType::Mul,
            OpType::Sub,
            OpType::Mul,
            OpType::Mul,
        ]
    );
    assert_eq!(log.len(), 7);

    let cast = g.ops_of_type(OpType::MemoryCopy)[0];
    let widened = g.op(cast).ofm().unwrap();
    assert_eq!(g.tensor(widened.tensor()).dtype, DataType::Int32);
    assert_eq!(widened.quantization.scales, vec![QuantizedScale::new(128, 0)]);
    assert_eq!(widened.quantization.zero_points, vec![0]);

    let m = g.find_tensor("a_input1_multiplier").unwrap();
    // 0.5 / (2 * 0.5) = 0.5
    assert_eq!(g.tensor(m).values(), Some(&[1i64 << 30][..]));

    assert_eq!(g.output_tensor(result, TensorUsage::OFM), Some(y));
    let out = &g.op(result).ofm().unwrap().quantization;
    assert_eq!(out.kind, QuantizationType::Explicit);
    // 1 / (2^14 * 0.125) = 2^-11
    assert_eq!(out.scales, vec![QuantizedScale::new(1, 11 + 30)]);
}

#[test]
fn test_squared_difference_without_scales_kept() {
    let (mut g, op, _, _) = unary(OpType::SquaredDifference, DataType::Int8, [1, 4], Quantization::default(), Quantization::default());
    let b = g.add_tensor(Tensor::new("b", DataType::Int8, [1, 4]));
    g.add_input(b);
    g.connect_input(op, TensorUsage::IFM1, b);
    let before = g.clone();
    apply(&mut g, "RewriteSquaredDifference", rewrite_squared_difference, op);
    assert_eq!(g, before);
}
