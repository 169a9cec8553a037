//! Convolution, matrix and pooling rules.

use log::warn;

use super::{add_tensor, dtype_of, input_conn, name_of, output_conn, query_for, replace_op};
use crate::ir::attr::TransposeAttr;
use crate::ir::{
    Attr, AxisOrder, DataType, Graph, Kernel, OpId, OpType, Point2, Quantization, RoundMode,
    Shape, TensorConnection, TensorId, TensorSlice, TensorUsage, TransposeType,
};
use crate::optimise::util::shape::{as_matrix_4d, grid_width};
use crate::optimise::RewriteContext;

// ─── Fully Connected ───────────────────────────────────────────────

/// Fully connected layers (and batched 1x1 convolutions) run as a 1x1
/// convolution over a batch folded into a roughly square grid.
pub fn rewrite_fully_connected(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let operation = graph.op(op);
    let kernel = operation.kernel;
    let is_batched_pointwise = operation.op_type == OpType::Conv2D
        && operation.ifm().is_some_and(|c| c.shape.batch() > 1)
        && kernel.size == Point2::new(1, 1)
        && kernel.stride == Point2::new(1, 1)
        && kernel.dilated_wh() == Point2::new(1, 1);
    if operation.op_type != OpType::FullyConnected && !is_batched_pointwise {
        return op;
    }
    let Some(weights) = input_conn(graph, op, TensorUsage::Weights) else {
        return op;
    };
    let inputs = weights.shape.depth();
    let read_elements = graph.op(op).ifm().map(|c| {
        if c.slice.shape.is_empty() {
            c.shape.elements()
        } else {
            c.slice.shape.elements()
        }
    });
    if inputs <= 0 || read_elements.map_or(true, |n| n % inputs as i64 != 0) {
        warn!("fully connected {} input does not split into rows of {}", graph.describe_op(op), inputs);
        return op;
    }
    {
        let w = graph.tensor_mut(weights.tensor());
        if w.axis_order == AxisOrder::OI && w.storage_shape.rank() == 2 {
            w.storage_shape = Shape::from([w.storage_shape[0], 1, 1, w.storage_shape[1]]);
            w.axis_order = AxisOrder::OHWI;
        }
        if w.axis_order != AxisOrder::OHWI {
            warn!("fully connected weights '{}' are not in OHWI order", w.name);
            return op;
        }
    }

    let operation = graph.op_mut(op);
    let Some(ifm) = operation.input_mut(TensorUsage::IFM) else {
        return op;
    };
    let read_shape = if ifm.slice.shape.is_empty() {
        &mut ifm.shape
    } else {
        &mut ifm.slice.shape
    };
    let batch = (read_shape.elements() / inputs as i64) as i32;
    *read_shape = Shape::from([batch, 1, 1, inputs]);
    if batch > 1 {
        let w = grid_width(batch);
        let h = batch / w;
        *read_shape = Shape::from([1, h, w, inputs]);
        if let Some(ofm) = operation.output_mut(TensorUsage::OFM) {
            ofm.shape = Shape::from([1, h, w, ofm.shape.depth()]);
        }
    }
    op
}

// ─── Convolution ───────────────────────────────────────────────────

/// Strides above 3 are unsupported: such a convolution is unrolled into
/// one stride-1 convolution per output element, each reading its own
/// kernel-sized IFM window.
pub fn unroll_conv(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Conv2D {
        return op;
    }
    let (Some(ifm), Some(weights), Some(scales), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        input_conn(graph, op, TensorUsage::Weights),
        input_conn(graph, op, TensorUsage::Scales),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let kernel = graph.op(op).kernel;
    let needs_unroll = kernel.stride.x > 3 || kernel.stride.y > 3;
    let can_unroll = kernel.padding.is_zero()
        && ifm.slice.is_none()
        && ofm.slice.is_none()
        && kernel.dilation == Point2::new(1, 1);
    if !needs_unroll || !can_unroll {
        return op;
    }

    let window = ifm.shape.with_height(kernel.size.y).with_width(kernel.size.x);
    let cell = ofm.shape.with_height(1).with_width(1);
    let mut last = op;
    for h in 0..ofm.shape.height() {
        for w in 0..ofm.shape.width() {
            let unrolled = graph.add_op(OpType::Conv2D);
            graph.op_mut(unrolled).kernel = kernel.with_stride(Point2::new(1, 1));
            graph.copy_input(unrolled, TensorUsage::IFM, &ifm).set_slice(TensorSlice::new(
                Shape::from([0, h * kernel.stride.y, w * kernel.stride.x, 0]),
                window.clone(),
            ));
            graph.copy_input(unrolled, TensorUsage::Weights, &weights);
            graph.copy_input(unrolled, TensorUsage::Scales, &scales);
            graph
                .copy_output(unrolled, TensorUsage::OFM, &ofm)
                .set_slice(TensorSlice::new(Shape::from([0, h, w, 0]), cell.clone()));
            ctx.record(graph, op, unrolled);
            last = unrolled;
        }
    }
    graph.disconnect(op);
    last
}

/// A pool whose kernel covers the whole IFM plane in one step does not
/// need its stride.
pub fn fixup_pool_strides(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let operation = graph.op(op);
    if !operation.op_type.is_pooling() {
        return op;
    }
    let kernel = operation.kernel;
    let Some(ifm) = operation.ifm() else {
        return op;
    };
    let plane = Point2::new(ifm.shape.width(), ifm.shape.height());
    if kernel.size == kernel.stride
        && ifm.shape.rank() >= 3
        && kernel.stride == plane
        && kernel.padding.is_zero()
    {
        graph.op_mut(op).kernel = kernel.with_stride(Point2::new(1, 1));
    }
    op
}

/// Depthwise convolution of a single-channel IFM whose depth multiplier
/// produces every output channel is a plain convolution.
pub fn rewrite_depthwise(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let operation = graph.op(op);
    if operation.op_type != OpType::DepthwiseConv2D {
        return op;
    }
    let multiplier = operation.kernel.depth_multiplier;
    let (Some(ifm), Some(ofm), Some(weights)) = (
        operation.ifm(),
        operation.ofm(),
        operation.input(TensorUsage::Weights),
    ) else {
        return op;
    };
    if ifm.shape.depth() != 1 || multiplier == 1 || ofm.shape.depth() != multiplier {
        return op;
    }
    let weights = weights.tensor();
    {
        let w = graph.tensor_mut(weights);
        if w.axis_order == AxisOrder::HWCM && w.storage_shape.rank() == 4 {
            let s = &w.storage_shape;
            w.storage_shape = Shape::from([1, s[0], s[1], s[3]]);
            w.axis_order = AxisOrder::IHWO;
        }
    }
    let conv = replace_op(graph, op, OpType::Conv2D);
    graph.op_mut(conv).kernel.depth_multiplier = 1;
    ctx.record(graph, op, conv);
    graph.disconnect(op);
    conv
}

/// Output padding of a transpose convolution.
///
/// Positive padding shrinks the OFM write region and fills the uncovered
/// border with the bias through 1x1 depthwise convolutions over zeros.
/// Negative padding is taken out of the IFM padding instead.
pub fn rewrite_transpose_conv_ofm_padding(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let Attr::TransposeConv(attr) = &graph.op(op).attr else {
        return op;
    };
    let [pad_top, pad_bottom, pad_left, pad_right] = attr.out_pad_tblr;
    if attr.out_pad_tblr == [0; 4] {
        return op;
    }
    let (Some(ofm), Some(bias)) = (
        output_conn(graph, op, TensorUsage::OFM),
        input_conn(graph, op, TensorUsage::Scales),
    ) else {
        return op;
    };
    let ofm_shape = ofm.shape.clone();
    let zero = ofm_shape.with_zeros();
    let name = name_of(graph, &ofm).to_string();
    let mut write = TensorSlice::new(zero.clone(), ofm_shape.clone());
    let mut padding = graph.op(op).kernel.padding;
    let mut fills: Vec<(TensorSlice, String)> = Vec::new();

    if pad_top > 0 {
        write.offset = write.offset.with_height(write.offset.height() + pad_top);
        write.shape = write.shape.with_height(write.shape.height() - pad_top);
        fills.push((
            TensorSlice::new(zero.clone(), ofm_shape.with_height(write.offset.height())),
            format!("{}_ofmPadTop", name),
        ));
    } else {
        padding.top += pad_top;
        assert!(padding.top >= 0, "unexpected negative OFM padding (top)");
    }
    if pad_bottom > 0 {
        write.shape = write.shape.with_height(write.shape.height() - pad_bottom);
        let end = write.offset.height() + write.shape.height();
        fills.push((
            TensorSlice::new(zero.with_height(end), ofm_shape.with_height(ofm_shape.height() - end)),
            format!("{}_ofmPadBottom", name),
        ));
    } else {
        padding.bottom += pad_bottom;
        assert!(padding.bottom >= 0, "unexpected negative OFM padding (bottom)");
    }
    if pad_left > 0 {
        write.offset = write.offset.with_width(write.offset.width() + pad_left);
        write.shape = write.shape.with_width(write.shape.width() - pad_left);
        fills.push((
            TensorSlice::new(
                zero.with_height(write.offset.height()),
                ofm_shape
                    .with_width(write.offset.width())
                    .with_height(write.shape.height()),
            ),
            format!("{}_ofmPadLeft", name),
        ));
    } else {
        padding.left += pad_left;
        assert!(padding.left >= 0, "unexpected negative OFM padding (left)");
    }
    if pad_right > 0 {
        write.shape = write.shape.with_width(write.shape.width() - pad_right);
        let end = write.offset.width() + write.shape.width();
        fills.push((
            TensorSlice::new(
                zero.with_width(end).with_height(write.offset.height()),
                ofm_shape
                    .with_width(ofm_shape.width() - end)
                    .with_height(write.shape.height()),
            ),
            format!("{}_ofmPadRight", name),
        ));
    } else {
        padding.right += pad_right;
        assert!(padding.right >= 0, "unexpected negative OFM padding (right)");
    }

    for (region, fill_name) in fills {
        let fill = bias_fill(graph, &bias, &ofm, region, &fill_name);
        ctx.record(graph, op, fill);
    }
    let operation = graph.op_mut(op);
    operation.kernel = operation.kernel.with_padding(padding);
    if let Some(conn) = operation.output_mut(TensorUsage::OFM) {
        conn.slice = write;
    }
    op
}

/// 1x1 depthwise convolution of zeros with unit weights: writes the bias
/// into `region` of the OFM.
fn bias_fill(
    graph: &mut Graph,
    bias: &TensorConnection,
    ofm: &TensorConnection,
    region: TensorSlice,
    name: &str,
) -> OpId {
    let elements = region.shape.elements().max(0) as usize;
    let (input_type, rounding) = if dtype_of(graph, bias) == DataType::Int48 {
        (DataType::Int16, RoundMode::Natural)
    } else {
        (DataType::Int8, RoundMode::Dbl)
    };
    let zeros = graph.add_const(
        format!("{}_inputZero", name),
        input_type,
        region.shape.clone(),
        vec![0; elements],
    );
    let depth = ofm.shape.depth();
    let weights = graph.add_const(
        format!("{}_unitWeights", name),
        DataType::UInt8,
        [1, 1, 1, depth],
        vec![1; depth.max(0) as usize],
    );
    graph.tensor_mut(weights).axis_order = AxisOrder::IHWO;

    let fill = graph.add_op(OpType::DepthwiseConv2D);
    graph.op_mut(fill).rounding = rounding;
    graph.op_mut(fill).kernel = Kernel::new(Point2::new(1, 1), Point2::new(1, 1));
    graph
        .connect_input(fill, TensorUsage::IFM, zeros)
        .set_quantization(Quantization::unit());
    graph
        .connect_input(fill, TensorUsage::Weights, weights)
        .set_quantization(Quantization::unit());
    graph.copy_input(fill, TensorUsage::Scales, bias);
    graph.copy_output(fill, TensorUsage::OFM, ofm).set_slice(region);
    fill
}

/// Convolutions without a bias get an all-zero one: 64-bit for 16-bit
/// activations, 32-bit otherwise.
pub fn fixup_bias(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let operation = graph.op(op);
    if !operation.op_type.is_convolution() || operation.input(TensorUsage::Scales).is_some() {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (operation.ifm(), operation.ofm()) else {
        return op;
    };
    let depth = ofm.shape.depth();
    let dtype = if dtype_of(graph, ifm) == DataType::Int16 {
        DataType::Int64
    } else {
        DataType::Int32
    };
    let bias = graph.add_const("bias", dtype, [depth], vec![0; depth.max(0) as usize]);
    graph.connect_input(op, TensorUsage::Scales, bias);
    op
}

// ─── Matrix Multiplication ─────────────────────────────────────────

/// MatMul runs on 4D `[1, H, W, C]` operands with the second operand
/// transposed. A sole NHCW transpose already producing that operand is
/// dropped instead of adding another one.
pub fn rewrite_matmul(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::MatMul {
        return op;
    }
    {
        let operation = graph.op_mut(op);
        for usage in [TensorUsage::IFM, TensorUsage::IFM1] {
            if let Some(conn) = operation.input_mut(usage) {
                conn.shape = as_matrix_4d(&conn.shape);
            }
        }
        if let Some(conn) = operation.output_mut(TensorUsage::OFM) {
            conn.shape = as_matrix_4d(&conn.shape);
        }
    }
    let Some(ifm1) = input_conn(graph, op, TensorUsage::IFM1) else {
        return op;
    };

    let sole_producer = {
        let t = graph.tensor(ifm1.tensor());
        if t.readers().len() == 1 {
            t.sole_writer()
        } else {
            None
        }
    };
    if let Some(producer) = sole_producer {
        let is_nhcw = match &graph.op(producer).attr {
            Attr::Transpose(attr) if graph.op_type(producer) == OpType::Transpose => {
                attr.perm.rank() <= 4
                    && TransposeType::from_perm(attr.perm.dims()) == Some(TransposeType::NHCW)
            }
            _ => false,
        };
        if let (true, Some(source)) = (is_nhcw, input_conn(graph, producer, TensorUsage::IFM)) {
            graph
                .connect_input(op, TensorUsage::IFM1, source.tensor())
                .set_quantization(ifm1.quantization.clone())
                .set_shape(as_matrix_4d(&source.shape));
            ctx.record(graph, producer, op);
            graph.disconnect(producer);
            return op;
        }
    }

    let shape = &ifm1.shape;
    let transposed_shape = shape.with_width(shape.depth()).with_depth(shape.width());
    let name = format!("{}/{}", name_of(graph, &ifm1), OpType::Transpose);
    let dtype = dtype_of(graph, &ifm1);
    let transposed = add_tensor(graph, name, dtype, transposed_shape);
    let transpose = graph.add_op_with(
        OpType::Transpose,
        Attr::Transpose(TransposeAttr {
            perm: Shape::from([0, 1, 3, 2]),
        }),
    );
    graph
        .connect_input(transpose, TensorUsage::IFM, ifm1.tensor())
        .set_shape(ifm1.shape.clone());
    graph.connect_output(transpose, TensorUsage::OFM, transposed);
    ctx.record(graph, op, transpose);
    graph
        .connect_input(op, TensorUsage::IFM1, transposed)
        .set_quantization(ifm1.quantization);
    op
}

/// Transpose `tensor` from `[1, H, C, W]` into a new tensor of `shape`.
fn transpose_for_matmul(graph: &mut Graph, tensor: TensorId, shape: &Shape) -> (OpId, TensorId) {
    let (name, dtype) = {
        let t = graph.tensor(tensor);
        (format!("{}/{}", t.name, OpType::Transpose), t.dtype)
    };
    let transpose = graph.add_op_with(
        OpType::Transpose,
        Attr::Transpose(TransposeAttr {
            perm: Shape::from([0, 1, 3, 2]),
        }),
    );
    graph
        .connect_input(transpose, TensorUsage::IFM, tensor)
        .set_shape(Shape::from([1, shape.height(), shape.depth(), shape.width()]));
    let out = add_tensor(graph, name, dtype, shape.clone());
    graph.connect_output(transpose, TensorUsage::OFM, out);
    (transpose, out)
}

/// Frontend BatchMatMul becomes MatMul with batch and height merged, when
/// the target has a matrix unit. Adjoint operands are transposed first.
pub fn rewrite_batch_matmul(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::BatchMatMul {
        return op;
    }
    let Some(query) = query_for(graph, op, OpType::MatMul) else {
        return op;
    };
    if !ctx.constraints.can_execute(&query) {
        return op;
    }
    let (Some(ifm), Some(ifm2), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        input_conn(graph, op, TensorUsage::IFM1),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let (adj_x, adj_y) = match &graph.op(op).attr {
        Attr::BatchMatMul(attr) => (attr.adj_x, attr.adj_y),
        _ => (false, false),
    };
    let ofm_shape = ofm.shape.pad_axes(4, 1);
    let n = ofm_shape.batch() * ofm_shape.height();

    let mut operands = Vec::with_capacity(2);
    for (conn, adjoint) in [(&ifm, adj_x), (&ifm2, adj_y)] {
        let shape = conn.shape.pad_axes(4, 1);
        let mut reshaped = Shape::from([1, n, shape.width(), shape.depth()]);
        let mut tensor = conn.tensor();
        if adjoint {
            reshaped = Shape::from([1, n, reshaped.depth(), reshaped.width()]);
            let (transpose, out) = transpose_for_matmul(graph, tensor, &reshaped);
            ctx.record(graph, op, transpose);
            tensor = out;
        }
        operands.push((tensor, reshaped, conn.quantization.clone()));
    }

    let matmul = graph.add_op(OpType::MatMul);
    graph.op_mut(matmul).rounding = if dtype_of(graph, &ifm) == DataType::Int16 {
        RoundMode::Natural
    } else {
        RoundMode::Dbl
    };
    for ((tensor, shape, quant), usage) in operands.into_iter().zip([TensorUsage::IFM, TensorUsage::IFM1]) {
        graph
            .connect_input(matmul, usage, tensor)
            .set_shape(shape)
            .set_quantization(quant);
    }
    graph
        .copy_output(matmul, TensorUsage::OFM, &ofm)
        .set_shape(Shape::from([1, n, ofm_shape.width(), ofm_shape.depth()]));
    ctx.record(graph, op, matmul);
    graph.disconnect(op);
    matmul
}
