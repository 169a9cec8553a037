//! Attribute normalisation and constant propagation.
//!
//! These rules move operator attributes onto the connections and rounding
//! modes the later rules and the code generator read, so they run before
//! any decomposition.

use log::warn;

use super::{input_conn, output_conn};
use crate::ir::attr::{AsrAttr, ClampAttr, MulAttr, RescaleAttr, TransposeAttr};
use crate::ir::{
    Attr, Buffer, Graph, OpId, OpType, QuantizedScale, ReverseType, RoundMode, TensorSlice,
    TensorUsage, TransposeType,
};
use crate::optimise::util::fold::fold_binary;
use crate::optimise::util::shape::normalize_axis;
use crate::optimise::RewriteContext;

/// Translate operator attributes into rounding modes, quantization
/// limits and connection transpose/reverse tags.
pub fn convert_attributes(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let operation = graph.op(op);
    let attr = operation.attr.clone();
    let op_type = operation.op_type;
    let ofm_rank = operation.ofm().map(|c| c.shape.rank()).unwrap_or(0);

    match (op_type, attr) {
        (OpType::Asr, Attr::Asr(AsrAttr { round })) => {
            graph.op_mut(op).rounding = if round {
                RoundMode::Natural
            } else {
                RoundMode::TruncateToLower
            };
        }
        (OpType::Rescale, Attr::Rescale(RescaleAttr { double_round, .. })) => {
            graph.op_mut(op).rounding = if double_round {
                RoundMode::Dbl
            } else {
                RoundMode::Natural
            };
        }
        (OpType::Clamp, Attr::Clamp(ClampAttr { min, max })) => {
            if let Some(ofm) = graph.op_mut(op).output_mut(TensorUsage::OFM) {
                ofm.quantization.quant_min = vec![min as i64];
                ofm.quantization.quant_max = vec![max as i64];
            }
        }
        (OpType::Shl | OpType::Shr, _) => {
            if let Some(ofm) = graph.op_mut(op).output_mut(TensorUsage::OFM) {
                ofm.quantization.quant_min = vec![i64::MIN];
                ofm.quantization.quant_max = vec![i64::MAX];
            }
        }
        (OpType::Mul, Attr::Mul(MulAttr { shift })) => {
            if let Some(ofm) = graph.op_mut(op).output_mut(TensorUsage::OFM) {
                if ofm.quantization.scales.is_empty() {
                    ofm.quantization.scales.push(QuantizedScale::unit());
                }
                ofm.quantization.scales[0].shift += shift;
            }
        }
        (OpType::Transpose, Attr::Transpose(TransposeAttr { perm })) => {
            let Some(transpose) = TransposeType::from_perm(perm.dims()) else {
                panic!("malformed transpose permutation {} on {}", perm, graph.describe_op(op));
            };
            if let Some(ofm) = graph.op_mut(op).output_mut(TensorUsage::OFM) {
                ofm.transpose = transpose;
            }
        }
        (OpType::Reverse, Attr::Axis(a)) => {
            let reverse = match normalize_axis(a.axis, ofm_rank) {
                Some(axis) => ReverseType::for_axis(axis, ofm_rank),
                None => ReverseType::NONE,
            };
            if let Some(ofm) = graph.op_mut(op).output_mut(TensorUsage::OFM) {
                ofm.reverse = reverse;
            }
        }
        _ => {}
    }
    op
}

/// Fold whole multiples of the resize numerator out of the offsets and
/// into an IFM read slice.
pub fn convert_resize_offsets(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Resize {
        return op;
    }
    let Attr::Resize(mut attr) = graph.op(op).attr.clone() else {
        return op;
    };
    let Some(ifm) = input_conn(graph, op, TensorUsage::IFM) else {
        return op;
    };
    if ifm.shape.rank() < 3 {
        return op;
    }
    let mut start = ifm.shape.with_zeros();
    let mut shape = ifm.shape.clone();
    if attr.offset.y >= attr.scale_y.n {
        start[1] += attr.offset.y / attr.scale_y.n;
        shape[1] -= start[1];
        attr.offset.y %= attr.scale_y.n;
    }
    if attr.offset.x >= attr.scale_x.n {
        start[2] += attr.offset.x / attr.scale_x.n;
        shape[2] -= start[2];
        attr.offset.x %= attr.scale_x.n;
    }
    let operation = graph.op_mut(op);
    operation.attr = Attr::Resize(attr);
    if let Some(conn) = operation.input_mut(TensorUsage::IFM) {
        conn.set_slice(TensorSlice::new(start, shape));
    }
    op
}

/// Evaluate operators whose IFM inputs are all constant, storing the
/// result on the OFM tensor and dropping the operator.
pub fn const_propagation(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let operation = graph.op(op);
    let usages = operation.ifm_usages();
    if usages.is_empty() || usages.iter().any(|&u| !is_constant_input(graph, op, u)) {
        return op;
    }
    if operation.op_type != OpType::Shl {
        return op;
    }
    let (Some(a), Some(b), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        input_conn(graph, op, TensorUsage::IFM1),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };
    let a_tensor = graph.tensor(a.tensor());
    let b_tensor = graph.tensor(b.tensor());
    let out = graph.tensor(ofm.tensor());
    let (Some(a_values), Some(b_values)) = (a_tensor.values(), b_tensor.values()) else {
        return op;
    };
    let Some(values) = fold_binary(
        OpType::Shl,
        out.dtype,
        (a_values, &a_tensor.storage_shape),
        (b_values, &b_tensor.storage_shape),
        &out.storage_shape,
    ) else {
        warn!("cannot fold {} into {:?}", graph.describe_op(op), out.dtype);
        return op;
    };
    graph.tensor_mut(ofm.tensor()).buffer = Some(Buffer::new(values));
    graph.disconnect(op);
    op
}

fn is_constant_input(graph: &Graph, op: OpId, usage: TensorUsage) -> bool {
    graph
        .input_tensor(op, usage)
        .is_some_and(|t| graph.tensor(t).is_constant())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::attr::{AxisAttr, Fraction, ResizeAttr, ResizeMode};
    use crate::ir::{DataType, Point2, Quantization, Shape, Tensor};
    use crate::optimise::rules::testutil::{apply, binary, unary};

    #[test]
    fn test_asr_and_rescale_rounding() {
        let (mut g, asr, _, _, _) = binary(OpType::Asr, DataType::Int32, [1, 4]);
        g.op_mut(asr).attr = Attr::Asr(AsrAttr { round: false });
        apply(&mut g, "ConvertAttributes", convert_attributes, asr);
        assert_eq!(g.op(asr).rounding, RoundMode::TruncateToLower);

        let (mut g, rescale, _, _) = unary(
            OpType::Rescale,
            DataType::Int8,
            [1, 4],
            Quantization::default(),
            Quantization::default(),
        );
        g.op_mut(rescale).attr = Attr::Rescale(RescaleAttr {
            double_round: false,
            ..RescaleAttr::default()
        });
        apply(&mut g, "ConvertAttributes", convert_attributes, rescale);
        assert_eq!(g.op(rescale).rounding, RoundMode::Natural);
    }

    #[test]
    fn test_mul_shift_on_missing_scale() {
        let (mut g, mul, _, _, _) = binary(OpType::Mul, DataType::Int32, [1, 4]);
        g.op_mut(mul).attr = Attr::Mul(MulAttr { shift: 3 });
        apply(&mut g, "ConvertAttributes", convert_attributes, mul);
        let ofm = g.op(mul).ofm().unwrap();
        assert_eq!(ofm.quantization.scales, vec![QuantizedScale::new(1, 3)]);
    }

    #[test]
    fn test_clamp_and_shift_limits() {
        let (mut g, clamp, _, _) = unary(
            OpType::Clamp,
            DataType::Int8,
            [1, 4],
            Quantization::default(),
            Quantization::default(),
        );
        g.op_mut(clamp).attr = Attr::Clamp(ClampAttr { min: -5.0, max: 90.0 });
        apply(&mut g, "ConvertAttributes", convert_attributes, clamp);
        let q = &g.op(clamp).ofm().unwrap().quantization;
        assert_eq!((q.quant_min.clone(), q.quant_max.clone()), (vec![-5], vec![90]));

        let (mut g, shl, _, _, _) = binary(OpType::Shl, DataType::Int32, [1, 4]);
        apply(&mut g, "ConvertAttributes", convert_attributes, shl);
        let q = &g.op(shl).ofm().unwrap().quantization;
        assert_eq!(q.quant_min, vec![i64::MIN]);
        assert_eq!(q.quant_max, vec![i64::MAX]);
    }

    #[test]
    fn test_transpose_and_reverse_tags() {
        let (mut g, tr, _, _) = unary(
            OpType::Transpose,
            DataType::Int8,
            [1, 2, 3, 4],
            Quantization::default(),
            Quantization::default(),
        );
        g.op_mut(tr).attr = Attr::Transpose(TransposeAttr {
            perm: Shape::from([0, 2, 1, 3]),
        });
        apply(&mut g, "ConvertAttributes", convert_attributes, tr);
        assert_eq!(g.op(tr).ofm().unwrap().transpose, TransposeType::NWHC);

        let (mut g, rev, _, _) = unary(
            OpType::Reverse,
            DataType::Int8,
            [1, 2, 3, 4],
            Quantization::default(),
            Quantization::default(),
        );
        g.op_mut(rev).attr = Attr::Axis(AxisAttr { axis: -2 });
        apply(&mut g, "ConvertAttributes", convert_attributes, rev);
        assert_eq!(g.op(rev).ofm().unwrap().reverse, ReverseType::W);
    }

    #[test]
    #[should_panic(expected = "malformed transpose permutation")]
    fn test_malformed_permutation_panics() {
        let (mut g, tr, _, _) = unary(
            OpType::Transpose,
            DataType::Int8,
            [1, 2, 3, 4],
            Quantization::default(),
            Quantization::default(),
        );
        g.op_mut(tr).attr = Attr::Transpose(TransposeAttr {
            perm: Shape::from([0, 0, 1, 3]),
        });
        apply(&mut g, "ConvertAttributes", convert_attributes, tr);
    }

    #[test]
    fn test_resize_offsets_become_slice() {
        let (mut g, resize, _, _) = unary(
            OpType::Resize,
            DataType::Int8,
            [1, 8, 8, 3],
            Quantization::default(),
            Quantization::default(),
        );
        g.op_mut(resize).attr = Attr::Resize(ResizeAttr {
            scale_x: Fraction::new(2, 1),
            scale_y: Fraction::new(2, 1),
            offset: Point2::new(1, 5),
            border: Point2::default(),
            mode: ResizeMode::Nearest,
        });
        apply(&mut g, "ConvertResizeOffsets", convert_resize_offsets, resize);
        let ifm = g.op(resize).ifm().unwrap();
        assert_eq!(ifm.slice.offset, Shape::from([0, 2, 0, 0]));
        assert_eq!(ifm.slice.shape, Shape::from([1, 6, 8, 3]));
        let Attr::Resize(attr) = &g.op(resize).attr else {
            panic!("resize attribute lost");
        };
        assert_eq!(attr.offset, Point2::new(1, 1));
    }

    #[test]
    fn test_const_propagation_folds_shl() {
        let mut g = Graph::new("fold");
        let a = g.add_const("a", DataType::Int32, [1, 3], vec![1, 2, 3]);
        let b = g.add_scalar("b", DataType::Int32, 2);
        let out = g.add_tensor(Tensor::new("out", DataType::Int32, [1, 3]));
        let shl = g.add_op(OpType::Shl);
        g.connect_input(shl, TensorUsage::IFM, a);
        g.connect_input(shl, TensorUsage::IFM1, b);
        g.connect_output(shl, TensorUsage::OFM, out);
        g.add_output(out);
        apply(&mut g, "ConstPropagation", const_propagation, shl);
        assert!(!g.is_connected(shl));
        assert_eq!(g.tensor(out).values().unwrap(), &[4, 8, 12]);
    }

    #[test]
    fn test_const_propagation_skips_variable_input() {
        let (mut g, shl, _, _, _) = binary(OpType::Shl, DataType::Int32, [1, 4]);
        let (same, _) = apply(&mut g, "ConstPropagation", const_propagation, shl);
        assert_eq!(same, shl);
        assert!(g.is_connected(shl));
    }
}
