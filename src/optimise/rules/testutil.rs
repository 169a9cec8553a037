//! Small graph builders shared by the rule tests.

use crate::arch::create_constraints;
use crate::config::OptimiserOptions;
use crate::ir::{
    DataType, Graph, OpId, OpType, Quantization, QuantizedScale, Shape, Tensor, TensorId,
    TensorUsage,
};
use crate::optimise::{OpRewrite, OptimisationLog, RewriteContext, TensorRewrite};

pub(crate) fn quant(scale: f64, zero_point: i64) -> Quantization {
    Quantization {
        scales: vec![QuantizedScale::from_f64(scale)],
        zero_points: vec![zero_point],
        ..Quantization::default()
    }
}

/// Apply one op rule on `target`, returning the continuation op and the
/// records it produced.
pub(crate) fn apply_on(
    graph: &mut Graph,
    target: &str,
    name: &'static str,
    rule: OpRewrite,
    op: OpId,
) -> (OpId, OptimisationLog) {
    let _ = env_logger::builder().is_test(true).try_init();
    let constraints = create_constraints(target);
    let options = OptimiserOptions {
        target: target.to_string(),
        ..OptimiserOptions::default()
    };
    let mut log = OptimisationLog::new();
    let result = {
        let mut ctx = RewriteContext::new(constraints.as_ref(), &options, &mut log);
        ctx.rule = name;
        rule(graph, &mut ctx, op)
    };
    graph.check_consistency().unwrap();
    (result, log)
}

pub(crate) fn apply(graph: &mut Graph, name: &'static str, rule: OpRewrite, op: OpId) -> (OpId, OptimisationLog) {
    apply_on(graph, "ethos-u55", name, rule, op)
}

pub(crate) fn apply_tensor(
    graph: &mut Graph,
    name: &'static str,
    rule: TensorRewrite,
    tensor: TensorId,
) -> (TensorId, OptimisationLog) {
    let constraints = create_constraints("ethos-u55");
    let options = OptimiserOptions::default();
    let mut log = OptimisationLog::new();
    let result = {
        let mut ctx = RewriteContext::new(constraints.as_ref(), &options, &mut log);
        ctx.rule = name;
        rule(graph, &mut ctx, tensor)
    };
    graph.check_consistency().unwrap();
    (result, log)
}

/// `ifm -> op -> ofm` with both sides quantized as given.
pub(crate) fn unary(
    op_type: OpType,
    dtype: DataType,
    shape: impl Into<Shape>,
    ifm_q: Quantization,
    ofm_q: Quantization,
) -> (Graph, OpId, TensorId, TensorId) {
    let shape = shape.into();
    let mut g = Graph::new(format!("{}", op_type));
    let ifm = g.add_tensor(Tensor::new("ifm", dtype, shape.clone()));
    let ofm = g.add_tensor(Tensor::new("ofm", dtype, shape));
    let op = g.add_op(op_type);
    g.connect_input(op, TensorUsage::IFM, ifm).set_quantization(ifm_q);
    g.connect_output(op, TensorUsage::OFM, ofm).set_quantization(ofm_q);
    g.add_input(ifm);
    g.add_output(ofm);
    (g, op, ifm, ofm)
}

/// `(a, b) -> op -> ofm`, all unit-quantized.
pub(crate) fn binary(
    op_type: OpType,
    dtype: DataType,
    shape: impl Into<Shape>,
) -> (Graph, OpId, TensorId, TensorId, TensorId) {
    let shape = shape.into();
    let mut g = Graph::new(format!("{}", op_type));
    let a = g.add_tensor(Tensor::new("a", dtype, shape.clone()));
    let b = g.add_tensor(Tensor::new("b", dtype, shape.clone()));
    let ofm = g.add_tensor(Tensor::new("ofm", dtype, shape));
    let op = g.add_op(op_type);
    g.connect_input(op, TensorUsage::IFM, a);
    g.connect_input(op, TensorUsage::IFM1, b);
    g.connect_output(op, TensorUsage::OFM, ofm);
    g.add_input(a);
    g.add_input(b);
    g.add_output(ofm);
    (g, op, a, b, ofm)
}

/// Live operations of the graph as their kinds, in creation order.
pub(crate) fn live_types(graph: &Graph) -> Vec<OpType> {
    graph.live_ops().map(|op| graph.op_type(op)).collect()
}
