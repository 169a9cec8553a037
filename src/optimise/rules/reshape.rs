//! Removal of reshape-like operators.
//!
//! Shape changes are carried by connection shapes, so a reshape is only
//! a rename: one of its two tensors is dropped and its readers or writers
//! move to the other. Graph boundary tensors are never the one dropped.

use super::input_conn;
use crate::ir::{Graph, OpId, TensorUsage};
use crate::optimise::RewriteContext;

/// Splice out a reshape-like operator, also folding the OFM storage shape
/// and axis order into the surviving IFM tensor.
pub fn remove_reshape(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    splice_reshape(graph, ctx, op, true)
}

/// Frontend variant: a copy is only needed when both sides are graph
/// boundary tensors, and the IFM tensor keeps its own storage shape.
pub fn remove_reshape_tflite(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    splice_reshape(graph, ctx, op, false)
}

fn splice_reshape(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId, reshape_ifm: bool) -> OpId {
    if !graph.op_type(op).is_reshape_like() {
        return op;
    }
    let Some(ifm_conn) = input_conn(graph, op, TensorUsage::IFM) else {
        return op;
    };
    let Some(ofm) = graph.output_tensor(op, TensorUsage::OFM) else {
        return op;
    };
    let mut ifm = ifm_conn.tensor();

    let ifm_is_input = graph.is_input(ifm);
    let ifm_is_output = graph.is_output(ifm);
    let ofm_is_output = graph.is_output(ofm);

    let boundary_copy = (ifm_is_input || ifm_is_output) && ofm_is_output;
    let shared_reinterpretation = reshape_ifm && {
        let (i, o) = (graph.tensor(ifm), graph.tensor(ofm));
        i.readers().len() > 1 && (i.storage_shape != o.storage_shape || i.axis_order != o.axis_order)
    };

    let mut result = op;
    if boundary_copy || shared_reinterpretation {
        let copy = graph.insert_copy_after_tensor(ifm, &ifm_conn.quantization);
        ctx.record(graph, op, copy);
        result = copy;
        // The reshape now reads the copy.
        if let Some(t) = graph.input_tensor(op, TensorUsage::IFM) {
            ifm = t;
        }
    }

    if ofm_is_output {
        graph.replace_producer_output(ifm, ofm);
        graph.replace_consumer_input(Some(op), ifm, ofm);
    } else {
        graph.replace_consumer_input(None, ofm, ifm);
        if reshape_ifm {
            let (shape, order) = {
                let o = graph.tensor(ofm);
                (o.storage_shape.clone(), o.axis_order)
            };
            let t = graph.tensor_mut(ifm);
            t.axis_order = order;
            t.storage_shape = shape;
        }
    }
    graph.disconnect(op);
    result
}

/// Every reshape-like operator must be gone by the time this runs.
pub fn check_reshape_ops_removed(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let op_type = graph.op_type(op);
    assert!(
        !op_type.is_reshape_like(),
        "reshape-like operation {} expected to have been removed, still remains",
        op_type
    );
    op
}
