//! Tensor rules: element type normalisation before any operator rule runs.

use crate::ir::{Buffer, DataType, Graph, OpType, TensorId, TensorUsage};
use crate::optimise::RewriteContext;

/// Variable 48-bit tensors are carried as 64-bit.
pub fn convert_int48_tensors(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, tensor: TensorId) -> TensorId {
    let t = graph.tensor_mut(tensor);
    if t.is_constant() {
        return tensor;
    }
    match t.dtype {
        DataType::Int48 => t.dtype = DataType::Int64,
        DataType::UInt48 => t.dtype = DataType::UInt64,
        _ => {}
    }
    tensor
}

/// Internally true is -1 and false is 0. Constants are rewritten in
/// place; graph inputs get a `NotEqual(x, 0)` after them and graph outputs
/// an `And(x, 1)` in front of them so the boundary keeps the 0/1 form.
pub fn convert_bool8_tensors(graph: &mut Graph, ctx: &mut RewriteContext<'_>, tensor: TensorId) -> TensorId {
    let t = graph.tensor(tensor);
    if t.dtype != DataType::Bool8 || t.storage_shape.is_empty() {
        return tensor;
    }
    let name = format!("{}_int8", t.name);

    if t.is_constant() {
        if let Some(buffer) = graph.tensor_mut(tensor).buffer.as_mut() {
            for v in buffer.values_mut() {
                *v = if *v == 0 { 0 } else { -1 };
            }
        }
        tensor
    } else if graph.is_input(tensor) {
        let internal = graph.clone_tensor(tensor, name);
        graph.replace_consumer_input(None, tensor, internal);
        let zero = graph.add_scalar("const_zero", DataType::Int8, 0);
        let op = graph.add_op(OpType::NotEqual);
        graph.connect_input(op, TensorUsage::IFM, tensor);
        graph.connect_input(op, TensorUsage::IFM1, zero);
        graph.connect_output(op, TensorUsage::OFM, internal);
        ctx.record_insertion(graph, tensor, op);
        tensor
    } else if graph.is_output(tensor) {
        let internal = graph.clone_tensor(tensor, name);
        graph.replace_producer_output(tensor, internal);
        let one = graph.add_scalar("const_one", DataType::Int8, 1);
        let op = graph.add_op(OpType::And);
        graph.connect_input(op, TensorUsage::IFM, internal);
        graph.connect_input(op, TensorUsage::IFM1, one);
        graph.connect_output(op, TensorUsage::OFM, tensor);
        ctx.record_insertion(graph, tensor, op);
        internal
    } else {
        tensor
    }
}

/// Unpack constant int4 tensors (two sign-extended nibbles per byte, low
/// nibble first) into Int8.
pub fn convert_int4_tensors(graph: &mut Graph, _ctx: &mut RewriteContext<'_>, tensor: TensorId) -> TensorId {
    let t = graph.tensor(tensor);
    if t.dtype != DataType::Int4Packed8 {
        return tensor;
    }
    let Some(packed) = t.values() else {
        return tensor;
    };
    let count = t.storage_shape.elements().max(0) as usize;
    let unpacked: Vec<i64> = (0..count)
        .map(|i| {
            let byte = packed.get(i / 2).copied().unwrap_or(0) as u8;
            let nibble = if i & 1 == 1 { byte >> 4 } else { byte & 0x0F };
            if nibble > 7 {
                nibble as i64 - 16
            } else {
                nibble as i64
            }
        })
        .collect();
    let t = graph.tensor_mut(tensor);
    t.dtype = DataType::Int8;
    t.buffer = Some(Buffer::new(unpacked));
    tensor
}
