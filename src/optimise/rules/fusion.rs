//! Rescale fusion.
//!
//! A standalone Rescale is folded into the input scaling of its single
//! consumer, or failing that into the output scaling of its producer,
//! when the target can apply the scale inside that operation.

use log::trace;

use super::{dtype_of, input_conn, output_conn};
use crate::ir::{Attr, Graph, OpId, OpType, Quantization, TensorConnection, TensorUsage};
use crate::optimise::RewriteContext;

/// Zero-points that are absent or all zero.
fn zero_points_unit(quant: &Quantization) -> bool {
    quant.zero_points.iter().all(|&z| z == 0)
}

/// IFM-side quantization carrying the rescale factors: the IFM zero-point
/// with the OFM scales, exact power-of-two shifts folded away.
fn fused_ifm_quant(ifm: &TensorConnection, ofm: &TensorConnection) -> Quantization {
    let mut quant = ifm.quantization.clone();
    quant.kind = ofm.quantization.kind;
    quant.scales = ofm.quantization.scales.iter().map(|s| s.reduced()).collect();
    quant
}

/// Whether `op` is a Rescale that could itself fuse into the input at
/// `usage` of a consumer of type `consumer`.
fn fusable_rescale(graph: &Graph, ctx: &RewriteContext<'_>, op: OpId, consumer: OpType, usage: TensorUsage) -> bool {
    if graph.op_type(op) != OpType::Rescale {
        return false;
    }
    let (Some(ifm), Some(ofm)) = (input_conn(graph, op, TensorUsage::IFM), output_conn(graph, op, TensorUsage::OFM)) else {
        return false;
    };
    let quant = fused_ifm_quant(&ifm, &ofm);
    zero_points_unit(&ofm.quantization)
        && ctx
            .constraints
            .supports_fused_rescale(consumer, usage, dtype_of(graph, &ifm), dtype_of(graph, &ofm), &quant)
}

/// Fold the rescale into the reading input of its only consumer.
fn fuse_into_consumer(
    graph: &mut Graph,
    ctx: &RewriteContext<'_>,
    ifm: &TensorConnection,
    ofm: &TensorConnection,
) -> Option<OpId> {
    let ofm_tensor = graph.tensor(ofm.tensor());
    let [consumer] = ofm_tensor.readers() else {
        return None;
    };
    let consumer = *consumer;
    if !zero_points_unit(&ofm.quantization) {
        return None;
    }
    let ifm_quant = fused_ifm_quant(ifm, ofm);
    let consumer_type = graph.op_type(consumer);
    let from = dtype_of(graph, ifm);
    let to = dtype_of(graph, ofm);

    let usages: Vec<TensorUsage> = graph
        .op(consumer)
        .inputs()
        .filter(|(_, conn)| conn.tensor() == ofm.tensor())
        .map(|(usage, _)| usage)
        .collect();
    // Every read of the rescale output must fuse, or the tensor would be
    // left without a writer.
    for &usage in &usages {
        let conn = input_conn(graph, consumer, usage)?;
        if !conn.quantization.is_unit_scale()
            || !ctx
                .constraints
                .supports_fused_rescale(consumer_type, usage, from, to, &ifm_quant)
        {
            return None;
        }
        if consumer_type.is_binary_elementwise() {
            // Both operands of a binary op must enter with one type.
            let other_usage = if usage == TensorUsage::IFM {
                TensorUsage::IFM1
            } else {
                TensorUsage::IFM
            };
            let other = input_conn(graph, consumer, other_usage)?;
            let mut same_type = dtype_of(graph, &other) == from;
            if let Some(producer) = graph.tensor(other.tensor()).sole_writer() {
                if fusable_rescale(graph, ctx, producer, consumer_type, other_usage) {
                    if let Some(producer_ifm) = input_conn(graph, producer, TensorUsage::IFM) {
                        same_type |= dtype_of(graph, &producer_ifm) == from;
                    }
                }
            }
            if !same_type {
                return None;
            }
        }
    }
    if usages.is_empty() {
        return None;
    }
    for usage in usages {
        graph
            .copy_input(consumer, usage, ifm)
            .set_quantization(ifm_quant.clone());
    }
    Some(consumer)
}

/// Fold the rescale into the output of its only producer.
fn fuse_into_producer(
    graph: &mut Graph,
    ctx: &RewriteContext<'_>,
    op: OpId,
    ifm: &TensorConnection,
    ofm: &TensorConnection,
) -> Option<OpId> {
    let producer = graph.tensor(ifm.tensor()).sole_writer()?;
    let producer_ofm = output_conn(graph, producer, TensorUsage::OFM)?;
    if !producer_ofm.quantization.is_unit_scale() || !zero_points_unit(&ifm.quantization) {
        return None;
    }
    // The rescale input is the producer's output; fusing must not hide a
    // graph output or a tensor other operations read.
    if graph.tensor(ifm.tensor()).readers().len() != 1 {
        return None;
    }
    let producer_ifm_type = input_conn(graph, producer, TensorUsage::IFM)
        .map(|conn| dtype_of(graph, &conn))
        .unwrap_or_else(|| dtype_of(graph, &producer_ofm));
    let producer_type = graph.op_type(producer);
    if !ctx.constraints.supports_fused_rescale(
        producer_type,
        TensorUsage::OFM,
        producer_ifm_type,
        dtype_of(graph, ofm),
        &ofm.quantization,
    ) {
        return None;
    }
    let rounding = graph.op(op).rounding;
    graph.copy_output(producer, TensorUsage::OFM, ofm);
    graph.op_mut(producer).rounding = rounding;
    Some(producer)
}

pub fn fuse_rescale(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Rescale {
        return op;
    }
    if let Attr::Rescale(attr) = &graph.op(op).attr {
        if attr.input_unsigned || attr.output_unsigned {
            return op;
        }
    }
    let (Some(ifm), Some(ofm)) = (input_conn(graph, op, TensorUsage::IFM), output_conn(graph, op, TensorUsage::OFM)) else {
        return op;
    };
    if graph.is_output(ifm.tensor()) {
        return op;
    }

    // A graph output must keep its writer, so only the producer side can
    // absorb a rescale that writes one.
    let into_consumer = if graph.is_output(ofm.tensor()) {
        None
    } else {
        fuse_into_consumer(graph, ctx, &ifm, &ofm)
    };
    let fused = match into_consumer {
        Some(consumer) => Some(consumer),
        None => fuse_into_producer(graph, ctx, op, &ifm, &ofm),
    };
    let Some(result) = fused else {
        trace!("rescale {} kept", graph.describe_op(op));
        return op;
    };
    ctx.record(graph, op, result);
    graph.disconnect(op);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::attr::RescaleAttr;
    use crate::ir::{DataType, QuantizedScale, Tensor};
    use crate::optimise::rules::testutil::{apply, live_types};

    fn rescale_attr(unsigned: bool) -> Attr {
        Attr::Rescale(RescaleAttr {
            scale32: true,
            double_round: false,
            per_channel: false,
            input_unsigned: unsigned,
            output_unsigned: false,
        })
    }

    /// `x:int8 -> Rescale -> r:int16 -> Add(r, b:int16) -> y:int16`.
    fn rescale_into_add(scale: QuantizedScale, b_type: DataType, unsigned: bool) -> (Graph, OpId, OpId) {
        let mut g = Graph::new("fuse");
        let x = g.add_tensor(Tensor::new("x", DataType::Int8, [1, 4, 4, 8]));
        let r = g.add_tensor(Tensor::new("r", DataType::Int16, [1, 4, 4, 8]));
        let b = g.add_tensor(Tensor::new("b", b_type, [1, 4, 4, 8]));
        let y = g.add_tensor(Tensor::new("y", DataType::Int16, [1, 4, 4, 8]));
        let rescale = g.add_op_with(OpType::Rescale, rescale_attr(unsigned));
        g.connect_input(rescale, TensorUsage::IFM, x)
            .set_quantization(Quantization::with_scale(QuantizedScale::unit(), 0));
        g.connect_output(rescale, TensorUsage::OFM, r)
            .set_quantization(Quantization::with_scale(scale, 0));
        let add = g.add_op(OpType::Add);
        g.connect_input(add, TensorUsage::IFM, r);
        g.connect_input(add, TensorUsage::IFM1, b);
        g.connect_output(add, TensorUsage::OFM, y);
        g.add_input(x);
        g.add_input(b);
        g.add_output(y);
        (g, rescale, add)
    }

    #[test]
    fn test_rescale_fused_into_add_input() {
        let (mut g, rescale, add) = rescale_into_add(QuantizedScale::new(16384, 14), DataType::Int8, false);
        let (result, log) = apply(&mut g, "FuseRescale", fuse_rescale, rescale);
        assert_eq!(result, add);
        assert_eq!(log.len(), 1);
        assert_eq!(live_types(&g), vec![OpType::Add]);

        let ifm = g.op(add).ifm().unwrap();
        assert_eq!(g.tensor(ifm.tensor()).name, "x");
        assert_eq!(ifm.quantization.scales, vec![QuantizedScale::unit()]);
        assert_eq!(ifm.quantization.zero_points, vec![0]);
    }

    #[test]
    fn test_mixed_operand_types_keep_rescale() {
        let (mut g, rescale, _) = rescale_into_add(QuantizedScale::new(16384, 14), DataType::Int16, false);
        let (result, log) = apply(&mut g, "FuseRescale", fuse_rescale, rescale);
        assert_eq!(result, rescale);
        assert!(log.is_empty());
        assert_eq!(live_types(&g), vec![OpType::Rescale, OpType::Add]);
    }

    #[test]
    fn test_unsigned_rescale_untouched() {
        let (mut g, rescale, _) = rescale_into_add(QuantizedScale::new(16384, 14), DataType::Int8, true);
        let before = g.clone();
        apply(&mut g, "FuseRescale", fuse_rescale, rescale);
        assert_eq!(g, before);
    }

    #[test]
    fn test_rescale_fused_into_producer_output() {
        // x -> MaxPool -> p -> Rescale -> y, where y is a graph output.
        let mut g = Graph::new("producer");
        let x = g.add_tensor(Tensor::new("x", DataType::Int8, [1, 4, 4, 8]));
        let p = g.add_tensor(Tensor::new("p", DataType::Int8, [1, 4, 4, 8]));
        let y = g.add_tensor(Tensor::new("y", DataType::Int8, [1, 4, 4, 8]));
        let pool = g.add_op(OpType::MaxPool);
        g.connect_input(pool, TensorUsage::IFM, x);
        g.connect_output(pool, TensorUsage::OFM, p)
            .set_quantization(Quantization::unit());
        let rescale = g.add_op_with(OpType::Rescale, rescale_attr(false));
        g.op_mut(rescale).rounding = crate::ir::RoundMode::Natural;
        g.connect_input(rescale, TensorUsage::IFM, p)
            .set_quantization(Quantization::unit());
        g.connect_output(rescale, TensorUsage::OFM, y)
            .set_quantization(Quantization::with_scale(QuantizedScale::new(3, 2), 0));
        g.add_input(x);
        g.add_output(y);

        let (result, log) = apply(&mut g, "FuseRescale", fuse_rescale, rescale);
        assert_eq!(result, pool);
        assert_eq!(log.len(), 1);
        assert_eq!(live_types(&g), vec![OpType::MaxPool]);
        let ofm = g.op(pool).ofm().unwrap();
        assert_eq!(ofm.tensor(), y);
        assert_eq!(ofm.quantization.scales, vec![QuantizedScale::new(3, 2)]);
        assert_eq!(g.op(pool).rounding, crate::ir::RoundMode::Natural);
    }

    #[test]
    fn test_rescale_of_graph_output_kept() {
        let (mut g, rescale, _) = rescale_into_add(QuantizedScale::new(16384, 14), DataType::Int8, false);
        let x = g.find_tensor("x").unwrap();
        g.add_output(x);
        let before = g.clone();
        apply(&mut g, "FuseRescale", fuse_rescale, rescale);
        assert_eq!(g, before);
    }

    #[test]
    fn test_rescale_writing_graph_output_not_fused_into_consumer() {
        let (mut g, rescale, add) = rescale_into_add(QuantizedScale::new(16384, 14), DataType::Int8, false);
        let r = g.find_tensor("r").unwrap();
        g.add_output(r);
        let before = g.clone();
        let (result, log) = apply(&mut g, "FuseRescale", fuse_rescale, rescale);
        assert_eq!(result, rescale);
        assert!(log.is_empty());
        assert_eq!(g, before);
        assert_eq!(g.tensor(r).sole_writer(), Some(rescale));
        assert_eq!(g.tensor(r).readers(), &[add]);
    }

    #[test]
    fn test_consumer_reading_twice_needs_every_read_fusable() {
        // x -> Rescale -> r -> Add(r, r) -> y, the second read carrying its
        // own scale.
        let mut g = Graph::new("twice");
        let x = g.add_tensor(Tensor::new("x", DataType::Int8, [1, 4, 4, 8]));
        let r = g.add_tensor(Tensor::new("r", DataType::Int16, [1, 4, 4, 8]));
        let y = g.add_tensor(Tensor::new("y", DataType::Int16, [1, 4, 4, 8]));
        let rescale = g.add_op_with(OpType::Rescale, rescale_attr(false));
        g.connect_input(rescale, TensorUsage::IFM, x)
            .set_quantization(Quantization::with_scale(QuantizedScale::unit(), 0));
        g.connect_output(rescale, TensorUsage::OFM, r)
            .set_quantization(Quantization::with_scale(QuantizedScale::new(16384, 14), 0));
        let add = g.add_op(OpType::Add);
        g.connect_input(add, TensorUsage::IFM, r);
        g.connect_input(add, TensorUsage::IFM1, r)
            .set_quantization(Quantization::with_scale(QuantizedScale::new(3, 2), 0));
        g.connect_output(add, TensorUsage::OFM, y);
        g.add_input(x);
        g.add_output(y);

        let before = g.clone();
        let (result, log) = apply(&mut g, "FuseRescale", fuse_rescale, rescale);
        assert_eq!(result, rescale);
        assert!(log.is_empty());
        assert_eq!(g, before);
        assert_eq!(g.tensor(r).sole_writer(), Some(rescale));
    }
}
