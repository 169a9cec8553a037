//! Activation lowering.
//!
//! Nonlinear functions become table lookups generated from the operand
//! quantization. Leaky ReLU and PReLU become ReLU, Abs, a table, or a
//! short elementwise chain depending on alpha, bit width and what the
//! target can execute natively.

use log::warn;

use super::{dtype_of, input_conn, make_lut_op, name_of, output_conn, query_for, scratch_tensor};
use crate::ir::attr::LeakyReluAttr;
use crate::ir::{
    Attr, DataType, Graph, OpId, OpType, Quantization, QuantizationType, QuantizedScale, RoundMode,
    TensorConnection, TensorId, TensorUsage,
};
use crate::optimise::util::fixed_point::elementwise_mul_scale;
use crate::optimise::util::lut::{
    interpolating_lut16_from_fn, leaky_relu_lut8, lut8_from_fn, rsqrt_lut8, sigmoid_tanh_lut16,
};
use crate::optimise::RewriteContext;

// ─── Table Lookups ─────────────────────────────────────────────────

fn is_8_bit(dtype: DataType) -> bool {
    matches!(dtype, DataType::Int8 | DataType::UInt8)
}

fn sigmoid_clamped(x: f64) -> f64 {
    if x <= -8.0 {
        0.0
    } else if x >= 8.0 {
        1.0
    } else {
        1.0 / (1.0 + (-x).exp())
    }
}

/// Replace `op` by an 8-bit table of `f`. The table carries the rescale,
/// so the OFM is written with the IFM quantization.
fn convert_to_lut8<F>(graph: &mut Graph, op: OpId, name: &str, f: F) -> Option<OpId>
where
    F: Fn(f64) -> f64,
{
    let ifm = input_conn(graph, op, TensorUsage::IFM)?;
    let ofm = output_conn(graph, op, TensorUsage::OFM)?;
    let dtype = dtype_of(graph, &ifm);
    if !is_8_bit(dtype) || dtype != dtype_of(graph, &ofm) {
        return None;
    }
    let values = lut8_from_fn(dtype, &ifm.quantization, &ofm.quantization, f)?;
    let lut = graph.add_const(name, dtype, [values.len() as i32], values);
    let quant = ifm.quantization.clone();
    Some(make_lut_op(graph, &ifm, lut, &ofm, quant))
}

/// Replace `op` by a 512-entry interpolating Int16 table of `f`.
fn convert_to_lut16<F>(graph: &mut Graph, op: OpId, name: &str, f: F) -> Option<OpId>
where
    F: Fn(f32) -> f32,
{
    let ifm = input_conn(graph, op, TensorUsage::IFM)?;
    let ofm = output_conn(graph, op, TensorUsage::OFM)?;
    if dtype_of(graph, &ifm) != DataType::Int16 || dtype_of(graph, &ofm) != DataType::Int16 {
        return None;
    }
    let values = interpolating_lut16_from_fn(&ifm.quantization, &ofm.quantization, f);
    let lut = graph.add_const(name, DataType::Int32, [values.len() as i32], values);
    let quant = ifm.quantization.clone();
    Some(make_lut_op(graph, &ifm, lut, &ofm, quant))
}

fn finish(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId, replacement: Option<OpId>) -> OpId {
    match replacement {
        Some(new_op) => {
            ctx.record(graph, op, new_op);
            graph.disconnect(op);
            new_op
        }
        None => op,
    }
}

/// Sigmoid and Tanh become tables. Int16 keeps the operator and attaches
/// the native interpolating table when the target can run it as a lookup.
pub fn convert_tanh_sigmoid_to_lut(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    let op_type = graph.op_type(op);
    if !matches!(op_type, OpType::Sigmoid | OpType::Tanh) {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (input_conn(graph, op, TensorUsage::IFM), output_conn(graph, op, TensorUsage::OFM)) else {
        return op;
    };
    if dtype_of(graph, &ifm) == DataType::Int16 {
        let executable = query_for(graph, op, op_type).is_some_and(|mut query| {
            query.target_type = Some(OpType::Lut);
            ctx.constraints.can_execute(&query)
        });
        if executable && dtype_of(graph, &ofm) == DataType::Int16 {
            let values = sigmoid_tanh_lut16(op_type == OpType::Sigmoid);
            let lut = graph.add_const("LUT", DataType::Int32, [values.len() as i32], values);
            graph.connect_input(op, TensorUsage::Lut, lut);
        }
        return op;
    }
    let replacement = if op_type == OpType::Sigmoid {
        convert_to_lut8(graph, op, "sigmoid", sigmoid_clamped)
    } else {
        convert_to_lut8(graph, op, "tanh", f64::tanh)
    };
    finish(graph, ctx, op, replacement)
}

pub fn convert_exp_to_lut(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Exp {
        return op;
    }
    let Some(ifm) = input_conn(graph, op, TensorUsage::IFM) else {
        return op;
    };
    let replacement = match dtype_of(graph, &ifm) {
        dtype if is_8_bit(dtype) => convert_to_lut8(graph, op, "Exp", |x| (x as f32).exp() as f64),
        DataType::Int16 => convert_to_lut16(graph, op, "Exp16(interp)", f32::exp),
        _ => None,
    };
    finish(graph, ctx, op, replacement)
}

/// Int8 RSqrt uses the fixed reference table; Int16 an interpolating
/// table that saturates for non-positive inputs.
pub fn convert_rsqrt_to_lut(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Rsqrt {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (input_conn(graph, op, TensorUsage::IFM), output_conn(graph, op, TensorUsage::OFM)) else {
        return op;
    };
    let replacement = match (dtype_of(graph, &ifm), dtype_of(graph, &ofm)) {
        (DataType::Int8, DataType::Int8) => {
            let values = rsqrt_lut8(&ifm.quantization, &ofm.quantization);
            let lut = graph.add_const("rsqrt", DataType::Int8, [values.len() as i32], values);
            let quant = ifm.quantization.clone();
            Some(make_lut_op(graph, &ifm, lut, &ofm, quant))
        }
        (DataType::Int16, DataType::Int16) => {
            let ofm_scale = ofm.quantization.dequantized_scale() as f32;
            let saturated = DataType::Int16.integer_max() as f32 * ofm_scale;
            convert_to_lut16(graph, op, "Rsqrt16(interp)", move |x| {
                if x <= 0.0 {
                    saturated
                } else {
                    1.0 / x.sqrt()
                }
            })
        }
        _ => None,
    };
    finish(graph, ctx, op, replacement)
}

// ─── Elementwise Builders ──────────────────────────────────────────

/// `op_type(ifm[, ifm1]) -> ofm` with double rounding.
fn make_operation(
    graph: &mut Graph,
    op_type: OpType,
    ifm: &TensorConnection,
    ifm1: Option<&TensorConnection>,
    ofm: &TensorConnection,
) -> OpId {
    let op = graph.add_op(op_type);
    graph.op_mut(op).rounding = RoundMode::Dbl;
    graph.copy_input(op, TensorUsage::IFM, ifm);
    if let Some(ifm1) = ifm1 {
        graph.copy_input(op, TensorUsage::IFM1, ifm1);
    }
    graph.copy_output(op, TensorUsage::OFM, ofm);
    op
}

/// `Mul(ifm, constant)` into a fresh tensor named after the OFM with
/// `suffix`, shaped and quantized like `ofm`.
fn mul_with_const(
    graph: &mut Graph,
    suffix: &str,
    ifm: &TensorConnection,
    ofm: &TensorConnection,
    constant: TensorId,
    quant: Quantization,
) -> OpId {
    let name = format!("{}_{}", name_of(graph, ofm), suffix);
    let out = scratch_tensor(graph, ofm.tensor(), name);
    let op = graph.add_op(OpType::Mul);
    graph.op_mut(op).rounding = RoundMode::Dbl;
    graph.copy_input(op, TensorUsage::IFM, ifm);
    graph.connect_input(op, TensorUsage::IFM1, constant).set_quantization(quant);
    graph
        .connect_output(op, TensorUsage::OFM, out)
        .set_shape(ofm.shape.clone())
        .set_quantization(ofm.quantization.clone())
        .set_slice(ofm.slice.clone());
    op
}

fn ofm_conn_of(graph: &Graph, op: OpId) -> Option<TensorConnection> {
    output_conn(graph, op, TensorUsage::OFM)
}

/// `quant` with a single scale, zero-point and clamp range.
fn single_channel(quant: &Quantization, scale: QuantizedScale, max: i64) -> Quantization {
    let mut out = quant.clone();
    out.scales = vec![scale];
    out.zero_points = vec![0];
    out.quant_min = vec![0];
    out.quant_max = vec![max];
    out
}

/// ReLU of `ifm` into a copy of the OFM, clamped below at the OFM
/// zero-point.
fn relu_into(graph: &mut Graph, ifm: &TensorConnection, ofm: &TensorConnection, out: TensorId) -> OpId {
    let relu = graph.add_op(OpType::Relu);
    graph.op_mut(relu).rounding = RoundMode::Dbl;
    graph.copy_input(relu, TensorUsage::IFM, ifm);
    let mut quant = ofm.quantization.clone();
    quant.quant_min.push(ofm.quantization.zero_point());
    graph.connect_output(relu, TensorUsage::OFM, out).set_quantization(quant);
    relu
}

// ─── Leaky ReLU ────────────────────────────────────────────────────

fn leaky_relu_lut(graph: &mut Graph, op: OpId, ifm: &TensorConnection, ofm: &TensorConnection, alpha: f32) -> Option<OpId> {
    let dtype = dtype_of(graph, ifm);
    if dtype != dtype_of(graph, ofm) {
        return None;
    }
    let ifm_scale = ifm.quantization.dequantized_scale();
    let ofm_scale = ofm.quantization.dequantized_scale();
    let mut scalar = 1;
    let mut alpha_scale = elementwise_mul_scale(ifm_scale, alpha as f64, ofm_scale);

    if let Some(params) = input_conn(graph, op, TensorUsage::PARAMS) {
        // Alpha from a converted PReLU carries its own quantization.
        let Some(first) = graph.tensor(params.tensor()).values().and_then(|v| v.first().copied()) else {
            warn!("{} has a variable alpha tensor", graph.describe_op(op));
            return None;
        };
        let mut alpha_quant = QuantizedScale::from_f64(alpha as f64);
        if is_8_bit(dtype_of(graph, &params)) {
            scalar = first - params.quantization.zero_point();
            if let Some(scale) = params.quantization.scales.first() {
                alpha_quant = *scale;
            }
        }
        alpha_scale = elementwise_mul_scale(ifm_scale, alpha_quant.dequantize(), ofm_scale);
    }

    let values = leaky_relu_lut8(dtype, &ifm.quantization, &ofm.quantization, alpha_scale, scalar)?;
    let lut = graph.add_const("lrelu", dtype, [values.len() as i32], values);
    let quant = ifm.quantization.clone();
    Some(make_lut_op(graph, ifm, lut, ofm, quant))
}

/// Lower a 16-bit leaky ReLU to `Maximum(alpha * x, x)` when alpha lies in
/// `[0, 1]`, otherwise to `Relu(x) + alpha * Minimum(x, 0)`.
fn leaky_relu_16bit(
    graph: &mut Graph,
    ctx: &mut RewriteContext<'_>,
    op: OpId,
    ifm: &TensorConnection,
    ofm: &TensorConnection,
    alpha: f32,
) -> Option<OpId> {
    let ifm_type = dtype_of(graph, ifm);
    let mut scalar: i64 = 1;
    let mut alpha_scale = QuantizedScale::from_f64(alpha as f64);
    if alpha < 0.0 {
        // The sign moves to the scalar operand.
        scalar = -1;
        alpha_scale.scale = alpha_scale.scale.wrapping_neg();
    }
    let alpha_max = (alpha as f64 * ifm_type.integer_max() as f64) as i64;
    let mut alpha_quant = single_channel(&ifm.quantization, alpha_scale, alpha_max);

    if let Some(params) = input_conn(graph, op, TensorUsage::PARAMS) {
        let first = graph.tensor(params.tensor()).values().and_then(|v| v.first().copied());
        let (Some(first), DataType::Int16) = (first, dtype_of(graph, &params)) else {
            warn!("{} needs a constant Int16 alpha tensor", graph.describe_op(op));
            return None;
        };
        scalar = first - params.quantization.zero_point();
        alpha_quant = params.quantization.clone();
    }

    if (0.0..=1.0).contains(&alpha) {
        let alpha_const = graph.add_scalar("lrelu_alpha", DataType::Int16, scalar);
        let alpha_mul = mul_with_const(graph, "alpha", ifm, ofm, alpha_const, alpha_quant);
        ctx.record(graph, op, alpha_mul);

        let identity = if Quantization::scaling_valid_and_equal(&ifm.quantization, &ofm.quantization) {
            ifm.clone()
        } else {
            // Rescale the IFM with an identity multiply.
            let quant = single_channel(&ifm.quantization, QuantizedScale::unit(), ifm_type.integer_max());
            let one = graph.add_scalar("lrelu_ident", DataType::Int16, 1);
            let identity_mul = mul_with_const(graph, "identity", ifm, ofm, one, quant);
            ctx.record(graph, op, identity_mul);
            ofm_conn_of(graph, identity_mul)?
        };
        let scaled = ofm_conn_of(graph, alpha_mul)?;
        let max = make_operation(graph, OpType::Maximum, &scaled, Some(&identity), ofm);
        if let Some(conn) = graph.op_mut(max).input_mut(TensorUsage::IFM) {
            conn.quantization = ofm.quantization.clone();
        }
        ctx.record(graph, op, max);
        return Some(max);
    }

    let zero = graph.add_scalar("zero_const", ifm_type, 0);
    let negative = scratch_tensor(graph, ifm.tensor(), format!("{}_negative", name_of(graph, ifm)));
    let min = graph.add_op(OpType::Minimum);
    graph.op_mut(min).rounding = RoundMode::Dbl;
    graph.copy_input(min, TensorUsage::IFM, ifm);
    graph
        .connect_input(min, TensorUsage::IFM1, zero)
        .set_quantization(ifm.quantization.clone());
    graph
        .connect_output(min, TensorUsage::OFM, negative)
        .set_quantization(ifm.quantization.clone());
    ctx.record(graph, op, min);

    let alpha_const = graph.add_scalar("lrelu_alpha", DataType::Int16, scalar);
    let min_ofm = ofm_conn_of(graph, min)?;
    let alpha_mul = mul_with_const(graph, "alpha", &min_ofm, ofm, alpha_const, alpha_quant);
    ctx.record(graph, op, alpha_mul);

    let positive = scratch_tensor(graph, ofm.tensor(), format!("{}_positive", name_of(graph, ofm)));
    let relu = relu_into(graph, ifm, ofm, positive);
    ctx.record(graph, op, relu);

    let (relu_ofm, mul_ofm) = (ofm_conn_of(graph, relu)?, ofm_conn_of(graph, alpha_mul)?);
    let add = graph.add_op(OpType::Add);
    graph.copy_input(add, TensorUsage::IFM, &relu_ofm);
    graph.copy_input(add, TensorUsage::IFM1, &mul_ofm);
    graph.copy_output(add, TensorUsage::OFM, ofm);
    ctx.record(graph, op, add);
    Some(add)
}

pub fn convert_leaky_relu(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::LeakyRelu {
        return op;
    }
    let (Some(ifm), Some(ofm)) = (input_conn(graph, op, TensorUsage::IFM), output_conn(graph, op, TensorUsage::OFM)) else {
        return op;
    };
    let Attr::LeakyRelu(LeakyReluAttr { alpha }) = graph.op(op).attr else {
        return op;
    };
    let from_prelu = graph.op(op).input(TensorUsage::PARAMS).is_some();
    let ifm_type = dtype_of(graph, &ifm);

    let replacement = if alpha == 0.0 || (1.0 / alpha).is_infinite() {
        let relu = make_operation(graph, OpType::Relu, &ifm, None, &ofm);
        if let Some(conn) = graph.op_mut(relu).output_mut(TensorUsage::OFM) {
            conn.quantization.quant_min.push(ofm.quantization.zero_point());
        }
        ctx.record(graph, op, relu);
        Some(relu)
    } else if alpha == -1.0 {
        let abs = make_operation(graph, OpType::Abs, &ifm, None, &ofm);
        ctx.record(graph, op, abs);
        Some(abs)
    } else if is_8_bit(ifm_type) {
        let lut = leaky_relu_lut(graph, op, &ifm, &ofm, alpha);
        if let Some(lut) = lut {
            ctx.record(graph, op, lut);
        }
        lut
    } else {
        let native = query_for(graph, op, OpType::LeakyRelu).is_some_and(|mut query| {
            query.quant_scaling_invalid_or_unequal =
                !Quantization::scaling_valid_and_equal(&ifm.quantization, &ofm.quantization);
            ctx.constraints.can_execute(&query)
        });
        if alpha < 0.0 || from_prelu || !native {
            leaky_relu_16bit(graph, ctx, op, &ifm, &ofm, alpha)
        } else {
            None
        }
    };

    match replacement {
        Some(new_op) => {
            graph.disconnect(op);
            new_op
        }
        None => op,
    }
}

// ─── PReLU ─────────────────────────────────────────────────────────

/// Smallest and largest constant alpha, dequantized.
fn alpha_range(graph: &Graph, params: &TensorConnection) -> Option<(f32, f32)> {
    if !matches!(dtype_of(graph, params), DataType::Int8 | DataType::UInt8 | DataType::Int16) {
        return None;
    }
    let values = graph.tensor(params.tensor()).values()?;
    let min = *values.iter().min()?;
    let max = *values.iter().max()?;
    let zp = params.quantization.zero_point();
    let scale = params.quantization.dequantized_scale() as f32;
    Some(((min - zp) as f32 * scale, (max - zp) as f32 * scale))
}

/// PReLU with a single alpha value becomes a leaky ReLU; with every alpha
/// at most one a `Maximum(alpha * x, x)`; otherwise the generic
/// `Relu(x) + alpha * Minimum(x, 0)` chain.
pub fn convert_prelu(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Prelu {
        return op;
    }
    let (Some(ifm), Some(params), Some(ofm)) = (
        input_conn(graph, op, TensorUsage::IFM),
        input_conn(graph, op, TensorUsage::PARAMS),
        output_conn(graph, op, TensorUsage::OFM),
    ) else {
        return op;
    };

    if let Some((alpha_min, alpha_max)) = alpha_range(graph, &params) {
        if alpha_min == alpha_max {
            let leaky = graph.add_op_with(OpType::LeakyRelu, Attr::LeakyRelu(LeakyReluAttr { alpha: alpha_min }));
            graph.copy_input(leaky, TensorUsage::IFM, &ifm);
            graph.copy_input(leaky, TensorUsage::PARAMS, &params);
            graph.copy_output(leaky, TensorUsage::OFM, &ofm);
            let result = convert_leaky_relu(graph, ctx, leaky);
            ctx.record(graph, op, result);
            graph.disconnect(op);
            return result;
        }
        if alpha_max <= 1.0 {
            return prelu_as_maximum(graph, ctx, op, &ifm, &params, &ofm);
        }
    }
    prelu_generic(graph, ctx, op, &ifm, &params, &ofm)
}

fn prelu_as_maximum(
    graph: &mut Graph,
    ctx: &mut RewriteContext<'_>,
    op: OpId,
    ifm: &TensorConnection,
    params: &TensorConnection,
    ofm: &TensorConnection,
) -> OpId {
    let alpha_out = scratch_tensor(graph, ofm.tensor(), format!("{}_alpha", name_of(graph, ofm)));
    let alpha_mul = graph.add_op(OpType::Mul);
    graph.op_mut(alpha_mul).rounding = RoundMode::Dbl;
    graph.copy_input(alpha_mul, TensorUsage::IFM, ifm);
    let params_shape = graph.tensor(params.tensor()).storage_shape.clone();
    graph.copy_input(alpha_mul, TensorUsage::IFM1, params).set_shape(params_shape);
    graph
        .connect_output(alpha_mul, TensorUsage::OFM, alpha_out)
        .set_shape(ofm.shape.clone())
        .set_quantization(ofm.quantization.clone())
        .set_slice(ofm.slice.clone());
    ctx.record(graph, op, alpha_mul);

    let identity = if ifm.quantization != ofm.quantization {
        let one_type = if dtype_of(graph, ifm) == DataType::Int16 {
            DataType::Int16
        } else {
            DataType::Int8
        };
        let one = graph.add_scalar("one_const", one_type, 1);
        let identity_mul = mul_with_const(graph, "rescaled", ifm, ofm, one, Quantization::unit());
        ctx.record(graph, op, identity_mul);
        match ofm_conn_of(graph, identity_mul) {
            Some(conn) => conn,
            None => return op,
        }
    } else {
        ifm.clone()
    };
    let Some(scaled) = ofm_conn_of(graph, alpha_mul) else {
        return op;
    };
    let max = make_operation(graph, OpType::Maximum, &scaled, Some(&identity), ofm);
    ctx.record(graph, op, max);
    graph.disconnect(op);
    max
}

fn prelu_generic(
    graph: &mut Graph,
    ctx: &mut RewriteContext<'_>,
    op: OpId,
    ifm: &TensorConnection,
    params: &TensorConnection,
    ofm: &TensorConnection,
) -> OpId {
    let no_scale = Quantization {
        kind: QuantizationType::Explicit,
        ..Quantization::default()
    };
    let mut unit_ofm_zp = Quantization::unit();
    unit_ofm_zp.zero_points = vec![ofm.quantization.zero_point()];

    let zero = graph.add_scalar("zero_const", dtype_of(graph, ifm), 0);
    let negative = scratch_tensor(graph, ifm.tensor(), format!("{}_negative", name_of(graph, ifm)));
    let alpha_out = scratch_tensor(graph, ofm.tensor(), format!("{}_alpha", name_of(graph, ofm)));
    let positive = scratch_tensor(graph, ofm.tensor(), format!("{}_positive", name_of(graph, ofm)));

    let min = graph.add_op(OpType::Minimum);
    graph.op_mut(min).rounding = RoundMode::Dbl;
    graph.copy_input(min, TensorUsage::IFM, ifm);
    graph.connect_input(min, TensorUsage::IFM1, zero).set_quantization(no_scale);
    graph
        .connect_output(min, TensorUsage::OFM, negative)
        .set_quantization(ifm.quantization.clone());
    ctx.record(graph, op, min);

    let Some(min_ofm) = ofm_conn_of(graph, min) else {
        return op;
    };
    let alpha_mul = graph.add_op(OpType::Mul);
    graph.op_mut(alpha_mul).rounding = RoundMode::Dbl;
    graph.copy_input(alpha_mul, TensorUsage::IFM, &min_ofm);
    graph.copy_input(alpha_mul, TensorUsage::IFM1, params);
    graph
        .connect_output(alpha_mul, TensorUsage::OFM, alpha_out)
        .set_quantization(ofm.quantization.clone());
    ctx.record(graph, op, alpha_mul);

    let relu = relu_into(graph, ifm, ofm, positive);
    ctx.record(graph, op, relu);

    let add = graph.add_op(OpType::Add);
    graph.op_mut(add).rounding = RoundMode::Dbl;
    graph
        .connect_input(add, TensorUsage::IFM, alpha_out)
        .set_quantization(unit_ofm_zp.clone());
    graph
        .connect_input(add, TensorUsage::IFM1, positive)
        .set_quantization(unit_ofm_zp.clone());
    graph
        .copy_output(add, TensorUsage::OFM, ofm)
        .set_quantization(unit_ofm_zp);
    ctx.record(graph, op, add);
    graph.disconnect(op);
    add
}
