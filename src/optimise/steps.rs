//! The fixed step lists.
//!
//! Order matters: a step never sees operations created by later steps,
//! and rules only cascade within a step. Every step names the earlier
//! steps it relies on so `validate_step_order` can reject a reordering.

use super::rules::{
    activation, attributes, conv, decompose, fusion, mean, pad, reduce, reshape, tensors, tflite,
};
use super::{OpRule, Step, TensorRule};
use crate::config::Frontend;

macro_rules! op_rules {
    ($($name:literal => $f:path),* $(,)?) => {
        &[$(OpRule { name: $name, apply: $f }),*]
    };
}

// ─── GraphIR ───────────────────────────────────────────────────────

pub static GRAPHIR_TENSORS: Step = Step {
    name: "graphir.tensors",
    after: &[],
    tensor_rules: &[
        TensorRule {
            name: "ConvertInt48Tensors",
            apply: tensors::convert_int48_tensors,
        },
        TensorRule {
            name: "ConvertBool8Tensors",
            apply: tensors::convert_bool8_tensors,
        },
        TensorRule {
            name: "ConvertInt4Tensors",
            apply: tensors::convert_int4_tensors,
        },
    ],
    op_rules: &[],
};

pub static GRAPHIR_ATTRIBUTES: Step = Step {
    name: "graphir.attributes",
    after: &["graphir.tensors"],
    tensor_rules: &[],
    op_rules: op_rules![
        "ConvertAttributes" => attributes::convert_attributes,
        "ConvertResizeOffsets" => attributes::convert_resize_offsets,
    ],
};

pub static GRAPHIR_CONST_PROPAGATION: Step = Step {
    name: "graphir.const_propagation",
    after: &["graphir.attributes"],
    tensor_rules: &[],
    op_rules: op_rules!["ConstPropagation" => attributes::const_propagation],
};

pub static GRAPHIR_REMOVE_RESHAPE: Step = Step {
    name: "graphir.remove_reshape",
    after: &["graphir.tensors"],
    tensor_rules: &[],
    op_rules: op_rules!["RemoveReshape" => reshape::remove_reshape],
};

pub static GRAPHIR_DECOMPOSE: Step = Step {
    name: "graphir.decompose",
    // Rescale parameters and rounding are attributes until ConvertAttributes.
    after: &["graphir.attributes", "graphir.remove_reshape"],
    tensor_rules: &[],
    op_rules: op_rules![
        "RewriteFullyConnected" => conv::rewrite_fully_connected,
        "RewriteRescale" => decompose::rewrite_rescale,
        "RewritePad" => pad::rewrite_pad,
        "RewriteTable" => decompose::rewrite_table,
        "RewriteCast" => decompose::rewrite_cast,
        "RewriteConcat" => decompose::rewrite_concat,
        "RewriteSlice" => decompose::rewrite_slice,
        "RewriteNegate" => decompose::rewrite_negate,
        "RewriteSelect" => decompose::rewrite_select,
        "RewriteReduceMinMaxAnyAll" => reduce::rewrite_reduce_min_max_any_all,
        "RewriteReduceSum" => reduce::rewrite_reduce_sum,
        "RewriteTile" => decompose::rewrite_tile,
        "RewriteMatmul" => conv::rewrite_matmul,
        "RewriteDepthwise" => conv::rewrite_depthwise,
        "RewriteTransposeConvOfmPadding" => conv::rewrite_transpose_conv_ofm_padding,
        "ReshapeReverse" => decompose::reshape_reverse,
        "RewriteArgmax" => reduce::rewrite_argmax,
        "FixupPoolStrides" => conv::fixup_pool_strides,
        "UnrollConv" => conv::unroll_conv,
    ],
};

pub static GRAPHIR_FUSE_RESCALE: Step = Step {
    name: "graphir.fuse_rescale",
    // Fusion reads the OFM scales RewriteRescale moved out of the parameters.
    after: &["graphir.decompose"],
    tensor_rules: &[],
    op_rules: op_rules!["FuseRescale" => fusion::fuse_rescale],
};

pub static GRAPHIR_TRANSPOSE_ELEMENTWISE: Step = Step {
    name: "graphir.transpose_elementwise",
    after: &["graphir.fuse_rescale"],
    tensor_rules: &[],
    op_rules: op_rules![
        "RearrangeTranspose" => decompose::rearrange_transpose,
        "OptimiseElementwise" => decompose::optimise_elementwise,
    ],
};

pub static GRAPHIR_STEPS: [&Step; 7] = [
    &GRAPHIR_TENSORS,
    &GRAPHIR_ATTRIBUTES,
    &GRAPHIR_CONST_PROPAGATION,
    &GRAPHIR_REMOVE_RESHAPE,
    &GRAPHIR_DECOMPOSE,
    &GRAPHIR_FUSE_RESCALE,
    &GRAPHIR_TRANSPOSE_ELEMENTWISE,
];

// ─── TFLite ────────────────────────────────────────────────────────

pub static TFLITE_NORMALISE: Step = Step {
    name: "tflite.normalise",
    after: &[],
    tensor_rules: &[],
    op_rules: op_rules![
        "RewritePack" => tflite::rewrite_pack,
        "RewriteSplit" => tflite::rewrite_split,
        "ConvertReverse" => tflite::convert_reverse,
        "ConvertGather" => tflite::convert_gather,
        "ConvertScatter" => tflite::convert_scatter,
        "ConvertResize" => tflite::convert_resize,
        "ConvertTranspose" => tflite::convert_transpose,
        "ConvertReduceMinMaxAnyAll" => reduce::convert_reduce_min_max_any_all,
        "RewriteBatchMatMul" => conv::rewrite_batch_matmul,
        "RewriteSquaredDifference" => tflite::rewrite_squared_difference,
    ],
};

pub static TFLITE_REMOVE_RESHAPE: Step = Step {
    name: "tflite.remove_reshape",
    // Reduce and batch matmul lowering emit reshapes of their own.
    after: &["tflite.normalise"],
    tensor_rules: &[],
    op_rules: op_rules!["RemoveReshape" => reshape::remove_reshape_tflite],
};

pub static TFLITE_CHECK_RESHAPE: Step = Step {
    name: "tflite.check_reshape",
    after: &["tflite.remove_reshape"],
    tensor_rules: &[],
    op_rules: op_rules!["CheckReshapeOpsRemoved" => reshape::check_reshape_ops_removed],
};

pub static TFLITE_ACTIVATIONS: Step = Step {
    name: "tflite.activations",
    after: &["tflite.remove_reshape"],
    tensor_rules: &[],
    op_rules: op_rules![
        "ConvertTanhSigmoidToLut" => activation::convert_tanh_sigmoid_to_lut,
        "ConvertExpToLut" => activation::convert_exp_to_lut,
        "ConvertRsqrtToLut" => activation::convert_rsqrt_to_lut,
        "ConvertPrelu" => activation::convert_prelu,
        "ConvertLeakyRelu" => activation::convert_leaky_relu,
        "ConvertMeanOps" => mean::convert_mean_ops,
    ],
};

pub static TFLITE_PAD_ABSORB: Step = Step {
    name: "tflite.pad_absorb",
    after: &["tflite.remove_reshape"],
    tensor_rules: &[],
    op_rules: op_rules!["ReplacePadByExplicitPadding" => pad::replace_pad_by_explicit_padding],
};

pub static TFLITE_PAD: Step = Step {
    name: "tflite.pad",
    // Only pads no convolution absorbed are left to convert.
    after: &["tflite.pad_absorb"],
    tensor_rules: &[],
    op_rules: op_rules!["ConvertPad" => pad::convert_pad],
};

pub static TFLITE_BIAS: Step = Step {
    name: "tflite.bias",
    after: &["tflite.normalise"],
    tensor_rules: &[],
    op_rules: op_rules!["FixupBias" => conv::fixup_bias],
};

pub static TFLITE_STEPS: [&Step; 7] = [
    &TFLITE_NORMALISE,
    &TFLITE_REMOVE_RESHAPE,
    &TFLITE_CHECK_RESHAPE,
    &TFLITE_ACTIVATIONS,
    &TFLITE_PAD_ABSORB,
    &TFLITE_PAD,
    &TFLITE_BIAS,
];

/// Steps run for graphs produced by `frontend`.
pub fn pipeline(frontend: Frontend) -> Vec<&'static Step> {
    match frontend {
        Frontend::GraphIr => GRAPHIR_STEPS.to_vec(),
        Frontend::TfLite => TFLITE_STEPS.iter().chain(GRAPHIR_STEPS.iter()).copied().collect(),
    }
}

/// Every rule name, in pipeline order.
pub fn rule_names(frontend: Frontend) -> Vec<&'static str> {
    pipeline(frontend)
        .into_iter()
        .flat_map(|step| {
            step.tensor_rules
                .iter()
                .map(|r| r.name)
                .chain(step.op_rules.iter().map(|r| r.name))
        })
        .collect()
}
