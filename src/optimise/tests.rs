use super::*;
use crate::config::Frontend;
use crate::ir::attr::LeakyReluAttr;
use crate::ir::{Attr, DataType, OpType, Tensor, TensorUsage};
use crate::optimise::rules::replace_op;
use crate::arch::KNOWN_TARGETS;
use crate::optimise::rules::testutil::{apply_on, apply_tensor, live_types, quant, unary};

fn abs_to_relu(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Abs {
        return op;
    }
    let relu = replace_op(graph, op, OpType::Relu);
    ctx.record(graph, op, relu);
    graph.disconnect(op);
    relu
}

fn relu_to_tanh(graph: &mut Graph, ctx: &mut RewriteContext<'_>, op: OpId) -> OpId {
    if graph.op_type(op) != OpType::Relu {
        return op;
    }
    let tanh = replace_op(graph, op, OpType::Tanh);
    ctx.record(graph, op, tanh);
    graph.disconnect(op);
    tanh
}

static CHAINED: Step = Step {
    name: "test.chained",
    after: &[],
    tensor_rules: &[],
    op_rules: &[
        OpRule {
            name: "AbsToRelu",
            apply: abs_to_relu,
        },
        OpRule {
            name: "ReluToTanh",
            apply: relu_to_tanh,
        },
    ],
};

static RELU_FIRST: Step = Step {
    name: "test.relu_first",
    after: &[],
    tensor_rules: &[],
    op_rules: &[OpRule {
        name: "ReluToTanh",
        apply: relu_to_tanh,
    }],
};

static ABS_SECOND: Step = Step {
    name: "test.abs_second",
    after: &["test.relu_first"],
    tensor_rules: &[],
    op_rules: &[OpRule {
        name: "AbsToRelu",
        apply: abs_to_relu,
    }],
};

fn abs_graph() -> Graph {
    unary(OpType::Abs, DataType::Int8, [1, 4], quant(1.0, 0), quant(1.0, 0)).0
}

fn run(graph: &mut Graph, steps: &[&Step], options: &OptimiserOptions) -> OptimisationLog {
    let constraints = create_constraints(&options.target);
    let mut log = OptimisationLog::new();
    rewrite_graph(graph, steps, constraints.as_ref(), options, &mut log).unwrap();
    log
}

// ─── Scheduler ─────────────────────────────────────────────────────

#[test]
fn test_rules_chain_within_a_step() {
    let mut g = abs_graph();
    let log = run(&mut g, &[&CHAINED], &OptimiserOptions::default());
    assert_eq!(live_types(&g), vec![OpType::Tanh]);
    assert_eq!(log.len(), 2);
}

#[test]
fn test_earlier_steps_do_not_rerun() {
    let mut g = abs_graph();
    run(&mut g, &[&RELU_FIRST, &ABS_SECOND], &OptimiserOptions::default());
    assert_eq!(live_types(&g), vec![OpType::Relu]);
}

#[test]
fn test_disabled_rule_is_skipped() {
    let mut g = abs_graph();
    let options = OptimiserOptions {
        disabled_rules: vec!["AbsToRelu".to_string()],
        ..OptimiserOptions::default()
    };
    let log = run(&mut g, &[&CHAINED], &options);
    assert_eq!(live_types(&g), vec![OpType::Abs]);
    assert!(log.is_empty());
}

#[test]
fn test_recording_can_be_turned_off() {
    let mut g = abs_graph();
    let options = OptimiserOptions {
        record_optimisations: false,
        ..OptimiserOptions::default()
    };
    let log = run(&mut g, &[&CHAINED], &options);
    assert_eq!(live_types(&g), vec![OpType::Tanh]);
    assert!(log.is_empty());
}

#[test]
fn test_step_order_validation() {
    assert!(validate_step_order(&[&RELU_FIRST, &ABS_SECOND]).is_ok());
    let err = validate_step_order(&[&ABS_SECOND, &RELU_FIRST]).unwrap_err();
    assert!(matches!(
        err,
        GraphError::StepOrder {
            step: "test.abs_second",
            requires: "test.relu_first"
        }
    ));
    // Dependencies on steps outside the list are ignored.
    assert!(validate_step_order(&[&ABS_SECOND]).is_ok());
}

// ─── Pipelines ─────────────────────────────────────────────────────

#[test]
fn test_builtin_pipelines_are_ordered() {
    for frontend in [Frontend::GraphIr, Frontend::TfLite] {
        validate_step_order(&steps::pipeline(frontend)).unwrap();
    }
    let tflite = steps::pipeline(Frontend::TfLite);
    assert_eq!(tflite[0].name, "tflite.normalise");
    assert_eq!(tflite.last().map(|s| s.name), Some("graphir.transpose_elementwise"));
}

#[test]
fn test_rule_names_are_unique_per_step() {
    for step in steps::pipeline(Frontend::TfLite) {
        let mut names: Vec<_> = step.op_rules.iter().map(|r| r.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), step.op_rules.len(), "duplicate rule in {}", step.name);
    }
    assert!(steps::rule_names(Frontend::GraphIr).contains(&"FuseRescale"));
    assert!(!steps::rule_names(Frontend::GraphIr).contains(&"RewritePack"));
}

#[test]
fn test_every_rule_leaves_lowered_ops_alone() {
    for frontend in [Frontend::GraphIr, Frontend::TfLite] {
        for step in steps::pipeline(frontend) {
            for &target in KNOWN_TARGETS {
                for rule in step.op_rules {
                    let mut g = abs_graph();
                    let op = g.ops_of_type(OpType::Abs)[0];
                    let before = g.clone();
                    let (first, log) = apply_on(&mut g, target, rule.name, rule.apply, op);
                    let (second, again) = apply_on(&mut g, target, rule.name, rule.apply, first);
                    assert_eq!((first, second), (op, op), "{} on {}", rule.name, target);
                    assert!(log.is_empty() && again.is_empty(), "{} on {}", rule.name, target);
                    assert_eq!(g, before, "{} on {}", rule.name, target);
                }
            }
            for rule in step.tensor_rules {
                let mut g = abs_graph();
                let before = g.clone();
                let tensors: Vec<_> = g.tensor_ids().collect();
                for tensor in tensors {
                    let (result, log) = apply_tensor(&mut g, rule.name, rule.apply, tensor);
                    assert_eq!(result, tensor, "{}", rule.name);
                    assert!(log.is_empty(), "{}", rule.name);
                }
                assert_eq!(g, before, "{}", rule.name);
            }
        }
    }
}

#[test]
fn test_graphir_pipeline_splits_tile() {
    let mut g = Graph::new("tile");
    let x = g.add_tensor(Tensor::new("x", DataType::Int8, [1, 4, 5, 3]));
    let y = g.add_tensor(Tensor::new("y", DataType::Int8, [1, 8, 15, 3]));
    let multiples = g.add_const("m", DataType::Int32, [4], vec![1, 2, 3, 1]);
    let tile = g.add_op(OpType::Tile);
    g.connect_input(tile, TensorUsage::IFM, x);
    g.connect_input(tile, TensorUsage::PARAMS, multiples);
    g.connect_output(tile, TensorUsage::OFM, y);
    g.add_input(x);
    g.add_output(y);

    let options = OptimiserOptions {
        verify_steps: true,
        ..OptimiserOptions::default()
    };
    let log = optimise_graph(&mut g, &options).unwrap();
    assert_eq!(g.ops_of_type(OpType::Tile).len(), 2);
    assert!(!log.is_empty());
    assert_eq!(g.outputs(), &[y]);
    g.check_consistency().unwrap();
}

#[test]
fn test_tflite_pipeline_lowers_leaky_relu() {
    let (mut g, op, _, _) = unary(OpType::LeakyRelu, DataType::Int8, [1, 4, 4, 8], quant(0.05, 0), quant(0.05, 0));
    g.op_mut(op).attr = Attr::LeakyRelu(LeakyReluAttr { alpha: 0.2 });
    let options = OptimiserOptions {
        frontend: Frontend::TfLite,
        verify_steps: true,
        ..OptimiserOptions::default()
    };
    optimise_graph(&mut g, &options).unwrap();
    assert_eq!(live_types(&g), vec![OpType::Lut]);
}

#[test]
fn test_graphir_pipeline_leaves_frontend_ops() {
    let (mut g, op, _, _) = unary(OpType::LeakyRelu, DataType::Int8, [1, 4], quant(0.05, 0), quant(0.05, 0));
    g.op_mut(op).attr = Attr::LeakyRelu(LeakyReluAttr { alpha: 0.2 });
    optimise_graph(&mut g, &OptimiserOptions::default()).unwrap();
    assert_eq!(live_types(&g), vec![OpType::LeakyRelu]);
}
