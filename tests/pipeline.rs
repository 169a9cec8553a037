//! End-to-end runs of the optimiser over JSON graph descriptions.

use npu_graphopt::arch::create_constraints;
use npu_graphopt::ir::{OpType, TensorUsage};
use npu_graphopt::optimise::{steps, OptimisationLog, RewriteContext};
use npu_graphopt::{optimise_graph, Frontend, GraphDesc, OptimisationRecord, OptimiserOptions};

const TILE: &str = r#"{
    "name": "tile",
    "tensors": [
        {"name": "x", "dtype": "Int8", "shape": [1, 4, 5, 3]},
        {"name": "y", "dtype": "Int8", "shape": [1, 8, 15, 3]},
        {"name": "m", "dtype": "Int32", "shape": [4], "values": [1, 2, 3, 1]}
    ],
    "operations": [
        {"type": "Tile",
         "inputs": [{"usage": {"Ifm": 0}, "tensor": "x"},
                    {"usage": {"Params": 0}, "tensor": "m"}],
         "outputs": [{"usage": {"Ofm": 0}, "tensor": "y"}]}
    ],
    "inputs": ["x"],
    "outputs": ["y"]
}"#;

const NEG: &str = r#"{
    "name": "neg",
    "tensors": [
        {"name": "x", "dtype": "Int8", "shape": [1, 4]},
        {"name": "y", "dtype": "Int8", "shape": [1, 4]}
    ],
    "operations": [
        {"type": "Neg",
         "inputs": [{"usage": {"Ifm": 0}, "tensor": "x"}],
         "outputs": [{"usage": {"Ofm": 0}, "tensor": "y"}]}
    ],
    "inputs": ["x"],
    "outputs": ["y"]
}"#;

const PACK: &str = r#"{
    "name": "pack",
    "tensors": [
        {"name": "a", "dtype": "Int8", "shape": [2, 3]},
        {"name": "b", "dtype": "Int8", "shape": [2, 3]},
        {"name": "out", "dtype": "Int8", "shape": [2, 2, 3]}
    ],
    "operations": [
        {"type": "Pack", "attr": {"Axis": {"axis": 0}},
         "inputs": [{"usage": {"Ifm": 0}, "tensor": "a"},
                    {"usage": {"Ifm": 1}, "tensor": "b"}],
         "outputs": [{"usage": {"Ofm": 0}, "tensor": "out"}]}
    ],
    "inputs": ["a", "b"],
    "outputs": ["out"]
}"#;

fn optimise(text: &str, options: &OptimiserOptions) -> (GraphDesc, OptimisationLog) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut graph = GraphDesc::from_json(text).unwrap().build().unwrap();
    let log = optimise_graph(&mut graph, options).unwrap();
    graph.check_consistency().unwrap();
    (GraphDesc::from_graph(&graph), log)
}

fn verified(frontend: Frontend) -> OptimiserOptions {
    OptimiserOptions {
        frontend,
        verify_steps: true,
        ..OptimiserOptions::default()
    }
}

#[test]
fn test_tile_is_split_per_axis() {
    let (desc, log) = optimise(TILE, &verified(Frontend::GraphIr));
    insta::assert_snapshot!(desc.summary().trim_end(), @r"
    tile: 2 ops, 5 tensors
      Tile                     2
    ");
    insta::assert_snapshot!(log.render().trim_end(), @r"
    RewriteTile                  Tile#0(y) -> Tile#1(y_tiled_axis_2)
    RewriteTile                  Tile#0(y) -> Tile#2(y)
    ");
    // The second const was renamed on export.
    let names: Vec<_> = desc.tensors.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y", "y_tiled_axis_2", "multiples", "multiples_1"]);
}

#[test]
fn test_optimised_description_rebuilds() {
    let (desc, _) = optimise(TILE, &verified(Frontend::GraphIr));
    let json = desc.to_json().unwrap();
    let rebuilt = GraphDesc::from_json(&json).unwrap();
    assert_eq!(rebuilt, desc);
    let graph = rebuilt.build().unwrap();
    assert_eq!(graph.ops_of_type(OpType::Tile).len(), 2);
    assert_eq!(desc.fingerprint().unwrap(), rebuilt.fingerprint().unwrap());
}

#[test]
fn test_negate_becomes_subtraction_from_zero() {
    let (desc, log) = optimise(NEG, &verified(Frontend::GraphIr));
    insta::assert_snapshot!(desc.summary().trim_end(), @r"
    neg: 1 ops, 3 tensors
      Sub                      1
    ");
    assert_eq!(log.count_for("RewriteNegate"), 1);
    let sub = &desc.operations[0];
    let ifm = sub.inputs.iter().find(|c| c.usage == TensorUsage::IFM).unwrap();
    assert_eq!(ifm.tensor, "const_zero");
}

#[test]
fn test_pack_lowers_to_copies_through_both_pipelines() {
    let (desc, log) = optimise(PACK, &verified(Frontend::TfLite));
    insta::assert_snapshot!(desc.summary().trim_end(), @r"
    pack: 2 ops, 3 tensors
      MemoryCopy               2
    ");
    assert_eq!(log.count_for("RewritePack"), 1);
    assert_eq!(log.count_for("RewriteConcat"), 2);
    let mut offsets: Vec<_> = desc
        .operations
        .iter()
        .map(|op| op.outputs[0].slice.as_ref().unwrap().offset.dims().to_vec())
        .collect();
    offsets.sort();
    assert_eq!(offsets, vec![vec![0, 0, 0], vec![1, 0, 0]]);
}

#[test]
fn test_graphir_frontend_keeps_pack() {
    let (desc, log) = optimise(PACK, &verified(Frontend::GraphIr));
    assert_eq!(desc.operations[0].op_type, OpType::Pack);
    assert!(log.is_empty());
}

#[test]
fn test_disabled_rule_leaves_operation() {
    let options = OptimiserOptions {
        disabled_rules: vec!["RewriteTile".to_string()],
        ..verified(Frontend::GraphIr)
    };
    let (desc, log) = optimise(TILE, &options);
    assert_eq!(desc.operations.len(), 1);
    assert!(log.is_empty());
}

#[test]
fn test_log_records_rule_and_ops() {
    let (_, log) = optimise(NEG, &verified(Frontend::GraphIr));
    match &log.records()[0] {
        OptimisationRecord::Replaced {
            rule,
            original,
            replacement,
        } => {
            assert_eq!(*rule, "RewriteNegate");
            assert_eq!(original.op_type, OpType::Neg);
            assert_eq!(replacement.op_type, OpType::Sub);
            assert_eq!(replacement.ofm.as_deref(), Some("y"));
        }
        other => panic!("unexpected record {:?}", other),
    }
}

const ABS: &str = r#"{
    "name": "abs",
    "tensors": [
        {"name": "x", "dtype": "Int8", "shape": [1, 4]},
        {"name": "y", "dtype": "Int8", "shape": [1, 4]}
    ],
    "operations": [
        {"type": "Abs",
         "inputs": [{"usage": {"Ifm": 0}, "tensor": "x"}],
         "outputs": [{"usage": {"Ofm": 0}, "tensor": "y"}]}
    ],
    "inputs": ["x"],
    "outputs": ["y"]
}"#;

#[test]
fn test_every_rule_passes_unmatched_ops_through() {
    let options = OptimiserOptions::default();
    for target in ["ethos-u55", "ethos-u85"] {
        let constraints = create_constraints(target);
        for step in steps::pipeline(Frontend::TfLite) {
            for rule in step.op_rules {
                let mut graph = GraphDesc::from_json(ABS).unwrap().build().unwrap();
                let op = graph.ops_of_type(OpType::Abs)[0];
                let before = graph.clone();
                let mut log = OptimisationLog::new();
                let mut ctx = RewriteContext::new(constraints.as_ref(), &options, &mut log);
                let first = (rule.apply)(&mut graph, &mut ctx, op);
                let second = (rule.apply)(&mut graph, &mut ctx, first);
                assert_eq!((first, second), (op, op), "{} on {}", rule.name, target);
                assert_eq!(graph, before, "{} on {}", rule.name, target);
                assert!(log.is_empty(), "{} on {}", rule.name, target);
            }
        }
    }
}
