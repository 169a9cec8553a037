use npu_graphopt::arch::{create_constraints, KNOWN_TARGETS};
use npu_graphopt::ir::OpType;

/// Units worth calling out when comparing targets.
const NOTABLE: &[OpType] = &[
    OpType::MatMul,
    OpType::Gather,
    OpType::Scatter,
    OpType::Resize,
    OpType::ArgMax,
    OpType::Cast,
    OpType::Transpose,
    OpType::Reverse,
];

pub fn cmd_targets() {
    for &name in KNOWN_TARGETS {
        let arch = create_constraints(name);
        let native: Vec<String> = NOTABLE
            .iter()
            .filter(|&&op| arch.supports_op(op))
            .map(|op| format!("{:?}", op))
            .collect();
        if native.is_empty() {
            println!("{}", name);
        } else {
            println!("{:<12} {}", name, native.join(", "));
        }
    }
}
