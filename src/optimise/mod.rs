//! Graph rewrite scheduler.
//!
//! A pipeline is a fixed list of `Step`s. Each step walks the graph once,
//! first over tensors and then over operations, and feeds every visited
//! node through the step's rules in order. A rule returns the node that
//! later rules of the same step should see, so rewrites chain within a
//! step but earlier steps never run again.

pub mod log;
pub mod rules;
pub mod steps;
pub mod util;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;

use ::log::{debug, trace};

use crate::arch::{create_constraints, ArchitectureConstraints};
use crate::config::OptimiserOptions;
use crate::error::GraphError;
use crate::ir::{Graph, OpId, TensorId};

pub use self::log::{OptimisationLog, OptimisationRecord, OpRef};

// ─── Rule Contract ─────────────────────────────────────────────────

/// Rewrite applied to one operation. Returns the operation the rest of
/// the step continues with: the input itself when nothing matched.
pub type OpRewrite = fn(&mut Graph, &mut RewriteContext<'_>, OpId) -> OpId;

/// Rewrite applied to one tensor.
pub type TensorRewrite = fn(&mut Graph, &mut RewriteContext<'_>, TensorId) -> TensorId;

#[derive(Clone, Copy)]
pub struct OpRule {
    pub name: &'static str,
    pub apply: OpRewrite,
}

#[derive(Clone, Copy)]
pub struct TensorRule {
    pub name: &'static str,
    pub apply: TensorRewrite,
}

/// One pass over the graph.
pub struct Step {
    pub name: &'static str,
    /// Steps that must already have run when this one starts.
    pub after: &'static [&'static str],
    pub tensor_rules: &'static [TensorRule],
    pub op_rules: &'static [OpRule],
}

/// State shared by the rules of a pipeline run.
pub struct RewriteContext<'a> {
    pub constraints: &'a dyn ArchitectureConstraints,
    pub options: &'a OptimiserOptions,
    log: &'a mut OptimisationLog,
    rule: &'static str,
}

impl<'a> RewriteContext<'a> {
    pub fn new(
        constraints: &'a dyn ArchitectureConstraints,
        options: &'a OptimiserOptions,
        log: &'a mut OptimisationLog,
    ) -> Self {
        Self {
            constraints,
            options,
            log,
            rule: "",
        }
    }

    /// Name of the rule currently running.
    pub fn rule(&self) -> &'static str {
        self.rule
    }

    /// Note that `original` was rewritten into `replacement`.
    pub fn record(&mut self, graph: &Graph, original: OpId, replacement: OpId) {
        trace!(
            "{}: {} -> {}",
            self.rule,
            graph.describe_op(original),
            graph.describe_op(replacement)
        );
        if self.options.record_optimisations {
            self.log
                .record_replacement(graph, self.rule, original, replacement);
        }
    }

    /// Note that a tensor rule inserted `op` next to `tensor`.
    pub fn record_insertion(&mut self, graph: &Graph, tensor: TensorId, op: OpId) {
        trace!(
            "{}: inserted {} at '{}'",
            self.rule,
            graph.describe_op(op),
            graph.tensor(tensor).name
        );
        if self.options.record_optimisations {
            self.log.record_insertion(graph, self.rule, tensor, op);
        }
    }
}

// ─── Scheduler ─────────────────────────────────────────────────────

/// Check that every declared dependency of a step appears earlier in
/// `steps`. Dependencies on steps absent from the list are ignored so a
/// partial pipeline stays valid.
pub fn validate_step_order(steps: &[&Step]) -> Result<(), GraphError> {
    for (i, step) in steps.iter().enumerate() {
        for &requires in step.after {
            let position = steps.iter().position(|s| s.name == requires);
            if let Some(p) = position {
                if p >= i {
                    return Err(GraphError::StepOrder {
                        step: step.name,
                        requires,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Run `steps` over `graph` in order.
pub fn rewrite_graph(
    graph: &mut Graph,
    steps: &[&Step],
    constraints: &dyn ArchitectureConstraints,
    options: &OptimiserOptions,
    log: &mut OptimisationLog,
) -> Result<(), GraphError> {
    let mut ctx = RewriteContext::new(constraints, options, log);
    for (i, step) in steps.iter().enumerate() {
        let tensor_rules: Vec<TensorRule> = step
            .tensor_rules
            .iter()
            .copied()
            .filter(|r| !options.is_rule_disabled(r.name))
            .collect();
        let op_rules: Vec<OpRule> = step
            .op_rules
            .iter()
            .copied()
            .filter(|r| !options.is_rule_disabled(r.name))
            .collect();
        if tensor_rules.is_empty() && op_rules.is_empty() {
            continue;
        }
        debug!("step {}/{} {}", i + 1, steps.len(), step.name);

        if !tensor_rules.is_empty() {
            for tensor in visited_tensors(graph) {
                let mut current = tensor;
                for rule in &tensor_rules {
                    ctx.rule = rule.name;
                    current = (rule.apply)(graph, &mut ctx, current);
                }
            }
        }

        if !op_rules.is_empty() {
            for op in graph.execution_order()? {
                if !graph.is_connected(op) {
                    continue;
                }
                let mut current = op;
                for rule in &op_rules {
                    ctx.rule = rule.name;
                    current = (rule.apply)(graph, &mut ctx, current);
                    if !graph.is_connected(current) {
                        break;
                    }
                }
            }
        }

        if options.verify_steps {
            if let Err(e) = graph.check_consistency() {
                panic!("graph inconsistent after step '{}': {}", step.name, e);
            }
        }
    }
    Ok(())
}

/// Tensors reachable from live operations plus the graph boundary, in
/// first-seen order.
fn visited_tensors(graph: &Graph) -> Vec<TensorId> {
    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    let mut visit = |t: TensorId| {
        if seen.insert(t) {
            order.push(t);
        }
    };
    for &t in graph.inputs() {
        visit(t);
    }
    for op in graph.live_ops() {
        let op = graph.op(op);
        for (_, conn) in op.inputs().chain(op.outputs()) {
            visit(conn.tensor());
        }
    }
    for &t in graph.outputs() {
        visit(t);
    }
    order
}

/// Run the full pipeline selected by `options` and return the provenance
/// log.
pub fn optimise_graph(
    graph: &mut Graph,
    options: &OptimiserOptions,
) -> Result<OptimisationLog, GraphError> {
    let constraints = create_constraints(&options.target);
    let pipeline = steps::pipeline(options.frontend);
    validate_step_order(&pipeline)?;
    debug!(
        "optimising '{}' for {} ({} ops, {} steps)",
        graph.name,
        constraints.name(),
        graph.op_count(),
        pipeline.len()
    );
    let mut log = OptimisationLog::new();
    rewrite_graph(graph, &pipeline, constraints.as_ref(), options, &mut log)?;
    Ok(log)
}
