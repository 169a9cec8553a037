//! Provenance of rewrites.
//!
//! The log is an explicit output of the scheduler. Nothing in the
//! optimiser reads it back; it exists for diagnostics and for the CLI's
//! `--log` output.

use std::fmt::Write as _;

use serde::Serialize;

use crate::ir::{Graph, OpId, OpType, TensorId};

/// Stable reference to an operation at the time it was recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OpRef {
    pub id: u32,
    pub op_type: OpType,
    /// Name of the OFM tensor, when the op had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ofm: Option<String>,
}

impl OpRef {
    pub fn capture(graph: &Graph, op: OpId) -> Self {
        Self {
            id: op.index() as u32,
            op_type: graph.op_type(op),
            ofm: graph.op(op).ofm().map(|c| graph.tensor(c.tensor()).name.clone()),
        }
    }
}

impl std::fmt::Display for OpRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.ofm {
            Some(name) => write!(f, "{}#{}({})", self.op_type, self.id, name),
            None => write!(f, "{}#{}", self.op_type, self.id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimisationRecord {
    /// `original` was rewritten into (or fused into) `replacement`.
    Replaced {
        rule: &'static str,
        original: OpRef,
        replacement: OpRef,
    },
    /// A tensor rule inserted `op` next to `tensor`.
    Inserted {
        rule: &'static str,
        tensor: String,
        op: OpRef,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OptimisationLog {
    records: Vec<OptimisationRecord>,
}

impl OptimisationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[OptimisationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_replacement(
        &mut self,
        graph: &Graph,
        rule: &'static str,
        original: OpId,
        replacement: OpId,
    ) {
        self.records.push(OptimisationRecord::Replaced {
            rule,
            original: OpRef::capture(graph, original),
            replacement: OpRef::capture(graph, replacement),
        });
    }

    pub fn record_insertion(&mut self, graph: &Graph, rule: &'static str, tensor: TensorId, op: OpId) {
        self.records.push(OptimisationRecord::Inserted {
            rule,
            tensor: graph.tensor(tensor).name.clone(),
            op: OpRef::capture(graph, op),
        });
    }

    /// Number of records produced by `rule`.
    pub fn count_for(&self, rule: &str) -> usize {
        self.records
            .iter()
            .filter(|r| match r {
                OptimisationRecord::Replaced { rule: name, .. }
                | OptimisationRecord::Inserted { rule: name, .. } => *name == rule,
            })
            .count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// One line per record, in the order rewrites happened.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            let _ = match record {
                OptimisationRecord::Replaced {
                    rule,
                    original,
                    replacement,
                } => writeln!(out, "{:<28} {} -> {}", rule, original, replacement),
                OptimisationRecord::Inserted { rule, tensor, op } => {
                    writeln!(out, "{:<28} {} at '{}'", rule, op, tensor)
                }
            };
        }
        out
    }
}
