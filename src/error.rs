use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, loading or validating a graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("unknown tensor '{0}'")]
    UnknownTensor(String),
    #[error("tensor '{0}' is declared more than once")]
    DuplicateTensor(String),
    #[error("graph contains a cycle through {0}")]
    Cycle(String),
    #[error("{op} connects '{tensor}' as {usage} but is not registered as its {role}")]
    MissingEdge {
        op: String,
        tensor: String,
        usage: String,
        role: &'static str,
    },
    #[error("tensor '{tensor}' lists {op} as a {role} without a matching connection")]
    DanglingEdge {
        tensor: String,
        op: String,
        role: &'static str,
    },
    #[error("step '{step}' must run after '{requires}'")]
    StepOrder {
        step: &'static str,
        requires: &'static str,
    },
    #[error("invalid graph description: {0}")]
    Description(#[from] serde_json::Error),
    #[error("cannot access '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
