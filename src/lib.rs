//! Graph-level optimiser for fixed-point NPU compiler backends.
//!
//! A graph of tensor operations is rewritten by ordered steps of local
//! rules until only operations the target architecture can execute
//! remain. See `optimise::optimise_graph` for the entry point.

pub mod arch;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod ir;
pub mod optimise;

pub use config::{Frontend, OptimiserOptions};
pub use error::GraphError;
pub use ir::{Graph, GraphDesc};
pub use optimise::log::{OptimisationLog, OptimisationRecord};
pub use optimise::optimise_graph;
