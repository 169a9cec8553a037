//! Graph intermediate representation consumed and produced by the optimiser.
//!
//! Operations are typed nodes with usage-tagged tensor connections;
//! tensors are shared nodes with reader and writer lists. See `graph` for
//! the editing primitives that keep both sides consistent.

pub mod attr;
pub mod buffer;
pub mod desc;
pub mod graph;
pub mod op_type;
pub mod quant;
pub mod shape;
pub mod types;

pub use attr::{Attr, Kernel, Margin, RoundMode};
pub use buffer::Buffer;
pub use desc::GraphDesc;
pub use graph::{Graph, OpId, Operation, Tensor, TensorConnection, TensorId};
pub use op_type::OpType;
pub use quant::{Multiplier, Quantization, QuantizationType, QuantizedScale};
pub use shape::{Point2, Shape, TensorSlice};
pub use types::{AxisOrder, DataType, ReverseType, TensorUsage, TransposeType};
