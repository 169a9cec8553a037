//! Operation/tensor graph.
//!
//! Operations and tensors live in arenas owned by the `Graph` and are
//! addressed by `OpId` / `TensorId`. Every tensor keeps reader and writer
//! lists mirroring the connections of the operations that use it; those
//! lists are only mutated through the editing primitives in this module,
//! and `Graph::check_consistency` verifies the correspondence.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use super::attr::{Attr, Kernel, RoundMode};
use super::buffer::Buffer;
use super::op_type::OpType;
use super::quant::Quantization;
use super::shape::{Shape, TensorSlice};
use super::types::{AxisOrder, DataType, ReverseType, TensorUsage, TransposeType};
use crate::error::GraphError;


// ─── Handles ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(u32);

impl TensorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ─── Connections ───────────────────────────────────────────────────

/// Association between an operation and a tensor, carrying the
/// connection-local view of that tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorConnection {
    tensor: TensorId,
    pub shape: Shape,
    pub quantization: Quantization,
    pub slice: TensorSlice,
    pub transpose: TransposeType,
    pub reverse: ReverseType,
}

impl TensorConnection {
    fn new(tensor: TensorId, shape: Shape) -> Self {
        Self {
            tensor,
            shape,
            quantization: Quantization::default(),
            slice: TensorSlice::default(),
            transpose: TransposeType::NONE,
            reverse: ReverseType::NONE,
        }
    }

    pub fn tensor(&self) -> TensorId {
        self.tensor
    }

    pub fn set_shape(&mut self, shape: Shape) -> &mut Self {
        self.shape = shape;
        self
    }

    pub fn set_quantization(&mut self, quantization: Quantization) -> &mut Self {
        self.quantization = quantization;
        self
    }

    pub fn set_slice(&mut self, slice: TensorSlice) -> &mut Self {
        self.slice = slice;
        self
    }

    /// Shape of the region actually read or written.
    pub fn region_shape(&self) -> &Shape {
        if self.slice.shape.is_empty() {
            &self.shape
        } else {
            &self.slice.shape
        }
    }
}

// ─── Tensors ───────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub dtype: DataType,
    pub storage_shape: Shape,
    pub axis_order: AxisOrder,
    pub buffer: Option<Buffer>,
    readers: Vec<OpId>,
    writers: Vec<OpId>,
}

impl Tensor {
    pub fn new(name: impl Into<String>, dtype: DataType, storage_shape: impl Into<Shape>) -> Self {
        Self {
            name: name.into(),
            dtype,
            storage_shape: storage_shape.into(),
            axis_order: AxisOrder::Unknown,
            buffer: None,
            readers: Vec::new(),
            writers: Vec::new(),
        }
    }

    pub fn with_buffer(mut self, buffer: Buffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn is_constant(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn readers(&self) -> &[OpId] {
        &self.readers
    }

    pub fn writers(&self) -> &[OpId] {
        &self.writers
    }

    /// Single producer, if there is exactly one.
    pub fn sole_writer(&self) -> Option<OpId> {
        match self.writers.as_slice() {
            [op] => Some(*op),
            _ => None,
        }
    }

    /// Constant values, or `None` for a variable tensor.
    pub fn values(&self) -> Option<&[i64]> {
        self.buffer.as_ref().map(Buffer::values)
    }
}

// ─── Operations ────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub op_type: OpType,
    pub attr: Attr,
    pub kernel: Kernel,
    pub rounding: RoundMode,
    inputs: BTreeMap<TensorUsage, TensorConnection>,
    outputs: BTreeMap<TensorUsage, TensorConnection>,
}

impl Operation {
    fn new(op_type: OpType) -> Self {
        Self {
            op_type,
            attr: Attr::None,
            kernel: Kernel::default(),
            rounding: RoundMode::default(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn input(&self, usage: TensorUsage) -> Option<&TensorConnection> {
        self.inputs.get(&usage)
    }

    pub fn input_mut(&mut self, usage: TensorUsage) -> Option<&mut TensorConnection> {
        self.inputs.get_mut(&usage)
    }

    pub fn output(&self, usage: TensorUsage) -> Option<&TensorConnection> {
        self.outputs.get(&usage)
    }

    pub fn output_mut(&mut self, usage: TensorUsage) -> Option<&mut TensorConnection> {
        self.outputs.get_mut(&usage)
    }

    pub fn ifm(&self) -> Option<&TensorConnection> {
        self.input(TensorUsage::IFM)
    }

    pub fn ofm(&self) -> Option<&TensorConnection> {
        self.output(TensorUsage::OFM)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (TensorUsage, &TensorConnection)> {
        self.inputs.iter().map(|(u, c)| (*u, c))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (TensorUsage, &TensorConnection)> {
        self.outputs.iter().map(|(u, c)| (*u, c))
    }

    /// Input usages of the IFM family in index order.
    pub fn ifm_usages(&self) -> Vec<TensorUsage> {
        self.inputs.keys().copied().filter(|u| u.is_ifm()).collect()
    }

    pub fn is_connected(&self) -> bool {
        !self.inputs.is_empty() || !self.outputs.is_empty()
    }

    fn reads(&self, tensor: TensorId) -> bool {
        self.inputs.values().any(|c| c.tensor == tensor)
    }

    fn writes(&self, tensor: TensorId) -> bool {
        self.outputs.values().any(|c| c.tensor == tensor)
    }
}

// ─── Graph ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    pub name: String,
    ops: Vec<Operation>,
    tensors: Vec<Tensor>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    // ── Tensors ──

    pub fn add_tensor(&mut self, tensor: Tensor) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        let mut tensor = tensor;
        tensor.readers.clear();
        tensor.writers.clear();
        self.tensors.push(tensor);
        id
    }

    /// Add a constant tensor holding `values`.
    pub fn add_const(
        &mut self,
        name: impl Into<String>,
        dtype: DataType,
        shape: impl Into<Shape>,
        values: Vec<i64>,
    ) -> TensorId {
        self.add_tensor(Tensor::new(name, dtype, shape).with_buffer(Buffer::new(values)))
    }

    /// Add a single-element constant.
    pub fn add_scalar(&mut self, name: impl Into<String>, dtype: DataType, value: i64) -> TensorId {
        self.add_const(name, dtype, [1], vec![value])
    }

    /// Copy a tensor's description (not its connections) under a new name.
    pub fn clone_tensor(&mut self, tensor: TensorId, name: impl Into<String>) -> TensorId {
        let src = &self.tensors[tensor.index()];
        let copy = Tensor {
            name: name.into(),
            dtype: src.dtype,
            storage_shape: src.storage_shape.clone(),
            axis_order: src.axis_order,
            buffer: src.buffer.clone(),
            readers: Vec::new(),
            writers: Vec::new(),
        };
        self.add_tensor(copy)
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        &self.tensors[id.index()]
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut Tensor {
        &mut self.tensors[id.index()]
    }

    pub fn tensor_ids(&self) -> impl Iterator<Item = TensorId> {
        (0..self.tensors.len() as u32).map(TensorId)
    }

    pub fn find_tensor(&self, name: &str) -> Option<TensorId> {
        self.tensors
            .iter()
            .position(|t| t.name == name)
            .map(|i| TensorId(i as u32))
    }

    // ── Graph boundary ──

    pub fn add_input(&mut self, tensor: TensorId) {
        if !self.inputs.contains(&tensor) {
            self.inputs.push(tensor);
        }
    }

    pub fn add_output(&mut self, tensor: TensorId) {
        if !self.outputs.contains(&tensor) {
            self.outputs.push(tensor);
        }
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn is_input(&self, tensor: TensorId) -> bool {
        self.inputs.contains(&tensor)
    }

    pub fn is_output(&self, tensor: TensorId) -> bool {
        self.outputs.contains(&tensor)
    }

    // ── Operations ──

    pub fn add_op(&mut self, op_type: OpType) -> OpId {
        let id = OpId(self.ops.len() as u32);
        self.ops.push(Operation::new(op_type));
        id
    }

    pub fn add_op_with(&mut self, op_type: OpType, attr: Attr) -> OpId {
        let id = self.add_op(op_type);
        self.ops[id.index()].attr = attr;
        id
    }

    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id.index()]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.ops[id.index()]
    }

    pub fn op_type(&self, id: OpId) -> OpType {
        self.ops[id.index()].op_type
    }

    pub fn is_connected(&self, id: OpId) -> bool {
        self.ops[id.index()].is_connected()
    }

    /// Operations that still have at least one connection, in creation order.
    pub fn live_ops(&self) -> impl Iterator<Item = OpId> + '_ {
        self.ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.is_connected())
            .map(|(i, _)| OpId(i as u32))
    }

    pub fn op_count(&self) -> usize {
        self.live_ops().count()
    }

    /// Live operations of the given kind.
    pub fn ops_of_type(&self, op_type: OpType) -> Vec<OpId> {
        self.live_ops()
            .filter(|&id| self.op_type(id) == op_type)
            .collect()
    }

    /// Tensor connected at `usage`, if any.
    pub fn input_tensor(&self, op: OpId, usage: TensorUsage) -> Option<TensorId> {
        self.op(op).input(usage).map(TensorConnection::tensor)
    }

    pub fn output_tensor(&self, op: OpId, usage: TensorUsage) -> Option<TensorId> {
        self.op(op).output(usage).map(TensorConnection::tensor)
    }

    /// Short human-readable label, e.g. `Conv2D#3(conv_out)`.
    pub fn describe_op(&self, id: OpId) -> String {
        let op = self.op(id);
        match op.ofm() {
            Some(ofm) => format!("{}#{}({})", op.op_type, id.0, self.tensor(ofm.tensor).name),
            None => format!("{}#{}", op.op_type, id.0),
        }
    }

    // ── Editing primitives ──

    /// Connect `tensor` as input `usage` of `op`, replacing any previous
    /// connection at that usage. The connection starts with the tensor's
    /// storage shape and default quantization.
    pub fn connect_input(
        &mut self,
        op: OpId,
        usage: TensorUsage,
        tensor: TensorId,
    ) -> &mut TensorConnection {
        let shape = self.tensors[tensor.index()].storage_shape.clone();
        self.attach_input(op, usage, TensorConnection::new(tensor, shape))
    }

    /// Connect `tensor` as output `usage` of `op`.
    pub fn connect_output(
        &mut self,
        op: OpId,
        usage: TensorUsage,
        tensor: TensorId,
    ) -> &mut TensorConnection {
        let shape = self.tensors[tensor.index()].storage_shape.clone();
        self.attach_output(op, usage, TensorConnection::new(tensor, shape))
    }

    /// Connect input `usage` of `op` as an exact copy of `conn`.
    pub fn copy_input(
        &mut self,
        op: OpId,
        usage: TensorUsage,
        conn: &TensorConnection,
    ) -> &mut TensorConnection {
        self.attach_input(op, usage, conn.clone())
    }

    /// Connect output `usage` of `op` as an exact copy of `conn`.
    pub fn copy_output(
        &mut self,
        op: OpId,
        usage: TensorUsage,
        conn: &TensorConnection,
    ) -> &mut TensorConnection {
        self.attach_output(op, usage, conn.clone())
    }

    fn attach_input(
        &mut self,
        op: OpId,
        usage: TensorUsage,
        conn: TensorConnection,
    ) -> &mut TensorConnection {
        debug_assert!(usage.is_input());
        self.disconnect_input(op, usage);
        let tensor = conn.tensor;
        let readers = &mut self.tensors[tensor.index()].readers;
        if !readers.contains(&op) {
            readers.push(op);
        }
        put_connection(&mut self.ops[op.index()].inputs, usage, conn)
    }

    fn attach_output(
        &mut self,
        op: OpId,
        usage: TensorUsage,
        conn: TensorConnection,
    ) -> &mut TensorConnection {
        debug_assert!(usage.is_output());
        self.disconnect_output(op, usage);
        let tensor = conn.tensor;
        let writers = &mut self.tensors[tensor.index()].writers;
        if !writers.contains(&op) {
            writers.push(op);
        }
        put_connection(&mut self.ops[op.index()].outputs, usage, conn)
    }

    /// Remove input `usage` from `op`, dropping `op` from the tensor's
    /// readers when no other input still references it.
    pub fn disconnect_input(&mut self, op: OpId, usage: TensorUsage) {
        if let Some(conn) = self.ops[op.index()].inputs.remove(&usage) {
            if !self.ops[op.index()].reads(conn.tensor) {
                self.tensors[conn.tensor.index()].readers.retain(|&r| r != op);
            }
        }
    }

    pub fn disconnect_output(&mut self, op: OpId, usage: TensorUsage) {
        if let Some(conn) = self.ops[op.index()].outputs.remove(&usage) {
            if !self.ops[op.index()].writes(conn.tensor) {
                self.tensors[conn.tensor.index()].writers.retain(|&w| w != op);
            }
        }
    }

    /// Fully detach `op` from the graph.
    pub fn disconnect(&mut self, op: OpId) {
        let inputs: Vec<TensorUsage> = self.ops[op.index()].inputs.keys().copied().collect();
        for usage in inputs {
            self.disconnect_input(op, usage);
        }
        let outputs: Vec<TensorUsage> = self.ops[op.index()].outputs.keys().copied().collect();
        for usage in outputs {
            self.disconnect_output(op, usage);
        }
    }

    /// Point every reader of `original` (except `exempt`) at `replacement`,
    /// keeping the connection-local shape and quantization.
    pub fn replace_consumer_input(
        &mut self,
        exempt: Option<OpId>,
        original: TensorId,
        replacement: TensorId,
    ) {
        let readers = self.tensors[original.index()].readers.clone();
        for reader in readers {
            if Some(reader) == exempt {
                continue;
            }
            let usages: Vec<TensorUsage> = self.ops[reader.index()]
                .inputs
                .iter()
                .filter(|(_, c)| c.tensor == original)
                .map(|(u, _)| *u)
                .collect();
            for usage in usages {
                let mut conn = self.ops[reader.index()].inputs[&usage].clone();
                conn.tensor = replacement;
                self.attach_input(reader, usage, conn);
            }
        }
    }

    /// Point every writer of `original` at `replacement`.
    pub fn replace_producer_output(&mut self, original: TensorId, replacement: TensorId) {
        let writers = self.tensors[original.index()].writers.clone();
        for writer in writers {
            let usages: Vec<TensorUsage> = self.ops[writer.index()]
                .outputs
                .iter()
                .filter(|(_, c)| c.tensor == original)
                .map(|(u, _)| *u)
                .collect();
            for usage in usages {
                let mut conn = self.ops[writer.index()].outputs[&usage].clone();
                conn.tensor = replacement;
                self.attach_output(writer, usage, conn);
            }
        }
    }

    /// Insert a `MemoryCopy` after `tensor`: existing readers move to the
    /// copy's output, which becomes a fresh tensor named `<name>_copy`.
    pub fn insert_copy_after_tensor(
        &mut self,
        tensor: TensorId,
        quantization: &Quantization,
    ) -> OpId {
        let name = format!("{}_copy", self.tensors[tensor.index()].name);
        let copy = self.clone_tensor(tensor, name);
        self.tensors[copy.index()].buffer = None;
        let op = self.add_op(OpType::MemoryCopy);
        self.op_mut(op).rounding = RoundMode::Natural;
        self.replace_consumer_input(None, tensor, copy);
        self.connect_input(op, TensorUsage::IFM, tensor)
            .set_quantization(quantization.clone());
        self.connect_output(op, TensorUsage::OFM, copy)
            .set_quantization(quantization.clone());
        op
    }

    // ── Traversal ──

    /// Live operations ordered so every producer precedes its consumers.
    pub fn execution_order(&self) -> Result<Vec<OpId>, GraphError> {
        let mut dag: DiGraph<OpId, TensorId> = DiGraph::new();
        let mut nodes: BTreeMap<OpId, NodeIndex> = BTreeMap::new();
        for op in self.live_ops() {
            nodes.insert(op, dag.add_node(op));
        }
        for (i, tensor) in self.tensors.iter().enumerate() {
            for writer in &tensor.writers {
                for reader in &tensor.readers {
                    if let (Some(&from), Some(&to)) = (nodes.get(writer), nodes.get(reader)) {
                        dag.add_edge(from, to, TensorId(i as u32));
                    }
                }
            }
        }
        toposort(&dag, None)
            .map(|order| order.into_iter().map(|n| dag[n]).collect())
            .map_err(|cycle| GraphError::Cycle(self.describe_op(dag[cycle.node_id()])))
    }

    // ── Invariants ──

    /// Verify that reader/writer lists and operation connections agree.
    pub fn check_consistency(&self) -> Result<(), GraphError> {
        for (i, op) in self.ops.iter().enumerate() {
            let id = OpId(i as u32);
            for (usage, conn) in &op.inputs {
                if !self.tensors[conn.tensor.index()].readers.contains(&id) {
                    return Err(GraphError::MissingEdge {
                        op: self.describe_op(id),
                        tensor: self.tensors[conn.tensor.index()].name.clone(),
                        usage: usage.to_string(),
                        role: "reader",
                    });
                }
            }
            for (usage, conn) in &op.outputs {
                if !self.tensors[conn.tensor.index()].writers.contains(&id) {
                    return Err(GraphError::MissingEdge {
                        op: self.describe_op(id),
                        tensor: self.tensors[conn.tensor.index()].name.clone(),
                        usage: usage.to_string(),
                        role: "writer",
                    });
                }
            }
        }
        for (i, tensor) in self.tensors.iter().enumerate() {
            let id = TensorId(i as u32);
            if let Some(&op) = tensor.readers.iter().find(|&&r| !self.ops[r.index()].reads(id)) {
                return Err(GraphError::DanglingEdge {
                    tensor: tensor.name.clone(),
                    op: self.describe_op(op),
                    role: "reader",
                });
            }
            if let Some(&op) = tensor.writers.iter().find(|&&w| !self.ops[w.index()].writes(id)) {
                return Err(GraphError::DanglingEdge {
                    tensor: tensor.name.clone(),
                    op: self.describe_op(op),
                    role: "writer",
                });
            }
        }
        Ok(())
    }
}

fn put_connection(
    map: &mut BTreeMap<TensorUsage, TensorConnection>,
    usage: TensorUsage,
    conn: TensorConnection,
) -> &mut TensorConnection {
    match map.entry(usage) {
        Entry::Vacant(slot) => slot.insert(conn),
        Entry::Occupied(mut slot) => {
            slot.insert(conn);
            slot.into_mut()
        }
    }
}

impl fmt::Display for Graph {
    /// One line per live operation in execution order.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let order = self
            .execution_order()
            .unwrap_or_else(|_| self.live_ops().collect());
        for id in order {
            let op = self.op(id);
            let ins: Vec<String> = op
                .inputs()
                .map(|(u, c)| format!("{}={}{}", u, self.tensor(c.tensor).name, c.shape))
                .collect();
            let outs: Vec<String> = op
                .outputs()
                .map(|(u, c)| format!("{}={}{}", u, self.tensor(c.tensor).name, c.shape))
                .collect();
            writeln!(f, "{} {} -> {}", op.op_type, ins.join(" "), outs.join(" "))?;
        }
        Ok(())
    }
}
