//! JSON interchange form of a graph.
//!
//! Tensors are referenced by name. `GraphDesc::build` produces a fully
//! connected `Graph`; `GraphDesc::from_graph` captures the live part of a
//! graph after optimisation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::attr::{Attr, Kernel, RoundMode};
use super::buffer::Buffer;
use super::graph::{Graph, Tensor, TensorConnection, TensorId};
use super::op_type::OpType;
use super::quant::Quantization;
use super::shape::{Shape, TensorSlice};
use super::types::{AxisOrder, DataType, ReverseType, TensorUsage, TransposeType};
use crate::error::GraphError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphDesc {
    #[serde(default)]
    pub name: String,
    pub tensors: Vec<TensorDesc>,
    pub operations: Vec<OpDesc>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub name: String,
    pub dtype: DataType,
    pub shape: Shape,
    #[serde(default)]
    pub axis_order: AxisOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<i64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    #[serde(rename = "type")]
    pub op_type: OpType,
    #[serde(default)]
    pub attr: Attr,
    #[serde(default)]
    pub kernel: Kernel,
    #[serde(default)]
    pub rounding: RoundMode,
    #[serde(default)]
    pub inputs: Vec<ConnectionDesc>,
    #[serde(default)]
    pub outputs: Vec<ConnectionDesc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDesc {
    pub usage: TensorUsage,
    pub tensor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Shape>,
    #[serde(default)]
    pub quantization: Quantization,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice: Option<TensorSlice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transpose: Option<TransposeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse: Option<ReverseType>,
}

impl GraphDesc {
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let text = std::fs::read_to_string(path).map_err(|source| GraphError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// BLAKE3 digest of the compact JSON form. Two descriptions with the
    /// same tensors, operations and boundary lists hash identically.
    pub fn fingerprint(&self) -> Result<blake3::Hash, GraphError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(blake3::hash(&bytes))
    }

    /// One line per operation type with its count, sorted by name.
    pub fn summary(&self) -> String {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for op in &self.operations {
            *counts.entry(op.op_type.to_string()).or_default() += 1;
        }
        let mut out = format!(
            "{}: {} ops, {} tensors\n",
            self.name,
            self.operations.len(),
            self.tensors.len()
        );
        for (name, count) in counts {
            out.push_str(&format!("  {:<24} {}\n", name, count));
        }
        out
    }

    /// Instantiate the description as a connected graph.
    pub fn build(&self) -> Result<Graph, GraphError> {
        let mut graph = Graph::new(self.name.clone());
        let mut ids: HashMap<&str, TensorId> = HashMap::new();
        for t in &self.tensors {
            if ids.contains_key(t.name.as_str()) {
                return Err(GraphError::DuplicateTensor(t.name.clone()));
            }
            let mut tensor = Tensor::new(t.name.clone(), t.dtype, t.shape.clone());
            tensor.axis_order = t.axis_order;
            tensor.buffer = t.values.clone().map(Buffer::new);
            ids.insert(t.name.as_str(), graph.add_tensor(tensor));
        }
        let lookup = |name: &str| {
            ids.get(name)
                .copied()
                .ok_or_else(|| GraphError::UnknownTensor(name.to_string()))
        };

        for o in &self.operations {
            let op = graph.add_op_with(o.op_type, o.attr.clone());
            graph.op_mut(op).kernel = o.kernel;
            graph.op_mut(op).rounding = o.rounding;
            for c in &o.inputs {
                let conn = graph.connect_input(op, c.usage, lookup(&c.tensor)?);
                c.apply(conn);
            }
            for c in &o.outputs {
                let conn = graph.connect_output(op, c.usage, lookup(&c.tensor)?);
                c.apply(conn);
            }
        }
        for name in &self.inputs {
            graph.add_input(lookup(name)?);
        }
        for name in &self.outputs {
            graph.add_output(lookup(name)?);
        }
        Ok(graph)
    }

    /// Describe the live operations of `graph` and every tensor they use.
    ///
    /// Rules may create several tensors with the same name; later ones get
    /// a `_1`, `_2`, ... suffix so the description stays addressable.
    pub fn from_graph(graph: &Graph) -> Self {
        let order = graph
            .execution_order()
            .unwrap_or_else(|_| graph.live_ops().collect());
        let mut used: BTreeSet<TensorId> = graph.inputs().iter().copied().collect();
        used.extend(graph.outputs().iter().copied());
        for &id in &order {
            let op = graph.op(id);
            used.extend(op.inputs().chain(op.outputs()).map(|(_, c)| c.tensor()));
        }
        let names = unique_names(graph, &used);

        let operations = order
            .iter()
            .map(|&id| {
                let op = graph.op(id);
                let describe = |(usage, conn): (TensorUsage, &TensorConnection)| {
                    ConnectionDesc::from_connection(graph, &names[&conn.tensor()], usage, conn)
                };
                OpDesc {
                    op_type: op.op_type,
                    attr: op.attr.clone(),
                    kernel: op.kernel,
                    rounding: op.rounding,
                    inputs: op.inputs().map(describe).collect(),
                    outputs: op.outputs().map(describe).collect(),
                }
            })
            .collect();

        let tensors = used
            .iter()
            .map(|id| {
                let t = graph.tensor(*id);
                TensorDesc {
                    name: names[id].clone(),
                    dtype: t.dtype,
                    shape: t.storage_shape.clone(),
                    axis_order: t.axis_order,
                    values: t.values().map(<[i64]>::to_vec),
                }
            })
            .collect();

        let boundary = |ids: &[TensorId]| -> Vec<String> {
            ids.iter().map(|t| names[t].clone()).collect()
        };
        GraphDesc {
            name: graph.name.clone(),
            tensors,
            operations,
            inputs: boundary(graph.inputs()),
            outputs: boundary(graph.outputs()),
        }
    }
}

/// Map every tensor in `used` to a name no other tensor in the set has.
fn unique_names(graph: &Graph, used: &BTreeSet<TensorId>) -> HashMap<TensorId, String> {
    let mut taken: BTreeSet<String> = BTreeSet::new();
    let mut names = HashMap::with_capacity(used.len());
    for &id in used {
        let base = &graph.tensor(id).name;
        let mut name = base.clone();
        let mut n = 1;
        while taken.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        taken.insert(name.clone());
        names.insert(id, name);
    }
    names
}

impl ConnectionDesc {
    fn apply(&self, conn: &mut TensorConnection) {
        if let Some(shape) = &self.shape {
            conn.shape = shape.clone();
        }
        conn.quantization = self.quantization.clone();
        if let Some(slice) = &self.slice {
            conn.slice = slice.clone();
        }
        if let Some(transpose) = self.transpose {
            conn.transpose = transpose;
        }
        if let Some(reverse) = self.reverse {
            conn.reverse = reverse;
        }
    }

    fn from_connection(
        graph: &Graph,
        name: &str,
        usage: TensorUsage,
        conn: &TensorConnection,
    ) -> Self {
        let tensor = graph.tensor(conn.tensor());
        Self {
            usage,
            tensor: name.to_string(),
            shape: (conn.shape != tensor.storage_shape).then(|| conn.shape.clone()),
            quantization: conn.quantization.clone(),
            slice: (!conn.slice.is_none()).then(|| conn.slice.clone()),
            transpose: (!conn.transpose.is_none()).then_some(conn.transpose),
            reverse: (!conn.reverse.is_none()).then_some(conn.reverse),
        }
    }
}
