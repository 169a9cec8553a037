//! Constant tensor storage.
//!
//! Values are held as integers in row-major element order regardless of
//! the tensor's element type; packed int4 tensors keep one packed byte per
//! entry until they are unpacked.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Buffer {
    values: Vec<i64>,
}

impl Buffer {
    pub fn new(values: Vec<i64>) -> Self {
        Self { values }
    }

    pub fn from_i32(values: &[i32]) -> Self {
        Self::new(values.iter().map(|&v| v as i64).collect())
    }

    /// Buffer of `len` copies of `value`.
    pub fn splat(value: i64, len: usize) -> Self {
        Self::new(vec![value; len])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [i64] {
        &mut self.values
    }

    pub fn get(&self, i: usize) -> Option<i64> {
        self.values.get(i).copied()
    }

    /// Values narrowed to `i32`, as used for shape-like parameter tensors.
    pub fn as_i32(&self) -> Vec<i32> {
        self.values.iter().map(|&v| v as i32).collect()
    }
}

impl From<Vec<i64>> for Buffer {
    fn from(values: Vec<i64>) -> Self {
        Self::new(values)
    }
}
