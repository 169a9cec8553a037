//! Tensor shapes and sub-regions.
//!
//! Axes are stored outermost first. Named accessors (`depth`, `width`,
//! `height`, `batch`) count from the innermost end and read as 1 when
//! the shape has fewer axes.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<i32>);

impl Shape {
    pub fn new(dims: impl Into<Vec<i32>>) -> Self {
        Shape(dims.into())
    }

    /// A shape of `rank` axes all set to `value`.
    pub fn filled(rank: usize, value: i32) -> Self {
        Shape(vec![value; rank])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn dims(&self) -> &[i32] {
        &self.0
    }

    /// Total number of elements (1 for a scalar shape).
    pub fn elements(&self) -> i64 {
        self.0.iter().map(|&d| d as i64).product()
    }

    /// Axis `i` counted from the innermost end, 1 when absent.
    pub fn from_end(&self, i: usize) -> i32 {
        if i < self.0.len() {
            self.0[self.0.len() - 1 - i]
        } else {
            1
        }
    }

    pub fn depth(&self) -> i32 {
        self.from_end(0)
    }

    pub fn width(&self) -> i32 {
        self.from_end(1)
    }

    pub fn height(&self) -> i32 {
        self.from_end(2)
    }

    pub fn batch(&self) -> i32 {
        self.from_end(3)
    }

    /// Set axis `i` counted from the innermost end, padding with ones.
    pub fn with_from_end(&self, i: usize, value: i32) -> Shape {
        let mut out = self.pad_axes(i + 1, 1);
        let idx = out.0.len() - 1 - i;
        out.0[idx] = value;
        out
    }

    pub fn with_depth(&self, value: i32) -> Shape {
        self.with_from_end(0, value)
    }

    pub fn with_width(&self, value: i32) -> Shape {
        self.with_from_end(1, value)
    }

    pub fn with_height(&self, value: i32) -> Shape {
        self.with_from_end(2, value)
    }

    pub fn with_batch(&self, value: i32) -> Shape {
        self.with_from_end(3, value)
    }

    pub fn with_zeros(&self) -> Shape {
        Shape(vec![0; self.0.len()])
    }

    pub fn with_ones(&self) -> Shape {
        Shape(vec![1; self.0.len()])
    }

    /// Prepend `fill` until the shape has at least `rank` axes.
    pub fn pad_axes(&self, rank: usize, fill: i32) -> Shape {
        if self.0.len() >= rank {
            return self.clone();
        }
        let mut dims = vec![fill; rank - self.0.len()];
        dims.extend_from_slice(&self.0);
        Shape(dims)
    }

    pub fn erase(&self, axis: usize) -> Shape {
        let mut dims = self.0.clone();
        dims.remove(axis);
        Shape(dims)
    }

    pub fn insert(&self, axis: usize, value: i32) -> Shape {
        let mut dims = self.0.clone();
        dims.insert(axis, value);
        Shape(dims)
    }

    /// Select the listed axes in the given order.
    pub fn extract(&self, axes: &[usize]) -> Shape {
        Shape(axes.iter().map(|&a| self.0[a]).collect())
    }

    /// Product of all axes before `axis`, the axis itself, and all axes
    /// after it.
    pub fn around_axis(&self, axis: usize) -> Shape {
        let outer: i32 = self.0[..axis].iter().product();
        let inner: i32 = self.0[axis + 1..].iter().product();
        Shape(vec![outer, self.0[axis], inner])
    }

    pub fn mul_elementwise(&self, other: &Shape) -> Shape {
        Shape(self.0.iter().zip(&other.0).map(|(a, b)| a * b).collect())
    }

    /// Numpy-style broadcast of two shapes aligned at the innermost axis.
    pub fn broadcast(a: &Shape, b: &Shape) -> Shape {
        let rank = a.rank().max(b.rank());
        let a = a.pad_axes(rank, 1);
        let b = b.pad_axes(rank, 1);
        Shape(a.0.iter().zip(&b.0).map(|(&x, &y)| x.max(y)).collect())
    }

    /// Row-major strides for element addressing.
    pub fn strides(&self) -> Vec<i64> {
        let mut strides = vec![1i64; self.0.len()];
        for i in (0..self.0.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1] as i64;
        }
        strides
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.0.iter().copied()
    }
}

impl From<Vec<i32>> for Shape {
    fn from(dims: Vec<i32>) -> Self {
        Shape(dims)
    }
}

impl From<&[i32]> for Shape {
    fn from(dims: &[i32]) -> Self {
        Shape(dims.to_vec())
    }
}

impl<const N: usize> From<[i32; N]> for Shape {
    fn from(dims: [i32; N]) -> Self {
        Shape(dims.to_vec())
    }
}

impl Index<usize> for Shape {
    type Output = i32;
    fn index(&self, i: usize) -> &i32 {
        &self.0[i]
    }
}

impl IndexMut<usize> for Shape {
    fn index_mut(&mut self, i: usize) -> &mut i32 {
        &mut self.0[i]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

/// Partial read/write region of a tensor connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSlice {
    pub offset: Shape,
    pub shape: Shape,
}

impl TensorSlice {
    pub fn new(offset: Shape, shape: Shape) -> Self {
        Self { offset, shape }
    }

    pub fn is_none(&self) -> bool {
        self.offset.is_empty() && self.shape.is_empty()
    }
}

/// Two-dimensional quantity with `x` as width and `y` as height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point2 {
    pub x: i32,
    pub y: i32,
}

impl Point2 {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_axes_from_end() {
        let s = Shape::from([2, 3, 4, 5]);
        assert_eq!(s.batch(), 2);
        assert_eq!(s.height(), 3);
        assert_eq!(s.width(), 4);
        assert_eq!(s.depth(), 5);
        let short = Shape::from([7]);
        assert_eq!(short.height(), 1);
        assert_eq!(short.depth(), 7);
    }

    #[test]
    fn test_with_height_pads_rank() {
        let s = Shape::from([4, 5]).with_height(3);
        assert_eq!(s, Shape::from([3, 4, 5]));
    }

    #[test]
    fn test_around_axis() {
        let s = Shape::from([2, 3, 4, 5]);
        assert_eq!(s.around_axis(1), Shape::from([2, 3, 20]));
        assert_eq!(s.around_axis(3), Shape::from([24, 5, 1]));
    }

    #[test]
    fn test_broadcast() {
        // Axes align innermost; the shorter shape is padded with ones.
        let a = Shape::from([1, 4, 1]);
        let b = Shape::from([3]);
        assert_eq!(Shape::broadcast(&a, &b), Shape::from([1, 4, 3]));
        assert_eq!(Shape::broadcast(&b, &a), Shape::from([1, 4, 3]));
        assert_eq!(Shape::broadcast(&a, &b).elements(), 12);
        let c = Shape::from([2, 1, 5]);
        let d = Shape::from([4, 1]);
        assert_eq!(Shape::broadcast(&c, &d), Shape::from([2, 4, 5]));
        assert_eq!(Shape::broadcast(&c, &Shape::default()), c);
    }

    #[test]
    fn test_strides() {
        assert_eq!(Shape::from([2, 3, 4]).strides(), vec![12, 4, 1]);
    }
}
