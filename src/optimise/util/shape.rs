//! Shape arithmetic shared by the padding and reshaping rules.

use crate::ir::Shape;

/// Total SAME padding needed along one axis.
pub fn needed_total_padding(input_size: i32, stride: i32, filter_size: i32) -> i32 {
    let out_size = (input_size + stride - 1) / stride;
    ((out_size - 1) * stride + filter_size - input_size).max(0)
}

/// Adjust an explicit trailing pad so a kernel with built-in padding
/// produces the same output as the separate pad did.
pub fn calc_pad_after(
    input_size: i32,
    stride: i32,
    filter_size: i32,
    pad_before: i32,
    pad_after: i32,
) -> i32 {
    let total = needed_total_padding(input_size, stride, filter_size);
    // The trailing pad may need to shrink depending on stride and input size.
    let remainder_diff = pad_after % stride - (total - pad_before) % stride;
    let correction = if remainder_diff >= 0 { 0 } else { stride };
    (pad_after - remainder_diff - correction).max(0)
}

/// Normalise a possibly negative axis against `rank`.
pub fn normalize_axis(axis: i32, rank: usize) -> Option<usize> {
    let axis = if axis < 0 { axis + rank as i32 } else { axis };
    (0..rank as i32).contains(&axis).then_some(axis as usize)
}

/// View `shape` as `(1, elements / (w * c), w, c)` for matrix operators.
pub fn as_matrix_4d(shape: &Shape) -> Shape {
    let w = shape.width();
    let c = shape.depth();
    Shape::from([1, (shape.elements() / (w as i64 * c as i64).max(1)) as i32, w, c])
}

/// Smallest `w >= max(n / 16, ceil(sqrt(n)))` dividing `n`, used to fold a
/// long batch into a roughly square height by width grid.
pub fn grid_width(n: i32) -> i32 {
    let mut w = (n / 16).max((n as f64).sqrt().ceil() as i32).max(1);
    while n % w != 0 {
        w += 1;
    }
    w
}
