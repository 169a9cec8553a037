//! Constant folding of elementwise operators.

use crate::ir::{DataType, OpType, Shape};

/// Expand `values` (laid out as `shape`) to `target` by repeating along
/// every axis where `shape` has extent 1. Shapes are aligned innermost.
pub fn broadcast_values(values: &[i64], shape: &Shape, target: &Shape) -> Vec<i64> {
    let shape = shape.pad_axes(target.rank(), 1);
    let in_strides = shape.strides();
    let count = target.elements().max(0) as usize;
    let mut out = Vec::with_capacity(count);
    let mut pos = vec![0i32; target.rank()];
    let mut in_index = 0i64;
    for _ in 0..count {
        out.push(values.get(in_index as usize).copied().unwrap_or(0));
        // Step the output position, tracking the input offset alongside.
        for axis in (0..target.rank()).rev() {
            pos[axis] += 1;
            let follows = shape[axis] == target[axis];
            if follows {
                in_index += in_strides[axis];
            }
            if pos[axis] < target[axis] {
                break;
            }
            if follows {
                in_index -= in_strides[axis] * target[axis] as i64;
            }
            pos[axis] = 0;
        }
    }
    out
}

/// `a << b` evaluated at the width of `dtype`, wrapping like the hardware.
fn shl(dtype: DataType, a: i64, b: i64) -> Option<i64> {
    let shifted = |bits: u32| -> i64 {
        if !(0..bits as i64).contains(&b) {
            return 0;
        }
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        let raw = ((a as u64) << b) & mask;
        // Sign-extend back from the element width.
        ((raw << (64 - bits)) as i64) >> (64 - bits)
    };
    match dtype {
        DataType::Int8 => Some(shifted(8)),
        DataType::Int16 => Some(shifted(16)),
        DataType::Int32 => Some(shifted(32)),
        _ => None,
    }
}

/// Evaluate a binary elementwise operator whose operands are both
/// constant. `None` when the operator or output type cannot be folded.
pub fn fold_binary(
    op_type: OpType,
    dtype: DataType,
    (a, a_shape): (&[i64], &Shape),
    (b, b_shape): (&[i64], &Shape),
    out_shape: &Shape,
) -> Option<Vec<i64>> {
    let f = match op_type {
        OpType::Shl => shl,
        _ => return None,
    };
    let a = broadcast_values(a, a_shape, out_shape);
    let b = broadcast_values(b, b_shape, out_shape);
    a.iter().zip(&b).map(|(&x, &y)| f(dtype, x, y)).collect()
}
