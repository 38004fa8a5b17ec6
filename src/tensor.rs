//! Dense tensor primitives: row-major index arithmetic and element access.
//!
//! All diagram blocks store their elements in row-major order. The two
//! reciprocal functions below convert between a linear offset and a compound
//! (per-dimension) index using the stride vector of trailing-dimension
//! products. Element getters and setters are bounds-checked and silently
//! no-op / return zero when the index is out of range: diagram-level setters
//! use this to probe whether a requested spinor tuple belongs to the current
//! tile without a separate membership test.

use crate::arith::Scalar;
use crate::MAX_RANK;

/// Total number of elements of a tensor with the given shape.
#[inline]
pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Stride vector of a row-major tensor: `stride[i] = Π_{j>i} shape[j]`.
pub fn strides(shape: &[usize]) -> [usize; MAX_RANK] {
    let rank = shape.len();
    let mut coef = [1usize; MAX_RANK];
    for i in (0..rank.saturating_sub(1)).rev() {
        coef[i] = coef[i + 1] * shape[i + 1];
    }
    coef
}

/// Compound index → linear offset.
#[inline]
pub fn index_to_linear(shape: &[usize], idx: &[usize]) -> usize {
    debug_assert_eq!(shape.len(), idx.len());
    let coef = strides(shape);
    idx.iter().zip(coef.iter()).map(|(i, c)| i * c).sum()
}

/// Linear offset → compound index (inverse of [`index_to_linear`]).
pub fn linear_to_index(shape: &[usize], mut linear: usize, idx: &mut [usize]) {
    debug_assert_eq!(shape.len(), idx.len());
    let coef = strides(shape);
    for i in 0..shape.len() {
        idx[i] = linear / coef[i];
        linear %= coef[i];
    }
}

/// Whether a compound index lies inside the shape.
#[inline]
pub fn index_in_range(shape: &[usize], idx: &[usize]) -> bool {
    idx.iter().zip(shape.iter()).all(|(i, d)| i < d)
}

/// Element read; out-of-range indices yield zero.
pub fn get_element<T: Scalar>(buf: &[T], shape: &[usize], idx: &[usize]) -> T {
    if !index_in_range(shape, idx) {
        return T::zero();
    }
    buf[index_to_linear(shape, idx)]
}

/// Element write; out-of-range indices are silently skipped.
pub fn set_element<T: Scalar>(buf: &mut [T], shape: &[usize], idx: &[usize], value: T) {
    if !index_in_range(shape, idx) {
        return;
    }
    let lin = index_to_linear(shape, idx);
    buf[lin] = value;
}

/// Element accumulate; out-of-range indices are silently skipped.
pub fn add_element<T: Scalar>(buf: &mut [T], shape: &[usize], idx: &[usize], value: T) {
    if !index_in_range(shape, idx) {
        return;
    }
    let lin = index_to_linear(shape, idx);
    buf[lin] += value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_round_trip_rank4() {
        let shape = [2usize, 3, 4, 5];
        let size = num_elements(&shape);
        let mut idx = [0usize; 4];
        for lin in 0..size {
            linear_to_index(&shape, lin, &mut idx);
            assert_eq!(index_to_linear(&shape, &idx), lin);
        }
    }

    #[test]
    fn stride_vector_matches_manual() {
        let shape = [4usize, 3, 2];
        let coef = strides(&shape);
        assert_eq!(&coef[..3], &[6, 2, 1]);
    }

    #[test]
    fn out_of_range_access_is_silent() {
        let shape = [2usize, 2];
        let mut buf = vec![0.0f64; 4];
        set_element(&mut buf, &shape, &[1, 5], 3.0);
        assert!(buf.iter().all(|&v| v == 0.0));
        assert_eq!(get_element(&buf, &shape, &[5, 0]), 0.0);
    }

    #[test]
    fn set_then_get() {
        let shape = [2usize, 3];
        let mut buf = vec![0.0f64; 6];
        set_element(&mut buf, &shape, &[1, 2], 7.5);
        assert_eq!(get_element(&buf, &shape, &[1, 2]), 7.5);
        assert_eq!(buf[5], 7.5);
    }
}
