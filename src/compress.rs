//! Sparse compression of triples amplitudes.
//!
//! Rank-6 blocks kept in memory may be stored as a length-prefixed sparse
//! array of `(linear index, value)` pairs instead of the dense buffer.
//! Values may optionally be narrowed from double to single precision; the
//! narrowing is applied once at compression time, so repeated
//! compress/decompress cycles are stable. Compression is invoked by the
//! block `store` path and undone by `load` (see `block.rs`).

use crate::arith::Scalar;
use num_complex::Complex64;

/// Element width of the compressed representation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Width {
    /// Keep full double precision.
    F64,
    /// Narrow each real component to single precision.
    F32,
}

/// Sparse form of a dense tile buffer.
#[derive(Clone, Debug)]
pub struct Compressed<T: Scalar> {
    size: usize,
    entries: Vec<(u64, T)>,
}

impl<T: Scalar> Compressed<T> {
    /// Number of stored non-zero elements.
    #[inline]
    pub fn num_nonzero(&self) -> usize {
        self.entries.len()
    }

    /// Dense element count of the original buffer.
    #[inline]
    pub fn dense_size(&self) -> usize {
        self.size
    }

    /// Approximate heap footprint of the sparse form in bytes.
    pub fn footprint_bytes(&self) -> usize {
        std::mem::size_of::<u64>()
            + self.entries.len() * (std::mem::size_of::<u64>() + std::mem::size_of::<T>())
    }
}

fn narrow<T: Scalar>(v: T, width: Width) -> T {
    match width {
        Width::F64 => v,
        Width::F32 => {
            let z = v.into_c64();
            T::from_c64(Complex64::new(z.re as f32 as f64, z.im as f32 as f64))
        }
    }
}

/// Compress a dense buffer: keep elements with magnitude at or above
/// `thresh`, narrowed per `width`.
pub fn compress<T: Scalar>(buf: &[T], width: Width, thresh: f64) -> Compressed<T> {
    let entries: Vec<(u64, T)> = buf
        .iter()
        .enumerate()
        .filter(|(_, v)| v.abs() >= thresh)
        .map(|(i, &v)| (i as u64, narrow(v, width)))
        .collect();
    Compressed {
        size: buf.len(),
        entries,
    }
}

/// Expand a sparse form back into a dense zero-filled buffer.
pub fn decompress<T: Scalar>(c: &Compressed<T>, out: &mut [T]) {
    debug_assert_eq!(out.len(), c.size);
    for v in out.iter_mut() {
        *v = T::zero();
    }
    for &(i, v) in &c.entries {
        out[i as usize] = v;
    }
}
