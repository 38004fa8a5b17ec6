//! Arithmetic facade: one call site per BLAS verb.
//!
//! The engine is polymorphic over real and complex double-precision
//! arithmetic. Instead of the tagged `void*` dispatch of a C implementation,
//! the kernels here are monomorphized over the [`Scalar`] trait, which has
//! exactly two implementors: `f64` and `Complex64`. Everything above this
//! module (blocks, diagrams, operations) is generic over `Scalar` and never
//! touches component values directly.
//!
//! The matrix-matrix product is delegated to `ndarray::linalg::general_mat_mul`
//! over row-major views; vector kernels (`axpy`, `dot`, `argmax`) are plain
//! loops. BLAS itself is out of scope: this module *is* the thin facade the
//! rest of the engine calls.

use ndarray::{ArrayView2, ArrayViewMut2, CowArray, Ix2, ShapeBuilder};
use num_complex::Complex64;
use num_traits::{One, Zero};

use crate::error::{EngineError, Result};
use crate::ZERO_THRESH;

/// Arithmetic tag: which `Scalar` instantiation the engine runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arith {
    /// All tensors hold `f64` elements.
    Real,
    /// All tensors hold `Complex64` elements.
    Complex,
}

impl Arith {
    /// `true` for complex arithmetic.
    #[inline]
    pub fn is_complex(self) -> bool {
        matches!(self, Arith::Complex)
    }

    /// Derive the arithmetic from the source-group tag of the integral file
    /// (1 real, 2 complex, 4 quaternion) and the spin-free flag. Fully real
    /// or spin-free groups run the real engine; everything else is complex.
    pub fn from_group_tag(group_arith: i32, is_spinfree: bool) -> Arith {
        if group_arith == 1 || is_spinfree {
            Arith::Real
        } else {
            Arith::Complex
        }
    }
}

impl std::fmt::Display for Arith {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arith::Real => write!(f, "real"),
            Arith::Complex => write!(f, "complex"),
        }
    }
}

/// Element type of every tensor buffer in the engine.
///
/// The two implementors are `f64` and `Complex64`. The trait carries the
/// handful of operations the kernels need beyond ring arithmetic: real
/// scaling (amplitude factors are real even in the complex engine),
/// conjugation, magnitude, and lossless/lossy conversion to `Complex64`
/// (lossy only in the direction complex → real, which drops the imaginary
/// part and is used exclusively where the contract says so).
pub trait Scalar:
    Copy
    + Send
    + Sync
    + 'static
    + std::fmt::Debug
    + PartialEq
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<Output = Self>
    + std::ops::Neg<Output = Self>
    + std::ops::AddAssign
    + std::ops::SubAssign
    + std::ops::MulAssign
    + Zero
    + One
    + ndarray::LinalgScalar
{
    /// Which engine arithmetic this type realizes.
    const ARITH: Arith;

    /// Embed a real number.
    fn from_re(x: f64) -> Self;

    /// Real part.
    fn re(self) -> f64;

    /// Imaginary part (0 for the real engine).
    fn im(self) -> f64;

    /// Complex conjugate (identity for the real engine).
    fn conj(self) -> Self;

    /// Absolute magnitude.
    fn abs(self) -> f64;

    /// Multiply by a real factor.
    fn scale_re(self, a: f64) -> Self;

    /// Divide by a real denominator (component-wise).
    fn div_re(self, d: f64) -> Self;

    /// Widen to `Complex64` (exact).
    fn into_c64(self) -> Complex64;

    /// Narrow from `Complex64`. For `f64` this keeps the real part only;
    /// callers rely on that exact behavior (e.g. imaginary denominator
    /// shifts applied in the real engine).
    fn from_c64(z: Complex64) -> Self;
}

impl Scalar for f64 {
    const ARITH: Arith = Arith::Real;

    #[inline]
    fn from_re(x: f64) -> Self {
        x
    }

    #[inline]
    fn re(self) -> f64 {
        self
    }

    #[inline]
    fn im(self) -> f64 {
        0.0
    }

    #[inline]
    fn conj(self) -> Self {
        self
    }

    #[inline]
    fn abs(self) -> f64 {
        f64::abs(self)
    }

    #[inline]
    fn scale_re(self, a: f64) -> Self {
        self * a
    }

    #[inline]
    fn div_re(self, d: f64) -> Self {
        self / d
    }

    #[inline]
    fn into_c64(self) -> Complex64 {
        Complex64::new(self, 0.0)
    }

    #[inline]
    fn from_c64(z: Complex64) -> Self {
        z.re
    }
}

impl Scalar for Complex64 {
    const ARITH: Arith = Arith::Complex;

    #[inline]
    fn from_re(x: f64) -> Self {
        Complex64::new(x, 0.0)
    }

    #[inline]
    fn re(self) -> f64 {
        self.re
    }

    #[inline]
    fn im(self) -> f64 {
        self.im
    }

    #[inline]
    fn conj(self) -> Self {
        Complex64::conj(&self)
    }

    #[inline]
    fn abs(self) -> f64 {
        self.norm()
    }

    #[inline]
    fn scale_re(self, a: f64) -> Self {
        Complex64::new(self.re * a, self.im * a)
    }

    #[inline]
    fn div_re(self, d: f64) -> Self {
        Complex64::new(self.re / d, self.im / d)
    }

    #[inline]
    fn into_c64(self) -> Complex64 {
        self
    }

    #[inline]
    fn from_c64(z: Complex64) -> Self {
        z
    }
}

// ============================================================================
// Vector kernels
// ============================================================================

/// `y ← α·x + y`. The factor is real even for complex vectors; the
/// multiplication is real-by-complex.
pub fn axpy<T: Scalar>(alpha: f64, x: &[T], y: &mut [T]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x.iter()) {
        *yi += xi.scale_re(alpha);
    }
}

/// `z ← α·x + β·y` with scalar factors of the ambient type.
pub fn axpby<T: Scalar>(alpha: T, x: &[T], beta: T, y: &[T], z: &mut [T]) {
    debug_assert_eq!(x.len(), y.len());
    debug_assert_eq!(x.len(), z.len());
    for i in 0..z.len() {
        z[i] = alpha * x[i] + beta * y[i];
    }
}

/// Scalar product `Σᵢ op(xᵢ)·op(yᵢ)` with optional conjugation of either
/// operand. The result is complex-valued; in the real engine its imaginary
/// part is exactly zero.
pub fn dot<T: Scalar>(conj_x: bool, conj_y: bool, x: &[T], y: &[T]) -> Complex64 {
    debug_assert_eq!(x.len(), y.len());
    let mut acc = T::zero();
    match (conj_x, conj_y) {
        (false, false) => {
            for (a, b) in x.iter().zip(y.iter()) {
                acc += *a * *b;
            }
        }
        (true, false) => {
            for (a, b) in x.iter().zip(y.iter()) {
                acc += a.conj() * *b;
            }
        }
        (false, true) => {
            for (a, b) in x.iter().zip(y.iter()) {
                acc += *a * b.conj();
            }
        }
        (true, true) => {
            for (a, b) in x.iter().zip(y.iter()) {
                acc += a.conj() * b.conj();
            }
        }
    }
    acc.into_c64()
}

/// Index and magnitude of the largest-magnitude element. Empty input yields
/// `(0, 0.0)`.
pub fn argmax<T: Scalar>(x: &[T]) -> (usize, f64) {
    let mut best = (0usize, 0.0f64);
    for (i, v) in x.iter().enumerate() {
        let a = v.abs();
        if a > best.1 {
            best = (i, a);
        }
    }
    best
}

/// Index and magnitude of the largest element-wise difference `|xᵢ − yᵢ|`.
pub fn argmax_diff<T: Scalar>(x: &[T], y: &[T]) -> (usize, f64) {
    debug_assert_eq!(x.len(), y.len());
    let mut best = (0usize, 0.0f64);
    for i in 0..x.len() {
        let a = (x[i] - y[i]).abs();
        if a > best.1 {
            best = (i, a);
        }
    }
    best
}

/// In-place complex conjugation of a vector (no-op in the real engine).
pub fn conj_vector<T: Scalar>(x: &mut [T]) {
    if T::ARITH.is_complex() {
        for v in x.iter_mut() {
            *v = v.conj();
        }
    }
}

// ============================================================================
// Matrix kernels
// ============================================================================

/// Operand transformation for [`gemm`]: none, transpose, conjugate transpose.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatOp {
    N,
    T,
    C,
}

impl MatOp {
    /// Parse the one-letter BLAS convention ("N", "T", "C", case-insensitive).
    pub fn parse(s: &str) -> Result<MatOp> {
        match s {
            "N" | "n" => Ok(MatOp::N),
            "T" | "t" => Ok(MatOp::T),
            "C" | "c" => Ok(MatOp::C),
            _ => Err(EngineError::Configuration(format!(
                "unknown matrix operation '{s}' (allowed: N, T, C)"
            ))),
        }
    }
}

fn view_2d<T: Scalar>(buf: &[T], rows: usize, cols: usize, ld: usize) -> Result<ArrayView2<'_, T>> {
    ArrayView2::from_shape((rows, cols).strides((ld, 1)), buf).map_err(|e| {
        EngineError::ShapeMismatch(format!("gemm operand {rows}x{cols} (ld={ld}): {e}"))
    })
}

/// Row-major `C ← α·op(A)·op(B) + β·C`, with `op(A)` of shape `m×k` and
/// `op(B)` of shape `k×n`. Leading dimensions refer to the *stored* layout:
/// `op(A) = Aᵀ` means `A` is stored `k×m` with leading dimension `lda`.
#[allow(clippy::too_many_arguments)]
pub fn gemm<T: Scalar>(
    op_a: MatOp,
    op_b: MatOp,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    lda: usize,
    b: &[T],
    ldb: usize,
    beta: T,
    c: &mut [T],
    ldc: usize,
) -> Result<()> {
    let a_view: CowArray<'_, T, Ix2> = match op_a {
        MatOp::N => view_2d(a, m, k, lda)?.into(),
        MatOp::T => view_2d(a, k, m, lda)?.reversed_axes().into(),
        MatOp::C => {
            let conj = view_2d(a, k, m, lda)?.mapv(Scalar::conj);
            conj.reversed_axes().into()
        }
    };
    let b_view: CowArray<'_, T, Ix2> = match op_b {
        MatOp::N => view_2d(b, k, n, ldb)?.into(),
        MatOp::T => view_2d(b, n, k, ldb)?.reversed_axes().into(),
        MatOp::C => {
            let conj = view_2d(b, n, k, ldb)?.mapv(Scalar::conj);
            conj.reversed_axes().into()
        }
    };
    let mut c_view = ArrayViewMut2::from_shape((m, n).strides((ldc, 1)), c)
        .map_err(|e| EngineError::ShapeMismatch(format!("gemm target {m}x{n} (ld={ldc}): {e}")))?;

    ndarray::linalg::general_mat_mul(alpha, &a_view, &b_view, beta, &mut c_view);
    Ok(())
}

/// Operation selector for [`matcopy`]: copy, transpose, conjugate transpose,
/// conjugate in place.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CopyOp {
    N,
    T,
    C,
    R,
}

/// `B ← op(A)` for a row-major `rows×cols` matrix.
///
/// Out-of-place copies into `b`; the in-place variant is [`matcopy_inplace`].
pub fn matcopy<T: Scalar>(op: CopyOp, rows: usize, cols: usize, a: &[T], b: &mut [T]) {
    debug_assert!(a.len() >= rows * cols && b.len() >= rows * cols);
    match op {
        CopyOp::N => b[..rows * cols].copy_from_slice(&a[..rows * cols]),
        CopyOp::R => {
            for (dst, src) in b.iter_mut().zip(a.iter()) {
                *dst = src.conj();
            }
        }
        CopyOp::T => {
            for i in 0..rows {
                for j in 0..cols {
                    b[j * rows + i] = a[i * cols + j];
                }
            }
        }
        CopyOp::C => {
            for i in 0..rows {
                for j in 0..cols {
                    b[j * rows + i] = a[i * cols + j].conj();
                }
            }
        }
    }
}

/// In-place `A ← op(A)` using a cycle-following transposition, so no second
/// full-size buffer is required for `T`/`C`.
pub fn matcopy_inplace<T: Scalar>(op: CopyOp, rows: usize, cols: usize, a: &mut [T]) {
    debug_assert!(a.len() >= rows * cols);
    match op {
        CopyOp::N => {}
        CopyOp::R => conj_all(a),
        CopyOp::T => transpose_inplace(a, rows, cols),
        CopyOp::C => {
            transpose_inplace(a, rows, cols);
            conj_all(a);
        }
    }
}

fn conj_all<T: Scalar>(a: &mut [T]) {
    for v in a.iter_mut() {
        *v = v.conj();
    }
}

/// Cycle-following in-place transposition of a row-major `rows×cols` matrix.
fn transpose_inplace<T: Scalar>(a: &mut [T], rows: usize, cols: usize) {
    let n = rows * cols;
    if n == 0 {
        return;
    }
    let mut visited = vec![false; n];
    for start in 1..n - 1 {
        if visited[start] {
            continue;
        }
        // Follow the permutation cycle: element at `pos` moves to
        // (pos % cols) * rows + pos / cols in the transposed layout.
        let mut pos = start;
        let mut carried = a[start];
        loop {
            let dst = (pos % cols) * rows + pos / cols;
            visited[pos] = true;
            if dst == start {
                a[dst] = carried;
                break;
            }
            let tmp = a[dst];
            a[dst] = carried;
            carried = tmp;
            pos = dst;
        }
    }
}

/// Print a row-major matrix to standard output; elements whose magnitude is
/// below [`ZERO_THRESH`] are shown as zero. Intended for debugging only.
pub fn print_matrix<T: Scalar>(a: &[T], rows: usize, cols: usize, caption: &str) {
    println!(" matrix {caption} ({rows} x {cols})");
    for i in 0..rows {
        for j in 0..cols {
            let v = a[i * cols + j];
            let (re, im) = if v.abs() < ZERO_THRESH {
                (0.0, 0.0)
            } else {
                (v.re(), v.im())
            };
            if T::ARITH.is_complex() {
                print!("{re:14.6e}{im:14.6e}  ");
            } else {
                print!("{re:14.6e} ");
            }
        }
        println!();
    }
}

// ============================================================================
// Tests
// ============================================================================
