//! Crate root: public surface and engine-wide constants.
//!
//! This crate is the tensor engine of a relativistic Fock-space multireference
//! coupled-cluster program. It implements a diagram algebra over block-sparse,
//! symmetry-adapted, antisymmetric tensors ("diagrams"), stored either in
//! memory or on disk, with all number crunching funneled through a small
//! arithmetic facade.
//!
//! ## Invariants
//!
//! - **DPD.** Every non-dummy block of a diagram satisfies the direct product
//!   decomposition: the product of its index irreps contains the operator
//!   irrep. Symmetry-forbidden blocks are never allocated.
//! - **Canonical orbits.** When a diagram is created permutationally unique,
//!   exactly one block per orbit of the bra/ket antisymmetrizer carries
//!   storage; the others hold only the signed permutation that recovers them.
//! - **Storage discipline.** After any mutating operation returns, every
//!   block is back in its declared storage class: in-memory buffers live,
//!   on-disk buffers flushed and freed, dummy blocks empty.
//! - **Fatality.** Shape, symmetry, grammar and I/O errors abort the
//!   calculation with a typed [`EngineError`]; there is no per-operation
//!   recovery. The calling script is deterministic, so a failure is a bug.
//!
//! All engine state is bundled into an explicit [`Engine`] context: the
//! symmetry registry, the spinor registry, the named diagram stack, the
//! options block and the memory tracker. Operations are methods on this
//! context and address diagrams by short textual names, so client code reads
//! like the diagrammatic scripts it encodes:
//!
//! ```ignore
//! let pos = engine.mark();
//! engine.reorder("phpp", "r1", "2341")?;
//! engine.mult("t2c", "r1", "r2", 1)?;
//! engine.update("r2", -1.0, "r4")?;
//! engine.restore(pos);
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod arith;
pub mod block;
pub mod compress;
pub mod diagram;
pub mod engine;
pub mod error;
pub mod heff;
pub mod mdcint;
pub mod mdprop;
pub mod memory;
pub mod mrconee;
pub mod ops;
pub mod persist;
pub mod sorting;
pub mod spinors;
pub mod stack;
pub mod symmetry;
pub mod tensor;
pub mod unformatted;

/// Values with absolute magnitude below this threshold are treated as zero
/// throughout the engine (denominator division, matrix printing, sparse
/// compression counting).
pub const ZERO_THRESH: f64 = 1e-14;

/// Maximum tensor rank supported by the diagram machinery (triples).
pub const MAX_RANK: usize = 6;

pub use crate::arith::{Arith, Scalar};
pub use crate::engine::{Engine, EngineOptions, PermUnique};
pub use crate::error::EngineError;

/// Complex double-precision scalar used whenever a complex-valued result is
/// reported regardless of the engine arithmetic (e.g. scalar products).
pub type Complex64 = num_complex::Complex64;
