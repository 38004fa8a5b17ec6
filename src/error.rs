//! Engine-wide error taxonomy.
//!
//! Every failure in the engine is fatal to the calculation: the calling
//! script is deterministic, so a shape mismatch or an unknown diagram name
//! means a bug in the method code, not a recoverable condition. The variants
//! below partition failures into the five kinds the engine distinguishes;
//! each carries enough context (diagram names, metadata) to identify the
//! offending operation from the message alone.

use std::path::PathBuf;

/// Fatal engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Unknown diagram name, malformed pattern string, unknown permutation
    /// grammar, incompatible arithmetic on file read, bad option value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rank/qparts/valence/t3space/irrep disagreement between paired
    /// diagrams, or a size mismatch between paired blocks.
    #[error("shape/symmetry mismatch: {0}")]
    ShapeMismatch(String),

    /// Allocator ceiling exceeded, or an on-disk block file cannot be
    /// created or extended.
    #[error("resource exhaustion: {0}")]
    Resource(String),

    /// Internal consistency violation: multiplication-table lookup out of
    /// range, inverse-index collision, uniqueness-orbit inconsistency.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Truncated integral file, record length prefix/suffix mismatch,
    /// unrecognized property label, failed block file I/O.
    #[error("i/o error on {path:?}: {message}")]
    Io { path: PathBuf, message: String },
}

impl EngineError {
    /// Unknown-diagram helper used by every name-addressed operation.
    pub fn no_such_diagram(op: &str, name: &str) -> Self {
        EngineError::Configuration(format!("{op}: diagram '{name}' not found"))
    }

    /// Attach a path to a raw I/O failure.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Shorthand used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
