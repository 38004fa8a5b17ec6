//! Largest-magnitude element queries: `findmax` and `diffmax`.

use crate::arith::{argmax, argmax_diff, Scalar};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::tensor;

impl<T: Scalar> Engine<T> {
    /// Largest absolute value in the diagram and the global spinor tuple it
    /// sits at. The scan covers unique blocks only; restored blocks differ
    /// by a sign and cannot change the maximum.
    pub fn findmax(&self, name: &str) -> Result<(f64, Vec<usize>)> {
        let dg = self.diagram(name)?;
        let mut best = 0.0f64;
        let mut best_idx = vec![0usize; dg.rank];
        for block in &dg.blocks {
            if !block.uniqueness.is_unique || !block.has_storage() {
                continue;
            }
            let data = block.read_buf()?;
            let (lin, v) = argmax(&data);
            if v > best {
                best = v;
                recover_global_index(block, lin, &mut best_idx);
            }
        }
        Ok((best, best_idx))
    }

    /// Largest absolute element-wise difference between two diagrams and
    /// its global spinor tuple.
    pub fn diffmax(&self, a: &str, b: &str) -> Result<(f64, Vec<usize>)> {
        let dga = self.diagram(a)?;
        let dgb = self.diagram(b)?;
        dga.check_pointwise_compatible(dgb, "diffmax")?;

        let mut best = 0.0f64;
        let mut best_idx = vec![0usize; dga.rank];
        for (ai, block_a) in dga.blocks.iter().enumerate() {
            if !block_a.uniqueness.is_unique {
                continue;
            }
            let bi = dgb.block_index(&block_a.spinor_blocks).ok_or_else(|| {
                EngineError::ShapeMismatch(format!(
                    "diffmax: tuple {:?} of '{a}' is missing in '{b}'",
                    block_a.spinor_blocks
                ))
            })?;
            let da = dga.read_block_resolved(ai)?;
            let db = dgb.read_block_resolved(bi)?;
            if da.len() != db.len() {
                return Err(EngineError::ShapeMismatch(format!(
                    "diffmax: paired blocks on tuple {:?} differ in size",
                    block_a.spinor_blocks
                )));
            }
            let (lin, v) = argmax_diff(&da, &db);
            if v > best {
                best = v;
                recover_global_index(block_a, lin, &mut best_idx);
            }
        }
        Ok((best, best_idx))
    }
}

/// Linear offset → compound index → global spinor tuple.
fn recover_global_index<T: Scalar>(
    block: &crate::block::Block<T>,
    lin: usize,
    out: &mut [usize],
) {
    let mut rel = vec![0usize; block.rank];
    tensor::linear_to_index(&block.shape, lin, &mut rel);
    for d in 0..block.rank {
        out[d] = block.indices[d][rel[d]];
    }
}
