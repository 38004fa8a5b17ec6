//! Index reordering of diagrams.
//!
//! `reorder(src, dst, "1324")` builds `dst` so that position `i` of every
//! index tuple carries what position `perm[i]` carried in `src`. The
//! qparts/valence/t3space patterns and the `order` provenance vector are
//! relabeled accordingly; block data is transposed tile by tile. The
//! innermost loops are unrolled for the rank-4 and rank-6 hot cases using a
//! precomputed destination-stride vector; the generic odometer path covers
//! rank 2.

use rayon::prelude::*;

use crate::arith::Scalar;
use crate::block::inverse_perm;
use crate::diagram::{parse_order, Diagram};
use crate::engine::{Engine, ParallelMode};
use crate::error::{EngineError, Result};
use crate::tensor;

impl<T: Scalar> Engine<T> {
    /// Reorder `src` into a (re)created diagram `dst`.
    pub fn reorder(&mut self, src: &str, dst: &str, perm_str: &str) -> Result<()> {
        if src == dst {
            return Err(EngineError::Configuration(format!(
                "reorder: source and target are the same diagram '{src}'"
            )));
        }
        let perm = parse_order(perm_str)?;
        let reordered = {
            let dg_src = self.diagram(src)?;
            if perm.len() != dg_src.rank {
                return Err(EngineError::Configuration(format!(
                    "reorder: permutation '{perm_str}' does not match rank {}",
                    dg_src.rank
                )));
            }

            // Relabeled metadata: new position i inherits everything from old
            // position perm[i], including its slot in the natural layout.
            let new_qparts: Vec<_> = perm.iter().map(|&p| dg_src.qparts[p]).collect();
            let new_valence: Vec<_> = perm.iter().map(|&p| dg_src.valence[p]).collect();
            let new_t3space: Vec<_> = perm.iter().map(|&p| dg_src.t3space[p]).collect();
            let new_order: Vec<_> = perm.iter().map(|&p| dg_src.order[p]).collect();

            let mut dg_dst: Diagram<T> = Diagram::template_parsed(
                dst,
                new_qparts,
                new_valence,
                new_t3space,
                new_order,
                dg_src.only_unique,
                dg_src.symmetry,
                &self.env(),
            )?;

            let pool = if self.opts.parallel_mode == ParallelMode::External {
                self.pool.as_ref()
            } else {
                None
            };

            let inv = inverse_perm(&perm);
            let body = |db: &mut crate::block::Block<T>| -> Result<()> {
                if !db.uniqueness.is_unique {
                    return Ok(());
                }
                // Source tuple: src position j feeds dst position inv[j].
                let src_tuple: Vec<usize> =
                    inv.iter().map(|&d| db.spinor_blocks[d]).collect();
                let sbi = dg_src.block_index(&src_tuple).ok_or_else(|| {
                    EngineError::Integrity(format!(
                        "reorder: source block {src_tuple:?} missing for target {:?}",
                        db.spinor_blocks
                    ))
                })?;
                let sdata = dg_src.read_block_resolved(sbi)?;
                let src_shape = dg_src.blocks[sbi].shape.clone();
                db.load()?;
                reorder_tile(&sdata, &src_shape, db.buf_mut()?, &perm)?;
                db.store()
            };

            match pool {
                Some(pool) => pool.install(|| {
                    dg_dst
                        .blocks
                        .par_iter_mut()
                        .try_for_each(|db| body(db))
                })?,
                None => dg_dst.blocks.iter_mut().try_for_each(body)?,
            }
            dg_dst
        };
        self.stack.install(reordered)
    }

    /// The rank-4 vertex interchange `<pq|rs> → <qp|sr>`.
    pub fn interchange_electrons(&mut self, src: &str, dst: &str) -> Result<()> {
        if self.rank(src)? != 4 {
            return Err(EngineError::Configuration(format!(
                "interchange_electrons: diagram '{src}' is not a two-electron operator"
            )));
        }
        self.reorder(src, dst, "2143")
    }
}

/// Transpose one dense tile: `dst[x] = src[y]` with `x[i] = y[perm[i]]`.
///
/// The source is traversed linearly; elements scatter into the target
/// through the destination-stride vector, keyed per source dimension.
pub(crate) fn reorder_tile<T: Scalar>(
    src: &[T],
    src_shape: &[usize],
    dst: &mut [T],
    perm: &[usize],
) -> Result<()> {
    let rank = src_shape.len();
    let dst_shape: Vec<usize> = perm.iter().map(|&p| src_shape[p]).collect();
    if src.len() != tensor::num_elements(src_shape) || dst.len() != src.len() {
        return Err(EngineError::ShapeMismatch(format!(
            "reorder tile: buffer sizes disagree ({} vs {})",
            src.len(),
            dst.len()
        )));
    }
    let dcoef_by_dst = tensor::strides(&dst_shape);
    // scatter[d]: stride in the target of source dimension d
    let inv = inverse_perm(perm);
    let mut scatter = [0usize; crate::MAX_RANK];
    for d in 0..rank {
        scatter[d] = dcoef_by_dst[inv[d]];
    }

    match rank {
        4 => {
            let (d0, d1, d2, d3) = (src_shape[0], src_shape[1], src_shape[2], src_shape[3]);
            let mut lin = 0usize;
            for i0 in 0..d0 {
                let o0 = i0 * scatter[0];
                for i1 in 0..d1 {
                    let o1 = o0 + i1 * scatter[1];
                    for i2 in 0..d2 {
                        let o2 = o1 + i2 * scatter[2];
                        for i3 in 0..d3 {
                            dst[o2 + i3 * scatter[3]] = src[lin];
                            lin += 1;
                        }
                    }
                }
            }
        }
        6 => {
            let (d0, d1, d2, d3, d4, d5) = (
                src_shape[0],
                src_shape[1],
                src_shape[2],
                src_shape[3],
                src_shape[4],
                src_shape[5],
            );
            let mut lin = 0usize;
            for i0 in 0..d0 {
                let o0 = i0 * scatter[0];
                for i1 in 0..d1 {
                    let o1 = o0 + i1 * scatter[1];
                    for i2 in 0..d2 {
                        let o2 = o1 + i2 * scatter[2];
                        for i3 in 0..d3 {
                            let o3 = o2 + i3 * scatter[3];
                            for i4 in 0..d4 {
                                let o4 = o3 + i4 * scatter[4];
                                for i5 in 0..d5 {
                                    dst[o4 + i5 * scatter[5]] = src[lin];
                                    lin += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
        _ => {
            let mut idx = vec![0usize; rank];
            for (lin, v) in src.iter().enumerate() {
                tensor::linear_to_index(src_shape, lin, &mut idx);
                let mut out = 0usize;
                for d in 0..rank {
                    out += idx[d] * scatter[d];
                }
                dst[out] = *v;
            }
        }
    }
    Ok(())
}
