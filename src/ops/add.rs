//! Pointwise addition of diagrams: `update` and `add`.

use rayon::prelude::*;

use crate::arith::{axpy, Scalar};
use crate::block::Block;
use crate::engine::Engine;
use crate::error::{EngineError, Result};

/// Internal scratch name for the aliasing cases of `add`.
const ADD_SCRATCH: &str = "_add_buf";

impl<T: Scalar> Engine<T> {
    /// `target ← target + factor·source`, blockwise. The factor is real even
    /// in the complex engine. Both diagrams must agree in rank, qparts,
    /// valence, t3space, operator irrep and block partition.
    pub fn update(&mut self, target: &str, factor: f64, source: &str) -> Result<()> {
        let pool = if self.opts.parallel_mode == crate::engine::ParallelMode::External {
            self.pool.as_ref()
        } else {
            None
        };
        let (dgt, dgs) = self.stack.pair_mut(target, source, "update")?;
        dgt.check_pointwise_compatible(dgs, "update")?;

        let body = |tb: &mut Block<T>| -> Result<()> {
            if !tb.uniqueness.is_unique {
                return Ok(());
            }
            let sbi = dgs.block_index(&tb.spinor_blocks).ok_or_else(|| {
                EngineError::ShapeMismatch(format!(
                    "update: block partitions differ, tuple {:?} is missing in '{}'",
                    tb.spinor_blocks, dgs.name
                ))
            })?;
            let sdata = dgs.read_block_resolved(sbi)?;
            if sdata.len() != tb.size {
                return Err(EngineError::ShapeMismatch(format!(
                    "update: size mismatch on tuple {:?} ({} vs {})",
                    tb.spinor_blocks,
                    tb.size,
                    sdata.len()
                )));
            }
            tb.load()?;
            axpy(factor, &sdata, tb.buf_mut()?);
            tb.store()
        };

        match pool {
            Some(pool) => pool.install(|| {
                dgt.blocks
                    .par_iter_mut()
                    .try_for_each(|tb| body(tb))
            }),
            None => dgt.blocks.iter_mut().try_for_each(body),
        }
    }

    /// `target ← α·a + β·b`, blockwise. Any of the three names may coincide;
    /// the aliasing cases run through a scoped scratch copy.
    pub fn add(&mut self, alpha: f64, a: &str, beta: f64, b: &str, target: &str) -> Result<()> {
        if a == b && a == target {
            // T = (α+β)·T
            let pos = self.mark();
            self.copy(a, ADD_SCRATCH)?;
            self.clear(a)?;
            self.update(a, alpha + beta, ADD_SCRATCH)?;
            self.restore(pos);
            return Ok(());
        }
        if a == target {
            // A = α·A + β·B
            let pos = self.mark();
            self.copy(a, ADD_SCRATCH)?;
            self.clear(a)?;
            self.update(a, alpha, ADD_SCRATCH)?;
            self.update(a, beta, b)?;
            self.restore(pos);
            return Ok(());
        }
        if b == target {
            // B = α·A + β·B
            let pos = self.mark();
            self.copy(b, ADD_SCRATCH)?;
            self.clear(b)?;
            self.update(b, alpha, a)?;
            self.update(b, beta, ADD_SCRATCH)?;
            self.restore(pos);
            return Ok(());
        }
        // C = α·A + β·B
        self.copy(a, target)?;
        self.clear(target)?;
        self.update(target, alpha, a)?;
        if a == b {
            self.update(target, beta, a)
        } else {
            self.update(target, beta, b)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::minimal_engine;
    use crate::engine::PermUnique;

    #[test]
    fn update_accumulates() {
        let mut eng = minimal_engine();
        eng.tmplt("t", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("s", "hp", "00", "12", PermUnique::No).unwrap();
        eng.set("t", &[0, 2], 1.0).unwrap();
        eng.set("s", &[0, 2], 2.0).unwrap();
        eng.set("s", &[1, 3], -1.0).unwrap();
        eng.update("t", 0.5, "s").unwrap();
        assert_eq!(eng.get("t", &[0, 2]).unwrap(), 2.0);
        assert_eq!(eng.get("t", &[1, 3]).unwrap(), -0.5);
    }

    #[test]
    fn update_rejects_shape_mismatch() {
        let mut eng = minimal_engine();
        eng.tmplt("t", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("s", "ph", "00", "12", PermUnique::No).unwrap();
        assert!(eng.update("t", 1.0, "s").is_err());

        eng.tmplt("v", "hp", "10", "12", PermUnique::No).unwrap();
        assert!(eng.update("t", 1.0, "v").is_err());
    }

    #[test]
    fn add_into_fresh_target() {
        let mut eng = minimal_engine();
        eng.tmplt("a", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("b", "hp", "00", "12", PermUnique::No).unwrap();
        eng.set("a", &[0, 2], 3.0).unwrap();
        eng.set("b", &[0, 2], 1.0).unwrap();
        eng.add(2.0, "a", -1.0, "b", "c").unwrap();
        assert_eq!(eng.get("c", &[0, 2]).unwrap(), 5.0);
        // operands untouched
        assert_eq!(eng.get("a", &[0, 2]).unwrap(), 3.0);
        assert_eq!(eng.get("b", &[0, 2]).unwrap(), 1.0);
    }

    #[test]
    fn add_with_aliased_target() {
        let mut eng = minimal_engine();
        eng.tmplt("a", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("b", "hp", "00", "12", PermUnique::No).unwrap();
        eng.set("a", &[1, 2], 1.0).unwrap();
        eng.set("b", &[1, 2], 10.0).unwrap();
        eng.add(1.0, "a", 0.5, "b", "a").unwrap();
        assert_eq!(eng.get("a", &[1, 2]).unwrap(), 6.0);
        eng.add(1.0, "a", 1.0, "b", "b").unwrap();
        assert_eq!(eng.get("b", &[1, 2]).unwrap(), 16.0);
    }

    #[test]
    fn add_target_aliases_both_sources() {
        // the copy-on-write scratch path of the engine
        let mut eng = minimal_engine();
        eng.tmplt("x", "hp", "00", "12", PermUnique::No).unwrap();
        eng.set("x", &[0, 3], 1.5).unwrap();
        eng.add(1.0, "x", 1.0, "x", "x").unwrap();
        assert_eq!(eng.get("x", &[0, 3]).unwrap(), 3.0);
        // the scratch diagram is reclaimed
        assert!(!eng.exists("_add_buf"));
    }
}
