//! Diagram contraction.
//!
//! `mult(a, b, target, k)` contracts the last `k` stored indices of `a`
//! with the first `k` stored indices of `b`; the target carries the outer
//! indices of `a` followed by the outer indices of `b` in natural order.
//! The walk enumerates every target block, then every internal spinor-block
//! tuple compatible with both operands, flattening each surviving pair into
//! one gemm call on the arithmetic facade.

use rayon::prelude::*;

use crate::arith::{gemm, MatOp, Scalar};
use crate::diagram::Diagram;
use crate::engine::{Engine, ParallelMode};
use crate::error::{EngineError, Result};

impl<T: Scalar> Engine<T> {
    /// Contract two diagrams into a freshly created `target`.
    pub fn mult(&mut self, a: &str, b: &str, target: &str, k: usize) -> Result<()> {
        let product = {
            let dga = self.diagram(a)?;
            let dgb = self.diagram(b)?;
            let (ra, rb) = (dga.rank, dgb.rank);
            if k == 0 || k > ra.min(rb) {
                return Err(EngineError::Configuration(format!(
                    "mult: cannot contract {k} indices of '{a}' (rank {ra}) with '{b}' (rank {rb})"
                )));
            }
            let rc = ra + rb - 2 * k;
            if rc == 0 {
                return Err(EngineError::Configuration(
                    "mult: full contraction is a scalar product, use scalar_product".into(),
                ));
            }

            // Contracted lines must run over the same quasiparticle space.
            for i in 0..k {
                if dga.qparts[ra - k + i] != dgb.qparts[i] {
                    return Err(EngineError::ShapeMismatch(format!(
                        "mult: contracted index {i} runs over '{}' in '{a}' but '{}' in '{b}'",
                        dga.qparts[ra - k + i].to_char(),
                        dgb.qparts[i].to_char()
                    )));
                }
            }

            let mut qparts = dga.qparts[..ra - k].to_vec();
            qparts.extend_from_slice(&dgb.qparts[k..]);
            let mut valence = dga.valence[..ra - k].to_vec();
            valence.extend_from_slice(&dgb.valence[k..]);
            let mut t3space = dga.t3space[..ra - k].to_vec();
            t3space.extend_from_slice(&dgb.t3space[k..]);
            let symmetry_c = self.symmetry.mul(dga.symmetry, dgb.symmetry)?;

            let mut dgc: Diagram<T> = Diagram::template_parsed(
                target,
                qparts,
                valence,
                t3space,
                (0..rc).collect(),
                false,
                symmetry_c,
                &self.env(),
            )?;

            let n_spb = self.spinors.num_blocks();
            let pool = if self.opts.parallel_mode == ParallelMode::External {
                self.pool.as_ref()
            } else {
                None
            };

            let outer_a = ra - k;
            let body = |cb: &mut crate::block::Block<T>| -> Result<()> {
                cb.load()?;
                let c_shape = cb.shape.clone();
                let m: usize = c_shape[..outer_a].iter().product();
                let n: usize = c_shape[outer_a..].iter().product();

                // Every internal spinor-block tuple; absent operand blocks
                // are symmetry zeros and are skipped.
                let mut internal = vec![0usize; k];
                loop {
                    let mut a_tuple = cb.spinor_blocks[..outer_a].to_vec();
                    a_tuple.extend_from_slice(&internal);
                    let mut b_tuple = internal.clone();
                    b_tuple.extend_from_slice(&cb.spinor_blocks[outer_a..]);

                    if let (Some(ai), Some(bi)) =
                        (dga.block_index(&a_tuple), dgb.block_index(&b_tuple))
                    {
                        let a_shape = &dga.blocks[ai].shape;
                        let b_shape = &dgb.blocks[bi].shape;
                        for i in 0..k {
                            if a_shape[outer_a + i] != b_shape[i] {
                                return Err(EngineError::ShapeMismatch(format!(
                                    "mult: contracted dimension {i} disagrees on tuple \
                                     {internal:?} ({} vs {})",
                                    a_shape[outer_a + i], b_shape[i]
                                )));
                            }
                        }
                        let kk: usize = b_shape[..k].iter().product();
                        let am: usize = a_shape[..outer_a].iter().product();
                        let bn: usize = b_shape[k..].iter().product();
                        if am != m || bn != n {
                            return Err(EngineError::ShapeMismatch(format!(
                                "mult: outer dimensions disagree with the target block \
                                 ({am}x{bn} vs {m}x{n})"
                            )));
                        }
                        if kk > 0 && m > 0 && n > 0 {
                            let adata = dga.read_block_resolved(ai)?;
                            let bdata = dgb.read_block_resolved(bi)?;
                            gemm(
                                MatOp::N,
                                MatOp::N,
                                m,
                                n,
                                kk,
                                T::one(),
                                &adata,
                                kk,
                                &bdata,
                                n,
                                T::one(),
                                cb.buf_mut()?,
                                n,
                            )?;
                        }
                    }

                    // next internal tuple
                    let mut dim = k;
                    loop {
                        if dim == 0 {
                            break;
                        }
                        dim -= 1;
                        internal[dim] += 1;
                        if internal[dim] < n_spb {
                            break;
                        }
                        internal[dim] = 0;
                    }
                    if internal.iter().all(|&t| t == 0) {
                        break;
                    }
                }
                cb.store()
            };

            match pool {
                Some(pool) => pool.install(|| {
                    dgc.blocks.par_iter_mut().try_for_each(|cb| body(cb))
                })?,
                None => dgc.blocks.iter_mut().try_for_each(body)?,
            }
            dgc
        };
        self.stack.install(product)
    }

    /// Accumulate the disconnected triples product
    /// `⟨ijk|abc⟩ += ⟨ij|ab⟩ · ⟨k|c⟩` of a rank-4 and a rank-2 diagram into
    /// `target`. The target template is created on first use and reused on
    /// subsequent calls, so several products can pile up in it.
    pub fn construct_disconnected(&mut self, src4: &str, src2: &str, target: &str) -> Result<()> {
        {
            let d4 = self.diagram(src4)?;
            let d2 = self.diagram(src2)?;
            if d4.rank != 4 || d2.rank != 2 {
                return Err(EngineError::Configuration(format!(
                    "construct_disconnected: expected rank 4 and rank 2 operands, \
                     got {} and {}",
                    d4.rank, d2.rank
                )));
            }
        }

        if !self.exists(target) {
            let (qparts, valence) = {
                let d4 = self.diagram(src4)?;
                let d2 = self.diagram(src2)?;
                let q = [
                    d4.qparts[0],
                    d4.qparts[1],
                    d2.qparts[0],
                    d4.qparts[2],
                    d4.qparts[3],
                    d2.qparts[1],
                ];
                let v = [
                    d4.valence[0],
                    d4.valence[1],
                    d2.valence[0],
                    d4.valence[2],
                    d4.valence[3],
                    d2.valence[1],
                ];
                (
                    q.iter().map(|x| x.to_char()).collect::<String>(),
                    v.iter()
                        .map(|&x| if x { '1' } else { '0' })
                        .collect::<String>(),
                )
            };
            self.tmplt(target, &qparts, &valence, "123456", crate::engine::PermUnique::No)?;
        }

        if target == src4 || target == src2 {
            return Err(EngineError::Configuration(
                "construct_disconnected: target must differ from both sources".into(),
            ));
        }

        // Walk the target's index space element by element; the products are
        // gathered under shared borrows, then applied to the target block.
        let mut rel = vec![0usize; 6];
        let mut spinor_idx = vec![0usize; 6];
        let n_blocks = self.diagram(target)?.blocks.len();
        for bi in 0..n_blocks {
            let (shape, indices, is_live) = {
                let block = &self.diagram(target)?.blocks[bi];
                (
                    block.shape.clone(),
                    block.indices.clone(),
                    block.uniqueness.is_unique && block.has_storage(),
                )
            };
            if !is_live {
                continue;
            }
            let size: usize = shape.iter().product();
            let mut updates: Vec<(usize, T)> = Vec::with_capacity(size);
            for lin in 0..size {
                crate::tensor::linear_to_index(&shape, lin, &mut rel);
                for d in 0..6 {
                    spinor_idx[d] = indices[d][rel[d]];
                }
                let v4 = self.diagram(src4)?.get(
                    &[spinor_idx[0], spinor_idx[1], spinor_idx[3], spinor_idx[4]],
                    &self.spinors,
                )?;
                let v2 = self
                    .diagram(src2)?
                    .get(&[spinor_idx[2], spinor_idx[5]], &self.spinors)?;
                let prod = v4 * v2;
                if prod.abs() > 0.0 {
                    updates.push((lin, prod));
                }
            }
            let dgt = self.diagram_mut(target)?;
            let block = &mut dgt.blocks[bi];
            block.load()?;
            {
                let buf = block.buf_mut()?;
                for (lin, v) in updates {
                    buf[lin] += v;
                }
            }
            block.store()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::minimal_engine;
    use crate::engine::PermUnique;

    #[test]
    fn rank2_times_rank2() {
        let mut eng = minimal_engine();
        eng.tmplt("f_hp", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("f_ph", "ph", "00", "12", PermUnique::No).unwrap();
        // A[i,a] = i + 10a, B[a,j] = a + j  (1-based values over 0-based indices)
        for i in 0..2usize {
            for a in 2..4usize {
                eng.set("f_hp", &[i, a], (i + 1) as f64 + 10.0 * (a + 1) as f64)
                    .unwrap();
                eng.set("f_ph", &[a, i], (a + 1) as f64 + (i + 1) as f64)
                    .unwrap();
            }
        }
        eng.mult("f_hp", "f_ph", "c_hh", 1).unwrap();
        let c = eng.diagram("c_hh").unwrap();
        assert_eq!(c.rank, 2);
        assert_eq!(c.qparts_string(), "hh");
        for i in 0..2usize {
            for j in 0..2usize {
                let mut want = 0.0;
                for a in 2..4usize {
                    want += eng.get("f_hp", &[i, a]).unwrap() * eng.get("f_ph", &[a, j]).unwrap();
                }
                assert_eq!(eng.get("c_hh", &[i, j]).unwrap(), want);
            }
        }
    }

    #[test]
    fn rank4_times_rank2_contract_one() {
        let mut eng = minimal_engine();
        eng.tmplt("v", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        eng.tmplt("g", "ph", "00", "12", PermUnique::No).unwrap();
        let mut val = 0.1;
        for i in 0..2usize {
            for j in 0..2usize {
                for a in 2..4usize {
                    for b in 2..4usize {
                        eng.set("v", &[i, j, a, b], val).unwrap();
                        val += 0.1;
                    }
                }
            }
        }
        eng.set("g", &[2, 0], 2.0).unwrap();
        eng.set("g", &[3, 1], -1.0).unwrap();
        eng.mult("v", "g", "w", 1).unwrap();
        let w = eng.diagram("w").unwrap();
        assert_eq!(w.qparts_string(), "hhph");
        for i in 0..2usize {
            for j in 0..2usize {
                for a in 2..4usize {
                    for l in 0..2usize {
                        let mut want = 0.0;
                        for b in 2..4usize {
                            want += eng.get("v", &[i, j, a, b]).unwrap()
                                * eng.get("g", &[b, l]).unwrap();
                        }
                        let got = eng.get("w", &[i, j, a, l]).unwrap();
                        assert!((got - want).abs() < 1e-12, "({i},{j},{a},{l})");
                    }
                }
            }
        }
    }

    #[test]
    fn contracted_space_mismatch_is_fatal() {
        let mut eng = minimal_engine();
        eng.tmplt("x", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("y", "hp", "00", "12", PermUnique::No).unwrap();
        // last index of x is a particle, first index of y is a hole
        assert!(eng.mult("x", "y", "z", 1).is_err());
    }

    #[test]
    fn disconnected_product_rank4_rank2() {
        let mut eng = minimal_engine();
        eng.tmplt("t2", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        eng.tmplt("t1", "hp", "00", "12", PermUnique::No).unwrap();
        eng.set("t2", &[0, 1, 2, 3], 0.5).unwrap();
        eng.set("t2", &[0, 0, 2, 2], -0.25).unwrap();
        eng.set("t1", &[1, 3], 2.0).unwrap();
        eng.set("t1", &[0, 2], -1.0).unwrap();
        eng.construct_disconnected("t2", "t1", "t3d").unwrap();
        let t3d = eng.diagram("t3d").unwrap();
        assert_eq!(t3d.qparts_string(), "hhhppp");
        for (idx6, i4, i2) in [
            ([0usize, 1, 1, 2, 3, 3], [0usize, 1, 2, 3], [1usize, 3]),
            ([0, 0, 0, 2, 2, 2], [0, 0, 2, 2], [0, 2]),
            ([0, 1, 0, 2, 3, 2], [0, 1, 2, 3], [0, 2]),
        ] {
            let want = eng.get("t2", &i4).unwrap() * eng.get("t1", &i2).unwrap();
            assert_eq!(eng.get("t3d", &idx6).unwrap(), want, "{idx6:?}");
        }
        // a second accumulation doubles the values
        eng.construct_disconnected("t2", "t1", "t3d").unwrap();
        let v = eng.get("t2", &[0, 1, 2, 3]).unwrap() * eng.get("t1", &[1, 3]).unwrap();
        assert_eq!(eng.get("t3d", &[0, 1, 1, 2, 3, 3]).unwrap(), 2.0 * v);
    }

    #[test]
    fn full_contraction_is_rejected() {
        let mut eng = minimal_engine();
        eng.tmplt("x", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("y", "ph", "00", "12", PermUnique::No).unwrap();
        assert!(eng.mult("x", "y", "z", 2).is_err());
    }
}
