//! Scalar product (full contraction) of two diagrams.

use num_complex::Complex64;

use crate::arith::{dot, Scalar};
use crate::engine::Engine;
use crate::error::{EngineError, Result};

/// Parse the one-letter conjugation flag ("N" or "C").
fn parse_conj(flag: &str, op: &str) -> Result<bool> {
    match flag {
        "N" | "n" => Ok(false),
        "C" | "c" => Ok(true),
        _ => Err(EngineError::Configuration(format!(
            "{op}: unknown conjugation flag '{flag}' (allowed: N, C)"
        ))),
    }
}

impl<T: Scalar> Engine<T> {
    /// `Σ_blocks n_equal_perms · dot(op(a), op(b))` over the stored blocks.
    ///
    /// Operands of different operator irreps give exactly zero. Mismatching
    /// block partitions (a tuple present on one side only, or paired blocks
    /// of different size) are fatal. The result is complex-valued; in the
    /// real engine its imaginary part is zero.
    pub fn scalar_product(
        &self,
        conj_a: &str,
        conj_b: &str,
        a: &str,
        b: &str,
    ) -> Result<Complex64> {
        let conj_a = parse_conj(conj_a, "scalar_product")?;
        let conj_b = parse_conj(conj_b, "scalar_product")?;
        let dga = self.diagram(a)?;
        let dgb = self.diagram(b)?;

        if dga.symmetry != dgb.symmetry {
            return Ok(Complex64::new(0.0, 0.0));
        }
        if dga.blocks.len() != dgb.blocks.len() {
            return Err(EngineError::ShapeMismatch(format!(
                "scalar_product: block partitions of '{a}' and '{b}' differ \
                 ({} vs {} blocks)",
                dga.blocks.len(),
                dgb.blocks.len()
            )));
        }

        let mut acc = Complex64::new(0.0, 0.0);
        for (ai, block_a) in dga.blocks.iter().enumerate() {
            if !block_a.uniqueness.is_unique {
                continue;
            }
            let bi = dgb.block_index(&block_a.spinor_blocks).ok_or_else(|| {
                EngineError::ShapeMismatch(format!(
                    "scalar_product: tuple {:?} of '{a}' is missing in '{b}'",
                    block_a.spinor_blocks
                ))
            })?;
            if dgb.blocks[bi].size != block_a.size {
                return Err(EngineError::ShapeMismatch(format!(
                    "scalar_product: paired blocks on tuple {:?} differ in size ({} vs {})",
                    block_a.spinor_blocks, block_a.size, dgb.blocks[bi].size
                )));
            }
            let da = dga.read_block_resolved(ai)?;
            let db = dgb.read_block_resolved(bi)?;
            let weight = block_a.uniqueness.n_equal_perms as f64;
            acc += dot(conj_a, conj_b, &da, &db) * weight;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::{minimal_engine, minimal_engine_complex};
    use crate::engine::PermUnique;
    use num_complex::Complex64;

    #[test]
    fn rank2_contraction_matches_hand_sum() {
        // Spec scenario 1: A[i,a] = i + 10a, B[a,i] = i + a (1-based);
        // holes {1,2}, particles {3,4}; the element-wise sum is 741.
        let mut eng = minimal_engine();
        eng.tmplt("A", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("B", "ph", "00", "12", PermUnique::No).unwrap();
        for i in 0..2usize {
            for a in 2..4usize {
                eng.set("A", &[i, a], (i + 1) as f64 + 10.0 * (a + 1) as f64)
                    .unwrap();
                eng.set("B", &[a, i], (i + 1) as f64 + (a + 1) as f64)
                    .unwrap();
            }
        }
        let p = eng.scalar_product("N", "N", "A", "B").unwrap();
        assert_eq!(p, Complex64::new(741.0, 0.0));
    }

    #[test]
    fn self_product_is_positive() {
        // ⟨X|X⟩ ≥ 0, and = 0 iff X = 0
        let mut eng = minimal_engine_complex();
        eng.tmplt("X", "hp", "00", "12", PermUnique::No).unwrap();
        let zero = eng.scalar_product("N", "C", "X", "X").unwrap();
        assert_eq!(zero, Complex64::new(0.0, 0.0));
        eng.set("X", &[0, 2], Complex64::new(0.5, -1.5)).unwrap();
        eng.set("X", &[1, 3], Complex64::new(-0.25, 0.0)).unwrap();
        let p = eng.scalar_product("N", "C", "X", "X").unwrap();
        assert!(p.im.abs() < 1e-15);
        let want = 0.5 * 0.5 + 1.5 * 1.5 + 0.25 * 0.25;
        assert!((p.re - want).abs() < 1e-15);
    }

    #[test]
    fn orbit_weight_restores_full_sum() {
        // A perm-unique doubles amplitude against its non-unique twin: the
        // n_equal_perms weighting must reproduce the plain dense sum.
        // tile size 1 so the antisymmetrizer relates distinct blocks
        let opts = crate::engine::EngineOptions {
            tile_size: 1,
            ..crate::engine::EngineOptions::default()
        };
        let mut eng = crate::engine::tests::minimal_engine_opts(opts);
        eng.tmplt("u", "hhpp", "0000", "1234", PermUnique::Yes).unwrap();
        eng.tmplt("d", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        // antisymmetric content
        for (idx, v) in [
            ([0usize, 1, 2, 3], 0.7),
            ([1, 0, 2, 3], -0.7),
            ([0, 1, 3, 2], -0.7),
            ([1, 0, 3, 2], 0.7),
        ] {
            eng.set("u", &idx, v).unwrap();
            eng.set("d", &idx, v).unwrap();
        }
        let pu = eng.scalar_product("N", "N", "u", "u").unwrap();
        let pd = eng.scalar_product("N", "N", "d", "d").unwrap();
        assert!((pu.re - pd.re).abs() < 1e-14);
        assert!((pu.re - 4.0 * 0.7 * 0.7).abs() < 1e-14);
    }

    #[test]
    fn different_irreps_give_zero() {
        use crate::arith::Arith;
        use crate::engine::{Engine, EngineOptions};
        use crate::spinors::SpinorRegistry;
        use crate::symmetry::SymmetryRegistry;

        let symmetry = SymmetryRegistry::new(
            vec!["A".into(), "B".into()],
            vec![0, 1, 1, 0],
            0,
            Arith::Real,
        )
        .unwrap();
        let spinors = SpinorRegistry::new(
            &[0, 0, 0, 0],
            &[-0.5, -0.4, 0.3, 0.4],
            &[true, true, false, false],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let opts = EngineOptions {
            scratch_dir: dir.into_path().join("scratch"),
            ..EngineOptions::default()
        };
        let mut eng: Engine<f64> = Engine::new(symmetry, spinors, opts).unwrap();
        eng.tmplt("x", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt_sym("y", "hp", "00", "12", PermUnique::No, 1).unwrap();
        let p = eng.scalar_product("N", "N", "x", "y").unwrap();
        assert_eq!(p, Complex64::new(0.0, 0.0));
    }

    #[test]
    fn partition_mismatch_is_fatal() {
        let mut eng = minimal_engine();
        eng.tmplt("x", "hp", "00", "12", PermUnique::No).unwrap();
        eng.tmplt("y", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        assert!(eng.scalar_product("N", "N", "x", "y").is_err());
    }
}
