//! Valence restriction and prolongation, and the closed (all-active) part.
//!
//! These operations move elements between templates that share qparts but
//! differ in their valence patterns. The restricted template's index space
//! is a subset of the general one, so the transfer is an element-wise walk
//! over the smaller diagram.

use crate::arith::Scalar;
use crate::diagram::{parse_flags, Diagram};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::tensor;

impl<T: Scalar> Engine<T> {
    /// Build `dst` with the same qparts as `src` but the (stricter) valence
    /// pattern `new_valence`. With `extract` set, the matching elements of
    /// `src` are copied over; otherwise `dst` stays a zero template.
    pub fn restrict_valence(
        &mut self,
        src: &str,
        dst: &str,
        new_valence: &str,
        extract: bool,
    ) -> Result<()> {
        let valence = parse_flags(new_valence, "valence")?;
        let restricted = {
            let dg_src = self.diagram(src)?;
            if valence.len() != dg_src.rank {
                return Err(EngineError::Configuration(format!(
                    "restrict_valence: pattern '{new_valence}' does not match rank {}",
                    dg_src.rank
                )));
            }
            let mut dg_dst: Diagram<T> = Diagram::template_parsed(
                dst,
                dg_src.qparts.clone(),
                valence,
                dg_src.t3space.clone(),
                dg_src.order.clone(),
                dg_src.only_unique,
                dg_src.symmetry,
                &self.env(),
            )?;
            if extract {
                transfer_elements(dg_src, &mut dg_dst, &self.spinors)?;
            }
            dg_dst
        };
        self.stack.install(restricted)
    }

    /// Copy the matching elements of the valence-restricted diagram `small`
    /// into the corresponding positions of the existing template `large`
    /// (same qparts, more general valence). Positions of `large` outside
    /// `small`'s index space are left untouched.
    pub fn expand_diagram(&mut self, small: &str, large: &str) -> Result<()> {
        let (dg_large, dg_small) = self.stack.pair_mut(large, small, "expand_diagram")?;
        if dg_small.rank != dg_large.rank || dg_small.qparts != dg_large.qparts {
            return Err(EngineError::ShapeMismatch(format!(
                "expand_diagram: '{small}' ({}) and '{large}' ({}) are incompatible",
                dg_small.qparts_string(),
                dg_large.qparts_string()
            )));
        }
        transfer_elements(dg_small, dg_large, &self.spinors)
    }

    /// Extract the closed (all-active) part of `src` into `dst`: the
    /// template-plus-expand pair used to assemble effective Hamiltonians.
    pub fn closed(&mut self, src: &str, dst: &str) -> Result<()> {
        let rank = self.rank(src)?;
        let all_valence = "1".repeat(rank);
        self.restrict_valence(src, dst, &all_valence, true)
    }
}

/// Walk every element of `dst`'s (smaller or equal) index space and pull the
/// value with the same global spinor tuple out of `src`.
fn transfer_elements<T: Scalar>(
    src: &Diagram<T>,
    dst: &mut Diagram<T>,
    spinors: &crate::spinors::SpinorRegistry,
) -> Result<()> {
    let rank = dst.rank;
    let mut rel = vec![0usize; rank];
    let mut spinor_idx = vec![0usize; rank];
    for block in &mut dst.blocks {
        if !block.uniqueness.is_unique || !block.has_storage() {
            continue;
        }
        block.load()?;
        let shape = block.shape.clone();
        for lin in 0..block.size {
            tensor::linear_to_index(&shape, lin, &mut rel);
            for d in 0..rank {
                spinor_idx[d] = block.indices[d][rel[d]];
            }
            let v = src.get(&spinor_idx, spinors)?;
            block.buf_mut()?[lin] = v;
        }
        block.store()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::engine::{Engine, EngineOptions, PermUnique};

    /// Engine with an active space: hole 1 and particle 2 are active.
    fn engine_with_active() -> Engine<f64> {
        use crate::arith::Arith;
        use crate::spinors::SpinorRegistry;
        use crate::symmetry::SymmetryRegistry;

        let symmetry =
            SymmetryRegistry::new(vec!["A".into()], vec![0], 0, Arith::Real).unwrap();
        let mut spinors = SpinorRegistry::new(
            &[0, 0, 0, 0],
            &[-0.5, -0.4, 0.3, 0.4],
            &[true, true, false, false],
        )
        .unwrap();
        spinors.set_active_total(1, 1).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let opts = EngineOptions {
            scratch_dir: dir.into_path().join("scratch"),
            ..EngineOptions::default()
        };
        Engine::new(symmetry, spinors, opts).unwrap()
    }

    #[test]
    fn restrict_and_extract() {
        let mut eng = engine_with_active();
        eng.tmplt("f", "hp", "00", "12", PermUnique::No).unwrap();
        for i in 0..2usize {
            for a in 2..4usize {
                eng.set("f", &[i, a], (10 * i + a) as f64).unwrap();
            }
        }
        eng.restrict_valence("f", "fv", "11", true).unwrap();
        // only (hole 1, particle 2) is all-active
        assert_eq!(eng.count_amplitudes("fv").unwrap(), 1);
        assert_eq!(eng.get("fv", &[1, 2]).unwrap(), 12.0);
        // positions outside the restricted space read zero from "fv"
        assert_eq!(eng.get("fv", &[0, 2]).unwrap(), 0.0);
    }

    #[test]
    fn restrict_without_extract_is_zero_template() {
        let mut eng = engine_with_active();
        eng.tmplt("f", "hp", "00", "12", PermUnique::No).unwrap();
        eng.set("f", &[1, 2], 5.0).unwrap();
        eng.restrict_valence("f", "fv", "11", false).unwrap();
        assert_eq!(eng.get("fv", &[1, 2]).unwrap(), 0.0);
    }

    #[test]
    fn expand_round_trip() {
        let mut eng = engine_with_active();
        eng.tmplt("f", "hp", "00", "12", PermUnique::No).unwrap();
        eng.set("f", &[1, 2], 3.5).unwrap();
        eng.set("f", &[0, 3], -1.0).unwrap();
        eng.closed("f", "fv").unwrap();
        eng.tmplt("g", "hp", "00", "12", PermUnique::No).unwrap();
        eng.expand_diagram("fv", "g").unwrap();
        // the all-active element came through, everything else is zero
        assert_eq!(eng.get("g", &[1, 2]).unwrap(), 3.5);
        assert_eq!(eng.get("g", &[0, 3]).unwrap(), 0.0);
    }

    #[test]
    fn expand_requires_matching_qparts() {
        let mut eng = engine_with_active();
        eng.tmplt("a", "hp", "11", "12", PermUnique::No).unwrap();
        eng.tmplt("b", "ph", "00", "12", PermUnique::No).unwrap();
        assert!(eng.expand_diagram("a", "b").is_err());
    }

    #[test]
    fn valence_restricted_template_is_smaller() {
        let mut eng = engine_with_active();
        eng.tmplt("v", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        eng.tmplt("vr", "hhpp", "0101", "1234", PermUnique::No).unwrap();
        let full = eng.count_amplitudes("v").unwrap();
        let restricted = eng.count_amplitudes("vr").unwrap();
        assert_eq!(full, 16);
        assert_eq!(restricted, 4);
    }
}
