//! Spinor-space restrictions applied to existing amplitudes.
//!
//! These operations zero out amplitude classes wholesale: triples outside
//! an energy window, or amplitudes touching deep-core spinors that must not
//! contribute to the correlation treatment. They mutate elements only; the
//! block structure of the diagram is untouched.

use crate::arith::Scalar;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::tensor;

impl<T: Scalar> Engine<T> {
    /// Zero every amplitude of a rank-6 diagram that involves a spinor with
    /// orbital energy outside `[emin, emax]`.
    pub fn restrict_triples(&mut self, name: &str, emin: f64, emax: f64) -> Result<()> {
        let eps = self.spinors.energies();
        let dg = self.diagram_mut(name)?;
        if dg.rank != 6 {
            return Err(EngineError::Configuration(format!(
                "restrict_triples: diagram '{name}' has rank {}, expected 6",
                dg.rank
            )));
        }
        zero_elements_where(dg, |spinor_idx| {
            spinor_idx
                .iter()
                .any(|&s| eps[s] < emin || eps[s] > emax)
        })
    }

    /// Zero every amplitude with at least one hole index below the core
    /// energy threshold (deep-core spinors are kept out of the correlation
    /// treatment).
    pub fn remove_core_correlation(&mut self, name: &str, core_thresh: f64) -> Result<()> {
        let eps = self.spinors.energies();
        let holes: Vec<bool> = (0..self.spinors.num_spinors())
            .map(|s| self.spinors.is_hole(s))
            .collect();
        let dg = self.diagram_mut(name)?;
        zero_elements_where(dg, |spinor_idx| {
            spinor_idx
                .iter()
                .any(|&s| holes[s] && eps[s] < core_thresh)
        })
    }
}

/// Zero the elements of every stored block whose global spinor tuple
/// matches the predicate.
fn zero_elements_where<T: Scalar>(
    dg: &mut crate::diagram::Diagram<T>,
    matches: impl Fn(&[usize]) -> bool,
) -> Result<()> {
    let rank = dg.rank;
    let mut rel = vec![0usize; rank];
    let mut spinor_idx = vec![0usize; rank];
    for block in &mut dg.blocks {
        if !block.uniqueness.is_unique || !block.has_storage() {
            continue;
        }
        block.load()?;
        let shape = block.shape.clone();
        let indices = block.indices.clone();
        let buf = block.buf_mut()?;
        for lin in 0..buf.len() {
            tensor::linear_to_index(&shape, lin, &mut rel);
            for d in 0..rank {
                spinor_idx[d] = indices[d][rel[d]];
            }
            if matches(&spinor_idx) {
                buf[lin] = T::zero();
            }
        }
        block.store()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::minimal_engine;
    use crate::engine::PermUnique;

    #[test]
    fn restrict_triples_zeroes_outside_window() {
        let mut eng = minimal_engine();
        eng.tmplt("t3", "hhhppp", "000000", "123456", PermUnique::No).unwrap();
        // tuple with spinor 3 (ε = +0.4) and one without
        eng.set("t3", &[0, 1, 0, 2, 3, 2], 1.0).unwrap();
        eng.set("t3", &[0, 1, 0, 2, 2, 2], 2.0).unwrap();
        eng.restrict_triples("t3", -0.45, 0.35).unwrap();
        // ε(0) = −0.5 < −0.45: both tuples touch spinor 0 and vanish
        assert_eq!(eng.get("t3", &[0, 1, 0, 2, 3, 2]).unwrap(), 0.0);
        assert_eq!(eng.get("t3", &[0, 1, 0, 2, 2, 2]).unwrap(), 0.0);

        eng.set("t3", &[1, 1, 1, 2, 2, 2], 3.0).unwrap();
        eng.set("t3", &[1, 1, 1, 2, 3, 2], 4.0).unwrap();
        eng.restrict_triples("t3", -0.45, 0.35).unwrap();
        // ε(1) = −0.4 and ε(2) = +0.3 stay; ε(3) = +0.4 falls
        assert_eq!(eng.get("t3", &[1, 1, 1, 2, 2, 2]).unwrap(), 3.0);
        assert_eq!(eng.get("t3", &[1, 1, 1, 2, 3, 2]).unwrap(), 0.0);
    }

    #[test]
    fn restrict_triples_requires_rank6() {
        let mut eng = minimal_engine();
        eng.tmplt("t2", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        assert!(eng.restrict_triples("t2", -1.0, 1.0).is_err());
    }

    #[test]
    fn core_correlation_removal() {
        let mut eng = minimal_engine();
        eng.tmplt("t2", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        eng.set("t2", &[0, 1, 2, 3], 1.0).unwrap(); // touches hole 0
        eng.set("t2", &[1, 1, 2, 3], 2.0).unwrap(); // hole 1 only
        eng.remove_core_correlation("t2", -0.45).unwrap();
        assert_eq!(eng.get("t2", &[0, 1, 2, 3]).unwrap(), 0.0);
        assert_eq!(eng.get("t2", &[1, 1, 2, 3]).unwrap(), 2.0);
    }
}
