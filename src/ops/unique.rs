//! Canonical-orbit maintenance: consistency checks and re-canonicalization.
//!
//! Two independent realizations of the orbit machinery must agree on the
//! `(is_unique, sign, perm_to_unique)` triple of every block;
//! [`Engine::check_unique`] recomputes the orbit metadata from the
//! diagram's patterns and reports any disagreement as an integrity error —
//! a strong regression hook for the subtlest part of the block machinery.
//!
//! [`Engine::clear_non_unique`] zeroes the blocks of a fully-stored diagram
//! that are *not* the representatives of their orbit; a subsequent
//! accumulation of signed restorations re-symmetrizes the tensor.

use crate::arith::Scalar;
use crate::block::compute_uniqueness;
use crate::engine::Engine;
use crate::error::{EngineError, Result};

impl<T: Scalar> Engine<T> {
    /// Verify the stored orbit metadata of every block against a fresh
    /// recomputation. Fatal on any disagreement.
    pub fn check_unique(&self, name: &str) -> Result<()> {
        let dg = self.diagram(name)?;
        for block in &dg.blocks {
            let expect = compute_uniqueness(
                &block.spinor_blocks,
                &dg.qparts,
                &dg.valence,
                &dg.order,
            );
            let got = &block.uniqueness;
            if dg.only_unique {
                if *got != expect {
                    return Err(EngineError::Integrity(format!(
                        "check_unique: diagram '{name}', tuple {:?}: stored orbit \
                         metadata {:?} disagrees with recomputation {:?}",
                        block.spinor_blocks, got, expect
                    )));
                }
                if got.is_unique {
                    let identity: Vec<usize> = (0..block.rank).collect();
                    if got.perm_from_unique != identity {
                        return Err(EngineError::Integrity(format!(
                            "check_unique: representative block {:?} carries a \
                             non-identity restore permutation",
                            block.spinor_blocks
                        )));
                    }
                }
            } else if !got.is_unique {
                return Err(EngineError::Integrity(format!(
                    "check_unique: diagram '{name}' is fully stored but block {:?} \
                     is marked non-unique",
                    block.spinor_blocks
                )));
            }
        }

        // every non-unique block must reach a live representative
        for block in &dg.blocks {
            if block.uniqueness.is_unique {
                continue;
            }
            let uniq_tuple: Vec<usize> = block
                .uniqueness
                .perm_to_unique
                .iter()
                .map(|&p| block.spinor_blocks[p])
                .collect();
            match dg.get_block(&uniq_tuple) {
                Some(rep) if rep.uniqueness.is_unique => {}
                _ => {
                    return Err(EngineError::Integrity(format!(
                        "check_unique: orbit of tuple {:?} has no stored representative",
                        block.spinor_blocks
                    )))
                }
            }
        }
        Ok(())
    }

    /// Zero the non-representative blocks of a fully-stored diagram.
    pub fn clear_non_unique(&mut self, name: &str) -> Result<()> {
        let dg = self.diagram_mut(name)?;
        let qparts = dg.qparts.clone();
        let valence = dg.valence.clone();
        let order = dg.order.clone();
        for block in &mut dg.blocks {
            let orbit = compute_uniqueness(&block.spinor_blocks, &qparts, &valence, &order);
            if !orbit.is_unique {
                block.clear()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::minimal_engine_opts;
    use crate::engine::{EngineOptions, PermUnique};

    fn tile1_engine() -> crate::Engine<f64> {
        minimal_engine_opts(EngineOptions {
            tile_size: 1,
            ..EngineOptions::default()
        })
    }

    #[test]
    fn orbit_metadata_survives_recomputation() {
        let mut eng = tile1_engine();
        eng.tmplt("u", "hhpp", "0000", "1234", PermUnique::Yes).unwrap();
        eng.check_unique("u").unwrap();
        // a reordered diagram keeps a consistent orbit too
        eng.reorder("u", "w", "2134").unwrap();
        eng.check_unique("w").unwrap();
    }

    #[test]
    fn fully_stored_diagram_passes() {
        let mut eng = tile1_engine();
        eng.tmplt("d", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        eng.check_unique("d").unwrap();
    }

    #[test]
    fn clear_non_unique_zeroes_partners() {
        let mut eng = tile1_engine();
        eng.tmplt("d", "hhpp", "0000", "1234", PermUnique::No).unwrap();
        eng.set("d", &[0, 1, 2, 3], 1.0).unwrap();
        eng.set("d", &[1, 0, 2, 3], -1.0).unwrap();
        eng.clear_non_unique("d").unwrap();
        // the representative tuple (ascending blocks) survives
        assert_eq!(eng.get("d", &[0, 1, 2, 3]).unwrap(), 1.0);
        // the swapped partner's block was zeroed
        assert_eq!(eng.get("d", &[1, 0, 2, 3]).unwrap(), 0.0);
    }
}
