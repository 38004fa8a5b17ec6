//! Hermitian conjugation of diagrams.

use crate::arith::{conj_vector, Scalar};
use crate::engine::Engine;
use crate::error::Result;

impl<T: Scalar> Engine<T> {
    /// Build `dst` as the Hermitian adjoint of `src`: bra and ket halves
    /// are interchanged, the index order is reset to natural, and every
    /// element is complex-conjugated (a no-op in the real engine).
    pub fn conjugate(&mut self, src: &str, dst: &str) -> Result<()> {
        let rank = self.rank(src)?;
        let half = rank / 2;

        // ket half first, then bra half: "3412", "456123", ...
        let ket_bra: String = (0..rank)
            .map(|i| char::from(b'1' + ((i + half) % rank) as u8))
            .collect();
        self.reorder(src, dst, &ket_bra)?;

        let natural: String = (0..rank).map(|i| char::from(b'1' + i as u8)).collect();
        self.set_order(dst, &natural)?;

        self.conjugate_elements_inplace(dst)
    }

    /// In-place complex conjugation of every element of a diagram.
    pub fn conjugate_elements_inplace(&mut self, name: &str) -> Result<()> {
        if !T::ARITH.is_complex() {
            // still validate the name
            let _ = self.diagram(name)?;
            return Ok(());
        }
        let dg = self.diagram_mut(name)?;
        for block in &mut dg.blocks {
            if !block.has_storage() {
                continue;
            }
            block.load()?;
            conj_vector(block.buf_mut()?);
            block.store()?;
        }
        Ok(())
    }
}
