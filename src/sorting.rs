//! Sorting: fan-out of raw integrals into the requested basic diagrams.
//!
//! Clients register the basic diagrams they will need (`request_sorting`)
//! before any computation; `perform_sorting` then walks the integral
//! sources once, filling every requested rank-2 diagram from the Fock
//! matrix and every rank-4 diagram from the two-electron stream. Each raw
//! Coulomb integral is expanded into its full symmetry orbit (`mdcint`),
//! and every orbit member is antisymmetrized into the diagrams whose blocks
//! contain its spinor tuple. All buffers are flushed to their declared
//! storage class at the end.

use std::path::Path;

use crate::arith::Scalar;
use crate::engine::{Engine, PermUnique};
use crate::error::{EngineError, Result};
use crate::mdcint;
use crate::mrconee::MrconeeData;

impl<T: Scalar> Engine<T> {
    /// Register a basic diagram to be filled by the next `perform_sorting`.
    /// The template is created immediately (zeroed).
    pub fn request_sorting(
        &mut self,
        name: &str,
        qparts: &str,
        valence: &str,
        order: &str,
    ) -> Result<()> {
        self.tmplt(name, qparts, valence, order, PermUnique::No)?;
        if !self.sorting_requests.iter().any(|n| n == name) {
            self.sorting_requests.push(name.to_string());
        }
        Ok(())
    }

    /// Fill all requested diagrams from the integral sources. The
    /// one-electron part always comes from `data`; the two-electron stream
    /// is read when a path is given and any rank-4 request exists.
    pub fn perform_sorting(
        &mut self,
        data: &MrconeeData,
        mdcint_path: Option<&Path>,
    ) -> Result<()> {
        let requests = self.sorting_requests.clone();

        // one-electron diagrams from the Fock matrix
        let n = data.num_spinors;
        if n != self.spinors.num_spinors() {
            return Err(EngineError::Configuration(format!(
                "perform_sorting: integral data covers {n} spinors, the registry {}",
                self.spinors.num_spinors()
            )));
        }
        for name in &requests {
            if self.rank(name)? != 2 {
                continue;
            }
            for p in 0..n {
                for q in 0..n {
                    let v = T::from_c64(data.fock[p * n + q]);
                    self.set(name, &[p, q], v)?;
                }
            }
            tracing::debug!(diagram = %name, "sorted one-electron diagram");
        }

        // two-electron diagrams from the Kramers-pair stream
        let two_el: Vec<String> = requests
            .iter()
            .filter(|name| self.rank(name).map(|r| r == 4).unwrap_or(false))
            .cloned()
            .collect();
        if !two_el.is_empty() {
            let path = mdcint_path.ok_or_else(|| {
                EngineError::Configuration(
                    "perform_sorting: two-electron diagrams requested but no integral \
                     stream given"
                        .into(),
                )
            })?;
            let values_are_real = data.group_arith == 1 || data.is_spinfree;
            let is_spinfree = data.is_spinfree;
            let width = data.dirac_int_size;

            let (_map, count) = mdcint::read_mdcint(path, width, values_are_real, |map, raw| {
                let orbit = mdcint::expand_orbit(map, &raw, is_spinfree)?;
                for entry in &orbit {
                    let value = T::from_c64(entry.value);
                    for name in &two_el {
                        self.add_to_element(name, &entry.idx, value)?;
                    }
                }
                Ok(())
            })?;
            tracing::debug!(integrals = count, "two-electron stream read");
        }

        // flush everything to its declared storage class
        for name in &requests {
            let dg = self.diagram_mut(name)?;
            for block in &mut dg.blocks {
                block.store()?;
            }
        }
        self.sorting_requests.clear();
        Ok(())
    }

    /// Sort a property matrix (from the property file) into a rank-2
    /// diagram named `name`.
    pub fn sort_property_matrix(
        &mut self,
        name: &str,
        matrix: &[num_complex::Complex64],
        op_irrep: usize,
        qparts: &str,
    ) -> Result<()> {
        let n = self.spinors.num_spinors();
        if matrix.len() != n * n {
            return Err(EngineError::ShapeMismatch(format!(
                "sort_property_matrix: matrix holds {} elements, expected {}",
                matrix.len(),
                n * n
            )));
        }
        self.tmplt_sym(name, qparts, "00", "12", PermUnique::No, op_irrep)?;
        for p in 0..n {
            for q in 0..n {
                let v = T::from_c64(matrix[p * n + q]);
                self.set(name, &[p, q], v)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineOptions};
    use crate::mrconee::read_mrconee;
    use crate::unformatted::{RecordBuilder, UnfWriter};
    use num_complex::Complex64;

    /// Engine built the way the driver builds it: from an imported
    /// one-electron fixture file.
    fn engine_from_fixture(dir: &std::path::Path) -> (Engine<f64>, MrconeeData) {
        let path = dir.join("MRCONEE");
        crate::mrconee::tests::write_fixture(&path, 4);
        let data = read_mrconee(&path).unwrap();
        let symmetry = data.symmetry_registry().unwrap();
        let spinors = crate::spinors::SpinorRegistry::new(
            &data.spinor_irreps,
            &data.spinor_energies,
            &data.occ_numbers,
        )
        .unwrap();
        let opts = EngineOptions {
            scratch_dir: dir.join("scratch"),
            ..EngineOptions::default()
        };
        (Engine::new(symmetry, spinors, opts).unwrap(), data)
    }

    #[test]
    fn one_electron_sorting_fills_fock_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let (mut eng, data) = engine_from_fixture(dir.path());
        eng.request_sorting("hh", "hh", "00", "12").unwrap();
        eng.request_sorting("hp", "hp", "00", "12").unwrap();
        eng.perform_sorting(&data, None).unwrap();
        // the fixture's Fock matrix is diagonal with the orbital energies
        assert_eq!(eng.get("hh", &[0, 0]).unwrap(), -0.5);
        assert_eq!(eng.get("hh", &[1, 1]).unwrap(), -0.4);
        assert_eq!(eng.get("hh", &[0, 1]).unwrap(), 0.0);
        // off-space elements never land anywhere
        assert_eq!(eng.get("hp", &[0, 2]).unwrap(), 0.0);
    }

    #[test]
    fn two_electron_sorting_antisymmetrizes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut eng, data) = engine_from_fixture(dir.path());

        // MDCINT with a single integral (11|22) = 0.25 over 2 Kramers pairs:
        // pair 1 = spinors 1,2 (holes), pair 2 = spinors 3,4 (particles).
        let mdcint = dir.path().join("MDCINT");
        let mut w = UnfWriter::create(&mdcint).unwrap();
        w.write_record(
            &RecordBuilder::new()
                .chars("01Jan26 00:00:00  ", 18)
                .int(2, 4)
                .int(1, 4)
                .int(2, 4)
                .int(3, 4)
                .int(4, 4)
                .build(),
        )
        .unwrap();
        w.write_record(
            &RecordBuilder::new()
                .int(1, 4)
                .int(1, 4)
                .int(1, 4)
                .int(2, 4)
                .int(2, 4)
                .f64(0.25)
                .build(),
        )
        .unwrap();
        w.write_record(&RecordBuilder::new().int(0, 4).int(0, 4).int(0, 4).build())
            .unwrap();
        w.finish().unwrap();

        eng.request_sorting("hphp", "hphp", "0000", "1234").unwrap();
        eng.perform_sorting(&data, Some(&mdcint)).unwrap();

        // (11|22) → Dirac ⟨12|12⟩: spinor tuple (0,2,0,2) carries +0.25
        assert_eq!(eng.get("hphp", &[0, 2, 0, 2]).unwrap(), 0.25);
        // the exchange member ⟨12|21⟩ = (0,2,2,0) carries −0.25, but that
        // tuple is outside the hphp space; the hermitian partner stays:
        assert_eq!(eng.get("hphp", &[2, 0, 2, 0]).unwrap(), 0.0); // pphh space
        // Kramers-barred partner ⟨1̄2̄|1̄2̄⟩ = (1,3,1,3)
        assert_eq!(eng.get("hphp", &[1, 3, 1, 3]).unwrap(), 0.25);
    }

    #[test]
    fn property_matrix_sorting() {
        let dir = tempfile::tempdir().unwrap();
        let (mut eng, _data) = engine_from_fixture(dir.path());
        let n = 4;
        let mut matrix = vec![Complex64::new(0.0, 0.0); n * n];
        matrix[2] = Complex64::new(0.5, 0.0); // element (0, 2)
        eng.sort_property_matrix("prop_hp", &matrix, 0, "hp").unwrap();
        assert_eq!(eng.get("prop_hp", &[0, 2]).unwrap(), 0.5);
    }
}
