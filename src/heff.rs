//! Formatted output files: the effective Hamiltonian ("HEFF") and
//! per-operator amplitude listings.
//!
//! The HEFF format is line-oriented ASCII: an arithmetic header, a sector
//! tag, then per-irrep blocks `(rep index, dimension, dim² complex numbers)`
//! in scientific notation. Amplitude files carry one line per non-zero
//! element: the spinor indices (1-based) followed by the value (two columns
//! when complex).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use num_complex::Complex64;

use crate::arith::{Arith, Scalar};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::tensor;

/// Threshold below which amplitudes are not listed.
const AMPLITUDE_PRINT_THRESH: f64 = 1e-16;

/// Start a HEFF file for the vacuum sector: arithmetic header, sector tag,
/// and the total energy as a 1×1 block. Truncates any existing file.
pub fn write_heff_0h0p(path: impl AsRef<Path>, arith: Arith, total_energy: f64) -> Result<()> {
    let path = path.as_ref();
    let mut f = File::create(path).map_err(|e| EngineError::io(path, e))?;
    let result = (|| -> std::io::Result<()> {
        match arith {
            Arith::Complex => writeln!(f, "complex      # arithmetic")?,
            Arith::Real => writeln!(f, "real         # arithmetic")?,
        }
        writeln!(f, "0h0p         # sector")?;
        writeln!(f, "   1     1   # rep No & heff size")?;
        if arith.is_complex() {
            writeln!(f, "{:21.12E}{:21.12E}", total_energy, 0.0)?;
        } else {
            writeln!(f, "{total_energy:21.12E}")?;
        }
        Ok(())
    })();
    result.map_err(|e| EngineError::io(path, e))
}

/// Append one sector's effective-Hamiltonian blocks to the HEFF file.
/// `blocks` holds, per irrep, the dense `dim×dim` matrix (empty irreps are
/// skipped); rep numbers are counted from the first non-empty irrep.
pub fn append_heff_sector(
    path: impl AsRef<Path>,
    arith: Arith,
    sector: (usize, usize),
    blocks: &[(usize, Vec<Complex64>)],
) -> Result<()> {
    let path = path.as_ref();
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| EngineError::io(path, e))?;

    let result = (|| -> std::io::Result<()> {
        writeln!(f, "{}h{}p         # sector", sector.0, sector.1)?;
        let first = blocks.iter().map(|(irrep, _)| *irrep).min().unwrap_or(0);
        for (irrep, matrix) in blocks {
            let dim = (matrix.len() as f64).sqrt().round() as usize;
            writeln!(f, "{:4}{:6}   # rep No & heff size", irrep - first + 1, dim)?;
            let mut on_line = 0;
            for v in matrix {
                if arith.is_complex() {
                    write!(f, "{:21.12E}{:21.12E}", v.re, v.im)?;
                    on_line += 1;
                    if on_line == 2 {
                        writeln!(f)?;
                        on_line = 0;
                    }
                } else {
                    write!(f, "{:21.12E}", v.re)?;
                    on_line += 1;
                    if on_line == 4 {
                        writeln!(f)?;
                        on_line = 0;
                    }
                }
            }
            if on_line != 0 {
                writeln!(f)?;
            }
        }
        Ok(())
    })();
    result.map_err(|e| EngineError::io(path, e))
}

impl<T: Scalar> Engine<T> {
    /// Write the non-zero amplitudes of a diagram to a formatted text file:
    /// one line per element, spinor indices (1-based) then the value.
    pub fn write_formatted_amplitudes(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let dg = self.diagram(name)?;
        let path = path.as_ref();
        let mut f = File::create(path).map_err(|e| EngineError::io(path, e))?;

        let rank = dg.rank;
        let mut rel = vec![0usize; rank];
        for bi in 0..dg.blocks.len() {
            // restored non-unique blocks are listed too, so the file shows
            // the full antisymmetric tensor
            let data = dg.read_block_resolved(bi)?;
            let block = &dg.blocks[bi];
            for (lin, v) in data.iter().enumerate() {
                if v.abs() < AMPLITUDE_PRINT_THRESH {
                    continue;
                }
                tensor::linear_to_index(&block.shape, lin, &mut rel);
                let mut line = String::new();
                for d in 0..rank {
                    line.push_str(&format!("{:6}", block.indices[d][rel[d]] + 1));
                }
                if T::ARITH.is_complex() {
                    line.push_str(&format!("{:25.16}{:25.16}", v.re(), v.im()));
                } else {
                    line.push_str(&format!("{:25.16}", v.re()));
                }
                writeln!(f, "{line}").map_err(|e| EngineError::io(path, e))?;
            }
        }
        Ok(())
    }
}
