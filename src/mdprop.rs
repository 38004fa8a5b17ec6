//! Import of the property matrix file ("MDPROP").
//!
//! The file is a sequence of `(label, matrix)` record pairs: an 8-character
//! operator label (right-aligned in a 32-character field) followed by the
//! flat `n²` complex matrix. The label `"EOFLABEL"` terminates the stream.

use std::path::Path;

use num_complex::Complex64;

use crate::error::{EngineError, Result};
use crate::unformatted::{RecordCursor, UnfReader};

/// One property operator matrix.
#[derive(Debug, Clone)]
pub struct PropertyMatrix {
    pub label: String,
    /// Flat row-major `n×n` complex matrix.
    pub matrix: Vec<Complex64>,
    pub dim: usize,
}

/// Read all property matrices from the file.
pub fn read_mdprop(path: impl AsRef<Path>) -> Result<Vec<PropertyMatrix>> {
    let path = path.as_ref();
    let mut file = UnfReader::open(path)?;
    let mut out = Vec::new();

    loop {
        let Some(rec) = file.read_record()? else {
            break;
        };
        if rec.len() < 32 {
            return Err(EngineError::Io {
                path: path.to_path_buf(),
                message: format!("property label record is only {} bytes", rec.len()),
            });
        }
        let mut c = RecordCursor::new(&rec);
        let field = c.read_chars(32)?;
        let label = field[24..32].trim().to_string();
        if label == "EOFLABEL" {
            break;
        }

        let Some(matrix_rec) = file.read_record()? else {
            return Err(EngineError::Io {
                path: path.to_path_buf(),
                message: format!("property '{label}' has no matrix record"),
            });
        };
        let n_elements = matrix_rec.len() / 16;
        let dim_f = (n_elements as f64).sqrt().round() as usize;
        if dim_f * dim_f != n_elements {
            return Err(EngineError::Io {
                path: path.to_path_buf(),
                message: format!(
                    "property '{label}' matrix of {n_elements} elements is not square"
                ),
            });
        }
        let mut c = RecordCursor::new(&matrix_rec);
        let mut matrix = Vec::with_capacity(n_elements);
        for _ in 0..n_elements {
            matrix.push(c.read_c64()?);
        }
        analyze_matrix(&label, dim_f, &matrix);
        out.push(PropertyMatrix {
            label,
            matrix,
            dim: dim_f,
        });
    }

    Ok(out)
}

/// Log the structure of a property matrix (zero/symmetric parts).
fn analyze_matrix(label: &str, dim: usize, matrix: &[Complex64]) {
    let thresh = crate::ZERO_THRESH;
    let mut re_zero = true;
    let mut im_zero = true;
    let mut re_symm = true;
    let mut im_symm = true;
    for i in 0..dim {
        for j in i..dim {
            let a = matrix[i * dim + j];
            let b = matrix[j * dim + i];
            if a.re.abs() > thresh || b.re.abs() > thresh {
                re_zero = false;
            }
            if a.im.abs() > thresh || b.im.abs() > thresh {
                im_zero = false;
            }
            if (a.re - b.re).abs() > thresh {
                re_symm = false;
            }
            if (a.im - b.im).abs() > thresh {
                im_symm = false;
            }
        }
    }
    tracing::debug!(
        label,
        re_zero,
        im_zero,
        re_symmetric = re_symm,
        im_symmetric = im_symm,
        "property matrix"
    );
}
