//! Import of the one-electron integral file ("MRCONEE").
//!
//! The file carries six records: a header (spinor count, energies, group
//! tags), the number of electrons per fermion irrep, the Abelian irrep
//! names, the irrep multiplication table, the per-spinor attributes, and
//! the Fock matrix. The width of Fortran integers (4 or 8 bytes) is
//! auto-detected by probing the header record and falling back on the other
//! width when any field is out of range.

use std::path::Path;

use num_complex::Complex64;

use crate::arith::Arith;
use crate::error::{EngineError, Result};
use crate::symmetry::SymmetryRegistry;
use crate::unformatted::{RecordCursor, UnfReader};

/// Everything the engine needs from the one-electron file.
#[derive(Debug)]
pub struct MrconeeData {
    pub dirac_int_size: u8,
    pub num_spinors: usize,
    /// Core energy: inactive energy plus nuclear repulsion.
    pub nuc_rep_energy: f64,
    pub scf_energy: f64,
    /// Group type: 1 real, 2 complex, 4 quaternion.
    pub group_arith: i32,
    pub is_spinfree: bool,
    /// Inversion symmetry: 1 without a center, 2 with one.
    pub invsym: i32,
    pub num_irreps: usize,
    pub irrep_names: Vec<String>,
    /// Row-major `num_irreps²` table, 0-based entries.
    pub mult_table: Vec<usize>,
    pub totally_sym_irrep: usize,
    /// Per-spinor Abelian irrep (0-based).
    pub spinor_irreps: Vec<usize>,
    pub spinor_energies: Vec<f64>,
    pub occ_numbers: Vec<bool>,
    /// Flat `num_spinors²` complex Fock matrix.
    pub fock: Vec<Complex64>,
}

impl MrconeeData {
    /// Engine arithmetic implied by the group tags.
    pub fn arith(&self) -> Arith {
        Arith::from_group_tag(self.group_arith, self.is_spinfree)
    }

    /// Build the symmetry registry from the imported table.
    pub fn symmetry_registry(&self) -> Result<SymmetryRegistry> {
        SymmetryRegistry::new(
            self.irrep_names.clone(),
            self.mult_table.clone(),
            self.totally_sym_irrep,
            self.arith(),
        )
    }
}

struct Header {
    num_spinors: i64,
    nuc_rep_energy: f64,
    invsym: i64,
    group_arith: i64,
    is_spinfree: i64,
    norb_total: i64,
    scf_energy: f64,
}

fn parse_header(record: &[u8], width: u8) -> Result<Header> {
    let mut c = RecordCursor::new(record);
    let num_spinors = c.read_int(width)?;
    let _breit = c.read_int(width)?;
    let nuc_rep_energy = c.read_f64()?;
    let invsym = c.read_int(width)?;
    let group_arith = c.read_int(width)?;
    let is_spinfree = c.read_int(width)?;
    let norb_total = c.read_int(width)?;
    let scf_energy = c.read_f64()?;
    Ok(Header {
        num_spinors,
        nuc_rep_energy,
        invsym,
        group_arith,
        is_spinfree,
        norb_total,
        scf_energy,
    })
}

fn header_plausible(h: &Header) -> bool {
    (h.invsym == 1 || h.invsym == 2)
        && (h.group_arith == 1 || h.group_arith == 2 || h.group_arith == 4)
        && (-1..=1).contains(&h.is_spinfree)
        && h.norb_total >= 0
        && h.num_spinors > 0
}

/// Probe the header record for the Fortran integer width.
fn detect_int_size(record: &[u8]) -> Result<u8> {
    if let Ok(h) = parse_header(record, 4) {
        if header_plausible(&h) {
            return Ok(4);
        }
    }
    if let Ok(h) = parse_header(record, 8) {
        if header_plausible(&h) {
            return Ok(8);
        }
    }
    Err(EngineError::Configuration(
        "cannot detect the Fortran integer width of the one-electron file".into(),
    ))
}

/// Read the one-electron integral file.
pub fn read_mrconee(path: impl AsRef<Path>) -> Result<MrconeeData> {
    let path = path.as_ref();
    let mut file = UnfReader::open(path)?;
    let io_err = |message: String| EngineError::Io {
        path: path.to_path_buf(),
        message,
    };

    // record 1: header
    let rec = file
        .read_record()?
        .ok_or_else(|| io_err("one-electron file is empty".into()))?;
    let width = detect_int_size(&rec)?;
    let h = parse_header(&rec, width)?;
    let num_spinors = h.num_spinors as usize;
    let invsym = h.invsym as usize;

    // record 2: number of electrons per fermion irrep
    let rec = file
        .read_record()?
        .ok_or_else(|| io_err("fermion irrep record missing".into()))?;
    let mut c = RecordCursor::new(&rec);
    let nsymrp = c.read_int(width)? as usize;
    let _rep_names = c.read_chars(14 * nsymrp)?;
    let mut fermion_irrep_occs = Vec::with_capacity(nsymrp);
    for _ in 0..nsymrp {
        fermion_irrep_occs.push(c.read_int(width)?);
    }
    // the remaining fields of this record (orbital counts, frozen and
    // deleted spinors) are not used by the engine

    // record 3: Abelian irrep names
    let rec = file
        .read_record()?
        .ok_or_else(|| io_err("abelian irrep record missing".into()))?;
    let mut c = RecordCursor::new(&rec);
    let nsymrpa = c.read_int(width)? as usize;
    let num_irreps = 2 * nsymrpa;
    let mut irrep_names = Vec::with_capacity(num_irreps);
    for _ in 0..num_irreps {
        irrep_names.push(c.read_chars(4)?.trim().to_string());
    }
    rename_irreps(&mut irrep_names);

    // record 4: multiplication table (Fortran 1-based)
    let rec = file
        .read_record()?
        .ok_or_else(|| io_err("multiplication table record missing".into()))?;
    let mut c = RecordCursor::new(&rec);
    let mut mult_table = Vec::with_capacity(num_irreps * num_irreps);
    for _ in 0..num_irreps * num_irreps {
        let e = c.read_int(width)?;
        if e < 1 || e as usize > num_irreps {
            return Err(EngineError::Integrity(format!(
                "multiplication table entry {e} out of range 1..={num_irreps}"
            )));
        }
        mult_table.push(e as usize - 1);
    }
    let totally_sym_irrep = find_identity_irrep(&mult_table, num_irreps)?;

    // record 5: per-spinor (fermion irrep, abelian irrep, energy)
    let rec = file
        .read_record()?
        .ok_or_else(|| io_err("spinor attribute record missing".into()))?;
    let mut c = RecordCursor::new(&rec);
    let mut spinor_irreps = Vec::with_capacity(num_spinors);
    let mut spinor_energies = Vec::with_capacity(num_spinors);
    let mut parent_irreps = Vec::with_capacity(num_spinors);
    for _ in 0..num_spinors {
        let irp = c.read_int(width)?;
        let irpa = c.read_int(width)?;
        let eorb = c.read_f64()?;
        if irpa < 1 || irpa as usize > num_irreps {
            return Err(EngineError::Integrity(format!(
                "spinor irrep {irpa} out of range 1..={num_irreps}"
            )));
        }
        parent_irreps.push(irp);
        spinor_irreps.push(irpa as usize - 1);
        spinor_energies.push(eorb);
    }
    // trailing fields: boson irrep ids, Kramers-pair counts (unused)
    let _ = invsym;

    // occupation numbers from the per-fermion-irrep electron counts
    let mut occs_left = fermion_irrep_occs;
    let mut occ_numbers = Vec::with_capacity(num_spinors);
    for &irp in &parent_irreps {
        let slot = (irp as usize).saturating_sub(1);
        if slot < occs_left.len() && occs_left[slot] > 0 {
            occs_left[slot] -= 1;
            occ_numbers.push(true);
        } else {
            occ_numbers.push(false);
        }
    }

    // record 6: Fock matrix
    let rec = file
        .read_record()?
        .ok_or_else(|| io_err("Fock matrix record missing".into()))?;
    let mut c = RecordCursor::new(&rec);
    let mut fock = Vec::with_capacity(num_spinors * num_spinors);
    for _ in 0..num_spinors * num_spinors {
        fock.push(c.read_c64()?);
    }

    Ok(MrconeeData {
        dirac_int_size: width,
        num_spinors,
        nuc_rep_energy: h.nuc_rep_energy,
        scf_energy: h.scf_energy,
        group_arith: h.group_arith as i32,
        is_spinfree: h.is_spinfree == 1,
        invsym: h.invsym as i32,
        num_irreps,
        irrep_names,
        mult_table,
        totally_sym_irrep,
        spinor_irreps,
        spinor_energies,
        occ_numbers,
        fock,
    })
}

/// The identity of an Abelian group satisfies `e·x = x` for every `x`; the
/// table either has exactly one such row or is corrupt.
fn find_identity_irrep(table: &[usize], n: usize) -> Result<usize> {
    for e in 0..n {
        if (0..n).all(|x| table[e * n + x] == x) {
            return Ok(e);
        }
    }
    Err(EngineError::Integrity(
        "multiplication table has no identity irrep".into(),
    ))
}

/// Translate the host program's 4-character irrep tags into readable names.
///
/// The infinite-axis double groups label their irreps with the signed
/// doubled projection (`"1"`, `"-1"`, `"3"`, ... for fermions, `"0"`,
/// `"2"`, `"-2"`, ... for bosons, with a `g`/`u` suffix under inversion);
/// those are rewritten as `"1/2+"`, `"3/2g-"`, `"1u+"` and so on. Finite
/// groups keep their (trimmed) tags.
fn rename_irreps(names: &mut [String]) {
    if names.is_empty() || !(names[0] == "1" || names[0] == "1g") {
        return;
    }
    let parsed: Option<Vec<(i32, String)>> = names
        .iter()
        .map(|n| parse_axis_tag(n).map(|(two_mj, parity)| (two_mj, parity.to_string())))
        .collect();
    let Some(parsed) = parsed else {
        return;
    };
    for (name, (two_mj, parity)) in names.iter_mut().zip(parsed) {
        let mag = two_mj.abs();
        let sign = if two_mj > 0 { "+" } else { "-" };
        *name = if mag % 2 == 1 {
            format!("{mag}/2{parity}{sign}")
        } else if mag == 0 {
            format!("0{parity}")
        } else {
            format!("{}{parity}{sign}", mag / 2)
        };
    }
}

/// Parse an infinite-axis tag: optional sign, doubled projection, optional
/// `g`/`u` parity suffix.
fn parse_axis_tag(tag: &str) -> Option<(i32, &str)> {
    let (digits, parity) = match tag.strip_suffix('g') {
        Some(rest) => (rest, "g"),
        None => match tag.strip_suffix('u') {
            Some(rest) => (rest, "u"),
            None => (tag, ""),
        },
    };
    digits.parse::<i32>().ok().map(|two_mj| (two_mj, parity))
}
