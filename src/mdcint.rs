//! Import of the two-electron integral stream ("MDCINT").
//!
//! The stream starts with a record carrying an 18-character date/time
//! field, the number of Kramers pairs and the Kramers index map, followed by
//! one record per `(ikr, jkr)` pair: the number of non-zero entries, the
//! `(kkr, lkr)` index pairs and the values (real or complex per the group
//! type). A record with `ikr = jkr = 0` terminates the stream.
//!
//! Kramers indices are signed: `+i` is the unbarred member of pair `i`,
//! `−i` the barred one. The map translates them to absolute spinor indices.
//! Each stored Coulomb integral `(ij|kl)` stands for its whole orbit under
//! the eight-fold symmetry of real integrals (four-fold for complex ones,
//! with two extra barred members in the spin-free case); the orbit is
//! expanded here, converted to Dirac ordering, and handed to the sorting
//! fan-out.

use std::path::Path;

use num_complex::Complex64;

use crate::error::{EngineError, Result};
use crate::unformatted::{RecordCursor, UnfReader};

/// Kramers-pair index map: `kr[2(i−1)]` is the absolute (1-based) spinor of
/// `+i`, `kr[2(i−1)+1]` that of `−i`.
#[derive(Debug, Clone)]
pub struct KramersMap {
    kr: Vec<i32>,
    n_pairs: usize,
}

impl KramersMap {
    pub fn n_pairs(&self) -> usize {
        self.n_pairs
    }

    /// Signed Kramers index → 0-based absolute spinor index.
    pub fn to_spinor(&self, ikr: i32) -> Result<usize> {
        let slot = if ikr > 0 {
            2 * (ikr as usize - 1)
        } else if ikr < 0 {
            2 * ((-ikr) as usize - 1) + 1
        } else {
            return Err(EngineError::Integrity(
                "Kramers index 0 inside an integral record".into(),
            ));
        };
        let abs = *self.kr.get(slot).ok_or_else(|| {
            EngineError::Integrity(format!(
                "Kramers index {ikr} outside the map of {} pairs",
                self.n_pairs
            ))
        })?;
        if abs < 1 {
            return Err(EngineError::Integrity(format!(
                "Kramers map entry for {ikr} is {abs}"
            )));
        }
        Ok(abs as usize - 1)
    }
}

/// One raw Coulomb integral in chemists' notation `(ij|kl)`, with signed
/// Kramers indices.
#[derive(Copy, Clone, Debug)]
pub struct RawIntegral {
    pub ikr: i32,
    pub jkr: i32,
    pub kkr: i32,
    pub lkr: i32,
    pub value: Complex64,
}

/// Stream the two-electron file, invoking `visit` for every stored raw
/// integral. Returns the Kramers map and the number of integrals seen.
pub fn read_mdcint(
    path: impl AsRef<Path>,
    int_width: u8,
    values_are_real: bool,
    mut visit: impl FnMut(&KramersMap, RawIntegral) -> Result<()>,
) -> Result<(KramersMap, u64)> {
    let path = path.as_ref();
    let mut file = UnfReader::open(path)?;
    let io_err = |message: String| EngineError::Io {
        path: path.to_path_buf(),
        message,
    };

    // leading record: date/time, Kramers pair count, index map
    let rec = file
        .read_record()?
        .ok_or_else(|| io_err("two-electron file is empty".into()))?;
    let mut c = RecordCursor::new(&rec);
    let date_time = c.read_chars(18)?;
    let nkr = c.read_int(int_width)? as usize;
    let mut kr = Vec::with_capacity(2 * nkr);
    for _ in 0..2 * nkr {
        kr.push(c.read_int(int_width)? as i32);
    }
    let map = KramersMap { kr, n_pairs: nkr };
    tracing::debug!(date_time = %date_time.trim(), n_pairs = nkr, "two-electron stream");

    let mut count = 0u64;
    loop {
        let rec = file
            .read_record()?
            .ok_or_else(|| io_err("two-electron stream not terminated".into()))?;
        let mut c = RecordCursor::new(&rec);
        let ikr = c.read_int(int_width)? as i32;
        let jkr = c.read_int(int_width)? as i32;
        if ikr == 0 && jkr == 0 {
            break;
        }
        let nonzr = c.read_int(int_width)? as usize;
        let mut indices = Vec::with_capacity(nonzr);
        for _ in 0..nonzr {
            let kkr = c.read_int(int_width)? as i32;
            let lkr = c.read_int(int_width)? as i32;
            indices.push((kkr, lkr));
        }
        for &(kkr, lkr) in &indices {
            let value = if values_are_real {
                Complex64::new(c.read_f64()?, 0.0)
            } else {
                c.read_c64()?
            };
            visit(
                &map,
                RawIntegral {
                    ikr,
                    jkr,
                    kkr,
                    lkr,
                    value,
                },
            )?;
            count += 1;
        }
    }

    Ok((map, count))
}

/// One fan-out target position: a Dirac-ordered spinor tuple and the signed
/// value to accumulate there.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitEntry {
    pub idx: [usize; 4],
    pub value: Complex64,
}

/// Expand the full orbit of one raw Coulomb integral into antisymmetrized
/// Dirac-notation accumulation targets.
///
/// The Kramers-barred partners enter with a sign determined by the number of
/// bars in the integral class; spin-free data contributes two extra barred
/// members. Duplicate target tuples (index coincidences) are emitted once.
pub fn expand_orbit(
    map: &KramersMap,
    raw: &RawIntegral,
    is_spinfree: bool,
) -> Result<Vec<OrbitEntry>> {
    // chemists' (ij|kl) → Dirac ⟨ik|jl⟩
    let (i, j, k, l) = (raw.ikr, raw.kkr, raw.jkr, raw.lkr);
    let v = raw.value;

    let one_bar = (sign_of(raw.ikr) * sign_of(raw.kkr) * sign_of(raw.jkr) * sign_of(raw.lkr)) < 0;

    let mut members: Vec<([i32; 4], Complex64)> = Vec::with_capacity(4);
    members.push(([i, j, k, l], v));
    if one_bar {
        members.push(([-k, -l, -i, -j], -v));
    } else {
        if is_spinfree {
            members.push(([i, -l, k, -j], v));
            members.push(([-k, j, -i, l], v));
        }
        members.push(([-k, -l, -i, -j], v));
    }

    let mut out: Vec<OrbitEntry> = Vec::with_capacity(members.len() * 8);
    for (m, val) in members {
        push_perm_symm(map, m, val, &mut out)?;
    }
    Ok(out)
}

fn sign_of(x: i32) -> i32 {
    match x.cmp(&0) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// The hermitian + particle-interchange + antisymmetrization expansion of
/// one Dirac-ordered member ⟨ij|kl⟩.
fn push_perm_symm(
    map: &KramersMap,
    m: [i32; 4],
    v: Complex64,
    out: &mut Vec<OrbitEntry>,
) -> Result<()> {
    let i = map.to_spinor(m[0])?;
    let j = map.to_spinor(m[1])?;
    let k = map.to_spinor(m[2])?;
    let l = map.to_spinor(m[3])?;
    let vc = v.conj();

    let entries = [
        ([i, j, k, l], v),
        ([j, i, l, k], v),
        ([k, l, i, j], vc),
        ([l, k, j, i], vc),
        ([i, j, l, k], -v),
        ([j, i, k, l], -v),
        ([k, l, j, i], -vc),
        ([l, k, i, j], -vc),
    ];
    for (idx, value) in entries {
        if !out.iter().any(|e| e.idx == idx) {
            out.push(OrbitEntry { idx, value });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unformatted::{RecordBuilder, UnfWriter};

    /// Identity Kramers map over two pairs: +1→1, −1→2, +2→3, −2→4.
    fn map2() -> KramersMap {
        KramersMap {
            kr: vec![1, 2, 3, 4],
            n_pairs: 2,
        }
    }

    #[test]
    fn kramers_translation() {
        let m = map2();
        assert_eq!(m.to_spinor(1).unwrap(), 0);
        assert_eq!(m.to_spinor(-1).unwrap(), 1);
        assert_eq!(m.to_spinor(2).unwrap(), 2);
        assert_eq!(m.to_spinor(-2).unwrap(), 3);
        assert!(m.to_spinor(0).is_err());
        assert!(m.to_spinor(3).is_err());
    }

    #[test]
    fn orbit_contains_dirac_and_exchange_members() {
        let m = map2();
        let raw = RawIntegral {
            ikr: 1,
            jkr: 1,
            kkr: 2,
            lkr: 2,
            value: Complex64::new(0.5, 0.0),
        };
        let orbit = expand_orbit(&m, &raw, false).unwrap();
        // direct Dirac entry ⟨ik|jl⟩ with (i,j,k,l) = (1,2,1,2) → spinors (0,2,0,2)
        assert!(orbit
            .iter()
            .any(|e| e.idx == [0, 2, 0, 2] && e.value == Complex64::new(0.5, 0.0)));
        // its exchange partner carries the opposite sign
        assert!(orbit
            .iter()
            .any(|e| e.idx == [0, 2, 2, 0] && e.value == Complex64::new(-0.5, 0.0)));
        // no duplicate target tuples
        for (n, e) in orbit.iter().enumerate() {
            assert!(!orbit[n + 1..].iter().any(|f| f.idx == e.idx));
        }
    }

    #[test]
    fn one_bar_class_flips_the_barred_half() {
        let m = map2();
        let raw = RawIntegral {
            ikr: 1,
            jkr: 1,
            kkr: 2,
            lkr: -2,
            value: Complex64::new(1.0, 0.0),
        };
        let orbit = expand_orbit(&m, &raw, false).unwrap();
        // Dirac member (1,2,1,-2) -> spinors (0,2,0,3) with +1
        assert!(orbit
            .iter()
            .any(|e| e.idx == [0, 2, 0, 3] && e.value.re == 1.0));
        // the Kramers-barred member (-1,2,-1,-2) -> spinors (1,2,1,3) enters
        // with the flipped sign, as do its hermitian partners
        assert!(orbit
            .iter()
            .any(|e| e.idx == [1, 2, 1, 3] && e.value.re == -1.0));
        assert!(orbit
            .iter()
            .any(|e| e.idx == [1, 3, 1, 2] && e.value.re == -1.0));
    }

    #[test]
    fn stream_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MDCINT");
        let mut w = UnfWriter::create(&path).unwrap();
        // header: date/time, nkr = 2, map
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
        // one record with two integrals
        w.write_record(
            &RecordBuilder::new()
                .int(1, 4)
                .int(1, 4)
                .int(2, 4)
                .int(1, 4)
                .int(1, 4)
                .int(2, 4)
                .int(2, 4)
                .f64(0.25)
                .f64(-0.125)
                .build(),
        )
        .unwrap();
        // terminator
        w.write_record(&RecordBuilder::new().int(0, 4).int(0, 4).int(0, 4).build())
            .unwrap();
        w.finish().unwrap();

        let mut seen = Vec::new();
        let (map, count) = read_mdcint(&path, 4, true, |_, raw| {
            seen.push(raw);
            Ok(())
        })
        .unwrap();
        assert_eq!(map.n_pairs(), 2);
        assert_eq!(count, 2);
        assert_eq!(seen[0].value, Complex64::new(0.25, 0.0));
        assert_eq!((seen[0].kkr, seen[0].lkr), (1, 1));
        assert_eq!((seen[1].kkr, seen[1].lkr), (2, 2));
        assert_eq!(seen[1].value, Complex64::new(-0.125, 0.0));
    }
}
