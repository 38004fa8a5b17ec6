//! Symmetry registry: irreps of the Abelian double group and their
//! multiplication table.
//!
//! The registry is created once at import time (from the one-electron
//! integral file, or synthesized for the infinite-axis groups) and is
//! read-only afterwards. Irreps are identified by their C-style index into
//! `irrep_names`; the multiplication table is a dense `n×n` array of result
//! indices. For the infinite-axis groups C∞v and D∞h the table is generated
//! from a requested maximum 2|Ω|: irrep labels such as `"1/2+"`, `"3/2g-"`
//! or `"1u+"` are parsed into (2mⱼ, parity, sign) triples and multiplied by
//! integer arithmetic on the projections; products falling outside the
//! generated range are recorded as invalid and reject the corresponding
//! blocks during template construction.

use crate::arith::Arith;
use crate::error::{EngineError, Result};

/// Sentinel table entry for products that fall outside the generated irrep
/// set of an infinite-axis group.
pub const INVALID_IRREP: usize = usize::MAX;

/// The two infinite-axis double groups with synthesized irrep sets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InfiniteGroup {
    /// C∞v: no inversion center, labels like "1/2+", "0", "1-".
    Cinfv,
    /// D∞h: inversion center, labels like "1/2g+", "0u", "2u-".
    Dinfh,
}

/// Immutable registry of irreps, their names and multiplication rule.
#[derive(Debug, Clone)]
pub struct SymmetryRegistry {
    irrep_names: Vec<String>,
    mult_table: Vec<usize>,
    totally_sym: usize,
    arith: Arith,
}

impl SymmetryRegistry {
    /// Build a registry from an explicit multiplication table (row-major,
    /// C-indexed), as imported from the one-electron integral file.
    pub fn new(
        irrep_names: Vec<String>,
        mult_table: Vec<usize>,
        totally_sym: usize,
        arith: Arith,
    ) -> Result<Self> {
        let n = irrep_names.len();
        if mult_table.len() != n * n {
            return Err(EngineError::Integrity(format!(
                "multiplication table has {} entries, expected {}",
                mult_table.len(),
                n * n
            )));
        }
        if totally_sym >= n {
            return Err(EngineError::Integrity(format!(
                "totally symmetric irrep {totally_sym} out of range ({n} irreps)"
            )));
        }
        for (i, &e) in mult_table.iter().enumerate() {
            if e >= n && e != INVALID_IRREP {
                return Err(EngineError::Integrity(format!(
                    "multiplication table entry [{i}] = {e} out of range ({n} irreps)"
                )));
            }
        }
        Ok(SymmetryRegistry {
            irrep_names,
            mult_table,
            totally_sym,
            arith,
        })
    }

    /// Synthesize the irrep set of an infinite-axis group up to the requested
    /// maximum doubled projection `max_omega_x2` (an odd number; e.g. 31
    /// generates fermionic irreps up to 31/2).
    pub fn infinite_axis(group: InfiniteGroup, max_omega_x2: i32, arith: Arith) -> Result<Self> {
        if max_omega_x2 < 1 || max_omega_x2 % 2 == 0 {
            return Err(EngineError::Configuration(format!(
                "infinite-axis generator needs an odd positive 2|omega| (got {max_omega_x2})"
            )));
        }
        let parities: &[Parity] = match group {
            InfiniteGroup::Cinfv => &[Parity::None],
            InfiniteGroup::Dinfh => &[Parity::Gerade, Parity::Ungerade],
        };

        // Fermionic irreps first (odd 2mj), then bosonic (even 2mj), each
        // sub-list ordered gerade before ungerade. Bosonic projections run one
        // step past the fermionic maximum so that fermion x fermion products
        // near the edge stay inside the table.
        let mut labels: Vec<AxisLabel> = Vec::new();
        for &parity in parities {
            let mut two_mj = 1;
            while two_mj <= max_omega_x2 {
                labels.push(AxisLabel { two_mj, parity });
                labels.push(AxisLabel { two_mj: -two_mj, parity });
                two_mj += 2;
            }
        }
        for &parity in parities {
            labels.push(AxisLabel { two_mj: 0, parity });
            let mut two_mj = 2;
            while two_mj <= max_omega_x2 + 1 {
                labels.push(AxisLabel { two_mj, parity });
                labels.push(AxisLabel { two_mj: -two_mj, parity });
                two_mj += 2;
            }
        }

        let n = labels.len();
        let mut table = vec![INVALID_IRREP; n * n];
        for (i, a) in labels.iter().enumerate() {
            for (j, b) in labels.iter().enumerate() {
                let prod = AxisLabel {
                    two_mj: a.two_mj + b.two_mj,
                    parity: a.parity.mul(b.parity),
                };
                table[i * n + j] = labels
                    .iter()
                    .position(|l| *l == prod)
                    .unwrap_or(INVALID_IRREP);
            }
        }

        let names: Vec<String> = labels.iter().map(AxisLabel::format).collect();
        let totally_sym = labels
            .iter()
            .position(|l| l.two_mj == 0 && l.parity != Parity::Ungerade)
            .expect("generated set always contains the scalar irrep");

        SymmetryRegistry::new(names, table, totally_sym, arith)
    }

    /// Number of irreps.
    #[inline]
    pub fn num_irreps(&self) -> usize {
        self.irrep_names.len()
    }

    /// Name of an irrep by its index.
    pub fn irrep_name(&self, irrep: usize) -> &str {
        &self.irrep_names[irrep]
    }

    /// Look an irrep up by name.
    pub fn irrep_by_name(&self, name: &str) -> Option<usize> {
        self.irrep_names.iter().position(|n| n == name)
    }

    /// The totally symmetric irrep.
    #[inline]
    pub fn totally_symmetric(&self) -> usize {
        self.totally_sym
    }

    /// Engine arithmetic tag derived from the source group.
    #[inline]
    pub fn arith(&self) -> Arith {
        self.arith
    }

    /// Direct product of two irreps; `None` when the product falls outside
    /// the generated set of an infinite-axis group.
    pub fn try_mul(&self, a: usize, b: usize) -> Result<Option<usize>> {
        let n = self.num_irreps();
        if a >= n || b >= n {
            return Err(EngineError::Integrity(format!(
                "multiplication-table lookup ({a}, {b}) out of range ({n} irreps)"
            )));
        }
        let e = self.mult_table[a * n + b];
        Ok(if e == INVALID_IRREP { None } else { Some(e) })
    }

    /// Direct product of two irreps; out-of-set products are an integrity
    /// error.
    pub fn mul(&self, a: usize, b: usize) -> Result<usize> {
        self.try_mul(a, b)?.ok_or_else(|| {
            EngineError::Integrity(format!(
                "direct product {} x {} falls outside the generated irrep set",
                self.irrep_names[a], self.irrep_names[b]
            ))
        })
    }

    /// Direct-product-decomposition filter: does the product of the given
    /// index irreps equal the operator irrep? Bra indices enter directly,
    /// ket indices through their conjugate; for the Abelian double groups
    /// handled here the ket conjugation is absorbed into the table the way
    /// the source program stores it, so a plain left fold suffices.
    pub fn dpd_allowed(&self, index_irreps: &[usize], op_irrep: usize) -> Result<bool> {
        let mut acc = self.totally_sym;
        for &r in index_irreps {
            match self.try_mul(acc, r)? {
                Some(p) => acc = p,
                None => return Ok(false),
            }
        }
        Ok(acc == op_irrep)
    }
}

// ============================================================================
// Infinite-axis label arithmetic
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Parity {
    None,
    Gerade,
    Ungerade,
}

impl Parity {
    fn mul(self, other: Parity) -> Parity {
        match (self, other) {
            (Parity::None, _) | (_, Parity::None) => Parity::None,
            (Parity::Gerade, Parity::Gerade) | (Parity::Ungerade, Parity::Ungerade) => {
                Parity::Gerade
            }
            _ => Parity::Ungerade,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Parity::None => "",
            Parity::Gerade => "g",
            Parity::Ungerade => "u",
        }
    }
}

/// Parsed infinite-axis irrep label: doubled signed projection plus parity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct AxisLabel {
    two_mj: i32,
    parity: Parity,
}

impl AxisLabel {
    /// Human-readable name: "1/2+", "3/2g-", "0", "2u+", ...
    fn format(&self) -> String {
        let mag = self.two_mj.abs();
        let sign = if self.two_mj > 0 { "+" } else { "-" };
        if mag % 2 == 1 {
            format!("{}/2{}{}", mag, self.parity.suffix(), sign)
        } else if mag == 0 {
            format!("0{}", self.parity.suffix())
        } else {
            format!("{}{}{}", mag / 2, self.parity.suffix(), sign)
        }
    }
}
