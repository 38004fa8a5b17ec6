//! Permutation (antisymmetrizer) operators.
//!
//! The `perm` operation applies an index antisymmetrizer written in a
//! compact grammar over 1-based index positions:
//!
//! - `(ij)`       — 1 − P(ij)
//! - `(i/jk)`     — 1 − P(ij) − P(ik)
//! - `(ijk)`      — the full three-index antisymmetrizer
//! - `(A|B)`      — the composition of a bra part and a ket part
//!
//! Rank-4 diagrams support `(12)`, `(34)` and `(12|34)`; rank-6 diagrams
//! support the full grammar. The string is parsed once into a table of
//! `(permutation, sign)` tasks; each task is realized as a whole-diagram
//! reorder into a scoped scratch tile followed by a signed `update`.

use crate::arith::Scalar;
use crate::engine::Engine;
use crate::error::{EngineError, Result};

const PERM_SRC: &str = "_perm_src";
const PERM_TMP: &str = "_perm_tmp";

/// One term of an expanded antisymmetrizer: a full-rank permutation string
/// (the `reorder` argument) and its sign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermTask {
    pub perm: String,
    pub sign: i32,
}

impl<T: Scalar> Engine<T> {
    /// Apply the antisymmetrizer `perm_str` to the diagram `name` in place.
    pub fn perm(&mut self, name: &str, perm_str: &str) -> Result<()> {
        let rank = self.rank(name)?;
        let groups = parse_perm_string(perm_str, rank)?;
        for tasks in groups {
            self.apply_elementary(name, &tasks)?;
        }
        Ok(())
    }

    /// One elementary antisymmetrizer: `X ← X + Σ sign·P(X)` over the task
    /// table, with the pre-permutation `X` held in a scoped scratch copy.
    fn apply_elementary(&mut self, name: &str, tasks: &[PermTask]) -> Result<()> {
        let pos = self.mark();
        self.copy(name, PERM_SRC)?;
        for task in tasks {
            self.reorder(PERM_SRC, PERM_TMP, &task.perm)?;
            self.update(name, f64::from(task.sign), PERM_TMP)?;
        }
        self.restore(pos);
        Ok(())
    }
}

/// Parse the permutation grammar into groups of signed tasks, one group per
/// elementary antisymmetrizer (groups are applied sequentially).
pub fn parse_perm_string(perm_str: &str, rank: usize) -> Result<Vec<Vec<PermTask>>> {
    let bad = || {
        EngineError::Configuration(format!(
            "perm: wrong permutation string '{perm_str}' for rank {rank}"
        ))
    };

    if rank != 4 && rank != 6 {
        return Err(EngineError::Configuration(format!(
            "perm: permutation operators for rank {rank} are not implemented"
        )));
    }
    let inner = perm_str
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(bad)?;
    let parts: Vec<&str> = inner.split('|').collect();
    if parts.is_empty() || parts.len() > 2 {
        return Err(bad());
    }

    let mut groups = Vec::new();
    for part in parts {
        let spec = parse_part(part, rank).ok_or_else(bad)?;
        if rank == 4 {
            // Only the bra and ket pair swaps exist for doubles.
            match &spec {
                PartSpec::Pair(a, b) if (*a, *b) == (0, 1) || (*a, *b) == (2, 3) => {}
                _ => return Err(bad()),
            }
        }
        groups.push(expand_part(&spec, rank));
    }
    Ok(groups)
}

/// An elementary antisymmetrizer over explicit 0-based positions.
enum PartSpec {
    /// `(ij)`
    Pair(usize, usize),
    /// `(i/jk)`
    OneVersusTwo(usize, usize, usize),
    /// `(ijk)`
    Triple(usize, usize, usize),
}

fn digit(ch: char, rank: usize) -> Option<usize> {
    let d = ch.to_digit(10)? as usize;
    if d == 0 || d > rank {
        return None;
    }
    Some(d - 1)
}

fn parse_part(part: &str, rank: usize) -> Option<PartSpec> {
    let chars: Vec<char> = part.chars().collect();
    match chars.as_slice() {
        [a, b] => Some(PartSpec::Pair(digit(*a, rank)?, digit(*b, rank)?)),
        [a, '/', b, c] => Some(PartSpec::OneVersusTwo(
            digit(*a, rank)?,
            digit(*b, rank)?,
            digit(*c, rank)?,
        )),
        [a, b, c] => Some(PartSpec::Triple(
            digit(*a, rank)?,
            digit(*b, rank)?,
            digit(*c, rank)?,
        )),
        _ => None,
    }
}

/// Full-rank permutation string swapping positions `a` and `b`.
fn swap_string(rank: usize, a: usize, b: usize) -> String {
    let mut p: Vec<usize> = (0..rank).collect();
    p.swap(a, b);
    p.iter().map(|&i| char::from(b'1' + i as u8)).collect()
}

fn expand_part(spec: &PartSpec, rank: usize) -> Vec<PermTask> {
    match *spec {
        PartSpec::Pair(a, b) => vec![PermTask {
            perm: swap_string(rank, a, b),
            sign: -1,
        }],
        PartSpec::OneVersusTwo(a, b, c) => vec![
            PermTask {
                perm: swap_string(rank, a, b),
                sign: -1,
            },
            PermTask {
                perm: swap_string(rank, a, c),
                sign: -1,
            },
        ],
        PartSpec::Triple(a, b, c) => {
            // All five non-identity arrangements of the three positions,
            // signed by parity.
            let pos = [a, b, c];
            let arrangements: [([usize; 3], i32); 5] = [
                ([1, 0, 2], -1),
                ([1, 2, 0], 1),
                ([0, 2, 1], -1),
                ([2, 0, 1], 1),
                ([2, 1, 0], -1),
            ];
            arrangements
                .iter()
                .map(|(arr, sign)| {
                    let mut p: Vec<usize> = (0..rank).collect();
                    for i in 0..3 {
                        p[pos[i]] = pos[arr[i]];
                    }
                    PermTask {
                        perm: p.iter().map(|&i| char::from(b'1' + i as u8)).collect(),
                        sign: *sign,
                    }
                })
                .collect()
        }
    }
}
