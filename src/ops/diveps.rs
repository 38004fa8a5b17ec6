//! Division by energy denominators, with the optional per-sector shifts,
//! plus the denominator-based intruder-state diagnostic.
//!
//! For every element of a diagram `V[in|out]` the Møller–Plesset-like
//! denominator is `D = Σ_in ε − Σ_out ε` over the bra/ket halves of the
//! index tuple. Elements with magnitude below the zero threshold are
//! skipped. The rank-2/4/6 paths unroll the index arithmetic; rank 6
//! accumulates the denominator stepwise through the loop nest so each level
//! adds a single ε.

use num_complex::Complex64;

use crate::arith::Scalar;
use crate::block::Block;
use crate::engine::{Engine, ShiftPolicy, ShiftType};
use crate::error::Result;
use crate::tensor;
use crate::ZERO_THRESH;

impl<T: Scalar> Engine<T> {
    /// Divide every element of `name` by its energy denominator, applying
    /// the current sector's shift policy.
    pub fn diveps(&mut self, name: &str) -> Result<()> {
        let eps = self.spinors.energies();
        let policy = self.opts.current_shift();
        let negate = self.opts.diveps_invert;
        let dg = self.diagram_mut(name)?;
        let half = dg.rank / 2;

        for block in &mut dg.blocks {
            if !block.uniqueness.is_unique || !block.has_storage() {
                continue;
            }
            block.load()?;
            match block.rank {
                2 => diveps_block_rank2(block, &eps, &policy, negate, half)?,
                4 => diveps_block_rank4(block, &eps, &policy, negate, half)?,
                6 => diveps_block_rank6(block, &eps, &policy, negate)?,
                _ => diveps_block_general(block, &eps, &policy, negate, half)?,
            }
            block.store()?;
        }
        Ok(())
    }

    /// Denominator-based prediction of possible intruder states: report the
    /// `nmax` most positive denominators of a cluster-operator diagram.
    /// All-active index tuples and exclusion-principle-violating tuples
    /// (a repeated index within the bra or the ket) are excluded. This is a
    /// diagnostic only, never fatal.
    pub fn predict_intruders(&self, name: &str, nmax: usize) -> Result<Vec<(Vec<usize>, f64)>> {
        let dg = self.diagram(name)?;
        let eps = self.spinors.energies();
        let rank = dg.rank;
        let half = rank / 2;

        let mut top: Vec<(Vec<usize>, f64)> = Vec::new();
        let mut idx = vec![0usize; rank];
        let mut spinor_idx = vec![0usize; rank];
        for block in &dg.blocks {
            if !block.uniqueness.is_unique {
                continue;
            }
            for lin in 0..block.size {
                tensor::linear_to_index(&block.shape, lin, &mut idx);
                for d in 0..rank {
                    spinor_idx[d] = block.indices[d][idx[d]];
                }
                if spinor_idx.iter().all(|&s| self.spinors.is_active(s)) {
                    continue;
                }
                if has_repeats(&spinor_idx[..half]) || has_repeats(&spinor_idx[half..]) {
                    continue;
                }
                let mut denom = 0.0;
                for &s in &spinor_idx[..half] {
                    denom += eps[s];
                }
                for &s in &spinor_idx[half..] {
                    denom -= eps[s];
                }
                rank_insert(&mut top, nmax, &spinor_idx, denom);
            }
        }

        for (idx, denom) in &top {
            if *denom > 0.0 {
                tracing::warn!(
                    diagram = %name,
                    ?idx,
                    denom,
                    "possible intruder state (positive energy denominator)"
                );
            }
        }
        Ok(top)
    }
}

fn has_repeats(side: &[usize]) -> bool {
    for i in 0..side.len() {
        for j in i + 1..side.len() {
            if side[i] == side[j] {
                return true;
            }
        }
    }
    false
}

fn rank_insert(top: &mut Vec<(Vec<usize>, f64)>, nmax: usize, idx: &[usize], denom: f64) {
    let pos = top
        .iter()
        .position(|(_, d)| denom > *d)
        .unwrap_or(top.len());
    if pos < nmax {
        top.insert(pos, (idx.to_vec(), denom));
        top.truncate(nmax);
    }
}

/// Divide one amplitude by a (possibly shifted) denominator.
pub(crate) fn divide_with_shift<T: Scalar>(
    val: T,
    denom: f64,
    rank: usize,
    policy: &ShiftPolicy,
) -> T {
    let shift = policy.shifts[(rank / 2 - 1).min(2)];
    let m = policy.power;
    match policy.shift_type {
        ShiftType::None => val.div_re(denom),
        ShiftType::Real => {
            let d = denom + shift * (shift / (denom + shift)).powi(m);
            val.div_re(d)
        }
        ShiftType::RealImag => {
            let d = denom
                + shift * shift / denom
                    * (shift * shift / (denom * denom + shift * shift)).powi(m);
            val.div_re(d)
        }
        ShiftType::Imag => {
            let cdenom = Complex64::new(denom, 0.0)
                + Complex64::new(0.0, shift)
                    * (shift.abs() / Complex64::new(denom, shift).norm()).powi(m);
            T::from_c64(val.into_c64() / cdenom)
        }
        ShiftType::Taylor => {
            let top = 1.0 - shift / (denom + shift);
            let bot = 1.0 - (shift / (denom + shift)).powi(m + 1);
            let d = (denom + shift) * top / bot;
            val.div_re(d)
        }
    }
}

fn diveps_block_rank2<T: Scalar>(
    block: &mut Block<T>,
    eps: &[f64],
    policy: &ShiftPolicy,
    negate: bool,
    _half: usize,
) -> Result<()> {
    let dim1 = block.shape[1];
    let idx0 = block.indices[0].clone();
    let idx1 = block.indices[1].clone();
    let buf = block.buf_mut()?;
    let mut lin = 0usize;
    for &s0 in &idx0 {
        let d0 = eps[s0];
        for j in 0..dim1 {
            let t = buf[lin];
            if t.abs() >= ZERO_THRESH {
                let mut denom = d0 - eps[idx1[j]];
                if negate {
                    denom = -denom;
                }
                buf[lin] = divide_with_shift(t, denom, 2, policy);
            }
            lin += 1;
        }
    }
    Ok(())
}

fn diveps_block_rank4<T: Scalar>(
    block: &mut Block<T>,
    eps: &[f64],
    policy: &ShiftPolicy,
    negate: bool,
    _half: usize,
) -> Result<()> {
    let shape = block.shape.clone();
    let idx = block.indices.clone();
    let buf = block.buf_mut()?;
    let mut lin = 0usize;
    for i0 in 0..shape[0] {
        let d0 = eps[idx[0][i0]];
        for i1 in 0..shape[1] {
            let d01 = d0 + eps[idx[1][i1]];
            for i2 in 0..shape[2] {
                let d012 = d01 - eps[idx[2][i2]];
                for i3 in 0..shape[3] {
                    let t = buf[lin];
                    if t.abs() >= ZERO_THRESH {
                        let mut denom = d012 - eps[idx[3][i3]];
                        if negate {
                            denom = -denom;
                        }
                        buf[lin] = divide_with_shift(t, denom, 4, policy);
                    }
                    lin += 1;
                }
            }
        }
    }
    Ok(())
}

fn diveps_block_rank6<T: Scalar>(
    block: &mut Block<T>,
    eps: &[f64],
    policy: &ShiftPolicy,
    negate: bool,
) -> Result<()> {
    let shape = block.shape.clone();
    let idx = block.indices.clone();
    let buf = block.buf_mut()?;
    let mut lin = 0usize;
    for i0 in 0..shape[0] {
        let d0 = eps[idx[0][i0]];
        for i1 in 0..shape[1] {
            let d01 = d0 + eps[idx[1][i1]];
            for i2 in 0..shape[2] {
                let d012 = d01 + eps[idx[2][i2]];
                for i3 in 0..shape[3] {
                    let d0123 = d012 - eps[idx[3][i3]];
                    for i4 in 0..shape[4] {
                        let d01234 = d0123 - eps[idx[4][i4]];
                        for i5 in 0..shape[5] {
                            let t = buf[lin];
                            if t.abs() >= ZERO_THRESH {
                                let mut denom = d01234 - eps[idx[5][i5]];
                                if negate {
                                    denom = -denom;
                                }
                                buf[lin] = divide_with_shift(t, denom, 6, policy);
                            }
                            lin += 1;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn diveps_block_general<T: Scalar>(
    block: &mut Block<T>,
    eps: &[f64],
    policy: &ShiftPolicy,
    negate: bool,
    half: usize,
) -> Result<()> {
    let rank = block.rank;
    let shape = block.shape.clone();
    let indices = block.indices.clone();
    let buf = block.buf_mut()?;
    let mut idx = vec![0usize; rank];
    for (lin, t) in buf.iter_mut().enumerate() {
        if t.abs() < ZERO_THRESH {
            continue;
        }
        tensor::linear_to_index(&shape, lin, &mut idx);
        let mut denom = 0.0;
        for d in 0..half {
            denom += eps[indices[d][idx[d]]];
        }
        for d in half..rank {
            denom -= eps[indices[d][idx[d]]];
        }
        if negate {
            denom = -denom;
        }
        *t = divide_with_shift(*t, denom, rank, policy);
    }
    Ok(())
}
