//! Spinor registry: one-particle functions, their attributes and tiling.
//!
//! A spinor is identified by its global index. Attributes (irrep, orbital
//! energy, occupation in the reference determinant, active/T3 flags) are
//! immutable after setup. Spinors of one irrep are tiled into *spinor
//! blocks* of at most `tile_size` members; every tensor dimension of every
//! diagram block is a filtered subset of one spinor block, so the tile size
//! bounds all dense tile extents.
//!
//! Setup order matters and mirrors the import sequence: attributes first,
//! then one of the four active-space policies (plus the optional T3 energy
//! window), then [`SpinorRegistry::build_blocks`], which tiles the irreps and
//! precomputes the eight filtered sublists `(hole|particle) × (any|active) ×
//! (any|T3)` that template construction queries per dimension.

use crate::error::{EngineError, Result};

/// Hole/particle classification of a tensor index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Qpart {
    Hole,
    Particle,
}

impl Qpart {
    /// Parse the one-letter code used in diagram patterns.
    pub fn from_char(ch: char) -> Result<Qpart> {
        match ch {
            'h' => Ok(Qpart::Hole),
            'p' => Ok(Qpart::Particle),
            _ => Err(EngineError::Configuration(format!(
                "wrong quasiparticle symbol: '{ch}' (allowed are: h, p)"
            ))),
        }
    }

    /// One-letter code.
    pub fn to_char(self) -> char {
        match self {
            Qpart::Hole => 'h',
            Qpart::Particle => 'p',
        }
    }
}

/// Attributes of one spinor.
#[derive(Clone, Debug)]
pub struct SpinorAttr {
    pub irrep: usize,
    pub eps: f64,
    pub occupied: bool,
    pub active: bool,
    pub t3_space: bool,
    /// Spinor block this spinor belongs to; filled by [`SpinorRegistry::build_blocks`].
    pub block: usize,
}

/// A contiguous run of spinors sharing one irrep, at most `tile_size` long.
#[derive(Clone, Debug)]
pub struct SpinorBlock {
    pub irrep: usize,
    /// Ascending global spinor indices.
    pub indices: Vec<usize>,
}

/// Process-wide registry of spinors and their tiling.
#[derive(Debug)]
pub struct SpinorRegistry {
    spinors: Vec<SpinorAttr>,
    blocks: Vec<SpinorBlock>,
    /// `filtered[hp][val][t3][block]` — global indices in `block` surviving
    /// the (qpart, active, T3) filter; `t3 = 0` applies no T3 restriction.
    filtered: Vec<Vec<usize>>,
    n_blocks: usize,
}

const FILTER_COMBOS: usize = 8;

#[inline]
fn filter_slot(hp: Qpart, valence: bool, t3: bool) -> usize {
    let h = match hp {
        Qpart::Hole => 0,
        Qpart::Particle => 1,
    };
    ((h * 2) + valence as usize) * 2 + t3 as usize
}

impl SpinorRegistry {
    /// Create the registry from per-spinor `(irrep, energy, occupation)`.
    /// Active/T3 flags start cleared; tiling has not happened yet.
    pub fn new(irreps: &[usize], energies: &[f64], occupations: &[bool]) -> Result<Self> {
        if irreps.len() != energies.len() || irreps.len() != occupations.len() {
            return Err(EngineError::Configuration(format!(
                "spinor attribute arrays disagree in length: {} / {} / {}",
                irreps.len(),
                energies.len(),
                occupations.len()
            )));
        }
        let spinors = irreps
            .iter()
            .zip(energies.iter())
            .zip(occupations.iter())
            .map(|((&irrep, &eps), &occupied)| SpinorAttr {
                irrep,
                eps,
                occupied,
                active: false,
                t3_space: false,
                block: 0,
            })
            .collect();
        Ok(SpinorRegistry {
            spinors,
            blocks: Vec::new(),
            filtered: Vec::new(),
            n_blocks: 0,
        })
    }

    // ------------------------------------------------------------------
    // Active-space policies (mutually exclusive; called before tiling)
    // ------------------------------------------------------------------

    /// Mark spinors with ε inside `[emin, emax]` as active.
    pub fn set_active_energy(&mut self, emin: f64, emax: f64) {
        for s in &mut self.spinors {
            if s.eps >= emin && s.eps <= emax {
                s.active = true;
            }
        }
    }

    /// Mark the `nacth` highest holes and `nactp` lowest particles (by
    /// energy) as active.
    pub fn set_active_total(&mut self, nacth: usize, nactp: usize) -> Result<()> {
        let mut order: Vec<usize> = (0..self.spinors.len()).collect();
        order.sort_by(|&a, &b| {
            self.spinors[a]
                .eps
                .partial_cmp(&self.spinors[b].eps)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let n_occ = self.spinors.iter().filter(|s| s.occupied).count();
        if nacth > n_occ || n_occ + nactp > self.spinors.len() {
            return Err(EngineError::Configuration(format!(
                "active space ({nacth} holes, {nactp} particles) exceeds the spinor space"
            )));
        }
        let lower = self.spinors[order[n_occ - nacth]].eps - 1e-7;
        let upper = self.spinors[order[n_occ + nactp - 1]].eps + 1e-7;
        self.set_active_energy(lower, upper);
        Ok(())
    }

    /// Mark active spinors per irrep: for each `(irrep, nacth, nactp)` spec,
    /// the topmost `nacth` occupied and lowest `nactp` virtual spinors of
    /// that irrep become active. Spinors inside one irrep are assumed sorted
    /// by energy, as the host SCF program writes them.
    pub fn set_active_irreps(&mut self, specs: &[(usize, usize, usize)]) -> Result<()> {
        for &(irrep, nacth, nactp) in specs {
            let members: Vec<usize> = (0..self.spinors.len())
                .filter(|&i| self.spinors[i].irrep == irrep)
                .collect();
            if members.is_empty() {
                tracing::warn!(irrep, "no spinors belong to the requested irrep");
                continue;
            }
            let n_occ = members.iter().filter(|&&i| self.spinors[i].occupied).count();
            if nacth > n_occ || n_occ + nactp > members.len() {
                return Err(EngineError::Configuration(format!(
                    "active-space spec for irrep {irrep} exceeds its spinor count"
                )));
            }
            for &i in &members[n_occ - nacth..n_occ + nactp] {
                self.spinors[i].active = true;
            }
        }
        Ok(())
    }

    /// Mark active spinors by an explicit Boolean vector.
    pub fn set_active_binary(&mut self, active: &[bool]) -> Result<()> {
        if active.len() != self.spinors.len() {
            return Err(EngineError::Configuration(format!(
                "active vector length {} does not match the {} spinors",
                active.len(),
                self.spinors.len()
            )));
        }
        for (s, &a) in self.spinors.iter_mut().zip(active.iter()) {
            if a {
                s.active = true;
            }
        }
        Ok(())
    }

    /// Restrict the spinor space available to triple excitations to the
    /// energy window `[emin, emax]`.
    pub fn set_t3_space_energy(&mut self, emin: f64, emax: f64) {
        for s in &mut self.spinors {
            if s.eps >= emin && s.eps <= emax {
                s.t3_space = true;
            }
        }
    }

    // ------------------------------------------------------------------
    // Tiling
    // ------------------------------------------------------------------

    /// Tile each irrep into spinor blocks of at most `tile_size` members and
    /// build the filtered sublists. Must be called after the active-space
    /// policy has been applied.
    pub fn build_blocks(&mut self, tile_size: usize, num_irreps: usize) -> Result<()> {
        if tile_size == 0 {
            return Err(EngineError::Configuration(
                "spinor tile size must be positive".into(),
            ));
        }
        self.blocks.clear();
        for irrep in 0..num_irreps {
            let members: Vec<usize> = (0..self.spinors.len())
                .filter(|&i| self.spinors[i].irrep == irrep)
                .collect();
            for chunk in members.chunks(tile_size) {
                self.blocks.push(SpinorBlock {
                    irrep,
                    indices: chunk.to_vec(),
                });
            }
        }
        self.n_blocks = self.blocks.len();
        for (b, block) in self.blocks.iter().enumerate() {
            for &i in &block.indices {
                self.spinors[i].block = b;
            }
        }

        // Eight pre-filtered lists per spinor block.
        self.filtered = vec![Vec::new(); FILTER_COMBOS * self.n_blocks];
        for (b, block) in self.blocks.iter().enumerate() {
            for &i in &block.indices {
                let s = &self.spinors[i];
                let hp = if s.occupied { Qpart::Hole } else { Qpart::Particle };
                for valence in [false, true] {
                    if valence && !s.active {
                        continue;
                    }
                    for t3 in [false, true] {
                        if t3 && !s.t3_space {
                            continue;
                        }
                        self.filtered[filter_slot(hp, valence, t3) * self.n_blocks + b].push(i);
                    }
                }
            }
        }

        self.log_block_table();
        Ok(())
    }

    fn log_block_table(&self) {
        for (b, block) in self.blocks.iter().enumerate() {
            tracing::debug!(
                block = b,
                irrep = block.irrep,
                size = block.indices.len(),
                first = block.indices.first().copied().unwrap_or(0),
                last = block.indices.last().copied().unwrap_or(0),
                "spinor block"
            );
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Total number of spinors.
    #[inline]
    pub fn num_spinors(&self) -> usize {
        self.spinors.len()
    }

    /// Number of spinor blocks.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.n_blocks
    }

    /// Attributes of one spinor.
    #[inline]
    pub fn attr(&self, idx: usize) -> &SpinorAttr {
        &self.spinors[idx]
    }

    /// One spinor block.
    #[inline]
    pub fn block(&self, b: usize) -> &SpinorBlock {
        &self.blocks[b]
    }

    /// Irrep of a spinor block.
    #[inline]
    pub fn block_irrep(&self, b: usize) -> usize {
        self.blocks[b].irrep
    }

    /// Spinor block a spinor belongs to.
    #[inline]
    pub fn block_of(&self, idx: usize) -> usize {
        self.spinors[idx].block
    }

    #[inline]
    pub fn is_hole(&self, idx: usize) -> bool {
        self.spinors[idx].occupied
    }

    #[inline]
    pub fn is_particle(&self, idx: usize) -> bool {
        !self.spinors[idx].occupied
    }

    #[inline]
    pub fn is_active(&self, idx: usize) -> bool {
        self.spinors[idx].active
    }

    #[inline]
    pub fn is_t3_space(&self, idx: usize) -> bool {
        self.spinors[idx].t3_space
    }

    /// Orbital energy of a spinor.
    #[inline]
    pub fn eps(&self, idx: usize) -> f64 {
        self.spinors[idx].eps
    }

    /// All orbital energies, indexed by global spinor index.
    pub fn energies(&self) -> Vec<f64> {
        self.spinors.iter().map(|s| s.eps).collect()
    }

    /// Number of electrons in the reference determinant.
    pub fn num_electrons(&self) -> usize {
        self.spinors.iter().filter(|s| s.occupied).count()
    }

    /// Sizes of the active space: (active holes, active particles).
    pub fn active_space_size(&self) -> (usize, usize) {
        let mut nh = 0;
        let mut np = 0;
        for s in &self.spinors {
            if s.active {
                if s.occupied {
                    nh += 1;
                } else {
                    np += 1;
                }
            }
        }
        (nh, np)
    }

    /// Filtered content of spinor block `b`: global indices that are of the
    /// requested quasiparticle kind, optionally active, optionally inside
    /// the T3 space.
    pub fn filtered_list(&self, b: usize, hp: Qpart, valence: bool, t3: bool) -> &[usize] {
        &self.filtered[filter_slot(hp, valence, t3) * self.n_blocks + b]
    }

    /// Fast rejection of a spinor-block tuple: true when any dimension
    /// would have zero surviving indices under the given patterns.
    pub fn tuple_is_empty(
        &self,
        blocks: &[usize],
        qparts: &[Qpart],
        valence: &[bool],
        t3space: &[bool],
        restrict_t3: bool,
    ) -> bool {
        for (i, &b) in blocks.iter().enumerate() {
            let t3 = restrict_t3 && t3space[i];
            if self.filtered_list(b, qparts[i], valence[i], t3).is_empty() {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Four spinors in one irrep: two holes, two particles (the standard
    /// minimal model used across the engine tests).
    fn minimal() -> SpinorRegistry {
        let mut reg = SpinorRegistry::new(
            &[0, 0, 0, 0],
            &[-0.5, -0.4, 0.3, 0.4],
            &[true, true, false, false],
        )
        .unwrap();
        reg.build_blocks(16, 1).unwrap();
        reg
    }

    #[test]
    fn holes_and_particles() {
        let reg = minimal();
        assert_eq!(reg.num_blocks(), 1);
        assert!(reg.is_hole(0) && reg.is_hole(1));
        assert!(reg.is_particle(2) && reg.is_particle(3));
        assert_eq!(reg.filtered_list(0, Qpart::Hole, false, false), &[0, 1]);
        assert_eq!(reg.filtered_list(0, Qpart::Particle, false, false), &[2, 3]);
    }

    #[test]
    fn tiling_respects_tile_size() {
        let mut reg = SpinorRegistry::new(
            &[0, 0, 0, 1, 1],
            &[-1.0, -0.5, 0.1, -0.3, 0.2],
            &[true, true, false, true, false],
        )
        .unwrap();
        reg.build_blocks(2, 2).unwrap();
        // irrep 0 -> blocks {0,1}, {2}; irrep 1 -> block {3,4}
        assert_eq!(reg.num_blocks(), 3);
        assert_eq!(reg.block(0).indices, vec![0, 1]);
        assert_eq!(reg.block(1).indices, vec![2]);
        assert_eq!(reg.block(2).indices, vec![3, 4]);
        assert_eq!(reg.block_of(2), 1);
        assert_eq!(reg.block_irrep(2), 1);
    }

    #[test]
    fn active_space_by_total() {
        let mut reg = SpinorRegistry::new(
            &[0; 6],
            &[-2.0, -1.0, -0.5, 0.5, 1.0, 2.0],
            &[true, true, true, false, false, false],
        )
        .unwrap();
        reg.set_active_total(1, 2).unwrap();
        reg.build_blocks(16, 1).unwrap();
        assert!(!reg.is_active(0) && !reg.is_active(1));
        assert!(reg.is_active(2) && reg.is_active(3) && reg.is_active(4));
        assert!(!reg.is_active(5));
        assert_eq!(reg.active_space_size(), (1, 2));
        assert_eq!(reg.filtered_list(0, Qpart::Particle, true, false), &[3, 4]);
    }

    #[test]
    fn active_space_by_binary_vector() {
        let mut reg = SpinorRegistry::new(
            &[0, 0],
            &[-1.0, 1.0],
            &[true, false],
        )
        .unwrap();
        reg.set_active_binary(&[false, true]).unwrap();
        reg.build_blocks(16, 1).unwrap();
        assert!(!reg.is_active(0));
        assert!(reg.is_active(1));
    }

    #[test]
    fn t3_space_window() {
        let mut reg = SpinorRegistry::new(
            &[0; 4],
            &[-5.0, -0.5, 0.5, 5.0],
            &[true, true, false, false],
        )
        .unwrap();
        reg.set_t3_space_energy(-1.0, 1.0);
        reg.build_blocks(16, 1).unwrap();
        assert_eq!(reg.filtered_list(0, Qpart::Hole, false, true), &[1]);
        assert_eq!(reg.filtered_list(0, Qpart::Particle, false, true), &[2]);
        assert!(reg.tuple_is_empty(
            &[0, 0],
            &[Qpart::Hole, Qpart::Hole],
            &[true, false],
            &[false, false],
            false
        ));
    }
}
