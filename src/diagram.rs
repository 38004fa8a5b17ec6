//! Diagrams: named block-sparse antisymmetric tensors.
//!
//! A diagram is the engine's tensor object: a rank-2/4/6 operator or
//! amplitude, factored into dense tiles by the Direct Product Decomposition.
//! Template construction enumerates every tuple of spinor blocks, rejects
//! symmetry-forbidden and empty tuples, and allocates a zeroed [`Block`]
//! for each survivor. A dense inverse index over spinor-block tuples gives
//! O(1) block lookup.
//!
//! Index layout conventions: `qparts`, `valence`, `t3space`, `shape` and
//! `indices` all describe the *stored* layout. `order` records where each
//! stored position sits in the natural (bra-then-ket) layout: stored
//! position `i` holds natural index `order[i]` (0-based internally; the
//! string form is 1-based, e.g. `"3412"`).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arith::Scalar;
use crate::block::{Block, CompressPolicy, Storage};
use crate::error::{EngineError, Result};
use crate::memory::MemoryTracker;
use crate::spinors::{Qpart, SpinorRegistry};
use crate::symmetry::SymmetryRegistry;
use crate::MAX_RANK;

/// Slot value marking an absent tuple in the inverse index.
const NO_BLOCK: usize = usize::MAX;

/// Everything template construction needs from the engine context.
pub struct TemplateEnv<'a> {
    pub spinors: &'a SpinorRegistry,
    pub symmetry: &'a SymmetryRegistry,
    pub tracker: &'a MemoryTracker,
    pub scratch_dir: &'a Path,
    /// Whether triple excitations are restricted to the T3 spinor space.
    pub restrict_t3: bool,
    /// Disk-usage level steering the storage-class policy.
    pub disk_level: u8,
    /// Sparse compression policy for in-memory rank-6 blocks, if enabled.
    pub compress: Option<CompressPolicy>,
    /// Shared counter for block ids (scratch file naming).
    pub next_block_id: &'a AtomicU64,
}

/// A named block-sparse antisymmetric tensor.
#[derive(Debug)]
pub struct Diagram<T: Scalar> {
    pub name: String,
    pub rank: usize,
    /// Irrep of the operator this diagram represents.
    pub symmetry: usize,
    pub qparts: Vec<Qpart>,
    pub valence: Vec<bool>,
    pub t3space: Vec<bool>,
    /// Stored→natural index map, 0-based.
    pub order: Vec<usize>,
    /// Whether only one block per antisymmetrizer orbit carries storage.
    pub only_unique: bool,
    pub blocks: Vec<Block<T>>,
    inv_index: Vec<usize>,
    n_spinor_blocks: usize,
}

impl<T: Scalar> Diagram<T> {
    /// Create a zero diagram from pattern strings (`"hhpp"`, `"0011"`,
    /// `"1234"`), enumerating and allocating all surviving blocks.
    pub fn template(
        name: &str,
        qparts: &str,
        valence: &str,
        t3space: &str,
        order: &str,
        perm_unique: bool,
        irrep: usize,
        env: &TemplateEnv<'_>,
    ) -> Result<Diagram<T>> {
        let rank = check_rank(qparts, valence, order)?;
        let qparts = parse_qparts(qparts)?;
        let valence = parse_flags(valence, "valence")?;
        let t3space = parse_flags(t3space, "t3space")?;
        if t3space.len() != rank {
            return Err(EngineError::Configuration(format!(
                "t3space pattern has length {} but the rank is {rank}",
                t3space.len()
            )));
        }
        let order = parse_order(order)?;

        Diagram::template_parsed(
            name,
            qparts,
            valence,
            t3space,
            order,
            perm_unique,
            irrep,
            env,
        )
    }

    /// Create a zero diagram from already-parsed patterns.
    #[allow(clippy::too_many_arguments)]
    pub fn template_parsed(
        name: &str,
        qparts: Vec<Qpart>,
        valence: Vec<bool>,
        t3space: Vec<bool>,
        order: Vec<usize>,
        perm_unique: bool,
        irrep: usize,
        env: &TemplateEnv<'_>,
    ) -> Result<Diagram<T>> {
        let rank = qparts.len();
        let n_spb = env.spinors.num_blocks();
        let storage = storage_class(rank, &qparts, &valence, env.disk_level);
        let compress = if rank == 6 { env.compress } else { None };

        let mut blocks: Vec<Block<T>> = Vec::new();
        if n_spb == 0 {
            return Err(EngineError::Configuration(
                "spinor registry has no blocks; call build_blocks before creating templates".into(),
            ));
        }
        let mut tuple = vec![0usize; rank];
        loop {
            let allowed = {
                let irreps: Vec<usize> =
                    tuple.iter().map(|&b| env.spinors.block_irrep(b)).collect();
                env.symmetry.dpd_allowed(&irreps, irrep)?
            };
            if allowed
                && !env
                    .spinors
                    .tuple_is_empty(&tuple, &qparts, &valence, &t3space, env.restrict_t3)
            {
                let id = env.next_block_id.fetch_add(1, Ordering::Relaxed);
                if let Some(block) = Block::new(
                    id,
                    &tuple,
                    &qparts,
                    &valence,
                    &t3space,
                    &order,
                    env.restrict_t3,
                    perm_unique,
                    storage,
                    env.spinors,
                    env.tracker,
                    compress,
                    env.scratch_dir,
                )? {
                    blocks.push(block);
                }
            }

            // Next tuple of spinor blocks (odometer).
            let mut dim = rank;
            loop {
                if dim == 0 {
                    break;
                }
                dim -= 1;
                tuple[dim] += 1;
                if tuple[dim] < n_spb {
                    break;
                }
                tuple[dim] = 0;
            }
            if tuple.iter().all(|&t| t == 0) {
                break;
            }
        }

        let mut dg = Diagram {
            name: name.to_string(),
            rank,
            symmetry: irrep,
            qparts,
            valence,
            t3space,
            order,
            only_unique: perm_unique,
            blocks,
            inv_index: Vec::new(),
            n_spinor_blocks: n_spb,
        };
        dg.rebuild_inverse_index()?;
        Ok(dg)
    }

    /// Reassemble a diagram from explicit parts (the binary-file reader).
    /// The inverse index must be rebuilt by the caller.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: String,
        rank: usize,
        symmetry: usize,
        qparts: Vec<Qpart>,
        valence: Vec<bool>,
        t3space: Vec<bool>,
        order: Vec<usize>,
        only_unique: bool,
        blocks: Vec<Block<T>>,
        n_spinor_blocks: usize,
    ) -> Diagram<T> {
        Diagram {
            name,
            rank,
            symmetry,
            qparts,
            valence,
            t3space,
            order,
            only_unique,
            blocks,
            inv_index: Vec::new(),
            n_spinor_blocks,
        }
    }

    /// Rebuild the dense tuple→block table. Called after construction and
    /// after any operation that replaces the block list.
    pub fn rebuild_inverse_index(&mut self) -> Result<()> {
        let table_size = self
            .n_spinor_blocks
            .checked_pow(self.rank as u32)
            .ok_or_else(|| {
                EngineError::Resource(format!(
                    "inverse index of rank {} over {} spinor blocks overflows",
                    self.rank, self.n_spinor_blocks
                ))
            })?;
        self.inv_index = vec![NO_BLOCK; table_size];
        for (i, block) in self.blocks.iter().enumerate() {
            let slot = self.tuple_to_slot(&block.spinor_blocks);
            if self.inv_index[slot] != NO_BLOCK {
                return Err(EngineError::Integrity(format!(
                    "diagram '{}': inverse-index collision on tuple {:?}",
                    self.name, block.spinor_blocks
                )));
            }
            self.inv_index[slot] = i;
        }
        Ok(())
    }

    /// The dense tuple→block table (for the binary file format).
    pub(crate) fn inverse_index_table(&self) -> &[usize] {
        &self.inv_index
    }

    #[inline]
    fn tuple_to_slot(&self, tuple: &[usize]) -> usize {
        let mut slot = 0usize;
        for &b in tuple {
            slot = slot * self.n_spinor_blocks + b;
        }
        slot
    }

    /// Index into `blocks` for a spinor-block tuple, or `None` when the
    /// tuple was never created. The found block is verified against the
    /// query; a mismatch means the table is stale and is reported as absence.
    pub fn block_index(&self, tuple: &[usize]) -> Option<usize> {
        if self.blocks.is_empty() || tuple.len() != self.rank {
            return None;
        }
        if tuple.iter().any(|&b| b >= self.n_spinor_blocks) {
            return None;
        }
        let idx = self.inv_index[self.tuple_to_slot(tuple)];
        if idx == NO_BLOCK {
            return None;
        }
        let block = &self.blocks[idx];
        debug_assert_eq!(block.spinor_blocks, tuple, "inverse index out of date");
        if block.spinor_blocks != tuple {
            return None;
        }
        Some(idx)
    }

    /// Block lookup by spinor-block tuple.
    pub fn get_block(&self, tuple: &[usize]) -> Option<&Block<T>> {
        self.block_index(tuple).map(|i| &self.blocks[i])
    }

    // ------------------------------------------------------------------
    // Element access through the canonical orbit
    // ------------------------------------------------------------------

    fn spinor_tuple_blocks(&self, idx: &[usize], spinors: &SpinorRegistry) -> Option<Vec<usize>> {
        idx.iter()
            .map(|&s| (s < spinors.num_spinors()).then(|| spinors.block_of(s)))
            .collect()
    }

    /// Element read by global spinor tuple. Tuples outside every block read
    /// as zero; non-unique blocks resolve through their representative.
    pub fn get(&self, idx: &[usize], spinors: &SpinorRegistry) -> Result<T> {
        debug_assert_eq!(idx.len(), self.rank);
        let Some(tuple) = self.spinor_tuple_blocks(idx, spinors) else {
            return Ok(T::zero());
        };
        let Some(bi) = self.block_index(&tuple) else {
            return Ok(T::zero());
        };
        let block = &self.blocks[bi];
        if block.uniqueness.is_unique {
            return block.get_element(idx);
        }

        let ptu = &block.uniqueness.perm_to_unique;
        let uniq_tuple: Vec<usize> = ptu.iter().map(|&p| tuple[p]).collect();
        let uniq_idx: Vec<usize> = ptu.iter().map(|&p| idx[p]).collect();
        let uniq_block = self.get_block(&uniq_tuple).ok_or_else(|| {
            EngineError::Integrity(format!(
                "diagram '{}': orbit representative of tuple {tuple:?} is missing",
                self.name
            ))
        })?;
        let val = uniq_block.get_element(&uniq_idx)?;
        Ok(val.scale_re(f64::from(block.uniqueness.sign)))
    }

    /// Element write by global spinor tuple. Writes that land in a
    /// non-unique block or outside every block are silently skipped (the
    /// representative holds the value).
    pub fn set(&mut self, idx: &[usize], value: T, spinors: &SpinorRegistry) -> Result<()> {
        debug_assert_eq!(idx.len(), self.rank);
        let Some(tuple) = self.spinor_tuple_blocks(idx, spinors) else {
            return Ok(());
        };
        if let Some(bi) = self.block_index(&tuple) {
            if self.blocks[bi].uniqueness.is_unique {
                return self.blocks[bi].set_element(idx, value);
            }
        }
        Ok(())
    }

    /// Element accumulate by global spinor tuple; same skip rules as `set`.
    pub fn add(&mut self, idx: &[usize], value: T, spinors: &SpinorRegistry) -> Result<()> {
        debug_assert_eq!(idx.len(), self.rank);
        let Some(tuple) = self.spinor_tuple_blocks(idx, spinors) else {
            return Ok(());
        };
        if let Some(bi) = self.block_index(&tuple) {
            if self.blocks[bi].uniqueness.is_unique {
                return self.blocks[bi].add_element(idx, value);
            }
        }
        Ok(())
    }

    /// Read block `bi`'s contents, resolving a non-unique block through its
    /// orbit representative (transiently materialized, never cached).
    pub fn read_block_resolved(&self, bi: usize) -> Result<std::borrow::Cow<'_, [T]>> {
        let block = &self.blocks[bi];
        if block.uniqueness.is_unique {
            return block.read_buf();
        }
        let uniq_tuple: Vec<usize> = block
            .uniqueness
            .perm_to_unique
            .iter()
            .map(|&p| block.spinor_blocks[p])
            .collect();
        let uniq = self.get_block(&uniq_tuple).ok_or_else(|| {
            EngineError::Integrity(format!(
                "diagram '{}': orbit representative of tuple {:?} is missing",
                self.name, block.spinor_blocks
            ))
        })?;
        Ok(std::borrow::Cow::Owned(block.restore_from(uniq)?))
    }

    // ------------------------------------------------------------------
    // Whole-diagram helpers
    // ------------------------------------------------------------------

    /// Zero every block buffer.
    pub fn clear(&mut self) -> Result<()> {
        for block in &mut self.blocks {
            block.clear()?;
        }
        Ok(())
    }

    /// Deep copy under a new name. Block buffers are copied pairwise; the
    /// copy allocates its own scratch files.
    pub fn duplicate(&self, new_name: &str, env: &TemplateEnv<'_>) -> Result<Diagram<T>> {
        let mut clone: Diagram<T> = Diagram::template_parsed(
            new_name,
            self.qparts.clone(),
            self.valence.clone(),
            self.t3space.clone(),
            self.order.clone(),
            self.only_unique,
            self.symmetry,
            env,
        )?;
        if clone.blocks.len() != self.blocks.len() {
            return Err(EngineError::Integrity(format!(
                "diagram '{}': copy produced {} blocks instead of {}",
                self.name,
                clone.blocks.len(),
                self.blocks.len()
            )));
        }
        for (dst, src) in clone.blocks.iter_mut().zip(self.blocks.iter()) {
            dst.copy_data_from(src)?;
        }
        Ok(clone)
    }

    /// Pattern strings in their textual form (for summaries and files).
    pub fn qparts_string(&self) -> String {
        self.qparts.iter().map(|q| q.to_char()).collect()
    }

    pub fn valence_string(&self) -> String {
        self.valence.iter().map(|&v| if v { '1' } else { '0' }).collect()
    }

    pub fn t3space_string(&self) -> String {
        self.t3space.iter().map(|&v| if v { '1' } else { '0' }).collect()
    }

    pub fn order_string(&self) -> String {
        self.order.iter().map(|&o| char::from(b'1' + o as u8)).collect()
    }

    /// Storage class of the diagram: on-disk as soon as one block is.
    pub fn storage(&self) -> Storage {
        if self
            .blocks
            .iter()
            .any(|b| b.storage == Storage::OnDisk)
        {
            Storage::OnDisk
        } else {
            Storage::InMemory
        }
    }

    /// Bytes used by block buffers: `(ram, disk)`.
    pub fn memory_used(&self) -> (usize, usize) {
        let mut ram = 0;
        let mut disk = 0;
        for b in &self.blocks {
            let (r, d) = b.footprint();
            ram += r;
            disk += d;
        }
        (ram, disk)
    }

    /// Number of elements in unique blocks.
    pub fn count_amplitudes(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.uniqueness.is_unique)
            .map(|b| b.size)
            .sum()
    }

    /// One-line summary (name, irrep, patterns, unique/total blocks).
    pub fn summary(&self, symmetry: &SymmetryRegistry) -> String {
        let n_unique = self
            .blocks
            .iter()
            .filter(|b| b.uniqueness.is_unique)
            .count();
        format!(
            "diagram {}: irrep={}({}) {} {} {} {} {}/{}",
            self.name,
            self.symmetry,
            symmetry.irrep_name(self.symmetry),
            self.qparts_string(),
            self.valence_string(),
            self.t3space_string(),
            self.order_string(),
            n_unique,
            self.blocks.len()
        )
    }

    /// Compatibility check for pointwise operations; `op` names the
    /// caller for the error message.
    pub fn check_pointwise_compatible(&self, other: &Diagram<T>, op: &str) -> Result<()> {
        if self.symmetry != other.symmetry {
            return Err(EngineError::ShapeMismatch(format!(
                "{op}: operators '{}' and '{}' belong to different irreps ({} vs {})",
                self.name, other.name, self.symmetry, other.symmetry
            )));
        }
        if self.rank != other.rank {
            return Err(EngineError::ShapeMismatch(format!(
                "{op}: ranks must coincide ({}:{} != {}:{})",
                self.name, self.rank, other.name, other.rank
            )));
        }
        if self.qparts != other.qparts {
            return Err(EngineError::ShapeMismatch(format!(
                "{op}: 'qparts' strings must coincide ({} vs {})",
                self.qparts_string(),
                other.qparts_string()
            )));
        }
        if self.valence != other.valence {
            return Err(EngineError::ShapeMismatch(format!(
                "{op}: 'valence' strings must coincide ({} vs {})",
                self.valence_string(),
                other.valence_string()
            )));
        }
        if self.t3space != other.t3space {
            return Err(EngineError::ShapeMismatch(format!(
                "{op}: 't3space' strings must coincide ({} vs {})",
                self.t3space_string(),
                other.t3space_string()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Pattern parsing
// ============================================================================

/// Validate that the three pattern strings agree on an even rank 2..=6.
pub fn check_rank(qparts: &str, valence: &str, order: &str) -> Result<usize> {
    let rank = qparts.len();
    if valence.len() != rank || order.len() != rank {
        return Err(EngineError::Configuration(format!(
            "lengths of 'qparts' ('{qparts}'), 'valence' ('{valence}') and 'order' ('{order}') \
             must coincide"
        )));
    }
    if rank == 0 || rank % 2 == 1 || rank > MAX_RANK {
        return Err(EngineError::Configuration(format!(
            "pattern length must be 2, 4 or 6 (got {rank})"
        )));
    }
    Ok(rank)
}

/// Parse a quasiparticle string (`"hhpp"`).
pub fn parse_qparts(s: &str) -> Result<Vec<Qpart>> {
    s.chars().map(Qpart::from_char).collect()
}

/// Parse a 0/1 flag string (`"0011"`).
pub fn parse_flags(s: &str, what: &str) -> Result<Vec<bool>> {
    s.chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            _ => Err(EngineError::Configuration(format!(
                "wrong {what} flag: '{c}' (allowed are: 0, 1)"
            ))),
        })
        .collect()
}

/// Parse a 1-based permutation string (`"3412"`) into its 0-based form and
/// verify it is a permutation.
pub fn parse_order(s: &str) -> Result<Vec<usize>> {
    let rank = s.len();
    let mut out = Vec::with_capacity(rank);
    for c in s.chars() {
        let d = c.to_digit(10).ok_or_else(|| {
            EngineError::Configuration(format!(
                "wrong order symbol: '{c}' (only digits are allowed)"
            ))
        })? as usize;
        if d == 0 || d > rank {
            return Err(EngineError::Configuration(format!(
                "order digit {d} out of range 1..={rank}"
            )));
        }
        out.push(d - 1);
    }
    let mut seen = vec![false; rank];
    for &o in &out {
        if seen[o] {
            return Err(EngineError::Configuration(format!(
                "order string '{s}' is not a permutation"
            )));
        }
        seen[o] = true;
    }
    Ok(out)
}

/// Storage class for a new diagram: rank-4 all-particle diagrams (pppp and
/// the active-line pppg variants) go to disk at level ≥ 2, rank-4 diagrams
/// with at least three inactive particle indices at level ≥ 3, rank-6
/// diagrams at level ≥ 1.
pub fn storage_class(rank: usize, qparts: &[Qpart], valence: &[bool], disk_level: u8) -> Storage {
    if rank >= 6 && disk_level >= 1 {
        return Storage::OnDisk;
    }
    if rank == 4 {
        let all_particle = qparts.iter().all(|&q| q == Qpart::Particle);
        let np_inactive = qparts
            .iter()
            .zip(valence.iter())
            .filter(|(q, v)| **q == Qpart::Particle && !**v)
            .count();
        if all_particle && np_inactive >= 3 && disk_level >= 2 {
            return Storage::OnDisk;
        }
        if np_inactive >= 3 && disk_level >= 3 {
            return Storage::OnDisk;
        }
    }
    Storage::InMemory
}

// ============================================================================
// Tests
// ============================================================================
