//! Symmetry blocks: the dense tiles diagrams are built from.
//!
//! A block is one surviving tuple of spinor blocks. It owns its dense
//! row-major buffer (or its on-disk image, or nothing for dummy blocks) and
//! the metadata of its canonical orbit under the bra/ket antisymmetrizer.
//!
//! ## Storage discipline
//!
//! Every operation brackets its inner loop with [`Block::load`] on entry and
//! [`Block::store`] / [`Block::unload`] on exit, so that on every exit path
//! each block is back in its declared storage class: in-memory blocks hold a
//! live buffer (possibly sparse-compressed for rank-6), on-disk blocks are
//! flushed to their backing file with the RAM copy freed, dummy blocks hold
//! nothing. Read-only consumers can use [`Block::read_buf`], which never
//! changes the storage state and therefore composes with parallel loops.
//!
//! ## Canonical orbit
//!
//! When a diagram is created permutationally unique, each block computes the
//! sorting permutations of its bra and ket spinor-block tuples (in the
//! *natural* index layout, i.e. with the `order` permutation undone). The
//! block whose both tuples are already ascending is the orbit representative
//! and carries storage; every other member stores only `sign`,
//! `perm_to_unique` and `perm_from_unique`. A block whose bra or ket types
//! are non-uniform has no antisymmetry partner and is always unique.

use std::borrow::Cow;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};

use crate::arith::Scalar;
use crate::compress::{self, Compressed, Width};
use crate::error::{EngineError, Result};
use crate::memory::{MemoryTracker, TrackedVec};
use crate::spinors::{Qpart, SpinorRegistry};
use crate::tensor;

/// Storage class of a block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Storage {
    /// Dense buffer lives in RAM (possibly sparse-compressed for rank 6).
    InMemory,
    /// Buffer lives in a scratch file; paged in on demand.
    OnDisk,
    /// No storage: the block is recovered from its unique partner.
    Dummy,
}

/// Canonical-orbit metadata of a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Uniqueness {
    /// Whether this block is the stored representative of its orbit.
    pub is_unique: bool,
    /// Sign relating this block to its representative.
    pub sign: i32,
    /// Orbit size under independent bra/ket permutations (the weight that
    /// restores full sums from unique-block sums).
    pub n_equal_perms: usize,
    /// Stored-layout permutation mapping this block's indices onto the
    /// representative's.
    pub perm_to_unique: Vec<usize>,
    /// Inverse of `perm_to_unique`.
    pub perm_from_unique: Vec<usize>,
}

impl Uniqueness {
    fn trivial(rank: usize) -> Self {
        Uniqueness {
            is_unique: true,
            sign: 1,
            n_equal_perms: 1,
            perm_to_unique: (0..rank).collect(),
            perm_from_unique: (0..rank).collect(),
        }
    }
}

/// Per-block compression policy, copied from the engine options at template
/// construction time.
#[derive(Copy, Clone, Debug)]
pub struct CompressPolicy {
    pub width: Width,
    pub thresh: f64,
}

/// One dense tile of a diagram.
#[derive(Debug)]
pub struct Block<T: Scalar> {
    /// Unique id, used for scratch file naming.
    pub id: u64,
    pub rank: usize,
    /// Spinor-block number for each dimension.
    pub spinor_blocks: Vec<usize>,
    /// Global spinor indices surviving the per-dimension filter (ascending).
    pub indices: Vec<Vec<usize>>,
    /// Per-dimension tile extents.
    pub shape: Vec<usize>,
    /// Product of the shape.
    pub size: usize,
    pub storage: Storage,
    pub uniqueness: Uniqueness,
    /// Whether the in-memory representation is currently sparse-compressed.
    pub is_compressed: bool,

    buf: Option<TrackedVec<T>>,
    sparse: Option<Compressed<T>>,
    file_path: Option<PathBuf>,
    compress: Option<CompressPolicy>,
    tracker: MemoryTracker,
}

impl<T: Scalar> Block<T> {
    /// Construct a zeroed block for the given spinor-block tuple.
    ///
    /// `qparts`/`valence`/`t3space` are the stored-layout patterns of the
    /// owning diagram, `order` its stored→natural map (0-based). Returns
    /// `None` when any dimension has no surviving spinors.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        spinor_blocks: &[usize],
        qparts: &[Qpart],
        valence: &[bool],
        t3space: &[bool],
        order: &[usize],
        restrict_t3: bool,
        perm_unique: bool,
        storage: Storage,
        registry: &SpinorRegistry,
        tracker: &MemoryTracker,
        compress: Option<CompressPolicy>,
        scratch_dir: &std::path::Path,
    ) -> Result<Option<Block<T>>> {
        let rank = spinor_blocks.len();
        let mut indices = Vec::with_capacity(rank);
        let mut shape = Vec::with_capacity(rank);
        let mut size = 1usize;
        for i in 0..rank {
            let t3 = restrict_t3 && t3space[i];
            let list = registry.filtered_list(spinor_blocks[i], qparts[i], valence[i], t3);
            if list.is_empty() {
                return Ok(None);
            }
            shape.push(list.len());
            size *= list.len();
            indices.push(list.to_vec());
        }

        let uniqueness = if perm_unique {
            compute_uniqueness(spinor_blocks, qparts, valence, order)
        } else {
            Uniqueness::trivial(rank)
        };

        // Non-representative blocks carry no storage of their own.
        let storage = if uniqueness.is_unique { storage } else { Storage::Dummy };

        let file_path = match storage {
            Storage::OnDisk => Some(scratch_dir.join(format!("block-{}-{}.sb", std::process::id(), id))),
            _ => None,
        };

        let mut block = Block {
            id,
            rank,
            spinor_blocks: spinor_blocks.to_vec(),
            indices,
            shape,
            size,
            storage,
            uniqueness,
            is_compressed: false,
            buf: None,
            sparse: None,
            file_path,
            compress,
            tracker: tracker.clone(),
        };

        if block.storage != Storage::Dummy {
            block.buf = Some(tracker.alloc_zeroed(block.size)?);
            // Flush to the declared storage class right away.
            block.store()?;
        }
        Ok(Some(block))
    }

    /// Whether this block can hold data at all.
    #[inline]
    pub fn has_storage(&self) -> bool {
        self.storage != Storage::Dummy
    }

    /// Reassemble a block from explicitly given parts (the binary-file
    /// reader). The caller provides the dense buffer for in-memory blocks
    /// and the backing file path for on-disk ones.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: u64,
        spinor_blocks: Vec<usize>,
        indices: Vec<Vec<usize>>,
        shape: Vec<usize>,
        storage: Storage,
        uniqueness: Uniqueness,
        buf: Option<Vec<T>>,
        file_path: Option<PathBuf>,
        compress: Option<CompressPolicy>,
        tracker: &MemoryTracker,
    ) -> Result<Block<T>> {
        let rank = spinor_blocks.len();
        let size = shape.iter().product();
        let buf = match buf {
            Some(v) => {
                if v.len() != size {
                    return Err(EngineError::Integrity(format!(
                        "block {id}: buffer of {} elements does not match size {size}",
                        v.len()
                    )));
                }
                Some(tracker.adopt(v)?)
            }
            None => None,
        };
        let mut block = Block {
            id,
            rank,
            spinor_blocks,
            indices,
            shape,
            size,
            storage,
            uniqueness,
            is_compressed: false,
            buf,
            sparse: None,
            file_path,
            compress,
            tracker: tracker.clone(),
        };
        if block.storage != Storage::Dummy && block.buf.is_some() {
            block.store()?;
        }
        Ok(block)
    }

    // ------------------------------------------------------------------
    // Buffer lifecycle
    // ------------------------------------------------------------------

    /// Page the dense buffer in (read the scratch file, or expand the
    /// sparse form). No-op for live in-memory buffers and dummy blocks.
    pub fn load(&mut self) -> Result<()> {
        match self.storage {
            Storage::Dummy => Ok(()),
            Storage::InMemory => {
                if self.is_compressed {
                    let sparse = self.sparse.take().ok_or_else(|| {
                        EngineError::Integrity(format!(
                            "block {}: compressed flag set but no sparse data",
                            self.id
                        ))
                    })?;
                    let mut buf = self.tracker.alloc_zeroed(self.size)?;
                    compress::decompress(&sparse, &mut buf);
                    self.buf = Some(buf);
                    self.is_compressed = false;
                }
                Ok(())
            }
            Storage::OnDisk => {
                if self.buf.is_some() {
                    return Ok(());
                }
                let path = self.file_path.as_ref().expect("on-disk block has a path");
                let bytes = fs::read(path).map_err(|e| EngineError::io(path.clone(), e))?;
                let elem = element_bytes::<T>();
                if bytes.len() != self.size * elem {
                    return Err(EngineError::Io {
                        path: path.clone(),
                        message: format!(
                            "block file holds {} bytes, expected {}",
                            bytes.len(),
                            self.size * elem
                        ),
                    });
                }
                let mut buf = self.tracker.alloc_zeroed::<T>(self.size)?;
                decode_elements(&bytes, &mut buf);
                self.buf = Some(buf);
                Ok(())
            }
        }
    }

    /// Write the buffer back to its declared storage class and release the
    /// RAM copy where the class says so.
    pub fn store(&mut self) -> Result<()> {
        match self.storage {
            Storage::Dummy => Ok(()),
            Storage::InMemory => {
                if let Some(policy) = self.compress {
                    if self.rank == 6 && !self.is_compressed {
                        let buf = self.buf.take().ok_or_else(|| {
                            EngineError::Integrity(format!("block {}: store without a buffer", self.id))
                        })?;
                        self.sparse = Some(compress::compress(&buf, policy.width, policy.thresh));
                        self.is_compressed = true;
                    }
                }
                Ok(())
            }
            Storage::OnDisk => {
                let buf = self.buf.take().ok_or_else(|| {
                    EngineError::Integrity(format!("block {}: store without a buffer", self.id))
                })?;
                let path = self.file_path.as_ref().expect("on-disk block has a path");
                let mut bytes = vec![0u8; buf.len() * element_bytes::<T>()];
                encode_elements(&buf, &mut bytes);
                let mut file = fs::File::create(path).map_err(|e| {
                    EngineError::Resource(format!("cannot open block file {path:?}: {e}"))
                })?;
                file.write_all(&bytes)
                    .and_then(|_| file.flush())
                    .map_err(|e| EngineError::Resource(format!("cannot extend block file {path:?}: {e}")))?;
                Ok(())
            }
        }
    }

    /// Release the RAM copy of an on-disk block without writing (the file is
    /// assumed current). Re-compresses in-memory rank-6 blocks.
    pub fn unload(&mut self) -> Result<()> {
        match self.storage {
            Storage::OnDisk => {
                self.buf = None;
                Ok(())
            }
            Storage::InMemory => self.store(),
            Storage::Dummy => Ok(()),
        }
    }

    /// The live dense buffer; an integrity error if not loaded.
    pub fn buf(&self) -> Result<&[T]> {
        self.buf.as_deref().ok_or_else(|| {
            EngineError::Integrity(format!("block {}: buffer accessed while not loaded", self.id))
        })
    }

    /// Mutable live dense buffer.
    pub fn buf_mut(&mut self) -> Result<&mut [T]> {
        let id = self.id;
        self.buf.as_deref_mut().ok_or_else(|| {
            EngineError::Integrity(format!("block {id}: buffer accessed while not loaded"))
        })
    }

    /// Read the block contents without changing its storage state: borrowed
    /// for live in-memory buffers, owned for paged-out or compressed ones.
    /// Dummy blocks read as zeros.
    pub fn read_buf(&self) -> Result<Cow<'_, [T]>> {
        match self.storage {
            Storage::Dummy => Ok(Cow::Owned(vec![T::zero(); self.size])),
            Storage::InMemory => {
                if let Some(buf) = self.buf.as_deref() {
                    Ok(Cow::Borrowed(buf))
                } else if let Some(sparse) = &self.sparse {
                    let mut out = vec![T::zero(); self.size];
                    compress::decompress(sparse, &mut out);
                    Ok(Cow::Owned(out))
                } else {
                    Err(EngineError::Integrity(format!(
                        "block {}: in-memory block holds neither buffer nor sparse data",
                        self.id
                    )))
                }
            }
            Storage::OnDisk => {
                if let Some(buf) = self.buf.as_deref() {
                    return Ok(Cow::Borrowed(buf));
                }
                let path = self.file_path.as_ref().expect("on-disk block has a path");
                let mut bytes = Vec::new();
                fs::File::open(path)
                    .and_then(|mut f| f.read_to_end(&mut bytes))
                    .map_err(|e| EngineError::io(path.clone(), e))?;
                if bytes.len() != self.size * element_bytes::<T>() {
                    return Err(EngineError::Io {
                        path: path.clone(),
                        message: format!(
                            "block file holds {} bytes, expected {}",
                            bytes.len(),
                            self.size * element_bytes::<T>()
                        ),
                    });
                }
                let mut out = vec![T::zero(); self.size];
                decode_elements(&bytes, &mut out);
                Ok(Cow::Owned(out))
            }
        }
    }

    /// Zero all elements.
    pub fn clear(&mut self) -> Result<()> {
        if !self.has_storage() {
            return Ok(());
        }
        self.load()?;
        for v in self.buf_mut()? {
            *v = T::zero();
        }
        self.store()
    }

    /// Copy all elements from `src` (same shape assumed by the caller's
    /// invariants; sizes are still checked).
    pub fn copy_data_from(&mut self, src: &Block<T>) -> Result<()> {
        if !self.has_storage() {
            return Ok(());
        }
        if self.size != src.size {
            return Err(EngineError::ShapeMismatch(format!(
                "block copy: sizes differ ({} vs {})",
                self.size, src.size
            )));
        }
        let data = src.read_buf()?;
        self.load()?;
        self.buf_mut()?.copy_from_slice(&data);
        self.store()
    }

    // ------------------------------------------------------------------
    // Element access
    // ------------------------------------------------------------------

    /// Map a global spinor tuple to the block-relative compound index;
    /// `None` when any spinor does not belong to the corresponding tile.
    pub fn relative_index(&self, spinor_idx: &[usize]) -> Option<Vec<usize>> {
        let mut rel = Vec::with_capacity(self.rank);
        for (dim, &s) in spinor_idx.iter().enumerate() {
            match self.indices[dim].binary_search(&s) {
                Ok(r) => rel.push(r),
                Err(_) => return None,
            }
        }
        Some(rel)
    }

    /// Element read by global spinor tuple; zero when out of range.
    /// The buffer must be readable (any storage class).
    pub fn get_element(&self, spinor_idx: &[usize]) -> Result<T> {
        let Some(rel) = self.relative_index(spinor_idx) else {
            return Ok(T::zero());
        };
        let data = self.read_buf()?;
        Ok(tensor::get_element(&data, &self.shape, &rel))
    }

    /// Element write by global spinor tuple; silently skipped when the tuple
    /// does not belong to this tile.
    pub fn set_element(&mut self, spinor_idx: &[usize], value: T) -> Result<()> {
        let Some(rel) = self.relative_index(spinor_idx) else {
            return Ok(());
        };
        self.load()?;
        let shape = self.shape.clone();
        tensor::set_element(self.buf_mut()?, &shape, &rel, value);
        self.store()
    }

    /// Element accumulate by global spinor tuple; silently skipped when out
    /// of range.
    pub fn add_element(&mut self, spinor_idx: &[usize], value: T) -> Result<()> {
        let Some(rel) = self.relative_index(spinor_idx) else {
            return Ok(());
        };
        self.load()?;
        let shape = self.shape.clone();
        tensor::add_element(self.buf_mut()?, &shape, &rel, value);
        self.store()
    }

    /// Materialize this (non-unique) block's contents from its unique
    /// partner: apply `perm_from_unique` to the partner's index order and
    /// multiply by the orbit sign.
    pub fn restore_from(&self, unique: &Block<T>) -> Result<Vec<T>> {
        let ptu = &self.uniqueness.perm_to_unique;
        let sign = f64::from(self.uniqueness.sign);
        let u_data = unique.read_buf()?;

        let mut out = vec![T::zero(); self.size];
        let mut c = vec![0usize; self.rank];
        let mut cu = vec![0usize; self.rank];
        let u_strides = tensor::strides(&unique.shape);
        for (lin, slot) in out.iter_mut().enumerate() {
            tensor::linear_to_index(&self.shape, lin, &mut c);
            for i in 0..self.rank {
                cu[i] = c[ptu[i]];
            }
            let u_lin: usize = cu
                .iter()
                .zip(u_strides.iter())
                .map(|(i, s)| i * s)
                .sum();
            *slot = u_data[u_lin].scale_re(sign);
        }
        Ok(out)
    }

    /// Path of the backing scratch file for on-disk blocks.
    pub fn backing_file(&self) -> Option<&std::path::Path> {
        self.file_path.as_deref()
    }

    /// Delete the backing scratch file, if any. Called on destruction of the
    /// owning diagram.
    pub fn remove_backing_file(&mut self) {
        if let Some(path) = self.file_path.take() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::debug!(?path, error = %e, "could not remove block file");
            }
        }
    }

    /// Bytes of RAM / disk this block accounts for.
    pub fn footprint(&self) -> (usize, usize) {
        let bytes = self.size * element_bytes::<T>();
        match self.storage {
            Storage::InMemory => (bytes, 0),
            Storage::OnDisk => (0, bytes),
            Storage::Dummy => (0, 0),
        }
    }
}

impl<T: Scalar> Drop for Block<T> {
    fn drop(&mut self) {
        self.remove_backing_file();
    }
}

fn element_bytes<T: Scalar>() -> usize {
    if T::ARITH.is_complex() {
        16
    } else {
        8
    }
}

fn encode_elements<T: Scalar>(buf: &[T], out: &mut [u8]) {
    if T::ARITH.is_complex() {
        for (i, v) in buf.iter().enumerate() {
            LittleEndian::write_f64(&mut out[16 * i..], v.re());
            LittleEndian::write_f64(&mut out[16 * i + 8..], v.im());
        }
    } else {
        for (i, v) in buf.iter().enumerate() {
            LittleEndian::write_f64(&mut out[8 * i..], v.re());
        }
    }
}

fn decode_elements<T: Scalar>(bytes: &[u8], out: &mut [T]) {
    if T::ARITH.is_complex() {
        for (i, v) in out.iter_mut().enumerate() {
            let re = LittleEndian::read_f64(&bytes[16 * i..]);
            let im = LittleEndian::read_f64(&bytes[16 * i + 8..]);
            *v = T::from_c64(num_complex::Complex64::new(re, im));
        }
    } else {
        for (i, v) in out.iter_mut().enumerate() {
            *v = T::from_re(LittleEndian::read_f64(&bytes[8 * i..]));
        }
    }
}

// ============================================================================
// Canonical orbit
// ============================================================================

/// Elementary signed permutations of one tensor side.
const PERMS_2: [([usize; 2], i32); 2] = [([0, 1], 1), ([1, 0], -1)];
const PERMS_3: [([usize; 3], i32); 6] = [
    ([0, 1, 2], 1),
    ([0, 2, 1], -1),
    ([1, 2, 0], 1),
    ([1, 0, 2], -1),
    ([2, 0, 1], 1),
    ([2, 1, 0], -1),
];

fn is_ascending(v: &[usize]) -> bool {
    v.windows(2).all(|w| w[0] <= w[1])
}

/// Inverse of a 0-based permutation.
pub fn inverse_perm(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0usize; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inv[p] = i;
    }
    inv
}

/// Orbit size of one side's spinor-block tuple under its antisymmetrizer.
fn side_orbit_size(side: &[usize]) -> usize {
    match side.len() {
        1 => 1,
        2 => {
            if side[0] == side[1] {
                1
            } else {
                2
            }
        }
        3 => {
            if side[0] == side[1] && side[1] == side[2] {
                1
            } else if side[0] == side[1] || side[1] == side[2] || side[0] == side[2] {
                3
            } else {
                6
            }
        }
        n => {
            // Rank-8+ diagrams are outside the supported orbit machinery.
            debug_assert!(n <= 3);
            1
        }
    }
}

/// Find the first elementary permutation (in the fixed enumeration order)
/// that sorts `side` ascending; returns `(perm, sign)`.
fn sorting_perm(side: &[usize]) -> (Vec<usize>, i32) {
    match side.len() {
        2 => {
            for (p, sign) in PERMS_2 {
                let img: Vec<usize> = p.iter().map(|&i| side[i]).collect();
                if is_ascending(&img) {
                    return (p.to_vec(), sign);
                }
            }
            unreachable!("a pair always sorts")
        }
        3 => {
            for (p, sign) in PERMS_3 {
                let img: Vec<usize> = p.iter().map(|&i| side[i]).collect();
                if is_ascending(&img) {
                    return (p.to_vec(), sign);
                }
            }
            unreachable!("a triple always sorts")
        }
        _ => ((0..side.len()).collect(), 1),
    }
}

/// Per-index type used for the uniformity test: inactive hole, inactive
/// particle, active hole ('g'), active particle ('v').
fn index_type(qpart: Qpart, valence: bool) -> char {
    match (qpart, valence) {
        (Qpart::Hole, false) => 'h',
        (Qpart::Particle, false) => 'p',
        (Qpart::Hole, true) => 'g',
        (Qpart::Particle, true) => 'v',
    }
}

/// Compute the canonical-orbit metadata of a block.
///
/// All inputs are in the stored layout; `order` is the stored→natural map
/// (0-based: stored position `i` holds natural index `order[i]`). The
/// sorting permutations act in the natural layout and are pulled back
/// through `order` into the stored-layout `perm_to_unique`.
pub fn compute_uniqueness(
    spinor_blocks: &[usize],
    qparts: &[Qpart],
    valence: &[bool],
    order: &[usize],
) -> Uniqueness {
    let rank = spinor_blocks.len();
    if rank == 2 {
        return Uniqueness::trivial(rank);
    }
    let n = rank / 2;

    // Stored position of each natural index.
    let pos = inverse_perm(order);

    let nat_sb: Vec<usize> = (0..rank).map(|j| spinor_blocks[pos[j]]).collect();
    let nat_types: Vec<char> = (0..rank)
        .map(|j| index_type(qparts[pos[j]], valence[pos[j]]))
        .collect();

    let bra_uniform = nat_types[..n].iter().all(|&t| t == nat_types[0]);
    let ket_uniform = nat_types[n..].iter().all(|&t| t == nat_types[n]);
    if !bra_uniform || !ket_uniform {
        return Uniqueness::trivial(rank);
    }

    let (bra_perm, bra_sign) = sorting_perm(&nat_sb[..n]);
    let (ket_perm, ket_sign) = sorting_perm(&nat_sb[n..]);
    let bra_identity = bra_perm.iter().enumerate().all(|(i, &p)| i == p);
    let ket_identity = ket_perm.iter().enumerate().all(|(i, &p)| i == p);

    let n_equal_perms = side_orbit_size(&nat_sb[..n]) * side_orbit_size(&nat_sb[n..]);

    if bra_identity && ket_identity {
        return Uniqueness {
            is_unique: true,
            sign: 1,
            n_equal_perms,
            perm_to_unique: (0..rank).collect(),
            perm_from_unique: (0..rank).collect(),
        };
    }

    // Natural-layout permutation combining both sides.
    let mut sigma = vec![0usize; rank];
    sigma[..n].copy_from_slice(&bra_perm);
    for j in 0..n {
        sigma[n + j] = n + ket_perm[j];
    }

    // Pull back to the stored layout: stored i -> natural order[i] ->
    // natural sigma -> stored pos.
    let perm_to_unique: Vec<usize> = (0..rank).map(|i| pos[sigma[order[i]]]).collect();
    let perm_from_unique = inverse_perm(&perm_to_unique);

    Uniqueness {
        is_unique: false,
        sign: bra_sign * ket_sign,
        n_equal_perms,
        perm_to_unique,
        perm_from_unique,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spinors::SpinorRegistry;

    fn natural(rank: usize) -> Vec<usize> {
        (0..rank).collect()
    }

    #[test]
    fn rank2_always_unique() {
        let u = compute_uniqueness(
            &[3, 1],
            &[Qpart::Hole, Qpart::Particle],
            &[false, false],
            &natural(2),
        );
        assert!(u.is_unique);
        assert_eq!(u.n_equal_perms, 1);
    }

    #[test]
    fn rank4_sorted_tuple_is_representative() {
        let u = compute_uniqueness(
            &[0, 1, 2, 3],
            &[Qpart::Hole, Qpart::Hole, Qpart::Particle, Qpart::Particle],
            &[false; 4],
            &natural(4),
        );
        assert!(u.is_unique);
        assert_eq!(u.sign, 1);
        assert_eq!(u.n_equal_perms, 4);
    }

    #[test]
    fn rank4_bra_swap_is_non_unique() {
        let u = compute_uniqueness(
            &[1, 0, 2, 3],
            &[Qpart::Hole, Qpart::Hole, Qpart::Particle, Qpart::Particle],
            &[false; 4],
            &natural(4),
        );
        assert!(!u.is_unique);
        assert_eq!(u.sign, -1);
        assert_eq!(u.perm_to_unique, vec![1, 0, 2, 3]);
        assert_eq!(u.n_equal_perms, 4);
    }

    #[test]
    fn rank4_double_swap_has_positive_sign() {
        let u = compute_uniqueness(
            &[1, 0, 3, 2],
            &[Qpart::Hole, Qpart::Hole, Qpart::Particle, Qpart::Particle],
            &[false; 4],
            &natural(4),
        );
        assert!(!u.is_unique);
        assert_eq!(u.sign, 1);
        assert_eq!(u.perm_to_unique, vec![1, 0, 3, 2]);
    }

    #[test]
    fn mixed_side_types_are_always_unique() {
        // bra = (h, p): non-uniform, no antisymmetry partner.
        let u = compute_uniqueness(
            &[5, 1, 2, 3],
            &[Qpart::Hole, Qpart::Particle, Qpart::Particle, Qpart::Particle],
            &[false; 4],
            &natural(4),
        );
        assert!(u.is_unique);
        assert_eq!(u.sign, 1);
        assert_eq!(u.n_equal_perms, 1);
    }

    #[test]
    fn active_and_inactive_types_differ() {
        // bra = (inactive h, active h): non-uniform.
        let u = compute_uniqueness(
            &[1, 0, 2, 3],
            &[Qpart::Hole, Qpart::Hole, Qpart::Particle, Qpart::Particle],
            &[false, true, false, false],
            &natural(4),
        );
        assert!(u.is_unique);
    }

    #[test]
    fn rank6_coincidence_orbit_sizes() {
        let q6 = [
            Qpart::Hole,
            Qpart::Hole,
            Qpart::Hole,
            Qpart::Particle,
            Qpart::Particle,
            Qpart::Particle,
        ];
        let u = compute_uniqueness(&[0, 0, 0, 1, 1, 2], &q6, &[false; 6], &natural(6));
        assert!(u.is_unique);
        assert_eq!(u.n_equal_perms, 3);

        let u = compute_uniqueness(&[0, 1, 2, 3, 4, 5], &q6, &[false; 6], &natural(6));
        assert_eq!(u.n_equal_perms, 36);
    }

    #[test]
    fn rank6_cyclic_rotation_sign() {
        let q6 = [
            Qpart::Hole,
            Qpart::Hole,
            Qpart::Hole,
            Qpart::Particle,
            Qpart::Particle,
            Qpart::Particle,
        ];
        // bra tuple (2,0,1): sorted by the even permutation (1,2,0).
        let u = compute_uniqueness(&[2, 0, 1, 3, 4, 5], &q6, &[false; 6], &natural(6));
        assert!(!u.is_unique);
        assert_eq!(u.sign, 1);
        let img: Vec<usize> = u.perm_to_unique[..3]
            .iter()
            .map(|&i| [2, 0, 1][i])
            .collect();
        assert_eq!(img, vec![0, 1, 2]);
    }

    #[test]
    fn order_pullback_roundtrip() {
        // Same physical block, stored with a swapped layout "2134": the
        // stored tuple differs but the natural-layout orbit must agree.
        let q = [Qpart::Hole, Qpart::Hole, Qpart::Particle, Qpart::Particle];
        let nat = compute_uniqueness(&[1, 0, 2, 3], &q, &[false; 4], &natural(4));
        // stored layout = natural with bra swapped: order = [1,0,2,3],
        // stored tuple (0,1,...) corresponds to natural (1,0,...).
        let stored = compute_uniqueness(&[0, 1, 2, 3], &q, &[false; 4], &[1, 0, 2, 3]);
        assert!(!stored.is_unique);
        assert_eq!(stored.sign, nat.sign);
        // Pulled back through the order, the stored-layout permutation is
        // again the bra swap.
        assert_eq!(stored.perm_to_unique, vec![1, 0, 2, 3]);
    }

    // ------------------------------------------------------------------
    // Block construction and storage
    // ------------------------------------------------------------------

    fn registry() -> SpinorRegistry {
        let mut reg = SpinorRegistry::new(
            &[0, 0, 0, 0],
            &[-0.5, -0.4, 0.3, 0.4],
            &[true, true, false, false],
        )
        .unwrap();
        reg.build_blocks(16, 1).unwrap();
        reg
    }

    fn mk_block(storage: Storage, dir: &std::path::Path) -> Block<f64> {
        let reg = registry();
        let tracker = MemoryTracker::default();
        Block::new(
            0,
            &[0, 0],
            &[Qpart::Hole, Qpart::Particle],
            &[false, false],
            &[false, false],
            &[0, 1],
            false,
            true,
            storage,
            &reg,
            &tracker,
            None,
            dir,
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn in_memory_block_set_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = mk_block(Storage::InMemory, dir.path());
        assert_eq!(b.shape, vec![2, 2]);
        b.set_element(&[0, 2], 7.0).unwrap();
        b.set_element(&[1, 3], -1.0).unwrap();
        // spinor 5 does not exist in any tile: silently skipped
        b.set_element(&[0, 5], 99.0).unwrap();
        assert_eq!(b.get_element(&[0, 2]).unwrap(), 7.0);
        assert_eq!(b.get_element(&[1, 3]).unwrap(), -1.0);
        assert_eq!(b.get_element(&[0, 3]).unwrap(), 0.0);
        assert_eq!(b.get_element(&[0, 5]).unwrap(), 0.0);
    }

    #[test]
    fn on_disk_block_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = mk_block(Storage::OnDisk, dir.path());
        b.set_element(&[0, 2], 3.25).unwrap();
        // after store the RAM copy is gone but the value is readable
        assert!(b.buf().is_err());
        assert_eq!(b.get_element(&[0, 2]).unwrap(), 3.25);
        b.load().unwrap();
        assert_eq!(b.buf().unwrap()[0], 3.25);
        b.unload().unwrap();
        assert!(b.buf().is_err());
    }

    #[test]
    fn restore_reproduces_antisymmetry() {
        // Two spinor blocks of one irrep so that a non-unique (1,0|..) tuple
        // exists next to its sorted partner (0,1|..).
        let mut reg = SpinorRegistry::new(
            &[0, 0, 0, 0],
            &[-0.5, -0.4, 0.3, 0.4],
            &[true, true, false, false],
        )
        .unwrap();
        reg.build_blocks(1, 1).unwrap(); // every spinor its own block
        let tracker = MemoryTracker::default();
        let dir = tempfile::tempdir().unwrap();

        let q = [Qpart::Hole, Qpart::Hole, Qpart::Particle, Qpart::Particle];
        let v = [false; 4];
        let t3 = [false; 4];
        let ord = [0usize, 1, 2, 3];

        let mut unique: Block<f64> = Block::new(
            1,
            &[0, 1, 2, 3],
            &q,
            &v,
            &t3,
            &ord,
            false,
            true,
            Storage::InMemory,
            &reg,
            &tracker,
            None,
            dir.path(),
        )
        .unwrap()
        .unwrap();
        assert!(unique.uniqueness.is_unique);
        unique.set_element(&[0, 1, 2, 3], 2.5).unwrap();

        let swapped: Block<f64> = Block::new(
            2,
            &[1, 0, 2, 3],
            &q,
            &v,
            &t3,
            &ord,
            false,
            true,
            Storage::InMemory,
            &reg,
            &tracker,
            None,
            dir.path(),
        )
        .unwrap()
        .unwrap();
        assert!(!swapped.uniqueness.is_unique);
        assert_eq!(swapped.storage, Storage::Dummy);

        let data = swapped.restore_from(&unique).unwrap();
        // The swapped block holds T[1,0,2,3] = -T[0,1,2,3].
        assert_eq!(data.len(), 1);
        assert_eq!(data[0], -2.5);
    }

    #[test]
    fn compressed_rank6_store_load() {
        let mut reg = SpinorRegistry::new(
            &[0, 0, 0, 0],
            &[-0.5, -0.4, 0.3, 0.4],
            &[true, true, false, false],
        )
        .unwrap();
        reg.build_blocks(16, 1).unwrap();
        let tracker = MemoryTracker::default();
        let dir = tempfile::tempdir().unwrap();
        let q6 = [
            Qpart::Hole,
            Qpart::Hole,
            Qpart::Hole,
            Qpart::Particle,
            Qpart::Particle,
            Qpart::Particle,
        ];
        let mut b: Block<f64> = Block::new(
            3,
            &[0; 6],
            &q6,
            &[false; 6],
            &[false; 6],
            &[0, 1, 2, 3, 4, 5],
            false,
            false,
            Storage::InMemory,
            &reg,
            &tracker,
            Some(CompressPolicy {
                width: Width::F64,
                thresh: 1e-14,
            }),
            dir.path(),
        )
        .unwrap()
        .unwrap();
        // Freshly built blocks are flushed, i.e. compressed.
        assert!(b.is_compressed);
        b.set_element(&[0, 1, 1, 2, 3, 3], 4.0).unwrap();
        assert!(b.is_compressed);
        assert_eq!(b.get_element(&[0, 1, 1, 2, 3, 3]).unwrap(), 4.0);
        b.load().unwrap();
        assert!(!b.is_compressed);
        b.store().unwrap();
        assert!(b.is_compressed);
    }
}
