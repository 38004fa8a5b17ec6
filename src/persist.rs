//! Binary diagram files (checkpointing).
//!
//! One file per diagram: a header with the full metadata and the inverse
//! index, followed by one record per block. In-memory blocks carry their
//! dense buffer inline; dummy blocks carry nothing; on-disk blocks carry the
//! name of their backing scratch file. All integers are little-endian.
//!
//! A file written by the real engine can be read back into the complex
//! engine (elements are promoted); reading a complex file into the real
//! engine is refused.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::arith::{Arith, Scalar};
use crate::block::{Block, Storage, Uniqueness};
use crate::diagram::Diagram;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::spinors::Qpart;

const DIAGRAM_FILE_MAGIC: u32 = 0x4447_4631; // "DGF1"

impl<T: Scalar> Engine<T> {
    /// Write a diagram to a binary file.
    pub fn write_diagram(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let dg = self.diagram(name)?;
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
        let mut w = BufWriter::new(file);
        write_diagram_impl(dg, &mut w).map_err(|e| EngineError::io(path, e))?;
        w.flush().map_err(|e| EngineError::io(path, e))?;
        Ok(())
    }

    /// Read a diagram from a binary file and install it in the stack
    /// (replacing any live diagram of the same name). Returns the name.
    pub fn read_diagram(&mut self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let mut r = BufReader::new(file);
        let dg = read_diagram_impl::<T>(
            &mut r,
            self.spinors.num_blocks(),
            &self.tracker,
            self.env().compress,
        )
        .map_err(|e| match e {
            ReadError::Engine(e) => e,
            ReadError::Io(e) => EngineError::io(path, e),
        })?;
        let name = dg.name.clone();
        self.stack.install(dg)?;
        Ok(name)
    }
}

fn write_string(w: &mut impl Write, s: &str) -> std::io::Result<()> {
    w.write_u16::<LittleEndian>(s.len() as u16)?;
    w.write_all(s.as_bytes())
}

fn read_string(r: &mut impl Read) -> std::io::Result<String> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_usize_vec(w: &mut impl Write, v: &[usize]) -> std::io::Result<()> {
    w.write_u32::<LittleEndian>(v.len() as u32)?;
    for &x in v {
        w.write_u64::<LittleEndian>(x as u64)?;
    }
    Ok(())
}

fn read_usize_vec(r: &mut impl Read) -> std::io::Result<Vec<usize>> {
    let n = r.read_u32::<LittleEndian>()? as usize;
    let mut v = Vec::with_capacity(n);
    for _ in 0..n {
        v.push(r.read_u64::<LittleEndian>()? as usize);
    }
    Ok(v)
}

fn write_diagram_impl<T: Scalar>(dg: &Diagram<T>, w: &mut impl Write) -> std::io::Result<()> {
    w.write_u32::<LittleEndian>(DIAGRAM_FILE_MAGIC)?;
    write_string(w, &dg.name)?;
    w.write_u32::<LittleEndian>(dg.rank as u32)?;
    w.write_u32::<LittleEndian>(dg.symmetry as u32)?;
    w.write_u8(dg.only_unique as u8)?;
    for q in &dg.qparts {
        w.write_u8(q.to_char() as u8)?;
    }
    for &v in &dg.valence {
        w.write_u8(v as u8)?;
    }
    for &v in &dg.t3space {
        w.write_u8(v as u8)?;
    }
    for &o in &dg.order {
        w.write_u8(o as u8)?;
    }
    // dense inverse index (tuple → block slot; absent tuples as u64::MAX)
    let table = dg.inverse_index_table();
    w.write_u64::<LittleEndian>(table.len() as u64)?;
    for &slot in table {
        w.write_u64::<LittleEndian>(slot as u64)?;
    }
    w.write_u64::<LittleEndian>(dg.blocks.len() as u64)?;
    for block in &dg.blocks {
        write_block_impl(block, w)?;
    }
    Ok(())
}

fn write_block_impl<T: Scalar>(block: &Block<T>, w: &mut impl Write) -> std::io::Result<()> {
    w.write_u64::<LittleEndian>(block.id)?;
    w.write_u32::<LittleEndian>(block.rank as u32)?;
    w.write_u8(T::ARITH.is_complex() as u8)?;

    let u = &block.uniqueness;
    w.write_u8(u.is_unique as u8)?;
    w.write_i8(u.sign as i8)?;
    w.write_u32::<LittleEndian>(u.n_equal_perms as u32)?;
    write_usize_vec(w, &u.perm_to_unique)?;
    write_usize_vec(w, &u.perm_from_unique)?;

    write_usize_vec(w, &block.spinor_blocks)?;
    for d in 0..block.rank {
        write_usize_vec(w, &block.indices[d])?;
    }
    w.write_u64::<LittleEndian>(block.size as u64)?;

    let storage_tag = match block.storage {
        Storage::InMemory => 0u8,
        Storage::OnDisk => 1,
        Storage::Dummy => 2,
    };
    w.write_u8(storage_tag)?;
    match block.storage {
        Storage::InMemory => {
            let data = block
                .read_buf()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            for v in data.iter() {
                w.write_f64::<LittleEndian>(v.re())?;
                if T::ARITH.is_complex() {
                    w.write_f64::<LittleEndian>(v.im())?;
                }
            }
        }
        Storage::Dummy => {}
        Storage::OnDisk => {
            let path = block
                .backing_file()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            write_string(w, &path)?;
        }
    }
    Ok(())
}

enum ReadError {
    Engine(EngineError),
    Io(std::io::Error),
}

impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        ReadError::Io(e)
    }
}

impl From<EngineError> for ReadError {
    fn from(e: EngineError) -> Self {
        ReadError::Engine(e)
    }
}

fn read_diagram_impl<T: Scalar>(
    r: &mut impl Read,
    n_spinor_blocks: usize,
    tracker: &crate::memory::MemoryTracker,
    compress: Option<crate::block::CompressPolicy>,
) -> std::result::Result<Diagram<T>, ReadError> {
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != DIAGRAM_FILE_MAGIC {
        return Err(EngineError::Configuration(format!(
            "not a diagram file (magic {magic:#010x})"
        ))
        .into());
    }
    let name = read_string(r)?;
    let rank = r.read_u32::<LittleEndian>()? as usize;
    if rank == 0 || rank > crate::MAX_RANK || rank % 2 == 1 {
        return Err(EngineError::Integrity(format!(
            "diagram file '{name}' carries impossible rank {rank}"
        ))
        .into());
    }
    let symmetry = r.read_u32::<LittleEndian>()? as usize;
    let only_unique = r.read_u8()? != 0;
    let mut qparts = Vec::with_capacity(rank);
    for _ in 0..rank {
        qparts.push(
            Qpart::from_char(r.read_u8()? as char).map_err(ReadError::Engine)?,
        );
    }
    let mut valence = Vec::with_capacity(rank);
    for _ in 0..rank {
        valence.push(r.read_u8()? != 0);
    }
    let mut t3space = Vec::with_capacity(rank);
    for _ in 0..rank {
        t3space.push(r.read_u8()? != 0);
    }
    let mut order = Vec::with_capacity(rank);
    for _ in 0..rank {
        order.push(r.read_u8()? as usize);
    }

    // stored inverse index; re-verified against the rebuilt table below
    let table_len = r.read_u64::<LittleEndian>()? as usize;
    let mut stored_table = Vec::with_capacity(table_len);
    for _ in 0..table_len {
        let slot = r.read_u64::<LittleEndian>()?;
        stored_table.push(if slot == u64::MAX {
            usize::MAX
        } else {
            slot as usize
        });
    }

    let n_blocks = r.read_u64::<LittleEndian>()? as usize;
    let mut blocks = Vec::with_capacity(n_blocks);
    let rank6 = rank == 6;
    for _ in 0..n_blocks {
        blocks.push(read_block_impl::<T>(
            r,
            tracker,
            if rank6 { compress } else { None },
        )?);
    }

    let mut dg = Diagram::from_parts(
        name,
        rank,
        symmetry,
        qparts,
        valence,
        t3space,
        order,
        only_unique,
        blocks,
        n_spinor_blocks,
    );
    dg.rebuild_inverse_index().map_err(ReadError::Engine)?;
    if dg.inverse_index_table() != stored_table.as_slice() {
        return Err(EngineError::Integrity(format!(
            "diagram '{}': inverse index on file disagrees with the block set",
            dg.name
        ))
        .into());
    }
    Ok(dg)
}

fn read_block_impl<T: Scalar>(
    r: &mut impl Read,
    tracker: &crate::memory::MemoryTracker,
    compress: Option<crate::block::CompressPolicy>,
) -> std::result::Result<Block<T>, ReadError> {
    let id = r.read_u64::<LittleEndian>()?;
    let rank = r.read_u32::<LittleEndian>()? as usize;
    let file_is_complex = r.read_u8()? != 0;
    if file_is_complex && T::ARITH == Arith::Real {
        return Err(EngineError::Configuration(
            "cannot read a complex diagram file into the real engine".into(),
        )
        .into());
    }

    let is_unique = r.read_u8()? != 0;
    let sign = i32::from(r.read_i8()?);
    let n_equal_perms = r.read_u32::<LittleEndian>()? as usize;
    let perm_to_unique = read_usize_vec(r)?;
    let perm_from_unique = read_usize_vec(r)?;
    let uniqueness = Uniqueness {
        is_unique,
        sign,
        n_equal_perms,
        perm_to_unique,
        perm_from_unique,
    };

    let spinor_blocks = read_usize_vec(r)?;
    if spinor_blocks.len() != rank {
        return Err(EngineError::Integrity(format!(
            "block {id}: spinor-block tuple length {} does not match rank {rank}",
            spinor_blocks.len()
        ))
        .into());
    }
    let mut indices = Vec::with_capacity(rank);
    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        let list = read_usize_vec(r)?;
        shape.push(list.len());
        indices.push(list);
    }
    let size = r.read_u64::<LittleEndian>()? as usize;
    let expect: usize = shape.iter().product();
    if size != expect {
        return Err(EngineError::Integrity(format!(
            "block {id}: stored size {size} does not match shape product {expect}"
        ))
        .into());
    }

    let storage_tag = r.read_u8()?;
    let (storage, buf, file_path): (Storage, Option<Vec<T>>, Option<PathBuf>) = match storage_tag {
        0 => {
            let mut data = Vec::with_capacity(size);
            for _ in 0..size {
                let re = r.read_f64::<LittleEndian>()?;
                let im = if file_is_complex {
                    r.read_f64::<LittleEndian>()?
                } else {
                    0.0
                };
                data.push(T::from_c64(num_complex::Complex64::new(re, im)));
            }
            (Storage::InMemory, Some(data), None)
        }
        2 => (Storage::Dummy, None, None),
        1 => {
            let file_name = read_string(r)?;
            (Storage::OnDisk, None, Some(PathBuf::from(file_name)))
        }
        t => {
            return Err(EngineError::Integrity(format!(
                "block {id}: unknown storage tag {t}"
            ))
            .into())
        }
    };

    Block::from_parts(
        id,
        spinor_blocks,
        indices,
        shape,
        storage,
        uniqueness,
        buf,
        file_path,
        compress,
        tracker,
    )
    .map_err(ReadError::Engine)
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::{minimal_engine, minimal_engine_complex};
    use crate::engine::PermUnique;
    use num_complex::Complex64;

    #[test]
    fn write_read_round_trip() {
        // tile size 1: the orbit machinery and dummy blocks go through the
        // file format too
        let opts = crate::engine::EngineOptions {
            tile_size: 1,
            ..crate::engine::EngineOptions::default()
        };
        let mut eng = crate::engine::tests::minimal_engine_opts(opts);
        eng.tmplt("t2", "hhpp", "0000", "1234", PermUnique::Yes).unwrap();
        eng.set("t2", &[0, 1, 2, 3], 0.125).unwrap();
        eng.set("t2", &[0, 0, 2, 2], -3.5).unwrap();
        let path = eng.opts.scratch_dir.join("t2.dg");
        eng.write_diagram("t2", &path).unwrap();

        // wipe and restore
        eng.clear("t2").unwrap();
        let name = eng.read_diagram(&path).unwrap();
        assert_eq!(name, "t2");
        assert_eq!(eng.get("t2", &[0, 1, 2, 3]).unwrap(), 0.125);
        assert_eq!(eng.get("t2", &[0, 0, 2, 2]).unwrap(), -3.5);
        // orbit resolution through a restored dummy block
        assert_eq!(eng.get("t2", &[1, 0, 2, 3]).unwrap(), -0.125);
        let dg = eng.diagram("t2").unwrap();
        assert!(dg.only_unique);
        assert_eq!(dg.qparts_string(), "hhpp");
    }

    #[test]
    fn real_file_promotes_into_complex_engine() {
        let mut real = minimal_engine();
        real.tmplt("f", "hp", "00", "12", PermUnique::No).unwrap();
        real.set("f", &[0, 2], 1.5).unwrap();
        let path = real.opts.scratch_dir.join("f.dg");
        real.write_diagram("f", &path).unwrap();

        let mut cplx = minimal_engine_complex();
        cplx.read_diagram(&path).unwrap();
        assert_eq!(
            cplx.get("f", &[0, 2]).unwrap(),
            Complex64::new(1.5, 0.0)
        );
    }

    #[test]
    fn complex_file_is_refused_by_real_engine() {
        let mut cplx = minimal_engine_complex();
        cplx.tmplt("f", "hp", "00", "12", PermUnique::No).unwrap();
        cplx.set("f", &[0, 2], Complex64::new(1.0, -1.0)).unwrap();
        let path = cplx.opts.scratch_dir.join("fc.dg");
        cplx.write_diagram("f", &path).unwrap();

        let mut real = minimal_engine();
        assert!(real.read_diagram(&path).is_err());
    }

    #[test]
    fn garbage_magic_is_rejected() {
        let eng = minimal_engine();
        let path = eng.opts.scratch_dir.join("junk.dg");
        std::fs::write(&path, b"not a diagram").unwrap();
        let mut eng = eng;
        assert!(eng.read_diagram(&path).is_err());
    }
}
