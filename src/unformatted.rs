//! Fortran sequential unformatted files.
//!
//! The host SCF program writes its integral files as Fortran "unformatted"
//! sequential records: each record is framed by a 4-byte length word before
//! and after the payload. The reader validates both markers (a mismatch
//! means a truncated or corrupt file), supports peeking at the next record
//! size, and can step backwards one record — the access pattern the
//! integral import needs. A small writer exists for producing fixture files
//! in tests and for exporting data in the same convention.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{EngineError, Result};

/// Reader over a sequential unformatted file.
pub struct UnfReader {
    file: File,
    path: PathBuf,
    /// Start offsets of all records read so far (for backspace).
    record_starts: Vec<u64>,
}

impl UnfReader {
    /// Open a file for sequential record reading.
    pub fn open(path: impl AsRef<Path>) -> Result<UnfReader> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| EngineError::io(&path, e))?;
        Ok(UnfReader {
            file,
            path,
            record_starts: Vec::new(),
        })
    }

    fn io_err(&self, message: impl Into<String>) -> EngineError {
        EngineError::Io {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    /// Size in bytes of the next record, or `None` at end of file.
    pub fn next_record_size(&mut self) -> Result<Option<u32>> {
        let pos = self
            .file
            .stream_position()
            .map_err(|e| EngineError::io(&self.path, e))?;
        match self.file.read_u32::<LittleEndian>() {
            Ok(len) => {
                self.file
                    .seek(SeekFrom::Start(pos))
                    .map_err(|e| EngineError::io(&self.path, e))?;
                Ok(Some(len))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(EngineError::io(&self.path, e)),
        }
    }

    /// Read the next record; `None` at end of file.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let start = self
            .file
            .stream_position()
            .map_err(|e| EngineError::io(&self.path, e))?;
        let len = match self.file.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(EngineError::io(&self.path, e)),
        };
        let mut payload = vec![0u8; len];
        self.file
            .read_exact(&mut payload)
            .map_err(|_| self.io_err(format!("record truncated ({len} bytes expected)")))?;
        let trailer = self
            .file
            .read_u32::<LittleEndian>()
            .map_err(|_| self.io_err("record trailer missing"))?;
        if trailer as usize != len {
            return Err(self.io_err(format!(
                "record length prefix/suffix mismatch ({len} vs {trailer})"
            )));
        }
        self.record_starts.push(start);
        Ok(Some(payload))
    }

    /// Step back one record, so the next read repeats it.
    pub fn backspace(&mut self) -> Result<()> {
        let start = self
            .record_starts
            .pop()
            .ok_or_else(|| self.io_err("backspace past the beginning of the file"))?;
        self.file
            .seek(SeekFrom::Start(start))
            .map_err(|e| EngineError::io(&self.path, e))?;
        Ok(())
    }

    /// Skip one record without materializing its payload.
    pub fn skip(&mut self) -> Result<()> {
        if self.read_record()?.is_none() {
            return Err(self.io_err("skip past the end of the file"));
        }
        Ok(())
    }

    /// Rewind to the beginning of the file.
    pub fn rewind(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| EngineError::io(&self.path, e))?;
        self.record_starts.clear();
        Ok(())
    }
}

/// Writer producing sequential unformatted records.
pub struct UnfWriter {
    file: File,
    path: PathBuf,
}

impl UnfWriter {
    /// Create (truncate) a file for record writing.
    pub fn create(path: impl AsRef<Path>) -> Result<UnfWriter> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| EngineError::io(&path, e))?;
        Ok(UnfWriter { file, path })
    }

    /// Append one record.
    pub fn write_record(&mut self, payload: &[u8]) -> Result<()> {
        let len = payload.len() as u32;
        self.file
            .write_u32::<LittleEndian>(len)
            .and_then(|_| self.file.write_all(payload))
            .and_then(|_| self.file.write_u32::<LittleEndian>(len))
            .map_err(|e| EngineError::io(&self.path, e))
    }

    /// Flush the underlying file.
    pub fn finish(mut self) -> Result<()> {
        self.file.flush().map_err(|e| EngineError::io(&self.path, e))
    }
}

// ============================================================================
// Record decoding helpers
// ============================================================================

/// Cursor over one record's payload, decoding little-endian fields.
pub struct RecordCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        RecordCursor { data, pos: 0 }
    }

    /// Bytes left in the record.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(EngineError::Configuration(format!(
                "record too short: needed {n} bytes at offset {}, record is {} bytes",
                self.pos,
                self.data.len()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read one integer of the ambient Fortran width (4 or 8 bytes).
    pub fn read_int(&mut self, width: u8) -> Result<i64> {
        match width {
            4 => Ok(i64::from(LittleEndian::read_i32(self.take(4)?))),
            8 => Ok(LittleEndian::read_i64(self.take(8)?)),
            w => Err(EngineError::Configuration(format!(
                "unsupported Fortran integer width {w}"
            ))),
        }
    }

    /// Read a double.
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    /// Read a complex double (re, im).
    pub fn read_c64(&mut self) -> Result<num_complex::Complex64> {
        let re = self.read_f64()?;
        let im = self.read_f64()?;
        Ok(num_complex::Complex64::new(re, im))
    }

    /// Read `n` raw characters.
    pub fn read_chars(&mut self, n: usize) -> Result<String> {
        let bytes = self.take(n)?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }
}

/// Builder for record payloads (fixtures and exports).
#[derive(Default)]
pub struct RecordBuilder {
    data: Vec<u8>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        RecordBuilder { data: Vec::new() }
    }

    pub fn int(mut self, v: i64, width: u8) -> Self {
        match width {
            4 => self.data.extend_from_slice(&(v as i32).to_le_bytes()),
            _ => self.data.extend_from_slice(&v.to_le_bytes()),
        }
        self
    }

    pub fn f64(mut self, v: f64) -> Self {
        self.data.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn c64(self, v: num_complex::Complex64) -> Self {
        self.f64(v.re).f64(v.im)
    }

    pub fn chars(mut self, s: &str, width: usize) -> Self {
        let mut bytes: Vec<u8> = s.bytes().collect();
        bytes.resize(width, b' ');
        self.data.extend_from_slice(&bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip_and_backspace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.unf");
        let mut w = UnfWriter::create(&path).unwrap();
        w.write_record(&RecordBuilder::new().int(42, 4).f64(1.5).build())
            .unwrap();
        w.write_record(&RecordBuilder::new().chars("HELLO", 8).build())
            .unwrap();
        w.finish().unwrap();

        let mut r = UnfReader::open(&path).unwrap();
        assert_eq!(r.next_record_size().unwrap(), Some(12));
        let rec1 = r.read_record().unwrap().unwrap();
        let mut c = RecordCursor::new(&rec1);
        assert_eq!(c.read_int(4).unwrap(), 42);
        assert_eq!(c.read_f64().unwrap(), 1.5);
        assert_eq!(c.remaining(), 0);

        // re-read the same record after a backspace
        r.backspace().unwrap();
        let rec1b = r.read_record().unwrap().unwrap();
        assert_eq!(rec1, rec1b);

        let rec2 = r.read_record().unwrap().unwrap();
        let mut c = RecordCursor::new(&rec2);
        assert_eq!(c.read_chars(8).unwrap(), "HELLO   ");
        assert!(r.read_record().unwrap().is_none());
        assert_eq!(r.next_record_size().unwrap(), None);
    }

    #[test]
    fn corrupt_trailer_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.unf");
        // prefix says 4 bytes, trailer disagrees
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        bytes.extend_from_slice(&7u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let mut r = UnfReader::open(&path).unwrap();
        assert!(r.read_record().is_err());
    }

    #[test]
    fn truncated_record_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.unf");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 10]);
        std::fs::write(&path, &bytes).unwrap();

        let mut r = UnfReader::open(&path).unwrap();
        assert!(r.read_record().is_err());
    }
}
