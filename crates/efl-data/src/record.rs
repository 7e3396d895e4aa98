//! Length-prefixed record files with per-file compression.
//!
//! Frame format: `[length: u32 LE][payload]`, repeated to end of file. A
//! file is either plain or one zstd stream wrapping the frames.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytes::{Bytes, BytesMut};
use efl_types::{CoordError, CoordResult};

/// Per-file compression of a record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Frames stored as-is.
    None,

    /// Frames wrapped in a single zstd stream.
    Zstd,
}

/// Sequential reader over one record file.
pub struct RecordReader {
    input: Box<dyn Read + Send>,
}

impl RecordReader {
    /// Opens `path` with the given compression.
    pub fn open(path: &Path, compression: Compression) -> CoordResult<Self> {
        let file = File::open(path).map_err(|e| {
            CoordError::invalid_argument(format!("open {} failed: {e}", path.display()))
        })?;
        let reader = BufReader::new(file);
        let input: Box<dyn Read + Send> = match compression {
            Compression::None => Box::new(reader),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader).map_err(
                |e| CoordError::invalid_argument(format!("zstd open {}: {e}", path.display())),
            )?),
        };
        Ok(Self { input })
    }

    /// Reads the next record; `None` at a clean end of file.
    pub fn read_record(&mut self) -> CoordResult<Option<Bytes>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = self
                .input
                .read(&mut len_buf[filled..])
                .map_err(|e| CoordError::internal(format!("record read failed: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => return Ok(None),
            4 => {}
            _ => return Err(CoordError::data_loss("truncated record length")),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = BytesMut::zeroed(len);
        self.input
            .read_exact(&mut payload)
            .map_err(|e| CoordError::data_loss(format!("truncated record payload: {e}")))?;
        Ok(Some(payload.freeze()))
    }
}

enum WriterKind {
    Plain(BufWriter<File>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

/// Writer producing files [`RecordReader`] can consume. Used by data
/// preparation and tests.
pub struct RecordWriter {
    output: WriterKind,
}

impl RecordWriter {
    /// Creates (or truncates) `path` with the given compression.
    pub fn create(path: &Path, compression: Compression) -> CoordResult<Self> {
        let file = File::create(path).map_err(|e| {
            CoordError::invalid_argument(format!("create {} failed: {e}", path.display()))
        })?;
        let writer = BufWriter::new(file);
        let output = match compression {
            Compression::None => WriterKind::Plain(writer),
            Compression::Zstd => WriterKind::Zstd(
                zstd::stream::write::Encoder::new(writer, 0).map_err(|e| {
                    CoordError::internal(format!("zstd create {}: {e}", path.display()))
                })?,
            ),
        };
        Ok(Self { output })
    }

    /// Appends one record.
    pub fn write_record(&mut self, payload: &[u8]) -> CoordResult<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| CoordError::invalid_argument("record larger than 4 GiB"))?;
        let write = |w: &mut dyn Write| -> std::io::Result<()> {
            w.write_all(&len.to_le_bytes())?;
            w.write_all(payload)
        };
        let result = match &mut self.output {
            WriterKind::Plain(w) => write(w),
            WriterKind::Zstd(w) => write(w),
        };
        result.map_err(|e| CoordError::internal(format!("record write failed: {e}")))
    }

    /// Flushes and finalizes the file.
    pub fn finish(self) -> CoordResult<()> {
        let result = match self.output {
            WriterKind::Plain(mut w) => w.flush(),
            WriterKind::Zstd(w) => w.finish().and_then(|mut inner| inner.flush()),
        };
        result.map_err(|e| CoordError::internal(format!("record finish failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(compression: Compression) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");
        let mut writer = RecordWriter::create(&path, compression).unwrap();
        writer.write_record(b"alpha").unwrap();
        writer.write_record(b"").unwrap();
        writer.write_record(b"gamma").unwrap();
        writer.finish().unwrap();

        let mut reader = RecordReader::open(&path, compression).unwrap();
        assert_eq!(reader.read_record().unwrap().unwrap(), &b"alpha"[..]);
        assert_eq!(reader.read_record().unwrap().unwrap(), &b""[..]);
        assert_eq!(reader.read_record().unwrap().unwrap(), &b"gamma"[..]);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn plain_round_trip() {
        round_trip(Compression::None);
    }

    #[test]
    fn zstd_round_trip() {
        round_trip(Compression::Zstd);
    }

    #[test]
    fn truncated_payload_is_data_loss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");
        std::fs::write(&path, 9u32.to_le_bytes()).unwrap();
        let mut reader = RecordReader::open(&path, Compression::None).unwrap();
        assert!(reader.read_record().is_err());
    }
}
