//! Resumable multi-file dataset reader.

use std::path::PathBuf;

use bytes::Bytes;
use efl_types::{CoordError, CoordResult};

use crate::record::{Compression, RecordReader};
use crate::state::IteratorState;

const FILE_INDEX_FIELD: &str = "current_file_index";
const SAMPLE_INDEX_FIELD: &str = "current_sample_index";
const FIRST_READ_FIELD: &str = "first_read";
const BLOCK_NAME_FIELD: &str = "current_block_name";

/// One dataset shard: a record file plus its opaque block identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFile {
    /// Path of the record file.
    pub filename: PathBuf,

    /// Block id reported through the reader-state rendezvous.
    pub block_id: String,
}

impl BlockFile {
    /// Creates a shard entry.
    pub fn new(filename: impl Into<PathBuf>, block_id: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            block_id: block_id.into(),
        }
    }
}

/// Reads an ordered list of block files as one stream of records,
/// tracking a `(block_id, sample_index)` cursor that can be saved and
/// restored mid-epoch.
///
/// On the very first read the reader discards `initial_sample_index`
/// records of the first file, which is how a restarted worker skips what
/// it already consumed.
pub struct FederatedReader {
    prefix: String,
    files: Vec<BlockFile>,
    compression: Compression,
    initial_sample_index: u64,

    current_file_index: usize,
    current_sample_index: u64,
    first_read: bool,
    current_block_name: String,
    reader: Option<RecordReader>,
}

impl FederatedReader {
    /// Creates a reader over `files`. `prefix` namespaces the saved state
    /// keys so nested iterator states can coexist in one blob.
    pub fn new(
        prefix: impl Into<String>,
        files: Vec<BlockFile>,
        compression: Compression,
        initial_sample_index: u64,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            files,
            compression,
            initial_sample_index,
            current_file_index: 0,
            current_sample_index: 0,
            first_read: true,
            current_block_name: String::new(),
            reader: None,
        }
    }

    /// The cursor: current block id and records consumed within it.
    pub fn position(&self) -> (&str, u64) {
        (&self.current_block_name, self.current_sample_index)
    }

    /// Yields the next record, or `None` once every file is exhausted.
    pub fn next_record(&mut self) -> CoordResult<Option<Bytes>> {
        loop {
            if let Some(reader) = &mut self.reader {
                match reader.read_record()? {
                    Some(payload) => {
                        self.current_sample_index += 1;
                        return Ok(Some(payload));
                    }
                    None => {
                        // End of this file; move on.
                        self.reader = None;
                        self.current_file_index += 1;
                        self.current_sample_index = 0;
                    }
                }
            }

            if self.current_file_index == self.files.len() {
                return Ok(None);
            }

            self.setup_reader()?;
            if self.first_read {
                self.current_sample_index = self.initial_sample_index;
                self.seek_forward(self.initial_sample_index)?;
                self.first_read = false;
            }
        }
    }

    /// Serializes the cursor.
    pub fn save(&self) -> IteratorState {
        let mut state = IteratorState::new();
        state.write_int(self.full_name(FILE_INDEX_FIELD), self.current_file_index as i64);
        state.write_int(
            self.full_name(SAMPLE_INDEX_FIELD),
            self.current_sample_index as i64,
        );
        state.write_int(self.full_name(FIRST_READ_FIELD), i64::from(self.first_read));
        state.write_str(self.full_name(BLOCK_NAME_FIELD), &self.current_block_name);
        state
    }

    /// Restores the cursor: re-opens the current file and seeks forward to
    /// the saved sample index.
    pub fn restore(&mut self, state: &IteratorState) -> CoordResult<()> {
        self.reader = None;
        let file_index = state.read_int(&self.full_name(FILE_INDEX_FIELD))?;
        self.current_file_index = usize::try_from(file_index)
            .map_err(|_| CoordError::invalid_argument("negative file index in state"))?;
        let sample_index = state.read_int(&self.full_name(SAMPLE_INDEX_FIELD))?;
        self.current_sample_index = u64::try_from(sample_index)
            .map_err(|_| CoordError::invalid_argument("negative sample index in state"))?;
        self.first_read = state.read_int(&self.full_name(FIRST_READ_FIELD))? != 0;
        self.current_block_name = state.read_str(&self.full_name(BLOCK_NAME_FIELD))?.to_string();

        self.setup_reader()?;
        self.seek_forward(self.current_sample_index)
    }

    fn full_name(&self, field: &str) -> String {
        format!("{}::{field}", self.prefix)
    }

    fn setup_reader(&mut self) -> CoordResult<()> {
        let block = self.files.get(self.current_file_index).ok_or_else(|| {
            CoordError::invalid_argument(format!(
                "current_file_index {} >= file count {}",
                self.current_file_index,
                self.files.len()
            ))
        })?;
        self.current_block_name = block.block_id.clone();
        self.reader = Some(RecordReader::open(&block.filename, self.compression)?);
        Ok(())
    }

    // Discards `count` records from the freshly opened file.
    fn seek_forward(&mut self, count: u64) -> CoordResult<()> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| CoordError::out_of_range("seek on exhausted reader"))?;
        for _ in 0..count {
            if reader.read_record()?.is_none() {
                return Err(CoordError::out_of_range(
                    "seek sample index error, not enough samples in file",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordWriter;
    use efl_types::ErrorKind;
    use std::path::Path;

    fn write_records(path: &Path, records: &[&[u8]]) {
        let mut writer = RecordWriter::create(path, Compression::Zstd).unwrap();
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.finish().unwrap();
    }

    fn two_block_files(dir: &Path) -> Vec<BlockFile> {
        let f0 = dir.join("f0");
        let f1 = dir.join("f1");
        write_records(&f0, &[b"a0", b"a1", b"a2", b"a3"]);
        write_records(&f1, &[b"b0", b"b1", b"b2"]);
        vec![BlockFile::new(f0, "b0"), BlockFile::new(f1, "b1")]
    }

    #[test]
    fn first_read_skips_initial_samples() {
        let dir = tempfile::tempdir().unwrap();
        let files = two_block_files(dir.path());
        let mut reader = FederatedReader::new("reader", files, Compression::Zstd, 2);

        let mut seen = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            seen.push(record);
        }
        // Two records of f0 skipped, then the rest of f0 and all of f1.
        assert_eq!(seen, vec![
            Bytes::from_static(b"a2"),
            Bytes::from_static(b"a3"),
            Bytes::from_static(b"b0"),
            Bytes::from_static(b"b1"),
            Bytes::from_static(b"b2"),
        ]);
    }

    #[test]
    fn save_and_restore_resume_mid_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = two_block_files(dir.path());
        let mut reader = FederatedReader::new("reader", files.clone(), Compression::Zstd, 0);

        // Consume into the middle of f1.
        for _ in 0..5 {
            reader.next_record().unwrap().unwrap();
        }
        let (block, offset) = reader.position();
        assert_eq!(block, "b1");
        assert_eq!(offset, 1);
        let state = reader.save();

        let mut restored = FederatedReader::new("reader", files, Compression::Zstd, 0);
        restored.restore(&state).unwrap();
        assert_eq!(restored.position(), ("b1", 1));
        assert_eq!(restored.next_record().unwrap().unwrap(), &b"b1"[..]);
        assert_eq!(restored.next_record().unwrap().unwrap(), &b"b2"[..]);
        assert!(restored.next_record().unwrap().is_none());
    }

    #[test]
    fn state_blob_helpers_see_reader_fields() {
        let dir = tempfile::tempdir().unwrap();
        let files = two_block_files(dir.path());
        let mut reader = FederatedReader::new("reader", files, Compression::Zstd, 0);
        for _ in 0..5 {
            reader.next_record().unwrap().unwrap();
        }
        let bytes = reader.save().to_bytes().unwrap();
        assert_eq!(crate::sample_index_from_state_bytes(&bytes).unwrap(), 1);
        assert_eq!(crate::block_id_from_state_bytes(&bytes).unwrap(), "b1");
    }

    #[test]
    fn seeking_past_the_file_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let f0 = dir.path().join("f0");
        write_records(&f0, &[b"a0"]);
        let mut reader =
            FederatedReader::new("reader", vec![BlockFile::new(f0, "b0")], Compression::Zstd, 5);
        let err = reader.next_record().unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }

    #[test]
    fn empty_file_list_ends_immediately() {
        let mut reader = FederatedReader::new("reader", Vec::new(), Compression::Zstd, 0);
        assert!(reader.next_record().unwrap().is_none());
    }
}
