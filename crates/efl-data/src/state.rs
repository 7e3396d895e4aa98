//! Serialized iterator-state blobs and keyed lookups over them.
//!
//! A blob is an ordered list of `(key, scalar)` entries. Keys carry the
//! producing iterator's prefix (e.g. `reader::current_sample_index`), so
//! the blob-level helpers match by substring: exactly one key may match,
//! zero matches is `NotFound` and several is `Internal`.

use efl_types::{CoordError, CoordResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

const SAMPLE_INDEX_KEY: &str = "current_sample_index";
const BLOCK_NAME_KEY: &str = "current_block_name";

// Blobs this large mean far too many reader threads are being tracked.
const STATE_SIZE_WARN_BYTES: usize = 256 * 1024 * 1024;

/// One scalar in an iterator-state blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateValue {
    /// Integer scalar.
    Int(i64),

    /// String scalar.
    Str(String),
}

/// Ordered keyed scalars describing a (possibly nested) iterator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IteratorState {
    entries: Vec<(String, StateValue)>,
}

impl IteratorState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an integer scalar.
    pub fn write_int(&mut self, key: impl Into<String>, value: i64) {
        self.entries.push((key.into(), StateValue::Int(value)));
    }

    /// Appends a string scalar.
    pub fn write_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .push((key.into(), StateValue::Str(value.into())));
    }

    /// Reads the integer stored under exactly `key`.
    pub fn read_int(&self, key: &str) -> CoordResult<i64> {
        match self.find(key)? {
            StateValue::Int(v) => Ok(*v),
            StateValue::Str(_) => Err(CoordError::invalid_argument(format!(
                "state key {key} is not an integer"
            ))),
        }
    }

    /// Reads the string stored under exactly `key`.
    pub fn read_str(&self, key: &str) -> CoordResult<&str> {
        match self.find(key)? {
            StateValue::Str(v) => Ok(v),
            StateValue::Int(_) => Err(CoordError::invalid_argument(format!(
                "state key {key} is not a string"
            ))),
        }
    }

    fn find(&self, key: &str) -> CoordResult<&StateValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| CoordError::not_found(format!("state key {key} not found")))
    }

    fn find_by_pattern(&self, pattern: &str) -> CoordResult<usize> {
        let matches: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (k, _))| k.contains(pattern))
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [] => Err(CoordError::not_found(format!(
                "state key pattern {pattern} not found"
            ))),
            [index] => Ok(*index),
            _ => Err(CoordError::internal("find more than one key pattern")),
        }
    }

    /// Reads the unique entry whose key contains `pattern`.
    pub fn read_with_pattern(&self, pattern: &str) -> CoordResult<&StateValue> {
        let index = self.find_by_pattern(pattern)?;
        Ok(&self.entries[index].1)
    }

    /// Replaces the value of the unique entry whose key contains
    /// `pattern`.
    pub fn set_with_pattern(&mut self, pattern: &str, value: StateValue) -> CoordResult<()> {
        let index = self.find_by_pattern(pattern)?;
        self.entries[index].1 = value;
        Ok(())
    }

    /// Serializes the state, warning when the blob is excessively large.
    pub fn to_bytes(&self) -> CoordResult<Vec<u8>> {
        let bytes = postcard::to_allocvec(self)
            .map_err(|e| CoordError::internal(format!("serialize iterator state: {e}")))?;
        if bytes.len() > STATE_SIZE_WARN_BYTES {
            warn!(
                bytes = bytes.len(),
                "iterator state is larger than 256MB, consider reducing the number of io threads"
            );
        }
        Ok(bytes)
    }

    /// Parses a serialized state blob.
    pub fn from_bytes(bytes: &[u8]) -> CoordResult<Self> {
        postcard::from_bytes(bytes)
            .map_err(|e| CoordError::invalid_argument(format!("parse iterator state: {e}")))
    }
}

/// Extracts the sample index from a serialized blob.
pub fn sample_index_from_state_bytes(bytes: &[u8]) -> CoordResult<i64> {
    let state = IteratorState::from_bytes(bytes)?;
    match state.read_with_pattern(SAMPLE_INDEX_KEY)? {
        StateValue::Int(v) => Ok(*v),
        StateValue::Str(_) => Err(CoordError::invalid_argument(
            "sample index entry is not an integer",
        )),
    }
}

/// Extracts the current block id from a serialized blob.
pub fn block_id_from_state_bytes(bytes: &[u8]) -> CoordResult<String> {
    let state = IteratorState::from_bytes(bytes)?;
    match state.read_with_pattern(BLOCK_NAME_KEY)? {
        StateValue::Str(v) => Ok(v.clone()),
        StateValue::Int(_) => Err(CoordError::invalid_argument(
            "block name entry is not a string",
        )),
    }
}

/// Rewrites the sample index inside a serialized blob, returning the new
/// blob.
pub fn set_sample_index_in_state_bytes(bytes: &[u8], sample_index: i64) -> CoordResult<Vec<u8>> {
    let mut state = IteratorState::from_bytes(bytes)?;
    state.set_with_pattern(SAMPLE_INDEX_KEY, StateValue::Int(sample_index))?;
    state.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use efl_types::ErrorKind;

    fn sample_state() -> IteratorState {
        let mut state = IteratorState::new();
        state.write_int("reader::current_file_index", 1);
        state.write_int("reader::current_sample_index", 42);
        state.write_str("reader::current_block_name", "b1");
        state
    }

    #[test]
    fn pattern_lookup_round_trips_through_bytes() {
        let bytes = sample_state().to_bytes().unwrap();
        assert_eq!(sample_index_from_state_bytes(&bytes).unwrap(), 42);
        assert_eq!(block_id_from_state_bytes(&bytes).unwrap(), "b1");
    }

    #[test]
    fn set_sample_index_rewrites_blob() {
        let bytes = sample_state().to_bytes().unwrap();
        let patched = set_sample_index_in_state_bytes(&bytes, 7).unwrap();
        assert_eq!(sample_index_from_state_bytes(&patched).unwrap(), 7);
        // Everything else is untouched.
        assert_eq!(block_id_from_state_bytes(&patched).unwrap(), "b1");
    }

    #[test]
    fn zero_pattern_matches_is_not_found() {
        let mut state = IteratorState::new();
        state.write_int("unrelated", 1);
        let bytes = state.to_bytes().unwrap();
        let err = sample_index_from_state_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn multiple_pattern_matches_is_internal() {
        let mut state = sample_state();
        state.write_int("nested::current_sample_index", 3);
        let bytes = state.to_bytes().unwrap();
        let err = sample_index_from_state_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[test]
    fn exact_key_reads() {
        let state = sample_state();
        assert_eq!(state.read_int("reader::current_file_index").unwrap(), 1);
        assert_eq!(state.read_str("reader::current_block_name").unwrap(), "b1");
        let err = state.read_int("missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
