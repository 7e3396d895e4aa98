//! Dataset-side building blocks of the coordination substrate.
//!
//! - [`RecordReader`]/[`RecordWriter`]: length-prefixed record files with
//!   optional zstd compression
//! - [`FederatedReader`]: an ordered multi-file iterator that remembers a
//!   `(block_id, sample_index)` cursor so training can resume mid-epoch
//! - [`IteratorState`]: the serialized cursor blob, plus keyed lookups
//!   that work on the blob without a live iterator
//! - [`WorkQueue`]: a shared FIFO of file-shard names for reader threads

mod reader;
mod record;
mod state;
mod work_queue;

pub use reader::{BlockFile, FederatedReader};
pub use record::{Compression, RecordReader, RecordWriter};
pub use state::{
    IteratorState, StateValue, block_id_from_state_bytes, sample_index_from_state_bytes,
    set_sample_index_in_state_bytes,
};
pub use work_queue::{END_FILE_SENTINEL, WorkQueue};
