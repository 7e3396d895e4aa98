//! Named training-stage barriers with per-worker results.
//!
//! A stage is a synchronization point: each worker contributes an opaque
//! result, the coordinator records strict arrival order, and the stage
//! closes either when every worker has arrived or, with a finish ratio
//! below 1, as soon as enough workers (including the chief) have.
//!
//! The coordinator operates on a [`StageStore`] trait so the training
//! framework can supply its own shared tables; [`MemoryStageStore`] is the
//! in-process implementation.

mod coordinator;
mod store;

pub use coordinator::{StageCoordinator, StageView};
pub use store::{MemoryStageStore, StageStore};

/// Worker has not contributed to the stage yet.
pub const STATUS_INITIAL: i64 = 0;

/// This worker has finished the stage.
pub const STATUS_FINISHED: i64 = 1;

/// The stage is complete for every worker.
pub const STATUS_COMPLETE: i64 = 2;

/// Order value of a worker slot nobody has claimed yet.
pub const ORDER_UNSET: i64 = -1;
