//! Barrier operations over the stage tables.

use std::sync::{Arc, Mutex};

use efl_types::{CoordError, CoordResult};
use tracing::info;

use crate::store::StageStore;
use crate::{ORDER_UNSET, STATUS_COMPLETE, STATUS_FINISHED};

/// Snapshot of one stage row as seen by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageView {
    /// This worker's status in the stage.
    pub status: i64,

    /// Every worker's contributed result.
    pub result: Vec<String>,

    /// The arrival-order column.
    pub order: Vec<i64>,
}

/// Per-worker handle onto a shared stage store.
///
/// All four tables are mutated under the single store lock, taken once per
/// call.
#[derive(Debug)]
pub struct StageCoordinator<S: StageStore> {
    worker_num: usize,
    worker_id: usize,
    store: Arc<Mutex<S>>,
}

impl<S: StageStore> StageCoordinator<S> {
    /// Creates the handle for `worker_id` of `worker_num` workers.
    pub fn new(worker_num: usize, worker_id: usize, store: Arc<Mutex<S>>) -> CoordResult<Self> {
        if worker_id >= worker_num {
            return Err(CoordError::invalid_argument(format!(
                "worker index overflow: {worker_id} >= {worker_num}"
            )));
        }
        Ok(Self {
            worker_num,
            worker_id,
            store,
        })
    }

    /// Reads this worker's status in the stage, appending the row when the
    /// index is one past the end (only legal once the previous stage is
    /// fully complete).
    ///
    /// With `finish_ratio < 1`, once the chief (worker 0) has finished and
    /// the fraction of arrived workers reaches the ratio, the whole row is
    /// marked complete, including workers that never updated. The chief
    /// is not otherwise privileged; its arrival is simply the trigger
    /// condition.
    pub fn stage_status(
        &self,
        stage_index: usize,
        stage_name: &str,
        finish_ratio: f32,
    ) -> CoordResult<StageView> {
        let mut store = self.store.lock().expect("stage store poisoned");
        self.ensure_stage(&mut *store, stage_index, stage_name)?;

        if finish_ratio < 1.0
            && store.status(stage_index, self.worker_id) != STATUS_COMPLETE
            && self.chief_finished(&*store, stage_index)
        {
            self.rewrite_by_finish_ratio(&mut *store, stage_index, stage_name, finish_ratio);
        }

        Ok(StageView {
            status: store.status(stage_index, self.worker_id),
            result: (0..self.worker_num)
                .map(|w| store.result(stage_index, w).to_string())
                .collect(),
            order: (0..self.worker_num)
                .map(|w| store.order(stage_index, w))
                .collect(),
        })
    }

    /// Records this worker's arrival and result in the stage.
    ///
    /// The worker takes the first free arrival-order cell; the last
    /// outstanding arrival closes the row for everyone. A worker whose
    /// status was already forced to complete by the finish ratio still
    /// records its order and result but leaves statuses untouched.
    pub fn stage_update(
        &self,
        stage_index: usize,
        stage_name: &str,
        stage_result: impl Into<String>,
    ) -> CoordResult<()> {
        let mut store = self.store.lock().expect("stage store poisoned");
        self.ensure_stage(&mut *store, stage_index, stage_name)?;

        if store.status(stage_index, self.worker_id) == STATUS_FINISHED {
            return Err(CoordError::invalid_argument("stage is already updated"));
        }

        let arrival = (0..self.worker_num)
            .find(|&w| store.order(stage_index, w) == ORDER_UNSET)
            .ok_or_else(|| CoordError::invalid_argument("stage order is full"))?;
        store.set_order(stage_index, arrival, self.worker_id as i64);
        store.set_result(stage_index, self.worker_id, stage_result.into());

        if store.status(stage_index, self.worker_id) == STATUS_COMPLETE {
            return Ok(());
        }

        store.set_status(stage_index, self.worker_id, STATUS_FINISHED);
        if arrival == self.worker_num - 1 {
            for w in 0..self.worker_num {
                store.set_status(stage_index, w, STATUS_COMPLETE);
            }
        }
        Ok(())
    }

    fn ensure_stage(
        &self,
        store: &mut S,
        stage_index: usize,
        stage_name: &str,
    ) -> CoordResult<()> {
        let rows = store.row_count();
        if stage_index > rows {
            return Err(CoordError::invalid_argument(format!(
                "stage index {stage_index} is too big"
            )));
        }
        if stage_index == rows {
            if rows != 0 && store.status(rows - 1, 0) != STATUS_COMPLETE {
                return Err(CoordError::invalid_argument("stage is mismatched"));
            }
            store.append_row(stage_name, self.worker_num);
        }
        if store.stage_name(stage_index) != stage_name {
            return Err(CoordError::invalid_argument(format!(
                "stage name mismatched: {} != {stage_name}",
                store.stage_name(stage_index)
            )));
        }
        Ok(())
    }

    fn chief_finished(&self, store: &S, stage_index: usize) -> bool {
        (0..self.worker_num).any(|w| store.order(stage_index, w) == 0)
    }

    fn rewrite_by_finish_ratio(
        &self,
        store: &mut S,
        stage_index: usize,
        stage_name: &str,
        finish_ratio: f32,
    ) {
        let mut finished = 0;
        while finished < self.worker_num && store.order(stage_index, finished) != ORDER_UNSET {
            finished += 1;
        }
        if finished as f32 / self.worker_num as f32 >= finish_ratio {
            info!(stage = stage_name, finish_ratio, "stage exceeds finish ratio, current stage finish");
            for w in 0..self.worker_num {
                store.set_status(stage_index, w, STATUS_COMPLETE);
            }
        }
    }
}
