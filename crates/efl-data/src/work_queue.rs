//! Shared FIFO of file-shard names for reader threads.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use efl_types::{CoordError, CoordResult};
use tracing::warn;

/// Sentinel appended on close (when configured) so downstream readers can
/// tell "queue drained" from "epoch over".
pub const END_FILE_SENTINEL: &str = "__DATA_IO_END_FILE_NAME__";

struct QueueState {
    queue: VecDeque<String>,
    closed: bool,
}

/// Unbounded FIFO of strings with close/end-sentinel semantics and a
/// lazily created consumer thread pool.
pub struct WorkQueue {
    name: String,
    set_end_file: bool,
    state: Mutex<QueueState>,
    take_cv: Condvar,
    pool: Mutex<Option<TaskPool>>,
}

impl WorkQueue {
    /// Creates an open queue. With `set_end_file`, closing (and restoring)
    /// appends [`END_FILE_SENTINEL`].
    pub fn new(name: impl Into<String>, set_end_file: bool) -> Self {
        Self {
            name: name.into(),
            set_end_file,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                closed: false,
            }),
            take_cv: Condvar::new(),
            pool: Mutex::new(None),
        }
    }

    /// Appends a batch of works. Putting into a closed queue is a no-op
    /// apart from a warning.
    pub fn put(&self, works: impl IntoIterator<Item = String>) {
        let mut state = self.state.lock().expect("work queue poisoned");
        if state.closed {
            drop(state);
            self.take_cv.notify_all();
            warn!(queue = %self.name, "work queue reinitialized");
            return;
        }
        state.queue.extend(works);
        drop(state);
        self.take_cv.notify_all();
    }

    /// Blocks until a work is available or the queue is closed; a drained
    /// closed queue yields `OutOfRange`.
    pub fn take(&self) -> CoordResult<String> {
        let mut state = self.state.lock().expect("work queue poisoned");
        while state.queue.is_empty() && !state.closed {
            state = self.take_cv.wait(state).expect("work queue poisoned");
        }
        match state.queue.pop_front() {
            Some(work) => Ok(work),
            None => Err(CoordError::out_of_range(format!(
                "all works in work queue {} are taken",
                self.name
            ))),
        }
    }

    /// Number of queued works (including the end sentinel, if pushed).
    pub fn size(&self) -> usize {
        self.state.lock().expect("work queue poisoned").queue.len()
    }

    /// Snapshot of the queue contents, excluding the trailing end
    /// sentinel.
    pub fn save(&self) -> Vec<String> {
        let state = self.state.lock().expect("work queue poisoned");
        let keep = if self.set_end_file {
            state.queue.len().saturating_sub(1)
        } else {
            state.queue.len()
        };
        state.queue.iter().take(keep).cloned().collect()
    }

    /// Replaces the queue contents with a saved snapshot, re-appending the
    /// end sentinel when configured.
    pub fn restore(&self, works: impl IntoIterator<Item = String>) {
        let mut state = self.state.lock().expect("work queue poisoned");
        state.queue.clear();
        state.queue.extend(works);
        if self.set_end_file {
            state.queue.push_back(END_FILE_SENTINEL.to_string());
        }
        drop(state);
        self.take_cv.notify_all();
    }

    /// Closes the queue, optionally appending the end sentinel. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("work queue poisoned");
        if state.closed {
            return;
        }
        if self.set_end_file {
            state.queue.push_back(END_FILE_SENTINEL.to_string());
        }
        state.closed = true;
        drop(state);
        self.take_cv.notify_all();
    }

    /// Runs `task` on the queue's thread pool, creating it with
    /// `num_threads` workers on the first call (later calls reuse the
    /// first size).
    pub fn schedule(&self, num_threads: usize, task: impl FnOnce() + Send + 'static) {
        let mut pool = self.pool.lock().expect("work queue pool poisoned");
        let pool = pool.get_or_insert_with(|| TaskPool::new(&self.name, num_threads));
        pool.execute(Box::new(task));
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.close();
    }
}

type Job = Box<dyn FnOnce() + Send>;

struct TaskPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    fn new(queue_name: &str, num_threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..num_threads.max(1))
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                std::thread::Builder::new()
                    .name(format!("work_queue_{queue_name}_{i}"))
                    .spawn(move || {
                        loop {
                            let job = receiver.lock().expect("task pool poisoned").recv();
                            match job {
                                Ok(job) => job(),
                                Err(_) => break,
                            }
                        }
                    })
                    .expect("spawn work queue thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    fn execute(&self, job: Job) {
        if let Some(sender) = &self.sender {
            // Workers only die when the sender is dropped.
            let _ = sender.send(job);
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
