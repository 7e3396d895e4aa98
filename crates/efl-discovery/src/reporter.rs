//! Background registration loop run by every worker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use efl_kv::KvRegistry;
use efl_types::{CoordError, CoordResult};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::RemoteScheduler;

const STOP_WAIT: Duration = Duration::from_secs(10);

/// Periodically reports this worker's serving address to the scheduler.
///
/// Each tick resolves the scheduler through the KV rendezvous when it has
/// no client, registers, and caches the returned generation version. Any
/// error drops the scheduler client so the next tick re-resolves from
/// scratch; the loop itself never gives up.
pub struct Reporter {
    shutdown: Arc<Notify>,
    status: Arc<Mutex<CoordResult<()>>>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    /// Spawns the reporting loop for worker `(job, task)` serving at
    /// `target`, against the scheduler rendezvoused at `kv_addr`.
    pub fn spawn(
        job: impl Into<String>,
        task: i64,
        target: impl Into<String>,
        kv_addr: impl Into<String>,
        interval: Duration,
        kv: Arc<KvRegistry>,
    ) -> Self {
        let job = job.into();
        let target = target.into();
        let kv_addr = kv_addr.into();
        let shutdown = Arc::new(Notify::new());
        let status: Arc<Mutex<CoordResult<()>>> = Arc::new(Mutex::new(Ok(())));

        let loop_shutdown = Arc::clone(&shutdown);
        let loop_status = Arc::clone(&status);
        let handle = tokio::spawn(async move {
            let mut version: i64 = -1;
            let mut scheduler: Option<RemoteScheduler> = None;
            loop {
                let result = Self::tick(
                    &kv, &kv_addr, &mut scheduler, &job, task, &target, &mut version,
                )
                .await;
                if let Err(e) = &result {
                    error!(%job, task, error = %e, "register server failed");
                    scheduler = None;
                }
                *loop_status.lock().expect("reporter status poisoned") = result;

                tokio::select! {
                    () = loop_shutdown.notified() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
        });

        Self {
            shutdown,
            status,
            handle: Some(handle),
        }
    }

    async fn tick(
        kv: &KvRegistry,
        kv_addr: &str,
        scheduler: &mut Option<RemoteScheduler>,
        job: &str,
        task: i64,
        target: &str,
        version: &mut i64,
    ) -> CoordResult<()> {
        if scheduler.is_none() {
            let scheduler_addr = kv.get(kv_addr).await?;
            *scheduler = Some(RemoteScheduler::connect(&scheduler_addr).await?);
        }
        let client = scheduler
            .as_mut()
            .ok_or_else(|| CoordError::internal("scheduler client missing"))?;
        let new_version = client.register_node(job, task, target, *version).await?;
        if new_version != *version {
            info!(from = *version, to = new_version, "update version");
            *version = new_version;
        }
        Ok(())
    }

    /// The outcome of the most recent tick; used as a liveness probe.
    pub fn status(&self) -> CoordResult<()> {
        self.status.lock().expect("reporter status poisoned").clone()
    }

    /// Signals the loop to stop and waits for it with a bounded timeout.
    pub async fn stop(&mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take()
            && tokio::time::timeout(STOP_WAIT, handle).await.is_err()
        {
            error!("reporter did not stop within {STOP_WAIT:?}");
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
