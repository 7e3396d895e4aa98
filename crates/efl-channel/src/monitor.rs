//! Deadline registry with a periodic scanner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::error;

type TimeoutCallback = Box<dyn FnOnce() + Send>;

struct Entry {
    deadline: Instant,
    callback: TimeoutCallback,
}

struct Registry {
    next_key: u32,
    entries: HashMap<u32, Entry>,
}

struct Shared {
    running: AtomicBool,
    registry: Mutex<Registry>,
}

/// Registers per-call deadlines and fires their callbacks once elapsed.
///
/// One scanner task wakes every `scanning_interval` and fires the
/// callbacks of expired entries. [`register`](Monitor::register) returns a
/// key; [`unregister`](Monitor::unregister) returns true iff the entry was
/// still present, i.e. the normal completion won the race against the
/// timeout. A completion path must call `unregister` first and skip its
/// normal work when it returns false, because the timeout callback has
/// already surfaced the error.
pub struct Monitor {
    shared: Arc<Shared>,
    scanning_interval: Duration,
    default_timeout: Duration,
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Creates a stopped monitor; call [`start`](Self::start) to scan.
    pub fn new(scanning_interval: Duration, default_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                registry: Mutex::new(Registry {
                    next_key: 0,
                    entries: HashMap::new(),
                }),
            }),
            scanning_interval,
            default_timeout,
            shutdown: Arc::new(Notify::new()),
            handle: None,
        }
    }

    /// Starts the scanner task. Idempotent.
    pub fn start(&mut self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.scanning_interval;
        self.handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.notified() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                let now = Instant::now();
                let expired: Vec<Entry> = {
                    let mut registry = shared.registry.lock().expect("monitor registry poisoned");
                    let keys: Vec<u32> = registry
                        .entries
                        .iter()
                        .filter(|(_, e)| now > e.deadline)
                        .map(|(&k, _)| k)
                        .collect();
                    keys.into_iter()
                        .filter_map(|k| registry.entries.remove(&k))
                        .collect()
                };
                // Fire outside the lock so callbacks may re-register.
                for entry in expired {
                    (entry.callback)();
                }
            }
        }));
    }

    /// Registers `callback` to fire after `timeout` (the default when
    /// `None`). Returns the entry key, or 0 when the monitor is stopped.
    pub fn register(&self, callback: TimeoutCallback, timeout: Option<Duration>) -> u32 {
        if !self.shared.running.load(Ordering::SeqCst) {
            return 0;
        }
        let deadline = Instant::now() + timeout.unwrap_or(self.default_timeout);
        let mut registry = self.shared.registry.lock().expect("monitor registry poisoned");
        // Keys are dense ascending from 1; 0 is the stopped sentinel.
        registry.next_key = registry.next_key.wrapping_add(1);
        if registry.next_key == 0 {
            registry.next_key = 1;
        }
        let key = registry.next_key;
        registry.entries.insert(key, Entry { deadline, callback });
        key
    }

    /// Removes the entry. True iff it had not yet fired.
    pub fn unregister(&self, key: u32) -> bool {
        let mut registry = self.shared.registry.lock().expect("monitor registry poisoned");
        registry.entries.remove(&key).is_some()
    }

    /// Stops the scanner and drops all pending entries.
    pub async fn shutdown(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            error!(error = %e, "monitor scanner join failed");
        }
        let mut registry = self.shared.registry.lock().expect("monitor registry poisoned");
        registry.entries.clear();
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_monitor() -> Monitor {
        let mut monitor = Monitor::new(Duration::from_millis(5), Duration::from_millis(40));
        monitor.start();
        monitor
    }

    #[tokio::test]
    async fn stopped_monitor_hands_out_key_zero() {
        let monitor = Monitor::new(Duration::from_millis(5), Duration::from_millis(40));
        assert_eq!(monitor.register(Box::new(|| {}), None), 0);
    }

    #[tokio::test]
    async fn unregister_before_deadline_suppresses_callback() {
        let monitor = fast_monitor();
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        let key = monitor.register(
            Box::new(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );
        assert!(monitor.unregister(key));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn late_completion_loses_the_race() {
        let monitor = fast_monitor();
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        let key = monitor.register(
            Box::new(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
            Some(Duration::from_millis(20)),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The deadline fired first: the late completion must observe false
        // and do no further work.
        assert!(!monitor.unregister(key));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keys_ascend_from_one() {
        let monitor = fast_monitor();
        let first = monitor.register(Box::new(|| {}), None);
        let second = monitor.register(Box::new(|| {}), None);
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }
}
