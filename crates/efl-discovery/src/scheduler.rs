//! Scheduler registration tables and generation versioning.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use efl_types::{ClusterDef, CoordError, CoordResult, WorkerSpec};
use tracing::info;

struct Tables {
    version: i64,
    addrs: BTreeMap<WorkerSpec, String>,
}

/// Tracks which workers of the layout have registered, at which address,
/// and under which generation version.
///
/// The version starts at `random u64 & 0xFFFFFFFF00000000` and only ever
/// increases. Whenever a worker re-registers at a different address while
/// the table is fully populated, the version is bumped and the table is
/// cleared so every other worker observes a mismatch and re-registers.
pub struct Scheduler {
    layout: ClusterDef,
    required: BTreeSet<WorkerSpec>,
    tables: Mutex<Tables>,
}

impl Scheduler {
    /// Creates a scheduler for the discovery tasks of `def`.
    pub fn new(def: &ClusterDef) -> Self {
        let layout = def.discovery_layout();
        let required: BTreeSet<WorkerSpec> = layout.discovery_specs().into_iter().collect();
        let version = (rand::random::<u64>() & 0xFFFF_FFFF_0000_0000) as i64;
        Self {
            layout,
            required,
            tables: Mutex::new(Tables {
                version,
                addrs: BTreeMap::new(),
            }),
        }
    }

    /// Records a worker's serving address and returns the current
    /// generation version.
    ///
    /// A re-registration at a different address while the table was full
    /// bumps the version and clears every other entry. Calls carrying a
    /// stale `my_version` leave the table untouched; the caller is
    /// expected to observe the returned version and report again.
    pub fn register_node(
        &self,
        job: &str,
        task: i64,
        addr: &str,
        my_version: i64,
    ) -> CoordResult<i64> {
        let spec = WorkerSpec::new(job, task);
        if !self.required.contains(&spec) {
            return Err(CoordError::invalid_argument(format!(
                "server spec is not in scheduler's cluster spec: {spec}"
            )));
        }

        let mut tables = self.tables.lock().expect("scheduler tables poisoned");
        let tables = &mut *tables;
        match tables.addrs.get(&spec) {
            Some(existing) if existing != addr && tables.version == my_version => {
                info!(%spec, failed_on = %existing, restart_on = %addr,
                    "scheduler has detected server fail");
                if tables.addrs.len() == self.required.len() {
                    tables.version += 1;
                    info!(version = tables.version, "change version");
                }
                tables.addrs.clear();
                tables.addrs.insert(spec, addr.to_string());
            }
            None if tables.version == my_version => {
                info!(%spec, %addr, "server registered");
                tables.addrs.insert(spec, addr.to_string());
            }
            _ if tables.version != my_version => {
                info!(%spec, %addr, "server version mismatch, drop it");
            }
            _ => {}
        }

        Ok(tables.version)
    }

    /// Returns the fully-populated cluster, or `Unavailable` naming up to
    /// three missing specs.
    pub fn get_cluster(&self) -> CoordResult<ClusterDef> {
        let tables = self.tables.lock().expect("scheduler tables poisoned");
        if tables.addrs.len() != self.required.len() {
            let missing: Vec<String> = self
                .required
                .iter()
                .filter(|spec| !tables.addrs.contains_key(*spec))
                .map(ToString::to_string)
                .collect();
            let mut listed = missing
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            if missing.len() > 3 {
                listed.push_str(", etc...");
            }
            return Err(CoordError::unavailable(format!(
                "some server is not ready ({}). [{listed}]",
                missing.len()
            )));
        }
        Ok(self.layout.project(&tables.addrs))
    }

    /// The current generation version.
    pub fn version(&self) -> i64 {
        self.tables.lock().expect("scheduler tables poisoned").version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efl_types::{ErrorKind, JobDef, SENTINEL_REQUIRED};

    fn two_worker_def() -> ClusterDef {
        ClusterDef {
            jobs: vec![JobDef {
                name: "w".into(),
                tasks: BTreeMap::from([
                    (0, SENTINEL_REQUIRED.to_string()),
                    (1, SENTINEL_REQUIRED.to_string()),
                ]),
            }],
        }
    }

    #[test]
    fn version_starts_with_zero_low_word() {
        let scheduler = Scheduler::new(&two_worker_def());
        assert_eq!(scheduler.version() & 0xFFFF_FFFF, 0);
    }

    #[test]
    fn unknown_spec_is_rejected() {
        let scheduler = Scheduler::new(&two_worker_def());
        let err = scheduler
            .register_node("ps", 0, "1.2.3.4:100", scheduler.version())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn happy_discovery() {
        let scheduler = Scheduler::new(&two_worker_def());
        let v = scheduler.version();

        scheduler.register_node("w", 0, "1.2.3.4:100", v).unwrap();
        let err = scheduler.get_cluster().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert!(err.message.contains("/job:w/task:1"), "{}", err.message);

        scheduler.register_node("w", 1, "1.2.3.5:100", v).unwrap();
        let cluster = scheduler.get_cluster().unwrap();
        assert_eq!(
            cluster.task_value(&WorkerSpec::new("w", 0)),
            Some("1.2.3.4:100")
        );
        assert_eq!(
            cluster.task_value(&WorkerSpec::new("w", 1)),
            Some("1.2.3.5:100")
        );
    }

    #[test]
    fn restart_bumps_version_and_clears_table() {
        let scheduler = Scheduler::new(&two_worker_def());
        let v = scheduler.version();
        scheduler.register_node("w", 0, "1.2.3.4:100", v).unwrap();
        scheduler.register_node("w", 1, "1.2.3.5:100", v).unwrap();

        // Worker 0 restarts on a new port with its cached version.
        let new_v = scheduler.register_node("w", 0, "1.2.3.4:200", v).unwrap();
        assert_eq!(new_v, v + 1);

        // The table now holds only the restarted worker.
        let err = scheduler.get_cluster().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);

        // Worker 1's stale report is not recorded, but learns the version.
        let observed = scheduler.register_node("w", 1, "1.2.3.5:100", v).unwrap();
        assert_eq!(observed, new_v);
        assert!(scheduler.get_cluster().is_err());

        // Re-registering with the new version completes the generation.
        scheduler
            .register_node("w", 1, "1.2.3.5:100", new_v)
            .unwrap();
        let cluster = scheduler.get_cluster().unwrap();
        assert_eq!(
            cluster.task_value(&WorkerSpec::new("w", 0)),
            Some("1.2.3.4:200")
        );
    }

    #[test]
    fn partial_restart_keeps_version() {
        let scheduler = Scheduler::new(&two_worker_def());
        let v = scheduler.version();
        scheduler.register_node("w", 0, "1.2.3.4:100", v).unwrap();

        // Address change while the table is not yet full: no bump, but the
        // table is reset to the new address.
        let new_v = scheduler.register_node("w", 0, "1.2.3.4:200", v).unwrap();
        assert_eq!(new_v, v);
        let err = scheduler.get_cluster().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
    }

    #[test]
    fn missing_spec_listing_caps_at_three() {
        let def = ClusterDef {
            jobs: vec![JobDef {
                name: "w".into(),
                tasks: (0..5).map(|i| (i, SENTINEL_REQUIRED.to_string())).collect(),
            }],
        };
        let scheduler = Scheduler::new(&def);
        let err = scheduler.get_cluster().unwrap_err();
        assert!(err.message.contains("etc..."), "{}", err.message);
        assert!(err.message.contains("(5)"), "{}", err.message);
    }
}
