//! Cluster layout and worker identity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Task value marking a worker that must register before the cluster is ready.
pub const SENTINEL_REQUIRED: &str = "required";

/// Task value marking the scheduler's own slot in the layout.
pub const SENTINEL_SCHEDULER: &str = "scheduler";

/// Identity of one worker process, unique within a cluster.
///
/// Rendered canonically as `/job:<name>/task:<id>`, which is the key used
/// in all scheduler tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerSpec {
    /// Job name, e.g. `worker` or `ps`.
    pub job: String,

    /// Task index within the job.
    pub task: i64,
}

impl WorkerSpec {
    /// Creates a spec from a job name and task index.
    pub fn new(job: impl Into<String>, task: i64) -> Self {
        Self {
            job: job.into(),
            task,
        }
    }
}

impl fmt::Display for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/job:{}/task:{}", self.job, self.task)
    }
}

/// One job of a cluster: a name plus a task-index → value mapping.
///
/// A task value is either a concrete `ip:port` address or one of the
/// discovery sentinels ([`SENTINEL_REQUIRED`] / [`SENTINEL_SCHEDULER`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDef {
    /// Job name.
    pub name: String,

    /// Task index → address or sentinel.
    pub tasks: BTreeMap<i64, String>,
}

/// A full cluster layout: the ordered set of jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDef {
    /// Jobs in declaration order.
    pub jobs: Vec<JobDef>,
}

impl ClusterDef {
    /// Returns true when the task value is one of the discovery sentinels.
    pub fn is_sentinel(value: &str) -> bool {
        value == SENTINEL_REQUIRED || value == SENTINEL_SCHEDULER
    }

    /// Specs of every task that participates in discovery (sentinel-valued).
    pub fn discovery_specs(&self) -> Vec<WorkerSpec> {
        let mut specs = Vec::new();
        for job in &self.jobs {
            for (&task, value) in &job.tasks {
                if Self::is_sentinel(value) {
                    specs.push(WorkerSpec::new(job.name.clone(), task));
                }
            }
        }
        specs
    }

    /// The sentinel-only projection of this layout: jobs restricted to
    /// their discovery tasks. Jobs without any sentinel task are dropped.
    pub fn discovery_layout(&self) -> ClusterDef {
        let mut jobs = Vec::new();
        for job in &self.jobs {
            let tasks: BTreeMap<i64, String> = job
                .tasks
                .iter()
                .filter(|(_, v)| Self::is_sentinel(v))
                .map(|(&k, v)| (k, v.clone()))
                .collect();
            if !tasks.is_empty() {
                jobs.push(JobDef {
                    name: job.name.clone(),
                    tasks,
                });
            }
        }
        ClusterDef { jobs }
    }

    /// Projects registered addresses onto this layout, replacing every
    /// task value with the address registered for its spec. Tasks with no
    /// registered address are omitted.
    pub fn project(&self, addrs: &BTreeMap<WorkerSpec, String>) -> ClusterDef {
        let mut jobs = Vec::new();
        for job in &self.jobs {
            let mut tasks = BTreeMap::new();
            for &task in job.tasks.keys() {
                let spec = WorkerSpec::new(job.name.clone(), task);
                if let Some(addr) = addrs.get(&spec) {
                    tasks.insert(task, addr.clone());
                }
            }
            jobs.push(JobDef {
                name: job.name.clone(),
                tasks,
            });
        }
        ClusterDef { jobs }
    }

    /// Looks up the value recorded for a spec, if any.
    pub fn task_value(&self, spec: &WorkerSpec) -> Option<&str> {
        self.jobs
            .iter()
            .find(|j| j.name == spec.job)
            .and_then(|j| j.tasks.get(&spec.task))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClusterDef {
        ClusterDef {
            jobs: vec![JobDef {
                name: "worker".into(),
                tasks: BTreeMap::from([
                    (0, SENTINEL_REQUIRED.to_string()),
                    (1, SENTINEL_REQUIRED.to_string()),
                ]),
            }],
        }
    }

    #[test]
    fn spec_renders_canonically() {
        assert_eq!(WorkerSpec::new("worker", 3).to_string(), "/job:worker/task:3");
    }

    #[test]
    fn discovery_specs_skip_concrete_addresses() {
        let mut def = sample();
        def.jobs[0].tasks.insert(2, "10.0.0.1:80".into());
        let specs = def.discovery_specs();
        assert_eq!(specs.len(), 2);
        assert!(specs.contains(&WorkerSpec::new("worker", 0)));
        assert!(!specs.contains(&WorkerSpec::new("worker", 2)));
    }

    #[test]
    fn project_replaces_sentinels() {
        let def = sample();
        let addrs = BTreeMap::from([
            (WorkerSpec::new("worker", 0), "1.2.3.4:100".to_string()),
            (WorkerSpec::new("worker", 1), "1.2.3.5:100".to_string()),
        ]);
        let projected = def.project(&addrs);
        assert_eq!(
            projected.task_value(&WorkerSpec::new("worker", 1)),
            Some("1.2.3.5:100")
        );
    }
}
