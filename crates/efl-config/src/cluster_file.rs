//! Cluster layouts from TOML files.
//!
//! ```toml
//! [[jobs]]
//! name = "worker"
//!
//! [jobs.tasks]
//! 0 = "required"
//! 1 = "required"
//!
//! [[jobs]]
//! name = "scheduler"
//!
//! [jobs.tasks]
//! 0 = "scheduler"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use efl_types::{ClusterDef, CoordError, CoordResult, JobDef};
use serde::Deserialize;

// TOML table keys are strings; task indices are parsed after the fact.
#[derive(Deserialize)]
struct RawJob {
    name: String,
    #[serde(default)]
    tasks: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawCluster {
    #[serde(default)]
    jobs: Vec<RawJob>,
}

/// Parses a cluster layout from TOML text.
pub fn parse_cluster_toml(text: &str) -> CoordResult<ClusterDef> {
    let raw: RawCluster = toml::from_str(text)
        .map_err(|e| CoordError::invalid_argument(format!("bad cluster toml: {e}")))?;
    let mut jobs = Vec::with_capacity(raw.jobs.len());
    for job in raw.jobs {
        let mut tasks = BTreeMap::new();
        for (index, value) in job.tasks {
            let index: i64 = index.parse().map_err(|_| {
                CoordError::invalid_argument(format!(
                    "job {}: task index {index} is not an integer",
                    job.name
                ))
            })?;
            tasks.insert(index, value);
        }
        jobs.push(JobDef {
            name: job.name,
            tasks,
        });
    }
    Ok(ClusterDef { jobs })
}

/// Loads a cluster layout from a TOML file.
pub fn load_cluster_file(path: &Path) -> CoordResult<ClusterDef> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CoordError::invalid_argument(format!("read cluster file {}: {e}", path.display()))
    })?;
    parse_cluster_toml(&text)
}
