//! Conversions between the domain cluster model and its wire form.

use std::collections::BTreeMap;

use efl_proto::discovery as pb;
use efl_types::{ClusterDef, JobDef};

/// Domain → wire.
pub fn cluster_to_proto(def: &ClusterDef) -> pb::ClusterDef {
    pb::ClusterDef {
        jobs: def
            .jobs
            .iter()
            .map(|job| pb::JobDef {
                name: job.name.clone(),
                tasks: job.tasks.iter().map(|(&k, v)| (k, v.clone())).collect(),
            })
            .collect(),
    }
}

/// Wire → domain. Map ordering on the wire is unspecified; tasks are
/// re-sorted by index.
pub fn cluster_from_proto(def: pb::ClusterDef) -> ClusterDef {
    ClusterDef {
        jobs: def
            .jobs
            .into_iter()
            .map(|job| JobDef {
                name: job.name,
                tasks: job.tasks.into_iter().collect::<BTreeMap<i64, String>>(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efl_types::SENTINEL_REQUIRED;

    #[test]
    fn round_trip_preserves_layout() {
        let def = ClusterDef {
            jobs: vec![JobDef {
                name: "w".into(),
                tasks: BTreeMap::from([
                    (0, SENTINEL_REQUIRED.to_string()),
                    (1, "1.2.3.4:100".to_string()),
                ]),
            }],
        };
        assert_eq!(cluster_from_proto(cluster_to_proto(&def)), def);
    }
}
