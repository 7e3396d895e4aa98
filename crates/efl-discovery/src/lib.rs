//! Service discovery for a federated training cluster.
//!
//! Every worker runs one [`Reporter`] that periodically writes its serving
//! address to the central [`Scheduler`] through the shared KV rendezvous.
//! Once all required workers of the current generation have registered,
//! clients can fetch the full cluster with [`get_cluster_def`]. A restart
//! of any worker bumps the generation version, which invalidates every
//! other worker's cached state and forces re-registration.

mod client;
mod convert;
mod reporter;
mod scheduler;
mod service;

pub use client::RemoteScheduler;
pub use convert::{cluster_from_proto, cluster_to_proto};
pub use reporter::Reporter;
pub use scheduler::Scheduler;
pub use service::DiscoveryServer;

use efl_kv::KvRegistry;
use efl_types::{ClusterDef, CoordResult};

/// Resolves the scheduler through the KV rendezvous and fetches the
/// current cluster definition.
pub async fn get_cluster_def(kv: &KvRegistry, kv_addr: &str) -> CoordResult<ClusterDef> {
    let target = kv.get(kv_addr).await?;
    let mut scheduler = RemoteScheduler::connect(&target).await?;
    scheduler.get_cluster().await
}
