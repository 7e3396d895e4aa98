//! Client side of the discovery service.

use efl_proto::discovery as pb;
use efl_proto::discovery::cluster_discovery_client::ClusterDiscoveryClient;
use efl_types::{ClusterDef, CoordError, CoordResult};
use tonic::transport::{Channel, Endpoint};

/// A connected handle to a remote scheduler.
pub struct RemoteScheduler {
    client: ClusterDiscoveryClient<Channel>,
}

impl RemoteScheduler {
    /// Connects to `addr` (an `ip:port` string) over plaintext.
    pub async fn connect(addr: &str) -> CoordResult<Self> {
        let endpoint = Endpoint::from_shared(format!("http://{addr}"))
            .map_err(|e| CoordError::invalid_argument(format!("bad scheduler addr {addr}: {e}")))?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| CoordError::unavailable(format!("connect scheduler {addr}: {e}")))?;
        Ok(Self {
            client: ClusterDiscoveryClient::new(channel),
        })
    }

    /// Registers this worker's serving address; returns the scheduler's
    /// current generation version.
    pub async fn register_node(
        &mut self,
        job: &str,
        task: i64,
        addr: &str,
        my_version: i64,
    ) -> CoordResult<i64> {
        let request = pb::RegisterNodeRequest {
            task_name: job.to_string(),
            task_index: task,
            addr: addr.to_string(),
            version: my_version,
        };
        let reply = self
            .client
            .register_node(request)
            .await
            .map_err(CoordError::from)?
            .into_inner();
        if reply.code == efl_proto::CODE_OK {
            Ok(reply.version)
        } else {
            Err(CoordError::from_code(reply.code, reply.error_msg))
        }
    }

    /// Fetches the fully-registered cluster definition.
    pub async fn get_cluster(&mut self) -> CoordResult<ClusterDef> {
        let reply = self
            .client
            .get_cluster(pb::GetClusterRequest {})
            .await
            .map_err(CoordError::from)?
            .into_inner();
        if reply.code == efl_proto::CODE_OK {
            let cluster = reply
                .cluster
                .ok_or_else(|| CoordError::internal("get_cluster reply missing cluster"))?;
            Ok(crate::cluster_from_proto(cluster))
        } else {
            Err(CoordError::from_code(reply.code, reply.error_msg))
        }
    }
}
