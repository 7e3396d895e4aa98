//! gRPC surface of the scheduler plus its KV announcement.

use std::net::SocketAddr;
use std::sync::Arc;

use efl_kv::KvRegistry;
use efl_proto::discovery as pb;
use efl_proto::discovery::cluster_discovery_server::{ClusterDiscovery, ClusterDiscoveryServer};
use efl_types::{ClusterDef, CoordError, CoordResult};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::Scheduler;

struct DiscoveryService {
    scheduler: Arc<Scheduler>,
}

#[tonic::async_trait]
impl ClusterDiscovery for DiscoveryService {
    async fn register_node(
        &self,
        request: Request<pb::RegisterNodeRequest>,
    ) -> Result<Response<pb::RegisterNodeResponse>, Status> {
        let req = request.into_inner();
        let reply = match self.scheduler.register_node(
            &req.task_name,
            req.task_index,
            &req.addr,
            req.version,
        ) {
            Ok(version) => pb::RegisterNodeResponse {
                code: efl_proto::CODE_OK,
                error_msg: String::new(),
                version,
            },
            Err(e) => pb::RegisterNodeResponse {
                code: e.code(),
                error_msg: e.message,
                version: 0,
            },
        };
        Ok(Response::new(reply))
    }

    async fn get_cluster(
        &self,
        _request: Request<pb::GetClusterRequest>,
    ) -> Result<Response<pb::GetClusterResponse>, Status> {
        let reply = match self.scheduler.get_cluster() {
            Ok(cluster) => pb::GetClusterResponse {
                code: efl_proto::CODE_OK,
                error_msg: String::new(),
                cluster: Some(crate::cluster_to_proto(&cluster)),
            },
            Err(e) => pb::GetClusterResponse {
                code: e.code(),
                error_msg: e.message,
                cluster: None,
            },
        };
        Ok(Response::new(reply))
    }
}

/// Owns the scheduler state and its serving task.
pub struct DiscoveryServer {
    scheduler: Arc<Scheduler>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

impl DiscoveryServer {
    /// Creates a server for the given cluster layout. Nothing listens
    /// until [`start`](Self::start).
    pub fn new(def: &ClusterDef) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(def)),
            local_addr: None,
            shutdown: None,
            handle: None,
        }
    }

    /// Shared handle to the scheduler tables.
    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Binds `bind_addr` (port 0 picks a free port) and starts serving.
    pub async fn start(&mut self, bind_addr: &str) -> CoordResult<SocketAddr> {
        if self.handle.is_some() {
            return Err(CoordError::failed_precondition(
                "discovery server already started",
            ));
        }
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| CoordError::internal(format!("bind {bind_addr} failed: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CoordError::internal(format!("local addr: {e}")))?;

        let service = DiscoveryService {
            scheduler: Arc::clone(&self.scheduler),
        };
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(
            tonic::transport::Server::builder()
                .add_service(ClusterDiscoveryServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    let _ = rx.await;
                    info!("shutting down discovery service");
                }),
        );

        self.local_addr = Some(local_addr);
        self.shutdown = Some(tx);
        self.handle = Some(handle);
        info!(%local_addr, "discovery service started");
        Ok(local_addr)
    }

    /// Publishes `advertise_ip:port` as the single-line rendezvous value.
    pub async fn announce(
        &self,
        kv: &KvRegistry,
        kv_addr: &str,
        advertise_ip: &str,
    ) -> CoordResult<()> {
        let local = self
            .local_addr
            .ok_or_else(|| CoordError::failed_precondition("discovery server not started"))?;
        kv.put(kv_addr, &format!("{advertise_ip}:{}", local.port()))
            .await
    }

    /// Stops serving and waits for the task to finish.
    pub async fn shutdown(&mut self) -> CoordResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(CoordError::internal(format!("discovery serve error: {e}"))),
                Err(e) => Err(CoordError::internal(format!("discovery join error: {e}"))),
            }
        } else {
            Ok(())
        }
    }
}
