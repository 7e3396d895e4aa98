//! Communicator lifecycle and the user-facing channel operations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use efl_proto::channel::peer_channel_server::PeerChannelServer;
use efl_types::{CoordError, CoordResult};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{error, info};

use crate::client::ChannelClient;
use crate::rendezvous::{Claim, ReaderState, Rendezvous};
use crate::service::ChannelService;
use crate::transport::{ClientTransport, ServerTransport};
use crate::Monitor;

/// Construction parameters for a [`Communicator`].
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    /// Address this side listens on.
    pub listen_addr: String,

    /// The peer's listening address.
    pub peer_addr: String,

    /// Tensor names this side may receive; each gets a rendezvous slot.
    pub tensor_names: Vec<String>,

    /// Dataset names whose reader state this side serves.
    pub dataset_names: Vec<String>,

    /// Monitor sweep interval.
    pub scanning_interval: Duration,

    /// Deadline applied to every guarded operation.
    pub default_timeout: Duration,
}

impl CommunicatorConfig {
    /// Config with the stock monitor timings (30 s sweep, 10 min deadline).
    pub fn new(listen_addr: impl Into<String>, peer_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            peer_addr: peer_addr.into(),
            tensor_names: Vec::new(),
            dataset_names: Vec::new(),
            scanning_interval: Duration::from_secs(30),
            default_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommState {
    Created,
    Connecting,
    Connected,
    Closed,
}

// Graceful drain bound; parked rendezvous calls never complete on their
// own and must not wedge the teardown.
const SERVER_DRAIN_WAIT: Duration = Duration::from_secs(10);

struct ServerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl ServerHandle {
    async fn shutdown(mut self) -> CoordResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(SERVER_DRAIN_WAIT, &mut self.handle).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(CoordError::internal(format!("channel serve error: {e}"))),
            Ok(Err(e)) => Err(CoordError::internal(format!("channel join error: {e}"))),
            Err(_) => {
                self.handle.abort();
                Ok(())
            }
        }
    }

    fn abort(&self) {
        self.handle.abort();
    }
}

struct Inner {
    state: CommState,
    client: Option<ChannelClient>,
    server: Option<ServerHandle>,
}

/// One bidirectional channel to a specific peer worker.
///
/// Owns a listening endpoint, an outbound client, the rendezvous tables
/// and a deadline monitor. Lifecycle: `Created → Connecting → Connected →
/// Closed`; every operation other than connect requires `Connected`.
///
/// Must be created inside a tokio runtime (the monitor scanner starts
/// immediately).
pub struct Communicator {
    config: CommunicatorConfig,
    monitor: Monitor,
    rendezvous: Arc<Rendezvous>,
    inner: tokio::sync::Mutex<Inner>,
}

impl Communicator {
    /// Creates the communicator and starts its monitor.
    pub fn new(config: CommunicatorConfig) -> Self {
        let rendezvous = Arc::new(Rendezvous::new(&config.tensor_names, &config.dataset_names));
        let mut monitor = Monitor::new(config.scanning_interval, config.default_timeout);
        monitor.start();
        info!(listen = %config.listen_addr, peer = %config.peer_addr, "create communicator");
        Self {
            config,
            monitor,
            rendezvous,
            inner: tokio::sync::Mutex::new(Inner {
                state: CommState::Created,
                client: None,
                server: None,
            }),
        }
    }

    /// Initiates the connection: starts the server and client, then issues
    /// the `Connect` RPC to the peer. Only legal in the `Created` state; a
    /// second connect attempt is a precondition error.
    pub async fn request_connection(&self) -> CoordResult<()> {
        let client = {
            let mut inner = self.inner.lock().await;
            if inner.state != CommState::Created {
                return Err(CoordError::failed_precondition("already connected"));
            }
            inner.server = Some(self.start_server().await?);
            let transport = ClientTransport::from_env()?;
            let client = ChannelClient::connect(&self.config.peer_addr, &transport).await?;
            inner.client = Some(client.clone());
            inner.state = CommState::Connecting;
            client
        };

        client.request_connection().await?;
        self.inner.lock().await.state = CommState::Connected;
        info!("connect with peer");
        Ok(())
    }

    /// Accepts the connection from the peer: starts the server and client,
    /// then completes (or waits for) the peer's parked `Connect` call.
    pub async fn respond_connection(&self) -> CoordResult<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != CommState::Created {
                return Err(CoordError::failed_precondition("already connected"));
            }
            inner.server = Some(self.start_server().await?);
            let transport = ClientTransport::from_env()?;
            inner.client =
                Some(ChannelClient::connect(&self.config.peer_addr, &transport).await?);
            inner.state = CommState::Connected;
        }

        let claim = self.rendezvous.claim_connect();
        self.guarded("wait for connection", async move {
            let parked = match claim {
                Claim::Ready(parked) => parked,
                Claim::Wait(rx) => rx
                    .await
                    .map_err(|_| CoordError::internal("connect rendezvous dropped"))?,
            };
            parked.finish(Ok(()));
            info!("connect with peer");
            Ok(())
        })
        .await
    }

    /// Pushes a tensor to the peer under the rendezvous key `(name, step)`.
    pub async fn send_tensor(&self, name: &str, step: u64, payload: Vec<u8>) -> CoordResult<()> {
        let client = self.connected_client().await?;
        // Log before the send so a hung transfer is attributable.
        info!(name, step, bytes = payload.len(), "send tensor");
        self.guarded(&format!("send tensor {name}, step {step}"), async move {
            client.send_tensor(name, step, payload).await
        })
        .await
    }

    /// Receives the tensor the peer pushes under `(name, step)`.
    pub async fn receive_tensor(&self, name: &str, step: u64) -> CoordResult<Vec<u8>> {
        self.ensure_connected().await?;
        match self.rendezvous.claim_send(name, step)? {
            Claim::Ready(parked) => {
                let payload = parked.finish(Ok(()));
                info!(name, step, bytes = payload.len(), "receive tensor");
                Ok(payload)
            }
            Claim::Wait(rx) => {
                self.guarded(&format!("receive tensor {name}, step {step}"), async move {
                    let parked = rx
                        .await
                        .map_err(|_| CoordError::internal("send rendezvous dropped"))?;
                    let payload = parked.finish(Ok(()));
                    info!(name, step, bytes = payload.len(), "receive tensor");
                    Ok(payload)
                })
                .await
            }
        }
    }

    /// Asks the peer for the reader state of `name`.
    pub async fn request_reader_state(&self, name: &str) -> CoordResult<ReaderState> {
        let client = self.connected_client().await?;
        let state = self
            .guarded("request reader state", async move {
                client.request_reader_state(name).await
            })
            .await?;
        info!(name, block_id = %state.block_id, offset = state.offset,
            "receive reader state");
        Ok(state)
    }

    /// Answers the peer's reader-state request for `name`.
    pub async fn respond_reader_state(
        &self,
        name: &str,
        block_id: impl Into<String>,
        offset: i64,
    ) -> CoordResult<()> {
        self.ensure_connected().await?;
        let state = ReaderState {
            block_id: block_id.into(),
            offset,
        };
        let what = format!("response reader state {}, offset {offset}", state.block_id);
        let claim = self.rendezvous.claim_reader(name)?;
        self.guarded(&what, async move {
            let parked = match claim {
                Claim::Ready(parked) => parked,
                Claim::Wait(rx) => rx
                    .await
                    .map_err(|_| CoordError::internal("reader rendezvous dropped"))?,
            };
            info!(name, block_id = %state.block_id, offset = state.offset,
                "send reader state");
            parked.finish(Ok(state));
            Ok(())
        })
        .await
    }

    /// Fails the peer's (current or next) reader-state request for `name`
    /// with `OutOfRange`, the epoch-end signal. The same error is
    /// surfaced locally.
    pub async fn terminate_reader(&self, name: &str) -> CoordResult<()> {
        self.ensure_connected().await?;
        let claim = self.rendezvous.claim_reader(name)?;
        self.guarded("terminate reader state", async move {
            let parked = match claim {
                Claim::Ready(parked) => parked,
                Claim::Wait(rx) => rx
                    .await
                    .map_err(|_| CoordError::internal("reader rendezvous dropped"))?,
            };
            let err = CoordError::out_of_range("reader state from remote out of range");
            parked.finish(Err(err.clone()));
            Err(err)
        })
        .await
    }

    /// Asks the peer for its checkpoint version.
    pub async fn request_checkpoint_version(&self) -> CoordResult<String> {
        let client = self.connected_client().await?;
        let version = self
            .guarded("request ckpt version", async move {
                client.request_checkpoint_version().await
            })
            .await?;
        info!(version = %version, "receive ckpt version");
        Ok(version)
    }

    /// Answers the peer's checkpoint-version request.
    pub async fn respond_checkpoint_version(
        &self,
        version: impl Into<String>,
    ) -> CoordResult<()> {
        self.ensure_connected().await?;
        let version = version.into();
        let what = format!("response ckpt version {version}");
        let claim = self.rendezvous.claim_ckpt();
        self.guarded(&what, async move {
            let parked = match claim {
                Claim::Ready(parked) => parked,
                Claim::Wait(rx) => rx
                    .await
                    .map_err(|_| CoordError::internal("ckpt rendezvous dropped"))?,
            };
            info!(version = %version, "send ckpt version");
            parked.finish(Ok(version));
            Ok(())
        })
        .await
    }

    /// Tears down both directions. The client and the server are both shut
    /// down regardless of individual failure; any error is surfaced after
    /// both have been attempted.
    pub async fn close(&self) -> CoordResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != CommState::Connected {
            return Err(CoordError::failed_precondition("already closed"));
        }
        // Dropping the client closes the outbound channel.
        inner.client = None;
        let server_result = match inner.server.take() {
            Some(server) => server.shutdown().await,
            None => Ok(()),
        };
        inner.state = CommState::Closed;
        if let Err(e) = &server_result {
            error!(error = %e, "channel server shutdown failed");
        }
        info!("communicator closed");
        server_result
    }

    /// Stops the deadline monitor. Call after [`close`](Self::close) when
    /// tearing a worker down for good.
    pub async fn shutdown_monitor(&mut self) {
        self.monitor.shutdown().await;
    }

    async fn start_server(&self) -> CoordResult<ServerHandle> {
        let transport = ServerTransport::from_env()?;
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| {
                CoordError::internal(format!("bind {} failed: {e}", self.config.listen_addr))
            })?;

        let service = PeerChannelServer::new(ChannelService::new(Arc::clone(&self.rendezvous)))
            .max_decoding_message_size(transport.max_receive)
            .max_encoding_message_size(transport.max_send);

        let mut builder = tonic::transport::Server::builder();
        if let Some(tls) = transport.tls {
            builder = builder
                .tls_config(tls)
                .map_err(|e| CoordError::internal(format!("server tls config: {e}")))?;
        }

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(builder.add_service(service).serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            async move {
                let _ = rx.await;
            },
        ));
        Ok(ServerHandle {
            shutdown: Some(tx),
            handle,
        })
    }

    async fn ensure_connected(&self) -> CoordResult<()> {
        let inner = self.inner.lock().await;
        if inner.state == CommState::Connected {
            Ok(())
        } else {
            Err(CoordError::failed_precondition(
                "haven't connected with peer worker",
            ))
        }
    }

    async fn connected_client(&self) -> CoordResult<ChannelClient> {
        let inner = self.inner.lock().await;
        if inner.state != CommState::Connected {
            return Err(CoordError::failed_precondition(
                "haven't connected with peer worker",
            ));
        }
        inner
            .client
            .clone()
            .ok_or_else(|| CoordError::internal("client missing while connected"))
    }

    /// Runs `fut` against the monitor's deadline. When the deadline fires
    /// first, its error is surfaced and a late completion is discarded via
    /// the `unregister` race.
    async fn guarded<T, F>(&self, what: &str, fut: F) -> CoordResult<T>
    where
        F: Future<Output = CoordResult<T>>,
    {
        let (tx, rx) = oneshot::channel::<CoordError>();
        let message = format!("{what} timeout");
        let key = self.monitor.register(
            Box::new(move || {
                let _ = tx.send(CoordError::deadline_exceeded(message));
            }),
            None,
        );
        if key == 0 {
            // Monitor already stopped; run without a deadline.
            return fut.await;
        }

        tokio::pin!(fut);
        let mut rx = rx;
        tokio::select! {
            result = &mut fut => {
                if self.monitor.unregister(key) {
                    result
                } else {
                    // The timeout already surfaced; skip the normal path.
                    match rx.await {
                        Ok(timeout) => Err(timeout),
                        Err(_) => Err(CoordError::deadline_exceeded(format!("{what} timeout"))),
                    }
                }
            }
            timeout = &mut rx => {
                match timeout {
                    Ok(err) => Err(err),
                    // Monitor shut down mid-wait; fall back to the result.
                    Err(_) => fut.await,
                }
            }
        }
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_lock()
            && let Some(server) = inner.server.take()
        {
            server.abort();
        }
    }
}
