//! Server half of the peer channel: gRPC handlers over the rendezvous.

use std::sync::Arc;

use efl_proto::channel as pb;
use efl_proto::channel::peer_channel_server::PeerChannel;
use efl_types::CoordResult;
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::Rendezvous;

/// gRPC service backed by a communicator's rendezvous tables.
///
/// Handlers never fail at the transport level; the application status is
/// carried in each response's `code`/`msg` pair so the peer can map it
/// back into the shared taxonomy.
pub struct ChannelService {
    rendezvous: Arc<Rendezvous>,
}

impl ChannelService {
    /// Creates the service over shared rendezvous state.
    pub fn new(rendezvous: Arc<Rendezvous>) -> Self {
        Self { rendezvous }
    }
}

fn code_of(result: &CoordResult<()>) -> (i32, String) {
    match result {
        Ok(()) => (efl_proto::CODE_OK, String::new()),
        Err(e) => (e.code(), e.message.clone()),
    }
}

#[tonic::async_trait]
impl PeerChannel for ChannelService {
    async fn connect(
        &self,
        _request: Request<pb::ConnectionRequest>,
    ) -> Result<Response<pb::ConnectionResponse>, Status> {
        debug!("connect request arrived");
        let (code, msg) = code_of(&self.rendezvous.offer_connect().await);
        Ok(Response::new(pb::ConnectionResponse { code, msg }))
    }

    async fn send_message(
        &self,
        request: Request<pb::MessageRequest>,
    ) -> Result<Response<pb::MessageResponse>, Status> {
        let req = request.into_inner();
        debug!(name = %req.name, step = req.step, bytes = req.payload.len(),
            "tensor arrived");
        let (code, msg) = code_of(&self.rendezvous.offer_send(req).await);
        Ok(Response::new(pb::MessageResponse { code, msg }))
    }

    async fn get_reader_state(
        &self,
        request: Request<pb::GetReaderStateRequest>,
    ) -> Result<Response<pb::GetReaderStateResponse>, Status> {
        let req = request.into_inner();
        debug!(name = %req.name, "reader state request arrived");
        let reply = match self.rendezvous.offer_reader(&req.name).await {
            Ok(state) => pb::GetReaderStateResponse {
                code: efl_proto::CODE_OK,
                msg: String::new(),
                block_id: state.block_id,
                offset: state.offset,
            },
            Err(e) => pb::GetReaderStateResponse {
                code: e.code(),
                msg: e.message,
                block_id: String::new(),
                offset: 0,
            },
        };
        Ok(Response::new(reply))
    }

    async fn get_checkpoint_version(
        &self,
        _request: Request<pb::GetCheckpointVersionRequest>,
    ) -> Result<Response<pb::GetCheckpointVersionResponse>, Status> {
        debug!("checkpoint version request arrived");
        let reply = match self.rendezvous.offer_ckpt().await {
            Ok(version) => pb::GetCheckpointVersionResponse {
                code: efl_proto::CODE_OK,
                msg: String::new(),
                version,
            },
            Err(e) => pb::GetCheckpointVersionResponse {
                code: e.code(),
                msg: e.message,
                version: String::new(),
            },
        };
        Ok(Response::new(reply))
    }
}
