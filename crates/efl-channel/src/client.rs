//! Client half of the peer channel.

use std::time::Duration;

use efl_proto::channel as pb;
use efl_proto::channel::peer_channel_client::PeerChannelClient;
use efl_types::{CoordError, CoordResult, ErrorKind};
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::rendezvous::ReaderState;
use crate::transport::ClientTransport;

// The peer's server usually comes up within moments of ours; retry the
// initial dial instead of surfacing a refused connection to the trainer.
const CONNECT_ATTEMPTS: u32 = 100;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// Outbound connection to the peer's channel endpoint.
#[derive(Clone)]
pub(crate) struct ChannelClient {
    client: PeerChannelClient<Channel>,
}

impl ChannelClient {
    /// Dials `peer_addr` using the env-derived transport parameters.
    pub(crate) async fn connect(peer_addr: &str, transport: &ClientTransport) -> CoordResult<Self> {
        let scheme = if transport.tls.is_some() { "https" } else { "http" };
        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{peer_addr}"))
            .map_err(|e| CoordError::invalid_argument(format!("bad peer addr {peer_addr}: {e}")))?;
        if let Some(tls) = &transport.tls {
            endpoint = endpoint
                .tls_config(tls.clone())
                .map_err(|e| CoordError::internal(format!("client tls config: {e}")))?;
        }

        let mut attempt = 0;
        let channel = loop {
            match endpoint.connect().await {
                Ok(channel) => break channel,
                Err(e) => {
                    attempt += 1;
                    if attempt >= CONNECT_ATTEMPTS {
                        return Err(CoordError::unavailable(format!(
                            "connect peer {peer_addr}: {e}"
                        )));
                    }
                    debug!(peer_addr, attempt, error = %e, "peer dial failed, retrying");
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
            }
        };

        let client = PeerChannelClient::new(channel)
            .max_encoding_message_size(transport.max_send)
            .max_decoding_message_size(transport.max_receive);
        Ok(Self { client })
    }

    pub(crate) async fn request_connection(&self) -> CoordResult<()> {
        let reply = self
            .client
            .clone()
            .connect(pb::ConnectionRequest {})
            .await
            .map_err(CoordError::from)?
            .into_inner();
        check_code(reply.code, reply.msg)
    }

    pub(crate) async fn send_tensor(
        &self,
        name: &str,
        step: u64,
        payload: Vec<u8>,
    ) -> CoordResult<()> {
        let request = pb::MessageRequest {
            payload,
            name: name.to_string(),
            step,
        };
        let reply = self
            .client
            .clone()
            .send_message(request)
            .await
            .map_err(CoordError::from)?
            .into_inner();
        check_code(reply.code, reply.msg)
    }

    pub(crate) async fn request_reader_state(&self, name: &str) -> CoordResult<ReaderState> {
        let request = pb::GetReaderStateRequest {
            name: name.to_string(),
        };
        let reply = self
            .client
            .clone()
            .get_reader_state(request)
            .await
            .map_err(CoordError::from)?
            .into_inner();
        check_code(reply.code, reply.msg)?;
        Ok(ReaderState {
            block_id: reply.block_id,
            offset: reply.offset,
        })
    }

    pub(crate) async fn request_checkpoint_version(&self) -> CoordResult<String> {
        let reply = self
            .client
            .clone()
            .get_checkpoint_version(pb::GetCheckpointVersionRequest {})
            .await
            .map_err(CoordError::from)?
            .into_inner();
        check_code(reply.code, reply.msg)?;
        Ok(reply.version)
    }
}

fn check_code(code: i32, msg: String) -> CoordResult<()> {
    if code == efl_proto::CODE_OK {
        Ok(())
    } else {
        Err(CoordError::new(ErrorKind::from_code(code), msg))
    }
}
