//! Transport parameters read from the environment.
//!
//! All variables are optional; the defaults are a 1 GiB message cap in
//! each direction and plaintext. TLS turns on for the server when both
//! `EFL_MY_CERTS_FILENAME` and `EFL_MY_KEY_FILENAME` are set: the server
//! then requests (but does not require) client certificates, optionally
//! pinning the peer root via `EFL_PEER_CERTS_FILENAME`. The client uses
//! `EFL_PEER_CERTS_FILENAME` as its trust root and
//! `EFL_SSL_TARGET_NAME_OVERRIDE` for certificate name checks.

use std::env;

use efl_types::{CoordError, CoordResult};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// Default cap for send and receive message sizes: 1 GiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 30;

pub(crate) const ENV_SERVER_MAX_SEND: &str = "EFL_SERVER_MAX_SEND_MESSAGE_SIZE";
pub(crate) const ENV_SERVER_MAX_RECEIVE: &str = "EFL_SERVER_MAX_RECEIVE_MESSAGE_SIZE";
pub(crate) const ENV_CLIENT_MAX_SEND: &str = "EFL_CLIENT_MAX_SEND_MESSAGE_SIZE";
pub(crate) const ENV_CLIENT_MAX_RECEIVE: &str = "EFL_CLIENT_MAX_RECEIVE_MESSAGE_SIZE";
pub(crate) const ENV_MY_CERTS: &str = "EFL_MY_CERTS_FILENAME";
pub(crate) const ENV_MY_KEY: &str = "EFL_MY_KEY_FILENAME";
pub(crate) const ENV_PEER_CERTS: &str = "EFL_PEER_CERTS_FILENAME";
pub(crate) const ENV_SSL_TARGET_NAME: &str = "EFL_SSL_TARGET_NAME_OVERRIDE";

fn parse_size(var: &str, raw: Option<&str>) -> CoordResult<usize> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|e| CoordError::invalid_argument(format!("{var}={raw}: {e}"))),
        None => Ok(DEFAULT_MAX_MESSAGE_SIZE),
    }
}

fn size_from_env(var: &str) -> CoordResult<usize> {
    parse_size(var, env::var(var).ok().as_deref())
}

fn string_from_env(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.is_empty())
}

fn read_pem(path: &str) -> CoordResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| CoordError::invalid_argument(format!("read pem {path} failed: {e}")))
}

/// Listening-side transport parameters.
pub struct ServerTransport {
    /// Outbound message cap.
    pub max_send: usize,

    /// Inbound message cap.
    pub max_receive: usize,

    /// TLS setup, when certificates are configured.
    pub tls: Option<ServerTlsConfig>,
}

impl ServerTransport {
    /// Reads the `EFL_SERVER_*` and certificate variables.
    pub fn from_env() -> CoordResult<Self> {
        let max_send = size_from_env(ENV_SERVER_MAX_SEND)?;
        let max_receive = size_from_env(ENV_SERVER_MAX_RECEIVE)?;

        let tls = match (string_from_env(ENV_MY_CERTS), string_from_env(ENV_MY_KEY)) {
            (Some(certs_path), Some(key_path)) => {
                let identity = Identity::from_pem(read_pem(&certs_path)?, read_pem(&key_path)?);
                let mut config = ServerTlsConfig::new().identity(identity);
                if let Some(peer_path) = string_from_env(ENV_PEER_CERTS) {
                    config = config
                        .client_ca_root(Certificate::from_pem(read_pem(&peer_path)?))
                        .client_auth_optional(true);
                }
                Some(config)
            }
            _ => None,
        };

        Ok(Self {
            max_send,
            max_receive,
            tls,
        })
    }
}

/// Outbound-side transport parameters.
pub struct ClientTransport {
    /// Outbound message cap.
    pub max_send: usize,

    /// Inbound message cap.
    pub max_receive: usize,

    /// TLS setup, when a peer root is configured.
    pub tls: Option<ClientTlsConfig>,
}

impl ClientTransport {
    /// Reads the `EFL_CLIENT_*` and certificate variables.
    pub fn from_env() -> CoordResult<Self> {
        let max_send = size_from_env(ENV_CLIENT_MAX_SEND)?;
        let max_receive = size_from_env(ENV_CLIENT_MAX_RECEIVE)?;

        let tls = match string_from_env(ENV_PEER_CERTS) {
            Some(peer_path) => {
                let mut config =
                    ClientTlsConfig::new().ca_certificate(Certificate::from_pem(read_pem(&peer_path)?));
                if let Some(domain) = string_from_env(ENV_SSL_TARGET_NAME) {
                    config = config.domain_name(domain);
                }
                Some(config)
            }
            None => None,
        };

        Ok(Self {
            max_send,
            max_receive,
            tls,
        })
    }
}
