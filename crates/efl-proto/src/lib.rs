//! Generated protobuf/gRPC bindings for the coordination substrate.
//!
//! Two services are defined:
//! - `ClusterDiscovery`: worker registration and cluster retrieval
//! - `PeerChannel`: the four-message rendezvous channel between peers

/// Service discovery messages and stubs.
pub mod discovery {
    #![allow(clippy::all, clippy::pedantic)]
    tonic::include_proto!("efl.discovery");
}

/// Peer channel messages and stubs.
pub mod channel {
    #![allow(clippy::all, clippy::pedantic)]
    tonic::include_proto!("efl.channel");
}

/// Application-level success code carried in response `code` fields.
pub const CODE_OK: i32 = 0;
