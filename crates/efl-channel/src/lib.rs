//! Pairwise bidirectional channel between the two training parties.
//!
//! Each worker owns one [`Communicator`] per peer. A communicator binds a
//! listening endpoint and an outbound client to the same peer and exposes
//! four logical message classes (connection, tensor send, reader state,
//! checkpoint version), each with an asymmetric request/response
//! rendezvous: whichever side arrives first parks, the other delivers.
//!
//! Deadlines are enforced by the [`Monitor`]: every externally blocking
//! operation registers a timeout callback, and the completion path must
//! win the `unregister` race or yield to the already-surfaced timeout.

mod client;
mod communicator;
mod monitor;
mod rendezvous;
mod service;
mod transport;

pub use communicator::{Communicator, CommunicatorConfig};
pub use monitor::Monitor;
pub use rendezvous::{Claim, ParkedCkpt, ParkedConnect, ParkedReader, ParkedSend, ReaderState, Rendezvous};
pub use service::ChannelService;
pub use transport::{ClientTransport, DEFAULT_MAX_MESSAGE_SIZE, ServerTransport};
