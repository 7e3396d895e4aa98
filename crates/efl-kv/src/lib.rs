//! Pluggable remote key-value store used as the discovery rendezvous.
//!
//! The scheduler publishes its serving address under an opaque string
//! address; workers read it back. Backends are selected by address prefix
//! through a priority-ordered registry:
//!
//! - `/absolute/path`: local filesystem (single-machine and tests)
//! - `zfs://host:port/znode`: ZooKeeper
//!
//! The store is deliberately narrow: `accept`/`get`/`put`, nothing else.

mod localfs;
mod registry;
mod zookeeper;

pub use localfs::LocalFsKv;
pub use registry::{KvRegistry, RemoteKv};
pub use zookeeper::ZooKeeperKv;
