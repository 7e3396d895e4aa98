//! ZooKeeper backend for `zfs://host:port/znode` addresses.
//!
//! Every call opens a fresh session, mirroring the deployment where the
//! rendezvous is touched once per reporter tick. Connects and reads or
//! writes are each retried up to [`DEFAULT_RETRY_COUNT`] times; writes are
//! upserts (set, else delete + create, creating parents as needed) so a
//! scheduler restart can overwrite a stale registration.

use std::time::Duration;

use async_trait::async_trait;
use efl_types::{CoordError, CoordResult};
use tracing::warn;
use zookeeper_client as zk;

use crate::RemoteKv;

const ZFS_PREFIX: &str = "zfs://";

/// Attempts per connect and per read/write phase.
pub const DEFAULT_RETRY_COUNT: u32 = 30;

/// Sleep between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// ZooKeeper-backed [`RemoteKv`].
pub struct ZooKeeperKv {
    retry_count: u32,
    retry_delay: Duration,
}

impl ZooKeeperKv {
    /// Creates a backend with the production retry policy.
    pub fn new() -> Self {
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Overrides the retry policy; tests use this to avoid long sleeps.
    pub fn with_retry(retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            retry_count,
            retry_delay,
        }
    }

    async fn connect(&self, cluster: &str, addr: &str) -> CoordResult<zk::Client> {
        let mut last_err = None;
        for attempt in 0..self.retry_count {
            match zk::Client::connect(cluster).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    warn!(addr, attempt, error = %e, "zookeeper connect failed");
                    last_err = Some(e);
                }
            }
            tokio::time::sleep(self.retry_delay).await;
        }
        Err(CoordError::internal(format!(
            "cannot connect to zk server: {addr}: {}",
            last_err.map_or_else(|| "no attempts".to_string(), |e| e.to_string())
        )))
    }

    async fn create_parent_path(client: &zk::Client, node: &str) -> Result<(), zk::Error> {
        let segments: Vec<&str> = node.trim_start_matches('/').split('/').collect();
        let mut current = String::new();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            current.push('/');
            current.push_str(segment);
            match client
                .create(
                    &current,
                    &[],
                    &zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all()),
                )
                .await
            {
                Ok(_) | Err(zk::Error::NodeExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn create_node(client: &zk::Client, node: &str, value: &str) -> Result<(), zk::Error> {
        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
        match client.create(node, value.as_bytes(), &options).await {
            Ok(_) => Ok(()),
            Err(zk::Error::NoNode) => {
                Self::create_parent_path(client, node).await?;
                client.create(node, value.as_bytes(), &options).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // Upsert: try an in-place set first, otherwise recreate the node.
    async fn touch(client: &zk::Client, node: &str, value: &str) -> Result<(), zk::Error> {
        match client.set_data(node, value.as_bytes(), None).await {
            Ok(_) => Ok(()),
            Err(_) => {
                let _ = client.delete(node, None).await;
                Self::create_node(client, node, value).await
            }
        }
    }
}

impl Default for ZooKeeperKv {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `zfs://host:port/znode` into the connect string and node path.
fn split_addr(addr: &str) -> CoordResult<(String, String)> {
    let rest = addr
        .strip_prefix(ZFS_PREFIX)
        .ok_or_else(|| CoordError::invalid_argument(format!("not a zk addr: {addr}")))?;
    match rest.find('/') {
        Some(pos) => Ok((rest[..pos].to_string(), rest[pos..].to_string())),
        None => Ok((rest.to_string(), "/".to_string())),
    }
}

#[async_trait]
impl RemoteKv for ZooKeeperKv {
    fn accept(&self, addr: &str) -> bool {
        addr.starts_with(ZFS_PREFIX)
    }

    async fn get(&self, addr: &str) -> CoordResult<String> {
        let (cluster, node) = split_addr(addr)?;
        let client = self.connect(&cluster, addr).await?;
        for attempt in 0..self.retry_count {
            match client.get_data(&node).await {
                Ok((data, _stat)) => {
                    return String::from_utf8(data).map_err(|e| {
                        CoordError::internal(format!("zk node {addr} is not utf-8: {e}"))
                    });
                }
                Err(e) => warn!(addr, attempt, error = %e, "zookeeper read failed"),
            }
            tokio::time::sleep(self.retry_delay).await;
        }
        Err(CoordError::unavailable(format!("cannot get zk node: {addr}")))
    }

    async fn put(&self, addr: &str, value: &str) -> CoordResult<()> {
        let (cluster, node) = split_addr(addr)?;
        let client = self.connect(&cluster, addr).await?;
        for attempt in 0..self.retry_count {
            match Self::create_parent_path(&client, &node).await {
                Ok(()) => match Self::touch(&client, &node, value).await {
                    Ok(()) => return Ok(()),
                    Err(e) => warn!(addr, attempt, error = %e, "zookeeper write failed"),
                },
                Err(e) => warn!(addr, attempt, error = %e, "zookeeper mkdir failed"),
            }
            tokio::time::sleep(self.retry_delay).await;
        }
        Err(CoordError::unavailable(format!(
            "cannot write zk node: {addr}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efl_types::ErrorKind;

    #[test]
    fn accepts_zfs_scheme_only() {
        let kv = ZooKeeperKv::new();
        assert!(kv.accept("zfs://host:2181/efl/scheduler"));
        assert!(!kv.accept("/tmp/scheduler"));
    }

    #[test]
    fn splits_cluster_and_node() {
        let (cluster, node) = split_addr("zfs://host:2181/efl/scheduler").unwrap();
        assert_eq!(cluster, "host:2181");
        assert_eq!(node, "/efl/scheduler");
    }

    #[test]
    fn missing_node_path_defaults_to_root() {
        let (cluster, node) = split_addr("zfs://host:2181").unwrap();
        assert_eq!(cluster, "host:2181");
        assert_eq!(node, "/");
    }

    #[test]
    fn rejects_foreign_scheme() {
        let err = split_addr("/local/path").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
