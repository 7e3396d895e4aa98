//! Backend trait and priority-ordered registry.

use std::sync::Arc;

use async_trait::async_trait;
use efl_types::{CoordError, CoordResult};

/// A remote string→string store addressed by an opaque location string.
#[async_trait]
pub trait RemoteKv: Send + Sync {
    /// Whether this backend handles the given address.
    fn accept(&self, addr: &str) -> bool;

    /// Reads the value stored at `addr`.
    async fn get(&self, addr: &str) -> CoordResult<String>;

    /// Writes `value` at `addr`, replacing any previous value.
    async fn put(&self, addr: &str, value: &str) -> CoordResult<()>;
}

/// Priority-ordered set of [`RemoteKv`] backends.
///
/// Higher priority wins; among equal priorities the earlier registration
/// wins. Requests are dispatched to the first backend whose `accept`
/// returns true.
pub struct KvRegistry {
    backends: Vec<(i64, Arc<dyn RemoteKv>)>,
}

impl KvRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Creates a registry with the stock backends (local fs, ZooKeeper).
    pub fn with_default_backends() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::LocalFsKv), 0);
        registry.register(Arc::new(crate::ZooKeeperKv::new()), 0);
        registry
    }

    /// Registers a backend at the given priority.
    pub fn register(&mut self, backend: Arc<dyn RemoteKv>, priority: i64) {
        // Stable insertion keeps registration order among equal priorities.
        let pos = self
            .backends
            .iter()
            .position(|(p, _)| *p < priority)
            .unwrap_or(self.backends.len());
        self.backends.insert(pos, (priority, backend));
    }

    fn resolve(&self, addr: &str) -> CoordResult<&Arc<dyn RemoteKv>> {
        self.backends
            .iter()
            .find(|(_, b)| b.accept(addr))
            .map(|(_, b)| b)
            .ok_or_else(|| {
                CoordError::unimplemented(format!("this kv scheme is not implemented: {addr}"))
            })
    }

    /// Reads through the first accepting backend.
    pub async fn get(&self, addr: &str) -> CoordResult<String> {
        self.resolve(addr)?.get(addr).await
    }

    /// Writes through the first accepting backend.
    pub async fn put(&self, addr: &str, value: &str) -> CoordResult<()> {
        self.resolve(addr)?.put(addr, value).await
    }
}

impl Default for KvRegistry {
    fn default() -> Self {
        Self::with_default_backends()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efl_types::ErrorKind;

    struct FixedKv {
        prefix: &'static str,
        value: &'static str,
    }

    #[async_trait]
    impl RemoteKv for FixedKv {
        fn accept(&self, addr: &str) -> bool {
            addr.starts_with(self.prefix)
        }

        async fn get(&self, _addr: &str) -> CoordResult<String> {
            Ok(self.value.to_string())
        }

        async fn put(&self, _addr: &str, _value: &str) -> CoordResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unknown_scheme_is_unimplemented() {
        let registry = KvRegistry::new();
        let err = registry.get("mem://x").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unimplemented);
    }

    #[tokio::test]
    async fn higher_priority_backend_wins() {
        let mut registry = KvRegistry::new();
        registry.register(
            Arc::new(FixedKv {
                prefix: "x://",
                value: "low",
            }),
            0,
        );
        registry.register(
            Arc::new(FixedKv {
                prefix: "x://",
                value: "high",
            }),
            10,
        );
        assert_eq!(registry.get("x://a").await.unwrap(), "high");
    }
}
