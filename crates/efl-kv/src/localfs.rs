//! Local-filesystem backend, mainly for single-machine runs and tests.

use async_trait::async_trait;
use efl_types::{CoordError, CoordResult};

use crate::RemoteKv;

const LOCAL_FS_PREFIX: &str = "/";

/// Stores each value as the contents of the file at the address path.
pub struct LocalFsKv;

#[async_trait]
impl RemoteKv for LocalFsKv {
    fn accept(&self, addr: &str) -> bool {
        addr.starts_with(LOCAL_FS_PREFIX)
    }

    async fn get(&self, addr: &str) -> CoordResult<String> {
        let contents = tokio::fs::read_to_string(addr)
            .await
            .map_err(|e| CoordError::invalid_argument(format!("open file failed: {addr}: {e}")))?;
        // Values are single logical lines; strip any line breaks a writer
        // or an editor may have introduced.
        Ok(contents.lines().collect())
    }

    async fn put(&self, addr: &str, value: &str) -> CoordResult<()> {
        tokio::fs::write(addr, value)
            .await
            .map_err(|e| CoordError::invalid_argument(format!("open file failed: {addr}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efl_types::ErrorKind;

    #[test]
    fn accepts_absolute_paths_only() {
        assert!(LocalFsKv.accept("/tmp/scheduler"));
        assert!(!LocalFsKv.accept("zfs://host:2181/a"));
        assert!(!LocalFsKv.accept("relative/path"));
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let addr = dir.path().join("scheduler").to_str().unwrap().to_string();
        LocalFsKv.put(&addr, "1.2.3.4:100").await.unwrap();
        assert_eq!(LocalFsKv.get(&addr).await.unwrap(), "1.2.3.4:100");
    }

    #[tokio::test]
    async fn get_strips_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let addr = dir.path().join("scheduler").to_str().unwrap().to_string();
        tokio::fs::write(&addr, "1.2.3.4:100\n").await.unwrap();
        assert_eq!(LocalFsKv.get(&addr).await.unwrap(), "1.2.3.4:100");
    }

    #[tokio::test]
    async fn missing_file_is_invalid_argument() {
        let err = LocalFsKv.get("/definitely/not/here").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
