//! 连接配置文件读取

use async_trait::async_trait;
use std::io;
use std::path::Path;

/// 连接配置来源
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// 读取配置原始内容，不存在时返回 None
    async fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>>;

    /// 配置是否存在
    async fn exists(&self, path: &str) -> bool {
        matches!(self.read(path).await, Ok(Some(_)))
    }
}

/// 文件系统实现
#[derive(Debug, Default, Clone)]
pub struct FsProfileSource;

#[async_trait]
impl ProfileSource for FsProfileSource {
    async fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        if path.is_empty() {
            return Ok(None);
        }

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }

        tokio::fs::read(Path::new(path)).await.map(Some)
    }

    async fn exists(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_existing_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ovpn");
        std::fs::write(&file, "remote vpn.example.com 1194\n").unwrap();
        let path = file.to_string_lossy().to_string();

        let source = FsProfileSource;
        assert!(source.exists(&path).await);
        assert_eq!(
            source.read(&path).await.unwrap().unwrap(),
            b"remote vpn.example.com 1194\n".to_vec()
        );

        let missing = dir.path().join("missing.ovpn").to_string_lossy().to_string();
        assert!(!source.exists(&missing).await);
        assert!(source.read(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let source = FsProfileSource;
        assert!(!source.exists(&path).await);
        assert!(source.read(&path).await.unwrap().is_none());
        assert!(!source.exists("").await);
    }
}
