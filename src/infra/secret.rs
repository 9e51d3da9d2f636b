//! 一次性密码文件
//!
//! 启动前写入临时目录（权限 0600），Connected 后删除，
//! 任何进入 Disconnected 的路径都会再次删除（幂等）。

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 一次性密码文件
#[derive(Debug)]
pub struct SecretArtifact {
    path: Mutex<Option<PathBuf>>,
}

impl SecretArtifact {
    /// 在 `dir` 下创建密码文件
    pub fn create_in(dir: &Path, secret: &str) -> io::Result<Self> {
        let path = dir.join(format!("vpn-connect-{}.pass", uuid::Uuid::new_v4()));

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&path)?;
        file.write_all(secret.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        Ok(Self {
            path: Mutex::new(Some(path)),
        })
    }

    /// 当前路径（已删除时为 None）
    pub fn path(&self) -> Option<PathBuf> {
        self.path.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 删除文件，可重复调用
    pub fn remove(&self) {
        let taken = self.path.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(path) = taken else {
            return;
        };

        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed askpass file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove askpass file"),
        }
    }
}

impl Drop for SecretArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}
