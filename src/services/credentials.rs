//! Saved connection profiles.
//!
//! Profiles live in a small JSON document (`saved.json`):
//! `{"profiles":[{"config_path":"...","password":"..."}]}`. The older
//! single-profile layout `{"config_path":"...","password":"..."}` is still
//! read. Writes go through a temp file and a rename, with 0600 permissions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::profile::SavedProfile;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid credentials file: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace the profile for `config_path`.
    async fn upsert(&self, config_path: &str, secret: &str) -> Result<(), CredentialError>;

    /// All saved profiles with display names filled in.
    async fn list_profiles(&self) -> Vec<SavedProfile>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: Vec<SavedProfile>,
}

/// Parse the document, accepting both layouts.
fn parse_document(content: &str) -> Result<Vec<SavedProfile>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(content)?;

    if value.get("profiles").is_none() && value.get("config_path").is_some() {
        let legacy: SavedProfile = serde_json::from_value(value)?;
        if legacy.config_path.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![legacy]);
    }

    let file: ProfilesFile = serde_json::from_value(value)?;
    Ok(file.profiles)
}

pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<SavedProfile>, CredentialError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(parse_document(&content)?)
    }

    async fn save(&self, profiles: Vec<SavedProfile>) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // display names are derived on read, never persisted
        let file = ProfilesFile {
            profiles: profiles
                .into_iter()
                .map(|p| SavedProfile::new(p.config_path, p.password))
                .collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut handle = options.open(&temp_path).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // a leftover temp file keeps its old mode
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        handle.write_all(content.as_bytes()).await?;
        handle.sync_all().await?;
        drop(handle);

        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn upsert(&self, config_path: &str, secret: &str) -> Result<(), CredentialError> {
        let _guard = self.write_lock.lock().await;

        let mut profiles = match self.load().await {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable credentials file, starting fresh");
                Vec::new()
            }
        };

        match profiles.iter_mut().find(|p| p.config_path == config_path) {
            Some(existing) => existing.password = secret.to_string(),
            None => profiles.push(SavedProfile::new(config_path, secret)),
        }

        let count = profiles.len();
        self.save(profiles).await?;
        info!(path = %self.path.display(), profiles = count, "Saved connection profile");
        Ok(())
    }

    async fn list_profiles(&self) -> Vec<SavedProfile> {
        match self.load().await {
            Ok(profiles) => profiles
                .into_iter()
                .map(SavedProfile::with_display_name)
                .collect(),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Failed to load saved profiles");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> FileCredentialStore {
        FileCredentialStore::new(dir.path().join("nested").join("saved.json"))
    }

    #[tokio::test]
    async fn test_missing_file_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.list_profiles().await.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_appends_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.upsert("/vpn/office.ovpn", "one").await.unwrap();
        store.upsert("/vpn/home.ovpn", "two").await.unwrap();
        store.upsert("/vpn/office.ovpn", "three").await.unwrap();

        let profiles = store.list_profiles().await;
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].config_path, "/vpn/office.ovpn");
        assert_eq!(profiles[0].password, "three");
        assert_eq!(profiles[0].name.as_deref(), Some("office.ovpn"));
        assert_eq!(profiles[1].name.as_deref(), Some("home.ovpn"));

        // names are derived, not stored
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("\"name\""));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.upsert("/vpn/a.ovpn", "secret").await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_reads_legacy_single_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        std::fs::write(&path, r#"{"config_path":"/vpn/old.ovpn","password":"pw"}"#).unwrap();

        let store = FileCredentialStore::new(&path);
        let profiles = store.list_profiles().await;
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].password, "pw");
        assert_eq!(profiles[0].name.as_deref(), Some("old.ovpn"));

        // the next write upgrades the layout
        store.upsert("/vpn/new.ovpn", "x").await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"profiles\""));
        assert_eq!(store.list_profiles().await.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_file_lists_nothing_and_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(store.list_profiles().await.is_empty());

        store.upsert("/vpn/a.ovpn", "pw").await.unwrap();
        assert_eq!(store.list_profiles().await.len(), 1);
    }
}
