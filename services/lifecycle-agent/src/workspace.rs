//! Node-local seed generation workspace.
//!
//! The workspace is a directory on the host that survives agent restarts.
//! It holds everything needed to finish or undo an attempt after the
//! imager has stopped the agent:
//!
//! - `auth.json`: registry credentials for pushing the seed image (0600)
//! - `seedgen-cr.json`: the request as it was before deletion
//! - `seedgen-secret.json`: the companion secret as it was before deletion
//! - `managedcluster.json`: the hub registration record
//! - `pull-secret.json`: the original cluster pull secret (0600)
//!
//! Files that have been restored are renamed with a `.bak` suffix.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;

pub const AUTH_FILE: &str = "auth.json";
pub const SEEDGEN_CR_FILE: &str = "seedgen-cr.json";
pub const SEEDGEN_SECRET_FILE: &str = "seedgen-secret.json";
pub const MANAGED_CLUSTER_FILE: &str = "managedcluster.json";
pub const PULL_SECRET_FILE: &str = "pull-secret.json";

const DIR_MODE: u32 = 0o700;
const PRIVATE_FILE_MODE: u32 = 0o600;
const FILE_MODE: u32 = 0o644;

/// Workspace errors.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> WorkspaceError + 'a {
    move |source| WorkspaceError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Handle to the workspace directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Directory as seen by the agent (under the host root mount).
    local: PathBuf,

    /// Directory as seen on the host, for paths handed to host commands.
    host: PathBuf,
}

impl Workspace {
    pub fn new(local: impl Into<PathBuf>, host: impl Into<PathBuf>) -> Self {
        Self {
            local: local.into(),
            host: host.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.host_path(&config.workspace_dir), config.workspace_dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.local
    }

    /// Path of a workspace file inside the agent.
    pub fn path(&self, file: &str) -> PathBuf {
        self.local.join(file)
    }

    /// Path of a workspace file on the host.
    pub fn host_path(&self, file: &str) -> PathBuf {
        self.host.join(file)
    }

    pub fn exists(&self, file: &str) -> bool {
        self.path(file).exists()
    }

    /// Create the directory with owner-only permissions.
    pub async fn create(&self) -> Result<(), WorkspaceError> {
        tokio::fs::create_dir_all(&self.local)
            .await
            .map_err(io_err("create", &self.local))?;
        tokio::fs::set_permissions(&self.local, std::fs::Permissions::from_mode(DIR_MODE))
            .await
            .map_err(io_err("set permissions on", &self.local))?;
        debug!(path = %self.local.display(), "Workspace created");
        Ok(())
    }

    /// Remove the directory and everything in it. A missing directory is fine.
    pub async fn wipe(&self) -> Result<(), WorkspaceError> {
        match tokio::fs::remove_dir_all(&self.local).await {
            Ok(()) => {
                info!(path = %self.local.display(), "Workspace wiped");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("delete", &self.local)(e)),
        }
    }

    async fn write_with_mode(&self, file: &str, contents: &[u8], mode: u32) -> Result<PathBuf, WorkspaceError> {
        let path = self.path(file);
        tokio::fs::write(&path, contents).await.map_err(io_err("write", &path))?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(io_err("set permissions on", &path))?;
        Ok(path)
    }

    /// Write a file readable only by its owner.
    pub async fn write_private(&self, file: &str, contents: &[u8]) -> Result<PathBuf, WorkspaceError> {
        self.write_with_mode(file, contents, PRIVATE_FILE_MODE).await
    }

    /// Serialize `value` as JSON into a file.
    pub async fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<PathBuf, WorkspaceError> {
        let path = self.path(file);
        let contents = serde_json::to_vec(value).map_err(|source| WorkspaceError::Decode {
            path: path.clone(),
            source,
        })?;
        self.write_with_mode(file, &contents, FILE_MODE).await
    }

    /// Read a file, `None` if it does not exist.
    pub async fn read(&self, file: &str) -> Result<Option<Vec<u8>>, WorkspaceError> {
        let path = self.path(file);
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err("read", &path)(e)),
        }
    }

    /// Read and decode a JSON file, `None` if it does not exist.
    pub async fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, WorkspaceError> {
        let Some(contents) = self.read(file).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|source| WorkspaceError::Decode {
                path: self.path(file),
                source,
            })
    }

    /// Rename a file with a `.bak` suffix once its contents were restored.
    pub async fn mark_restored(&self, file: &str) -> Result<(), WorkspaceError> {
        let from = self.path(file);
        let to = self.path(&format!("{file}.bak"));
        tokio::fs::rename(&from, &to).await.map_err(io_err("rename", &from))?;
        debug!(from = %from.display(), to = %to.display(), "Marked workspace file restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn workspace(root: &Path) -> Workspace {
        Workspace::new(root.join("var/lib/lca/ibu-seedgen-orch"), "/var/lib/lca/ibu-seedgen-orch")
    }

    fn mode(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn test_permissions() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        ws.create().await.unwrap();

        let auth = ws.write_private(AUTH_FILE, b"{}").await.unwrap();
        let cr = ws.write_json(SEEDGEN_CR_FILE, &json!({"a": 1})).await.unwrap();

        assert_eq!(mode(ws.dir()), 0o700);
        assert_eq!(mode(&auth), 0o600);
        assert_eq!(mode(&cr), 0o644);
        assert_eq!(
            ws.host_path(AUTH_FILE),
            PathBuf::from("/var/lib/lca/ibu-seedgen-orch/auth.json")
        );
    }

    #[tokio::test]
    async fn test_read_missing_and_mark_restored() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        ws.create().await.unwrap();

        assert!(ws.read(PULL_SECRET_FILE).await.unwrap().is_none());
        ws.write_json(MANAGED_CLUSTER_FILE, &json!({"name": "spoke"})).await.unwrap();

        let value: serde_json::Value = ws.read_json(MANAGED_CLUSTER_FILE).await.unwrap().unwrap();
        assert_eq!(value["name"], "spoke");

        ws.mark_restored(MANAGED_CLUSTER_FILE).await.unwrap();
        assert!(!ws.exists(MANAGED_CLUSTER_FILE));
        assert!(ws.exists("managedcluster.json.bak"));
    }

    #[tokio::test]
    async fn test_wipe_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        ws.create().await.unwrap();
        ws.write_private(AUTH_FILE, b"x").await.unwrap();

        ws.wipe().await.unwrap();
        assert!(!ws.dir().exists());
        ws.wipe().await.unwrap();
    }
}
