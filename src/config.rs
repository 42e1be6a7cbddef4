use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[cfg(windows)]
const DEFAULT_EXECUTABLE: &str = "bedrock_server.exe";
#[cfg(not(windows))]
const DEFAULT_EXECUTABLE: &str = "bedrock_server";

const DEFAULT_JOIN_TIMEOUT_MS: u64 = 1000;

fn default_join_timeout_ms() -> u64 {
    DEFAULT_JOIN_TIMEOUT_MS
}

/// Launcher settings for a single server instance.
///
/// Stored as camelCase JSON so existing launcher configs keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfig {
    /// Feed listing the current server downloads.
    pub download_page: String,

    /// Paths relative to the instance directory that survive updates once
    /// they exist, e.g. `worlds/`.
    #[serde(default)]
    pub preserve_files: Vec<String>,

    pub target_dir: PathBuf,

    pub world_name: String,

    /// Track the preview channel instead of stable releases.
    #[serde(default)]
    pub preview: bool,

    /// Server binary relative to the instance directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,

    /// How long `join` waits for a graceful exit before killing the server.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl LauncherConfig {
    pub fn new(
        download_page: impl Into<String>,
        target_dir: impl Into<PathBuf>,
        world_name: impl Into<String>,
    ) -> Self {
        Self {
            download_page: download_page.into(),
            preserve_files: Vec::new(),
            target_dir: target_dir.into(),
            world_name: world_name.into(),
            preview: false,
            executable: None,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
        }
    }

    pub fn install_path(&self) -> PathBuf {
        self.target_dir.join(&self.world_name)
    }

    pub fn executable_path(&self) -> PathBuf {
        let exe = self
            .executable
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLE));
        self.install_path().join(exe)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self).map_err(ConfigError::Serialize)?;

        tokio::fs::write(path, json)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}
