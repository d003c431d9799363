//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{CONTAINER_MANAGER_IDENTITY, DEFAULT_RUNTIME_STATUS_TIMEOUT};
use crate::error::{Error, Result};

/// Tunables of a [`crate::ContainerServer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    /// Persistent directory root; holds each entity's `config.json`.
    pub root: PathBuf,
    /// Volatile directory root; holds each container's state file.
    pub run_root: PathBuf,
    /// Identity written to and checked against the ownership annotation.
    pub container_manager: String,
    /// Deadline for a single runtime status query, in seconds.
    pub runtime_status_timeout_secs: u64,
    /// Handler recorded for entities that do not name one.
    pub default_runtime_handler: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            run_root: default_run_root(),
            container_manager: CONTAINER_MANAGER_IDENTITY.to_string(),
            runtime_status_timeout_secs: DEFAULT_RUNTIME_STATUS_TIMEOUT.as_secs(),
            default_runtime_handler: String::new(),
        }
    }
}

impl ServerConfig {
    /// Loads a JSON configuration file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| Error::IoAt {
            context: "failed to read config",
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_run_root(mut self, run_root: impl Into<PathBuf>) -> Self {
        self.run_root = run_root.into();
        self
    }

    pub fn with_runtime_status_timeout(mut self, timeout: Duration) -> Self {
        self.runtime_status_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_default_runtime_handler(mut self, handler: impl Into<String>) -> Self {
        self.default_runtime_handler = handler.into();
        self
    }

    /// Deadline for a single runtime status query, never below one second.
    pub fn runtime_status_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_status_timeout_secs.max(1))
    }
}

/// Platform-appropriate persistent root.
///
/// - Linux: `/var/lib/magikcri`
/// - macOS: `~/.magikcri/lib`
/// - Windows: `%LOCALAPPDATA%\magikcri\lib`
fn default_root() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/magikcri")
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .map(|h| h.join(".magikcri").join("lib"))
            .unwrap_or_else(|| PathBuf::from(".magikcri/lib"))
    }

    #[cfg(target_os = "windows")]
    {
        dirs::data_local_dir()
            .map(|d| d.join("magikcri").join("lib"))
            .unwrap_or_else(|| PathBuf::from("magikcri\\lib"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("/var/lib/magikcri")
    }
}

/// Platform-appropriate volatile root.
fn default_run_root() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/run/magikcri")
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .map(|h| h.join(".magikcri").join("run"))
            .unwrap_or_else(|| PathBuf::from(".magikcri/run"))
    }

    #[cfg(target_os = "windows")]
    {
        dirs::data_local_dir()
            .map(|d| d.join("magikcri").join("run"))
            .unwrap_or_else(|| PathBuf::from("magikcri\\run"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("/run/magikcri")
    }
}
