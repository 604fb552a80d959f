//! Configuration file loading.
//!
//! The configuration lives at `~/.memsync/config.json` unless overridden:
//!
//! ```json
//! {
//!   "server": { "baseUrl": "http://localhost:8283", "apiKeyEnv": "MEMSYNC_API_KEY" },
//!   "stateFile": "state.json",
//!   "repos": { "app": { "path": "../app", "basePath": "packages/web" } },
//!   "watch": { "pollIntervalMs": 30000, "debounceMs": 2000, "maxBackoffMs": 300000 },
//!   "sync": { "maxChunkChars": 2000, "concurrency": 20, "fullReindexThreshold": 500 }
//! }
//! ```
//!
//! Relative paths resolve against the directory holding the file.
//! Credentials are read from the environment, never from this file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::domain::RepoConfig;
use crate::watch::{WatchSettings, DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_BACKOFF_MS, DEFAULT_POLL_INTERVAL_MS};
use crate::workspace::{
    SyncOptions, DEFAULT_CONCURRENCY, DEFAULT_FULL_REINDEX_THRESHOLD, DEFAULT_MAX_CHUNK_CHARS,
};

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const STATE_FILE_NAME: &str = "state.json";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8283";
pub const DEFAULT_API_KEY_ENV: &str = "MEMSYNC_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchConfig {
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl From<&WatchConfig> for WatchSettings {
    fn from(config: &WatchConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            debounce: Duration::from_millis(config.debounce_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub max_chunk_chars: usize,
    pub concurrency: usize,
    pub full_reindex_threshold: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            concurrency: DEFAULT_CONCURRENCY,
            full_reindex_threshold: DEFAULT_FULL_REINDEX_THRESHOLD,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_chunk_chars: config.max_chunk_chars,
            concurrency: config.concurrency.max(1),
            full_reindex_threshold: config.full_reindex_threshold,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    pub repos: BTreeMap<String, RepoConfig>,
    pub watch: WatchConfig,
    pub sync: SyncConfig,
}

/// `~/.memsync`, the default home of the configuration and state files.
pub fn default_base_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Could not determine home directory")?
        .join(".memsync"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_base_dir()?.join(CONFIG_FILE_NAME))
}

impl Config {
    /// Read, resolve and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base_dir);
        config.validate()?;

        debug!(
            "Loaded config {} with {} repositories",
            path.display(),
            config.repos.len()
        );
        Ok(config)
    }

    /// Make repository and state paths absolute relative to `base_dir`.
    fn resolve_paths(&mut self, base_dir: &Path) {
        for repo in self.repos.values_mut() {
            if repo.path.is_relative() {
                repo.path = base_dir.join(&repo.path);
            }
        }
        if let Some(state_file) = &self.state_file {
            if state_file.is_relative() {
                self.state_file = Some(base_dir.join(state_file));
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, repo) in &self.repos {
            if !repo.path.is_dir() {
                bail!(
                    "Repository '{}' path does not exist or is not a directory: {}",
                    name,
                    repo.path.display()
                );
            }
            if repo.extensions.is_empty() {
                bail!("Repository '{}' has no extensions to index", name);
            }
        }
        if self.sync.max_chunk_chars == 0 {
            bail!("sync.maxChunkChars must be greater than zero");
        }
        Ok(())
    }

    pub fn state_file_path(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(path) => Ok(path.clone()),
            None => Ok(default_base_dir()?.join(STATE_FILE_NAME)),
        }
    }

    pub fn repo(&self, name: &str) -> Result<&RepoConfig> {
        self.repos.get(name).with_context(|| {
            let known: Vec<&str> = self.repos.keys().map(String::as_str).collect();
            format!(
                "Unknown repository '{}' (configured: {})",
                name,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            )
        })
    }

    /// API key from the environment variable named by `server.apiKeyEnv`.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.server.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}
