//! Domain types shared across modules.
//!
//! This module contains data structures that are used by multiple
//! parts of the application (collector, sync, state store, watcher).
//! Keeping them here avoids circular dependencies between modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Schema version written by this build.
pub const CURRENT_STATE_VERSION: u32 = 2;

/// Default extensions indexed when a repository does not list its own.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".rs", ".ts", ".tsx", ".js", ".jsx", ".py", ".go", ".java", ".md", ".json", ".toml", ".yaml",
    ".yml",
];

/// Directory names that are never indexed, wherever they appear in a path.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "build"];

/// Default per-file size ceiling in kilobytes.
pub const DEFAULT_MAX_FILE_SIZE_KB: u64 = 100;

/// File path -> ordered remote passage ids.
///
/// A passage id appears under at most one key.
pub type PassageMap = BTreeMap<String, Vec<String>>;

/// Per-repository indexing configuration. Immutable for the duration of a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    pub path: PathBuf,
    /// Monorepo scoping: only files under `path/base_path` are indexed,
    /// and logical paths are relative to that directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    #[serde(default = "default_extensions")]
    pub extensions: BTreeSet<String>,
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: BTreeSet<String>,
    #[serde(default = "default_max_file_size_kb")]
    pub max_file_size_kb: u64,
    #[serde(default)]
    pub include_submodules: bool,
}

impl RepoConfig {
    /// Create a config with default filters rooted at `path`.
    #[cfg(test)]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base_path: None,
            extensions: default_extensions(),
            ignore_dirs: default_ignore_dirs(),
            max_file_size_kb: DEFAULT_MAX_FILE_SIZE_KB,
            include_submodules: false,
        }
    }

    /// `path` joined with `base_path`, the directory logical paths are relative to.
    pub fn effective_root(&self) -> PathBuf {
        match self.base_path.as_deref().map(normalize_base_path) {
            Some(base) if !base.is_empty() => self.path.join(base),
            _ => self.path.clone(),
        }
    }

    /// Normalized `base_path` without leading `./` or surrounding slashes.
    pub fn base_prefix(&self) -> Option<String> {
        self.base_path
            .as_deref()
            .map(normalize_base_path)
            .filter(|b| !b.is_empty())
    }
}

fn normalize_base_path(base: &str) -> String {
    let base = base.replace('\\', "/");
    let base = base.strip_prefix("./").unwrap_or(&base);
    base.trim_matches('/').to_string()
}

fn default_extensions() -> BTreeSet<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_ignore_dirs() -> BTreeSet<String> {
    DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect()
}

fn default_max_file_size_kb() -> u64 {
    DEFAULT_MAX_FILE_SIZE_KB
}

/// A collected file, ready for chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Repo-relative path with forward slashes.
    pub path: String,
    pub content: String,
    pub size_kb: f64,
}

/// A bounded-size unit of file text. `text` starts with a `FILE:` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source_path: String,
}

/// Sync bookkeeping for one repository's remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub agent_id: String,
    pub repo_name: String,
    #[serde(default)]
    pub passages: PassageMap,
    #[serde(default)]
    pub last_bootstrap: Option<DateTime<Utc>>,
    /// `None` means the repository was never fully synced.
    #[serde(default)]
    pub last_sync_commit: Option<String>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, repo_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            repo_name: repo_name.into(),
            passages: PassageMap::new(),
            last_bootstrap: None,
            last_sync_commit: None,
            last_sync_at: None,
            created_at: Utc::now(),
        }
    }

    /// Total number of tracked passage ids across all files.
    pub fn passage_count(&self) -> usize {
        self.passages.values().map(Vec::len).sum()
    }
}

/// The persisted state document: `{ stateVersion, agents }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppState {
    pub state_version: u32,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentState>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            state_version: CURRENT_STATE_VERSION,
            agents: BTreeMap::new(),
        }
    }
}

/// A git submodule as reported by `git submodule status`. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmoduleInfo {
    pub path: String,
    pub commit: String,
    pub initialized: bool,
}

/// A passage as listed by the remote provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePassage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_root_with_base_path() {
        let mut config = RepoConfig::new("/repo");
        assert_eq!(config.effective_root(), PathBuf::from("/repo"));

        config.base_path = Some("./packages/web/".to_string());
        assert_eq!(config.effective_root(), PathBuf::from("/repo/packages/web"));
        assert_eq!(config.base_prefix().as_deref(), Some("packages/web"));
    }

    #[test]
    fn test_repo_config_defaults_from_json() {
        let config: RepoConfig = serde_json::from_str(r#"{"path": "/repo"}"#).unwrap();
        assert!(config.extensions.contains(".rs"));
        assert!(config.ignore_dirs.contains("node_modules"));
        assert_eq!(config.max_file_size_kb, DEFAULT_MAX_FILE_SIZE_KB);
        assert!(!config.include_submodules);
    }

    #[test]
    fn test_agent_state_uses_camel_case() {
        let agent = AgentState::new("agent-1", "web");
        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json["agentId"], "agent-1");
        assert_eq!(json["repoName"], "web");
        assert!(json["lastSyncCommit"].is_null());
    }
}
