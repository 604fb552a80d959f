//! Durable per-repository sync state.
//!
//! All repositories share one JSON document, `{ stateVersion, agents }`,
//! usually at `~/.memsync/state.json`. Writes go to a uniquely named
//! temporary file in the same directory and are renamed into place.
//! A file that cannot be accepted (corrupt JSON, schema mismatch, unknown
//! version) is copied to a timestamped backup and reported as a
//! [`StateError`]; it is never overwritten or reset.

mod migrate;

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{AgentState, AppState, CURRENT_STATE_VERSION};
use migrate::{migrate, Migration};

/// Rename attempts before a transient failure is surfaced.
const RENAME_ATTEMPTS: u32 = 5;

/// Linear backoff step between rename attempts.
const RENAME_BACKOFF: Duration = Duration::from_millis(50);

#[cfg(unix)]
const TRANSIENT_OS_ERRORS: &[i32] = &[1 /* EPERM */, 16 /* EBUSY */];
#[cfg(windows)]
const TRANSIENT_OS_ERRORS: &[i32] = &[
    5,  /* ERROR_ACCESS_DENIED */
    32, /* ERROR_SHARING_VIOLATION */
    33, /* ERROR_LOCK_VIOLATION */
];
#[cfg(not(any(unix, windows)))]
const TRANSIENT_OS_ERRORS: &[i32] = &[];

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file {path} is not valid JSON; original preserved at {backup}")]
    Corrupt {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state file {path} does not match the expected schema ({message}); original preserved at {backup}")]
    Schema {
        path: PathBuf,
        backup: PathBuf,
        message: String,
    },
    #[error("state file {path} has version {found} but this build supports {supported}; original preserved at {backup}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u64,
        supported: u32,
        backup: PathBuf,
    },
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize state")]
    Serialize(#[source] serde_json::Error),
    #[error("no agent is registered for repository '{0}'")]
    UnknownRepo(String),
}

impl StateError {
    /// Backup written when the file was rejected, if any.
    pub fn backup_path(&self) -> Option<&Path> {
        match self {
            StateError::Corrupt { backup, .. }
            | StateError::Schema { backup, .. }
            | StateError::UnsupportedVersion { backup, .. } => Some(backup),
            _ => None,
        }
    }
}

/// Outcome of reading the state file.
#[derive(Debug, Clone, PartialEq)]
pub enum StateRead {
    /// No file exists yet; the contained state is fresh and empty.
    Missing(AppState),
    /// The file was read, migrated if necessary, and validated.
    Loaded(AppState),
}

impl StateRead {
    pub fn into_state(self) -> AppState {
        match self {
            StateRead::Missing(state) | StateRead::Loaded(state) => state,
        }
    }
}

/// On-disk shape, borrowed so saving does not clone the whole state.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument<'a> {
    state_version: u32,
    agents: &'a BTreeMap<String, AgentState>,
}

/// Handle to the shared state file.
///
/// Read-modify-write helpers hold an in-process lock so repositories synced
/// by one daemon do not overwrite each other's updates. Other processes are
/// not locked out; every update re-reads the file first.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file, distinguishing "no file yet" from a loaded state.
    pub async fn read(&self) -> Result<StateRead, StateError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", self.path.display());
                return Ok(StateRead::Missing(AppState::default()));
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut doc: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(source) => {
                let backup = self.backup().await?;
                return Err(self.rejected(StateError::Corrupt {
                    path: self.path.clone(),
                    backup,
                    source,
                }));
            }
        };

        match migrate(&mut doc) {
            Ok(Migration::Current) => {}
            Ok(Migration::Migrated { from }) => {
                info!(
                    "Migrating state file {} from version {} to {}",
                    self.path.display(),
                    from.map(|v| v.to_string())
                        .unwrap_or_else(|| "<none>".to_string()),
                    CURRENT_STATE_VERSION
                );
            }
            Ok(Migration::Unsupported(found)) => {
                let backup = self.backup().await?;
                return Err(self.rejected(StateError::UnsupportedVersion {
                    path: self.path.clone(),
                    found,
                    supported: CURRENT_STATE_VERSION,
                    backup,
                }));
            }
            Err(message) => {
                let backup = self.backup().await?;
                return Err(self.rejected(StateError::Schema {
                    path: self.path.clone(),
                    backup,
                    message,
                }));
            }
        }

        let state: AppState = match serde_json::from_value(doc) {
            Ok(state) => state,
            Err(e) => {
                let backup = self.backup().await?;
                return Err(self.rejected(StateError::Schema {
                    path: self.path.clone(),
                    backup,
                    message: e.to_string(),
                }));
            }
        };

        if state.state_version != CURRENT_STATE_VERSION {
            let backup = self.backup().await?;
            return Err(self.rejected(StateError::UnsupportedVersion {
                path: self.path.clone(),
                found: u64::from(state.state_version),
                supported: CURRENT_STATE_VERSION,
                backup,
            }));
        }

        Ok(StateRead::Loaded(state))
    }

    /// Read the state, treating a missing file as empty state.
    pub async fn load(&self) -> Result<AppState, StateError> {
        self.read().await.map(StateRead::into_state)
    }

    /// Persist `state` atomically, stamping the current version.
    #[cfg(test)]
    pub async fn save(&self, state: &AppState) -> Result<(), StateError> {
        let _guard = self.lock.lock().await;
        self.write(state).await
    }

    pub async fn get_agent(&self, repo_name: &str) -> Result<Option<AgentState>, StateError> {
        Ok(self.load().await?.agents.remove(repo_name))
    }

    /// Register a new agent. Returns `false` without writing if the repository
    /// already has one.
    pub async fn insert_agent(&self, agent: AgentState) -> Result<bool, StateError> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        if state.agents.contains_key(&agent.repo_name) {
            return Ok(false);
        }
        state.agents.insert(agent.repo_name.clone(), agent);
        self.write(&state).await?;
        Ok(true)
    }

    /// Apply `update` to the latest persisted state of `repo_name` and save.
    ///
    /// The file is re-read under the lock so concurrent updates for other
    /// repositories are kept.
    pub async fn update_agent<F>(&self, repo_name: &str, update: F) -> Result<AgentState, StateError>
    where
        F: FnOnce(&mut AgentState),
    {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let agent = state
            .agents
            .get_mut(repo_name)
            .ok_or_else(|| StateError::UnknownRepo(repo_name.to_string()))?;
        update(agent);
        let updated = agent.clone();
        self.write(&state).await?;
        Ok(updated)
    }

    /// Like [`update_agent`](Self::update_agent), but only writes when
    /// `update` reports a change.
    pub async fn update_agent_if<F>(&self, repo_name: &str, update: F) -> Result<bool, StateError>
    where
        F: FnOnce(&mut AgentState) -> bool,
    {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let agent = state
            .agents
            .get_mut(repo_name)
            .ok_or_else(|| StateError::UnknownRepo(repo_name.to_string()))?;
        if !update(agent) {
            return Ok(false);
        }
        self.write(&state).await?;
        Ok(true)
    }

    async fn write(&self, state: &AppState) -> Result<(), StateError> {
        let doc = StateDocument {
            state_version: CURRENT_STATE_VERSION,
            agents: &state.agents,
        };
        let content = serde_json::to_string_pretty(&doc).map_err(StateError::Serialize)?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| StateError::Io { path, source }
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

        let tmp = dir.join(self.temp_file_name());
        tokio::fs::write(&tmp, content).await.map_err(io_err(&tmp))?;

        let result = rename_with_retry(|| tokio::fs::rename(&tmp, &self.path)).await;
        if let Err(source) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StateError::Io {
                path: self.path.clone(),
                source,
            });
        }

        debug!("Saved state to {}", self.path.display());
        Ok(())
    }

    /// `.<name>.<pid>.<uuid>.tmp`, unique per process and attempt.
    fn temp_file_name(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        format!(
            ".{}.{}.{}.tmp",
            name,
            std::process::id(),
            Uuid::new_v4().simple()
        )
    }

    /// Copy the current file to `<name>.backup-<timestamp>` next to it.
    async fn backup(&self) -> Result<PathBuf, StateError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut backup = self.path.clone().into_os_string();
        backup.push(format!(".backup-{}", stamp));
        let backup = PathBuf::from(backup);

        tokio::fs::copy(&self.path, &backup)
            .await
            .map_err(|source| StateError::Io {
                path: backup.clone(),
                source,
            })?;
        Ok(backup)
    }

    fn rejected(&self, err: StateError) -> StateError {
        error!("{}", err);
        err
    }
}

fn is_transient_rename_error(err: &io::Error) -> bool {
    err.kind() == ErrorKind::PermissionDenied
        || err
            .raw_os_error()
            .map(|code| TRANSIENT_OS_ERRORS.contains(&code))
            .unwrap_or(false)
}

/// Run `rename`, retrying transient failures with linear backoff.
async fn rename_with_retry<F, Fut>(mut rename: F) -> io::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let mut attempt = 1;
    loop {
        match rename().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < RENAME_ATTEMPTS && is_transient_rename_error(&e) => {
                warn!(
                    "State rename failed ({}), retrying ({}/{})",
                    e, attempt, RENAME_ATTEMPTS
                );
                tokio::time::sleep(RENAME_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
