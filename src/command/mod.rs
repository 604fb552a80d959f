//! One module per subcommand.
//!
//! Every command starts from a [`CommandContext`]: the loaded configuration
//! and the shared state store.

mod preview;
mod reconcile;
mod register;
mod status;
mod sync;
mod watch;

pub use preview::run_preview;
pub use reconcile::run_reconcile;
pub use register::run_register;
pub use status::run_status;
pub use sync::run_sync;
pub use watch::run_watch;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::api::{HttpMemoryProvider, MemoryProvider};
use crate::config::Config;
use crate::domain::AgentState;
use crate::git::GitCli;
use crate::state::StateStore;
use crate::workspace::{LogProgress, RepoSync, SyncOptions};

pub struct CommandContext {
    pub config: Config,
    pub store: Arc<StateStore>,
}

impl CommandContext {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config = Config::load(config_path)?;
        let store = Arc::new(StateStore::new(config.state_file_path()?));
        Ok(Self { config, store })
    }

    pub fn provider(&self) -> Result<Arc<dyn MemoryProvider>> {
        let api_key = self.config.api_key();
        if api_key.is_none() {
            warn!(
                "{} is not set, calling {} without credentials",
                self.config.server.api_key_env, self.config.server.base_url
            );
        }
        let provider = HttpMemoryProvider::new(&self.config.server.base_url, api_key)?;
        Ok(Arc::new(provider))
    }

    /// The registered agent for `repo`, or an error pointing at `register`.
    pub async fn registered_agent(&self, repo: &str) -> Result<AgentState> {
        self.store.get_agent(repo).await?.with_context(|| {
            format!(
                "Repository '{}' is not registered. Run 'memsync register {} --agent-id <id>' first.",
                repo, repo
            )
        })
    }

    pub async fn repo_sync(&self, repo: &str, provider: Arc<dyn MemoryProvider>) -> Result<RepoSync> {
        let config = self.config.repo(repo)?.clone();
        self.registered_agent(repo).await?;
        Ok(RepoSync {
            repo_name: repo.to_string(),
            config,
            store: self.store.clone(),
            provider,
            git: Arc::new(GitCli),
            options: SyncOptions::from(&self.config.sync),
            progress: Arc::new(LogProgress),
        })
    }
}
