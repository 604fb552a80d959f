use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CommandContext;
use crate::git::{GitCli, GitPort};
use crate::watch::{self, WatchSettings};

pub async fn run_watch(ctx: &CommandContext, repos: Vec<String>) -> Result<()> {
    let names = if repos.is_empty() {
        let state = ctx.store.load().await?;
        let registered: Vec<String> = ctx
            .config
            .repos
            .keys()
            .filter(|name| state.agents.contains_key(*name))
            .cloned()
            .collect();
        if registered.is_empty() {
            bail!("No registered repositories to watch. Run 'memsync register' first.");
        }
        registered
    } else {
        repos
    };

    match GitCli.version().await {
        Some(version) => debug!("Using {}", version),
        None => warn!("git is unavailable; only filesystem events will trigger syncs"),
    }

    let provider = ctx.provider()?;
    let mut syncs = Vec::with_capacity(names.len());
    for name in &names {
        syncs.push(ctx.repo_sync(name, provider.clone()).await?);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        on_signal.cancel();
    });

    info!("Watching {} repositories: {}", names.len(), names.join(", "));
    watch::run_watch(
        syncs,
        WatchSettings::from(&ctx.config.watch),
        ctx.store.path().to_path_buf(),
        cancel,
    )
    .await
}
