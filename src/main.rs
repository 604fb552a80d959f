use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

mod api;
mod cli;
mod command;
mod config;
mod domain;
mod git;
mod state;
mod watch;
mod workspace;

use cli::{Cli, Commands};
use command::CommandContext;
use api::ApiError;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(cmd) = cli.command else {
        eprintln!("No command specified. Use --help for usage information.");
        eprintln!("Use 'memsync register <repo> --agent-id <id>' to bind a repository to an agent.");
        return Ok(());
    };

    let config_path = cli::resolve_config_path(cli.config)?;
    let ctx = CommandContext::load(&config_path)?;

    let result = match cmd {
        Commands::Register { repo, agent_id } => command::run_register(&ctx, &repo, &agent_id).await,
        Commands::Sync {
            repo,
            full,
            dry_run,
        } => command::run_sync(&ctx, &repo, full, dry_run).await,
        Commands::Reconcile { repo, fix } => command::run_reconcile(&ctx, &repo, fix).await,
        Commands::Watch { repos } => command::run_watch(&ctx, repos).await,
        Commands::Status => command::run_status(&ctx).await,
        Commands::Preview { repo, all } => command::run_preview(&ctx, &repo, all).await,
    };

    if let Err(e) = &result {
        if let Some(api_err) = e.downcast_ref::<ApiError>() {
            if api_err.is_auth_failure() {
                error!(
                    "Memory server rejected the credentials; check {}",
                    ctx.config.server.api_key_env
                );
            }
        }
    }

    result
}
