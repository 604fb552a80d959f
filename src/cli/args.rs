use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// memsync - keep an agent's archival memory in sync with a repository
#[derive(Parser)]
#[command(name = "memsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file. Defaults to ~/.memsync/config.json
    #[arg(short = 'c', long, env = "MEMSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bind a configured repository to a remote agent
    Register {
        /// Repository name from the configuration file
        repo: String,

        /// Id of the agent whose archival memory receives the passages
        #[arg(long)]
        agent_id: String,
    },
    /// Sync a repository once
    Sync {
        repo: String,

        /// Re-index every file instead of diffing from the last synced commit
        #[arg(long)]
        full: bool,

        /// Print the plan without touching the remote store
        #[arg(long)]
        dry_run: bool,
    },
    /// Compare local bookkeeping with the remote store
    Reconcile {
        repo: String,

        /// Delete orphan passages and forget missing ones
        #[arg(long)]
        fix: bool,
    },
    /// Keep repositories in sync until interrupted
    Watch {
        /// Repositories to watch. Defaults to every registered repository
        repos: Vec<String>,
    },
    /// Show sync state of every registered repository
    Status,
    /// Preview files that will be indexed (dry-run)
    Preview {
        repo: String,

        /// Show all files (not just summary)
        #[arg(short = 'a', long)]
        all: bool,
    },
}
