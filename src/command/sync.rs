use anyhow::{bail, Result};

use super::CommandContext;
use crate::cli::short_commit;
use crate::workspace::{PollOutcome, SyncReport};

pub async fn run_sync(ctx: &CommandContext, repo: &str, full: bool, dry_run: bool) -> Result<()> {
    let provider = ctx.provider()?;
    let sync = ctx.repo_sync(repo, provider).await?;

    if dry_run {
        let plan = sync.preview(full).await?;
        println!("Plan for '{}':", repo);
        println!("  Files to re-index: {}", plan.files_to_reindex.len());
        println!("  Passages to replace: {}", plan.passages_to_delete.len());
        println!("  Full reindex: {}", if plan.is_full_reindex { "yes" } else { "no" });
        for path in &plan.files_to_reindex {
            println!("    {}", path);
        }
        return Ok(());
    }

    let report = if full {
        sync.sync_full().await?
    } else {
        match sync.sync_from_head().await? {
            PollOutcome::Synced(report) => report,
            PollOutcome::UpToDate { head } => {
                println!("'{}' is up to date at {}", repo, short_commit(&head));
                return Ok(());
            }
            PollOutcome::CursorAdvanced { head } => {
                println!(
                    "No indexed files changed; '{}' advanced to {}",
                    repo,
                    short_commit(&head)
                );
                return Ok(());
            }
            PollOutcome::HeadUnavailable => {
                bail!("Could not read git HEAD for '{}'. Use --full to sync without git.", repo)
            }
            PollOutcome::DiffUnavailable { from } => bail!(
                "Could not diff from {} for '{}'. Use --full to re-index everything.",
                short_commit(&from),
                repo
            ),
        }
    };

    print_report(repo, &report);
    if !report.is_success() {
        bail!("{} files failed to sync", report.failed_files.len());
    }
    Ok(())
}

fn print_report(repo: &str, report: &SyncReport) {
    println!("Synced '{}':", repo);
    println!("  Re-indexed: {}", report.files_reindexed);
    println!("  Removed: {}", report.files_removed);
    if report.full_reindex {
        println!("  (full reindex)");
    }
    if let Some(commit) = &report.commit {
        println!("  Commit: {}", short_commit(commit));
    }
    if !report.failed_files.is_empty() {
        println!("\n⚠️  {} files failed:", report.failed_files.len());
        for path in &report.failed_files {
            println!("    - {}", path);
        }
    }
}
