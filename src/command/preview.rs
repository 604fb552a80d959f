use anyhow::{Context, Result};

use super::CommandContext;
use crate::cli::format_size;
use crate::git::{list_submodules, GitCli};
use crate::workspace::{collect_files, collect_with_submodules};

pub async fn run_preview(ctx: &CommandContext, repo: &str, all: bool) -> Result<()> {
    let config = ctx.config.repo(repo)?.clone();
    let root = config.effective_root();
    println!("Scanning repository: {}\n", root.display());

    let submodules = if config.include_submodules {
        list_submodules(&GitCli, &config.path).await
    } else {
        Vec::new()
    };
    let files = tokio::task::spawn_blocking(move || {
        if config.include_submodules {
            collect_with_submodules(&config, &submodules)
        } else {
            collect_files(&config)
        }
    })
    .await
    .context("File collection task panicked")??;

    let total_bytes: u64 = files.iter().map(|f| f.content.len() as u64).sum();

    println!("Summary:");
    println!("  Files to index: {}", files.len());
    println!("  Total size: {}", format_size(total_bytes));

    if all {
        println!("\nFiles:");
        for file in &files {
            println!("  {:>8.1}K  {}", file.size_kb, file.path);
        }
    } else if !files.is_empty() {
        println!("\n  Use --all to see all files");
    }

    Ok(())
}
