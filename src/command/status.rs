use anyhow::Result;

use super::CommandContext;
use crate::cli::short_commit;
use crate::state::StateRead;

pub async fn run_status(ctx: &CommandContext) -> Result<()> {
    let read = match ctx.store.read().await {
        Ok(read) => read,
        Err(e) => {
            if let Some(backup) = e.backup_path() {
                println!("⚠️  State file was rejected; original preserved at {}", backup.display());
            }
            return Err(e.into());
        }
    };

    let state = match read {
        StateRead::Missing(_) => {
            println!("No state file at {}", ctx.store.path().display());
            println!("   Run 'memsync register <repo> --agent-id <id>' to get started.");
            return Ok(());
        }
        StateRead::Loaded(state) => state,
    };

    println!("State file: {}\n", ctx.store.path().display());
    for (name, agent) in &state.agents {
        let marker = if ctx.config.repos.contains_key(name) {
            ""
        } else {
            " (not in config)"
        };
        println!("{}{}", name, marker);
        println!("   Agent: {}", agent.agent_id);
        println!(
            "   Files: {}, passages: {}",
            agent.passages.len(),
            agent.passage_count()
        );
        println!(
            "   Last commit: {}",
            agent
                .last_sync_commit
                .as_deref()
                .map(short_commit)
                .unwrap_or("never")
        );
        println!(
            "   Last sync: {}",
            agent
                .last_sync_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
        if let Some(bootstrap) = agent.last_bootstrap {
            println!("   Last full sync: {}", bootstrap.to_rfc3339());
        }
    }

    let unregistered: Vec<&str> = ctx
        .config
        .repos
        .keys()
        .filter(|name| !state.agents.contains_key(*name))
        .map(String::as_str)
        .collect();
    if !unregistered.is_empty() {
        println!("\nConfigured but not registered: {}", unregistered.join(", "));
    }

    Ok(())
}
