use anyhow::{bail, Result};

use super::CommandContext;
use crate::domain::AgentState;

pub async fn run_register(ctx: &CommandContext, repo: &str, agent_id: &str) -> Result<()> {
    ctx.config.repo(repo)?;
    if agent_id.trim().is_empty() {
        bail!("Agent id must not be empty");
    }

    let agent = AgentState::new(agent_id, repo);
    if !ctx.store.insert_agent(agent).await? {
        let existing = ctx.registered_agent(repo).await?;
        bail!(
            "Repository '{}' is already registered with agent {}",
            repo,
            existing.agent_id
        );
    }

    println!("✅ Registered '{}' with agent {}", repo, agent_id);
    println!("   Run 'memsync sync {}' to index it.", repo);
    Ok(())
}
