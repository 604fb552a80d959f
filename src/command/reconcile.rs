use anyhow::{Context, Result};
use std::borrow::Cow;

use super::CommandContext;
use crate::workspace::{compute_reconcile_plan, fix_reconcile_drift, strip_missing_in_store};

pub async fn run_reconcile(ctx: &CommandContext, repo: &str, fix: bool) -> Result<()> {
    ctx.config.repo(repo)?;
    let agent = ctx.registered_agent(repo).await?;
    let provider = ctx.provider()?;

    let remote = provider
        .list_passages(&agent.agent_id)
        .await
        .with_context(|| format!("Failed to list passages of agent {}", agent.agent_id))?;
    let plan = compute_reconcile_plan(&agent.passages, &remote);

    println!("Reconcile '{}' (agent {}):", repo, agent.agent_id);
    println!("  Local passages: {}", agent.passage_count());
    println!("  Remote passages: {}", remote.len());
    println!("  Orphans (remote only): {}", plan.orphan_passage_ids.len());
    println!("  Missing (local only): {}", plan.missing_passage_ids.len());

    if plan.in_sync {
        println!("\n✅ In sync");
        return Ok(());
    }
    if !fix {
        println!("\n  Run with --fix to repair");
        return Ok(());
    }

    let fixed = fix_reconcile_drift(
        provider.as_ref(),
        &agent.agent_id,
        &agent.passages,
        &plan,
        ctx.config.sync.concurrency,
    )
    .await;

    // The snapshot only says whether stripping is needed; the store applies
    // it to the current map.
    if let Cow::Owned(_) = fixed {
        strip_missing_in_store(&ctx.store, repo, &plan.missing_passage_ids).await?;
    }

    println!("\n✅ Repaired");
    Ok(())
}
