//! Repository synchronization.
//!
//! Ties collection, planning and execution to the state store:
//! - [`RepoSync::sync_from_head`] runs on poll ticks and diffs from the
//!   last synced commit to HEAD
//! - [`RepoSync::sync_files`] syncs an explicit list (filesystem events) and
//!   never moves the commit cursor
//! - [`RepoSync::sync_full`] re-indexes every included file

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::chunker::DEFAULT_MAX_CHUNK_CHARS;
use super::executor::{SyncExecutor, SyncOutcome, SyncProgress};
use super::plan::{compute_sync_plan, dedupe_paths, SyncPlan, DEFAULT_FULL_REINDEX_THRESHOLD};
use super::scanner::{collect_files, is_included, logical_from_repo_relative};
use super::submodule::{collect_submodule_files, collect_with_submodules, submodule_at};
use super::upload::DEFAULT_CONCURRENCY;
use crate::api::MemoryProvider;
use crate::cli::short_commit;
use crate::domain::{AgentState, PassageMap, RepoConfig, SubmoduleInfo};
use crate::git::{list_submodules, GitPort};
use crate::state::{StateError, StateStore};

/// Tunables shared by every sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_chunk_chars: usize,
    pub concurrency: usize,
    pub full_reindex_threshold: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            concurrency: DEFAULT_CONCURRENCY,
            full_reindex_threshold: DEFAULT_FULL_REINDEX_THRESHOLD,
        }
    }
}

/// Summary of one completed sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files_reindexed: usize,
    pub files_removed: usize,
    pub full_reindex: bool,
    pub failed_files: Vec<String>,
    /// Commit recorded as `lastSyncCommit`, if the cursor moved.
    pub commit: Option<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed_files.is_empty()
    }
}

/// What a poll tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// git could not report HEAD; nothing was done.
    HeadUnavailable,
    /// git could not diff from the last synced commit; nothing was done.
    DiffUnavailable { from: String },
    UpToDate { head: String },
    /// HEAD moved without touching any included file; only the cursor moved.
    CursorAdvanced { head: String },
    Synced(SyncReport),
}

/// Everything needed to sync one repository. Cheap to clone.
#[derive(Clone)]
pub struct RepoSync {
    pub repo_name: String,
    pub config: RepoConfig,
    pub store: Arc<StateStore>,
    pub provider: Arc<dyn MemoryProvider>,
    pub git: Arc<dyn GitPort>,
    pub options: SyncOptions,
    pub progress: Arc<dyn SyncProgress>,
}

impl RepoSync {
    async fn agent(&self) -> Result<AgentState> {
        self.store
            .get_agent(&self.repo_name)
            .await?
            .ok_or_else(|| StateError::UnknownRepo(self.repo_name.clone()).into())
    }

    async fn submodules(&self) -> Vec<SubmoduleInfo> {
        if !self.config.include_submodules {
            return Vec::new();
        }
        list_submodules(self.git.as_ref(), &self.config.path).await
    }

    /// Logical paths of every included file, submodules expanded when enabled.
    async fn collect_all_paths(&self) -> Result<Vec<String>> {
        let submodules = self.submodules().await;
        let config = self.config.clone();
        let files = tokio::task::spawn_blocking(move || {
            if config.include_submodules {
                collect_with_submodules(&config, &submodules)
            } else {
                collect_files(&config)
            }
        })
        .await
        .context("File collection task panicked")??;

        Ok(files.into_iter().map(|f| f.path).collect())
    }

    /// Every collected path plus every tracked path, so vanished files are removed.
    async fn full_path_set(&self, passages: &PassageMap) -> Result<Vec<String>> {
        let mut paths = self.collect_all_paths().await?;
        paths.extend(passages.keys().cloned());
        Ok(dedupe_paths(paths))
    }

    /// Turn repo-relative diff entries into the logical paths to re-index.
    async fn filter_diff(&self, diff: Vec<String>, passages: &PassageMap) -> Result<Vec<String>> {
        let submodules = self.submodules().await;
        let mut changed = Vec::new();

        for entry in diff {
            let Some(logical) = logical_from_repo_relative(&self.config, &entry) else {
                continue;
            };

            if let Some(submodule) = submodule_at(&self.config, &submodules, &logical) {
                changed.extend(self.expand_submodule(submodule, &logical, passages).await?);
            } else if is_included(&self.config, &logical) {
                changed.push(logical);
            }
        }

        Ok(dedupe_paths(changed))
    }

    /// A moved submodule pointer re-indexes the submodule's files and
    /// re-visits everything already tracked under it.
    async fn expand_submodule(
        &self,
        submodule: &SubmoduleInfo,
        logical: &str,
        passages: &PassageMap,
    ) -> Result<Vec<String>> {
        debug!("Submodule {} moved, expanding", submodule.path);
        let config = self.config.clone();
        let sub = submodule.clone();
        let files = tokio::task::spawn_blocking(move || collect_submodule_files(&config, &sub))
            .await
            .context("Submodule collection task panicked")??;

        let prefix = format!("{}/", logical);
        let mut paths: Vec<String> = files.into_iter().map(|f| f.path).collect();
        paths.extend(passages.keys().filter(|k| k.starts_with(&prefix)).cloned());
        Ok(paths)
    }

    /// The plan a sync would execute, without executing it.
    pub async fn preview(&self, full: bool) -> Result<SyncPlan> {
        let agent = self.agent().await?;
        let changed = match (&agent.last_sync_commit, full) {
            (Some(last), false) => {
                let diff = self
                    .git
                    .diff_files(&self.config.path, last)
                    .await
                    .with_context(|| format!("git could not diff from {}", last))?;
                self.filter_diff(diff, &agent.passages).await?
            }
            _ => self.full_path_set(&agent.passages).await?,
        };
        Ok(compute_sync_plan(
            &agent.passages,
            &changed,
            self.options.full_reindex_threshold,
        ))
    }

    /// Sync an explicit list of logical paths. Never moves the commit cursor.
    pub async fn sync_files(&self, paths: Vec<String>) -> Result<SyncReport> {
        self.run(dedupe_paths(paths), None).await
    }

    /// Re-index every included file and stamp HEAD when git can report it.
    pub async fn sync_full(&self) -> Result<SyncReport> {
        let head = self.git.head_commit(&self.config.path).await;
        let agent = self.agent().await?;
        let paths = self.full_path_set(&agent.passages).await?;
        self.run_with_bootstrap(paths, head, true).await
    }

    /// Poll-tick sync: diff from `lastSyncCommit` to HEAD.
    pub async fn sync_from_head(&self) -> Result<PollOutcome> {
        let Some(head) = self.git.head_commit(&self.config.path).await else {
            return Ok(PollOutcome::HeadUnavailable);
        };

        let agent = self.agent().await?;
        let Some(last) = agent.last_sync_commit.clone() else {
            info!("{}: no previous sync, collecting all files", self.repo_name);
            let paths = self.full_path_set(&agent.passages).await?;
            let report = self.run_with_bootstrap(paths, Some(head), true).await?;
            return Ok(PollOutcome::Synced(report));
        };

        if last == head {
            debug!("{}: HEAD unchanged at {}", self.repo_name, head);
            return Ok(PollOutcome::UpToDate { head });
        }

        let Some(diff) = self.git.diff_files(&self.config.path, &last).await else {
            return Ok(PollOutcome::DiffUnavailable { from: last });
        };

        let changed = self.filter_diff(diff, &agent.passages).await?;
        if changed.is_empty() {
            info!(
                "{}: {}..{} touched no indexed files, advancing cursor",
                self.repo_name,
                short_commit(&last),
                short_commit(&head)
            );
            self.store
                .update_agent(&self.repo_name, |a| {
                    a.last_sync_commit = Some(head.clone())
                })
                .await?;
            return Ok(PollOutcome::CursorAdvanced { head });
        }

        let report = self.run(changed, Some(head)).await?;
        Ok(PollOutcome::Synced(report))
    }

    async fn run(&self, changed: Vec<String>, commit: Option<String>) -> Result<SyncReport> {
        self.run_with_bootstrap(changed, commit, false).await
    }

    async fn run_with_bootstrap(
        &self,
        changed: Vec<String>,
        commit: Option<String>,
        bootstrap: bool,
    ) -> Result<SyncReport> {
        let agent = self.agent().await?;
        let threshold = self.options.full_reindex_threshold;

        let mut plan = compute_sync_plan(&agent.passages, &changed, threshold);
        if plan.is_full_reindex && !bootstrap {
            info!(
                "{}: {} changed files exceeds {}, re-indexing everything",
                self.repo_name,
                changed.len(),
                threshold
            );
            let mut widened = changed;
            widened.extend(self.full_path_set(&agent.passages).await?);
            plan = compute_sync_plan(&agent.passages, &dedupe_paths(widened), threshold);
        }

        let executor = SyncExecutor {
            config: &self.config,
            agent_id: &agent.agent_id,
            provider: self.provider.as_ref(),
            max_chunk_chars: self.options.max_chunk_chars,
            concurrency: self.options.concurrency,
            progress: self.progress.as_ref(),
        };
        let outcome = executor.execute(agent.passages.clone(), &plan, commit).await;

        self.persist(&plan, &outcome, bootstrap).await
    }

    /// Merge the outcome into the latest stored state.
    ///
    /// Only paths this run touched are written, so a concurrent repair of
    /// other entries is not clobbered. The commit cursor moves only when
    /// every file succeeded.
    async fn persist(
        &self,
        plan: &SyncPlan,
        outcome: &SyncOutcome,
        bootstrap: bool,
    ) -> Result<SyncReport> {
        let failed: HashSet<&str> = outcome.failed_files.iter().map(String::as_str).collect();
        let advance = if outcome.failed_files.is_empty() {
            outcome.commit.clone()
        } else {
            warn!(
                "{}: {} files failed, keeping commit cursor",
                self.repo_name,
                outcome.failed_files.len()
            );
            None
        };

        let now = Utc::now();
        self.store
            .update_agent(&self.repo_name, |agent| {
                for path in &plan.files_to_reindex {
                    if failed.contains(path.as_str()) {
                        continue;
                    }
                    match outcome.passages.get(path) {
                        Some(ids) => {
                            agent.passages.insert(path.clone(), ids.clone());
                        }
                        None => {
                            agent.passages.remove(path);
                        }
                    }
                }
                if let Some(commit) = &advance {
                    agent.last_sync_commit = Some(commit.clone());
                }
                if bootstrap && outcome.failed_files.is_empty() {
                    agent.last_bootstrap = Some(now);
                }
                agent.last_sync_at = Some(now);
            })
            .await?;

        info!(
            "{}: {} re-indexed, {} removed, {} failed",
            self.repo_name,
            outcome.files_reindexed,
            outcome.files_removed,
            outcome.failed_files.len()
        );

        Ok(SyncReport {
            files_reindexed: outcome.files_reindexed,
            files_removed: outcome.files_removed,
            full_reindex: outcome.full_reindex,
            failed_files: outcome.failed_files.clone(),
            commit: advance,
        })
    }
}
