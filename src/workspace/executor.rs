//! Execution of a [`SyncPlan`] against the remote provider.
//!
//! Each file is handled in isolation:
//! 1. Read it. A missing or oversized file is treated as removed.
//! 2. Chunk it and upload every chunk through the shared pool.
//! 3. Only after all chunks are stored does the new id list replace the old
//!    one. Any failure leaves the old entry in place.
//!
//! Stale ids are deleted only once every file has been processed, so a file
//! never loses its searchable content because of this process. Interrupting
//! between the two phases leaves duplicates, which reconciliation removes.

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::chunker::chunk_file;
use super::plan::SyncPlan;
use super::scanner::collect_file;
use super::upload::PassagePool;
use crate::api::MemoryProvider;
use crate::domain::{PassageMap, RepoConfig};

/// Receives per-file sync events.
pub trait SyncProgress: Send + Sync {
    fn on_file_synced(&self, _path: &str, _chunks: usize) {}
    fn on_file_removed(&self, _path: &str) {}
    fn on_file_failed(&self, _path: &str, _error: &anyhow::Error) {}
}

/// Ignores all progress events.
#[cfg(test)]
pub struct NoOpProgress;
#[cfg(test)]
impl SyncProgress for NoOpProgress {}

/// Reports progress through `tracing`.
pub struct LogProgress;
impl SyncProgress for LogProgress {
    fn on_file_synced(&self, path: &str, chunks: usize) {
        debug!("Indexed {} ({} chunks)", path, chunks);
    }

    fn on_file_removed(&self, path: &str) {
        debug!("Removed {}", path);
    }

    fn on_file_failed(&self, path: &str, error: &anyhow::Error) {
        warn!("Failed to sync {}: {:#}", path, error);
    }
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub passages: PassageMap,
    /// Commit the caller asked to stamp; passed through untouched.
    pub commit: Option<String>,
    pub files_removed: usize,
    pub files_reindexed: usize,
    pub full_reindex: bool,
    pub failed_files: Vec<String>,
    /// Stale passages deleted in the cleanup phase.
    pub passages_deleted: usize,
}

enum FileOutcome {
    Removed {
        path: String,
    },
    Reindexed {
        path: String,
        ids: Vec<String>,
    },
    Failed {
        path: String,
        /// Chunks of the failed upload that did get stored.
        orphaned: Vec<String>,
    },
}

pub struct SyncExecutor<'a> {
    pub config: &'a RepoConfig,
    pub agent_id: &'a str,
    pub provider: &'a dyn MemoryProvider,
    pub max_chunk_chars: usize,
    pub concurrency: usize,
    pub progress: &'a dyn SyncProgress,
}

impl SyncExecutor<'_> {
    pub async fn execute(
        &self,
        mut passages: PassageMap,
        plan: &SyncPlan,
        commit: Option<String>,
    ) -> SyncOutcome {
        let pool = PassagePool::new(self.provider, self.agent_id, self.concurrency);

        info!(
            "Syncing {} files{}",
            plan.files_to_reindex.len(),
            if plan.is_full_reindex {
                " (full reindex)"
            } else {
                ""
            }
        );

        // Collected before streaming; a lazy `map` here is not `Send`.
        let files: Vec<_> = plan
            .files_to_reindex
            .iter()
            .map(|path| self.process_file(&pool, path))
            .collect();
        let outcomes: Vec<FileOutcome> = stream::iter(files)
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;

        let mut stale: Vec<String> = Vec::new();
        let mut outcome = SyncOutcome {
            commit,
            full_reindex: plan.is_full_reindex,
            ..SyncOutcome::default()
        };

        for file in outcomes {
            match file {
                FileOutcome::Removed { path } => {
                    if let Some(old) = passages.remove(&path) {
                        stale.extend(old);
                        outcome.files_removed += 1;
                    }
                }
                FileOutcome::Reindexed { path, ids } => {
                    let old = if ids.is_empty() {
                        passages.remove(&path)
                    } else {
                        passages.insert(path, ids)
                    };
                    stale.extend(old.unwrap_or_default());
                    outcome.files_reindexed += 1;
                }
                FileOutcome::Failed { path, orphaned } => {
                    stale.extend(orphaned);
                    outcome.failed_files.push(path);
                }
            }
        }

        if !stale.is_empty() {
            outcome.passages_deleted = pool.delete_all(&stale).await;
            debug!(
                "Deleted {}/{} stale passages",
                outcome.passages_deleted,
                stale.len()
            );
        }

        outcome.failed_files.sort();
        outcome.passages = passages;
        outcome
    }

    async fn process_file(&self, pool: &PassagePool<'_>, path: &str) -> FileOutcome {
        let file = match collect_file(self.config, path).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                self.progress.on_file_removed(path);
                return FileOutcome::Removed {
                    path: path.to_string(),
                };
            }
            Err(e) => {
                self.progress.on_file_failed(path, &e);
                return FileOutcome::Failed {
                    path: path.to_string(),
                    orphaned: Vec::new(),
                };
            }
        };

        let chunks = chunk_file(&file.path, &file.content, self.max_chunk_chars);
        match pool.upload_chunks(&chunks).await {
            Ok(ids) => {
                self.progress.on_file_synced(path, ids.len());
                FileOutcome::Reindexed {
                    path: path.to_string(),
                    ids,
                }
            }
            Err(partial) => {
                self.progress.on_file_failed(path, &partial.error);
                FileOutcome::Failed {
                    path: path.to_string(),
                    orphaned: partial.uploaded,
                }
            }
        }
    }
}
