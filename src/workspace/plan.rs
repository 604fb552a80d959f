//! Classification of sync work before anything touches the network.

use std::collections::HashSet;

use crate::domain::PassageMap;

/// Changed-file count above which a sync is treated as a full reindex.
pub const DEFAULT_FULL_REINDEX_THRESHOLD: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Existing passage ids of every changed file that is already tracked.
    pub passages_to_delete: Vec<String>,
    pub files_to_reindex: Vec<String>,
    pub is_full_reindex: bool,
}

/// Decide what a sync over `changed` would delete and re-index.
///
/// `changed` must already be deduplicated. A count exactly at `threshold`
/// is not a full reindex.
pub fn compute_sync_plan(passages: &PassageMap, changed: &[String], threshold: usize) -> SyncPlan {
    let changed_set: HashSet<&str> = changed.iter().map(String::as_str).collect();

    let passages_to_delete = passages
        .iter()
        .filter(|(path, _)| changed_set.contains(path.as_str()))
        .flat_map(|(_, ids)| ids.iter().cloned())
        .collect();

    SyncPlan {
        passages_to_delete,
        files_to_reindex: changed.to_vec(),
        is_full_reindex: changed.len() > threshold,
    }
}

/// Remove duplicates, keeping first occurrences in order.
pub fn dedupe_paths(paths: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}
