//! Drift detection between the local passage map and the remote store.
//!
//! Orphans are passages the server has but the map does not track, usually
//! left by a sync interrupted between upload and cleanup. Missing passages
//! are tracked locally but gone remotely.

use std::borrow::Cow;
use std::collections::HashSet;
use tracing::info;

use super::upload::PassagePool;
use crate::api::MemoryProvider;
use crate::domain::{PassageMap, RemotePassage};
use crate::state::{StateError, StateStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub orphan_passage_ids: Vec<String>,
    pub missing_passage_ids: Vec<String>,
    pub in_sync: bool,
}

/// Compare local bookkeeping with a remote listing. Makes no remote calls.
pub fn compute_reconcile_plan(local: &PassageMap, server: &[RemotePassage]) -> ReconcilePlan {
    let local_ids: HashSet<&str> = local.values().flatten().map(String::as_str).collect();
    let server_ids: HashSet<&str> = server.iter().map(|p| p.id.as_str()).collect();

    let orphan_passage_ids: Vec<String> = server
        .iter()
        .filter(|p| !local_ids.contains(p.id.as_str()))
        .map(|p| p.id.clone())
        .collect();

    let missing_passage_ids: Vec<String> = local
        .values()
        .flatten()
        .filter(|id| !server_ids.contains(id.as_str()))
        .cloned()
        .collect();

    let in_sync = orphan_passage_ids.is_empty() && missing_passage_ids.is_empty();
    ReconcilePlan {
        orphan_passage_ids,
        missing_passage_ids,
        in_sync,
    }
}

/// Strip `missing` ids from the map, dropping files left with no passages.
///
/// Returns the input map itself (`Cow::Borrowed`) when nothing needs
/// stripping.
pub fn clean_missing_from_map<'a>(map: &'a PassageMap, missing: &[String]) -> Cow<'a, PassageMap> {
    let missing: HashSet<&str> = missing.iter().map(String::as_str).collect();
    let touched = map
        .values()
        .flatten()
        .any(|id| missing.contains(id.as_str()));
    if !touched {
        return Cow::Borrowed(map);
    }

    let cleaned = map
        .iter()
        .filter_map(|(path, ids)| {
            let kept: Vec<String> = ids
                .iter()
                .filter(|id| !missing.contains(id.as_str()))
                .cloned()
                .collect();
            (!kept.is_empty()).then(|| (path.clone(), kept))
        })
        .collect();
    Cow::Owned(cleaned)
}

/// Delete orphans remotely (failures ignored) and return the map without
/// missing ids.
pub async fn fix_reconcile_drift<'a>(
    provider: &dyn MemoryProvider,
    agent_id: &str,
    map: &'a PassageMap,
    plan: &ReconcilePlan,
    concurrency: usize,
) -> Cow<'a, PassageMap> {
    if !plan.orphan_passage_ids.is_empty() {
        let pool = PassagePool::new(provider, agent_id, concurrency);
        let deleted = pool.delete_all(&plan.orphan_passage_ids).await;
        info!(
            "Deleted {}/{} orphan passages",
            deleted,
            plan.orphan_passage_ids.len()
        );
    }

    clean_missing_from_map(map, &plan.missing_passage_ids)
}

/// Strip `missing` ids from the stored map of `repo_name`.
///
/// Works on the map as re-read under the store lock, so entries a sync
/// rewrote after the remote listing keep their new ids. Returns whether
/// anything was written.
pub async fn strip_missing_in_store(
    store: &StateStore,
    repo_name: &str,
    missing: &[String],
) -> Result<bool, StateError> {
    store
        .update_agent_if(repo_name, |agent| {
            let cleaned = match clean_missing_from_map(&agent.passages, missing) {
                Cow::Owned(map) => map,
                Cow::Borrowed(_) => return false,
            };
            agent.passages = cleaned;
            true
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::InMemoryProvider;
    use crate::domain::AgentState;
    use tempfile::TempDir;

    fn map(entries: &[(&str, &[&str])]) -> PassageMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    fn remote(ids: &[&str]) -> Vec<RemotePassage> {
        ids.iter()
            .map(|id| RemotePassage {
                id: id.to_string(),
                text: None,
            })
            .collect()
    }

    #[test]
    fn test_orphans_detected() {
        let plan = compute_reconcile_plan(&map(&[("a", &["p1"])]), &remote(&["p1", "p2"]));
        assert_eq!(plan.orphan_passage_ids, vec!["p2".to_string()]);
        assert!(plan.missing_passage_ids.is_empty());
        assert!(!plan.in_sync);
    }

    #[test]
    fn test_missing_detected() {
        let plan = compute_reconcile_plan(&map(&[("a", &["p1", "p3"])]), &remote(&["p1"]));
        assert!(plan.orphan_passage_ids.is_empty());
        assert_eq!(plan.missing_passage_ids, vec!["p3".to_string()]);
        assert!(!plan.in_sync);
    }

    #[test]
    fn test_empty_is_in_sync() {
        let plan = compute_reconcile_plan(&PassageMap::new(), &[]);
        assert!(plan.in_sync);

        let plan = compute_reconcile_plan(&map(&[("a", &["p1"])]), &remote(&["p1"]));
        assert!(plan.in_sync);
    }

    #[test]
    fn test_clean_missing_removes_emptied_keys() {
        let m = map(&[("a", &["p1"]), ("b", &["p2", "p3"])]);
        let cleaned = clean_missing_from_map(&m, &["p1".to_string(), "p3".to_string()]);

        assert!(!cleaned.contains_key("a"));
        assert_eq!(cleaned["b"], vec!["p2".to_string()]);
    }

    #[test]
    fn test_clean_missing_single_key() {
        let m = map(&[("a", &["p1"])]);
        let cleaned = clean_missing_from_map(&m, &["p1".to_string()]);
        assert!(cleaned.is_empty());
    }

    #[test]
    fn test_clean_missing_noop_returns_same_map() {
        let m = map(&[("a", &["p1"])]);

        let cleaned = clean_missing_from_map(&m, &[]);
        assert!(matches!(cleaned, Cow::Borrowed(_)));
        assert!(std::ptr::eq(cleaned.as_ref(), &m));

        let cleaned = clean_missing_from_map(&m, &["unrelated".to_string()]);
        assert!(std::ptr::eq(cleaned.as_ref(), &m));
    }

    #[tokio::test]
    async fn test_fix_drift_deletes_orphans_and_strips_missing() {
        let provider = InMemoryProvider::new();
        provider.insert("p1", "kept");
        provider.insert("orphan", "left behind");

        let local = map(&[("a", &["p1"]), ("b", &["gone"])]);
        let listing = provider.list_passages("agent").await.unwrap();
        let plan = compute_reconcile_plan(&local, &listing);

        let fixed = fix_reconcile_drift(&provider, "agent", &local, &plan, 4).await;
        assert_eq!(provider.ids(), vec!["p1".to_string()]);
        assert_eq!(fixed.into_owned(), map(&[("a", &["p1"])]));
    }

    #[tokio::test]
    async fn test_fix_drift_ignores_delete_failures() {
        let provider = InMemoryProvider::new();
        *provider.fail_deletes.lock().unwrap() = true;

        let local = map(&[("a", &["p1"])]);
        let plan = ReconcilePlan {
            orphan_passage_ids: vec!["orphan".to_string()],
            missing_passage_ids: Vec::new(),
            in_sync: false,
        };

        let fixed = fix_reconcile_drift(&provider, "agent", &local, &plan, 4).await;
        assert!(std::ptr::eq(fixed.as_ref(), &local));
        assert_eq!(provider.delete_calls.lock().unwrap().len(), 1);
    }

    async fn store_with(dir: &TempDir, passages: PassageMap) -> StateStore {
        let store = StateStore::new(dir.path().join("state.json"));
        let mut agent = AgentState::new("agent", "demo");
        agent.passages = passages;
        assert!(store.insert_agent(agent).await.unwrap());
        store
    }

    #[tokio::test]
    async fn test_strip_missing_keeps_entries_rewritten_since_listing() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, map(&[("x", &["p1"]), ("y", &["gone"])])).await;
        let provider = InMemoryProvider::new();
        provider.insert("p1", "x");

        let snapshot = store.get_agent("demo").await.unwrap().unwrap();
        let listing = provider.list_passages("agent").await.unwrap();
        let plan = compute_reconcile_plan(&snapshot.passages, &listing);
        assert_eq!(plan.missing_passage_ids, vec!["gone".to_string()]);

        // A sync re-indexes x between the listing and the repair.
        store
            .update_agent("demo", |a| {
                a.passages.insert("x".to_string(), vec!["p2".to_string()]);
            })
            .await
            .unwrap();

        let changed = strip_missing_in_store(&store, "demo", &plan.missing_passage_ids)
            .await
            .unwrap();
        assert!(changed);
        let agent = store.get_agent("demo").await.unwrap().unwrap();
        assert_eq!(agent.passages, map(&[("x", &["p2"])]));
    }

    #[tokio::test]
    async fn test_strip_missing_skips_write_when_already_clean() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, map(&[("x", &["p1"])])).await;
        let before = std::fs::read_to_string(dir.path().join("state.json")).unwrap();

        let changed = strip_missing_in_store(&store, "demo", &["gone".to_string()])
            .await
            .unwrap();
        assert!(!changed);
        let after = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        assert_eq!(before, after);
    }
}
