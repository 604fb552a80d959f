//! Bounded-concurrency passage uploads and deletions.
//!
//! One [`PassagePool`] is created per sync run. Every remote call made by
//! the run, uploads and deletions alike, takes a permit from the same
//! semaphore, so the number of in-flight requests stays at the pool width
//! however many files are being processed.

use anyhow::{anyhow, Result};
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::api::MemoryProvider;
use crate::domain::Chunk;

/// Default number of remote calls in flight per sync run.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Upload of a file's chunks that did not fully succeed.
#[derive(Debug)]
pub struct PartialUpload {
    /// Ids of chunks that were stored before or alongside the failure.
    pub uploaded: Vec<String>,
    pub error: anyhow::Error,
}

pub struct PassagePool<'a> {
    provider: &'a dyn MemoryProvider,
    agent_id: &'a str,
    permits: Semaphore,
}

impl<'a> PassagePool<'a> {
    pub fn new(provider: &'a dyn MemoryProvider, agent_id: &'a str, width: usize) -> Self {
        Self {
            provider,
            agent_id,
            permits: Semaphore::new(width.max(1)),
        }
    }

    async fn store(&self, text: &str) -> Result<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| anyhow!("upload pool closed"))?;
        self.provider.store_passage(self.agent_id, text).await
    }

    /// Upload all chunks concurrently. On success the ids are in chunk order.
    pub async fn upload_chunks(&self, chunks: &[Chunk]) -> Result<Vec<String>, PartialUpload> {
        let results = join_all(chunks.iter().map(|c| self.store(&c.text))).await;

        let mut uploaded = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(id) => uploaded.push(id),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(uploaded),
            Some(error) => Err(PartialUpload { uploaded, error }),
        }
    }

    /// Delete passages, ignoring failures. Returns how many deletes succeeded.
    pub async fn delete_all(&self, ids: &[String]) -> usize {
        let results = join_all(ids.iter().map(|id| async move {
            let Ok(_permit) = self.permits.acquire().await else {
                return false;
            };
            match self.provider.delete_passage(self.agent_id, id).await {
                Ok(()) => true,
                Err(e) => {
                    debug!("Ignoring failed delete of passage {}: {:#}", id, e);
                    false
                }
            }
        }))
        .await;

        results.into_iter().filter(|deleted| *deleted).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::InMemoryProvider;
    use std::sync::atomic::Ordering;

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .map(|t| Chunk {
                text: t.to_string(),
                source_path: "f.rs".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_upload_preserves_chunk_order() {
        let provider = InMemoryProvider::new();
        let pool = PassagePool::new(&provider, "agent", 4);

        let ids = pool
            .upload_chunks(&chunks(&["one", "two", "three"]))
            .await
            .unwrap();
        let texts: Vec<String> = ids.iter().map(|id| provider.text(id).unwrap()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_partial_upload_reports_stored_ids() {
        let provider = InMemoryProvider::new();
        provider.fail_store_when_text_contains("bad");
        let pool = PassagePool::new(&provider, "agent", 4);

        let err = pool
            .upload_chunks(&chunks(&["good-1", "bad", "good-2"]))
            .await
            .unwrap_err();
        assert_eq!(err.uploaded.len(), 2);
        assert!(err.error.to_string().contains("injected"));
    }

    #[tokio::test]
    async fn test_pool_width_bounds_in_flight_calls() {
        let provider = InMemoryProvider::new();
        let pool = PassagePool::new(&provider, "agent", 3);
        let many: Vec<String> = (0..50).map(|i| format!("chunk {}", i)).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();

        pool.upload_chunks(&chunks(&refs)).await.unwrap();
        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(provider.ids().len(), 50);
    }

    #[tokio::test]
    async fn test_delete_all_swallows_failures() {
        let provider = InMemoryProvider::new();
        provider.insert("p1", "x");
        let pool = PassagePool::new(&provider, "agent", 2);

        let deleted = pool
            .delete_all(&["p1".to_string(), "already-gone".to_string()])
            .await;
        assert_eq!(deleted, 1);
        assert!(provider.ids().is_empty());
    }
}
