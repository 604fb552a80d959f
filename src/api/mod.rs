//! Remote memory provider.
//!
//! The sync engine only needs three passage operations from the memory
//! server: store, delete and list. [`MemoryProvider`] is that seam;
//! [`HttpMemoryProvider`] implements it over the server's REST API.

mod client;
mod http;
mod types;

pub use client::HttpMemoryProvider;
pub use types::ApiError;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::RemotePassage;

/// Passage storage for an agent's archival memory.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Store one passage and return its id.
    async fn store_passage(&self, agent_id: &str, text: &str) -> Result<String>;

    /// Delete one passage. Deleting a passage that is already gone may fail;
    /// callers in cleanup paths ignore that.
    async fn delete_passage(&self, agent_id: &str, passage_id: &str) -> Result<()>;

    /// List every passage stored for the agent.
    async fn list_passages(&self, agent_id: &str) -> Result<Vec<RemotePassage>>;
}
