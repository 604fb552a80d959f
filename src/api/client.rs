//! HTTP implementation of [`MemoryProvider`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::http::{send_with_retry, RetryPolicy};
use super::types::{ApiError, PassageResponse, StorePassageRequest, StorePassageResponse};
use super::MemoryProvider;
use crate::domain::RemotePassage;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Page size for passage listing.
const LIST_PAGE_SIZE: usize = 100;

const USER_AGENT: &str = concat!("memsync/", env!("CARGO_PKG_VERSION"));

/// Memory server client scoped to one base URL and credential.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Clone)]
pub struct HttpMemoryProvider {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpMemoryProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid server URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Server URL cannot be used as a base: {}", base_url);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
            retry: RetryPolicy::default(),
        })
    }

    /// `<base>/v1/agents/<agent_id>/archival-memory[/<extra>...]`, with segments escaped.
    fn archival_url(&self, agent_id: &str, extra: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Server URL cannot be used as a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v1", "agents", agent_id, "archival-memory"])
            .extend(extra);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn status_error(method: &'static str, url: &Url, response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        ApiError::Status {
            method,
            url: url.to_string(),
            status,
            body,
        }
    }
}

#[async_trait]
impl MemoryProvider for HttpMemoryProvider {
    async fn store_passage(&self, agent_id: &str, text: &str) -> Result<String> {
        let url = self.archival_url(agent_id, &[])?;
        let body = StorePassageRequest { text };

        let response = send_with_retry(self.retry, || {
            self.authorize(self.client.post(url.clone())).json(&body)
        })
        .await?;

        if !response.status().is_success() {
            return Err(Self::status_error("POST", &url, response).await.into());
        }

        let parsed: StorePassageResponse = response
            .json()
            .await
            .context("Failed to parse passage insert response")?;
        parsed.first_id().ok_or_else(|| {
            ApiError::MissingId {
                method: "POST",
                url: url.to_string(),
            }
            .into()
        })
    }

    async fn delete_passage(&self, agent_id: &str, passage_id: &str) -> Result<()> {
        let url = self.archival_url(agent_id, &[passage_id])?;

        let response =
            send_with_retry(self.retry, || self.authorize(self.client.delete(url.clone()))).await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::status_error("DELETE", &url, response).await.into())
    }

    async fn list_passages(&self, agent_id: &str) -> Result<Vec<RemotePassage>> {
        let base = self.archival_url(agent_id, &[])?;
        let mut passages: Vec<RemotePassage> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = base.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("limit", &LIST_PAGE_SIZE.to_string());
                if let Some(after) = &cursor {
                    query.append_pair("after", after);
                }
            }

            let response =
                send_with_retry(self.retry, || self.authorize(self.client.get(url.clone())))
                    .await?;
            if !response.status().is_success() {
                return Err(Self::status_error("GET", &url, response).await.into());
            }

            let page: Vec<PassageResponse> = response
                .json()
                .await
                .context("Failed to parse passage listing")?;
            let page_len = page.len();
            let last_id = page.last().map(|p| p.id.clone());

            passages.extend(page.into_iter().map(|p| RemotePassage {
                id: p.id,
                text: p.text,
            }));

            if page_len < LIST_PAGE_SIZE || last_id.is_none() || last_id == cursor {
                break;
            }
            cursor = last_id;
        }

        debug!("Listed {} passages for agent {}", passages.len(), agent_id);
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archival_url() {
        let provider = HttpMemoryProvider::new("http://localhost:8283", None).unwrap();
        let url = provider.archival_url("agent-1", &[]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8283/v1/agents/agent-1/archival-memory"
        );

        let url = provider.archival_url("agent-1", &["passage/2"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8283/v1/agents/agent-1/archival-memory/passage%2F2"
        );
    }

    #[test]
    fn test_archival_url_keeps_base_prefix() {
        let provider = HttpMemoryProvider::new("https://memory.example.com/api/", None).unwrap();
        let url = provider.archival_url("a", &[]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://memory.example.com/api/v1/agents/a/archival-memory"
        );
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(HttpMemoryProvider::new("not a url", None).is_err());
        assert!(HttpMemoryProvider::new("mailto:someone@example.com", None).is_err());
    }
}
