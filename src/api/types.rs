//! Request and response types for the memory server's passage endpoints.

use serde::{Deserialize, Serialize};

/// Body of a passage insert.
#[derive(Debug, Serialize)]
pub(super) struct StorePassageRequest<'a> {
    pub text: &'a str,
}

/// A passage as returned by the server. Extra fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct PassageResponse {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Inserts return a list of created passages on current servers and a single
/// object on older ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum StorePassageResponse {
    Many(Vec<PassageResponse>),
    One(PassageResponse),
}

impl StorePassageResponse {
    pub fn first_id(self) -> Option<String> {
        match self {
            StorePassageResponse::Many(list) => list.into_iter().next().map(|p| p.id),
            StorePassageResponse::One(p) => Some(p.id),
        }
    }
}

/// Non-success response from the memory server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[error("{method} {url} returned no passage id")]
    MissingId { method: &'static str, url: String },
}

impl ApiError {
    /// Whether re-trying with the same credentials is pointless.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Status { status: 401 | 403, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_response_shapes() {
        let many: StorePassageResponse =
            serde_json::from_str(r#"[{"id": "passage-1", "text": "a", "agent_id": "x"}]"#)
                .unwrap();
        assert_eq!(many.first_id().as_deref(), Some("passage-1"));

        let one: StorePassageResponse = serde_json::from_str(r#"{"id": "passage-2"}"#).unwrap();
        assert_eq!(one.first_id().as_deref(), Some("passage-2"));

        let empty: StorePassageResponse = serde_json::from_str("[]").unwrap();
        assert_eq!(empty.first_id(), None);
    }

    #[test]
    fn test_auth_failure() {
        let err = ApiError::Status {
            method: "GET",
            url: "http://localhost/v1".to_string(),
            status: 401,
            body: String::new(),
        };
        assert!(err.is_auth_failure());
    }
}
