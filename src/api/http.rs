//! Transport-level retry for memory server requests.

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Exponential backoff with up to 25% jitter.
#[derive(Debug, Clone, Copy)]
pub(super) struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        let base = self.base_delay.saturating_mul(factor);
        let jitter_ms = (base.as_millis() / 4).min(u128::from(u64::MAX)) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

fn is_retriable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_retriable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body()
}

/// Send a request, retrying transient failures. Non-retriable statuses are
/// returned to the caller as a response.
pub(super) async fn send_with_retry(
    policy: RetryPolicy,
    mut build: impl FnMut() -> reqwest::RequestBuilder,
) -> Result<reqwest::Response> {
    let mut attempt = 0;
    loop {
        let can_retry = attempt < policy.max_retries;
        match build().send().await {
            Ok(response) if can_retry && is_retriable_status(response.status()) => {
                let delay = policy.delay_for(attempt);
                debug!(
                    "Memory server returned {}; retrying in {:?} ({}/{})",
                    response.status(),
                    delay,
                    attempt + 1,
                    policy.max_retries
                );
                sleep(delay).await;
            }
            Ok(response) => return Ok(response),
            Err(err) if can_retry && is_retriable_error(&err) => {
                let delay = policy.delay_for(attempt);
                debug!(
                    "Memory server request error: {}; retrying in {:?} ({}/{})",
                    err,
                    delay,
                    attempt + 1,
                    policy.max_retries
                );
                sleep(delay).await;
            }
            Err(err) => {
                return Err(anyhow::Error::new(err))
                    .with_context(|| format!("Request failed after {} attempt(s)", attempt + 1));
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_with_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        let first = policy.delay_for(0);
        let third = policy.delay_for(2);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
    }

    #[test]
    fn test_retriable_statuses() {
        assert!(is_retriable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retriable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retriable_status(StatusCode::NOT_FOUND));
        assert!(!is_retriable_status(StatusCode::UNAUTHORIZED));
    }
}
