//! The stop command sent back to the orchestrator once a proxy has drained.
use std::time;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::error::StopError;
use crate::retry::RetryPolicy;

/// The orchestrator's lifecycle engine, as seen from the drain coordinator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Ask the orchestrator to stop `service`. The orchestrator answers by firing a new
    /// lifecycle transition event for it.
    async fn request_stop(&self, service: &str) -> Result<(), StopError>;
}

/// Delivers stop requests as `POST {base_url}/services/{service}/stop`.
pub struct HttpOrchestrator {
    client: reqwest::Client,
    base_url: Url,
    retry_policy: RetryPolicy,
}

impl HttpOrchestrator {
    pub fn new(
        base_url: &str,
        request_timeout: time::Duration,
        retry_policy: RetryPolicy,
    ) -> Result<Self, StopError> {
        let base_url =
            Url::parse(base_url).map_err(|_| StopError::InvalidUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(StopError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .user_agent("proxy-drain")
            .timeout(request_timeout)
            .build()
            .map_err(StopError::ClientError)?;

        Ok(Self {
            client,
            base_url,
            retry_policy,
        })
    }

    fn stop_url(&self, service: &str) -> Result<Url, StopError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StopError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["services", service, "stop"]);
        Ok(url)
    }

    async fn send_stop(&self, url: &Url) -> Result<(), StopError> {
        let response = self
            .client
            .post(url.clone())
            .send()
            .await
            .map_err(|error| StopError::RetryableRequestError {
                error,
                retry_after: None,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if is_retryable_status(status) {
            Err(StopError::RetryableStatus {
                status,
                retry_after: parse_retry_after_header(response.headers()),
            })
        } else {
            Err(StopError::Rejected(status))
        }
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn request_stop(&self, service: &str) -> Result<(), StopError> {
        let url = self.stop_url(service)?;
        let mut attempt = 0;

        loop {
            match self.send_stop(&url).await {
                Ok(()) => {
                    debug!(service, attempt, "orchestrator accepted stop request");
                    return Ok(());
                }
                Err(error) if error.is_retryable() && self.retry_policy.should_retry(attempt) => {
                    let backoff = self
                        .retry_policy
                        .time_until_next_retry(attempt, error.retry_after());
                    warn!(service, attempt, ?backoff, %error, "retrying stop request");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Parse a Retry-After header given in seconds. HTTP dates are ignored and fall back to the
/// retry policy's own backoff.
fn parse_retry_after_header(header_map: &reqwest::header::HeaderMap) -> Option<time::Duration> {
    header_map
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(time::Duration::from_secs)
}
