use std::io;
use std::time;

use reqwest::StatusCode;
use thiserror::Error;

/// Enumeration of errors returned when asking the orchestrator to stop a service.
#[derive(Error, Debug)]
pub enum StopError {
    #[error("{0} is not a valid orchestrator url")]
    InvalidUrl(String),
    #[error("failed to construct http client for the orchestrator")]
    ClientError(#[source] reqwest::Error),
    #[error("a stop request could not be delivered but it could be retried later: {error}")]
    RetryableRequestError {
        error: reqwest::Error,
        retry_after: Option<time::Duration>,
    },
    #[error("orchestrator responded with {status}, stop request can be retried later")]
    RetryableStatus {
        status: StatusCode,
        retry_after: Option<time::Duration>,
    },
    #[error("orchestrator rejected the stop request with {0}")]
    Rejected(StatusCode),
}

impl StopError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StopError::RetryableRequestError { .. } | StopError::RetryableStatus { .. }
        )
    }

    /// The interval requested by the orchestrator before the next attempt, if any.
    pub fn retry_after(&self) -> Option<time::Duration> {
        match self {
            StopError::RetryableRequestError { retry_after, .. }
            | StopError::RetryableStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Enumeration of errors related to the agent-check listener.
#[derive(Error, Debug)]
pub enum AgentCheckError {
    #[error("could not open agent-check socket on {address}: {error}")]
    BindError { address: String, error: io::Error },
    #[error("agent-check connection failed: {0}")]
    ConnectionError(#[from] io::Error),
    #[error("agent-check connection timed out after {0:?}")]
    TimeoutError(time::Duration),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid proxy state")]
pub struct ParseProxyStateError(pub String);
