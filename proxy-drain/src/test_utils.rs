use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::StopError;
use crate::orchestrator::Orchestrator;

/// An [`Orchestrator`] that records stop requests instead of delivering them.
/// While failing, every request is recorded and answered with a retryable error.
#[derive(Clone, Default)]
pub struct RecordingOrchestrator {
    requests: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Services a stop was requested for, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Orchestrator for RecordingOrchestrator {
    async fn request_stop(&self, service: &str) -> Result<(), StopError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(service.to_owned());

        if self.failing.load(Ordering::SeqCst) {
            return Err(StopError::RetryableStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                retry_after: None,
            });
        }
        Ok(())
    }
}
