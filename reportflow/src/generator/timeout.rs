//! Per-call timeout wrapper.

use super::{ContentGenerator, GenerationRequest, GenerationResponse};
use crate::errors::PassError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Bounds every call of an inner generator with a timeout.
///
/// An elapsed call surfaces as [`PassError::Timeout`], which the retry
/// combinator treats like a transport failure.
pub struct TimeoutGenerator {
    inner: Arc<dyn ContentGenerator>,
    timeout: Duration,
}

impl TimeoutGenerator {
    /// Wraps `inner` with the given timeout.
    #[must_use]
    pub fn new(inner: Arc<dyn ContentGenerator>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Returns the configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for TimeoutGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutGenerator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContentGenerator for TimeoutGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, PassError> {
        match tokio::time::timeout(self.timeout, self.inner.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(PassError::Timeout {
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
