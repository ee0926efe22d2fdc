//! Timeout and retry policy
//!
//! One ordered list of attempt timeouts plus a retryability predicate, shared
//! by every backend call so the escalation ladder lives in exactly one place.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use super::BackendError;

/// First-attempt timeout for ordinary models.
const BASE_TIMEOUT: Duration = Duration::from_secs(10);
/// First-attempt timeout for models matched by the slow-name heuristic.
const SLOW_MODEL_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for the single retry after a first-attempt timeout.
const RETRY_TIMEOUT: Duration = Duration::from_secs(45);

/// Name fragments that mark a model as slow to first token. Large parameter
/// counts and reasoning models routinely blow the base timeout on CPU hosts.
const SLOW_NAME_PATTERNS: &[&str] = &["14b", "27b", "32b", "70b", "72b", "deepseek-r1", "qwq"];

/// Ordered attempt timeouts with a fixed retryability rule: only a timeout
/// earns another attempt, every other fault resolves immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    timeouts: Vec<Duration>,
}

impl RetryPolicy {
    /// Ladder tuned to a backend model's name.
    pub fn for_model(model_name: &str) -> Self {
        let lower = model_name.to_lowercase();
        let first = if SLOW_NAME_PATTERNS.iter().any(|p| lower.contains(p)) {
            SLOW_MODEL_TIMEOUT
        } else {
            BASE_TIMEOUT
        };
        Self {
            timeouts: vec![first, RETRY_TIMEOUT],
        }
    }

    pub fn is_retryable(error: &BackendError) -> bool {
        matches!(error, BackendError::Timeout)
    }

    /// Run `attempt` under each timeout in order until it succeeds or a
    /// non-retryable fault occurs. A deadline miss counts as
    /// [`BackendError::Timeout`].
    pub async fn run<F, Fut>(&self, mut attempt: F) -> Result<String, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, BackendError>>,
    {
        let last = self.timeouts.len() - 1;
        for (i, limit) in self.timeouts.iter().enumerate() {
            let result = match timeout(*limit, attempt()).await {
                Ok(r) => r,
                Err(_) => Err(BackendError::Timeout),
            };
            match result {
                Ok(text) => return Ok(text),
                Err(e) if Self::is_retryable(&e) && i < last => {
                    warn!(
                        "Translation attempt timed out after {:?}, retrying with {:?}",
                        limit,
                        self.timeouts[i + 1]
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(BackendError::Timeout)
    }
}
