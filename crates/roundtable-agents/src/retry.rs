use std::time::Duration;

use roundtable_models::RoundtableSettings;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::credit::CreditGate;
use crate::error::AgentError;
use crate::provider::{ensure_capability, ChatRequest, ProviderClient};

/// Per-call timeout and retry budget for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RoundtableSettings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.llm_timeout_ms),
            retries: settings.llm_retries,
            backoff: Duration::from_millis(settings.llm_retry_backoff_ms),
        }
    }
}

/// Call `provider` until it succeeds, a non-transient error occurs, retries run out,
/// or the session is killed. Capability is checked once up front; each attempt is then
/// authorized by `credit`.
pub async fn chat_with_retry(
    provider: &dyn ProviderClient,
    request: &ChatRequest,
    policy: &RetryPolicy,
    credit: &dyn CreditGate,
    agent: &str,
    cancel: &CancellationToken,
) -> Result<String, AgentError> {
    ensure_capability(provider, request)?;
    let attempts = policy.retries + 1;
    let mut last_error = None;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        credit.authorize(agent, provider.name()).await?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            outcome = tokio::time::timeout(policy.timeout, provider.chat(request)) => outcome,
        };

        let err = match outcome {
            Ok(Ok(text)) => {
                debug!(agent, provider = provider.name(), attempt, "Provider call succeeded");
                return Ok(text);
            }
            Ok(Err(e)) => e,
            Err(_) => AgentError::Timeout(policy.timeout.as_millis() as u64),
        };

        if !err.is_transient() {
            return Err(err);
        }
        warn!(agent, provider = provider.name(), attempt, attempts, error = %err, "Provider call failed");
        last_error = Some(err);

        if attempt < attempts && !policy.backoff.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(policy.backoff) => {}
            }
        }
    }

    Err(last_error.unwrap_or(AgentError::Timeout(policy.timeout.as_millis() as u64)))
}
