use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::error::AgentError;

/// Allow/deny gate consulted (and debited) before every provider call.
#[async_trait]
pub trait CreditGate: Send + Sync {
    /// Authorize one call and debit it. A denial is a non-retried turn failure.
    async fn authorize(&self, agent: &str, provider: &str) -> Result<(), AgentError>;
}

/// Gate used when no ledger is configured.
pub struct AllowAll;

#[async_trait]
impl CreditGate for AllowAll {
    async fn authorize(&self, _agent: &str, _provider: &str) -> Result<(), AgentError> {
        Ok(())
    }
}

/// In-memory budget of provider calls.
pub struct FixedBudget {
    remaining: AtomicU64,
}

impl FixedBudget {
    pub fn new(calls: u64) -> Self {
        Self {
            remaining: AtomicU64::new(calls),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CreditGate for FixedBudget {
    async fn authorize(&self, agent: &str, provider: &str) -> Result<(), AgentError> {
        let debited = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match debited {
            Ok(left) => {
                info!(agent, provider, remaining = left - 1, "Credit debited");
                Ok(())
            }
            Err(_) => Err(AgentError::CreditDenied {
                agent: agent.to_string(),
                reason: "credit budget exhausted".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_budget_denies_after_exhaustion() {
        let gate = FixedBudget::new(2);
        assert!(gate.authorize("bull", "main").await.is_ok());
        assert!(gate.authorize("bear", "main").await.is_ok());
        assert_eq!(gate.remaining(), 0);

        let err = gate.authorize("chair", "main").await.unwrap_err();
        assert!(matches!(err, AgentError::CreditDenied { .. }));
        assert_eq!(gate.remaining(), 0);
    }

    #[tokio::test]
    async fn allow_all_never_denies() {
        for _ in 0..100 {
            assert!(AllowAll.authorize("bull", "main").await.is_ok());
        }
    }
}
