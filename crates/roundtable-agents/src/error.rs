use roundtable_models::ConfigValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Provider transport error: {0}")]
    ProviderTransport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    #[error("Provider timed out after {0} ms")]
    Timeout(u64),

    #[error("Provider '{provider}' cannot accept images")]
    UnsupportedCapability { provider: String },

    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("Environment variable {0} holding the API key is not set")]
    MissingApiKey(String),

    #[error("Failed to read image {path}: {reason}")]
    Image { path: String, reason: String },

    #[error("Credit denied for {agent}: {reason}")]
    CreditDenied { agent: String, reason: String },

    #[error("Tool '{name}' timed out after {timeout_ms} ms")]
    ToolTimeout { name: String, timeout_ms: u64 },

    #[error("Tool transport error: {0}")]
    ToolTransport(String),

    #[error("News pipeline error: {0}")]
    News(String),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Session '{0}' is already running")]
    DuplicateSession(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Cancelled by session kill")]
    Cancelled,

    #[error("Archive error: {0}")]
    Store(#[from] roundtable_store::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Provider failures worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderTransport(_)
                | AgentError::ProviderStatus { .. }
                | AgentError::Timeout(_)
                | AgentError::Cli(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AgentError::Timeout(1000).is_transient());
        assert!(AgentError::ProviderStatus {
            status: 503,
            body: "overloaded".to_string()
        }
        .is_transient());
        assert!(AgentError::ProviderTransport("connection reset".to_string()).is_transient());

        assert!(!AgentError::UnsupportedCapability {
            provider: "text-only".to_string()
        }
        .is_transient());
        assert!(!AgentError::CreditDenied {
            agent: "bull".to_string(),
            reason: "budget exhausted".to_string()
        }
        .is_transient());
        assert!(!AgentError::Cancelled.is_transient());
    }
}
