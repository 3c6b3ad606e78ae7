pub mod claude_cli;
pub mod openai_compatible;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roundtable_models::{ProviderConfig, ProviderKind, RoundtableConfig};

use crate::error::AgentError;

pub use claude_cli::ClaudeCliProvider;
pub use openai_compatible::OpenAiCompatibleProvider;

/// One completion request. Images are file paths, read by the provider at call time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub user_text: String,
    pub image_paths: Vec<String>,
}

impl ChatRequest {
    pub fn new(system_prompt: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_text: user_text.into(),
            image_paths: Vec::new(),
        }
    }

    pub fn with_images(mut self, image_paths: Vec<String>) -> Self {
        self.image_paths = image_paths;
        self
    }
}

/// Uniform chat interface to one LLM backend. Mockable for testing.
///
/// Each `chat` makes exactly one outbound request; retries belong to the caller.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;
    fn supports_vision(&self) -> bool;

    async fn chat(&self, request: &ChatRequest) -> Result<String, AgentError>;
}

/// Refuse image input on a text-only provider before any I/O happens.
pub fn ensure_capability(
    provider: &dyn ProviderClient,
    request: &ChatRequest,
) -> Result<(), AgentError> {
    if !request.image_paths.is_empty() && !provider.supports_vision() {
        return Err(AgentError::UnsupportedCapability {
            provider: provider.name().to_string(),
        });
    }
    Ok(())
}

pub fn build_provider(
    name: &str,
    config: &ProviderConfig,
    timeout: Duration,
) -> Result<Arc<dyn ProviderClient>, AgentError> {
    let provider: Arc<dyn ProviderClient> = match config.kind {
        ProviderKind::OpenaiCompatible => {
            Arc::new(OpenAiCompatibleProvider::from_config(name, config, timeout)?)
        }
        ProviderKind::ClaudeCli => Arc::new(ClaudeCliProvider::from_config(name, config, timeout)),
    };
    Ok(provider)
}

/// Build every provider in the registry, keyed by registry name.
pub fn build_providers(
    config: &RoundtableConfig,
) -> Result<HashMap<String, Arc<dyn ProviderClient>>, AgentError> {
    let timeout = Duration::from_millis(config.roundtable.llm_timeout_ms);
    config
        .providers
        .iter()
        .map(|(name, provider)| Ok((name.clone(), build_provider(name, provider, timeout)?)))
        .collect()
}
