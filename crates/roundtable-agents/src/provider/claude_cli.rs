use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use roundtable_models::ProviderConfig;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ensure_capability, ChatRequest, ProviderClient};
use crate::error::AgentError;

#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    /// Binary to run; resolved through PATH.
    pub program: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            timeout: Duration::from_secs(45),
        }
    }
}

/// Provider settings the CLI has no flag for.
fn ignored_settings(provider: &ProviderConfig) -> Vec<&'static str> {
    let mut ignored = Vec::new();
    if provider.supports_vision {
        ignored.push("supports_vision");
    }
    if provider.temperature.is_some() {
        ignored.push("temperature");
    }
    if provider.max_tokens.is_some() {
        ignored.push("max_tokens");
    }
    ignored
}

/// Provider backed by a local `claude` CLI subprocess, one process per call. Text only.
pub struct ClaudeCliProvider {
    name: String,
    config: ClaudeCliConfig,
}

impl ClaudeCliProvider {
    pub fn new(name: impl Into<String>, config: ClaudeCliConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn from_config(name: &str, provider: &ProviderConfig, timeout: Duration) -> Self {
        let ignored = ignored_settings(provider);
        if !ignored.is_empty() {
            warn!(provider = name, settings = ?ignored, "Claude CLI provider ignores these settings");
        }
        Self::new(
            name,
            ClaudeCliConfig {
                model: provider.model.clone(),
                timeout,
                ..ClaudeCliConfig::default()
            },
        )
    }

    fn args(&self, request: &ChatRequest) -> Vec<String> {
        vec![
            "-p".to_string(),
            request.user_text.clone(),
            "--system-prompt".to_string(),
            request.system_prompt.clone(),
            "--model".to_string(),
            self.config.model.clone(),
            "--output-format".to_string(),
            "text".to_string(),
        ]
    }

    /// Whether the configured binary runs at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.config.program)
            .arg("--version")
            .output()
            .await
            .is_ok_and(|output| output.status.success())
    }
}

#[async_trait]
impl ProviderClient for ClaudeCliProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_vision(&self) -> bool {
        false
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, AgentError> {
        ensure_capability(self, request)?;
        debug!(provider = %self.name, model = %self.config.model, "Spawning claude CLI");

        let spawned = Command::new(&self.config.program)
            .args(self.args(request))
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.config.timeout, spawned)
            .await
            .map_err(|_| AgentError::Timeout(self.config.timeout.as_millis() as u64))?
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    AgentError::Cli(format!("'{}' not found on PATH", self.config.program))
                }
                _ => AgentError::Cli(format!("failed to spawn '{}': {e}", self.config.program)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(provider = %self.name, status = %output.status, "Claude CLI exited with failure");
            return Err(AgentError::Cli(format!(
                "{} exited {}: {}",
                self.config.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(AgentError::Cli("empty response".to_string()));
        }
        Ok(stdout.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_models::ProviderKind;

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::ClaudeCli,
            base_url: None,
            api_key_env: None,
            model: "claude-sonnet-4-5".to_string(),
            supports_vision: false,
            temperature: None,
            max_tokens: None,
        }
    }

    fn missing_binary() -> ClaudeCliProvider {
        ClaudeCliProvider::new(
            "cli",
            ClaudeCliConfig {
                program: "roundtable-no-such-claude".to_string(),
                ..ClaudeCliConfig::default()
            },
        )
    }

    #[test]
    fn from_config_uses_model_and_timeout() {
        let provider =
            ClaudeCliProvider::from_config("cli", &provider_config(), Duration::from_millis(1500));
        assert_eq!(provider.config.program, "claude");
        assert_eq!(provider.config.model, "claude-sonnet-4-5");
        assert_eq!(provider.config.timeout, Duration::from_millis(1500));
        assert!(!provider.supports_vision());
    }

    #[test]
    fn sampling_and_vision_settings_are_reported_as_ignored() {
        assert!(ignored_settings(&provider_config()).is_empty());

        let tuned = ProviderConfig {
            supports_vision: true,
            temperature: Some(0.2),
            max_tokens: Some(512),
            ..provider_config()
        };
        assert_eq!(
            ignored_settings(&tuned),
            vec!["supports_vision", "temperature", "max_tokens"]
        );
    }

    #[test]
    fn args_carry_prompts_and_model() {
        let provider = ClaudeCliProvider::new("cli", ClaudeCliConfig::default());
        let args = provider.args(&ChatRequest::new("be terse", "BTC?"));
        assert_eq!(args[1], "BTC?");
        assert_eq!(args[3], "be terse");
        assert_eq!(args[5], "claude-3-5-haiku-latest");
    }

    #[tokio::test]
    async fn missing_binary_is_a_cli_error() {
        let provider = missing_binary();
        assert!(!provider.is_available().await);
        let err = provider.chat(&ChatRequest::new("sys", "user")).await.unwrap_err();
        assert!(matches!(err, AgentError::Cli(ref msg) if msg.contains("not found")), "{err}");
    }

    #[tokio::test]
    async fn images_rejected_without_spawning() {
        let request = ChatRequest::new("sys", "user").with_images(vec!["chart.png".to_string()]);
        let err = missing_binary().chat(&request).await.unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedCapability { .. }));
    }
}
