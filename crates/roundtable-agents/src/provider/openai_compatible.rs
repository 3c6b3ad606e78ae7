use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use roundtable_models::ProviderConfig;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{ensure_capability, ChatRequest, ProviderClient};
use crate::error::AgentError;

/// `POST {base_url}/chat/completions` against any OpenAI-compatible endpoint.
pub struct OpenAiCompatibleProvider {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    supports_vision: bool,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleProvider {
    pub fn from_config(
        name: &str,
        config: &ProviderConfig,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| AgentError::ProviderTransport(format!("provider {name} has no base_url")))?;
        validate_base_url(base_url)?;

        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var).map_err(|_| AgentError::MissingApiKey(var.clone()))?,
            ),
            None => None,
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::ProviderTransport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            supports_vision: config.supports_vision,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn build_body(&self, request: &ChatRequest) -> Result<Value, AgentError> {
        let user_content = if request.image_paths.is_empty() {
            Value::String(request.user_text.clone())
        } else {
            let mut parts = vec![json!({"type": "text", "text": request.user_text})];
            for path in &request.image_paths {
                let url = image_data_url(path).await?;
                parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
            }
            Value::Array(parts)
        };

        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": user_content},
            ],
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        Ok(body)
    }
}

fn validate_base_url(base_url: &str) -> Result<(), AgentError> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| AgentError::ProviderTransport(format!("Invalid base_url '{base_url}': {e}")))?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            warn!(base_url, "Using unencrypted HTTP for provider endpoint");
            Ok(())
        }
        scheme => Err(AgentError::ProviderTransport(format!(
            "Unsupported URL scheme '{scheme}' in base_url '{base_url}'"
        ))),
    }
}

/// Inline an image file as a base64 data URL.
async fn image_data_url(path: &str) -> Result<String, AgentError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| AgentError::Image {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let mime = match Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    };
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

fn truncate_body(body: &str) -> String {
    if body.len() <= 300 {
        return body.to_string();
    }
    let mut end = 300;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_vision(&self) -> bool {
        self.supports_vision
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, AgentError> {
        ensure_capability(self, request)?;
        let body = self.build_body(request).await?;

        let url = format!("{}/chat/completions", self.base_url);
        info!(provider = %self.name, model = %self.model, images = request.image_paths.len(), "Calling LLM API");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::ProviderTransport(format!("request timed out: {e}"))
            } else {
                AgentError::ProviderTransport(e.to_string())
            }
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::ProviderTransport(e.to_string()))?;
        if !status.is_success() {
            warn!(provider = %self.name, status = %status, "Provider API error");
            return Err(AgentError::ProviderStatus {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        let data: Value = serde_json::from_str(&text)?;
        let content = data["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(AgentError::ProviderTransport(
                "Provider returned an empty completion".to_string(),
            ));
        }
        debug!(provider = %self.name, chars = content.len(), "Provider response received");
        Ok(content.to_string())
    }
}
