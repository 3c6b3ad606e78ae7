use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use roundtable_models::{AgentSpec, ToolBinding, ToolCallOutcome, ToolCallRequest};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AgentError;

const SUMMARY_CHARS: usize = 400;

/// Executes one tool call against a bound endpoint. Mockable for testing.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call(&self, binding: &ToolBinding, arguments: &Value) -> Result<Value, AgentError>;
}

/// MCP streamable-HTTP style transport: one JSON-RPC `tools/call` POST per call.
pub struct McpHttpTransport {
    client: Client,
    next_id: AtomicU64,
}

impl McpHttpTransport {
    pub fn new() -> Result<Self, AgentError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AgentError::ToolTransport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl ToolTransport for McpHttpTransport {
    async fn call(&self, binding: &ToolBinding, arguments: &Value) -> Result<Value, AgentError> {
        let arguments = match arguments {
            Value::Null => json!({}),
            Value::Object(_) => arguments.clone(),
            other => {
                return Err(AgentError::ToolTransport(format!(
                    "tool arguments must be an object, got: {other}"
                )))
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": binding.name, "arguments": arguments},
        });

        debug!(tool = %binding.name, endpoint = %binding.endpoint, "MCP tools/call");
        let resp = self
            .client
            .post(&binding.endpoint)
            .header("Accept", "application/json, text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ToolTransport(format!("MCP tools/call failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::ToolTransport(e.to_string()))?;
        if !status.is_success() {
            return Err(AgentError::ToolTransport(format!(
                "MCP server returned HTTP {status}"
            )));
        }

        let envelope: Value = serde_json::from_str(sse_payload(&text))?;
        if let Some(error) = envelope.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown MCP error");
            return Err(AgentError::ToolTransport(message.to_string()));
        }
        let result = envelope.get("result").cloned().unwrap_or(Value::Null);
        if result["isError"].as_bool().unwrap_or(false) {
            return Err(AgentError::ToolTransport(content_text(&result)));
        }
        Ok(result)
    }
}

/// Streamable-HTTP servers may answer with a single SSE `data:` frame.
fn sse_payload(body: &str) -> &str {
    body.lines()
        .find_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .unwrap_or(body)
}

/// Join the text parts of an MCP `content` array, or render the value as JSON.
fn content_text(result: &Value) -> String {
    match result.get("content").and_then(Value::as_array) {
        Some(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    }
}

fn summarize(text: &str) -> String {
    if text.chars().count() <= SUMMARY_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SUMMARY_CHARS).collect();
    format!("{cut}...")
}

/// Runs an agent's requested tool calls with a concurrency cap and per-call timeout.
///
/// Results mirror request order. A failing or timed-out call only fails itself.
pub struct ToolInvoker {
    transport: Arc<dyn ToolTransport>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(transport: Arc<dyn ToolTransport>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            transport,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        }
    }

    /// Whether at least one requested tool is bound to `agent`.
    pub fn any_callable(agent: &AgentSpec, calls: &[ToolCallRequest]) -> bool {
        calls.iter().any(|c| agent.has_tool(&c.name))
    }

    pub async fn invoke(
        &self,
        agent: &AgentSpec,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Vec<ToolCallOutcome> {
        let futures = calls.iter().map(|call| self.invoke_one(agent, call, cancel));
        join_all(futures).await
    }

    async fn invoke_one(
        &self,
        agent: &AgentSpec,
        call: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> ToolCallOutcome {
        let Some(binding) = agent.tool(&call.name) else {
            return failed(
                &call.name,
                format!("tool '{}' is not bound to agent {}", call.name, agent.name),
            );
        };

        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return failed(&call.name, "tool invoker shut down".to_string()),
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.transport.call(binding, &call.arguments)) => {
                result.unwrap_or_else(|_| Err(AgentError::ToolTimeout {
                    name: call.name.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }))
            }
        };

        match result {
            Ok(output) => ToolCallOutcome {
                name: call.name.clone(),
                ok: true,
                summary: summarize(&content_text(&output)),
                output: Some(output),
            },
            Err(e) => {
                warn!(agent = %agent.name, tool = %call.name, error = %e, "Tool call failed");
                failed(&call.name, e.to_string())
            }
        }
    }
}

fn failed(name: &str, message: String) -> ToolCallOutcome {
    ToolCallOutcome {
        name: name.to_string(),
        ok: false,
        summary: message,
        output: None,
    }
}

/// Render tool results for the follow-up completion pass.
pub fn render_results(results: &[ToolCallOutcome]) -> String {
    let mut out = String::from("## Tool results\n");
    for result in results {
        let status = if result.ok { "ok" } else { "error" };
        let body = match &result.output {
            Some(output) => content_text(output),
            None => result.summary.clone(),
        };
        out.push_str(&format!("### {} ({status})\n{body}\n\n", result.name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{agent_with_tools, MockToolTransport};

    fn request(name: &str) -> ToolCallRequest {
        ToolCallRequest {
            name: name.to_string(),
            arguments: json!({"symbol": "BTCUSDT"}),
        }
    }

    #[tokio::test]
    async fn results_mirror_request_order() {
        let transport = Arc::new(
            MockToolTransport::new()
                .with_text("ohlcv", "o=1 h=2 l=0.5 c=1.8")
                .with_delay("ohlcv", Duration::from_millis(40))
                .with_text("funding", "0.01%"),
        );
        let invoker = ToolInvoker::new(transport, 4, Duration::from_secs(1));
        let agent = agent_with_tools("quant", &["ohlcv", "funding"]);

        let results = invoker
            .invoke(
                &agent,
                &[request("ohlcv"), request("funding")],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "ohlcv");
        assert_eq!(results[1].name, "funding");
        assert!(results.iter().all(|r| r.ok));
        assert_eq!(results[1].summary, "0.01%");
    }

    #[tokio::test]
    async fn timeout_fails_only_that_call() {
        let transport = Arc::new(
            MockToolTransport::new()
                .with_text("slow", "late")
                .with_delay("slow", Duration::from_secs(5))
                .with_text("fast", "ok"),
        );
        let invoker = ToolInvoker::new(transport, 2, Duration::from_millis(50));
        let agent = agent_with_tools("quant", &["slow", "fast"]);

        let results = invoker
            .invoke(&agent, &[request("slow"), request("fast")], &CancellationToken::new())
            .await;

        assert!(!results[0].ok);
        assert!(results[0].summary.contains("timed out"));
        assert!(results[1].ok);
    }

    #[tokio::test]
    async fn unbound_tool_is_reported_not_called() {
        let transport = Arc::new(MockToolTransport::new().with_text("ohlcv", "data"));
        let invoker = ToolInvoker::new(transport.clone(), 2, Duration::from_secs(1));
        let agent = agent_with_tools("quant", &["ohlcv"]);

        let results = invoker
            .invoke(&agent, &[request("shell"), request("ohlcv")], &CancellationToken::new())
            .await;

        assert!(!results[0].ok);
        assert!(results[0].summary.contains("not bound"));
        assert!(results[1].ok);
        assert_eq!(transport.calls(), vec!["ohlcv".to_string()]);
        assert!(ToolInvoker::any_callable(&agent, &[request("ohlcv")]));
        assert!(!ToolInvoker::any_callable(&agent, &[request("shell")]));
    }

    #[tokio::test]
    async fn concurrency_cap_is_respected() {
        let transport = Arc::new(
            MockToolTransport::new()
                .with_text("a", "1")
                .with_delay("a", Duration::from_millis(30))
                .with_text("b", "2")
                .with_delay("b", Duration::from_millis(30))
                .with_text("c", "3")
                .with_delay("c", Duration::from_millis(30)),
        );
        let invoker = ToolInvoker::new(transport.clone(), 1, Duration::from_secs(1));
        let agent = agent_with_tools("quant", &["a", "b", "c"]);

        invoker
            .invoke(
                &agent,
                &[request("a"), request("b"), request("c")],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(transport.max_in_flight(), 1);
    }

    #[test]
    fn sse_frame_is_unwrapped() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        let value: Value = serde_json::from_str(sse_payload(body)).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(sse_payload("{\"plain\":true}"), "{\"plain\":true}");
    }

    #[test]
    fn content_text_joins_parts() {
        let result = json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        assert_eq!(content_text(&result), "a\nb");
        assert_eq!(content_text(&json!({"x": 1})), r#"{"x":1}"#);
    }

    #[test]
    fn rendered_results_include_status() {
        let rendered = render_results(&[
            ToolCallOutcome {
                name: "ohlcv".to_string(),
                ok: true,
                summary: "data".to_string(),
                output: Some(json!({"content": [{"type": "text", "text": "c=1.8"}]})),
            },
            failed("shell", "not bound".to_string()),
        ]);
        assert!(rendered.contains("### ohlcv (ok)\nc=1.8"));
        assert!(rendered.contains("### shell (error)\nnot bound"));
    }
}
