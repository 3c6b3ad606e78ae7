use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tool call requested by an agent's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Per-call result inside a `result` stage. Order mirrors the request order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallOutcome {
    pub name: String,
    pub ok: bool,
    /// Short human-readable summary (truncated output or error message).
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ToolCallStage {
    Request { calls: Vec<String> },
    Result { results: Vec<ToolCallOutcome> },
    Skipped { reason: String },
    Error { message: String },
}

impl ToolCallStage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ToolCallStage::Request { .. })
    }
}

/// One stage of a tool-invocation lifecycle. A request and its terminal stage share `call_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallEvent {
    pub call_id: Uuid,
    pub agent: String,
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub stage: ToolCallStage,
}

impl ToolCallEvent {
    pub fn request(agent: &str, turn: u32, calls: &[ToolCallRequest]) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            agent: agent.to_string(),
            turn,
            timestamp: Utc::now(),
            stage: ToolCallStage::Request {
                calls: calls.iter().map(|c| c.name.clone()).collect(),
            },
        }
    }

    /// Build the terminal stage for this request.
    pub fn conclude(&self, stage: ToolCallStage) -> Self {
        Self {
            call_id: self.call_id,
            agent: self.agent.clone(),
            turn: self.turn,
            timestamp: Utc::now(),
            stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conclude_keeps_agent_turn_and_call_id() {
        let calls = vec![ToolCallRequest {
            name: "get_ohlcv".to_string(),
            arguments: serde_json::json!({"symbol": "BTCUSDT"}),
        }];
        let request = ToolCallEvent::request("quant", 2, &calls);
        let done = request.conclude(ToolCallStage::Skipped {
            reason: "no tools bound".to_string(),
        });

        assert_eq!(done.call_id, request.call_id);
        assert_eq!(done.agent, "quant");
        assert_eq!(done.turn, 2);
        assert!(done.stage.is_terminal());
        assert!(!request.stage.is_terminal());
    }

    #[test]
    fn stage_is_flattened_with_tag() {
        let request = ToolCallEvent::request(
            "quant",
            1,
            &[ToolCallRequest {
                name: "news".to_string(),
                arguments: serde_json::Value::Null,
            }],
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stage"], "request");
        assert_eq!(value["calls"][0], "news");
        assert_eq!(value["agent"], "quant");
    }
}
