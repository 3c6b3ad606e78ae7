use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
    Draft,
    Final,
}

/// Recognized decision fields. Unknown fields are kept in `extra` so the
/// structured payload survives replay unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DecisionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_speaker: Option<String>,
    #[serde(default)]
    pub rationale: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DecisionPayload {
    /// A payload with no recognized field set carries no decision.
    pub fn is_empty(&self) -> bool {
        self.consensus.is_none()
            && self.signal.is_none()
            && self.direction.is_none()
            && self.confidence.is_none()
            && self.next_speaker.is_none()
            && self.rationale.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub stage: DecisionStage,
    pub speaker: String,
    pub turn: u32,
    pub json: DecisionPayload,
}
