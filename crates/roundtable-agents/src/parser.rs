use std::collections::BTreeMap;

use rust_decimal::Decimal;
use roundtable_models::{DecisionPayload, Relation, ToolCallRequest};
use serde::Deserialize;

use crate::error::AgentError;

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Handles common LLM response formats:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prose around it: `Bullish overall.\n{"key": "value"}\nThanks.`
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    for json_str in extract_objects(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

/// Extract JSON from a markdown code block (```json ... ``` or ``` ... ```)
fn extract_from_markdown_block(text: &str) -> Option<String> {
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                let extracted = text[json_start..json_start + end].trim();
                return Some(extracted.to_string());
            }
        }
    }

    None
}

/// Every top-level balanced `{ ... }` in the text, in order.
fn extract_objects(text: &str) -> Vec<String> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' if depth > 0 => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        objects.push(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    objects
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BeliefPayload {
    pub direction: String,
    pub confidence: Decimal,
    #[serde(default)]
    pub posteriors: Option<BTreeMap<String, Decimal>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RelationPayload {
    #[serde(rename = "type")]
    pub kind: Relation,
    pub target: String,
    #[serde(default)]
    pub target_turn: Option<u32>,
}

/// Structured block an agent may embed in its reply.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TurnPayload {
    #[serde(default)]
    pub belief: Option<BeliefPayload>,
    #[serde(default)]
    pub relation: Option<RelationPayload>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default)]
    pub decision: Option<DecisionPayload>,
    #[serde(default)]
    pub consult: Vec<String>,
    /// Shorthand belief: top-level `direction` + `confidence`.
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    confidence: Option<Decimal>,
}

impl TurnPayload {
    /// Belief with confidence clamped to [0, 1], falling back to top-level fields.
    pub fn belief(&self) -> Option<BeliefPayload> {
        let belief = match (&self.belief, &self.direction, self.confidence) {
            (Some(belief), _, _) => belief.clone(),
            (None, Some(direction), Some(confidence)) => BeliefPayload {
                direction: direction.clone(),
                confidence,
                posteriors: None,
            },
            _ => return None,
        };
        Some(BeliefPayload {
            confidence: belief.confidence.clamp(Decimal::ZERO, Decimal::ONE),
            ..belief
        })
    }

    /// The decision block, unless it carries no recognized field.
    pub fn decision(&self) -> Option<&DecisionPayload> {
        self.decision.as_ref().filter(|d| !d.is_empty())
    }
}

/// Parse the structured payload from an agent reply. Prose-only replies yield `None`.
pub fn parse_turn_payload(text: &str) -> Option<TurnPayload> {
    let json_str = extract_json(text).ok()?;
    serde_json::from_str(&json_str).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn extract_clean_json() {
        let input = r#"{"confidence": 0.75, "reasoning": "test"}"#;
        let result = extract_json(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn extract_from_markdown() {
        let input = "Here is my view:\n```json\n{\"confidence\": 0.75}\n```\nDone.";
        let result = extract_json(input).unwrap();
        assert_eq!(result, r#"{"confidence": 0.75}"#);
    }

    #[test]
    fn extract_from_markdown_no_lang() {
        let input = "Result:\n```\n{\"confidence\": 0.75}\n```";
        let result = extract_json(input).unwrap();
        assert_eq!(result, r#"{"confidence": 0.75}"#);
    }

    #[test]
    fn extract_with_escaped_braces_in_strings() {
        let input = r#"{"rationale": ["range {low} to {high}"], "confidence": 0.5}"#;
        let result = extract_json(input).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["confidence"], 0.5);
    }

    #[test]
    fn skips_invalid_braces_before_payload() {
        let input = "Levels {support, resistance} matter.\n{\"direction\": \"LONG\", \"confidence\": 0.6}";
        let result = extract_json(input).unwrap();
        assert!(result.contains("LONG"));
    }

    #[test]
    fn extract_no_json() {
        assert!(extract_json("This is just plain text with no JSON at all.").is_err());
    }

    #[test]
    fn full_payload() {
        let text = r#"Funding is flipping negative, I'm now bearish.
```json
{
  "belief": {"direction": "SHORT", "confidence": "0.68", "posteriors": {"SHORT": 0.68, "LONG": 0.32}},
  "relation": {"type": "attack", "target": "bull", "target_turn": 1},
  "tool_calls": [{"name": "funding_rate", "arguments": {"symbol": "BTCUSDT"}}],
  "decision": {"signal": "SELL", "confidence": 0.6, "rationale": ["funding", "divergence"]},
  "consult": ["risk"]
}
```"#;
        let payload = parse_turn_payload(text).unwrap();
        let belief = payload.belief().unwrap();
        assert_eq!(belief.direction, "SHORT");
        assert_eq!(belief.confidence, dec!(0.68));
        assert_eq!(belief.posteriors.unwrap()["LONG"], dec!(0.32));

        let relation = payload.relation.clone().unwrap();
        assert_eq!(relation.kind, Relation::Attack);
        assert_eq!(relation.target_turn, Some(1));

        assert_eq!(payload.tool_calls[0].name, "funding_rate");
        assert_eq!(payload.decision().unwrap().signal.as_deref(), Some("SELL"));
        assert_eq!(payload.consult, vec!["risk".to_string()]);
    }

    #[test]
    fn top_level_direction_is_a_belief_fallback() {
        let payload = parse_turn_payload(r#"{"direction": "LONG", "confidence": 1.7}"#).unwrap();
        let belief = payload.belief().unwrap();
        assert_eq!(belief.direction, "LONG");
        assert_eq!(belief.confidence, Decimal::ONE);
    }

    #[test]
    fn prose_has_no_payload() {
        assert!(parse_turn_payload("Momentum is fading; I'd wait.").is_none());
    }

    #[test]
    fn empty_decision_is_ignored() {
        let payload = parse_turn_payload(r#"{"decision": {"note": "thinking"}}"#).unwrap();
        assert!(payload.decision().is_none());
        assert!(payload.belief().is_none());
    }
}
