use serde::{Deserialize, Serialize};

/// Static configuration for one roundtable participant.
///
/// Loaded once at session start and never mutated while the session runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    /// Unique within a session.
    pub name: String,
    /// Key into `RoundtableConfig::providers`.
    pub provider_ref: String,
    /// Free-text role shown to the other agents (e.g. "technical analyst").
    pub role: String,
    /// Prompt template. `{name}`, `{role}` and `{topic}` are substituted at turn time.
    pub prompt: String,
    /// Sequencing hint; lower speaks first within a round.
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub can_see_images: bool,
    /// Marks the agent authorized to emit the session's final decision.
    #[serde(default)]
    pub is_final_decision: bool,
    #[serde(default)]
    pub tools: Vec<ToolBinding>,
    /// Roster agents this agent may consult on demand. Subagents are not scheduled
    /// on the main round rotation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subagents: Vec<String>,
}

impl AgentSpec {
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolBinding> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// A tool an agent is allowed to call, served by an MCP-style endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolBinding {
    pub name: String,
    /// HTTP endpoint accepting JSON-RPC `tools/call` requests.
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_spec_defaults_from_minimal_json() {
        let json = r#"{
            "name": "bull",
            "provider_ref": "main",
            "role": "long-biased analyst",
            "prompt": "You argue for upside."
        }"#;
        let spec: AgentSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.order, 0);
        assert!(!spec.can_see_images);
        assert!(!spec.is_final_decision);
        assert!(spec.tools.is_empty());
        assert!(spec.subagents.is_empty());
    }

    #[test]
    fn tool_lookup_by_name() {
        let spec = AgentSpec {
            name: "quant".to_string(),
            provider_ref: "main".to_string(),
            role: "quant".to_string(),
            prompt: String::new(),
            order: 1,
            can_see_images: false,
            is_final_decision: false,
            tools: vec![ToolBinding {
                name: "get_ohlcv".to_string(),
                endpoint: "http://localhost:9000/mcp".to_string(),
                description: None,
            }],
            subagents: vec![],
        };
        assert!(spec.has_tool("get_ohlcv"));
        assert!(!spec.has_tool("place_order"));
        assert_eq!(
            spec.tool("get_ohlcv").map(|t| t.endpoint.as_str()),
            Some("http://localhost:9000/mcp")
        );
    }
}
