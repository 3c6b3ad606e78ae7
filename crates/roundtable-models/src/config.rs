use std::collections::{BTreeMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentSpec;

/// Top-level roundtable configuration: provider registry, agent roster, settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundtableConfig {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub roundtable: RoundtableSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub news: Option<NewsConfig>,
}

/// Which provider implementation backs a registry entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(alias = "openai", alias = "openai-compatible")]
    OpenaiCompatible,
    #[serde(alias = "claude-cli")]
    ClaudeCli,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key. Never the key itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub model: String,
    #[serde(default)]
    pub supports_vision: bool,
    /// Passed through unmodified; omitted from requests when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Session-wide deliberation settings. Read-only once a session starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundtableSettings {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Agent that speaks once in the `summary` phase after the final decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_agent: Option<String>,
    /// Overrides `is_final_decision` flags when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_agent: Option<String>,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    /// Additional attempts after the first failed provider call, 0..=5.
    #[serde(default = "default_llm_retries")]
    pub llm_retries: u32,
    /// Delay between provider retries. Zero means immediate retry.
    #[serde(default)]
    pub llm_retry_backoff_ms: u64,
    #[serde(default = "default_mcp_timeout_ms")]
    pub mcp_timeout_ms: u64,
    /// Maximum tool calls in flight for one turn.
    #[serde(default = "default_mcp_concurrency")]
    pub mcp_concurrency: usize,
    /// Maximum agents of one round invoked concurrently.
    #[serde(default = "default_agent_parallelism")]
    pub agent_parallelism: usize,
    /// Completion passes allowed after tool results are folded back into context.
    #[serde(default = "default_max_tool_passes")]
    pub max_tool_passes: u32,
    #[serde(default)]
    pub audit_settings: AuditSettings,
}

impl Default for RoundtableSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            summary_agent: None,
            final_agent: None,
            max_context_chars: default_max_context_chars(),
            llm_timeout_ms: default_llm_timeout_ms(),
            llm_retries: default_llm_retries(),
            llm_retry_backoff_ms: 0,
            mcp_timeout_ms: default_mcp_timeout_ms(),
            mcp_concurrency: default_mcp_concurrency(),
            agent_parallelism: default_agent_parallelism(),
            max_tool_passes: default_max_tool_passes(),
            audit_settings: AuditSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    Strict,
    #[default]
    Moderate,
    Lenient,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: AuditMode,
    /// Minimum policy confidence (0..=1) a turn needs to stay visible.
    #[serde(default = "default_filter_threshold")]
    pub filter_threshold: Decimal,
    /// Fraction (0..=0.5) by which the threshold is lowered for the chairman.
    #[serde(default = "default_chairman_relax_factor")]
    pub chairman_relax_factor: Decimal,
    /// Keep filtered turns (redacted) in the transcript instead of dropping them.
    #[serde(default = "default_true")]
    pub log_filtered: bool,
    /// Case-insensitive substrings that are always rejected outside `enabled=false`.
    #[serde(default = "default_hard_patterns")]
    pub hard_patterns: Vec<String>,
    /// Case-insensitive substrings that lower the policy confidence.
    #[serde(default = "default_soft_signals")]
    pub soft_signals: Vec<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: AuditMode::Moderate,
            filter_threshold: default_filter_threshold(),
            chairman_relax_factor: default_chairman_relax_factor(),
            log_filtered: true,
            hard_patterns: default_hard_patterns(),
            soft_signals: default_soft_signals(),
        }
    }
}

/// Settings for the external news pipeline consulted before Gathering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsConfig {
    /// Agent whose prompt carries the digest. All agents see it when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_agent: Option<String>,
    pub search_base_url: String,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_per_url_timeout_ms")]
    pub per_url_timeout_ms: u64,
    #[serde(default = "default_per_url_max_chars")]
    pub per_url_max_chars: usize,
    #[serde(default = "default_total_max_chars")]
    pub total_max_chars: usize,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    #[error("roster has no agents")]
    NoAgents,

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("agent {agent} references unknown provider {provider}")]
    UnknownProvider { agent: String, provider: String },

    #[error("{field} references unknown agent {name}")]
    UnknownAgent { field: String, name: String },

    #[error("no agent is authorized to emit the final decision")]
    NoFinalAgent,

    #[error("final agent {0} is not marked is_final_decision")]
    FinalAgentNotAuthorized(String),

    #[error("{field} is out of range: {value}")]
    OutOfRange { field: String, value: String },

    #[error("missing required field: {0}")]
    Missing(String),
}

impl RoundtableConfig {
    /// Name of the agent that closes each round. `roundtable.final_agent` picks among
    /// several flagged agents; `validate` rejects it naming an unflagged one.
    pub fn final_agent(&self) -> Option<&str> {
        if let Some(name) = &self.roundtable.final_agent {
            return Some(name.as_str());
        }
        self.agents
            .iter()
            .find(|a| a.is_final_decision)
            .map(|a| a.name.as_str())
    }

    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Agents consulted on demand by a parent instead of speaking on the main schedule.
    pub fn subagent_names(&self) -> HashSet<&str> {
        self.agents
            .iter()
            .flat_map(|a| a.subagents.iter().map(String::as_str))
            .collect()
    }

    /// Check the fixed schema constraints. Fatal at session start.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.agents.is_empty() {
            return Err(ConfigValidationError::NoAgents);
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigValidationError::Missing("agents[].name".to_string()));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigValidationError::DuplicateAgent(agent.name.clone()));
            }
            if !self.providers.contains_key(&agent.provider_ref) {
                return Err(ConfigValidationError::UnknownProvider {
                    agent: agent.name.clone(),
                    provider: agent.provider_ref.clone(),
                });
            }
            for tool in &agent.tools {
                if tool.name.trim().is_empty() || tool.endpoint.trim().is_empty() {
                    return Err(ConfigValidationError::Missing(format!(
                        "agents[{}].tools[].name/endpoint",
                        agent.name
                    )));
                }
            }
            for sub in &agent.subagents {
                if !is_roster_agent(&self.agents, sub) || sub == &agent.name {
                    return Err(ConfigValidationError::UnknownAgent {
                        field: format!("agents[{}].subagents", agent.name),
                        name: sub.clone(),
                    });
                }
            }
        }

        for (name, provider) in &self.providers {
            if provider.model.trim().is_empty() {
                return Err(ConfigValidationError::Missing(format!(
                    "providers[{name}].model"
                )));
            }
            if provider.kind == ProviderKind::OpenaiCompatible && provider.base_url.is_none() {
                return Err(ConfigValidationError::Missing(format!(
                    "providers[{name}].base_url"
                )));
            }
        }

        let settings = &self.roundtable;
        for (field, name) in [
            ("roundtable.final_agent", &settings.final_agent),
            ("roundtable.summary_agent", &settings.summary_agent),
        ] {
            if let Some(name) = name {
                if self.agent(name).is_none() {
                    return Err(ConfigValidationError::UnknownAgent {
                        field: field.to_string(),
                        name: name.clone(),
                    });
                }
            }
        }
        if let Some(name) = &settings.final_agent {
            if self.agent(name).is_some_and(|a| !a.is_final_decision) {
                return Err(ConfigValidationError::FinalAgentNotAuthorized(name.clone()));
            }
        }
        if let Some(news) = &self.news {
            if let Some(collector) = &news.collector_agent {
                if self.agent(collector).is_none() {
                    return Err(ConfigValidationError::UnknownAgent {
                        field: "news.collector_agent".to_string(),
                        name: collector.clone(),
                    });
                }
            }
            if news.fetch_concurrency == 0 {
                return out_of_range("news.fetch_concurrency", news.fetch_concurrency);
            }
        }

        if self.final_agent().is_none() {
            return Err(ConfigValidationError::NoFinalAgent);
        }
        if self
            .final_agent()
            .is_some_and(|name| self.subagent_names().contains(name))
        {
            return Err(ConfigValidationError::OutOfRange {
                field: "roundtable.final_agent".to_string(),
                value: "final agent cannot be a subagent".to_string(),
            });
        }

        if settings.max_rounds == 0 {
            return out_of_range("roundtable.max_rounds", settings.max_rounds);
        }
        if settings.llm_retries > 5 {
            return out_of_range("roundtable.llm_retries", settings.llm_retries);
        }
        if settings.llm_timeout_ms == 0 {
            return out_of_range("roundtable.llm_timeout_ms", settings.llm_timeout_ms);
        }
        if settings.mcp_timeout_ms == 0 {
            return out_of_range("roundtable.mcp_timeout_ms", settings.mcp_timeout_ms);
        }
        if settings.mcp_concurrency == 0 {
            return out_of_range("roundtable.mcp_concurrency", settings.mcp_concurrency);
        }
        if settings.agent_parallelism == 0 {
            return out_of_range("roundtable.agent_parallelism", settings.agent_parallelism);
        }
        if settings.max_context_chars == 0 {
            return out_of_range("roundtable.max_context_chars", settings.max_context_chars);
        }

        let audit = &settings.audit_settings;
        if audit.filter_threshold < Decimal::ZERO || audit.filter_threshold > Decimal::ONE {
            return out_of_range(
                "audit_settings.filter_threshold",
                audit.filter_threshold,
            );
        }
        if audit.chairman_relax_factor < Decimal::ZERO
            || audit.chairman_relax_factor > Decimal::new(5, 1)
        {
            return out_of_range(
                "audit_settings.chairman_relax_factor",
                audit.chairman_relax_factor,
            );
        }

        Ok(())
    }
}

fn is_roster_agent(agents: &[AgentSpec], name: &str) -> bool {
    agents.iter().any(|a| a.name == name)
}

fn out_of_range<T: std::fmt::Display>(field: &str, value: T) -> Result<(), ConfigValidationError> {
    Err(ConfigValidationError::OutOfRange {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn default_max_rounds() -> u32 {
    3
}
fn default_max_context_chars() -> usize {
    24_000
}
fn default_llm_timeout_ms() -> u64 {
    60_000
}
fn default_llm_retries() -> u32 {
    2
}
fn default_mcp_timeout_ms() -> u64 {
    15_000
}
fn default_mcp_concurrency() -> usize {
    4
}
fn default_agent_parallelism() -> usize {
    1
}
fn default_max_tool_passes() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_filter_threshold() -> Decimal {
    Decimal::new(5, 1)
}
fn default_chairman_relax_factor() -> Decimal {
    Decimal::new(2, 1)
}
fn default_hard_patterns() -> Vec<String> {
    [
        "ignore previous instructions",
        "ignore all previous instructions",
        "begin private key",
        "api_key=",
        "guaranteed profit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_soft_signals() -> Vec<String> {
    [
        "100% sure",
        "can't lose",
        "cannot lose",
        "all in",
        "risk-free",
        "to the moon",
        "trust me",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_search_timeout_ms() -> u64 {
    10_000
}
fn default_max_results() -> usize {
    5
}
fn default_fetch_concurrency() -> usize {
    3
}
fn default_per_url_timeout_ms() -> u64 {
    8_000
}
fn default_per_url_max_chars() -> usize {
    4_000
}
fn default_total_max_chars() -> usize {
    12_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ToolBinding;
    use rust_decimal_macros::dec;

    fn agent(name: &str, order: i32, is_final: bool) -> AgentSpec {
        AgentSpec {
            name: name.to_string(),
            provider_ref: "main".to_string(),
            role: "analyst".to_string(),
            prompt: "Analyze {topic}.".to_string(),
            order,
            can_see_images: false,
            is_final_decision: is_final,
            tools: vec![],
            subagents: vec![],
        }
    }

    fn config() -> RoundtableConfig {
        let mut providers = BTreeMap::new();
        providers.insert(
            "main".to_string(),
            ProviderConfig {
                kind: ProviderKind::OpenaiCompatible,
                base_url: Some("https://api.example.com/v1".to_string()),
                api_key_env: Some("EXAMPLE_API_KEY".to_string()),
                model: "gpt-4o-mini".to_string(),
                supports_vision: false,
                temperature: None,
                max_tokens: None,
            },
        );
        RoundtableConfig {
            providers,
            agents: vec![agent("a", 1, false), agent("b", 2, false), agent("c", 3, true)],
            roundtable: RoundtableSettings::default(),
            news: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(config().validate(), Ok(()));
        assert_eq!(config().final_agent(), Some("c"));
    }

    #[test]
    fn roundtrip_json_config() {
        let config = config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RoundtableConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn config_from_json_uses_defaults() {
        let json = r#"{
            "providers": {
                "main": {"type": "openai_compatible", "base_url": "http://localhost:11434/v1", "model": "llama3"},
                "cli": {"type": "claude-cli", "model": "claude-3-5-haiku-latest"}
            },
            "agents": [
                {"name": "bull", "provider_ref": "main", "role": "bull", "prompt": "p", "order": 1},
                {"name": "judge", "provider_ref": "cli", "role": "chair", "prompt": "p", "order": 9, "is_final_decision": true}
            ],
            "roundtable": {"max_rounds": 2, "audit_settings": {"mode": "strict", "filter_threshold": 0.7}}
        }"#;
        let config: RoundtableConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.providers["cli"].kind, ProviderKind::ClaudeCli);
        assert_eq!(config.roundtable.max_rounds, 2);
        assert_eq!(config.roundtable.llm_retries, 2);
        assert_eq!(config.roundtable.max_tool_passes, 1);
        assert_eq!(config.roundtable.audit_settings.mode, AuditMode::Strict);
        assert_eq!(config.roundtable.audit_settings.filter_threshold, dec!(0.7));
        assert!(config.roundtable.audit_settings.log_filtered);
        assert!(config.providers["main"].temperature.is_none());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[providers.main]
type = "openai_compatible"
base_url = "https://api.example.com/v1"
model = "gpt-4o"
temperature = 0.2

[[agents]]
name = "solo"
provider_ref = "main"
role = "analyst"
prompt = "Decide."
is_final_decision = true

[roundtable]
max_rounds = 1
llm_retries = 0
"#;
        let config: RoundtableConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.providers["main"].temperature, Some(0.2));
        assert_eq!(config.roundtable.llm_retries, 0);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_duplicate_and_unknown_names() {
        let mut dup = config();
        dup.agents.push(agent("a", 4, false));
        assert_eq!(
            dup.validate(),
            Err(ConfigValidationError::DuplicateAgent("a".to_string()))
        );

        let mut unknown = config();
        unknown.agents[0].provider_ref = "nope".to_string();
        assert!(matches!(
            unknown.validate(),
            Err(ConfigValidationError::UnknownProvider { .. })
        ));

        let mut bad_final = config();
        bad_final.roundtable.final_agent = Some("zed".to_string());
        assert!(matches!(
            bad_final.validate(),
            Err(ConfigValidationError::UnknownAgent { .. })
        ));
    }

    #[test]
    fn rejects_missing_final_agent() {
        let mut config = config();
        config.agents[2].is_final_decision = false;
        assert_eq!(config.validate(), Err(ConfigValidationError::NoFinalAgent));
    }

    #[test]
    fn final_agent_setting_must_name_a_flagged_agent() {
        let mut unflagged = config();
        unflagged.roundtable.final_agent = Some("a".to_string());
        assert_eq!(
            unflagged.validate(),
            Err(ConfigValidationError::FinalAgentNotAuthorized("a".to_string()))
        );

        let mut two_chairs = config();
        two_chairs.agents[1].is_final_decision = true;
        two_chairs.roundtable.final_agent = Some("c".to_string());
        assert_eq!(two_chairs.validate(), Ok(()));
        assert_eq!(two_chairs.final_agent(), Some("c"));
    }

    #[test]
    fn rejects_out_of_range_settings() {
        let mut retries = config();
        retries.roundtable.llm_retries = 6;
        assert!(matches!(
            retries.validate(),
            Err(ConfigValidationError::OutOfRange { .. })
        ));

        let mut relax = config();
        relax.roundtable.audit_settings.chairman_relax_factor = dec!(0.6);
        assert!(matches!(
            relax.validate(),
            Err(ConfigValidationError::OutOfRange { .. })
        ));

        let mut rounds = config();
        rounds.roundtable.max_rounds = 0;
        assert!(rounds.validate().is_err());
    }

    #[test]
    fn rejects_bad_tool_and_subagent_refs() {
        let mut tools = config();
        tools.agents[0].tools.push(ToolBinding {
            name: "ohlcv".to_string(),
            endpoint: "  ".to_string(),
            description: None,
        });
        assert!(matches!(
            tools.validate(),
            Err(ConfigValidationError::Missing(_))
        ));

        let mut subs = config();
        subs.agents[0].subagents.push("ghost".to_string());
        assert!(matches!(
            subs.validate(),
            Err(ConfigValidationError::UnknownAgent { .. })
        ));
    }

    #[test]
    fn subagent_names_collects_all_parents() {
        let mut config = config();
        config.agents[0].subagents.push("b".to_string());
        assert!(config.subagent_names().contains("b"));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn openai_provider_requires_base_url() {
        let mut config = config();
        config.providers.get_mut("main").unwrap().base_url = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::Missing(_))
        ));
    }
}
