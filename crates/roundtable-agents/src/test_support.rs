//! Scripted providers, tool transports and fixtures for deliberation tests.
//!
//! `ScriptedProvider` recognizes the speaking agent from the system prompt's opening
//! line, so one provider instance can script a whole panel.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use roundtable_models::{
    AgentSpec, Decision, ProviderConfig, ProviderKind, RoundtableConfig, RoundtableEvent,
    RoundtableSettings, SessionEvent, SessionInput, SessionStatus, ToolBinding, ToolCallEvent,
    TranscriptEntry,
};
use serde_json::{json, Value};

use crate::error::AgentError;
use crate::events::EventSink;
use crate::provider::{ensure_capability, ChatRequest, ProviderClient};
use crate::tools::ToolTransport;

const HANG: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail,
    Hang,
}

/// Provider whose replies are scripted per agent. Each agent's queue advances one reply
/// per call and repeats its last reply once exhausted.
pub struct ScriptedProvider {
    name: String,
    vision: bool,
    delay: Option<Duration>,
    fallback: Reply,
    shared: Mutex<VecDeque<Reply>>,
    per_agent: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn with_fallback(name: &str, fallback: Reply) -> Self {
        Self {
            name: name.to_string(),
            vision: false,
            delay: None,
            fallback,
            shared: Mutex::new(VecDeque::new()),
            per_agent: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call returns `text`.
    pub fn always(name: &str, text: &str) -> Self {
        Self::with_fallback(name, Reply::Text(text.to_string()))
    }

    /// The first `failures` calls fail transiently, then every call returns `text`.
    pub fn failing_then(name: &str, failures: usize, text: &str) -> Self {
        let provider = Self::always(name, text);
        if let Ok(mut shared) = provider.shared.lock() {
            shared.extend(std::iter::repeat(Reply::Fail).take(failures));
        }
        provider
    }

    /// Every call blocks until timed out or cancelled.
    pub fn hanging(name: &str) -> Self {
        Self::with_fallback(name, Reply::Hang)
    }

    /// Agents without a script answer with plain prose.
    pub fn by_agent(name: &str) -> Self {
        Self::always(name, "No further comment.")
    }

    pub fn reply(self, agent: &str, text: &str) -> Self {
        self.push(agent, Reply::Text(text.to_string()))
    }

    /// Queue a transient failure for `agent`.
    pub fn fail(self, agent: &str) -> Self {
        self.push(agent, Reply::Fail)
    }

    /// Queue a call for `agent` that never returns on its own.
    pub fn hang(self, agent: &str) -> Self {
        self.push(agent, Reply::Hang)
    }

    pub fn with_vision(mut self) -> Self {
        self.vision = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `chat` invocations, including ones rejected before I/O.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Requests made on behalf of `agent`.
    pub fn requests_for(&self, agent: &str) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(|r| speaker(r) == Some(agent))
            .collect()
    }

    fn push(self, agent: &str, reply: Reply) -> Self {
        if let Ok(mut per_agent) = self.per_agent.lock() {
            per_agent.entry(agent.to_string()).or_default().push_back(reply);
        }
        self
    }

    fn next_reply(&self, agent: Option<&str>) -> Reply {
        if let Some(agent) = agent {
            let mut per_agent = self.per_agent.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(queue) = per_agent.get_mut(agent) {
                if let Some(reply) = advance(queue) {
                    return reply;
                }
            }
        }
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

fn advance(queue: &mut VecDeque<Reply>) -> Option<Reply> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Agent name from the "You are {name}, ..." opening of a system prompt.
fn speaker(request: &ChatRequest) -> Option<&str> {
    request
        .system_prompt
        .strip_prefix("You are ")
        .and_then(|rest| rest.split(',').next())
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        ensure_capability(self, request)?;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_reply(speaker(request)) {
            Reply::Text(text) => Ok(text),
            Reply::Fail => Err(AgentError::ProviderStatus {
                status: 503,
                body: "scripted outage".to_string(),
            }),
            Reply::Hang => {
                tokio::time::sleep(HANG).await;
                Err(AgentError::Timeout(HANG.as_millis() as u64))
            }
        }
    }
}

/// Tool transport answering from a fixed table, with optional per-tool latency.
#[derive(Default)]
pub struct MockToolTransport {
    responses: HashMap<String, Result<String, String>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockToolTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, tool: &str, text: &str) -> Self {
        self.responses.insert(tool.to_string(), Ok(text.to_string()));
        self
    }

    pub fn with_error(mut self, tool: &str, message: &str) -> Self {
        self.responses
            .insert(tool.to_string(), Err(message.to_string()));
        self
    }

    pub fn with_delay(mut self, tool: &str, delay: Duration) -> Self {
        self.delays.insert(tool.to_string(), delay);
        self
    }

    /// Tool names in the order they reached the transport.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolTransport for MockToolTransport {
    async fn call(&self, binding: &ToolBinding, _arguments: &Value) -> Result<Value, AgentError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(binding.name.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(delay) = self.delays.get(&binding.name) {
            tokio::time::sleep(*delay).await;
        }
        match self.responses.get(&binding.name) {
            Some(Ok(text)) => Ok(json!({"content": [{"type": "text", "text": text}]})),
            Some(Err(message)) => Err(AgentError::ToolTransport(message.clone())),
            None => Err(AgentError::ToolTransport(format!(
                "no scripted response for {}",
                binding.name
            ))),
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event.kind()).collect()
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.event {
                RoundtableEvent::AgentSpeak(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.event {
                RoundtableEvent::Decision(decision) => Some(decision),
                _ => None,
            })
            .collect()
    }

    pub fn tool_events(&self) -> Vec<ToolCallEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.event {
                RoundtableEvent::ToolCall(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn exit_status(&self) -> Option<SessionStatus> {
        self.events().into_iter().find_map(|e| match e.event {
            RoundtableEvent::ProcessExit { status, .. } => Some(status),
            _ => None,
        })
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: &SessionEvent) -> Result<(), AgentError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

pub fn agent(name: &str, order: i32) -> AgentSpec {
    AgentSpec {
        name: name.to_string(),
        provider_ref: "main".to_string(),
        role: "analyst".to_string(),
        prompt: "Give your read on {topic}.".to_string(),
        order,
        can_see_images: false,
        is_final_decision: false,
        tools: Vec::new(),
        subagents: Vec::new(),
    }
}

pub fn final_agent(name: &str) -> AgentSpec {
    AgentSpec {
        role: "moderator".to_string(),
        order: 100,
        is_final_decision: true,
        ..agent(name, 100)
    }
}

pub fn agent_with_tools(name: &str, tools: &[&str]) -> AgentSpec {
    AgentSpec {
        tools: tools
            .iter()
            .map(|tool| ToolBinding {
                name: tool.to_string(),
                endpoint: "http://localhost:9000/mcp".to_string(),
                description: None,
            })
            .collect(),
        ..agent(name, 0)
    }
}

pub fn provider_config() -> ProviderConfig {
    ProviderConfig {
        kind: ProviderKind::OpenaiCompatible,
        base_url: Some("http://localhost:11434/v1".to_string()),
        api_key_env: None,
        model: "test-model".to_string(),
        supports_vision: false,
        temperature: None,
        max_tokens: None,
    }
}

/// Single-round config over one provider instance named `main`.
pub fn roundtable_config(agents: Vec<AgentSpec>) -> RoundtableConfig {
    let mut providers = BTreeMap::new();
    providers.insert("main".to_string(), provider_config());
    RoundtableConfig {
        providers,
        agents,
        roundtable: RoundtableSettings {
            max_rounds: 1,
            llm_timeout_ms: 2_000,
            llm_retries: 2,
            llm_retry_backoff_ms: 0,
            ..RoundtableSettings::default()
        },
        news: None,
    }
}

/// Two analysts `a`, `b` and the final agent `c`.
pub fn three_agent_config() -> RoundtableConfig {
    roundtable_config(vec![agent("a", 0), agent("b", 1), final_agent("c")])
}

pub fn session_input() -> SessionInput {
    SessionInput {
        topic: "BTCUSDT 4h".to_string(),
        context: "RSI 47, MACD flat, funding neutral.".to_string(),
        ..SessionInput::default()
    }
}

/// Prose plus a decision block with the given JSON fields.
pub fn decision_reply(fields: &str) -> String {
    format!("Weighing the panel.\n{{\"decision\": {{{fields}}}}}")
}

/// Prose plus a belief block.
pub fn belief_reply(direction: &str, confidence: f64) -> String {
    format!(
        "My read is {direction}.\n{{\"belief\": {{\"direction\": \"{direction}\", \"confidence\": {confidence}}}}}"
    )
}
