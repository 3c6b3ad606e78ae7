//! Tests against the real Claude CLI.
//!
//! `#[ignore]` by default; they need the `claude` CLI on PATH with valid credentials.
//!
//! ```bash
//! cargo test -p roundtable-agents --test cli_integration -- --ignored
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use roundtable_agents::parser::parse_turn_payload;
use roundtable_agents::prompts::agent_system_prompt;
use roundtable_agents::provider::claude_cli::{ClaudeCliConfig, ClaudeCliProvider};
use roundtable_agents::test_support::{agent, session_input, three_agent_config, RecordingSink};
use roundtable_agents::{AgentError, ChatRequest, Orchestrator, ProviderClient};
use roundtable_models::{Phase, SessionStatus};
use tokio_util::sync::CancellationToken;

const MODEL: &str = "claude-3-5-haiku-latest";

fn provider(model: &str, timeout: Duration) -> ClaudeCliProvider {
    ClaudeCliProvider::new(
        "cli",
        ClaudeCliConfig {
            model: model.to_string(),
            timeout,
            ..ClaudeCliConfig::default()
        },
    )
}

#[tokio::test]
#[ignore]
async fn cli_is_available() {
    let available = provider(MODEL, Duration::from_secs(10)).is_available().await;
    assert!(available, "claude CLI not found on PATH");
}

/// An opening turn from the CLI should carry a belief block the parser understands.
#[tokio::test]
#[ignore]
async fn opening_turn_yields_belief() {
    if !provider(MODEL, Duration::from_secs(10)).is_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let analyst = agent("quant", 0);
    let input = session_input();
    let request = ChatRequest::new(
        agent_system_prompt(&analyst, Phase::Opening, &input.topic),
        format!("# Topic\n{}\n\n## Shared context\n{}", input.topic, input.context),
    );

    let raw = provider(MODEL, Duration::from_secs(60))
        .chat(&request)
        .await
        .expect("Claude CLI invocation failed");

    let payload = parse_turn_payload(&raw)
        .unwrap_or_else(|| panic!("No structured block in CLI output:\n---\n{raw}\n---"));
    assert!(payload.belief().is_some(), "no belief in: {raw}");
}

#[tokio::test]
#[ignore]
async fn invalid_model_is_a_cli_error() {
    if !provider(MODEL, Duration::from_secs(10)).is_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let result = provider("nonexistent-model-12345", Duration::from_secs(15))
        .chat(&ChatRequest::new("You are a test.", "hello"))
        .await;
    assert!(matches!(result, Err(AgentError::Cli(_))), "got {result:?}");
}

/// One-round panel driven end to end by the CLI.
#[tokio::test]
#[ignore]
async fn single_round_session() {
    if !provider(MODEL, Duration::from_secs(10)).is_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let mut config = three_agent_config();
    config.roundtable.llm_timeout_ms = 90_000;
    config.roundtable.llm_retries = 1;
    let mut providers: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
    providers.insert("main".to_string(), Arc::new(provider(MODEL, Duration::from_secs(90))));
    let sink = Arc::new(RecordingSink::new());

    let status = Orchestrator::new("cli-1", config, session_input(), providers, sink.clone())
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert!(matches!(status, SessionStatus::Completed | SessionStatus::Incomplete));
    assert_eq!(sink.entries().len(), 3);
    assert_eq!(sink.exit_status(), Some(status));
}
