use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use roundtable_models::{
    AgentSpec, BattlePhase, BeliefUpdate, ConfigValidationError, Decision, DecisionStage, Phase,
    Relation, RoundtableConfig, RoundtableEvent, Session, SessionInput, SessionStatus,
    ToolCallEvent, ToolCallStage, TranscriptEntry, TurnOutcome, REDACTION_NOTICE,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::AuditFilter;
use crate::belief::{infer_battle_phase, BattleInputs, BeliefTracker};
use crate::context::{ContextAssembler, ContextParts};
use crate::credit::{AllowAll, CreditGate};
use crate::error::AgentError;
use crate::events::{EventLog, EventSink};
use crate::news::{HttpNewsSource, NewsSource};
use crate::parser::{parse_turn_payload, TurnPayload};
use crate::prompts::agent_system_prompt;
use crate::provider::{ChatRequest, ProviderClient};
use crate::retry::{chat_with_retry, RetryPolicy};
use crate::tools::{render_results, McpHttpTransport, ToolInvoker, ToolTransport};

/// Mutable deliberation state. Owned by the coordinator; turns only see snapshots.
#[derive(Debug, Default)]
struct DeliberationState {
    transcript: Vec<TranscriptEntry>,
    beliefs: BeliefTracker,
    next_seq: u64,
    battle: BattlePhase,
    has_draft: bool,
    final_decision: Option<Decision>,
    news: Option<String>,
}

/// What one agent turn produced, before admission.
struct TurnResult {
    agent: String,
    role: String,
    provider: String,
    phase: Phase,
    turn: u32,
    timestamp: DateTime<Utc>,
    outcome: TurnOutcome,
    text: String,
    error: Option<String>,
    payload: Option<TurnPayload>,
    tool_events: Vec<ToolCallEvent>,
    started: Instant,
}

impl TurnResult {
    fn new(agent: &AgentSpec, phase: Phase, turn: u32) -> Self {
        Self {
            agent: agent.name.clone(),
            role: agent.role.clone(),
            provider: agent.provider_ref.clone(),
            phase,
            turn,
            timestamp: Utc::now(),
            outcome: TurnOutcome::Completed,
            text: String::new(),
            error: None,
            payload: None,
            tool_events: Vec::new(),
            started: Instant::now(),
        }
    }

    fn fail(mut self, err: AgentError) -> Self {
        self.outcome = match err {
            AgentError::Cancelled => TurnOutcome::Incomplete,
            _ => TurnOutcome::Failed,
        };
        self.text.clear();
        self.payload = None;
        self.error = Some(err.to_string());
        self
    }
}

/// Drives one session: phase state machine, per-turn protocol and the event stream.
pub struct Orchestrator {
    session: Session,
    config: Arc<RoundtableConfig>,
    input: SessionInput,
    providers: HashMap<String, Arc<dyn ProviderClient>>,
    tools: ToolInvoker,
    audit: AuditFilter,
    assembler: ContextAssembler,
    retry: RetryPolicy,
    credit: Arc<dyn CreditGate>,
    news: Option<Arc<dyn NewsSource>>,
    sink: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Validate the configuration and wire default collaborators: MCP-over-HTTP tools,
    /// an allow-all credit gate and, when configured, the HTTP news pipeline.
    pub fn new(
        session_id: impl Into<String>,
        config: RoundtableConfig,
        input: SessionInput,
        providers: HashMap<String, Arc<dyn ProviderClient>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        for agent in &config.agents {
            if !providers.contains_key(&agent.provider_ref) {
                return Err(ConfigValidationError::UnknownProvider {
                    agent: agent.name.clone(),
                    provider: agent.provider_ref.clone(),
                }
                .into());
            }
        }

        let settings = config.roundtable.clone();
        let transport: Arc<dyn ToolTransport> = Arc::new(McpHttpTransport::new()?);
        let news: Option<Arc<dyn NewsSource>> = match &config.news {
            Some(news) => Some(Arc::new(HttpNewsSource::new(news.clone())?)),
            None => None,
        };
        let tools = ToolInvoker::new(
            transport,
            settings.mcp_concurrency,
            Duration::from_millis(settings.mcp_timeout_ms),
        );

        Ok(Self {
            audit: AuditFilter::new(settings.audit_settings.clone()),
            assembler: ContextAssembler::new(settings.max_context_chars),
            retry: RetryPolicy::from_settings(&settings),
            session: Session::new(session_id, settings),
            tools,
            credit: Arc::new(AllowAll),
            news,
            input,
            providers,
            sink,
            config: Arc::new(config),
        })
    }

    pub fn with_tool_transport(mut self, transport: Arc<dyn ToolTransport>) -> Self {
        let settings = &self.config.roundtable;
        self.tools = ToolInvoker::new(
            transport,
            settings.mcp_concurrency,
            Duration::from_millis(settings.mcp_timeout_ms),
        );
        self
    }

    pub fn with_credit_gate(mut self, credit: Arc<dyn CreditGate>) -> Self {
        self.credit = credit;
        self
    }

    pub fn with_news_source(mut self, news: Arc<dyn NewsSource>) -> Self {
        self.news = Some(news);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run the session to a terminal status. Always ends with exactly one `process-exit`.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionStatus {
        let session_id = self.session.session_id.clone();
        let start = Instant::now();
        let mut log = EventLog::new(session_id.clone(), Arc::clone(&self.sink));
        let mut state = DeliberationState::default();
        info!(session_id = %session_id, agents = self.config.agents.len(), rounds = self.config.roundtable.max_rounds, "Session started");

        let outcome = AssertUnwindSafe(self.deliberate(&mut state, &mut log, &cancel))
            .catch_unwind()
            .await;
        let status = match outcome {
            Ok(status) => status,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(session_id = %session_id, panic = %message, "Deliberation panicked");
                SessionStatus::Failed
            }
        };

        if let Err(current) = self.session.finish(status) {
            warn!(session_id = %session_id, current = current.as_str(), requested = status.as_str(), "Terminal transition refused");
        }
        let status = self.session.status();
        log.emit(RoundtableEvent::ProcessExit {
            code: status.exit_code(),
            session_id: session_id.clone(),
            status,
        })
        .await;

        info!(
            session_id = %session_id,
            status = status.as_str(),
            entries = state.transcript.len(),
            events = log.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Session finished"
        );
        status
    }

    async fn deliberate(
        &self,
        state: &mut DeliberationState,
        log: &mut EventLog,
        cancel: &CancellationToken,
    ) -> SessionStatus {
        state.news = self.collect_news(cancel).await;
        self.admit_history(state, log).await;

        let schedule = self.schedule();
        let Some(final_agent) = self.final_name().and_then(|name| self.config.agent(name)) else {
            error!(session_id = %self.session.session_id, "No final agent on the roster");
            return SessionStatus::Failed;
        };
        let max_rounds = self.config.roundtable.max_rounds;
        let parallelism = self.config.roundtable.agent_parallelism.max(1);

        for round in 1..=max_rounds {
            if cancel.is_cancelled() {
                return SessionStatus::Killed;
            }
            let phase = panel_phase(round, state.battle);
            debug!(round, phase = phase.as_str(), battle = ?state.battle, "Round started");

            for chunk in schedule.chunks(parallelism) {
                if cancel.is_cancelled() {
                    return SessionStatus::Killed;
                }
                let snapshot = state.transcript.clone();
                let news = state.news.clone();
                let turns = chunk.iter().map(|agent| {
                    self.execute_turn(agent, phase, round, &snapshot, news.as_deref(), cancel)
                });
                let results = join_all(turns).await;

                for (agent, result) in chunk.iter().zip(results) {
                    // After a kill only the interrupted turns are recorded.
                    if cancel.is_cancelled() {
                        if result.outcome == TurnOutcome::Incomplete {
                            self.admit(state, log, agent, result).await;
                        } else {
                            debug!(agent = %agent.name, outcome = ?result.outcome, "Turn discarded after kill");
                        }
                        continue;
                    }
                    let consults = self.admit(state, log, agent, result).await;
                    self.run_consults(state, log, agent, &consults, phase, round, cancel)
                        .await;
                }
            }

            if cancel.is_cancelled() {
                return SessionStatus::Killed;
            }
            let lead_phase = if round == max_rounds {
                Phase::Finalize
            } else {
                Phase::Chair
            };
            let snapshot = state.transcript.clone();
            let news = state.news.clone();
            let result = self
                .execute_turn(final_agent, lead_phase, round, &snapshot, news.as_deref(), cancel)
                .await;
            let outcome = result.outcome;
            let consults = self.admit(state, log, final_agent, result).await;
            self.run_consults(state, log, final_agent, &consults, lead_phase, round, cancel)
                .await;

            match outcome {
                TurnOutcome::Incomplete => return SessionStatus::Killed,
                TurnOutcome::Failed => {
                    warn!(agent = %final_agent.name, round, "Final agent failed; session cannot conclude");
                    return SessionStatus::Incomplete;
                }
                TurnOutcome::Completed => {}
            }
            if state.final_decision.is_some() {
                break;
            }
        }

        if cancel.is_cancelled() {
            return SessionStatus::Killed;
        }
        if state.final_decision.is_none() {
            warn!(session_id = %self.session.session_id, "No final decision reached");
            return SessionStatus::Incomplete;
        }

        self.run_summary(state, log, cancel).await;
        if cancel.is_cancelled() {
            return SessionStatus::Killed;
        }
        SessionStatus::Completed
    }

    fn final_name(&self) -> Option<&str> {
        self.config.final_agent()
    }

    /// Primary speakers in ascending `order` (ties by name). The final agent, the summary
    /// agent and subagents are scheduled separately.
    fn schedule(&self) -> Vec<&AgentSpec> {
        let subagents = self.config.subagent_names();
        let final_name = self.final_name();
        let summary = self.config.roundtable.summary_agent.as_deref();
        let mut agents: Vec<&AgentSpec> = self
            .config
            .agents
            .iter()
            .filter(|a| {
                let name = Some(a.name.as_str());
                !subagents.contains(a.name.as_str()) && name != final_name && name != summary
            })
            .collect();
        agents.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        agents
    }

    async fn collect_news(&self, cancel: &CancellationToken) -> Option<String> {
        let source = self.news.as_ref()?;
        let digest = tokio::select! {
            _ = cancel.cancelled() => return None,
            digest = source.digest(&self.input.topic) => digest,
        };
        match digest {
            Ok(digest) if !digest.is_empty() => Some(digest.markdown),
            Ok(_) => None,
            Err(e) => {
                warn!(session_id = %self.session.session_id, error = %e, "News digest unavailable");
                None
            }
        }
    }

    /// The digest goes only to the collector when one is configured.
    fn news_for<'a>(&self, agent: &AgentSpec, news: Option<&'a str>) -> Option<&'a str> {
        let collector = self
            .config
            .news
            .as_ref()
            .and_then(|n| n.collector_agent.as_deref());
        match collector {
            Some(collector) if collector != agent.name => None,
            _ => news,
        }
    }

    async fn admit_history(&self, state: &mut DeliberationState, log: &mut EventLog) {
        for prior in &self.input.history {
            state.next_seq += 1;
            let entry = TranscriptEntry {
                seq: state.next_seq,
                name: prior.name.clone(),
                role: prior.role.clone(),
                provider: "history".to_string(),
                turn: 0,
                phase: Phase::History,
                timestamp: Utc::now(),
                text: prior.text.clone(),
                filtered: false,
                relation: Relation::None,
                target: None,
                target_turn: None,
                outcome: TurnOutcome::Completed,
                error: None,
            };
            log.emit(RoundtableEvent::AgentSpeak(entry.clone())).await;
            state.transcript.push(entry);
        }
    }

    async fn call_provider(
        &self,
        provider: &dyn ProviderClient,
        request: &ChatRequest,
        agent: &AgentSpec,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        chat_with_retry(
            provider,
            request,
            &self.retry,
            self.credit.as_ref(),
            &agent.name,
            cancel,
        )
        .await
    }

    /// Run one turn against a transcript snapshot. Pure with respect to session state.
    async fn execute_turn(
        &self,
        agent: &AgentSpec,
        phase: Phase,
        turn: u32,
        transcript: &[TranscriptEntry],
        news: Option<&str>,
        cancel: &CancellationToken,
    ) -> TurnResult {
        let mut result = TurnResult::new(agent, phase, turn);
        let Some(provider) = self.providers.get(&agent.provider_ref) else {
            return result.fail(AgentError::ProviderTransport(format!(
                "no provider registered as {}",
                agent.provider_ref
            )));
        };

        let parts = ContextParts {
            input: &self.input,
            news: self.news_for(agent, news),
            transcript,
            final_agent: self.final_name(),
            tool_results: None,
        };
        let images = if agent.can_see_images {
            self.input.image_paths.clone()
        } else {
            Vec::new()
        };
        let system_prompt = agent_system_prompt(agent, phase, &self.input.topic);
        let request = ChatRequest::new(system_prompt.clone(), self.assembler.assemble(&parts))
            .with_images(images.clone());

        let mut text = match self.call_provider(provider.as_ref(), &request, agent, cancel).await {
            Ok(text) => text,
            Err(e) => return result.fail(e),
        };
        let mut payload = parse_turn_payload(&text);
        let mut passes = 0u32;

        loop {
            let calls = payload
                .as_ref()
                .map(|p| p.tool_calls.clone())
                .unwrap_or_default();
            if calls.is_empty() {
                break;
            }
            let request_event = ToolCallEvent::request(&agent.name, turn, &calls);
            result.tool_events.push(request_event.clone());

            if passes >= self.config.roundtable.max_tool_passes {
                result
                    .tool_events
                    .push(request_event.conclude(ToolCallStage::Skipped {
                        reason: "tool pass limit reached".to_string(),
                    }));
                break;
            }
            if !ToolInvoker::any_callable(agent, &calls) {
                result
                    .tool_events
                    .push(request_event.conclude(ToolCallStage::Skipped {
                        reason: format!("no requested tool is bound to {}", agent.name),
                    }));
                break;
            }

            let invoked = AssertUnwindSafe(self.tools.invoke(agent, &calls, cancel))
                .catch_unwind()
                .await;
            let outcomes = match invoked {
                Ok(outcomes) => outcomes,
                Err(_) => {
                    error!(agent = %agent.name, turn, "Tool batch panicked");
                    result
                        .tool_events
                        .push(request_event.conclude(ToolCallStage::Error {
                            message: "tool batch aborted".to_string(),
                        }));
                    break;
                }
            };
            let rendered = render_results(&outcomes);
            result
                .tool_events
                .push(request_event.conclude(ToolCallStage::Result { results: outcomes }));
            if cancel.is_cancelled() {
                return result.fail(AgentError::Cancelled);
            }
            passes += 1;

            let with_results = ContextParts {
                tool_results: Some(&rendered),
                ..parts
            };
            let follow_up =
                ChatRequest::new(system_prompt.clone(), self.assembler.assemble(&with_results))
                    .with_images(images.clone());
            text = match self
                .call_provider(provider.as_ref(), &follow_up, agent, cancel)
                .await
            {
                Ok(text) => text,
                Err(e) => return result.fail(e),
            };
            payload = parse_turn_payload(&text);
        }

        result.text = text;
        result.payload = payload;
        result
    }

    /// Admit a turn through the single append point. Returns the subagents it asked for.
    async fn admit(
        &self,
        state: &mut DeliberationState,
        log: &mut EventLog,
        agent: &AgentSpec,
        result: TurnResult,
    ) -> Vec<String> {
        for event in result.tool_events {
            log.emit(RoundtableEvent::ToolCall(event)).await;
        }

        let is_chair = self.final_name() == Some(agent.name.as_str());
        let (text, filtered) = match result.outcome {
            TurnOutcome::Completed => {
                let verdict =
                    self.audit
                        .evaluate(&result.text, &result.role, is_chair || result.phase.is_leadership());
                if verdict.visible {
                    (result.text, false)
                } else if self.audit.logs_filtered() {
                    info!(agent = %result.agent, turn = result.turn, reason = ?verdict.reason, "Turn filtered");
                    (REDACTION_NOTICE.to_string(), true)
                } else {
                    info!(agent = %result.agent, turn = result.turn, reason = ?verdict.reason, "Turn dropped by audit");
                    return Vec::new();
                }
            }
            TurnOutcome::Failed | TurnOutcome::Incomplete => {
                warn!(agent = %result.agent, turn = result.turn, outcome = ?result.outcome, error = ?result.error, "Turn did not complete");
                (String::new(), false)
            }
        };

        let visible = result.outcome == TurnOutcome::Completed && !filtered;
        let payload = if visible { result.payload } else { None };
        let (relation, target, target_turn) = payload
            .as_ref()
            .map(|p| resolve_relation(&state.transcript, p))
            .unwrap_or((Relation::None, None, None));

        state.next_seq += 1;
        let entry = TranscriptEntry {
            seq: state.next_seq,
            name: result.agent.clone(),
            role: result.role,
            provider: result.provider,
            turn: result.turn,
            phase: result.phase,
            timestamp: result.timestamp,
            text,
            filtered,
            relation,
            target,
            target_turn,
            outcome: result.outcome,
            error: result.error,
        };
        info!(
            seq = entry.seq,
            agent = %entry.name,
            phase = entry.phase.as_str(),
            turn = entry.turn,
            outcome = ?entry.outcome,
            filtered,
            elapsed_ms = result.started.elapsed().as_millis(),
            "Turn admitted"
        );
        log.emit(RoundtableEvent::AgentSpeak(entry.clone())).await;
        state.transcript.push(entry);

        let Some(payload) = payload else {
            self.refresh_battle(state, log).await;
            return Vec::new();
        };

        if let Some(belief) = payload.belief() {
            let update = BeliefUpdate {
                source: result.agent.clone(),
                direction: belief.direction,
                confidence: belief.confidence,
                posteriors: belief.posteriors,
                turn: result.turn,
                timestamp: Utc::now(),
            };
            state.beliefs.update(update.clone());
            log.emit(RoundtableEvent::BeliefUpdate(update)).await;
        }

        if let Some(decision) = payload.decision() {
            if let Some(stage) = self.decision_stage(state, agent, result.phase, decision.consensus) {
                let decision = Decision {
                    stage,
                    speaker: result.agent.clone(),
                    turn: result.turn,
                    json: decision.clone(),
                };
                info!(agent = %decision.speaker, stage = ?decision.stage, "Decision recorded");
                match stage {
                    DecisionStage::Final => state.final_decision = Some(decision.clone()),
                    DecisionStage::Draft => state.has_draft = true,
                }
                log.emit(RoundtableEvent::Decision(decision)).await;
            }
        }

        self.refresh_battle(state, log).await;

        let mut consults = Vec::new();
        for name in payload.consult {
            if !agent.subagents.contains(&name) {
                warn!(agent = %agent.name, subagent = %name, "Consult request for an agent that is not a subagent");
            } else if !consults.contains(&name) {
                consults.push(name);
            }
        }
        consults
    }

    /// Only the final agent may finalize: in `finalize`, or in `chair` once it declares
    /// consensus. Everything else is a draft. Summary turns carry no decision.
    fn decision_stage(
        &self,
        state: &DeliberationState,
        agent: &AgentSpec,
        phase: Phase,
        consensus: Option<bool>,
    ) -> Option<DecisionStage> {
        if phase == Phase::Summary || phase == Phase::History {
            return None;
        }
        let is_final_agent = self.final_name() == Some(agent.name.as_str());
        let finalizes = match phase {
            Phase::Finalize => true,
            Phase::Chair => consensus == Some(true),
            _ => false,
        };
        if is_final_agent && finalizes && state.final_decision.is_none() {
            Some(DecisionStage::Final)
        } else {
            Some(DecisionStage::Draft)
        }
    }

    async fn refresh_battle(&self, state: &mut DeliberationState, log: &mut EventLog) {
        let (bull, bear) = state.beliefs.camp_counts();
        let has_leader = self.final_name().is_some_and(|name| {
            state
                .transcript
                .iter()
                .any(|e| e.name == name && e.is_spoken() && !e.filtered)
        });
        let next = infer_battle_phase(&BattleInputs {
            has_leader,
            has_draft: state.has_draft || state.final_decision.is_some(),
            bull,
            bear,
            agent_count: self.config.agents.len(),
        });
        if next != state.battle {
            info!(from = ?state.battle, to = ?next, bull, bear, "Battle phase changed");
            log.emit(RoundtableEvent::BattlePhase {
                from: state.battle,
                to: next,
            })
            .await;
            state.battle = next;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_consults(
        &self,
        state: &mut DeliberationState,
        log: &mut EventLog,
        parent: &AgentSpec,
        consults: &[String],
        phase: Phase,
        turn: u32,
        cancel: &CancellationToken,
    ) {
        for name in consults {
            if cancel.is_cancelled() {
                return;
            }
            let Some(subagent) = self.config.agent(name) else {
                continue;
            };
            debug!(parent = %parent.name, subagent = %name, "Consulting subagent");
            let snapshot = state.transcript.clone();
            let news = state.news.clone();
            let result = self
                .execute_turn(subagent, phase, turn, &snapshot, news.as_deref(), cancel)
                .await;
            let nested = self.admit(state, log, subagent, result).await;
            if !nested.is_empty() {
                debug!(subagent = %name, "Nested consults ignored");
            }
        }
    }

    async fn run_summary(
        &self,
        state: &mut DeliberationState,
        log: &mut EventLog,
        cancel: &CancellationToken,
    ) {
        let Some(agent) = self
            .config
            .roundtable
            .summary_agent
            .as_deref()
            .and_then(|name| self.config.agent(name))
        else {
            return;
        };
        let turn = state.transcript.iter().map(|e| e.turn).max().unwrap_or(1);
        let snapshot = state.transcript.clone();
        let news = state.news.clone();
        let result = self
            .execute_turn(agent, Phase::Summary, turn, &snapshot, news.as_deref(), cancel)
            .await;
        self.admit(state, log, agent, result).await;
    }
}

fn panel_phase(round: u32, battle: BattlePhase) -> Phase {
    match (round, battle) {
        (1, _) => Phase::Opening,
        (2, BattlePhase::Duel) => Phase::CrossExamination,
        (_, BattlePhase::Duel) => Phase::Rebuttal,
        _ => Phase::Discussion,
    }
}

/// Keep a relation only when the referenced entry exists.
fn resolve_relation(
    transcript: &[TranscriptEntry],
    payload: &TurnPayload,
) -> (Relation, Option<String>, Option<u32>) {
    let Some(relation) = payload.relation.as_ref() else {
        return (Relation::None, None, None);
    };
    if relation.kind == Relation::None {
        return (Relation::None, None, None);
    }
    let referenced = transcript.iter().rev().find(|e| {
        e.name == relation.target
            && e.is_spoken()
            && relation.target_turn.map_or(true, |t| e.turn == t)
    });
    match referenced {
        Some(entry) => (relation.kind, Some(entry.name.clone()), Some(entry.turn)),
        None => {
            debug!(target = %relation.target, turn = ?relation.target_turn, "Relation target not found");
            (Relation::None, None, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        agent, decision_reply, final_agent, provider_config, roundtable_config, session_input,
        RecordingSink, ScriptedProvider,
    };

    fn orchestrator(
        config: RoundtableConfig,
        provider: ScriptedProvider,
    ) -> (Orchestrator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let mut providers: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert("main".to_string(), Arc::new(provider));
        let orch = Orchestrator::new("s-test", config, session_input(), providers, sink.clone())
            .unwrap();
        (orch, sink)
    }

    #[test]
    fn panel_phase_follows_round_and_battle() {
        assert_eq!(panel_phase(1, BattlePhase::Duel), Phase::Opening);
        assert_eq!(panel_phase(2, BattlePhase::Duel), Phase::CrossExamination);
        assert_eq!(panel_phase(3, BattlePhase::Duel), Phase::Rebuttal);
        assert_eq!(panel_phase(2, BattlePhase::Synthesis), Phase::Discussion);
        assert_eq!(panel_phase(4, BattlePhase::Gathering), Phase::Discussion);
    }

    #[test]
    fn schedule_orders_by_order_then_name_and_excludes_special_agents() {
        let mut config = roundtable_config(vec![
            agent("zeta", 1),
            agent("alpha", 1),
            agent("first", 0),
            final_agent("chair"),
            agent("risk", 5),
            agent("scribe", 9),
        ]);
        config.agents[0].subagents = vec!["risk".to_string()];
        config.roundtable.summary_agent = Some("scribe".to_string());
        let (orch, _) = orchestrator(config, ScriptedProvider::always("main", "ok"));

        let names: Vec<&str> = orch.schedule().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["first", "alpha", "zeta"]);
    }

    #[test]
    fn unflagged_final_agent_cannot_run_a_session() {
        let mut config = roundtable_config(vec![agent("a", 0), final_agent("chair")]);
        config.roundtable.final_agent = Some("a".to_string());
        let mut providers: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert(
            "main".to_string(),
            Arc::new(ScriptedProvider::always("main", "ok")),
        );

        let result = Orchestrator::new(
            "s-x",
            config,
            session_input(),
            providers,
            Arc::new(RecordingSink::new()),
        );
        assert!(matches!(
            result,
            Err(AgentError::Config(ConfigValidationError::FinalAgentNotAuthorized(ref name))) if name == "a"
        ));
    }

    #[test]
    fn unknown_provider_instance_rejected() {
        let mut config = roundtable_config(vec![agent("a", 0), final_agent("chair")]);
        config
            .providers
            .insert("other".to_string(), provider_config());
        config.agents[0].provider_ref = "other".to_string();
        let mut providers: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert(
            "main".to_string(),
            Arc::new(ScriptedProvider::always("main", "ok")),
        );

        let result = Orchestrator::new(
            "s-x",
            config,
            session_input(),
            providers,
            Arc::new(RecordingSink::new()),
        );
        assert!(matches!(
            result,
            Err(AgentError::Config(ConfigValidationError::UnknownProvider { .. }))
        ));
    }

    #[test]
    fn relation_requires_existing_target() {
        let payload = parse_turn_payload(
            r#"{"relation": {"type": "attack", "target": "bull", "target_turn": 1}}"#,
        )
        .unwrap();
        assert_eq!(resolve_relation(&[], &payload), (Relation::None, None, None));

        let transcript = vec![TranscriptEntry {
            seq: 1,
            name: "bull".to_string(),
            role: "analyst".to_string(),
            provider: "main".to_string(),
            turn: 1,
            phase: Phase::Opening,
            timestamp: Utc::now(),
            text: "Up only.".to_string(),
            filtered: false,
            relation: Relation::None,
            target: None,
            target_turn: None,
            outcome: TurnOutcome::Completed,
            error: None,
        }];
        assert_eq!(
            resolve_relation(&transcript, &payload),
            (Relation::Attack, Some("bull".to_string()), Some(1))
        );
    }

    #[tokio::test]
    async fn chair_consensus_finalizes_early() {
        let mut config = roundtable_config(vec![agent("a", 0), final_agent("chair")]);
        config.roundtable.max_rounds = 3;
        let provider = ScriptedProvider::by_agent("main")
            .reply("a", "Looks bullish. {\"direction\": \"LONG\", \"confidence\": 0.7}")
            .reply(
                "chair",
                &decision_reply(r#""consensus": true, "signal": "BUY", "direction": "LONG""#),
            );
        let (orch, sink) = orchestrator(config, provider);

        let status = orch.run(CancellationToken::new()).await;
        assert_eq!(status, SessionStatus::Completed);

        let decisions = sink.decisions();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].stage, DecisionStage::Final);
        assert_eq!(sink.entries().len(), 2);
    }

    #[tokio::test]
    async fn drafts_until_last_round() {
        let mut config = roundtable_config(vec![agent("a", 0), final_agent("chair")]);
        config.roundtable.max_rounds = 2;
        let provider = ScriptedProvider::by_agent("main")
            .reply("a", "Neutral for now.")
            .reply("chair", &decision_reply(r#""signal": "HOLD""#));
        let (orch, sink) = orchestrator(config, provider);

        let status = orch.run(CancellationToken::new()).await;
        assert_eq!(status, SessionStatus::Completed);

        let stages: Vec<DecisionStage> = sink.decisions().iter().map(|d| d.stage).collect();
        assert_eq!(stages, vec![DecisionStage::Draft, DecisionStage::Final]);
        let phases: Vec<Phase> = sink.entries().iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![Phase::Opening, Phase::Chair, Phase::Discussion, Phase::Finalize]
        );
    }

    #[tokio::test]
    async fn missing_final_decision_is_incomplete() {
        let config = roundtable_config(vec![agent("a", 0), final_agent("chair")]);
        let provider = ScriptedProvider::always("main", "I have no decision to share.");
        let (orch, sink) = orchestrator(config, provider);

        let status = orch.run(CancellationToken::new()).await;
        assert_eq!(status, SessionStatus::Incomplete);
        assert_eq!(sink.entries().len(), 2);
        assert_eq!(sink.exit_status(), Some(SessionStatus::Incomplete));
    }

    #[tokio::test]
    async fn history_is_admitted_first() {
        let config = roundtable_config(vec![agent("a", 0), final_agent("chair")]);
        let provider = ScriptedProvider::by_agent("main")
            .reply("a", "Agree with yesterday.")
            .reply("chair", &decision_reply(r#""signal": "HOLD""#));
        let sink = Arc::new(RecordingSink::new());
        let mut providers: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert("main".to_string(), Arc::new(provider));
        let mut input = session_input();
        input.history.push(roundtable_models::PriorTurn {
            name: "chair".to_string(),
            role: "moderator".to_string(),
            text: "Yesterday we held.".to_string(),
        });
        let orch = Orchestrator::new("s-h", config, input, providers, sink.clone()).unwrap();

        orch.run(CancellationToken::new()).await;
        let entries = sink.entries();
        assert_eq!(entries[0].phase, Phase::History);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
    }
}
