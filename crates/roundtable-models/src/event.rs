use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::belief::{BattlePhase, BeliefUpdate};
use crate::decision::Decision;
use crate::session::SessionStatus;
use crate::tool_call::ToolCallEvent;
use crate::transcript::TranscriptEntry;

/// Canonical orchestrator event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum RoundtableEvent {
    AgentSpeak(TranscriptEntry),
    ToolCall(ToolCallEvent),
    BeliefUpdate(BeliefUpdate),
    Decision(Decision),
    BattlePhase {
        from: BattlePhase,
        to: BattlePhase,
    },
    ProcessExit {
        code: i32,
        session_id: String,
        status: SessionStatus,
    },
}

impl RoundtableEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RoundtableEvent::AgentSpeak(_) => "agent-speak",
            RoundtableEvent::ToolCall(_) => "tool-call",
            RoundtableEvent::BeliefUpdate(_) => "belief-update",
            RoundtableEvent::Decision(_) => "decision",
            RoundtableEvent::BattlePhase { .. } => "battle-phase",
            RoundtableEvent::ProcessExit { .. } => "process-exit",
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, RoundtableEvent::ProcessExit { .. })
    }
}

/// An event stamped with its session and its position in that session's stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEvent {
    pub session_id: String,
    /// Zero-based, gap-free index within the session.
    pub index: u64,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RoundtableEvent,
}
