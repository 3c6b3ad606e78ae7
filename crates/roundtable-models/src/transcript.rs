use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The only text a filtered entry ever exposes.
pub const REDACTION_NOTICE: &str = "[content withheld by audit filter]";

/// Structural slot a turn occupies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Opening,
    Discussion,
    CrossExamination,
    Rebuttal,
    Chair,
    Finalize,
    Summary,
    History,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Opening => "opening",
            Phase::Discussion => "discussion",
            Phase::CrossExamination => "cross_examination",
            Phase::Rebuttal => "rebuttal",
            Phase::Chair => "chair",
            Phase::Finalize => "finalize",
            Phase::Summary => "summary",
            Phase::History => "history",
        }
    }

    /// Phases spoken by the leader rather than a panelist.
    pub fn is_leadership(&self) -> bool {
        matches!(self, Phase::Chair | Phase::Finalize)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    #[default]
    None,
    Attack,
    Support,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    #[default]
    Completed,
    /// Provider retries exhausted, capability mismatch or credit denied.
    Failed,
    /// Interrupted by a session kill.
    Incomplete,
}

/// One admitted agent utterance. Append-only; never mutated after admission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    pub seq: u64,
    pub name: String,
    pub role: String,
    pub provider: String,
    pub turn: u32,
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
    /// Full text, or `REDACTION_NOTICE` when `filtered`. Empty for failed and incomplete turns.
    pub text: String,
    pub filtered: bool,
    #[serde(default)]
    pub relation: Relation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_turn: Option<u32>,
    #[serde(default)]
    pub outcome: TurnOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptEntry {
    pub fn is_spoken(&self) -> bool {
        self.outcome == TurnOutcome::Completed
    }

    /// Whether the entry carries a JSON block (belief, decision or relation payload).
    pub fn has_structured_payload(&self) -> bool {
        !self.filtered && self.text.contains('{') && self.text.contains('}')
    }
}
