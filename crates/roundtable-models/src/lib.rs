pub mod agent;
pub mod archive_schema;
pub mod belief;
pub mod config;
pub mod decision;
pub mod event;
pub mod session;
pub mod tool_call;
pub mod transcript;

pub use agent::{AgentSpec, ToolBinding};
pub use archive_schema::{ArchivedEventRow, SessionRow};
pub use belief::{BattlePhase, BeliefUpdate, Camp};
pub use config::{
    AuditMode, AuditSettings, ConfigValidationError, NewsConfig, ProviderConfig, ProviderKind,
    RoundtableConfig, RoundtableSettings,
};
pub use decision::{Decision, DecisionPayload, DecisionStage};
pub use event::{RoundtableEvent, SessionEvent};
pub use session::{PriorTurn, Session, SessionInput, SessionStatus};
pub use tool_call::{ToolCallEvent, ToolCallOutcome, ToolCallRequest, ToolCallStage};
pub use transcript::{Phase, Relation, TranscriptEntry, TurnOutcome, REDACTION_NOTICE};
