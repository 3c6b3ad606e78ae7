use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RoundtableSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Killed,
    Incomplete,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }

    /// Code reported in the terminal `process-exit` event.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionStatus::Completed => 0,
            SessionStatus::Failed | SessionStatus::Running => 1,
            SessionStatus::Incomplete => 2,
            SessionStatus::Killed => 137,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Killed => "killed",
            SessionStatus::Incomplete => "incomplete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "killed" => Some(SessionStatus::Killed),
            "incomplete" => Some(SessionStatus::Incomplete),
            _ => None,
        }
    }
}

/// Shared analytical context every agent deliberates over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionInput {
    /// What the panel is deciding (e.g. "BTCUSDT 4h swing").
    pub topic: String,
    /// Market data, indicators and any other pre-rendered markdown.
    #[serde(default)]
    pub context: String,
    /// Chart images offered to agents with `can_see_images`.
    #[serde(default)]
    pub image_paths: Vec<String>,
    /// Turns carried over from an earlier discussion, admitted in `history` phase.
    #[serde(default)]
    pub history: Vec<PriorTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorTurn {
    pub name: String,
    #[serde(default)]
    pub role: String,
    pub text: String,
}

/// One deliberation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub settings: RoundtableSettings,
    status: SessionStatus,
}

impl Session {
    pub fn new(session_id: impl Into<String>, settings: RoundtableSettings) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            settings,
            status: SessionStatus::Running,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Move to a terminal status. Refused (returning the current status) when the
    /// session already finished or `status` is not terminal.
    pub fn finish(&mut self, status: SessionStatus) -> Result<(), SessionStatus> {
        if self.status.is_terminal() || !status.is_terminal() {
            return Err(self.status);
        }
        self.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_finishes_once() {
        let mut session = Session::new("s-1", RoundtableSettings::default());
        assert_eq!(session.status(), SessionStatus::Running);

        assert!(session.finish(SessionStatus::Completed).is_ok());
        assert_eq!(
            session.finish(SessionStatus::Killed),
            Err(SessionStatus::Completed)
        );
        assert_eq!(session.status(), SessionStatus::Completed);
    }

    #[test]
    fn running_is_not_a_terminal_transition() {
        let mut session = Session::new("s-2", RoundtableSettings::default());
        assert_eq!(
            session.finish(SessionStatus::Running),
            Err(SessionStatus::Running)
        );
    }

    #[test]
    fn exit_codes_are_distinct_per_terminal_status() {
        let codes = [
            SessionStatus::Completed.exit_code(),
            SessionStatus::Failed.exit_code(),
            SessionStatus::Incomplete.exit_code(),
            SessionStatus::Killed.exit_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn input_defaults_optional_fields() {
        let input: SessionInput = serde_json::from_str(r#"{"topic": "ETHUSDT 1h"}"#).unwrap();
        assert_eq!(input.topic, "ETHUSDT 1h");
        assert!(input.context.is_empty());
        assert!(input.image_paths.is_empty());
        assert!(input.history.is_empty());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Killed,
            SessionStatus::Incomplete,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("paused"), None);
    }
}
