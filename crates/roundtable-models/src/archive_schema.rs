/// SQLite schema for the session archive: one row per session, one row per emitted event.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS sessions (
///     session_id   TEXT PRIMARY KEY,
///     created_at   TEXT NOT NULL,
///     status       TEXT NOT NULL,
///     settings_json TEXT NOT NULL,
///     updated_at   TEXT NOT NULL
/// );
///
/// CREATE TABLE IF NOT EXISTS session_events (
///     session_id   TEXT NOT NULL,
///     event_index  INTEGER NOT NULL,
///     kind         TEXT NOT NULL,
///     payload_json TEXT NOT NULL,
///     emitted_at   TEXT NOT NULL,
///     PRIMARY KEY (session_id, event_index)
/// );
/// ```
pub const ARCHIVE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS sessions (
    session_id    TEXT PRIMARY KEY,
    created_at    TEXT NOT NULL,
    status        TEXT NOT NULL,
    settings_json TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS session_events (
    session_id   TEXT NOT NULL,
    event_index  INTEGER NOT NULL,
    kind         TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    emitted_at   TEXT NOT NULL,
    PRIMARY KEY (session_id, event_index)
);
CREATE INDEX IF NOT EXISTS idx_events_kind ON session_events(session_id, kind);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
";

/// A raw session row as read from SQLite.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub session_id: String,
    pub created_at: String,
    pub status: String,
    pub settings_json: String,
    pub updated_at: String,
}

/// A raw archived event row. `payload_json` is a serialized `SessionEvent`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedEventRow {
    pub session_id: String,
    pub event_index: i64,
    pub kind: String,
    pub payload_json: String,
    pub emitted_at: String,
}
