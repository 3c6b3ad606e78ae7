use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use roundtable_models::archive_schema::{ArchivedEventRow, SessionRow, ARCHIVE_DDL};

use crate::error::StoreError;

/// SQLite session archive.
///
/// Opened read-write with WAL so replay readers can run while a session appends.
pub struct SqliteArchive {
    conn: Connection,
}

impl SqliteArchive {
    /// Open (or create) the archive file. Creates the schema if it doesn't exist.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(ARCHIVE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn })
    }

    /// Open an in-memory archive. Useful for testing and for ephemeral CLI runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(ARCHIVE_DDL)?;
        Ok(Self { conn })
    }

    /// Register a session. Reusing an id replaces the earlier run and its events.
    pub fn begin_session(&mut self, row: &SessionRow) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM session_events WHERE session_id = ?1",
            rusqlite::params![row.session_id],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO sessions \
             (session_id, created_at, status, settings_json, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                row.session_id,
                row.created_at,
                row.status,
                row.settings_json,
                row.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_status(&self, session_id: &str, status: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE session_id = ?1",
            rusqlite::params![session_id, status, now],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownSession(session_id.to_string()));
        }
        Ok(())
    }

    /// Append one event row. `(session_id, event_index)` is unique.
    pub fn append_event(&self, row: &ArchivedEventRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO session_events \
             (session_id, event_index, kind, payload_json, emitted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                row.session_id,
                row.event_index,
                row.kind,
                row.payload_json,
                row.emitted_at,
            ],
        )?;
        Ok(())
    }

    /// All events for a session in emission order.
    pub fn events(&self, session_id: &str) -> Result<Vec<ArchivedEventRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT session_id, event_index, kind, payload_json, emitted_at \
             FROM session_events WHERE session_id = ?1 ORDER BY event_index ASC",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![session_id], |row| {
                Ok(ArchivedEventRow {
                    session_id: row.get(0)?,
                    event_index: row.get(1)?,
                    kind: row.get(2)?,
                    payload_json: row.get(3)?,
                    emitted_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn session(&self, session_id: &str) -> Result<Option<SessionRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT session_id, created_at, status, settings_json, updated_at \
             FROM sessions WHERE session_id = ?1",
        )?;

        let row = stmt
            .query_row(rusqlite::params![session_id], |row| {
                Ok(SessionRow {
                    session_id: row.get(0)?,
                    created_at: row.get(1)?,
                    status: row.get(2)?,
                    settings_json: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })
            .optional()?;

        Ok(row)
    }

    /// All recorded sessions, oldest first.
    pub fn sessions(&self) -> Result<Vec<SessionRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT session_id, created_at, status, settings_json, updated_at \
             FROM sessions ORDER BY created_at ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SessionRow {
                    session_id: row.get(0)?,
                    created_at: row.get(1)?,
                    status: row.get(2)?,
                    settings_json: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}
