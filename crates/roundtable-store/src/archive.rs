use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use roundtable_models::archive_schema::{ArchivedEventRow, SessionRow};
use roundtable_models::event::{RoundtableEvent, SessionEvent};
use roundtable_models::session::{Session, SessionStatus};
use tracing::debug;

use crate::error::StoreError;
use crate::memory::ReplayCache;
use crate::sqlite::SqliteArchive;

/// Append-only session archive with read-through replay: moka (hot) → SQLite.
///
/// SQLite access is synchronized via `Mutex` since `rusqlite::Connection` is not `Sync`.
pub struct SessionArchive {
    memory: ReplayCache,
    sqlite: Mutex<SqliteArchive>,
}

impl SessionArchive {
    pub fn new(sqlite: SqliteArchive, max_capacity: u64, memory_ttl: Duration) -> Self {
        Self {
            memory: ReplayCache::new(max_capacity, memory_ttl),
            sqlite: Mutex::new(sqlite),
        }
    }

    /// Ephemeral archive for tests and one-off runs.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(
            SqliteArchive::open_in_memory()?,
            64,
            Duration::from_secs(300),
        ))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SqliteArchive>, StoreError> {
        self.sqlite
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// Register a session before its first event.
    pub async fn begin(&self, session: &Session) -> Result<(), StoreError> {
        let row = SessionRow {
            session_id: session.session_id.clone(),
            created_at: session.created_at.to_rfc3339(),
            status: session.status().as_str().to_string(),
            settings_json: serde_json::to_string(&session.settings)?,
            updated_at: Utc::now().to_rfc3339(),
        };
        self.lock()?.begin_session(&row)?;
        self.memory.invalidate(&session.session_id).await;
        Ok(())
    }

    /// Append one event. A `process-exit` event also records the terminal status.
    pub async fn record(&self, event: &SessionEvent) -> Result<(), StoreError> {
        let row = ArchivedEventRow {
            session_id: event.session_id.clone(),
            event_index: event.index as i64,
            kind: event.event.kind().to_string(),
            payload_json: serde_json::to_string(event)?,
            emitted_at: event.emitted_at.to_rfc3339(),
        };
        {
            let sqlite = self.lock()?;
            sqlite.append_event(&row)?;
            if let RoundtableEvent::ProcessExit { status, .. } = &event.event {
                sqlite.update_status(&event.session_id, status.as_str())?;
            }
        }
        self.memory.invalidate(&event.session_id).await;
        Ok(())
    }

    /// Reconstruct a session's event stream in emission order.
    pub async fn replay(&self, session_id: &str) -> Result<Arc<Vec<SessionEvent>>, StoreError> {
        if let Some(events) = self.memory.get(session_id).await {
            return Ok(events);
        }

        let rows = {
            let sqlite = self.lock()?;
            if sqlite.session(session_id)?.is_none() {
                return Err(StoreError::UnknownSession(session_id.to_string()));
            }
            sqlite.events(session_id)?
        };

        let events = rows
            .iter()
            .map(|row| serde_json::from_str::<SessionEvent>(&row.payload_json))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(session_id, count = events.len(), "Loaded replay from SQLite");

        let events = Arc::new(events);
        self.memory
            .insert(session_id.to_string(), Arc::clone(&events))
            .await;
        Ok(events)
    }

    pub fn status(&self, session_id: &str) -> Result<Option<SessionStatus>, StoreError> {
        let row = self.lock()?.session(session_id)?;
        Ok(row.and_then(|r| SessionStatus::parse(&r.status)))
    }

    /// All archived sessions, oldest first.
    pub fn sessions(&self) -> Result<Vec<SessionRow>, StoreError> {
        self.lock()?.sessions()
    }
}
