use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use roundtable_models::{RoundtableEvent, SessionEvent};
use roundtable_store::SessionArchive;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::AgentError;

const BROADCAST_CAPACITY: usize = 1024;

/// Destination for a session's events. Injected per session.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &SessionEvent) -> Result<(), AgentError>;
}

/// Relays events to live subscribers and keeps the history for late joiners.
pub struct BroadcastSink {
    history: Mutex<Vec<SessionEvent>>,
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            history: Mutex::new(Vec::new()),
            sender,
        }
    }

    /// Events so far plus a receiver for everything after them, with no gap or overlap.
    pub fn subscribe(&self) -> (Vec<SessionEvent>, broadcast::Receiver<SessionEvent>) {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        (history.clone(), self.sender.subscribe())
    }

    pub fn history(&self) -> Vec<SessionEvent> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn emit(&self, event: &SessionEvent) -> Result<(), AgentError> {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push(event.clone());
        // No live subscribers is not an error.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Appends every event to the session archive for replay.
pub struct ArchiveSink {
    archive: Arc<SessionArchive>,
}

impl ArchiveSink {
    pub fn new(archive: Arc<SessionArchive>) -> Self {
        Self { archive }
    }
}

#[async_trait]
impl EventSink for ArchiveSink {
    async fn emit(&self, event: &SessionEvent) -> Result<(), AgentError> {
        self.archive.record(event).await?;
        Ok(())
    }
}

/// Delivers each event to every inner sink, in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn emit(&self, event: &SessionEvent) -> Result<(), AgentError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// The session's single append point: stamps a gap-free index on every event and
/// refuses anything after `process-exit`.
pub struct EventLog {
    session_id: String,
    next_index: u64,
    sealed: bool,
    sink: Arc<dyn EventSink>,
}

impl EventLog {
    pub fn new(session_id: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            session_id: session_id.into(),
            next_index: 0,
            sealed: false,
            sink,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of events emitted so far.
    pub fn len(&self) -> u64 {
        self.next_index
    }

    pub fn is_empty(&self) -> bool {
        self.next_index == 0
    }

    /// Emit one event. Returns `false` if the log is already sealed.
    pub async fn emit(&mut self, event: RoundtableEvent) -> bool {
        if self.sealed {
            warn!(session_id = %self.session_id, kind = event.kind(), "Event after process-exit dropped");
            return false;
        }
        let seals = event.is_exit();
        let stamped = SessionEvent {
            session_id: self.session_id.clone(),
            index: self.next_index,
            emitted_at: Utc::now(),
            event,
        };
        self.next_index += 1;
        if seals {
            self.sealed = true;
        }

        debug!(session_id = %self.session_id, index = stamped.index, kind = stamped.event.kind(), "Emitting event");
        if let Err(e) = self.sink.emit(&stamped).await {
            warn!(session_id = %self.session_id, index = stamped.index, error = %e, "Event sink failed");
        }
        true
    }
}
