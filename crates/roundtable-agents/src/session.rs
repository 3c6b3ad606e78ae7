use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use roundtable_models::{RoundtableConfig, SessionEvent, SessionInput, SessionStatus};
use roundtable_store::SessionArchive;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credit::{AllowAll, CreditGate};
use crate::error::AgentError;
use crate::events::{ArchiveSink, BroadcastSink, EventSink, FanoutSink};
use crate::news::NewsSource;
use crate::orchestrator::Orchestrator;
use crate::provider::{build_providers, ProviderClient};
use crate::tools::ToolTransport;

/// Finished sessions kept in memory for `subscribe`; older ones are served by the archive.
const DEFAULT_FINISHED_RETENTION: usize = 32;

struct SessionHandle {
    cancel: CancellationToken,
    events: Arc<BroadcastSink>,
    status: watch::Receiver<SessionStatus>,
    started: u64,
}

impl SessionHandle {
    fn is_finished(&self) -> bool {
        self.status.borrow().is_terminal()
    }
}

/// Drop the oldest finished sessions until at most `keep` remain.
fn prune_finished(sessions: &mut HashMap<String, SessionHandle>, keep: usize) {
    let mut finished: Vec<(u64, String)> = sessions
        .iter()
        .filter(|(_, handle)| handle.is_finished())
        .map(|(id, handle)| (handle.started, id.clone()))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        debug!(session_id = %id, "Evicting finished session");
        sessions.remove(&id);
    }
}

/// Runs independent sessions side by side and routes kill, subscribe and replay by id.
///
/// Ids are unique among running sessions. Starting a finished id replaces its earlier run.
/// Only the most recent finished sessions stay registered; with an archive, `status`,
/// `wait` and `replay` still answer for evicted ones.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    started: AtomicU64,
    finished_retention: usize,
    archive: Option<Arc<SessionArchive>>,
    credit: Arc<dyn CreditGate>,
    tools: Option<Arc<dyn ToolTransport>>,
    news: Option<Arc<dyn NewsSource>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            started: AtomicU64::new(0),
            finished_retention: DEFAULT_FINISHED_RETENTION,
            archive: None,
            credit: Arc::new(AllowAll),
            tools: None,
            news: None,
        }
    }

    pub fn with_archive(mut self, archive: Arc<SessionArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_credit_gate(mut self, credit: Arc<dyn CreditGate>) -> Self {
        self.credit = credit;
        self
    }

    pub fn with_finished_retention(mut self, keep: usize) -> Self {
        self.finished_retention = keep;
        self
    }

    pub fn with_tool_transport(mut self, transport: Arc<dyn ToolTransport>) -> Self {
        self.tools = Some(transport);
        self
    }

    pub fn with_news_source(mut self, news: Arc<dyn NewsSource>) -> Self {
        self.news = Some(news);
        self
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate `config`, build its providers and start a session. Returns the session id.
    pub async fn start(
        &self,
        config: RoundtableConfig,
        input: SessionInput,
        session_id: Option<String>,
    ) -> Result<String, AgentError> {
        config.validate()?;
        let providers = build_providers(&config)?;
        self.start_with_providers(config, input, providers, session_id)
            .await
    }

    /// Start a session over an already-built provider registry.
    pub async fn start_with_providers(
        &self,
        config: RoundtableConfig,
        input: SessionInput,
        providers: HashMap<String, Arc<dyn ProviderClient>>,
        session_id: Option<String>,
    ) -> Result<String, AgentError> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let events = Arc::new(BroadcastSink::new());
        let sink: Arc<dyn EventSink> = match &self.archive {
            Some(archive) => Arc::new(FanoutSink::new(vec![
                events.clone(),
                Arc::new(ArchiveSink::new(Arc::clone(archive))),
            ])),
            None => events.clone(),
        };

        let mut orchestrator =
            Orchestrator::new(session_id.clone(), config, input, providers, sink)?
                .with_credit_gate(Arc::clone(&self.credit));
        if let Some(tools) = &self.tools {
            orchestrator = orchestrator.with_tool_transport(Arc::clone(tools));
        }
        if let Some(news) = &self.news {
            orchestrator = orchestrator.with_news_source(Arc::clone(news));
        }

        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(SessionStatus::Running);
        self.reserve(
            &session_id,
            SessionHandle {
                cancel: cancel.clone(),
                events,
                status: status_rx,
                started: self.started.fetch_add(1, Ordering::SeqCst),
            },
        )?;

        // The id is reserved, so no concurrent start can reach the archive for it.
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.begin(orchestrator.session()).await {
                self.registry().remove(&session_id);
                return Err(e.into());
            }
        }

        info!(session_id = %session_id, "Session spawned");
        tokio::spawn(async move {
            let status = orchestrator.run(cancel).await;
            // Nobody waiting is fine.
            let _ = status_tx.send(status);
        });
        Ok(session_id)
    }

    /// Register `handle` unless a session with this id is still running.
    fn reserve(&self, session_id: &str, handle: SessionHandle) -> Result<(), AgentError> {
        let mut sessions = self.registry();
        if sessions.get(session_id).is_some_and(|h| !h.is_finished()) {
            return Err(AgentError::DuplicateSession(session_id.to_string()));
        }
        sessions.insert(session_id.to_string(), handle);
        prune_finished(&mut sessions, self.finished_retention);
        Ok(())
    }

    /// Request cancellation. The session winds down to `killed` unless it already ended.
    pub fn kill(&self, session_id: &str) -> Result<(), AgentError> {
        let sessions = self.registry();
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| AgentError::UnknownSession(session_id.to_string()))?;
        if handle.is_finished() {
            warn!(session_id, "Kill requested for a finished session");
        } else {
            info!(session_id, "Kill requested");
        }
        handle.cancel.cancel();
        Ok(())
    }

    /// Events so far plus a live receiver for the rest of the session.
    pub fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(Vec<SessionEvent>, broadcast::Receiver<SessionEvent>), AgentError> {
        let sessions = self.registry();
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| AgentError::UnknownSession(session_id.to_string()))?;
        Ok(handle.events.subscribe())
    }

    pub fn status(&self, session_id: &str) -> Result<SessionStatus, AgentError> {
        if let Some(handle) = self.registry().get(session_id) {
            return Ok(*handle.status.borrow());
        }
        match &self.archive {
            Some(archive) => archive
                .status(session_id)?
                .ok_or_else(|| AgentError::UnknownSession(session_id.to_string())),
            None => Err(AgentError::UnknownSession(session_id.to_string())),
        }
    }

    /// Wait for a session to reach its terminal status.
    pub async fn wait(&self, session_id: &str) -> Result<SessionStatus, AgentError> {
        let receiver = self
            .registry()
            .get(session_id)
            .map(|handle| handle.status.clone());
        let Some(mut status) = receiver else {
            return self.status(session_id);
        };
        let waited = status
            .wait_for(|s| s.is_terminal())
            .await
            .map(|terminal| *terminal)
            .ok();
        Ok(waited.unwrap_or_else(|| *status.borrow()))
    }

    /// Full event stream of a session: live history while it is registered here,
    /// the archive otherwise.
    pub async fn replay(&self, session_id: &str) -> Result<Vec<SessionEvent>, AgentError> {
        let live = self
            .registry()
            .get(session_id)
            .map(|handle| handle.events.history());
        if let Some(events) = live {
            return Ok(events);
        }
        match &self.archive {
            Some(archive) => Ok(archive.replay(session_id).await?.as_ref().clone()),
            None => Err(AgentError::UnknownSession(session_id.to_string())),
        }
    }

    /// Ids of sessions still registered: running ones plus the retained finished ones.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry().keys().cloned().collect();
        ids.sort();
        ids
    }
}
