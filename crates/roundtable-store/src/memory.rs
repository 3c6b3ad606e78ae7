use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use roundtable_models::event::SessionEvent;

/// In-memory hot cache of decoded replay snapshots, backed by moka.
///
/// Entries are evicted after TTL and invalidated whenever the session appends.
pub struct ReplayCache {
    inner: Cache<String, Arc<Vec<SessionEvent>>>,
}

impl ReplayCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Vec<SessionEvent>>> {
        self.inner.get(session_id).await
    }

    pub async fn insert(&self, session_id: String, events: Arc<Vec<SessionEvent>>) {
        self.inner.insert(session_id, events).await;
    }

    pub async fn invalidate(&self, session_id: &str) {
        self.inner.invalidate(session_id).await;
    }
}
