use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use launchsync_common::LaunchAggregate;

/// Failure talking to the backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable per-user launch counters.
///
/// The gateway never writes here; only the sync routes do.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Return the user's snapshot, creating a zero-valued one if none exists.
    async fn load_or_create(&self, user_id: i64) -> Result<LaunchAggregate, StoreError>;
    /// Replace the user's snapshot.
    async fn save(&self, snapshot: &LaunchAggregate) -> Result<(), StoreError>;
}

/// Display metadata for authenticated users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user_id: i64) -> Result<Option<String>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for development / tests)
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryStore {
    aggregates: Arc<DashMap<i64, LaunchAggregate>>,
    users: Arc<DashMap<i64, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `user_id` known to the directory under `name`.
    pub fn add_user(&self, user_id: i64, name: impl Into<String>) {
        self.users.insert(user_id, name.into());
    }

    /// Peek at a stored snapshot without creating one.
    pub fn get(&self, user_id: i64) -> Option<LaunchAggregate> {
        self.aggregates.get(&user_id).map(|a| a.value().clone())
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn load_or_create(&self, user_id: i64) -> Result<LaunchAggregate, StoreError> {
        let entry = self
            .aggregates
            .entry(user_id)
            .or_insert_with(|| LaunchAggregate::empty(user_id));
        Ok(entry.value().clone())
    }

    async fn save(&self, snapshot: &LaunchAggregate) -> Result<(), StoreError> {
        self.aggregates.insert(snapshot.user_id, snapshot.clone());
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn display_name(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        Ok(self.users.get(&user_id).map(|n| n.value().clone()))
    }
}
