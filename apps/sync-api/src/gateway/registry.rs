//! Process-wide mapping from user ID to that user's live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::session::{EnqueueError, Outbound, Session, SessionInfo};

/// Result of one read-only broadcast pass over a user's sessions.
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// Sessions that accepted the snapshot.
    pub delivered: usize,
    /// Sessions whose queue was full or already closed.
    pub rejected: Vec<(Arc<Session>, EnqueueError)>,
}

/// Shared registry of live gateway sessions, keyed by user.
///
/// One reader-writer lock guards the whole map. `register`/`unregister` take
/// the write side, `broadcast` and lookups the read side. The lock is never
/// held across an await point.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<i64, Vec<Arc<Session>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an authenticated session, moving it to `Active`.
    ///
    /// Returns `false` without inserting if this session is already listed or
    /// has already been closed.
    pub fn register(&self, session: Arc<Session>) -> bool {
        let mut map = self.sessions.write();
        let list = map.entry(session.user_id).or_default();
        if list.iter().any(|s| Arc::ptr_eq(s, &session)) {
            return false;
        }
        if !session.activate() {
            if list.is_empty() {
                map.remove(&session.user_id);
            }
            return false;
        }
        list.push(session);
        true
    }

    /// Remove a session and close it.
    ///
    /// Closing happens whether or not the session was listed, so repeated
    /// calls are harmless. Returns `true` if an entry was removed.
    pub fn unregister(&self, session: &Arc<Session>) -> bool {
        let removed = {
            let mut map = self.sessions.write();
            let mut removed = false;
            if let Some(list) = map.get_mut(&session.user_id) {
                if let Some(pos) = list.iter().position(|s| Arc::ptr_eq(s, session)) {
                    list.remove(pos);
                    removed = true;
                }
                if list.is_empty() {
                    map.remove(&session.user_id);
                }
            }
            removed
        };
        session.close();
        removed
    }

    /// Offer `snapshot` to every session of `user_id` without blocking.
    ///
    /// Rejected sessions are reported, not removed; removal needs the write
    /// lock and is left to the caller.
    pub fn broadcast(&self, user_id: i64, snapshot: &Outbound) -> BroadcastOutcome {
        let map = self.sessions.read();
        let Some(list) = map.get(&user_id) else {
            return BroadcastOutcome::default();
        };

        let mut outcome = BroadcastOutcome::default();
        for session in list {
            match session.try_enqueue(snapshot.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => outcome.rejected.push((session.clone(), e)),
            }
        }
        outcome
    }

    /// Describe the live sessions of one user, in registration order.
    pub fn sessions_for(&self, user_id: i64) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .get(&user_id)
            .map(|list| list.iter().map(|s| s.info()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .read()
            .get(&session.user_id)
            .is_some_and(|list| list.iter().any(|s| Arc::ptr_eq(s, session)))
    }

    /// Total number of live sessions across all users.
    pub fn session_count(&self) -> usize {
        self.sessions.read().values().map(Vec::len).sum()
    }

    /// Number of users with at least one live session.
    pub fn user_count(&self) -> usize {
        self.sessions.read().len()
    }
}
