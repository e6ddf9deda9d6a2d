//! Per-connection gateway session state.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use launchsync_common::id::{prefix, PrefixedId};
use launchsync_common::LaunchAggregate;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use utoipa::ToSchema;

/// Snapshot handed to a session's outbound pump.
pub type Outbound = Arc<LaunchAggregate>;

/// Lifecycle of a device connection.
///
/// `Connecting` and `Authenticated` are passed through by the upgrade gate
/// before a [`Session`] exists in the registry; a constructed session starts
/// in `Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Authenticated = 1,
    Active = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Authenticated,
            2 => Self::Active,
            _ => Self::Closed,
        }
    }
}

/// Why a snapshot could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The consumer has not drained the queue; the session is a slow consumer.
    Full,
    /// The session is already tearing down.
    Closed,
}

/// State for a single device connection.
///
/// The transport halves are owned by the pumps; the session only carries the
/// signal that tells them the transport is being closed.
pub struct Session {
    /// Unique session identifier (`ses_` prefixed ULID).
    pub id: String,
    /// Authenticated user ID.
    pub user_id: i64,
    /// Display name resolved at connect time.
    pub display_name: String,
    pub remote_addr: String,
    pub connected_at: DateTime<Utc>,
    state: AtomicU8,
    /// Sender side of the bounded outbound queue. `None` once closed.
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    /// Flips to `true` exactly once, when the transport is being closed.
    closed: watch::Sender<bool>,
    /// Set by the inbound pump on every received frame, cleared by keepalive.
    alive: AtomicBool,
}

/// Serializable description of a live session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: i64,
    pub display_name: String,
    pub remote_addr: String,
    pub connected_at: DateTime<Utc>,
    pub connected_secs: i64,
}

impl Session {
    /// Create an authenticated session with an outbound queue of `capacity`.
    /// Returns the session and the receiving end for its outbound pump.
    pub fn new(
        user_id: i64,
        display_name: String,
        remote_addr: String,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        let session = Self {
            id: Self::generate(),
            user_id,
            display_name,
            remote_addr,
            connected_at: Utc::now(),
            state: AtomicU8::new(SessionState::Authenticated as u8),
            outbound: Mutex::new(Some(tx)),
            closed,
            alive: AtomicBool::new(true),
        };
        (Arc::new(session), rx)
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Authenticated -> Active`. Fails if the session was already closed or
    /// activated.
    pub(crate) fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Authenticated as u8,
                SessionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Queue a snapshot without waiting.
    pub fn try_enqueue(&self, snapshot: Outbound) -> Result<(), EnqueueError> {
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(EnqueueError::Closed)?;
        tx.try_send(snapshot).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue and signal the pumps to close the transport.
    ///
    /// Idempotent; returns `true` only for the call that performed the close.
    pub fn close(&self) -> bool {
        let first = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if first {
            self.state.store(SessionState::Closed as u8, Ordering::Release);
            self.outbound.lock().take();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this only ends on `true`.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Record inbound traffic for keepalive.
    pub(crate) fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Consume the liveness flag. `false` means nothing arrived since the
    /// previous call.
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            remote_addr: self.remote_addr.clone(),
            connected_at: self.connected_at,
            connected_secs: (Utc::now() - self.connected_at).num_seconds(),
        }
    }
}

impl PrefixedId for Session {
    const PREFIX: &'static str = prefix::SESSION;
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish()
    }
}
