//! Fan an updated snapshot out to every live session of one user.
//!
//! Delivery is best effort. A session whose queue is full is disconnected
//! instead of being waited on; the device repairs its state by pulling after
//! it reconnects.

use std::sync::Arc;

use launchsync_common::LaunchAggregate;

use super::registry::ConnectionRegistry;
use super::session::EnqueueError;

/// What a single dispatch did. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Sessions disconnected because they could not keep up.
    pub dropped: usize,
}

/// Broadcast dispatcher. Cloneable; store in AppState.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Queue `snapshot` on every session of `user_id`. Never waits on a
    /// session; saturated ones are torn down once the read pass is over.
    pub fn dispatch(&self, user_id: i64, snapshot: LaunchAggregate) -> DispatchReport {
        let snapshot = Arc::new(snapshot);
        let outcome = self.registry.broadcast(user_id, &snapshot);

        let mut report = DispatchReport {
            delivered: outcome.delivered,
            dropped: 0,
        };

        for (session, reason) in outcome.rejected {
            match reason {
                EnqueueError::Full => {
                    tracing::warn!(
                        user_id,
                        session_id = %session.id,
                        remote_addr = %session.remote_addr,
                        "outbound queue full, disconnecting slow consumer"
                    );
                    report.dropped += 1;
                }
                EnqueueError::Closed => {
                    tracing::debug!(user_id, session_id = %session.id, "skipping closing session");
                }
            }
            self.registry.unregister(&session);
        }

        if report.delivered > 0 {
            tracing::debug!(user_id, delivered = report.delivered, "snapshot dispatched");
        }
        report
    }
}
