//! The device's local copy of the aggregate.

use chrono::{DateTime, TimeZone};
use launchsync_common::LaunchAggregate;
use tokio::sync::watch;

/// Local aggregate, replaced wholesale by every pulled or pushed snapshot.
/// Observers subscribe to changes through a watch channel.
#[derive(Debug)]
pub struct LocalAggregate {
    tx: watch::Sender<LaunchAggregate>,
}

impl LocalAggregate {
    pub fn new(initial: LaunchAggregate) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> LaunchAggregate {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LaunchAggregate> {
        self.tx.subscribe()
    }

    /// Full replace. There is no merge; the latest snapshot to arrive wins.
    pub fn apply(&self, snapshot: LaunchAggregate) {
        self.tx.send_replace(snapshot);
    }

    /// Count a launch locally and return the updated snapshot.
    pub fn record_launch<Tz: TimeZone>(&self, at: DateTime<Tz>) -> LaunchAggregate {
        self.tx.send_modify(|agg| agg.record_launch(at));
        self.current()
    }
}

impl Default for LocalAggregate {
    fn default() -> Self {
        Self::new(LaunchAggregate::empty(0))
    }
}
