//! Local notifications raised by a replica.
//!
//! Events go out on a `tokio::sync::broadcast` channel after the ingest lock
//! is released. Sending never waits: a subscriber that falls more than the
//! channel capacity behind loses the oldest events.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use crate::outcome::IngestOutcome;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaEvent {
    /// A document was handed to `ingest`, whatever the outcome.
    Ingest {
        path: String,
        outcome: IngestOutcome,
    },
    /// `close` has started.
    WillClose,
    /// The replica and its storage are closed.
    DidClose,
}

/// Which events a subscription receives.
///
/// Lifecycle events reach every subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventFilter {
    #[default]
    All,
    /// Ingest events for one path.
    Path(String),
}

impl EventFilter {
    pub fn matches(&self, event: &ReplicaEvent) -> bool {
        match (self, event) {
            (EventFilter::All, _) => true,
            (EventFilter::Path(want), ReplicaEvent::Ingest { path, .. }) => want == path,
            (EventFilter::Path(_), _) => true,
        }
    }
}

/// A filtered stream of replica events.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<ReplicaEvent>,
    filter: EventFilter,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<ReplicaEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Wait for the next matching event. `None` once the replica is gone.
    pub async fn recv(&mut self) -> Option<ReplicaEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The next matching event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ReplicaEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged; events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}
