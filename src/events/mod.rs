//! Events
//!
//! Two channels of diagnostics: a broadcast bus for live subscribers and an
//! append-only per-PID event log for after-the-fact inspection.

mod log;

pub use log::{EventLog, EventMeta, Level, LogEvent, NewEvent, PidLog};

use tokio::sync::broadcast;

/// Events that belong to a single PID
pub trait PidEvent {
    fn pid(&self) -> &str;
}

/// Typed pub/sub channel
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: E) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    /// Create a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone + Send + PidEvent + 'static> EventBus<E> {
    /// Subscribe to events of one PID only
    pub fn subscribe_pid(&self, pid: impl Into<String>) -> PidSubscription<E> {
        PidSubscription {
            pid: pid.into(),
            rx: self.tx.subscribe(),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Receiver filtered to a single PID; dropping it unsubscribes
pub struct PidSubscription<E> {
    pid: String,
    rx: broadcast::Receiver<E>,
}

impl<E: Clone + PidEvent> PidSubscription<E> {
    /// Next event for this PID, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.pid() == self.pid => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(pid = %self.pid, skipped, "subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }
}
