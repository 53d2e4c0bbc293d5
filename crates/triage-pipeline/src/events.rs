//! Per-ticket live event fan-out
//!
//! One channel registry keyed by ticket id rather than a global string-topic
//! emitter, so subscribe/unsubscribe lifecycle is explicit. Delivery is to
//! currently-subscribed listeners only; there is no buffering or replay for
//! late subscribers beyond the initial `connected` marker.

use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use triage_core::{EventKind, PipelineEvent};

/// Registry of per-ticket subscriber channels
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<PipelineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a ticket's event stream
    ///
    /// The receiver gets a `connected` status marker immediately, then every
    /// event published for the ticket while the receiver stays open. Dropping
    /// the receiver unsubscribes; dead channels are pruned on publish.
    pub fn subscribe(&self, ticket_id: &str) -> mpsc::UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        let connected = PipelineEvent::new(ticket_id, EventKind::Status, "connected");
        // Receiver is still in scope, the send cannot fail
        let _ = tx.send(connected);

        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers
            .entry(ticket_id.to_string())
            .or_default()
            .push(tx);

        rx
    }

    /// Publish an event to all current subscribers of its ticket
    pub fn publish(&self, event: PipelineEvent) {
        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let Some(channels) = subscribers.get_mut(&event.ticket_id) else {
            return;
        };

        channels.retain(|tx| tx.send(event.clone()).is_ok());

        if channels.is_empty() {
            subscribers.remove(&event.ticket_id);
        }
    }

    /// Number of live subscribers for a ticket
    pub fn subscriber_count(&self, ticket_id: &str) -> usize {
        let subscribers = match self.subscribers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.get(ticket_id).map(Vec::len).unwrap_or(0)
    }
}
