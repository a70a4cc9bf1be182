//! Client-scoped event fan-out.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded ring
//! buffer of recent messages so a client that (re)connects after an event
//! was published can still catch up. Every message is addressed to one
//! client id; subscribers filter on it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Maximum number of messages retained in the ring buffer.
const MAX_RECENT: usize = 100;

/// One event addressed to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<E> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    #[serde(flatten)]
    pub event: E,
}

impl<E> Envelope<E> {
    pub fn new(client_id: impl Into<String>, event: E) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            client_id: client_id.into(),
            event,
        }
    }
}

/// Broadcast channel with a bounded ring buffer of recent messages.
pub struct EventBus<E> {
    tx: broadcast::Sender<Envelope<E>>,
    recent: RwLock<VecDeque<Envelope<E>>>,
}

impl<E: Clone> EventBus<E> {
    /// `capacity` bounds the broadcast buffer; lagging receivers lose the
    /// oldest messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope<E>> {
        self.tx.subscribe()
    }

    /// Publish `event` to `client_id` and remember it.
    pub fn publish(&self, client_id: &str, event: E) -> Envelope<E> {
        let envelope = Envelope::new(client_id, event);
        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT {
                recent.pop_back();
            }
            recent.push_front(envelope.clone());
        }
        // No subscribers is fine.
        let _ = self.tx.send(envelope.clone());
        envelope
    }

    /// Up to `n` recent messages for `client_id`, oldest first.
    pub fn recent_for(&self, client_id: &str, n: usize) -> Vec<Envelope<E>> {
        let recent = self.recent.read();
        let mut out: Vec<_> = recent
            .iter()
            .filter(|m| m.client_id == client_id)
            .take(n)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(256)
    }
}
