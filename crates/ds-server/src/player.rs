//! Player-side event fan-out.
//!
//! The client reports video element state changes; the session manager and
//! any other interested component subscribe with a filter. Each subscriber
//! owns a bounded queue: critical events wait up to [`CRITICAL_SEND_TIMEOUT`]
//! for room, non-critical ones are dropped when the queue is full.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Queue depth of every subscriber.
pub const SUBSCRIBER_CAPACITY: usize = 50;
/// Longest a critical event waits for a full subscriber.
pub const CRITICAL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Video element events reported by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum PlayerEvent {
    LoadedMetadata,
    Paused { current_time: f64 },
    Resumed { current_time: f64 },
    Seeked { current_time: f64 },
    TimeUpdate { current_time: f64, duration: f64 },
    Status { current_time: f64, duration: f64, paused: bool },
    Ended,
    Completed,
    Terminated,
    Error { error: String },
    SubtitleFileUploaded { filename: String, content: String },
}

impl PlayerEvent {
    /// Everything but periodic position reports must be delivered.
    pub fn is_critical(&self) -> bool {
        !matches!(self, PlayerEvent::TimeUpdate { .. } | PlayerEvent::Status { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::LoadedMetadata => "loaded-metadata",
            PlayerEvent::Paused { .. } => "paused",
            PlayerEvent::Resumed { .. } => "resumed",
            PlayerEvent::Seeked { .. } => "seeked",
            PlayerEvent::TimeUpdate { .. } => "time-update",
            PlayerEvent::Status { .. } => "status",
            PlayerEvent::Ended => "ended",
            PlayerEvent::Completed => "completed",
            PlayerEvent::Terminated => "terminated",
            PlayerEvent::Error { .. } => "error",
            PlayerEvent::SubtitleFileUploaded { .. } => "subtitle-file-uploaded",
        }
    }
}

/// A player event tagged with the client that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerMessage {
    pub client_id: String,
    pub event: PlayerEvent,
}

type Filter = Box<dyn Fn(&PlayerMessage) -> bool + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: Filter,
    tx: mpsc::Sender<PlayerMessage>,
}

/// Receiving end of a subscription; unsubscribes when dropped.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<PlayerMessage>,
    bus: Arc<Inner>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<PlayerMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PlayerMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.write().retain(|s| s.id != self.id);
    }
}

#[derive(Default)]
struct Inner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

#[derive(Default, Clone)]
pub struct PlayerEventBus {
    inner: Arc<Inner>,
}

impl PlayerEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event of every client.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_filtered(|_| true)
    }

    /// Only the events of one client.
    pub fn subscribe_client(&self, client_id: impl Into<String>) -> Subscription {
        let client_id = client_id.into();
        self.subscribe_filtered(move |m| m.client_id == client_id)
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> Subscription
    where
        F: Fn(&PlayerMessage) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push(Subscriber {
            id,
            filter: Box::new(filter),
            tx,
        });
        Subscription {
            id,
            rx,
            bus: self.inner.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Deliver `event` to every matching subscriber; returns how many got it.
    pub async fn publish(&self, client_id: &str, event: PlayerEvent) -> usize {
        let message = PlayerMessage {
            client_id: client_id.to_string(),
            event,
        };
        let critical = message.event.is_critical();

        // Collect senders first so no lock is held across an await.
        let targets: Vec<mpsc::Sender<PlayerMessage>> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| (s.filter)(&message))
            .map(|s| s.tx.clone())
            .collect();

        let mut delivered = 0;
        for tx in targets {
            let sent = if critical {
                match tx.send_timeout(message.clone(), CRITICAL_SEND_TIMEOUT).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(event = message.event.name(), error = %e, "Dropped critical player event");
                        false
                    }
                }
            } else {
                match tx.try_send(message.clone()) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(event = message.event.name(), error = %e, "Dropped player event");
                        false
                    }
                }
            };
            if sent {
                delivered += 1;
            }
        }
        delivered
    }
}
