//! Server-Sent Events stream of client control messages.
//!
//! Replays recent messages for the client, then forwards live ones from the
//! [`ClientBus`](crate::bus::ClientBus) and sends keepalive heartbeats.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

use crate::bus::ClientMessage;
use crate::context::AppContext;

const REPLAY: usize = 50;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only deliver messages addressed to this client.
    #[serde(alias = "clientId")]
    pub client_id: Option<String>,
}

/// GET /events -- SSE stream of control messages.
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<EventsQuery>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let client_filter = params.client_id;

    let recent = match &client_filter {
        Some(client_id) => ctx.bus.recent_for(client_id, REPLAY),
        None => Vec::new(),
    };
    let mut rx = ctx.bus.subscribe();

    let stream = async_stream::stream! {
        for message in recent {
            if let Some(event) = to_sse(&message) {
                yield Ok(event);
            }
        }

        let mut heartbeat = tokio::time::interval(Duration::from_secs(15));

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(message) => {
                            if matches_client(&message, &client_filter) {
                                if let Some(event) = to_sse(&message) {
                                    yield Ok(event);
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!("SSE client lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok(Event::default()
                        .event("heartbeat")
                        .data(r#"{"type":"heartbeat"}"#));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn matches_client(message: &ClientMessage, filter: &Option<String>) -> bool {
    match filter {
        Some(client_id) => message.client_id == *client_id,
        None => true,
    }
}

fn to_sse(message: &ClientMessage) -> Option<Event> {
    let data = serde_json::to_string(message).ok()?;
    Some(Event::default().event(message.event.kind()).data(data))
}
