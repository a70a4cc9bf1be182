//! Control-plane messages sent to the client.

use ds_core::events::{Envelope, EventBus};
use ds_media::Track;
use ds_subtitle::SubtitleEvent;
use serde::{Deserialize, Serialize};

use crate::session::PlaybackInfo;

/// Events the engine pushes to the client, addressed by client id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Show a loading state with this step text.
    OpenAndAwait(String),
    /// Cancel the pending open.
    AbortOpen(String),
    /// Start playback from `streamUrl`.
    Watch(Box<PlaybackInfo>),
    SubtitleEvent(SubtitleEvent),
    /// The advertised track list changed.
    SetTracks(Vec<Track>),
    /// Terminal error for the current stream.
    Error { error: String },
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::OpenAndAwait(_) => "open-and-await",
            ClientEvent::AbortOpen(_) => "abort-open",
            ClientEvent::Watch(_) => "watch",
            ClientEvent::SubtitleEvent(_) => "subtitle-event",
            ClientEvent::SetTracks(_) => "set-tracks",
            ClientEvent::Error { .. } => "error",
        }
    }
}

pub type ClientBus = EventBus<ClientEvent>;
pub type ClientMessage = Envelope<ClientEvent>;
