//! Control-plane endpoints: starting and stopping streams, player events,
//! subtitle uploads and session settings.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use ds_core::config::PlaybackSettings;
use ds_core::{Error, StreamId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AppContext;
use crate::error::AppError;
use crate::player::PlayerEvent;
use crate::session::StreamOptions;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLocalRequest {
    pub client_id: String,
    pub path: String,
    pub episode: Option<Value>,
    pub media: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRemoteRequest {
    pub client_id: String,
    pub url: String,
    pub episode: Option<Value>,
    pub media: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub stream_id: StreamId,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub stopped: Option<StreamId>,
}

/// POST /directstream/local
pub async fn start_local(
    State(ctx): State<AppContext>,
    Json(req): Json<StartLocalRequest>,
) -> Result<(StatusCode, Json<StartResponse>), AppError> {
    let options = StreamOptions {
        client_id: req.client_id,
        episode: req.episode,
        media: req.media,
    };
    let stream = ctx.sessions.start_local_file(req.path, options)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            stream_id: stream.id(),
        }),
    ))
}

/// POST /directstream/remote
pub async fn start_remote(
    State(ctx): State<AppContext>,
    Json(req): Json<StartRemoteRequest>,
) -> Result<(StatusCode, Json<StartResponse>), AppError> {
    let options = StreamOptions {
        client_id: req.client_id,
        episode: req.episode,
        media: req.media,
    };
    let stream = ctx.sessions.start_remote_http(&req.url, options)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            stream_id: stream.id(),
        }),
    ))
}

/// POST /directstream/player-event
///
/// Body: `{"clientId": "...", "type": "paused", "payload": {...}}`.
pub async fn player_event(
    State(ctx): State<AppContext>,
    Json(body): Json<Value>,
) -> Result<StatusCode, AppError> {
    let client_id = body
        .get("clientId")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::BadRequest("missing clientId".into()))?
        .to_string();
    let event: PlayerEvent = serde_json::from_value(body)
        .map_err(|e| Error::BadRequest(format!("invalid player event: {e}")))?;

    let delivered = ctx.player_events.publish(&client_id, event).await;
    tracing::trace!(%client_id, delivered, "Player event accepted");
    Ok(StatusCode::ACCEPTED)
}

/// POST /directstream/subtitles
///
/// Forwards the upload to the current stream as a player event.
pub async fn upload_subtitles(
    State(ctx): State<AppContext>,
    Json(req): Json<UploadRequest>,
) -> Result<StatusCode, AppError> {
    if req.filename.trim().is_empty() {
        return Err(Error::BadRequest("missing filename".into()).into());
    }
    let stream = ctx
        .sessions
        .current()
        .ok_or_else(|| Error::not_found("stream", "current"))?;
    ctx.player_events
        .publish(
            stream.client_id(),
            PlayerEvent::SubtitleFileUploaded {
                filename: req.filename,
                content: req.content,
            },
        )
        .await;
    Ok(StatusCode::ACCEPTED)
}

/// GET /directstream/settings
pub async fn get_settings(State(ctx): State<AppContext>) -> Json<PlaybackSettings> {
    Json(ctx.sessions.settings())
}

/// POST /directstream/settings
pub async fn put_settings(
    State(ctx): State<AppContext>,
    Json(settings): Json<PlaybackSettings>,
) -> Json<PlaybackSettings> {
    ctx.sessions.update_settings(settings);
    Json(settings)
}

/// POST /directstream/stop
pub async fn stop(State(ctx): State<AppContext>) -> Json<StopResponse> {
    Json(StopResponse {
        stopped: ctx.sessions.stop(),
    })
}
