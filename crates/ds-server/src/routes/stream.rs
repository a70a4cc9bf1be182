//! The stream URL handed to the player.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use ds_core::{Error, StreamId};
use serde::Deserialize;

use crate::context::AppContext;
use crate::error::AppError;

/// Header that marks a request as a thumbnail/preview fetch.
pub const THUMBNAIL_HEADER: &str = "x-directstream-thumbnail";

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub id: Option<String>,
    /// `1` or `true` marks a thumbnail fetch, like [`THUMBNAIL_HEADER`].
    pub thumbnail: Option<String>,
}

/// GET|HEAD /stream?id=<uuid>
pub async fn stream(
    State(ctx): State<AppContext>,
    method: Method,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let id: StreamId = query
        .id
        .as_deref()
        .ok_or_else(|| Error::BadRequest("missing stream id".into()))?
        .parse()
        .map_err(|_| Error::BadRequest("invalid stream id".into()))?;
    let stream = ctx.sessions.stream(id)?;
    let thumbnail = is_thumbnail(&headers, query.thumbnail.as_deref());

    tracing::trace!(
        stream_id = %id,
        method = %method,
        range = ?headers.get(axum::http::header::RANGE),
        thumbnail,
        "Stream request"
    );
    Ok(stream.handle(&method, &headers, thumbnail).await?)
}

fn is_thumbnail(headers: &HeaderMap, query: Option<&str>) -> bool {
    let truthy = |v: &str| matches!(v.trim(), "1" | "true" | "yes");
    headers
        .get(THUMBNAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(truthy)
        || query.is_some_and(truthy)
}
