use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use ds_core::Error;

use crate::context::AppContext;
use crate::error::AppError;

/// GET /attachments/{name}
///
/// Raw bytes of an attachment of the current stream, with its stored MIME.
pub async fn get_attachment(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let stream = ctx
        .sessions
        .current()
        .ok_or_else(|| Error::not_found("attachment", &name))?;
    let (mime, data) = stream.attachment(&name).await?;

    let content_type = match HeaderValue::from_str(&mime) {
        Ok(value) if !mime.is_empty() => value,
        _ => HeaderValue::from_static("application/octet-stream"),
    };
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        data,
    )
        .into_response())
}
