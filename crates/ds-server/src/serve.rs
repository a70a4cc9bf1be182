//! HEAD/GET/Range responses over a blocking `Read + Seek` source.
//!
//! Bodies are produced by a `spawn_blocking` task that copies exactly the
//! requested bytes in [`TEE_CHUNK_SIZE`] chunks into a small channel; the
//! copy stops as soon as the client goes away or the stream scope ends.

use std::io::{self, Read, Seek, SeekFrom};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use ds_core::{Error, Result};
use ds_io::{BoxReadSeek, TEE_CHUNK_SIZE};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::range::{parse_range, unsatisfied_range, ByteRange, RangeError};

/// Headers sent with every stream response.
pub fn stream_headers(content_type: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}

/// 416 with `Content-Range: bytes */<size>` and no body.
pub fn range_not_satisfiable(size: u64) -> Response {
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [(header::CONTENT_RANGE, unsatisfied_range(size))],
        Body::empty(),
    )
        .into_response()
}

/// Which part of the resource a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// 200 with the whole body.
    Full,
    /// 206 with one range.
    Partial(ByteRange),
    /// 416.
    Unsatisfiable,
}

/// Resolve the request's `Range` header; only the first range is honoured.
pub fn select(headers: &HeaderMap, size: u64) -> Result<Selection> {
    let Some(value) = headers.get(header::RANGE) else {
        return Ok(Selection::Full);
    };
    let value = value
        .to_str()
        .map_err(|_| Error::BadRequest("non-ASCII Range header".into()))?;
    match parse_range(value, size) {
        Ok(ranges) => Ok(match ranges.first() {
            None => Selection::Full,
            Some(range) if range.is_full(size) => Selection::Full,
            Some(range) => Selection::Partial(*range),
        }),
        Err(RangeError::Invalid | RangeError::NoOverlap) => Ok(Selection::Unsatisfiable),
    }
}

/// Serve `size` bytes of a source opened on demand by `open`.
///
/// `open` runs on the blocking pool, so it may block (torrent readers wait
/// for pieces, cache readers for populated bytes).
pub fn serve_reader<F>(
    method: &Method,
    headers: &HeaderMap,
    size: u64,
    content_type: &str,
    cancel: CancellationToken,
    open: F,
) -> Result<Response>
where
    F: FnOnce() -> Result<BoxReadSeek> + Send + 'static,
{
    let mut response_headers = stream_headers(content_type);

    if method == Method::HEAD {
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        return Ok((StatusCode::OK, response_headers, Body::empty()).into_response());
    }

    let (status, range) = match select(headers, size)? {
        Selection::Unsatisfiable => return Ok(range_not_satisfiable(size)),
        Selection::Full => (StatusCode::OK, ByteRange { start: 0, length: size }),
        Selection::Partial(range) => {
            if let Ok(value) = HeaderValue::from_str(&range.content_range(size)) {
                response_headers.insert(header::CONTENT_RANGE, value);
            }
            (StatusCode::PARTIAL_CONTENT, range)
        }
    };
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.length));

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);
    tokio::task::spawn_blocking(move || {
        let result = open().and_then(|reader| copy_range(reader, range, &tx, &cancel));
        if let Err(e) = result {
            if e.is_shutdown() {
                trace!(error = %e, "Stream copy stopped");
            } else {
                debug!(error = %e, start = range.start, "Stream copy failed");
                let _ = tx.blocking_send(Err(e.into_io()));
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Ok((status, response_headers, body).into_response())
}

fn copy_range(
    mut reader: BoxReadSeek,
    range: ByteRange,
    tx: &mpsc::Sender<io::Result<Bytes>>,
    cancel: &CancellationToken,
) -> Result<()> {
    reader.seek(SeekFrom::Start(range.start))?;
    let mut remaining = range.length;
    let mut buf = vec![0u8; TEE_CHUNK_SIZE];
    while remaining > 0 {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let want = remaining.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::Io {
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended with {remaining} bytes left"),
                ),
            });
        }
        if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
            // Client went away.
            return Err(Error::Cancelled);
        }
        remaining -= n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn opener(bytes: Vec<u8>) -> impl FnOnce() -> Result<BoxReadSeek> + Send + 'static {
        move || Ok(Box::new(Cursor::new(bytes)) as BoxReadSeek)
    }

    fn range_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_str(value).unwrap());
        headers
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn head_reports_length_without_body() {
        let response = serve_reader(
            &Method::HEAD,
            &HeaderMap::new(),
            1000,
            "video/webm",
            CancellationToken::new(),
            opener(data(1000)),
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/webm");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn full_body_without_range() {
        let bytes = data(100_000);
        let response = serve_reader(
            &Method::GET,
            &HeaderMap::new(),
            bytes.len() as u64,
            "video/mp4",
            CancellationToken::new(),
            opener(bytes.clone()),
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(body_bytes(response).await, bytes);
    }

    #[tokio::test]
    async fn whole_file_range_is_plain_ok() {
        let bytes = data(4096);
        let response = serve_reader(
            &Method::GET,
            &range_headers("bytes=0-"),
            4096,
            "video/webm",
            CancellationToken::new(),
            opener(bytes.clone()),
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
        assert_eq!(body_bytes(response).await, bytes);
    }

    #[tokio::test]
    async fn partial_range() {
        let bytes = data(100_000);
        let response = serve_reader(
            &Method::GET,
            &range_headers("bytes=40000-80000"),
            bytes.len() as u64,
            "video/webm",
            CancellationToken::new(),
            opener(bytes.clone()),
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            "bytes 40000-80000/100000"
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "40001");
        assert_eq!(body_bytes(response).await, &bytes[40000..=80000]);
    }

    #[tokio::test]
    async fn bad_ranges_are_416() {
        for value in ["bytes=abc", "bytes=5000-"] {
            let response = serve_reader(
                &Method::GET,
                &range_headers(value),
                1000,
                "video/webm",
                CancellationToken::new(),
                opener(data(1000)),
            )
            .unwrap();
            assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE, "{value}");
            assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
        }
    }

    #[test]
    fn selection() {
        assert_eq!(select(&HeaderMap::new(), 10).unwrap(), Selection::Full);
        assert_eq!(
            select(&range_headers("bytes=2-3"), 10).unwrap(),
            Selection::Partial(ByteRange { start: 2, length: 2 })
        );
        assert_eq!(
            select(&range_headers("bytes=-0"), 10).unwrap(),
            Selection::Unsatisfiable
        );
    }
}
