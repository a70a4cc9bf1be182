//! Proxying remote ranges through the shared cache.
//!
//! The upstream body is copied by [`RangeCache::write_and_tee`] so every
//! byte the player receives also lands in the cache for subtitle readers.

use std::io;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use ds_core::{Error, Result};
use ds_io::{parse_content_range, RangeCache};
use futures::TryStreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, trace, warn};

use crate::serve::stream_headers;

/// Headers that describe one connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A proxied response and where its body starts in the resource.
pub struct Proxied {
    pub response: Response,
    pub offset: u64,
}

/// Forward a GET to `url` with the client's `Range` header and tee the body.
///
/// `requested_start` is the first byte the client asked for; an upstream
/// that answers a non-zero start with a plain 200 does not support ranges.
pub async fn forward(
    client: &reqwest::Client,
    url: &str,
    request_headers: &HeaderMap,
    requested_start: u64,
    cache: &RangeCache,
    content_type: &str,
) -> Result<Proxied> {
    let mut request = client.get(url);
    if let Some(range) = request_headers.get(header::RANGE) {
        request = request.header(reqwest::header::RANGE, range.as_bytes());
    }
    let upstream = request
        .send()
        .await
        .map_err(|e| Error::Upstream(e.to_string()))?;

    let status = upstream.status();
    if !status.is_success() {
        return Err(Error::Upstream(format!("GET {url} returned {status}")));
    }
    let offset = if status == reqwest::StatusCode::PARTIAL_CONTENT {
        upstream
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .and_then(|(start, _)| start)
            .unwrap_or(requested_start)
    } else if requested_start > 0 {
        return Err(Error::UnsupportedRange {
            offset: requested_start,
        });
    } else {
        0
    };
    trace!(url, %status, offset, "Upstream responded");

    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    // Resolved type and streaming headers win over upstream's.
    for (name, value) in stream_headers(content_type) {
        if let Some(name) = name {
            headers.insert(name, value);
        }
    }

    let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK);
    let body = upstream.bytes_stream().map_err(io::Error::other);
    let source = StreamReader::new(body);

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(8);
    let errors = tx.clone();
    let cache = cache.clone();
    tokio::spawn(async move {
        match cache.write_and_tee(source, Some(tx), offset).await {
            Ok(total) => debug!(offset, total, "Proxy tee finished"),
            Err(e) if e.is_shutdown() => trace!(offset, "Proxy tee stopped"),
            Err(e) => {
                warn!(offset, error = %e, "Proxy tee failed");
                let _ = errors.send(Err(e.into_io())).await;
            }
        }
    });

    let response = (status, headers, Body::from_stream(ReceiverStream::new(rx))).into_response();
    Ok(Proxied { response, offset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header as header_is, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    fn range(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn tees_ranged_body_into_cache() {
        let server = MockServer::start().await;
        let file = data(200_000);
        Mock::given(method("GET"))
            .and(header_is("range", "bytes=100000-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 100000-199999/200000")
                    .insert_header("Content-Type", "application/octet-stream")
                    .insert_header("ETag", "\"abc\"")
                    .set_body_bytes(file[100_000..].to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = RangeCache::open(200_000, None, CancellationToken::new()).unwrap();
        let proxied = forward(
            &reqwest::Client::new(),
            &format!("{}/video.mkv", server.uri()),
            &range("bytes=100000-"),
            100_000,
            &cache,
            "video/webm",
        )
        .await
        .unwrap();

        assert_eq!(proxied.offset, 100_000);
        let response = proxied.response;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/webm");
        assert_eq!(response.headers()[header::ETAG], "\"abc\"");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &file[100_000..]);
        assert_eq!(cache.intervals(), vec![(100_000, 199_999)]);
    }

    #[tokio::test]
    async fn ignored_range_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data(1000)))
            .mount(&server)
            .await;

        let cache = RangeCache::open(1000, None, CancellationToken::new()).unwrap();
        let err = forward(
            &reqwest::Client::new(),
            &server.uri(),
            &range("bytes=500-"),
            500,
            &cache,
            "video/mp4",
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::UnsupportedRange { offset: 500 }));
    }

    #[tokio::test]
    async fn upstream_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache = RangeCache::open(1000, None, CancellationToken::new()).unwrap();
        let err = forward(
            &reqwest::Client::new(),
            &server.uri(),
            &HeaderMap::new(),
            0,
            &cache,
            "video/mp4",
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::Upstream(_)));
    }
}
