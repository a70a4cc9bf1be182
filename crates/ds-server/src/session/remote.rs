use bytes::BytesMut;
use ds_core::config::StreamConfig;
use ds_core::{Error, Result};
use ds_io::{parse_content_range, RangeCache, RangeHttpReadSeeker};
use ds_media::sniff::{
    content_type_for_path, is_archive_path, is_streamable_type, normalize_content_type,
    sniff_content_type,
};
use parking_lot::Mutex;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::Client;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Bytes requested by the probe `GET`.
const PROBE_LEN: usize = 512;

/// What the probe learned about a remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProbe {
    pub content_type: String,
    pub size: u64,
}

/// A video served by a remote HTTP(S) server, proxied through a range cache.
#[derive(Debug)]
pub struct RemoteHttp {
    url: Url,
    probe: OnceCell<RemoteProbe>,
    cache: Mutex<Option<RangeCache>>,
}

impl RemoteHttp {
    pub fn new(url: &str) -> Result<Self> {
        let url =
            Url::parse(url).map_err(|e| Error::BadRequest(format!("invalid URL {url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::BadRequest(format!(
                "unsupported URL scheme {}",
                url.scheme()
            )));
        }
        if is_archive_path(url.path()) {
            return Err(Error::UnsupportedContent(format!(
                "{url} is an archive and cannot stream"
            )));
        }
        Ok(Self {
            url,
            probe: OnceCell::new(),
            cache: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Content type and length, probed once.
    pub async fn probe(&self, client: &Client, config: &StreamConfig) -> Result<&RemoteProbe> {
        self.probe
            .get_or_try_init(|| probe_remote(client, &self.url, config))
            .await
    }

    /// The probe result, once [`probe`](Self::probe) has succeeded.
    pub fn probed(&self) -> Option<&RemoteProbe> {
        self.probe.get()
    }

    /// The shared cache for this stream, created on first use.
    pub fn cache(
        &self,
        size: u64,
        config: &StreamConfig,
        scope: &CancellationToken,
    ) -> Result<RangeCache> {
        let mut slot = self.cache.lock();
        if let Some(cache) = slot.as_ref() {
            return Ok(cache.clone());
        }
        let cache = RangeCache::open(size, config.cache_dir.as_deref(), scope.clone())?;
        *slot = Some(cache.clone());
        Ok(cache)
    }

    pub fn existing_cache(&self) -> Option<RangeCache> {
        self.cache.lock().clone()
    }

    /// A direct ranged reader for header and attachment reads.
    ///
    /// Bypasses the cache, which only the proxy feeds. Must be called inside
    /// the runtime: the HTTP reader binds to it.
    pub fn http_reader(
        &self,
        client: &Client,
        size: u64,
        scope: &CancellationToken,
        config: &StreamConfig,
    ) -> RangeHttpReadSeeker {
        RangeHttpReadSeeker::new(client.clone(), self.url.as_str(), scope.clone())
            .with_head_timeout(config.head_timeout())
            .with_size(size)
    }

    pub fn close(&self) {
        if let Some(cache) = self.cache.lock().take() {
            cache.close();
        }
    }
}

async fn probe_remote(client: &Client, url: &Url, config: &StreamConfig) -> Result<RemoteProbe> {
    let mut content_type = None;
    let mut size = None;

    match client
        .head(url.as_str())
        .timeout(config.head_timeout())
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            content_type = header_str(response.headers(), CONTENT_TYPE)
                .map(normalize_content_type)
                .filter(|t| !t.is_empty());
            size = header_str(response.headers(), CONTENT_LENGTH).and_then(|v| v.parse().ok());
        }
        Ok(response) => {
            debug!(url = %url, status = %response.status(), "HEAD rejected, probing with GET")
        }
        Err(e) => debug!(url = %url, error = %e, "HEAD failed, probing with GET"),
    }

    let mut head_bytes = BytesMut::new();
    if content_type.is_none() || size.is_none() {
        let mut response = client
            .get(url.as_str())
            .header(RANGE, format!("bytes=0-{}", PROBE_LEN - 1))
            .timeout(config.probe_timeout())
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("probe GET {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "probe GET {url} returned {}",
                response.status()
            )));
        }

        if content_type.is_none() {
            content_type = header_str(response.headers(), CONTENT_TYPE)
                .map(normalize_content_type)
                .filter(|t| !t.is_empty());
        }
        if size.is_none() {
            size = if response.status() == reqwest::StatusCode::PARTIAL_CONTENT {
                header_str(response.headers(), CONTENT_RANGE)
                    .and_then(parse_content_range)
                    .and_then(|(_, total)| total)
            } else {
                header_str(response.headers(), CONTENT_LENGTH).and_then(|v| v.parse().ok())
            };
        }

        while head_bytes.len() < PROBE_LEN {
            match response
                .chunk()
                .await
                .map_err(|e| Error::Upstream(format!("probe GET {url} failed: {e}")))?
            {
                Some(chunk) => head_bytes.extend_from_slice(&chunk),
                None => break,
            }
        }
    }

    let mut content_type = match content_type {
        Some(t) => t,
        None => sniff_content_type(&head_bytes).to_string(),
    };
    if content_type == "application/octet-stream" {
        if let Some(by_ext) = content_type_for_path(url.path()) {
            content_type = by_ext.to_string();
        }
    }
    if !is_streamable_type(&content_type) {
        return Err(Error::UnsupportedContent(format!(
            "{url} serves {content_type}, which cannot stream"
        )));
    }
    let size = size.ok_or_else(|| Error::Upstream(format!("{url} did not report its length")))?;

    info!(url = %url, content_type, size, "Probed remote stream");
    Ok(RemoteProbe { content_type, size })
}

fn header_str(
    headers: &reqwest::header::HeaderMap,
    name: reqwest::header::HeaderName,
) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> StreamConfig {
        StreamConfig::default()
    }

    #[test]
    fn validates_urls() {
        assert!(matches!(RemoteHttp::new("not a url"), Err(Error::BadRequest(_))));
        assert!(matches!(
            RemoteHttp::new("ftp://example.com/a.mkv"),
            Err(Error::BadRequest(_))
        ));
        let err = RemoteHttp::new("https://example.com/pack.zip?dl=1").unwrap_err();
        assert!(matches!(err, Error::UnsupportedContent(_)));
        assert!(err.to_string().contains("cannot stream"));
        assert!(RemoteHttp::new("https://example.com/a.mkv").is_ok());
    }

    #[tokio::test]
    async fn head_answers_the_probe() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "video/mp4; charset=binary")
                    .set_body_bytes(vec![0u8; 4096]),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let remote = RemoteHttp::new(&format!("{}/ep.mp4", server.uri())).unwrap();
        let probe = remote.probe(&Client::new(), &config()).await.unwrap();
        assert_eq!(probe.content_type, "video/mp4");
        assert_eq!(probe.size, 4096);
    }

    #[tokio::test]
    async fn falls_back_to_ranged_get_and_sniffs() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        let mut head = ds_media::testing::MkvBuilder::new().doc_type("webm").build();
        head.resize(512, 0);
        Mock::given(method("GET"))
            .and(header("range", "bytes=0-511"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 0-511/2000000")
                    .set_body_bytes(head),
            )
            .mount(&server)
            .await;

        let remote = RemoteHttp::new(&format!("{}/stream", server.uri())).unwrap();
        let probe = remote.probe(&Client::new(), &config()).await.unwrap();
        assert_eq!(probe.content_type, "video/webm");
        assert_eq!(probe.size, 2_000_000);
    }

    #[tokio::test]
    async fn download_types_use_the_extension() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/force-download")
                    .set_body_bytes(vec![0u8; 100]),
            )
            .mount(&server)
            .await;

        let remote = RemoteHttp::new(&format!("{}/ep.mkv", server.uri())).unwrap();
        let probe = remote.probe(&Client::new(), &config()).await.unwrap();
        assert_eq!(probe.content_type, "video/webm");
    }

    #[tokio::test]
    async fn html_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html")
                    .set_body_bytes(b"<html></html>".to_vec()),
            )
            .mount(&server)
            .await;

        let remote = RemoteHttp::new(&format!("{}/watch", server.uri())).unwrap();
        let err = remote.probe(&Client::new(), &config()).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedContent(_)));
    }

    #[tokio::test]
    async fn cache_is_created_once() {
        let remote = RemoteHttp::new("http://127.0.0.1:9/ep.mkv").unwrap();
        let scope = CancellationToken::new();
        let first = remote.cache(1000, &config(), &scope).unwrap();
        first.write(&[1, 2, 3], 0).unwrap();
        let second = remote.cache(1000, &config(), &scope).unwrap();
        assert_eq!(second.intervals(), vec![(0, 2)]);

        remote.close();
        assert!(first.is_closed());
        assert!(remote.existing_cache().is_none());
    }
}
