//! Blocking `Read + Seek` over an HTTP resource using `Range` requests.
//!
//! Reads are driven through a tokio [`Handle`], so the reader must live on a
//! blocking thread (`spawn_blocking`), never on a runtime worker.

use std::io::{self, Read, Seek, SeekFrom};
use std::time::Duration;

use bytes::{Buf, Bytes};
use ds_core::{Error, Result};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const DEFAULT_HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse `Content-Range: bytes <a>-<b>/<total>` (or `bytes */<total>`).
///
/// Returns `(start, total)`; either may be absent (`*`).
pub fn parse_content_range(value: &str) -> Option<(Option<u64>, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let start = match range.trim() {
        "*" => None,
        r => Some(r.split_once('-')?.0.trim().parse().ok()?),
    };
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, total))
}

/// Transparent reader over a remote URL.
pub struct RangeHttpReadSeeker {
    client: Client,
    url: String,
    handle: Handle,
    cancel: CancellationToken,
    head_timeout: Duration,
    pos: u64,
    size: Option<u64>,
    response: Option<Response>,
    buffer: Bytes,
}

impl RangeHttpReadSeeker {
    /// Create a reader bound to the current runtime.
    ///
    /// Panics outside a tokio runtime context, like [`Handle::current`].
    pub fn new(client: Client, url: impl Into<String>, cancel: CancellationToken) -> Self {
        Self::with_handle(client, url, cancel, Handle::current())
    }

    pub fn with_handle(
        client: Client,
        url: impl Into<String>,
        cancel: CancellationToken,
        handle: Handle,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            handle,
            cancel,
            head_timeout: DEFAULT_HEAD_TIMEOUT,
            pos: 0,
            size: None,
            response: None,
            buffer: Bytes::new(),
        }
    }

    /// Seed the size when it is already known (skips the HEAD).
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_head_timeout(mut self, timeout: Duration) -> Self {
        self.head_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Total size, issuing a HEAD if it is not known yet.
    pub fn size(&mut self) -> Result<u64> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        let size = self.block_on(head_length(&self.client, &self.url, self.head_timeout))?;
        self.size = Some(size);
        Ok(size)
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let cancel = self.cancel.clone();
        self.handle.block_on(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                res = fut => res,
            }
        })
    }

    fn open(&mut self) -> Result<()> {
        let offset = self.pos;
        trace!(url = %self.url, offset, "Opening ranged GET");
        let request = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={offset}-"));
        let response = self.block_on(async move {
            request
                .send()
                .await
                .map_err(|e| Error::Upstream(e.to_string()))
        })?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let total = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range)
                    .and_then(|(_, total)| total);
                if let Some(total) = total {
                    self.size.get_or_insert(total);
                }
            }
            StatusCode::OK if offset == 0 => {
                let length = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                if let Some(length) = length {
                    self.size.get_or_insert(length);
                }
            }
            StatusCode::OK => return Err(Error::UnsupportedRange { offset }),
            StatusCode::RANGE_NOT_SATISFIABLE => {
                // Reading at or past the end.
                self.size.get_or_insert(offset);
                self.response = None;
                return Ok(());
            }
            status => {
                return Err(Error::Upstream(format!(
                    "GET {} returned {status}",
                    self.url
                )))
            }
        }

        if self.size.is_none() && offset == 0 {
            match self.block_on(head_length(&self.client, &self.url, self.head_timeout)) {
                Ok(size) => self.size = Some(size),
                Err(e) => debug!(url = %self.url, error = %e, "HEAD for size failed"),
            }
        }
        self.response = Some(response);
        Ok(())
    }

    fn invalidate(&mut self) {
        self.response = None;
        self.buffer = Bytes::new();
    }
}

impl Read for RangeHttpReadSeeker {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled.into_io());
        }
        if buf.is_empty() || self.size.is_some_and(|size| self.pos >= size) {
            return Ok(0);
        }

        if self.buffer.is_empty() {
            if self.response.is_none() {
                self.open().map_err(Error::into_io)?;
                if self.size.is_some_and(|size| self.pos >= size) {
                    return Ok(0);
                }
            }
            let Some(mut response) = self.response.take() else {
                return Ok(0);
            };
            let chunk = self
                .block_on(async move {
                    let chunk = response
                        .chunk()
                        .await
                        .map_err(|e| Error::Upstream(e.to_string()))?;
                    Ok((chunk, response))
                })
                .map_err(Error::into_io)?;
            match chunk {
                (Some(bytes), response) => {
                    self.buffer = bytes;
                    self.response = Some(response);
                }
                (None, _) => return Ok(0),
            }
        }

        let n = buf.len().min(self.buffer.len());
        buf[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for RangeHttpReadSeeker {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => {
                let size = self.size().map_err(Error::into_io)?;
                size.checked_add_signed(d)
            }
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;

        if target != self.pos {
            self.invalidate();
            self.pos = target;
        }
        Ok(target)
    }
}

/// `HEAD` the URL and return its `Content-Length`.
pub async fn head_length(client: &Client, url: &str, timeout: Duration) -> Result<u64> {
    let response = client
        .head(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::Upstream(e.to_string()))?;
    if !response.status().is_success() {
        return Err(Error::Upstream(format!(
            "HEAD {url} returned {}",
            response.status()
        )));
    }
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Upstream(format!("HEAD {url} has no Content-Length")))
}
