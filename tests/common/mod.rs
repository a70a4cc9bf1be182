//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a full [`AppContext`] with the
//! player event dispatcher running. The [`TestHarness::with_server`]
//! constructor starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ds_core::config::Config;
use ds_media::testing::{BlockSpec, MkvBuilder};
use ds_media::{Track, TrackKind};
use ds_server::bus::ClientMessage;
use ds_server::context::AppContext;
use ds_server::router::build_router;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use wiremock::{Request, Respond, ResponseTemplate};

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub cancel: CancellationToken,
}

impl TestHarness {
    /// Create a new harness with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a new harness with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let ctx = AppContext::new(config).expect("failed to build context");
        let cancel = CancellationToken::new();
        ctx.spawn_dispatcher(cancel.clone());
        Self { ctx, cancel }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_config(Config::default()).await
    }

    /// Start an Axum server with custom config on a random port.
    pub async fn with_server_config(config: Config) -> (Self, SocketAddr) {
        let harness = Self::with_config(config);
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
        self.ctx.bus.subscribe()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.ctx.sessions.stop();
    }
}

/// Wait up to five seconds for a client message matching `matches`.
pub async fn expect_event(
    rx: &mut broadcast::Receiver<ClientMessage>,
    mut matches: impl FnMut(&ClientMessage) -> bool,
) -> ClientMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = rx.recv().await.expect("client bus closed");
            if matches(&message) {
                return message;
            }
        }
    })
    .await
    .expect("timed out waiting for client event")
}

/// Poll `check` every 20 ms for up to five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// An MKV with one ASS track (number 2) carrying "Hi" at 100 ms, padded
/// to `len` bytes.
pub fn small_episode(len: usize) -> Vec<u8> {
    MkvBuilder::new()
        .duration_ms(4000.0)
        .ass_track(2)
        .cluster(
            0,
            vec![BlockSpec::group(
                2,
                100,
                b"1,0,Default,,0,0,0,,Hi".to_vec(),
                900,
            )],
        )
        .pad_to(len)
        .build()
}

/// An MKV of `clusters` clusters, each carrying a 1 MB video frame and one
/// subtitle line `Line {n}` on track 2. Returns the file and cluster offsets.
pub fn large_episode(clusters: u64) -> (Vec<u8>, Vec<u64>) {
    let mut builder = MkvBuilder::new()
        .duration_ms(clusters as f64 * 1000.0)
        .track(Track::new(1, TrackKind::Video, "V_MPEG4/ISO/AVC"))
        .ass_track(2);
    for n in 0..clusters {
        builder = builder.cluster(
            n * 1000,
            vec![
                BlockSpec::simple(1, 0, vec![0u8; 1_000_000]).keyframe(),
                BlockSpec::group(
                    2,
                    10,
                    format!("{n},0,Default,,0,0,0,,Line {n}").into_bytes(),
                    500,
                ),
            ],
        );
    }
    builder.build_with_offsets()
}

/// Wiremock responder that honours `Range: bytes=a-b` the way a CDN does.
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    content_type: String,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>, content_type: &str) -> Self {
        Self {
            body: Arc::new(body),
            content_type: content_type.to_string(),
        }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|spec| {
                let (start, end) = spec.split_once('-')?;
                let start: u64 = start.parse().ok()?;
                let end = match end {
                    "" => len - 1,
                    end => end.parse::<u64>().ok()?.min(len - 1),
                };
                (start <= end).then_some((start, end))
            });

        let template = match range {
            Some((start, end)) => ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes {start}-{end}/{len}").as_str(),
                )
                .set_body_bytes(self.body[start as usize..=end as usize].to_vec()),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.as_slice().to_vec()),
        };
        template
            .insert_header("content-type", self.content_type.as_str())
            .insert_header("accept-ranges", "bytes")
    }
}
