//! One playback stream: cross-cutting state shared by every source kind,
//! plus the kind-specific source.
//!
//! A [`Stream`] owns a cancellation scope. Everything it starts (subtitle
//! streamers, the event forwarder, proxy tees, cache readers) runs under a
//! token derived from that scope, so [`Stream::terminate`] stops all of it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use axum::response::Response;
use ds_core::config::Config;
use ds_core::{Error, Result, StreamId};
use ds_io::{BoxReadSeek, CancellableReader, RangeCache};
use ds_media::{load_attachment, DemuxerOptions, MkvDemuxer, MkvMetadata, Track, TrackKind};
use ds_subtitle::decoder::ASS_CODEC_ID;
use ds_subtitle::{
    convert_to_ass, language_from_filename, title_from_filename, SubtitleEvent, SubtitleFormat,
};
use futures::{future, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, OnceCell};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::local::LocalFile;
use super::playback::{stream_url, PlaybackInfo, StreamType};
use super::remote::RemoteHttp;
use super::torrent::TorrentStream;
use crate::bus::{ClientBus, ClientEvent};
use crate::proxy;
use crate::serve::{range_not_satisfiable, select, serve_reader, Selection};
use crate::streamer::{spawn_streamer, StreamerHandle, StreamerParams, StreamerRegistry};
use crate::translator::Translator;

/// Capacity of the channel between subtitle pumps and the forwarder.
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// Translations in flight at once; delivery order is kept.
const TRANSLATE_CONCURRENCY: usize = 16;
const GRACE_POLL: Duration = Duration::from_millis(20);

/// Process-wide collaborators a stream needs.
#[derive(Clone)]
pub struct StreamEnv {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub bus: Arc<ClientBus>,
    pub translator: Option<Arc<Translator>>,
}

/// Per-start options supplied by the client.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub client_id: String,
    pub episode: Option<Value>,
    pub media: Option<Value>,
}

impl StreamOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

/// Where the bytes of a stream come from.
#[derive(Debug)]
pub enum Source {
    File(LocalFile),
    Http(RemoteHttp),
    Torrent(TorrentStream),
}

impl Source {
    pub fn kind(&self) -> StreamType {
        match self {
            Source::File(_) => StreamType::File,
            Source::Http(_) => StreamType::Http,
            Source::Torrent(_) => StreamType::Torrent,
        }
    }
}

/// State every stream kind carries.
struct BaseStream {
    id: StreamId,
    client_id: String,
    episode: Option<Value>,
    media: Option<Value>,
    scope: CancellationToken,
    env: StreamEnv,
    content_type: OnceCell<String>,
    playback: OnceCell<PlaybackInfo>,
    metadata: Arc<RwLock<Option<Arc<MkvMetadata>>>>,
    /// Fingerprints of events already delivered.
    seen: Arc<Mutex<HashSet<String>>>,
    streamers: Arc<StreamerRegistry>,
    events: mpsc::Sender<SubtitleEvent>,
    loaded: AtomicBool,
    completed: AtomicBool,
    terminated: Once,
}

pub struct Stream {
    base: BaseStream,
    source: Source,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.base.id)
            .field("client_id", &self.base.client_id)
            .field("source", &self.source)
            .finish()
    }
}

impl Stream {
    /// Build a stream and start its subtitle forwarder.
    ///
    /// Must be called inside the runtime.
    pub fn new(source: Source, options: StreamOptions, env: StreamEnv) -> Self {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let base = BaseStream {
            id: StreamId::new(),
            client_id: options.client_id,
            episode: options.episode,
            media: options.media,
            scope: CancellationToken::new(),
            env,
            content_type: OnceCell::new(),
            playback: OnceCell::new(),
            metadata: Arc::new(RwLock::new(None)),
            seen: Arc::new(Mutex::new(HashSet::new())),
            streamers: Arc::new(StreamerRegistry::new()),
            events,
            loaded: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            terminated: Once::new(),
        };
        spawn_forwarder(&base, rx);
        Self { base, source }
    }

    pub fn id(&self) -> StreamId {
        self.base.id
    }

    pub fn kind(&self) -> StreamType {
        self.source.kind()
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn client_id(&self) -> &str {
        &self.base.client_id
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.base.scope
    }

    pub fn streamers(&self) -> &Arc<StreamerRegistry> {
        &self.base.streamers
    }

    pub fn metadata(&self) -> Option<Arc<MkvMetadata>> {
        self.base.metadata.read().clone()
    }

    /// All tracks, including uploaded ones.
    pub fn tracks(&self) -> Vec<Track> {
        self.metadata()
            .map(|m| m.tracks.clone())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.base.loaded.load(Ordering::Acquire)
    }

    pub fn mark_loaded(&self) {
        self.base.loaded.store(true, Ordering::Release);
    }

    /// Latch completion; true only on the first call.
    pub fn mark_completed(&self) -> bool {
        !self.base.completed.swap(true, Ordering::AcqRel)
    }

    pub fn is_terminated(&self) -> bool {
        self.base.scope.is_cancelled()
    }

    /// The resolved content type, computed once.
    pub async fn content_type(&self) -> Result<String> {
        self.base
            .content_type
            .get_or_try_init(|| async {
                match &self.source {
                    Source::File(file) => file.resolve_content_type().await,
                    Source::Http(remote) => remote
                        .probe(&self.base.env.http, &self.base.env.config.stream)
                        .await
                        .map(|probe| probe.content_type.clone()),
                    Source::Torrent(torrent) => torrent.resolve_content_type().await,
                }
            })
            .await
            .cloned()
    }

    pub async fn size(&self) -> Result<u64> {
        match &self.source {
            Source::File(file) => Ok(file.size()),
            Source::Http(remote) => remote
                .probe(&self.base.env.http, &self.base.env.config.stream)
                .await
                .map(|probe| probe.size),
            Source::Torrent(torrent) => Ok(torrent.size()),
        }
    }

    /// Resolve everything the player needs, parsing Matroska metadata when
    /// the content type allows it. Computed once.
    pub async fn playback_info(&self) -> Result<PlaybackInfo> {
        self.base
            .playback
            .get_or_try_init(|| async {
                let content_type = self.content_type().await?;
                let size = self.size().await?;
                let metadata = if may_be_matroska(&content_type) {
                    self.load_metadata().await?
                } else {
                    None
                };
                Ok::<_, Error>(PlaybackInfo {
                    id: self.base.id,
                    stream_type: self.kind(),
                    content_length: size,
                    mime_type: content_type,
                    stream_url: stream_url(self.base.id),
                    server_url: self.base.env.config.server.public_url.clone(),
                    episode: self.base.episode.clone(),
                    media: self.base.media.clone(),
                    mkv_metadata: metadata.map(|m| (*m).clone()),
                })
            })
            .await
            .cloned()
    }

    async fn load_metadata(&self) -> Result<Option<Arc<MkvMetadata>>> {
        let reader = self.metadata_reader()?;
        let options = self.demuxer_options();
        let scope = self.base.scope.clone();
        let parsed = tokio::task::spawn_blocking(move || -> Result<MkvMetadata> {
            let demuxer = MkvDemuxer::open(CancellableReader::new(reader, scope), options)?;
            Ok(demuxer.into_metadata())
        })
        .await
        .map_err(|e| Error::Internal(format!("metadata task failed: {e}")))?;

        match parsed {
            Ok(metadata) => {
                info!(
                    stream_id = %self.base.id,
                    tracks = metadata.tracks.len(),
                    attachments = metadata.attachments.len(),
                    "Parsed Matroska metadata"
                );
                let metadata = Arc::new(metadata);
                *self.base.metadata.write() = Some(metadata.clone());
                Ok(Some(metadata))
            }
            Err(e) if e.is_shutdown() => Err(e),
            Err(e) => {
                warn!(stream_id = %self.base.id, error = %e, "Continuing without Matroska metadata");
                Ok(None)
            }
        }
    }

    fn demuxer_options(&self) -> DemuxerOptions {
        DemuxerOptions {
            attachment_inline_limit: self.base.env.config.stream.attachment_inline_limit,
            ..DemuxerOptions::default()
        }
    }

    fn remote_cache(&self, remote: &RemoteHttp) -> Result<RangeCache> {
        let size = remote
            .probed()
            .map(|probe| probe.size)
            .ok_or_else(|| Error::Internal("remote stream read before probing".into()))?;
        remote.cache(size, &self.base.env.config.stream, &self.base.scope)
    }

    /// A fresh blocking reader over the whole source.
    ///
    /// Remote readers view the shared cache and wait until the proxy has
    /// stored the bytes they need.
    pub fn source_reader(&self) -> Result<BoxReadSeek> {
        match &self.source {
            Source::File(file) => file.reader(),
            Source::Torrent(torrent) => torrent.reader(),
            Source::Http(remote) => {
                let cache = self.remote_cache(remote)?;
                Ok(Box::new(cache.new_scoped_reader(self.base.scope.clone())))
            }
        }
    }

    /// A reader for bounded header and attachment reads.
    ///
    /// Remote sources are read with ranged requests of their own, so these
    /// reads never wait on playback. Must be created inside the runtime.
    fn metadata_reader(&self) -> Result<BoxReadSeek> {
        match &self.source {
            Source::Http(remote) => {
                let size = remote
                    .probed()
                    .map(|probe| probe.size)
                    .ok_or_else(|| Error::Internal("remote stream read before probing".into()))?;
                Ok(Box::new(remote.http_reader(
                    &self.base.env.http,
                    size,
                    &self.base.scope,
                    &self.base.env.config.stream,
                )))
            }
            _ => self.source_reader(),
        }
    }

    /// Answer one `HEAD`/`GET` on the stream URL.
    ///
    /// Thumbnail requests are served without starting subtitle streamers.
    pub async fn handle(
        self: &Arc<Self>,
        method: &Method,
        headers: &HeaderMap,
        thumbnail: bool,
    ) -> Result<Response> {
        if self.is_terminated() {
            return Err(Error::Closed(format!("stream {}", self.base.id)));
        }
        let content_type = self.content_type().await?;
        let size = self.size().await?;

        if let Source::Http(remote) = &self.source {
            return self
                .handle_remote(remote, method, headers, thumbnail, size, &content_type)
                .await;
        }

        let stream = self.clone();
        let response = serve_reader(
            method,
            headers,
            size,
            &content_type,
            self.base.scope.clone(),
            move || stream.source_reader(),
        )?;
        if method == Method::GET && !thumbnail {
            if let Ok(Selection::Partial(range)) = select(headers, size) {
                self.seek_subtitles(range.start, size);
            }
        }
        Ok(response)
    }

    async fn handle_remote(
        self: &Arc<Self>,
        remote: &RemoteHttp,
        method: &Method,
        headers: &HeaderMap,
        thumbnail: bool,
        size: u64,
        content_type: &str,
    ) -> Result<Response> {
        let (start, end) = match select(headers, size)? {
            Selection::Unsatisfiable => return Ok(range_not_satisfiable(size)),
            Selection::Full => (0, size.saturating_sub(1)),
            Selection::Partial(range) => (range.start, range.end()),
        };
        let cache = self.remote_cache(remote)?;

        if method == Method::HEAD || (thumbnail && cache.covers(start, end)) {
            trace!(stream_id = %self.base.id, start, end, "Serving from range cache");
            let reader = cache.new_scoped_reader(self.base.scope.clone());
            return serve_reader(
                method,
                headers,
                size,
                content_type,
                self.base.scope.clone(),
                move || Ok(Box::new(reader) as BoxReadSeek),
            );
        }

        let proxied = proxy::forward(
            &self.base.env.http,
            remote.url(),
            headers,
            start,
            &cache,
            content_type,
        )
        .await?;
        if !thumbnail {
            self.seek_subtitles(proxied.offset, size);
        }
        Ok(proxied.response)
    }

    /// Launch a streamer for a seek to `start`, unless the seek is too close
    /// to the end or a streamer already covers it.
    fn seek_subtitles(self: &Arc<Self>, start: u64, size: u64) {
        let backoff = self.base.env.config.stream.subtitle_backoff_bytes;
        if start == 0 || start.saturating_add(backoff) >= size {
            return;
        }
        if !self.metadata().is_some_and(|m| m.has_subtitle_tracks()) {
            return;
        }
        if self.base.streamers.has_live_at(start) {
            return;
        }
        let stream = self.clone();
        tokio::spawn(async move {
            stream.await_cached(start).await;
            stream.start_subtitles(start);
        });
    }

    /// Give the proxy tee up to the start grace to populate `offset`.
    async fn await_cached(&self, offset: u64) {
        let Source::Http(remote) = &self.source else {
            return;
        };
        let Some(cache) = remote.existing_cache() else {
            return;
        };
        let deadline = Instant::now() + self.base.env.config.stream.subtitle_start_grace();
        while cache.available_at(offset, 1) == 0 && Instant::now() < deadline {
            tokio::select! {
                _ = self.base.scope.cancelled() => return,
                _ = tokio::time::sleep(GRACE_POLL) => {}
            }
        }
    }

    /// Start a subtitle streamer at `offset`.
    ///
    /// Returns `None` when there is nothing to stream, the stream has ended,
    /// or a live or completed streamer already covers the offset.
    pub fn start_subtitles(&self, offset: u64) -> Option<Arc<StreamerHandle>> {
        if self.is_terminated() {
            return None;
        }
        let metadata = self.metadata()?;
        if !metadata.has_subtitle_tracks() {
            return None;
        }
        if self.base.streamers.has_live_at(offset) {
            debug!(stream_id = %self.base.id, offset, "Streamer already running at offset");
            return None;
        }
        let reader = match self.source_reader() {
            Ok(reader) => reader,
            Err(e) => {
                warn!(stream_id = %self.base.id, error = %e, "Cannot open subtitle reader");
                return None;
            }
        };
        let backoff = if offset > 0 {
            self.scan_backoff(offset)
        } else {
            0
        };
        spawn_streamer(
            &self.base.streamers,
            &self.base.scope,
            reader,
            StreamerParams {
                start_offset: offset,
                backoff,
                demuxer: self.demuxer_options(),
                metadata: Some(metadata),
            },
            self.base.events.clone(),
        )
    }

    /// Backoff for a streamer starting at `offset`.
    ///
    /// Remote scans never start before the populated interval holding
    /// `offset`: bytes the player did not request are never fetched.
    fn scan_backoff(&self, offset: u64) -> u64 {
        let backoff = self.base.env.config.stream.subtitle_backoff_bytes;
        let Source::Http(remote) = &self.source else {
            return backoff;
        };
        let populated = remote
            .existing_cache()
            .and_then(|cache| cache.populated_start(offset))
            .unwrap_or(offset);
        backoff.min(offset - populated)
    }

    /// Bytes and MIME type of an attachment, reading lazily stored ones
    /// from the source.
    pub async fn attachment(&self, name: &str) -> Result<(String, Vec<u8>)> {
        let attachment = self
            .metadata()
            .and_then(|m| m.attachment(name).cloned())
            .ok_or_else(|| Error::not_found("attachment", name))?;
        let mimetype = attachment.mimetype.clone();
        if let Some(data) = attachment.data {
            return Ok((mimetype, data));
        }

        let reader = self.metadata_reader()?;
        let scope = self.base.scope.clone();
        let data = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut reader = CancellableReader::new(reader, scope);
            Ok(load_attachment(&mut reader, &attachment)?)
        })
        .await
        .map_err(|e| Error::Internal(format!("attachment task failed: {e}")))??;
        Ok((mimetype, data))
    }

    /// Convert an uploaded subtitle file and append it as a new ASS track.
    pub fn add_external_track(&self, filename: &str, content: &str) -> Result<Track> {
        let format = SubtitleFormat::from_filename(filename).ok_or_else(|| {
            Error::UnsupportedContent(format!("{filename} is not a subtitle file"))
        })?;
        let title = title_from_filename(filename);
        let script = convert_to_ass(format, content, &title)?;

        let mut slot = self.base.metadata.write();
        let mut metadata = slot.as_deref().cloned().unwrap_or_default();
        let number = metadata.max_track_number() + 1;

        let mut track = Track::new(number, TrackKind::Subtitle, ASS_CODEC_ID);
        track.uid = number + 900;
        track.language = language_from_filename(filename).unwrap_or_else(|| "und".into());
        track.name = title;
        track.default = false;
        track.codec_private_raw = script.clone().into_bytes();
        track.codec_private = Some(script);

        metadata.tracks.push(track.clone());
        *slot = Some(Arc::new(metadata));
        info!(
            stream_id = %self.base.id,
            track = number,
            language = %track.language,
            "Added external subtitle track"
        );
        Ok(track)
    }

    /// Cancel the scope, forget delivered events and stop every streamer.
    /// Idempotent.
    pub fn terminate(&self) {
        self.base.terminated.call_once(|| {
            self.base.scope.cancel();
            self.base.seen.lock().clear();
            self.base.streamers.stop_all();
            if let Source::Http(remote) = &self.source {
                remote.close();
            }
            info!(stream_id = %self.base.id, kind = %self.kind(), "Stream terminated");
        });
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn may_be_matroska(content_type: &str) -> bool {
    matches!(
        content_type,
        "video/webm"
            | "video/x-matroska"
            | "application/x-matroska"
            | "application/octet-stream"
            | "binary/octet-stream"
    )
}

/// Deduplicate, translate and publish subtitle events until the scope ends.
fn spawn_forwarder(base: &BaseStream, rx: mpsc::Receiver<SubtitleEvent>) {
    let seen = base.seen.clone();
    let metadata = base.metadata.clone();
    let translator = base.env.translator.clone();
    let bus = base.env.bus.clone();
    let client_id = base.client_id.clone();
    let scope = base.scope.clone();
    let stream_id = base.id;

    tokio::spawn(async move {
        let events = ReceiverStream::new(rx)
            .filter(move |event| future::ready(seen.lock().insert(event.fingerprint())))
            .map(move |event| localize(event, translator.clone(), metadata.clone()))
            .buffered(TRANSLATE_CONCURRENCY);
        tokio::pin!(events);

        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                next = events.next() => match next {
                    Some(event) => {
                        bus.publish(&client_id, ClientEvent::SubtitleEvent(event));
                    }
                    None => break,
                },
            }
        }
        trace!(stream_id = %stream_id, "Subtitle forwarder stopped");
    });
}

/// Translate a text event when its track's language needs it.
async fn localize(
    mut event: SubtitleEvent,
    translator: Option<Arc<Translator>>,
    metadata: Arc<RwLock<Option<Arc<MkvMetadata>>>>,
) -> SubtitleEvent {
    let Some(translator) = translator else {
        return event;
    };
    if event.is_image() {
        return event;
    }
    let language = metadata
        .read()
        .as_ref()
        .and_then(|m| m.track(event.track_number).map(|t| t.language.clone()));
    if language.is_some_and(|l| translator.wants(&l)) {
        let text = std::mem::take(&mut event.text);
        event.text = translator.translate(text).await;
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ClientMessage;
    use crate::session::torrent::MemoryTorrentFile;
    use ds_media::testing::{BlockSpec, MkvBuilder};
    use tokio::sync::broadcast;

    fn env() -> StreamEnv {
        StreamEnv {
            config: Arc::new(Config::default()),
            http: reqwest::Client::new(),
            bus: Arc::new(ClientBus::default()),
            translator: None,
        }
    }

    fn subtitled_mkv() -> Vec<u8> {
        MkvBuilder::new()
            .duration_ms(10_000.0)
            .ass_track(3)
            .cluster(
                0,
                vec![BlockSpec::group(3, 0, b"1,0,Default,,0,0,0,,Hello, world".to_vec(), 2000)],
            )
            .cluster(
                5000,
                vec![BlockSpec::group(3, 0, b"2,0,Default,,0,0,0,,Second".to_vec(), 1000)],
            )
            .build()
    }

    fn torrent_stream(env: StreamEnv, name: &str, data: Vec<u8>) -> Arc<Stream> {
        let source = TorrentStream::new(Arc::new(MemoryTorrentFile::new(name, data))).unwrap();
        Arc::new(Stream::new(
            Source::Torrent(source),
            StreamOptions::new("client-a"),
            env,
        ))
    }

    async fn next_subtitle(rx: &mut broadcast::Receiver<ClientMessage>) -> SubtitleEvent {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("no event within 2s")
                .unwrap();
            if let ClientEvent::SubtitleEvent(event) = message.event {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn playback_info_parses_metadata() {
        let stream = torrent_stream(env(), "ep01.mkv", subtitled_mkv());
        let info = stream.playback_info().await.unwrap();
        assert_eq!(info.stream_type, StreamType::Torrent);
        assert_eq!(info.mime_type, "video/webm");
        assert_eq!(info.stream_url, stream_url(stream.id()));
        let metadata = info.mkv_metadata.unwrap();
        assert_eq!(metadata.tracks.len(), 1);
        assert!(stream.metadata().is_some());
    }

    #[tokio::test]
    async fn non_matroska_skips_metadata() {
        let stream = torrent_stream(env(), "ep01.mp4", vec![0; 64]);
        let info = stream.playback_info().await.unwrap();
        assert_eq!(info.mime_type, "video/mp4");
        assert!(info.mkv_metadata.is_none());
        assert!(stream.start_subtitles(0).is_none());
    }

    #[tokio::test]
    async fn broken_matroska_continues_without_metadata() {
        let stream = torrent_stream(env(), "ep01.mkv", vec![0xAB; 256]);
        let info = stream.playback_info().await.unwrap();
        assert!(info.mkv_metadata.is_none());
    }

    #[tokio::test]
    async fn streamed_events_are_published_once() {
        let env = env();
        let mut rx = env.bus.subscribe();
        let stream = torrent_stream(env, "ep01.mkv", subtitled_mkv());
        stream.playback_info().await.unwrap();

        assert!(stream.start_subtitles(0).is_some());
        let first = next_subtitle(&mut rx).await;
        assert_eq!(first.text, "Hello, world");
        assert_eq!(first.track_number, 3);
        let second = next_subtitle(&mut rx).await;
        assert_eq!(second.text, "Second");

        // Wait for the first streamer to finish, then replay the same range
        // from a second streamer: nothing new reaches the client.
        tokio::time::sleep(Duration::from_millis(300)).await;
        stream.streamers().clear();
        assert!(stream.start_subtitles(0).is_some());
        tokio::time::sleep(Duration::from_millis(300)).await;
        while let Ok(message) = rx.try_recv() {
            assert!(!matches!(message.event, ClientEvent::SubtitleEvent(_)));
        }
    }

    #[tokio::test]
    async fn uploads_become_ass_tracks() {
        let stream = torrent_stream(env(), "ep01.mkv", subtitled_mkv());
        stream.playback_info().await.unwrap();

        let srt = "1\n00:00:00,000 --> 00:00:03,000\nHello, world!\n";
        let track = stream.add_external_track("hello.eng.srt", srt).unwrap();
        assert_eq!(track.number, 4);
        assert_eq!(track.uid, 904);
        assert_eq!(track.codec_id, "S_TEXT/ASS");
        assert_eq!(track.language, "eng");
        assert_eq!(track.name, "hello");
        let script = track.codec_private.unwrap();
        assert!(script.starts_with("[Script Info]"));
        assert!(script.contains("Dialogue: 0,00:00:00.00,00:00:03.00,Default,,0,0,0,,Hello, world!"));
        assert_eq!(stream.tracks().len(), 2);

        assert!(matches!(
            stream.add_external_track("notes.pdf", "x"),
            Err(Error::UnsupportedContent(_))
        ));
    }

    #[tokio::test]
    async fn uploads_without_metadata_start_at_track_one() {
        let stream = torrent_stream(env(), "ep01.mp4", vec![0; 64]);
        let track = stream
            .add_external_track("movie.vtt", "WEBVTT\n\n00:01.000 --> 00:02.000\nHi\n")
            .unwrap();
        assert_eq!(track.number, 1);
        assert_eq!(track.language, "und");
    }

    #[tokio::test]
    async fn attachments_are_served_from_metadata() {
        let data = MkvBuilder::new()
            .ass_track(1)
            .attachment("font.ttf", "font/ttf", vec![7u8; 32])
            .build();
        let stream = torrent_stream(env(), "ep01.mkv", data);
        stream.playback_info().await.unwrap();

        let (mime, bytes) = stream.attachment("font.ttf").await.unwrap();
        assert_eq!(mime, "font/ttf");
        assert_eq!(bytes, vec![7u8; 32]);
        assert!(matches!(
            stream.attachment("missing.ttf").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_final() {
        let stream = torrent_stream(env(), "ep01.mkv", subtitled_mkv());
        stream.playback_info().await.unwrap();
        stream.terminate();
        stream.terminate();
        assert!(stream.is_terminated());
        assert!(stream.start_subtitles(0).is_none());
        let err = stream
            .handle(&Method::GET, &HeaderMap::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed(_)));
    }

    #[test]
    fn completion_latch() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let stream = Stream::new(
            Source::Torrent(
                TorrentStream::new(Arc::new(MemoryTorrentFile::new("a.mkv", vec![]))).unwrap(),
            ),
            StreamOptions::new("c"),
            env(),
        );
        assert!(stream.mark_completed());
        assert!(!stream.mark_completed());
    }
}
