//! The single-tenant session: at most one stream is current at a time.
//!
//! Start/stop transitions take the slot's write lock; nothing awaits while
//! holding it. Loading, event dispatch and streaming run outside the lock.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ds_core::config::PlaybackSettings;
use ds_core::{Error, Result, StreamId};
use ds_media::Track;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::local::LocalFile;
use super::playback::PlaybackInfo;
use super::remote::RemoteHttp;
use super::stream::{Source, Stream, StreamEnv, StreamOptions};
use super::torrent::{TorrentFile, TorrentStream};
use crate::bus::ClientEvent;
use crate::player::{PlayerEvent, PlayerEventBus, PlayerMessage};

pub const LOADING_STREAM: &str = "Loading stream...";
pub const LOADING_METADATA: &str = "Loading metadata...";

/// Records watch progress when an episode is completed.
#[async_trait]
pub trait ProgressUpdater: Send + Sync {
    async fn episode_completed(&self, playback: &PlaybackInfo) -> Result<()>;
}

/// Default updater: logs the completion.
#[derive(Debug, Default)]
pub struct LogProgress;

#[async_trait]
impl ProgressUpdater for LogProgress {
    async fn episode_completed(&self, playback: &PlaybackInfo) -> Result<()> {
        info!(
            stream_id = %playback.id,
            episode = ?playback.episode,
            "Episode completed"
        );
        Ok(())
    }
}

pub struct SessionManager {
    env: StreamEnv,
    current: RwLock<Option<Arc<Stream>>>,
    settings: RwLock<PlaybackSettings>,
    progress: Arc<dyn ProgressUpdater>,
}

impl SessionManager {
    pub fn new(env: StreamEnv) -> Self {
        let settings = env.config.playback;
        Self {
            env,
            current: RwLock::new(None),
            settings: RwLock::new(settings),
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress_updater(mut self, progress: Arc<dyn ProgressUpdater>) -> Self {
        self.progress = progress;
        self
    }

    pub fn current(&self) -> Option<Arc<Stream>> {
        self.current.read().clone()
    }

    /// The current stream if it has id `id`.
    pub fn stream(&self, id: StreamId) -> Result<Arc<Stream>> {
        self.current()
            .filter(|s| s.id() == id)
            .ok_or_else(|| Error::not_found("stream", id))
    }

    pub fn settings(&self) -> PlaybackSettings {
        *self.settings.read()
    }

    pub fn update_settings(&self, settings: PlaybackSettings) {
        *self.settings.write() = settings;
        debug!(?settings, "Playback settings updated");
    }

    pub fn start_local_file(
        self: &Arc<Self>,
        path: impl Into<PathBuf>,
        options: StreamOptions,
    ) -> Result<Arc<Stream>> {
        let source = LocalFile::open(path).map(Source::File);
        self.start(source, options)
    }

    pub fn start_remote_http(
        self: &Arc<Self>,
        url: &str,
        options: StreamOptions,
    ) -> Result<Arc<Stream>> {
        let source = RemoteHttp::new(url).map(Source::Http);
        self.start(source, options)
    }

    pub fn start_torrent(
        self: &Arc<Self>,
        file: Arc<dyn TorrentFile>,
        options: StreamOptions,
    ) -> Result<Arc<Stream>> {
        let source = TorrentStream::new(file).map(Source::Torrent);
        self.start(source, options)
    }

    fn start(
        self: &Arc<Self>,
        source: Result<Source>,
        options: StreamOptions,
    ) -> Result<Arc<Stream>> {
        let source = match source {
            Ok(source) => source,
            Err(e) => {
                warn!(client_id = %options.client_id, error = %e, "Refusing to start stream");
                self.env
                    .bus
                    .publish(&options.client_id, ClientEvent::AbortOpen(e.to_string()));
                return Err(e);
            }
        };

        let stream = Arc::new(Stream::new(source, options, self.env.clone()));
        {
            let mut slot = self.current.write();
            if let Some(previous) = slot.take() {
                self.teardown(&previous, "Superseded by a new stream");
            }
            *slot = Some(stream.clone());
        }
        info!(
            stream_id = %stream.id(),
            kind = %stream.kind(),
            client_id = %stream.client_id(),
            "Stream installed"
        );

        let manager = self.clone();
        let loading = stream.clone();
        tokio::spawn(async move { manager.load(loading).await });
        Ok(stream)
    }

    async fn load(&self, stream: Arc<Stream>) {
        let client_id = stream.client_id().to_string();
        let bus = &self.env.bus;
        bus.publish(&client_id, ClientEvent::OpenAndAwait(LOADING_STREAM.into()));

        let result = async {
            stream.content_type().await?;
            bus.publish(&client_id, ClientEvent::OpenAndAwait(LOADING_METADATA.into()));
            stream.playback_info().await
        }
        .await;

        match result {
            Ok(info) => {
                if stream.is_terminated() {
                    return;
                }
                stream.mark_loaded();
                info!(stream_id = %stream.id(), mime = %info.mime_type, "Stream ready");
                bus.publish(&client_id, ClientEvent::Watch(Box::new(info)));
            }
            Err(e) if e.is_shutdown() => {
                debug!(stream_id = %stream.id(), "Stream load cancelled");
            }
            Err(e) => {
                warn!(stream_id = %stream.id(), error = %e, "Stream failed to load");
                bus.publish(&client_id, ClientEvent::AbortOpen(e.to_string()));
                self.remove(&stream);
            }
        }
    }

    /// Terminate `stream` and tell its client when playback never began.
    fn teardown(&self, stream: &Stream, reason: &str) {
        if !stream.is_loaded() && !stream.is_terminated() {
            self.env
                .bus
                .publish(stream.client_id(), ClientEvent::AbortOpen(reason.into()));
        }
        stream.terminate();
    }

    /// Clear the slot if it still holds `stream`, then terminate it.
    fn remove(&self, stream: &Arc<Stream>) {
        {
            let mut slot = self.current.write();
            if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, stream)) {
                *slot = None;
            }
        }
        stream.terminate();
    }

    /// Terminate the current stream and report `error` to its client.
    pub fn stream_error(&self, error: impl Display) {
        let Some(stream) = self.current.write().take() else {
            return;
        };
        warn!(stream_id = %stream.id(), error = %error, "Stream error");
        stream.terminate();
        self.env.bus.publish(
            stream.client_id(),
            ClientEvent::Error {
                error: error.to_string(),
            },
        );
    }

    /// Terminate the current stream, if any.
    pub fn stop(&self) -> Option<StreamId> {
        let stream = self.current.write().take()?;
        self.teardown(&stream, "Stream stopped");
        Some(stream.id())
    }

    /// Convert an uploaded subtitle file and advertise the new track list.
    pub fn upload_subtitle(&self, filename: &str, content: &str) -> Result<Track> {
        let stream = self
            .current()
            .ok_or_else(|| Error::not_found("stream", "current"))?;
        let track = stream.add_external_track(filename, content)?;
        self.env
            .bus
            .publish(stream.client_id(), ClientEvent::SetTracks(stream.tracks()));
        Ok(track)
    }

    /// React to one event from the native player.
    pub async fn handle_player_event(&self, message: PlayerMessage) {
        let Some(stream) = self.current() else {
            trace!(event = message.event.name(), "Player event without a stream");
            return;
        };
        if stream.client_id() != message.client_id {
            trace!(
                event = message.event.name(),
                client_id = %message.client_id,
                "Player event for another client"
            );
            return;
        }

        match message.event {
            PlayerEvent::LoadedMetadata => {
                if stream.start_subtitles(0).is_some() {
                    debug!(stream_id = %stream.id(), "Default subtitle streamer started");
                }
            }
            PlayerEvent::Completed => {
                if !stream.mark_completed() {
                    return;
                }
                if !self.settings().auto_update_progress {
                    return;
                }
                match stream.playback_info().await {
                    Ok(info) => {
                        if let Err(e) = self.progress.episode_completed(&info).await {
                            warn!(stream_id = %stream.id(), error = %e, "Progress update failed");
                        }
                    }
                    Err(e) => debug!(error = %e, "No playback info to record progress"),
                }
            }
            PlayerEvent::Terminated => self.remove(&stream),
            PlayerEvent::Error { error } => self.stream_error(error),
            PlayerEvent::SubtitleFileUploaded { filename, content } => {
                if let Err(e) = self.upload_subtitle(&filename, &content) {
                    warn!(filename, error = %e, "Rejected uploaded subtitle");
                }
            }
            other => trace!(event = other.name(), "Player event"),
        }
    }

    /// Feed every player event into [`handle_player_event`](Self::handle_player_event)
    /// until `cancel` fires.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        events: &PlayerEventBus,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut subscription = events.subscribe();
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = subscription.recv() => match message {
                        Some(message) => manager.handle_player_event(message).await,
                        None => break,
                    },
                }
            }
            if let Some(stream) = manager.current.write().take() {
                stream.terminate();
            }
            debug!("Player event dispatcher stopped");
        })
    }
}
