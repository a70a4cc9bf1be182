//! Application context shared by every route handler via Axum state.
//!
//! [`AppContext`] is cheap to clone: every field is an `Arc` or already
//! reference-counted.

use std::sync::Arc;

use ds_core::config::Config;
use ds_core::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::ClientBus;
use crate::http_client::build_client;
use crate::player::PlayerEventBus;
use crate::session::{LogProgress, ProgressUpdater, SessionManager, StreamEnv};
use crate::translator::Translator;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    /// Control-plane messages to clients.
    pub bus: Arc<ClientBus>,
    /// Events reported by the native player.
    pub player_events: PlayerEventBus,
    pub sessions: Arc<SessionManager>,
}

impl AppContext {
    /// Build the context. Spawns the translator worker when enabled, so it
    /// must run inside the runtime.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_progress(config, Arc::new(LogProgress))
    }

    /// Like [`new`](Self::new) with a custom progress collaborator.
    pub fn with_progress(config: Config, progress: Arc<dyn ProgressUpdater>) -> Result<Self> {
        let config = Arc::new(config);
        let http = build_client(&config.stream)?;
        let bus = Arc::new(ClientBus::default());
        let translator = Translator::spawn(&config.translator, http.clone());
        if let Some(translator) = &translator {
            tracing::info!(
                target_language = translator.target_language(),
                "Subtitle translation enabled"
            );
        }

        let sessions = SessionManager::new(StreamEnv {
            config: config.clone(),
            http: http.clone(),
            bus: bus.clone(),
            translator,
        })
        .with_progress_updater(progress);

        Ok(Self {
            config,
            http,
            bus,
            player_events: PlayerEventBus::new(),
            sessions: Arc::new(sessions),
        })
    }

    /// Route player events into the session manager until `cancel` fires.
    pub fn spawn_dispatcher(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.sessions.spawn_dispatcher(&self.player_events, cancel)
    }
}
