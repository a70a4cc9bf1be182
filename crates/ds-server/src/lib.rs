//! ds-server: HTTP surface and playback sessions for directstream.
//!
//! This crate ties the I/O, Matroska and subtitle crates together into a
//! running server. It provides:
//!
//! - Range-aware streaming of local files, remote URLs and torrent files
//! - On-the-fly subtitle extraction pushed to clients over SSE
//! - A player event bus driving the session lifecycle
//! - Graceful shutdown via signal handling

pub mod bus;
pub mod context;
pub mod error;
pub mod http_client;
pub mod player;
pub mod proxy;
pub mod range;
pub mod router;
pub mod routes;
pub mod serve;
pub mod session;
pub mod streamer;
pub mod translator;

use std::net::SocketAddr;

use ds_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Start the directstream server.
///
/// Builds the [`AppContext`], spawns the player event dispatcher and serves
/// HTTP until a shutdown signal is received.
pub async fn start(config: Config) -> ds_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ds_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let ctx = AppContext::new(config)?;
    let cancel = CancellationToken::new();
    let dispatcher = ctx.spawn_dispatcher(cancel.clone());

    let app = router::build_router(ctx.clone());

    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ds_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    cancel.cancel();
    ctx.sessions.stop();
    let _ = dispatcher.await;

    served.map_err(|e| ds_core::Error::Internal(format!("Server error: {e}")))?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
