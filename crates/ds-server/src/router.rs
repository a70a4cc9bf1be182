//! Axum router construction.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let control = Router::new()
        .route("/local", post(routes::control::start_local))
        .route("/remote", post(routes::control::start_remote))
        .route("/player-event", post(routes::control::player_event))
        .route("/subtitles", post(routes::control::upload_subtitles))
        .route(
            "/settings",
            get(routes::control::get_settings).post(routes::control::put_settings),
        )
        .route("/stop", post(routes::control::stop));

    Router::new()
        .route("/health", get(routes::health::health_check))
        // GET routes also answer HEAD.
        .route("/stream", get(routes::stream::stream))
        .route("/attachments/{name}", get(routes::attachments::get_attachment))
        .route("/events", get(routes::events::events_handler))
        .nest("/directstream", control)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
