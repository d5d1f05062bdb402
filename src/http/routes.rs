use super::state::AppState;
use super::{handlers, ws};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Room connections
        .route("/ws/:room_id/:client_id", get(ws::room_socket))
        // Room queries
        .route("/rooms", get(handlers::list_rooms))
        .route("/rooms/:room_id", get(handlers::get_room_status))
        // Room control
        .route("/rooms/:room_id/end", post(handlers::end_live))
        .route(
            "/rooms/:room_id/episode/:episode_id",
            put(handlers::associate_episode),
        )
        .route(
            "/rooms/:room_id/recording/snapshot",
            post(handlers::snapshot_recording),
        )
        // Flushed history
        .route(
            "/episodes/:episode_id/logs/:stream",
            get(handlers::get_episode_log),
        )
        // Browser clients connect from the podcast web app's origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
