//! API routes

pub mod health;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::{state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new().route("/health", get(health::health));

    // WebSocket routes (auth handled in-band after the upgrade)
    let websocket_routes = Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/stats", get(health::ws_stats));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
