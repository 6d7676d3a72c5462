//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::auth::CacheStats;
use crate::state::AppState;
use crate::websocket::RegistryStats;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub accepting_connections: bool,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let accepting = state.hub.is_accepting();

    let status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if accepting {
                "healthy".to_string()
            } else {
                "shutting_down".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            accepting_connections: accepting,
        }),
    )
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub connections: RegistryStats,
    pub token_cache: CacheStats,
}

/// Connection registry and token cache statistics
pub async fn ws_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.hub.stats().await,
        token_cache: state.verifier.cache().stats(),
    })
}
