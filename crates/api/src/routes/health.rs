//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
}

/// GET /health: process health and the number of live notification sessions.
pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.registry.connection_count().await,
    })
}
