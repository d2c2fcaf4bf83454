//! Health check endpoint.

use std::sync::atomic::Ordering;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub cached_entities: usize,
    pub active_subscriptions: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        cached_entities: state.cache.len(),
        active_subscriptions: state.active_subscriptions.load(Ordering::Relaxed),
    })
}
