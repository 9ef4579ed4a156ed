use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::router::AppState;

pub async fn api_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.http_metrics.uptime().as_secs_f64();

    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: (uptime * 100.0).round() / 100.0,
        timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: f64,
    timestamp: f64,
}
