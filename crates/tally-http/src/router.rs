use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tally_common::error::Result;
use tally_metrics::MetricsRegistry;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{
    handlers::{
        self,
        api::{User, seed_users},
    },
    metrics::{AppInfo, BusinessMetrics, HttpMetrics},
    middleware::track_requests,
};

pub struct AppState {
    pub registry: Arc<MetricsRegistry>,
    pub http_metrics: Arc<HttpMetrics>,
    pub business_metrics: Arc<BusinessMetrics>,
    pub info: AppInfo,
    pub users: Vec<User>,
}

impl AppState {
    pub fn new(registry: Arc<MetricsRegistry>, info: AppInfo) -> Result<Self> {
        let http_metrics = Arc::new(HttpMetrics::register(registry.as_ref())?);
        let business_metrics = Arc::new(BusinessMetrics::register(registry.as_ref(), &info)?);

        Ok(Self {
            registry,
            http_metrics,
            business_metrics,
            info,
            users: seed_users(),
        })
    }
}

/// `GET /metrics` over `registry`, with no other routes or layers.
pub fn metrics_router(registry: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics::prometheus_metrics))
        .with_state(registry)
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let registry = Arc::clone(&state.registry);
    let http_metrics = Arc::clone(&state.http_metrics);

    Router::new()
        .route("/", get(handlers::api::home))
        .route("/api/users", get(handlers::api::list_users))
        .route("/api/orders", post(handlers::api::create_order))
        .route("/api/health", get(handlers::health::api_health))
        .with_state(state)
        .merge(metrics_router(registry))
        .layer(middleware::from_fn_with_state(http_metrics, track_requests))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}
