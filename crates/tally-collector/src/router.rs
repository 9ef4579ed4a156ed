use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tally_http::metrics_router;
use tally_metrics::MetricsRegistry;
use tower_http::trace::TraceLayer;

use crate::health::CollectorHealth;

/// `GET /metrics` for the collector's own registry plus `GET /health`.
pub fn collector_router(registry: Arc<MetricsRegistry>, health: Arc<CollectorHealth>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(health)
        .merge(metrics_router(registry))
        .layer(TraceLayer::new_for_http())
}

async fn health_check(State(health): State<Arc<CollectorHealth>>) -> Response {
    let report = health.report();
    let status = if report.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report)).into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, header},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        scraper::TargetStatus,
        target::{ScrapeTarget, TargetAddress},
    };

    fn router(interval_ms: u64) -> Router {
        let registry = Arc::new(MetricsRegistry::new());
        registry
            .register_gauge("tally_target_up", "Target up", &["target"])
            .unwrap()
            .set(&["app"], 1.0)
            .unwrap();

        let target = ScrapeTarget {
            name: "app".to_string(),
            address: TargetAddress::SelfRegistry,
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(1),
            labels: Vec::new(),
        };
        let health = CollectorHealth::new(
            Arc::clone(&registry),
            vec![(target, Arc::new(TargetStatus::new()))],
        );
        collector_router(registry, Arc::new(health))
    }

    #[tokio::test]
    async fn exposes_own_metrics() {
        let response = router(60_000)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("tally_target_up{target=\"app\"} 1\n"));
    }

    #[tokio::test]
    async fn health_reflects_loop_liveness() {
        let response = router(60_000)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stalled = router(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let response = stalled
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
    }
}
