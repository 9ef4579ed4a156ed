use std::{sync::Arc, time::Instant};

use axum::{
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::metrics::{HttpMetrics, RequestOutcome};

pub const UNKNOWN_ROUTE: &str = "unknown";

/// Accounts for one request exactly once. Dropping the guard without calling
/// [`RequestGuard::complete`] records a panic when the thread is unwinding and
/// a cancellation otherwise.
pub struct RequestGuard {
    metrics: Arc<HttpMetrics>,
    method: String,
    route: String,
    started_at: Instant,
    status: Option<StatusCode>,
}

impl RequestGuard {
    pub fn start(metrics: Arc<HttpMetrics>, method: &str, route: &str) -> Self {
        Self {
            metrics,
            method: method.to_string(),
            route: route.to_string(),
            started_at: Instant::now(),
            status: None,
        }
    }

    pub fn complete(mut self, status: StatusCode) {
        self.status = Some(status);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let outcome = match self.status {
            Some(status) => RequestOutcome::Completed(status),
            None if std::thread::panicking() => RequestOutcome::Panicked,
            None => RequestOutcome::Cancelled,
        };

        self.metrics.record_request(
            &self.method,
            &self.route,
            outcome,
            self.started_at.elapsed(),
        );
    }
}

pub async fn track_requests(
    State(metrics): State<Arc<HttpMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_ROUTE.to_string());
    let guard = RequestGuard::start(metrics, request.method().as_str(), &route);

    let response = next.run(request).await;
    guard.complete(response.status());

    response
}
