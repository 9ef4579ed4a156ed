use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tally_metrics::{CONTENT_TYPE, MetricsRegistry};

pub async fn prometheus_metrics(State(registry): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    let payload = registry.render_prometheus();

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE),
    );

    response
}
