use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::http::StatusCode;
use tally_common::error::Result;
use tally_metrics::{CounterMetric, GaugeMetric, HistogramMetric, MetricsRegistry};
use tracing::warn;

pub const REQUEST_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// How a request left the instrumented handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed(StatusCode),
    Panicked,
    Cancelled,
}

impl RequestOutcome {
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Completed(status) => match status.as_u16() {
                100..=199 => "1xx",
                200..=299 => "2xx",
                300..=399 => "3xx",
                400..=499 => "4xx",
                _ => "5xx",
            },
            Self::Panicked => "5xx",
            Self::Cancelled => "cancelled",
        }
    }
}

pub struct HttpMetrics {
    requests_total: Arc<CounterMetric>,
    request_duration_seconds: Arc<HistogramMetric>,
    uptime_seconds: Arc<GaugeMetric>,
    started_at: Instant,
}

impl HttpMetrics {
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        let requests_total = registry.register_counter(
            "http_requests_total",
            "Total HTTP requests",
            &["method", "route", "status"],
        )?;

        let request_duration_seconds = registry.register_histogram(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
            &["method", "route"],
            REQUEST_DURATION_BUCKETS,
        )?;

        let uptime_seconds = registry.register_gauge(
            "app_uptime_seconds",
            "Application uptime in seconds",
            &[],
        )?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            uptime_seconds,
            started_at: Instant::now(),
        })
    }

    pub fn record_request(
        &self,
        method: &str,
        route: &str,
        outcome: RequestOutcome,
        duration: Duration,
    ) {
        let status = outcome.status_label();
        if let Err(err) = self.requests_total.inc_one(&[method, route, status]) {
            warn!(error = %err, method, route, "failed to count request");
        }
        if let Err(err) = self
            .request_duration_seconds
            .observe(&[method, route], duration.as_secs_f64())
        {
            warn!(error = %err, method, route, "failed to observe request duration");
        }
        if let Err(err) = self
            .uptime_seconds
            .set(&[], self.started_at.elapsed().as_secs_f64())
        {
            warn!(error = %err, "failed to refresh uptime gauge");
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn requests(&self, method: &str, route: &str, status: &str) -> f64 {
        self.requests_total
            .value(&[method, route, status])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use tally_metrics::MetricValue;

    use super::*;

    fn uptime_series(registry: &MetricsRegistry) -> Vec<f64> {
        registry
            .snapshot()
            .into_iter()
            .filter(|metric| metric.descriptor.name == "app_uptime_seconds")
            .flat_map(|metric| metric.series)
            .filter_map(|series| match series.value {
                MetricValue::Gauge(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn recording_a_request_refreshes_uptime() {
        let registry = MetricsRegistry::new();
        let metrics = HttpMetrics::register(&registry).unwrap();
        assert!(uptime_series(&registry).is_empty());

        metrics.record_request(
            "GET",
            "/api/users",
            RequestOutcome::Completed(StatusCode::OK),
            Duration::from_millis(3),
        );

        let uptime = uptime_series(&registry);
        assert_eq!(uptime.len(), 1);
        assert!(uptime[0] >= 0.0);
        assert_eq!(metrics.requests("GET", "/api/users", "2xx"), 1.0);
    }
}
