use std::{sync::Arc, time::Duration};

use tally_common::error::Result;
use tally_metrics::{CounterMetric, GaugeMetric, HistogramMetric, MetricsRegistry};
use tracing::warn;

const SCRAPE_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Operational metrics of the collector itself, exposed on its own
/// `/metrics` endpoint.
pub struct CollectorMetrics {
    scrape_failures_total: Arc<CounterMetric>,
    scrape_duration_seconds: Arc<HistogramMetric>,
    scrape_samples_total: Arc<CounterMetric>,
    target_up: Arc<GaugeMetric>,
    dropped_batches_total: Arc<CounterMetric>,
    queue_batches: Arc<GaugeMetric>,
    forwarded_samples_total: Arc<CounterMetric>,
    forward_pushes_total: Arc<CounterMetric>,
    forward_retries_total: Arc<CounterMetric>,
    forward_failures_total: Arc<CounterMetric>,
}

impl CollectorMetrics {
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        Ok(Self {
            scrape_failures_total: registry.register_counter(
                "tally_scrape_failures_total",
                "Scrape cycles skipped because the fetch or parse failed",
                &["target", "reason"],
            )?,
            scrape_duration_seconds: registry.register_histogram(
                "tally_scrape_duration_seconds",
                "Duration of successful scrapes in seconds",
                &["target"],
                SCRAPE_DURATION_BUCKETS,
            )?,
            scrape_samples_total: registry.register_counter(
                "tally_scrape_samples_total",
                "Samples parsed from successful scrapes",
                &["target"],
            )?,
            target_up: registry.register_gauge(
                "tally_target_up",
                "1 if the last scrape of the target succeeded, 0 otherwise",
                &["target"],
            )?,
            dropped_batches_total: registry.register_counter(
                "tally_forwarder_dropped_batches_total",
                "Batches evicted from the forwarder queue due to backpressure",
                &["target"],
            )?,
            queue_batches: registry.register_gauge(
                "tally_forwarder_queue_batches",
                "Batches waiting in the forwarder queue",
                &[],
            )?,
            forwarded_samples_total: registry.register_counter(
                "tally_forwarded_samples_total",
                "Samples accepted by the remote sink",
                &[],
            )?,
            forward_pushes_total: registry.register_counter(
                "tally_forward_pushes_total",
                "Successful pushes to the remote sink",
                &[],
            )?,
            forward_retries_total: registry.register_counter(
                "tally_forward_retries_total",
                "Push attempts retried after a transport failure",
                &[],
            )?,
            forward_failures_total: registry.register_counter(
                "tally_forward_failures_total",
                "Pushes dropped after exhausting all retry attempts",
                &[],
            )?,
        })
    }

    pub fn record_scrape_failure(&self, target: &str, reason: &str) {
        log_failed_update(self.scrape_failures_total.inc_one(&[target, reason]));
        log_failed_update(self.target_up.set(&[target], 0.0));
    }

    pub fn record_scrape_success(&self, target: &str, samples: usize, duration: Duration) {
        log_failed_update(self.target_up.set(&[target], 1.0));
        log_failed_update(self.scrape_samples_total.inc(&[target], samples as f64));
        log_failed_update(
            self.scrape_duration_seconds
                .observe(&[target], duration.as_secs_f64()),
        );
    }

    pub fn record_dropped_batch(&self, target: &str) {
        log_failed_update(self.dropped_batches_total.inc_one(&[target]));
    }

    pub fn set_queue_depth(&self, batches: usize) {
        log_failed_update(self.queue_batches.set(&[], batches as f64));
    }

    pub fn record_push(&self, samples: usize) {
        log_failed_update(self.forward_pushes_total.inc_one(&[]));
        log_failed_update(self.forwarded_samples_total.inc(&[], samples as f64));
    }

    pub fn record_retry(&self) {
        log_failed_update(self.forward_retries_total.inc_one(&[]));
    }

    pub fn record_forward_failure(&self) {
        log_failed_update(self.forward_failures_total.inc_one(&[]));
    }

    pub fn scrape_failures(&self, target: &str, reason: &str) -> f64 {
        self.scrape_failures_total
            .value(&[target, reason])
            .unwrap_or_default()
    }

    pub fn dropped_batches(&self, target: &str) -> f64 {
        self.dropped_batches_total
            .value(&[target])
            .unwrap_or_default()
    }

    pub fn forwarded_samples(&self) -> f64 {
        self.forwarded_samples_total.value(&[]).unwrap_or_default()
    }

    pub fn forward_failures(&self) -> f64 {
        self.forward_failures_total.value(&[]).unwrap_or_default()
    }

    pub fn forward_retries(&self) -> f64 {
        self.forward_retries_total.value(&[]).unwrap_or_default()
    }

    pub fn target_up(&self, target: &str) -> Option<f64> {
        self.target_up.value(&[target])
    }
}

fn log_failed_update(result: Result<()>) {
    if let Err(err) = result {
        warn!(error = %err, "failed to update collector metric");
    }
}
