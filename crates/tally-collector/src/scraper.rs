use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_common::error::{Result, TallyError};
use tally_metrics::parse;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    metrics::CollectorMetrics,
    queue::BatchQueue,
    sample::{Sample, SampleBatch},
    target::{ScrapeSource, ScrapeTarget},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeState {
    Idle,
    Fetching,
    Parsing,
    Delivered,
}

struct StatusInner {
    state: ScrapeState,
    last_tick: Instant,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Progress of one scrape loop, shared with the health check.
pub struct TargetStatus {
    inner: Mutex<StatusInner>,
}

impl Default for TargetStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetStatus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatusInner {
                state: ScrapeState::Idle,
                last_tick: Instant::now(),
                last_success: None,
                last_error: None,
            }),
        }
    }

    pub fn state(&self) -> ScrapeState {
        self.lock().state
    }

    /// Time since the loop last started a cycle, or since creation.
    pub fn since_last_tick(&self) -> Duration {
        self.lock().last_tick.elapsed()
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.lock().last_success
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    fn begin_cycle(&self) {
        let mut inner = self.lock();
        inner.state = ScrapeState::Fetching;
        inner.last_tick = Instant::now();
    }

    fn set_state(&self, state: ScrapeState) {
        self.lock().state = state;
    }

    fn succeeded(&self, at: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.state = ScrapeState::Idle;
        inner.last_success = Some(at);
        inner.last_error = None;
    }

    fn failed(&self, message: String) {
        let mut inner = self.lock();
        inner.state = ScrapeState::Idle;
        inner.last_error = Some(message);
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Periodically pulls one target and hands each parsed batch to the
/// forwarder queue. A failed cycle is counted and skipped; the loop keeps
/// its schedule.
pub struct Scraper {
    target: ScrapeTarget,
    source: Arc<dyn ScrapeSource>,
    queue: Arc<BatchQueue>,
    metrics: Arc<CollectorMetrics>,
    status: Arc<TargetStatus>,
}

impl Scraper {
    pub fn new(
        target: ScrapeTarget,
        source: Arc<dyn ScrapeSource>,
        queue: Arc<BatchQueue>,
        metrics: Arc<CollectorMetrics>,
    ) -> Self {
        Self {
            target,
            source,
            queue,
            metrics,
            status: Arc::new(TargetStatus::new()),
        }
    }

    pub fn target(&self) -> &ScrapeTarget {
        &self.target
    }

    pub fn status(&self) -> Arc<TargetStatus> {
        Arc::clone(&self.status)
    }

    /// Runs a single fetch, parse and handoff cycle. Returns the number of
    /// samples delivered to the queue.
    pub async fn scrape_once(&self) -> Result<usize> {
        let started = Instant::now();
        self.status.begin_cycle();

        let payload = match tokio::time::timeout(self.target.timeout, self.source.fetch()).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(err)) => return Err(self.fail(err.reason(), err.to_string())),
            Err(_) => {
                return Err(self.fail(
                    "timeout",
                    format!("timed out after {:?}", self.target.timeout),
                ));
            }
        };
        let collected_at = Utc::now();

        self.status.set_state(ScrapeState::Parsing);
        let parsed = match parse(&payload) {
            Ok(parsed) => parsed,
            Err(err) => return Err(self.fail("parse", err.to_string())),
        };

        let samples = parsed
            .into_iter()
            .map(|sample| Sample::from_parsed(sample, &self.target.labels, collected_at))
            .collect::<Vec<_>>();
        let count = samples.len();

        self.status.set_state(ScrapeState::Delivered);
        self.queue.push(SampleBatch {
            target: self.target.name.clone(),
            collected_at,
            samples,
        });
        self.metrics
            .record_scrape_success(&self.target.name, count, started.elapsed());
        self.status.succeeded(collected_at);

        debug!(target = %self.target.name, samples = count, "scrape delivered");
        Ok(count)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.target.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            target = %self.target.name,
            interval = ?self.target.interval,
            timeout = ?self.target.timeout,
            "scrape loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        result = self.scrape_once() => {
                            if let Err(err) = result {
                                warn!(error = %err, "scrape failed, skipping cycle");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(target = %self.target.name, "scrape loop stopped");
    }

    fn fail(&self, reason: &str, message: String) -> TallyError {
        self.metrics.record_scrape_failure(&self.target.name, reason);
        self.status.failed(message.clone());
        TallyError::scrape(self.target.name.clone(), message)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tally_http::{AppInfo, AppState, app_router};
    use tally_metrics::MetricsRegistry;

    use super::*;
    use crate::target::{FetchError, RegistrySource, TargetAddress, build_source};

    struct HangingSource;

    #[async_trait]
    impl ScrapeSource for HangingSource {
        async fn fetch(&self) -> std::result::Result<String, FetchError> {
            futures::future::pending::<()>().await;
            Ok(String::new())
        }
    }

    struct StaticSource(&'static str);

    #[async_trait]
    impl ScrapeSource for StaticSource {
        async fn fetch(&self) -> std::result::Result<String, FetchError> {
            Ok(self.0.to_string())
        }
    }

    fn target(name: &str, address: TargetAddress, interval_ms: u64, timeout_ms: u64) -> ScrapeTarget {
        ScrapeTarget {
            name: name.to_string(),
            labels: vec![
                ("job".to_string(), name.to_string()),
                ("instance".to_string(), address.instance()),
            ],
            address,
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn collector() -> (Arc<MetricsRegistry>, Arc<CollectorMetrics>, Arc<BatchQueue>) {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Arc::new(CollectorMetrics::register(&registry).unwrap());
        let queue = Arc::new(BatchQueue::new(64, Arc::clone(&metrics)));
        (registry, metrics, queue)
    }

    #[tokio::test]
    async fn delivered_samples_carry_target_labels() {
        let (_, metrics, queue) = collector();
        let scraper = Scraper::new(
            target("app", TargetAddress::SelfRegistry, 1_000, 500),
            Arc::new(StaticSource("# TYPE up gauge\nup{job=\"inner\"} 1\n")),
            Arc::clone(&queue),
            Arc::clone(&metrics),
        );

        assert_eq!(scraper.scrape_once().await.unwrap(), 1);
        assert_eq!(scraper.status().state(), ScrapeState::Idle);
        assert!(scraper.status().last_success().is_some());
        assert_eq!(metrics.target_up("app"), Some(1.0));

        let batches = queue.drain();
        assert_eq!(batches.len(), 1);
        let sample = &batches[0].samples[0];
        assert_eq!(sample.name, "up");
        assert_eq!(sample.timestamp, batches[0].collected_at);
        assert!(sample.labels.contains(&("exported_job".to_string(), "inner".to_string())));
        assert!(sample.labels.contains(&("job".to_string(), "app".to_string())));
        assert!(sample.labels.contains(&("instance".to_string(), "self".to_string())));
    }

    #[tokio::test]
    async fn malformed_payload_is_counted_and_nothing_is_queued() {
        let (_, metrics, queue) = collector();
        let scraper = Scraper::new(
            target("broken", TargetAddress::SelfRegistry, 1_000, 500),
            Arc::new(StaticSource("valid_total 1\nthis is not a sample\n")),
            Arc::clone(&queue),
            Arc::clone(&metrics),
        );

        let err = scraper.scrape_once().await.unwrap_err();
        assert_eq!(err.error_code(), "ScrapeFailure");
        assert_eq!(metrics.scrape_failures("broken", "parse"), 1.0);
        assert_eq!(metrics.target_up("broken"), Some(0.0));
        assert!(scraper.status().last_error().is_some());
        assert_eq!(scraper.status().state(), ScrapeState::Idle);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn hanging_target_does_not_stall_other_targets() {
        let (registry, metrics, queue) = collector();
        let counter = registry.register_counter("ticks_total", "Ticks", &[]).unwrap();
        counter.inc(&[], 1.0).unwrap();

        let slow = Scraper::new(
            target("slow", TargetAddress::SelfRegistry, 20, 10),
            Arc::new(HangingSource),
            Arc::clone(&queue),
            Arc::clone(&metrics),
        );
        let fast = Scraper::new(
            target("fast", TargetAddress::SelfRegistry, 20, 10),
            Arc::new(RegistrySource::new(Arc::clone(&registry))),
            Arc::clone(&queue),
            Arc::clone(&metrics),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slow_handle = tokio::spawn(slow.run(shutdown_rx.clone()));
        let fast_handle = tokio::spawn(fast.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), slow_handle)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), fast_handle)
            .await
            .unwrap()
            .unwrap();

        let delivered = queue
            .drain()
            .into_iter()
            .filter(|batch| batch.target == "fast")
            .count();
        assert!(delivered >= 2, "fast target delivered {delivered} batches");
        assert!(metrics.scrape_failures("slow", "timeout") >= 2.0);
        assert_eq!(metrics.scrape_failures("fast", "timeout"), 0.0);
    }

    #[tokio::test]
    async fn scrapes_a_live_endpoint_over_http() {
        let app_registry = Arc::new(MetricsRegistry::new());
        let state = Arc::new(AppState::new(Arc::clone(&app_registry), AppInfo::default()).unwrap());
        state.business_metrics.record_order(19.99).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app_router(state)).await.unwrap();
        });

        let (collector_registry, metrics, queue) = collector();
        let scrape_target = target(
            "demo",
            TargetAddress::parse(&address.to_string()).unwrap(),
            1_000,
            1_000,
        );
        let source = build_source(&scrape_target, &collector_registry, &reqwest::Client::new());
        let scraper = Scraper::new(scrape_target, source, Arc::clone(&queue), metrics);

        assert!(scraper.scrape_once().await.unwrap() > 0);
        let batch = queue.drain().remove(0);
        let orders = batch
            .samples
            .iter()
            .find(|sample| sample.name == "app_orders_created_total")
            .expect("orders counter is scraped");
        assert_eq!(orders.value, 1.0);
        assert!(
            orders
                .labels
                .contains(&("instance".to_string(), address.to_string()))
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_counts_a_fetch_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let (registry, metrics, queue) = collector();
        let scrape_target = target(
            "gone",
            TargetAddress::parse(&address.to_string()).unwrap(),
            1_000,
            500,
        );
        let source = build_source(&scrape_target, &registry, &reqwest::Client::new());
        let scraper = Scraper::new(scrape_target, source, queue, Arc::clone(&metrics));

        assert!(scraper.scrape_once().await.is_err());
        assert_eq!(
            metrics.scrape_failures("gone", "fetch") + metrics.scrape_failures("gone", "timeout"),
            1.0
        );
    }
}
