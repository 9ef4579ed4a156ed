use std::{sync::Arc, time::Duration};

use axum::Router;
use futures::future::join_all;
use tally_common::error::{Result, TallyError};
use tally_metrics::MetricsRegistry;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::{CollectorConfig, ForwarderConfig},
    forwarder::Forwarder,
    health::CollectorHealth,
    metrics::CollectorMetrics,
    queue::BatchQueue,
    router::collector_router,
    scraper::Scraper,
    sink::{HttpSink, LogSink, RemoteSink},
    target::build_source,
};

/// Picks the remote sink for `config`: HTTP when a URL is configured,
/// otherwise a sink that only logs.
pub fn build_sink(config: &ForwarderConfig) -> Result<Arc<dyn RemoteSink>> {
    match config.remote_write_url.as_deref() {
        Some(url) => {
            info!(endpoint = url, "remote write enabled");
            Ok(Arc::new(HttpSink::new(
                url.to_string(),
                Duration::from_millis(config.push_timeout_ms),
            )?))
        }
        None => {
            info!("no remote write endpoint configured, samples will be discarded");
            Ok(Arc::new(LogSink))
        }
    }
}

/// The running collector: one scrape task per target plus the forwarder task.
pub struct CollectorSys {
    registry: Arc<MetricsRegistry>,
    metrics: Arc<CollectorMetrics>,
    queue: Arc<BatchQueue>,
    health: Arc<CollectorHealth>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl CollectorSys {
    /// Validates `config` and spawns every loop. Must be called from within a
    /// tokio runtime.
    pub fn start(
        config: &CollectorConfig,
        registry: Arc<MetricsRegistry>,
        sink: Arc<dyn RemoteSink>,
    ) -> Result<Self> {
        config.validate()?;
        let targets = config.scrape_targets()?;

        let metrics = Arc::new(CollectorMetrics::register(&registry)?);
        let queue = Arc::new(BatchQueue::new(
            config.forwarder.queue_capacity,
            Arc::clone(&metrics),
        ));
        let client = reqwest::Client::builder().build().map_err(|err| {
            TallyError::InternalError(format!("failed to create scrape client: {err}"))
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(targets.len() + 1);
        let mut statuses = Vec::with_capacity(targets.len());

        for target in targets {
            let source = build_source(&target, &registry, &client);
            let scraper = Scraper::new(
                target.clone(),
                source,
                Arc::clone(&queue),
                Arc::clone(&metrics),
            );
            statuses.push((target, scraper.status()));
            tasks.push(tokio::spawn(scraper.run(shutdown_rx.clone())));
        }

        let forwarder = Forwarder::new(
            Arc::clone(&queue),
            sink,
            Arc::clone(&metrics),
            config.forwarder.settings(),
        );
        tasks.push(tokio::spawn(forwarder.run(shutdown_rx)));

        info!(targets = statuses.len(), "collector started");

        Ok(Self {
            health: Arc::new(CollectorHealth::new(Arc::clone(&registry), statuses)),
            registry,
            metrics,
            queue,
            shutdown_tx,
            tasks,
            shutdown_grace: config.shutdown_grace(),
        })
    }

    pub fn registry(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn metrics(&self) -> Arc<CollectorMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn queue(&self) -> Arc<BatchQueue> {
        Arc::clone(&self.queue)
    }

    pub fn health(&self) -> Arc<CollectorHealth> {
        Arc::clone(&self.health)
    }

    pub fn router(&self) -> Router {
        collector_router(self.registry(), self.health())
    }

    /// Signals every loop to stop and waits up to the shutdown grace period.
    /// The forwarder makes one final flush attempt; tasks still running when
    /// the grace period ends are aborted.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        let abort_handles = self
            .tasks
            .iter()
            .map(JoinHandle::abort_handle)
            .collect::<Vec<_>>();

        match tokio::time::timeout(self.shutdown_grace, join_all(self.tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        warn!(error = %err, "collector task ended abnormally");
                    }
                }
                info!("collector stopped");
            }
            Err(_) => {
                warn!(
                    grace = ?self.shutdown_grace,
                    "collector tasks did not stop in time, aborting"
                );
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{config::TargetConfig, sink::WriteRequest};

    #[derive(Default)]
    struct CapturingSink {
        pushes: Mutex<Vec<WriteRequest>>,
    }

    #[async_trait]
    impl RemoteSink for CapturingSink {
        async fn push(&self, request: &WriteRequest) -> Result<()> {
            self.pushes.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    fn config() -> CollectorConfig {
        let mut config = CollectorConfig {
            scrape_interval_ms: 20,
            scrape_timeout_ms: 10,
            shutdown_grace_ms: 1_000,
            ..CollectorConfig::default()
        };
        config.forwarder.flush_interval_ms = 3_600_000;
        config
    }

    #[tokio::test]
    async fn self_scrape_is_forwarded_on_shutdown() {
        let registry = Arc::new(MetricsRegistry::with_options(config().registry_options()));
        let sink = Arc::new(CapturingSink::default());
        let collector = CollectorSys::start(&config(), registry, sink.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(collector.health().is_healthy());
        let metrics = collector.metrics();
        assert_eq!(metrics.target_up("tally-collector"), Some(1.0));

        tokio::time::timeout(Duration::from_secs(2), collector.shutdown())
            .await
            .unwrap();

        let pushes = sink.pushes.lock().unwrap();
        assert!(!pushes.is_empty());
        let forwarded = pushes
            .iter()
            .flat_map(|push| push.timeseries.iter())
            .any(|series| series.labels.get("job").map(String::as_str) == Some("tally-collector"));
        assert!(forwarded);
    }

    #[tokio::test]
    async fn invalid_config_fails_before_spawning() {
        let mut bad = config();
        bad.targets = vec![
            TargetConfig::parse_flag("dup=localhost:1").unwrap(),
            TargetConfig::parse_flag("dup=localhost:2").unwrap(),
        ];

        let result = CollectorSys::start(
            &bad,
            Arc::new(MetricsRegistry::new()),
            Arc::new(LogSink),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn registering_twice_on_one_registry_is_idempotent() {
        let registry = Arc::new(MetricsRegistry::new());
        let first = CollectorSys::start(&config(), Arc::clone(&registry), Arc::new(LogSink)).unwrap();
        first.shutdown().await;

        let second = CollectorSys::start(&config(), registry, Arc::new(LogSink)).unwrap();
        second.shutdown().await;
    }

    #[test]
    fn sink_follows_remote_write_url() {
        let mut forwarder = ForwarderConfig::default();
        assert!(build_sink(&forwarder).is_ok());

        forwarder.remote_write_url = Some("http://127.0.0.1:9/write".to_string());
        assert!(build_sink(&forwarder).is_ok());
    }
}
