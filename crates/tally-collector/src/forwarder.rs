use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    metrics::CollectorMetrics,
    queue::BatchQueue,
    sample::Sample,
    sink::{RemoteSink, WriteRequest},
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based): doubles each time,
    /// capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub max_samples_per_push: usize,
    pub flush_interval: Duration,
    pub retry: RetryPolicy,
}

pub struct Forwarder {
    queue: Arc<BatchQueue>,
    sink: Arc<dyn RemoteSink>,
    metrics: Arc<CollectorMetrics>,
    settings: ForwarderSettings,
    buffer: Vec<Sample>,
}

impl Forwarder {
    pub fn new(
        queue: Arc<BatchQueue>,
        sink: Arc<dyn RemoteSink>,
        metrics: Arc<CollectorMetrics>,
        settings: ForwarderSettings,
    ) -> Self {
        Self {
            queue,
            sink,
            metrics,
            settings,
            buffer: Vec::new(),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Flushes on the timer or once the buffer reaches the size threshold,
    /// whichever comes first. Drains and flushes one last time on shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.collect();
                    self.flush().await;
                }
                _ = self.queue.notified() => {
                    self.collect();
                    if self.buffer.len() >= self.settings.max_samples_per_push {
                        self.flush().await;
                        ticker.reset();
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.collect();
        let remaining = self.buffer.len();
        self.flush().await;
        info!(samples = remaining, "forwarder stopped after final flush");
    }

    /// Moves every queued batch into the outgoing buffer, oldest first.
    pub fn collect(&mut self) {
        for batch in self.queue.drain() {
            self.buffer.extend(batch.samples);
        }
    }

    /// Pushes the whole buffer in chunks of at most `max_samples_per_push`
    /// samples. Chunks go out strictly in order.
    pub async fn flush(&mut self) {
        while !self.buffer.is_empty() {
            let take = self.buffer.len().min(self.settings.max_samples_per_push.max(1));
            let chunk = self.buffer.drain(..take).collect::<Vec<_>>();
            self.push_with_retry(WriteRequest::from_samples(chunk)).await;
        }
    }

    async fn push_with_retry(&self, request: WriteRequest) -> bool {
        let samples = request.sample_count();
        let max_attempts = self.settings.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.sink.push(&request).await {
                Ok(()) => {
                    debug!(samples, attempt, "pushed samples to remote sink");
                    self.metrics.record_push(samples);
                    return true;
                }
                Err(err) if attempt < max_attempts => {
                    let delay = self.settings.retry.backoff(attempt);
                    warn!(error = %err, attempt, ?delay, "push failed, retrying");
                    self.metrics.record_retry();
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        attempts = max_attempts,
                        samples,
                        "push failed after all attempts, dropping samples"
                    );
                }
            }
        }

        self.metrics.record_forward_failure();
        false
    }
}
