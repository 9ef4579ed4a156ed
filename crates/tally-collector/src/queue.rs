use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::Notify;
use tracing::warn;

use crate::{metrics::CollectorMetrics, sample::SampleBatch};

/// Bounded handoff between the scrapers and the forwarder. Pushing never
/// blocks: a full queue evicts the oldest pending batch of the same target,
/// or the oldest batch overall when that target has none queued.
pub struct BatchQueue {
    capacity: usize,
    pending: Mutex<VecDeque<SampleBatch>>,
    notify: Notify,
    metrics: Arc<CollectorMetrics>,
}

impl BatchQueue {
    pub fn new(capacity: usize, metrics: Arc<CollectorMetrics>) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            metrics,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues `batch`, returning the batch evicted to make room for it.
    pub fn push(&self, batch: SampleBatch) -> Option<SampleBatch> {
        let (evicted, depth) = {
            let mut pending = self.lock();
            let evicted = if pending.len() >= self.capacity {
                let position = pending
                    .iter()
                    .position(|queued| queued.target == batch.target)
                    .unwrap_or(0);
                pending.remove(position)
            } else {
                None
            };
            pending.push_back(batch);
            (evicted, pending.len())
        };

        if let Some(dropped) = &evicted {
            warn!(
                target = %dropped.target,
                samples = dropped.len(),
                "forwarder queue full, dropped oldest batch"
            );
            self.metrics.record_dropped_batch(&dropped.target);
        }
        self.metrics.set_queue_depth(depth);
        self.notify.notify_one();

        evicted
    }

    /// Takes every pending batch in enqueue order.
    pub fn drain(&self) -> Vec<SampleBatch> {
        let drained = self.lock().drain(..).collect::<Vec<_>>();
        self.metrics.set_queue_depth(0);
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next push, or immediately if a push happened since
    /// the last wait.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SampleBatch>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tally_metrics::MetricsRegistry;

    use super::*;
    use crate::sample::Sample;

    fn batch(target: &str, marker: f64) -> SampleBatch {
        let collected_at = Utc::now();
        SampleBatch {
            target: target.to_string(),
            collected_at,
            samples: vec![Sample {
                name: "marker".to_string(),
                labels: vec![("job".to_string(), target.to_string())],
                value: marker,
                timestamp: collected_at,
            }],
        }
    }

    fn queue(capacity: usize) -> (BatchQueue, Arc<CollectorMetrics>) {
        let registry = MetricsRegistry::new();
        let metrics = Arc::new(CollectorMetrics::register(&registry).unwrap());
        (BatchQueue::new(capacity, Arc::clone(&metrics)), metrics)
    }

    fn markers(batches: &[SampleBatch]) -> Vec<(String, f64)> {
        batches
            .iter()
            .map(|batch| (batch.target.clone(), batch.samples[0].value))
            .collect()
    }

    #[test]
    fn saturated_queue_drops_oldest_batch_of_same_target() {
        let (queue, metrics) = queue(3);
        queue.push(batch("a", 1.0));
        queue.push(batch("b", 1.0));
        queue.push(batch("a", 2.0));

        let evicted = queue.push(batch("a", 3.0)).expect("a batch is evicted");
        assert_eq!(evicted.samples[0].value, 1.0);
        assert_eq!(metrics.dropped_batches("a"), 1.0);
        assert_eq!(metrics.dropped_batches("b"), 0.0);
        assert_eq!(queue.len(), 3);

        assert_eq!(
            markers(&queue.drain()),
            vec![
                ("b".to_string(), 1.0),
                ("a".to_string(), 2.0),
                ("a".to_string(), 3.0),
            ]
        );
    }

    #[test]
    fn target_without_pending_batches_evicts_oldest_overall() {
        let (queue, metrics) = queue(2);
        queue.push(batch("a", 1.0));
        queue.push(batch("a", 2.0));

        let evicted = queue.push(batch("b", 1.0)).expect("a batch is evicted");
        assert_eq!(evicted.target, "a");
        assert_eq!(evicted.samples[0].value, 1.0);
        assert_eq!(metrics.dropped_batches("a"), 1.0);
    }

    #[test]
    fn queue_never_exceeds_capacity_and_counts_each_drop_once() {
        let (queue, metrics) = queue(4);
        for step in 0..100 {
            queue.push(batch("a", step as f64));
            assert!(queue.len() <= queue.capacity());
        }

        assert_eq!(metrics.dropped_batches("a"), 96.0);
        let remaining = markers(&queue.drain());
        assert_eq!(
            remaining.iter().map(|(_, marker)| *marker).collect::<Vec<_>>(),
            vec![96.0, 97.0, 98.0, 99.0]
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn push_wakes_a_waiting_consumer() {
        let (queue, _) = queue(2);
        let queue = Arc::new(queue);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue.notified().await;
                queue.drain().len()
            })
        };
        tokio::task::yield_now().await;
        queue.push(batch("a", 1.0));

        let drained = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(drained, 1);
    }
}
