use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_metrics::MetricsRegistry;

use crate::{
    scraper::{ScrapeState, TargetStatus},
    target::ScrapeTarget,
};

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub registry_writable: bool,
    pub targets: Vec<TargetHealth>,
}

#[derive(Debug, Serialize)]
pub struct TargetHealth {
    pub name: String,
    pub state: ScrapeState,
    pub healthy: bool,
    pub seconds_since_tick: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Liveness of the collector: every scrape loop has started a cycle within
/// `2 * interval + timeout`, and the registry still accepts writes.
///
/// A target that keeps failing is still healthy as long as its loop ticks;
/// failures show up in `tally_target_up` instead.
pub struct CollectorHealth {
    registry: Arc<MetricsRegistry>,
    targets: Vec<(ScrapeTarget, Arc<TargetStatus>)>,
}

impl CollectorHealth {
    pub fn new(registry: Arc<MetricsRegistry>, targets: Vec<(ScrapeTarget, Arc<TargetStatus>)>) -> Self {
        Self { registry, targets }
    }

    pub fn report(&self) -> HealthReport {
        let registry_writable = self.registry.is_writable();
        let targets = self
            .targets
            .iter()
            .map(|(target, status)| {
                let since_tick = status.since_last_tick();
                let deadline = target.interval * 2 + target.timeout;
                TargetHealth {
                    name: target.name.clone(),
                    state: status.state(),
                    healthy: since_tick <= deadline,
                    seconds_since_tick: since_tick.as_secs_f64(),
                    last_success: status.last_success(),
                    last_error: status.last_error(),
                }
            })
            .collect::<Vec<_>>();

        let healthy = registry_writable && targets.iter().all(|target| target.healthy);
        HealthReport {
            status: if healthy { "healthy" } else { "unhealthy" },
            registry_writable,
            targets,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.report().status == "healthy"
    }
}
