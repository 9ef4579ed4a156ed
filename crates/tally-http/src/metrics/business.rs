use std::sync::Arc;

use tally_common::error::Result;
use tally_metrics::{CounterMetric, GaugeMetric, MetricsRegistry};

#[derive(Debug, Clone)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub environment: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: "tally-demo".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

pub struct BusinessMetrics {
    orders_created_total: Arc<CounterMetric>,
    revenue_total: Arc<CounterMetric>,
    active_users: Arc<GaugeMetric>,
}

impl BusinessMetrics {
    pub fn register(registry: &MetricsRegistry, info: &AppInfo) -> Result<Self> {
        let orders_created_total = registry.register_counter(
            "app_orders_created_total",
            "Total number of orders created",
            &[],
        )?;

        let revenue_total =
            registry.register_counter("app_revenue_total", "Total revenue in USD", &[])?;

        let active_users = registry.register_gauge(
            "app_active_users",
            "Number of currently active users",
            &[],
        )?;

        let app_info = registry.register_gauge(
            "app_info",
            "Application information",
            &["version", "environment", "name"],
        )?;
        app_info.set(&[&info.version, &info.environment, &info.name], 1.0)?;

        Ok(Self {
            orders_created_total,
            revenue_total,
            active_users,
        })
    }

    pub fn record_order(&self, amount: f64) -> Result<()> {
        self.revenue_total.inc(&[], amount)?;
        self.orders_created_total.inc_one(&[])
    }

    pub fn set_active_users(&self, count: usize) -> Result<()> {
        self.active_users.set(&[], count as f64)
    }
}
