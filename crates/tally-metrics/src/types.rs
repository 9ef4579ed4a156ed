use serde::{Deserialize, Serialize};

pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub fn as_prometheus_type(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

/// Static definition of a metric. Two descriptors are compatible only when
/// every field except `help` matches.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub variable_labels: Vec<String>,
    /// Upper bounds of the finite histogram buckets, ascending. Empty for
    /// counters and gauges.
    pub buckets: Vec<f64>,
}

impl MetricDescriptor {
    pub fn counter(name: &str, help: &str, variable_labels: &[&str]) -> Self {
        Self::new(name, help, MetricType::Counter, variable_labels, Vec::new())
    }

    pub fn gauge(name: &str, help: &str, variable_labels: &[&str]) -> Self {
        Self::new(name, help, MetricType::Gauge, variable_labels, Vec::new())
    }

    pub fn histogram(name: &str, help: &str, variable_labels: &[&str], buckets: &[f64]) -> Self {
        let mut buckets = if buckets.is_empty() {
            DEFAULT_BUCKETS.to_vec()
        } else {
            buckets.to_vec()
        };
        buckets.sort_by(|left, right| left.total_cmp(right));
        Self::new(name, help, MetricType::Histogram, variable_labels, buckets)
    }

    fn new(
        name: &str,
        help: &str,
        metric_type: MetricType,
        variable_labels: &[&str],
        buckets: Vec<f64>,
    ) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            metric_type,
            variable_labels: variable_labels.iter().map(|label| (*label).to_string()).collect(),
            buckets,
        }
    }

    pub fn is_compatible_with(&self, other: &MetricDescriptor) -> bool {
        self.name == other.name
            && self.metric_type == other.metric_type
            && self.variable_labels == other.variable_labels
            && self.buckets == other.buckets
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    /// `buckets` holds cumulative counts per upper bound and always ends with
    /// the `+Inf` bucket, whose count equals `count`.
    Histogram {
        buckets: Vec<(f64, u64)>,
        count: u64,
        sum: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub labels: Vec<(String, String)>,
    pub value: MetricValue,
}

#[derive(Debug, Clone)]
pub struct CollectedMetric {
    pub descriptor: MetricDescriptor,
    pub series: Vec<SeriesSnapshot>,
}
