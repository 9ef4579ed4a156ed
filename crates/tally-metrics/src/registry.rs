use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tally_common::error::{Result, TallyError};
use tracing::debug;

use crate::{
    encoder,
    types::{CollectedMetric, MetricDescriptor, MetricType, MetricValue, SeriesSnapshot},
};

type LabelValues = Vec<String>;

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Upper bound on distinct label combinations per metric. `None` leaves
    /// cardinality unbounded.
    pub max_series_per_metric: Option<usize>,
}

/// Handle returned by [`MetricsRegistry::register`]. Cloning is cheap and all
/// clones point at the same series storage.
#[derive(Clone)]
pub enum MetricHandle {
    Counter(Arc<CounterMetric>),
    Gauge(Arc<GaugeMetric>),
    Histogram(Arc<HistogramMetric>),
}

impl MetricHandle {
    pub fn descriptor(&self) -> &MetricDescriptor {
        match self {
            Self::Counter(metric) => &metric.descriptor,
            Self::Gauge(metric) => &metric.descriptor,
            Self::Histogram(metric) => &metric.descriptor,
        }
    }

    pub fn as_counter(&self) -> Option<Arc<CounterMetric>> {
        match self {
            Self::Counter(metric) => Some(Arc::clone(metric)),
            _ => None,
        }
    }

    pub fn as_gauge(&self) -> Option<Arc<GaugeMetric>> {
        match self {
            Self::Gauge(metric) => Some(Arc::clone(metric)),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<Arc<HistogramMetric>> {
        match self {
            Self::Histogram(metric) => Some(Arc::clone(metric)),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &MetricHandle) -> bool {
        match (self, other) {
            (Self::Counter(left), Self::Counter(right)) => Arc::ptr_eq(left, right),
            (Self::Gauge(left), Self::Gauge(right)) => Arc::ptr_eq(left, right),
            (Self::Histogram(left), Self::Histogram(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }

    fn collect(&self) -> Vec<SeriesSnapshot> {
        match self {
            Self::Counter(metric) => metric.collect(),
            Self::Gauge(metric) => metric.collect(),
            Self::Histogram(metric) => metric.collect(),
        }
    }
}

#[derive(Default)]
struct RegisteredMetrics {
    order: Vec<MetricHandle>,
    index: HashMap<String, usize>,
}

pub struct MetricsRegistry {
    options: RegistryOptions,
    metrics: RwLock<RegisteredMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            options,
            metrics: RwLock::new(RegisteredMetrics::default()),
        }
    }

    /// Registers `descriptor`, or returns the existing handle when an
    /// identical descriptor is already registered under the same name.
    pub fn register(&self, descriptor: MetricDescriptor) -> Result<MetricHandle> {
        validate_descriptor(&descriptor)?;

        let mut metrics = self.metrics.write().map_err(|_| {
            TallyError::InternalError("failed to acquire metrics registry lock".to_string())
        })?;

        if let Some(&position) = metrics.index.get(&descriptor.name) {
            let existing = &metrics.order[position];
            if existing.descriptor().is_compatible_with(&descriptor) {
                return Ok(existing.clone());
            }
            return Err(TallyError::RegistrationConflict(format!(
                "metric {} already registered as {} with labels {:?}",
                descriptor.name,
                existing.descriptor().metric_type.as_prometheus_type(),
                existing.descriptor().variable_labels,
            )));
        }

        let limit = self.options.max_series_per_metric;
        let handle = match descriptor.metric_type {
            MetricType::Counter => MetricHandle::Counter(Arc::new(CounterMetric {
                descriptor: descriptor.clone(),
                series: SeriesSet::new(limit),
            })),
            MetricType::Gauge => MetricHandle::Gauge(Arc::new(GaugeMetric {
                descriptor: descriptor.clone(),
                series: SeriesSet::new(limit),
            })),
            MetricType::Histogram => MetricHandle::Histogram(Arc::new(HistogramMetric {
                descriptor: descriptor.clone(),
                series: SeriesSet::new(limit),
            })),
        };

        debug!(
            name = %descriptor.name,
            metric_type = descriptor.metric_type.as_prometheus_type(),
            "registered metric"
        );
        let position = metrics.order.len();
        metrics.order.push(handle.clone());
        metrics.index.insert(descriptor.name, position);
        Ok(handle)
    }

    pub fn register_counter(
        &self,
        name: &str,
        help: &str,
        variable_labels: &[&str],
    ) -> Result<Arc<CounterMetric>> {
        self.register(MetricDescriptor::counter(name, help, variable_labels))?
            .as_counter()
            .ok_or_else(|| kind_mismatch(name, MetricType::Counter))
    }

    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        variable_labels: &[&str],
    ) -> Result<Arc<GaugeMetric>> {
        self.register(MetricDescriptor::gauge(name, help, variable_labels))?
            .as_gauge()
            .ok_or_else(|| kind_mismatch(name, MetricType::Gauge))
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        variable_labels: &[&str],
        buckets: &[f64],
    ) -> Result<Arc<HistogramMetric>> {
        self.register(MetricDescriptor::histogram(name, help, variable_labels, buckets))?
            .as_histogram()
            .ok_or_else(|| kind_mismatch(name, MetricType::Histogram))
    }

    /// Point-in-time copy of every metric in registration order. Series are
    /// listed in first-write order and each one is read atomically.
    pub fn snapshot(&self) -> Vec<CollectedMetric> {
        let handles = match self.metrics.read() {
            Ok(guard) => guard.order.clone(),
            Err(_) => return Vec::new(),
        };

        handles
            .iter()
            .map(|handle| CollectedMetric {
                descriptor: handle.descriptor().clone(),
                series: handle.collect(),
            })
            .collect()
    }

    pub fn render_prometheus(&self) -> String {
        encoder::encode(&self.snapshot())
    }

    /// False once a writer panicked while holding the registry lock.
    pub fn is_writable(&self) -> bool {
        !self.metrics.is_poisoned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CounterMetric {
    descriptor: MetricDescriptor,
    series: SeriesSet<AtomicF64>,
}

impl CounterMetric {
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn inc(&self, labels: &[&str], delta: f64) -> Result<()> {
        if delta.is_nan() || delta < 0.0 {
            return Err(TallyError::InvalidObservation(format!(
                "counter {} cannot be incremented by {delta}",
                self.descriptor.name
            )));
        }

        let series = self
            .series
            .get_or_create(&self.descriptor, labels, || AtomicF64::new(0.0))?;
        series.add(delta);
        Ok(())
    }

    pub fn inc_one(&self, labels: &[&str]) -> Result<()> {
        self.inc(labels, 1.0)
    }

    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        self.series.get(labels).map(|series| series.load())
    }

    fn collect(&self) -> Vec<SeriesSnapshot> {
        self.series
            .entries()
            .into_iter()
            .map(|(label_values, value)| SeriesSnapshot {
                labels: materialize_labels(&self.descriptor, &label_values),
                value: MetricValue::Counter(value.load()),
            })
            .collect()
    }
}

pub struct GaugeMetric {
    descriptor: MetricDescriptor,
    series: SeriesSet<AtomicF64>,
}

impl GaugeMetric {
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn set(&self, labels: &[&str], value: f64) -> Result<()> {
        let series = self
            .series
            .get_or_create(&self.descriptor, labels, || AtomicF64::new(0.0))?;
        series.store(value);
        Ok(())
    }

    pub fn add(&self, labels: &[&str], delta: f64) -> Result<()> {
        let series = self
            .series
            .get_or_create(&self.descriptor, labels, || AtomicF64::new(0.0))?;
        series.add(delta);
        Ok(())
    }

    pub fn sub(&self, labels: &[&str], delta: f64) -> Result<()> {
        self.add(labels, -delta)
    }

    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        self.series.get(labels).map(|series| series.load())
    }

    fn collect(&self) -> Vec<SeriesSnapshot> {
        self.series
            .entries()
            .into_iter()
            .map(|(label_values, value)| SeriesSnapshot {
                labels: materialize_labels(&self.descriptor, &label_values),
                value: MetricValue::Gauge(value.load()),
            })
            .collect()
    }
}

pub struct HistogramMetric {
    descriptor: MetricDescriptor,
    series: SeriesSet<Mutex<HistogramState>>,
}

/// Bucket counts are stored cumulatively; the final slot is `+Inf`.
struct HistogramState {
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

impl HistogramMetric {
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn observe(&self, labels: &[&str], value: f64) -> Result<()> {
        if value.is_nan() {
            return Err(TallyError::InvalidObservation(format!(
                "histogram {} cannot observe NaN",
                self.descriptor.name
            )));
        }

        let bucket_slots = self.descriptor.buckets.len() + 1;
        let series = self.series.get_or_create(&self.descriptor, labels, || {
            Mutex::new(HistogramState {
                bucket_counts: vec![0; bucket_slots],
                count: 0,
                sum: 0.0,
            })
        })?;

        let first_bucket = self
            .descriptor
            .buckets
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.descriptor.buckets.len());

        let mut state = series.lock().map_err(|_| {
            TallyError::InternalError(format!(
                "histogram {} series lock poisoned",
                self.descriptor.name
            ))
        })?;
        for bucket in &mut state.bucket_counts[first_bucket..] {
            *bucket += 1;
        }
        state.count += 1;
        state.sum += value;
        Ok(())
    }

    fn collect(&self) -> Vec<SeriesSnapshot> {
        self.series
            .entries()
            .into_iter()
            .filter_map(|(label_values, entry)| {
                let state = entry.lock().ok()?;
                let buckets = self
                    .descriptor
                    .buckets
                    .iter()
                    .copied()
                    .chain(std::iter::once(f64::INFINITY))
                    .zip(state.bucket_counts.iter().copied())
                    .collect::<Vec<_>>();

                Some(SeriesSnapshot {
                    labels: materialize_labels(&self.descriptor, &label_values),
                    value: MetricValue::Histogram {
                        buckets,
                        count: state.count,
                        sum: state.sum,
                    },
                })
            })
            .collect()
    }
}

struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    fn add(&self, delta: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }
}

struct SeriesEntries<T> {
    order: Vec<(LabelValues, Arc<T>)>,
    index: HashMap<LabelValues, usize>,
}

/// Label-value keyed series storage that remembers first-write order.
struct SeriesSet<T> {
    limit: Option<usize>,
    entries: RwLock<SeriesEntries<T>>,
}

impl<T> SeriesSet<T> {
    fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            entries: RwLock::new(SeriesEntries {
                order: Vec::new(),
                index: HashMap::new(),
            }),
        }
    }

    fn get(&self, labels: &[&str]) -> Option<Arc<T>> {
        let key = labels.iter().map(|value| (*value).to_string()).collect::<LabelValues>();
        let guard = self.entries.read().ok()?;
        guard
            .index
            .get(&key)
            .map(|&position| Arc::clone(&guard.order[position].1))
    }

    fn get_or_create(
        &self,
        descriptor: &MetricDescriptor,
        labels: &[&str],
        init: impl FnOnce() -> T,
    ) -> Result<Arc<T>> {
        let label_values = normalize_labels(descriptor, labels)?;
        if let Ok(guard) = self.entries.read()
            && let Some(&position) = guard.index.get(&label_values)
        {
            return Ok(Arc::clone(&guard.order[position].1));
        }

        let mut guard = self.entries.write().map_err(|_| {
            TallyError::InternalError(format!("series lock poisoned for {}", descriptor.name))
        })?;
        if let Some(&position) = guard.index.get(&label_values) {
            return Ok(Arc::clone(&guard.order[position].1));
        }

        if let Some(limit) = self.limit
            && guard.order.len() >= limit
        {
            return Err(TallyError::InvalidObservation(format!(
                "metric {} reached its limit of {limit} label combinations",
                descriptor.name
            )));
        }

        let series = Arc::new(init());
        let position = guard.order.len();
        guard.order.push((label_values.clone(), Arc::clone(&series)));
        guard.index.insert(label_values, position);
        Ok(series)
    }

    fn entries(&self) -> Vec<(LabelValues, Arc<T>)> {
        match self.entries.read() {
            Ok(guard) => guard
                .order
                .iter()
                .map(|(labels, series)| (labels.clone(), Arc::clone(series)))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn normalize_labels(descriptor: &MetricDescriptor, labels: &[&str]) -> Result<LabelValues> {
    let expected = descriptor.variable_labels.len();
    if labels.len() != expected {
        return Err(TallyError::InvalidObservation(format!(
            "metric {} expects {expected} label values, got {}",
            descriptor.name,
            labels.len()
        )));
    }

    Ok(labels.iter().map(|value| (*value).to_string()).collect())
}

fn materialize_labels(descriptor: &MetricDescriptor, values: &[String]) -> Vec<(String, String)> {
    descriptor
        .variable_labels
        .iter()
        .zip(values.iter())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn kind_mismatch(name: &str, expected: MetricType) -> TallyError {
    TallyError::RegistrationConflict(format!(
        "metric {name} is not registered as a {}",
        expected.as_prometheus_type()
    ))
}

fn validate_descriptor(descriptor: &MetricDescriptor) -> Result<()> {
    if !is_valid_metric_name(&descriptor.name) {
        return Err(TallyError::InvalidArgument(format!(
            "invalid metric name: {:?}",
            descriptor.name
        )));
    }

    for (index, label) in descriptor.variable_labels.iter().enumerate() {
        if !is_valid_label_name(label) || label.starts_with("__") {
            return Err(TallyError::InvalidArgument(format!(
                "invalid label name {label:?} on metric {}",
                descriptor.name
            )));
        }
        if descriptor.variable_labels[..index].contains(label) {
            return Err(TallyError::InvalidArgument(format!(
                "duplicate label name {label:?} on metric {}",
                descriptor.name
            )));
        }
    }

    if descriptor.metric_type == MetricType::Histogram {
        if descriptor.variable_labels.iter().any(|label| label == "le") {
            return Err(TallyError::InvalidArgument(format!(
                "histogram {} cannot use the reserved label \"le\"",
                descriptor.name
            )));
        }
        if descriptor.buckets.iter().any(|bound| !bound.is_finite()) {
            return Err(TallyError::InvalidArgument(format!(
                "histogram {} bucket bounds must be finite",
                descriptor.name
            )));
        }
        if descriptor.buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(TallyError::InvalidArgument(format!(
                "histogram {} bucket bounds must be strictly increasing",
                descriptor.name
            )));
        }
    } else if !descriptor.buckets.is_empty() {
        return Err(TallyError::InvalidArgument(format!(
            "metric {} declares buckets but is not a histogram",
            descriptor.name
        )));
    }

    Ok(())
}

pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
