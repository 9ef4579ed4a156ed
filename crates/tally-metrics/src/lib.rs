//! tally-metrics: in-process metrics registry and the text exposition format.
//!
//! ```text
//! MetricsRegistry
//!   ├── register_*() → typed handles passed to call sites
//!   └── snapshot()   → encoder::encode() → text/plain payload
//!
//! parser::parse() ← payload pulled by a scraper
//! ```

pub mod encoder;
pub mod parser;
pub mod registry;
pub mod types;

pub use encoder::{CONTENT_TYPE, encode};
pub use parser::{ParsedSample, parse};
pub use registry::{
    CounterMetric, GaugeMetric, HistogramMetric, MetricHandle, MetricsRegistry, RegistryOptions,
};
pub use types::{CollectedMetric, MetricDescriptor, MetricType, MetricValue, SeriesSnapshot};
