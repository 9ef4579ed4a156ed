//! tally-collector: scrapes exposition endpoints and forwards the samples
//! to a remote write sink.
//!
//! ```text
//! Scraper (one task per target)
//!   ├── ScrapeSource::fetch() → parser::parse() → SampleBatch
//!   └── BatchQueue::push()    (bounded, drops oldest per target)
//!
//! Forwarder (one task)
//!   ├── BatchQueue::drain()   on timer or size threshold
//!   └── RemoteSink::push()    with exponential backoff
//! ```

pub mod config;
pub mod forwarder;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod router;
pub mod sample;
pub mod scraper;
pub mod sink;
pub mod system;
pub mod target;

pub use config::{CollectorConfig, ForwarderConfig, TargetConfig};
pub use forwarder::{Forwarder, ForwarderSettings, RetryPolicy};
pub use health::{CollectorHealth, HealthReport};
pub use metrics::CollectorMetrics;
pub use queue::BatchQueue;
pub use sample::{Sample, SampleBatch};
pub use scraper::{ScrapeState, Scraper, TargetStatus};
pub use sink::{HttpSink, LogSink, RemoteSink, WriteRequest};
pub use system::CollectorSys;
pub use target::{ScrapeSource, ScrapeTarget, TargetAddress};
