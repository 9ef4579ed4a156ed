use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tally_common::{
    error::{Result, TallyError},
    time::unix_millis,
};
use tally_metrics::encoder::format_metric_value;
use tracing::debug;

use crate::sample::Sample;

pub const METRIC_NAME_LABEL: &str = "__name__";

/// One push to the remote sink. Samples of a series keep the order in which
/// they were scraped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<WireSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSample {
    #[serde(serialize_with = "serialize_value", deserialize_with = "deserialize_value")]
    pub value: f64,
    pub timestamp_ms: i64,
}

impl WriteRequest {
    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        let mut timeseries: Vec<TimeSeries> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for sample in samples {
            let key = sample.series_key();
            let wire = WireSample {
                value: sample.value,
                timestamp_ms: unix_millis(&sample.timestamp),
            };

            match index.get(&key) {
                Some(&position) => timeseries[position].samples.push(wire),
                None => {
                    let mut labels = sample.labels.into_iter().collect::<BTreeMap<_, _>>();
                    labels.insert(METRIC_NAME_LABEL.to_string(), sample.name);
                    index.insert(key, timeseries.len());
                    timeseries.push(TimeSeries {
                        labels,
                        samples: vec![wire],
                    });
                }
            }
        }

        Self { timeseries }
    }

    pub fn sample_count(&self) -> usize {
        self.timeseries.iter().map(|series| series.samples.len()).sum()
    }
}

fn serialize_value<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_metric_value(*value))
}

fn deserialize_value<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.as_str() {
        "+Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw.parse::<f64>().map_err(serde::de::Error::custom),
    }
}

#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn push(&self, request: &WriteRequest) -> Result<()>;
}

/// POSTs write requests as JSON to a remote write endpoint.
pub struct HttpSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                TallyError::InternalError(format!("failed to create remote write client: {err}"))
            })?;

        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn push(&self, request: &WriteRequest) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                TallyError::ForwardFailure(format!(
                    "failed to push to {}: {err}",
                    self.endpoint
                ))
            })?;

        if !response.status().is_success() {
            return Err(TallyError::ForwardFailure(format!(
                "remote write endpoint {} returned status {}",
                self.endpoint,
                response.status()
            )));
        }

        Ok(())
    }
}

/// Sink used when no remote write endpoint is configured.
pub struct LogSink;

#[async_trait]
impl RemoteSink for LogSink {
    async fn push(&self, request: &WriteRequest) -> Result<()> {
        debug!(
            series = request.timeseries.len(),
            samples = request.sample_count(),
            "no remote write endpoint configured, discarding push"
        );
        Ok(())
    }
}
