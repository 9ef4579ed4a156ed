use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tally_common::error::{Result, TallyError};
use tally_metrics::MetricsRegistry;
use thiserror::Error;
use url::Url;

pub const SELF_ADDRESS: &str = "self";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddress {
    Http(Url),
    SelfRegistry,
}

impl TargetAddress {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == SELF_ADDRESS {
            return Ok(Self::SelfRegistry);
        }

        let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        let mut url = Url::parse(&with_scheme).map_err(|err| {
            TallyError::InvalidArgument(format!("invalid scrape address {raw}: {err}"))
        })?;
        if url.host_str().is_none() {
            return Err(TallyError::InvalidArgument(format!(
                "scrape address {raw} has no host"
            )));
        }
        if url.path().is_empty() || url.path() == "/" {
            url.set_path(DEFAULT_METRICS_PATH);
        }

        Ok(Self::Http(url))
    }

    /// Value of the `instance` label.
    pub fn instance(&self) -> String {
        match self {
            Self::SelfRegistry => SELF_ADDRESS.to_string(),
            Self::Http(url) => {
                let host = url.host_str().unwrap_or_default();
                match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                }
            }
        }
    }
}

/// A configured scrape target. Immutable once the collector has started.
#[derive(Debug, Clone)]
pub struct ScrapeTarget {
    pub name: String,
    pub address: TargetAddress,
    pub interval: Duration,
    pub timeout: Duration,
    /// Attached to every scraped sample; always contains `job` and
    /// `instance`.
    pub labels: Vec<(String, String)>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transport(_) => "fetch",
            Self::Status(_) => "status",
            Self::Timeout(_) => "timeout",
        }
    }
}

#[async_trait]
pub trait ScrapeSource: Send + Sync {
    async fn fetch(&self) -> std::result::Result<String, FetchError>;
}

pub struct HttpSource {
    url: Url,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(url: Url, timeout: Duration, client: reqwest::Client) -> Self {
        Self {
            url,
            timeout,
            client,
        }
    }
}

#[async_trait]
impl ScrapeSource for HttpSource {
    async fn fetch(&self) -> std::result::Result<String, FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "text/plain;version=0.0.4")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    FetchError::Timeout(self.timeout)
                } else {
                    FetchError::Transport(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        response
            .text()
            .await
            .map_err(|err| FetchError::Transport(format!("failed to read body: {err}")))
    }
}

/// Reads the exposition payload straight out of an in-process registry.
pub struct RegistrySource {
    registry: Arc<MetricsRegistry>,
}

impl RegistrySource {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ScrapeSource for RegistrySource {
    async fn fetch(&self) -> std::result::Result<String, FetchError> {
        Ok(self.registry.render_prometheus())
    }
}

pub fn build_source(
    target: &ScrapeTarget,
    registry: &Arc<MetricsRegistry>,
    client: &reqwest::Client,
) -> Arc<dyn ScrapeSource> {
    match &target.address {
        TargetAddress::Http(url) => Arc::new(HttpSource::new(
            url.clone(),
            target.timeout,
            client.clone(),
        )),
        TargetAddress::SelfRegistry => Arc::new(RegistrySource::new(Arc::clone(registry))),
    }
}
