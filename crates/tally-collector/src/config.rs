use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::Deserialize;
use tally_common::error::{Result, TallyError};
use tally_metrics::{RegistryOptions, registry::is_valid_label_name};

use crate::{
    forwarder::{ForwarderSettings, RetryPolicy},
    target::{ScrapeTarget, TargetAddress},
};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:9464";
pub const DEFAULT_SCRAPE_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_SCRAPE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;
pub const SELF_TARGET_NAME: &str = "tally-collector";
pub const REMOTE_WRITE_URL_ENV: &str = "TALLY_REMOTE_WRITE_URL";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    pub listen: String,
    pub scrape_interval_ms: u64,
    pub scrape_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub max_series_per_metric: Option<usize>,
    /// Adds the collector's own registry as a target.
    pub scrape_self: bool,
    pub targets: Vec<TargetConfig>,
    pub forwarder: ForwarderConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            scrape_interval_ms: DEFAULT_SCRAPE_INTERVAL_MS,
            scrape_timeout_ms: DEFAULT_SCRAPE_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            max_series_per_metric: None,
            scrape_self: true,
            targets: Vec::new(),
            forwarder: ForwarderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub name: String,
    /// `host:port`, a full URL, or `self` for the collector's own registry.
    pub address: String,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl TargetConfig {
    /// Parses the `name=address` form used on the command line.
    pub fn parse_flag(raw: &str) -> Result<Self> {
        let (name, address) = raw.split_once('=').ok_or_else(|| {
            TallyError::InvalidArgument(format!("target must be written as name=address: {raw}"))
        })?;

        Ok(Self {
            name: name.trim().to_string(),
            address: address.trim().to_string(),
            interval_ms: None,
            timeout_ms: None,
            labels: BTreeMap::new(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForwarderConfig {
    pub remote_write_url: Option<String>,
    pub queue_capacity: usize,
    pub max_samples_per_push: usize,
    pub flush_interval_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub push_timeout_ms: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            remote_write_url: None,
            queue_capacity: 256,
            max_samples_per_push: 2_000,
            flush_interval_ms: 5_000,
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            push_timeout_ms: 10_000,
        }
    }
}

impl ForwarderConfig {
    pub fn settings(&self) -> ForwarderSettings {
        ForwarderSettings {
            max_samples_per_push: self.max_samples_per_push,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
            },
        }
    }
}

impl CollectorConfig {
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            TallyError::InvalidArgument(format!(
                "invalid collector config {}: {err}",
                path.display()
            ))
        })
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(REMOTE_WRITE_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                self.forwarder.remote_write_url = Some(url.to_string());
            }
        }
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_millis(self.scrape_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            max_series_per_metric: self.max_series_per_metric,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() && !self.scrape_self {
            return Err(TallyError::InvalidArgument(
                "at least one scrape target is required".to_string(),
            ));
        }

        let forwarder = &self.forwarder;
        if forwarder.queue_capacity == 0 {
            return Err(TallyError::InvalidArgument(
                "forwarder.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if forwarder.max_samples_per_push == 0 {
            return Err(TallyError::InvalidArgument(
                "forwarder.max_samples_per_push must be greater than zero".to_string(),
            ));
        }
        if forwarder.max_attempts == 0 {
            return Err(TallyError::InvalidArgument(
                "forwarder.max_attempts must be at least one".to_string(),
            ));
        }
        if forwarder.flush_interval_ms == 0 {
            return Err(TallyError::InvalidArgument(
                "forwarder.flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(url) = forwarder.remote_write_url.as_deref() {
            url::Url::parse(url).map_err(|err| {
                TallyError::InvalidArgument(format!("invalid remote_write_url {url}: {err}"))
            })?;
        }

        self.scrape_targets().map(|_| ())
    }

    /// Resolves every configured target, applying global defaults and the
    /// `job`/`instance` labels.
    pub fn scrape_targets(&self) -> Result<Vec<ScrapeTarget>> {
        let mut resolved: Vec<ScrapeTarget> = Vec::with_capacity(self.targets.len() + 1);

        let self_target = self.scrape_self.then(|| TargetConfig {
            name: SELF_TARGET_NAME.to_string(),
            address: crate::target::SELF_ADDRESS.to_string(),
            interval_ms: None,
            timeout_ms: None,
            labels: BTreeMap::new(),
        });

        for target in self.targets.iter().chain(self_target.as_ref()) {
            if target.name.trim().is_empty() {
                return Err(TallyError::InvalidArgument(
                    "scrape target name must not be empty".to_string(),
                ));
            }
            if resolved.iter().any(|existing| existing.name == target.name) {
                return Err(TallyError::InvalidArgument(format!(
                    "duplicate scrape target name: {}",
                    target.name
                )));
            }

            let interval_ms = target.interval_ms.unwrap_or(self.scrape_interval_ms);
            let timeout_ms = target
                .timeout_ms
                .unwrap_or(self.scrape_timeout_ms)
                .min(interval_ms);
            if interval_ms == 0 || timeout_ms == 0 {
                return Err(TallyError::InvalidArgument(format!(
                    "scrape target {} needs a non-zero interval and timeout",
                    target.name
                )));
            }

            for name in target.labels.keys() {
                if !is_valid_label_name(name) || name.starts_with("__") {
                    return Err(TallyError::InvalidArgument(format!(
                        "invalid label name {name:?} on target {}",
                        target.name
                    )));
                }
            }

            let address = TargetAddress::parse(&target.address)?;
            let mut labels = vec![
                ("job".to_string(), target.name.clone()),
                ("instance".to_string(), address.instance()),
            ];
            for (name, value) in &target.labels {
                match labels.iter_mut().find(|(existing, _)| existing == name) {
                    Some(existing) => existing.1 = value.clone(),
                    None => labels.push((name.clone(), value.clone())),
                }
            }

            resolved.push(ScrapeTarget {
                name: target.name.clone(),
                address,
                interval: Duration::from_millis(interval_ms),
                timeout: Duration::from_millis(timeout_ms),
                labels,
            });
        }

        Ok(resolved)
    }
}
