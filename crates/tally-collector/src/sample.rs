use chrono::{DateTime, Utc};
use tally_metrics::ParsedSample;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// Builds a scraped sample stamped with the fetch completion time, merging
    /// the target labels on top of the scraped ones. A scraped label that
    /// collides with a target label is renamed with `exported_` prefixes
    /// until its name is free. Timestamps carried in the payload are ignored.
    pub fn from_parsed(
        parsed: ParsedSample,
        target_labels: &[(String, String)],
        collected_at: DateTime<Utc>,
    ) -> Self {
        let mut labels = parsed.labels;
        for (name, value) in target_labels {
            if let Some(position) = labels.iter().position(|(existing, _)| existing == name) {
                let mut renamed = format!("exported_{name}");
                while labels.iter().any(|(existing, _)| *existing == renamed)
                    || target_labels.iter().any(|(target, _)| *target == renamed)
                {
                    renamed = format!("exported_{renamed}");
                }
                labels[position].0 = renamed;
            }
            labels.push((name.clone(), value.clone()));
        }

        Self {
            name: parsed.name,
            labels,
            value: parsed.value,
            timestamp: collected_at,
        }
    }

    /// Series identity: metric name plus the label set, order-independent.
    pub fn series_key(&self) -> String {
        let mut labels = self
            .labels
            .iter()
            .map(|(name, value)| format!("{name}={value:?}"))
            .collect::<Vec<_>>();
        labels.sort();
        format!("{}{{{}}}", self.name, labels.join(","))
    }
}

/// Samples from one successful scrape. Ownership moves into the forwarder's
/// queue on handoff.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub target: String,
    pub collected_at: DateTime<Utc>,
    pub samples: Vec<Sample>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_labels() -> Vec<(String, String)> {
        vec![
            ("job".to_string(), "flask-app".to_string()),
            ("instance".to_string(), "localhost:8080".to_string()),
        ]
    }

    #[test]
    fn target_labels_are_attached_and_collisions_exported() {
        let collected_at = Utc::now();
        let parsed = ParsedSample {
            name: "http_requests_total".to_string(),
            labels: vec![
                ("job".to_string(), "inner".to_string()),
                ("method".to_string(), "GET".to_string()),
            ],
            value: 3.0,
            timestamp_ms: None,
        };

        let sample = Sample::from_parsed(parsed, &target_labels(), collected_at);
        assert_eq!(
            sample.labels,
            vec![
                ("exported_job".to_string(), "inner".to_string()),
                ("method".to_string(), "GET".to_string()),
                ("job".to_string(), "flask-app".to_string()),
                ("instance".to_string(), "localhost:8080".to_string()),
            ]
        );
        assert_eq!(sample.timestamp, collected_at);
    }

    #[test]
    fn payload_timestamps_are_replaced_by_collection_time() {
        let collected_at = Utc::now();
        let parsed = ParsedSample {
            name: "up".to_string(),
            labels: Vec::new(),
            value: 1.0,
            timestamp_ms: Some(1_000),
        };

        let sample = Sample::from_parsed(parsed, &target_labels(), collected_at);
        assert_eq!(sample.timestamp, collected_at);
    }

    #[test]
    fn repeated_collisions_keep_every_scraped_label() {
        let parsed = ParsedSample {
            name: "up".to_string(),
            labels: vec![
                ("job".to_string(), "inner".to_string()),
                ("exported_job".to_string(), "older".to_string()),
            ],
            value: 1.0,
            timestamp_ms: None,
        };

        let sample = Sample::from_parsed(parsed, &target_labels(), Utc::now());
        assert_eq!(
            sample.labels,
            vec![
                ("exported_exported_job".to_string(), "inner".to_string()),
                ("exported_job".to_string(), "older".to_string()),
                ("job".to_string(), "flask-app".to_string()),
                ("instance".to_string(), "localhost:8080".to_string()),
            ]
        );

        let request = crate::sink::WriteRequest::from_samples(vec![sample]);
        let labels = &request.timeseries[0].labels;
        assert_eq!(labels.len(), 5);
        assert_eq!(labels["exported_exported_job"], "inner");
        assert_eq!(labels["exported_job"], "older");
        assert_eq!(labels["job"], "flask-app");
    }

    #[test]
    fn series_key_ignores_label_order() {
        let left = Sample {
            name: "m".to_string(),
            labels: vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())],
            value: 0.0,
            timestamp: Utc::now(),
        };
        let right = Sample {
            labels: vec![("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())],
            ..left.clone()
        };
        assert_eq!(left.series_key(), right.series_key());
    }
}
