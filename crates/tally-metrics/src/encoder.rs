//! Prometheus text exposition format, version 0.0.4.

use crate::types::{CollectedMetric, MetricValue};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render a registry snapshot. Output depends only on the snapshot, so two
/// identical snapshots always encode to identical bytes.
pub fn encode(metrics: &[CollectedMetric]) -> String {
    let mut output = String::new();

    for metric in metrics {
        let name = &metric.descriptor.name;

        output.push_str("# HELP ");
        output.push_str(name);
        output.push(' ');
        output.push_str(&escape_help(&metric.descriptor.help));
        output.push('\n');

        output.push_str("# TYPE ");
        output.push_str(name);
        output.push(' ');
        output.push_str(metric.descriptor.metric_type.as_prometheus_type());
        output.push('\n');

        for series in &metric.series {
            match &series.value {
                MetricValue::Counter(value) | MetricValue::Gauge(value) => {
                    render_sample_line(&mut output, name, &series.labels, None, *value);
                }
                MetricValue::Histogram {
                    buckets,
                    count,
                    sum,
                } => {
                    let bucket_name = format!("{name}_bucket");
                    for (bound, cumulative) in buckets {
                        let le = format_bucket_bound(*bound);
                        render_sample_line(
                            &mut output,
                            &bucket_name,
                            &series.labels,
                            Some(&le),
                            *cumulative as f64,
                        );
                    }

                    render_sample_line(
                        &mut output,
                        &format!("{name}_sum"),
                        &series.labels,
                        None,
                        *sum,
                    );
                    render_sample_line(
                        &mut output,
                        &format!("{name}_count"),
                        &series.labels,
                        None,
                        *count as f64,
                    );
                }
            }
        }
    }

    output
}

fn render_sample_line(
    output: &mut String,
    name: &str,
    labels: &[(String, String)],
    le: Option<&str>,
    value: f64,
) {
    output.push_str(name);

    if !labels.is_empty() || le.is_some() {
        output.push('{');
        let extra = le.map(|bound| ("le", bound));
        let pairs = labels
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .chain(extra);
        for (index, (key, value)) in pairs.enumerate() {
            if index > 0 {
                output.push(',');
            }
            output.push_str(key);
            output.push_str("=\"");
            output.push_str(&escape_label_value(value));
            output.push('"');
        }
        output.push('}');
    }

    output.push(' ');
    output.push_str(&format_metric_value(value));
    output.push('\n');
}

pub fn format_metric_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn format_bucket_bound(value: f64) -> String {
    if value.is_infinite() {
        "+Inf".to_string()
    } else {
        value.to_string()
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

pub fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricsRegistry;

    #[test]
    fn encodes_counter_lines_with_help_and_type() {
        let registry = MetricsRegistry::new();
        let requests = registry
            .register_counter("requests_total", "Total requests", &["method", "status"])
            .unwrap();
        requests.inc(&["GET", "200"], 2.0).unwrap();
        requests.inc(&["POST", "500"], 1.0).unwrap();

        assert_eq!(
            registry.render_prometheus(),
            "# HELP requests_total Total requests\n\
             # TYPE requests_total counter\n\
             requests_total{method=\"GET\",status=\"200\"} 2\n\
             requests_total{method=\"POST\",status=\"500\"} 1\n"
        );
    }

    #[test]
    fn encodes_histogram_buckets_sum_and_count() {
        let registry = MetricsRegistry::new();
        let latency = registry
            .register_histogram("latency_seconds", "Latency", &["route"], &[0.1, 0.5, 1.0])
            .unwrap();
        for value in [0.0625, 0.25, 0.25, 2.0] {
            latency.observe(&["/"], value).unwrap();
        }

        let output = registry.render_prometheus();
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[2..],
            [
                "latency_seconds_bucket{route=\"/\",le=\"0.1\"} 1",
                "latency_seconds_bucket{route=\"/\",le=\"0.5\"} 3",
                "latency_seconds_bucket{route=\"/\",le=\"1\"} 3",
                "latency_seconds_bucket{route=\"/\",le=\"+Inf\"} 4",
                "latency_seconds_sum{route=\"/\"} 2.5625",
                "latency_seconds_count{route=\"/\"} 4",
            ]
        );
    }

    #[test]
    fn escapes_label_values_and_help() {
        let registry = MetricsRegistry::new();
        let gauge = registry
            .register_gauge("paths", "Line one\nback\\slash", &["path"])
            .unwrap();
        gauge.set(&["a\"b\\c\nd"], 1.5).unwrap();

        let output = registry.render_prometheus();
        assert!(output.contains("# HELP paths Line one\\nback\\\\slash\n"));
        assert!(output.contains("paths{path=\"a\\\"b\\\\c\\nd\"} 1.5\n"));
    }

    #[test]
    fn metrics_without_series_still_declare_type() {
        let registry = MetricsRegistry::new();
        registry.register_gauge("idle", "Idle gauge", &[]).unwrap();
        assert_eq!(
            registry.render_prometheus(),
            "# HELP idle Idle gauge\n# TYPE idle gauge\n"
        );
    }

    #[test]
    fn special_values_are_spelled_out() {
        assert_eq!(format_metric_value(f64::INFINITY), "+Inf");
        assert_eq!(format_metric_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_metric_value(f64::NAN), "NaN");
        assert_eq!(format_metric_value(-3.0), "-3");
        assert_eq!(format_metric_value(0.25), "0.25");
    }

    #[test]
    fn encoding_is_deterministic() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter("a_total", "A", &["k"]).unwrap();
        for key in ["x", "y", "z"] {
            counter.inc_one(&[key]).unwrap();
        }
        assert_eq!(registry.render_prometheus(), registry.render_prometheus());
    }
}
