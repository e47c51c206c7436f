//! Metric collector that turns cached table values into Prometheus metrics.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::trace;

use crate::mapping::sanitize_label_name;
use crate::model::{MetricKind, Scalar};
use crate::registry::Registry;

/// Static description of one exported metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
}

/// One exported sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Exporter statistics.
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    /// Completed sampling passes.
    pub sampling_passes: u64,
    /// Table queries that failed during sampling.
    pub sampling_failures: u64,
    /// Negative counter readings withheld from export.
    pub negative_counter_drops: u64,
    pub last_pass_duration: Duration,
}

/// Shared handle to the statistics.
pub type SharedStats = Arc<RwLock<ExporterStats>>;

/// Reads the registry on behalf of a scrape.
pub struct MetricCollector {
    registry: Arc<Registry>,
    stats: SharedStats,
    prefix: String,
}

impl MetricCollector {
    pub fn new(registry: Arc<Registry>, stats: SharedStats, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            stats,
            prefix: prefix.into(),
        }
    }

    /// Describe every registered metric, in registry order.
    pub fn describe(&self) -> Vec<MetricDescriptor> {
        let mut descriptors = Vec::new();
        for table in self.registry.tables() {
            let label_names: Vec<String> = table
                .tag_names
                .iter()
                .map(|t| sanitize_label_name(t))
                .collect();
            for metric in table.ordered_metrics() {
                let mut label_names = label_names.clone();
                if metric.kind == MetricKind::Info {
                    label_names.push("value".to_string());
                }
                label_names.extend(metric.const_labels.iter().map(|(k, _)| k.clone()));
                descriptors.push(MetricDescriptor {
                    name: metric.fq_name.clone(),
                    help: metric.help.clone(),
                    kind: metric.kind,
                    label_names,
                });
            }
        }
        descriptors
    }

    /// Collect a sample for every usable cached value.
    ///
    /// Null readings, negative counters and summary placeholders are
    /// skipped. Collecting does not touch the cache, so two calls without
    /// a sampling pass in between return the same samples.
    pub fn collect(&self) -> Vec<MetricSample> {
        let view = self.registry.read_view();
        let mut samples = Vec::new();

        for table in view.tables() {
            for metric in table.ordered_metrics() {
                for value in metric.values().iter() {
                    let mut labels: Vec<(String, String)> = value
                        .labels
                        .iter()
                        .map(|(k, v)| (sanitize_label_name(k), v.clone()))
                        .collect();
                    labels.extend(metric.const_labels.iter().cloned());

                    let reading = match (metric.kind, &value.value) {
                        (_, None) | (MetricKind::Summary, _) => continue,
                        (MetricKind::Counter, Some(Scalar::Number(n))) if *n < 0.0 => {
                            trace!(metric = %metric.fq_name, value = n, "Skipping negative counter");
                            continue;
                        }
                        (MetricKind::Gauge | MetricKind::Counter, Some(Scalar::Number(n))) => *n,
                        (MetricKind::Gauge | MetricKind::Counter, Some(Scalar::Text(_))) => continue,
                        (MetricKind::Info, Some(scalar)) => {
                            let text = match scalar {
                                Scalar::Text(s) => s.clone(),
                                Scalar::Number(n) => format_value(*n),
                            };
                            labels.retain(|(k, _)| k != "value");
                            labels.push(("value".to_string(), text));
                            1.0
                        }
                    };

                    samples.push(MetricSample {
                        name: metric.fq_name.clone(),
                        kind: metric.kind,
                        labels,
                        value: reading,
                    });
                }
            }
        }

        samples
    }

    /// Get exporter statistics.
    pub fn stats(&self) -> ExporterStats {
        self.stats.read().clone()
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        let samples = self.collect();
        let mut output = Vec::with_capacity(samples.len() * 100);

        // Group samples by name for TYPE comments, sorted for stable output
        let mut by_name: BTreeMap<&str, Vec<&MetricSample>> = BTreeMap::new();
        for sample in &samples {
            by_name.entry(&sample.name).or_default().push(sample);
        }

        for (name, series) in &by_name {
            writeln!(output, "# TYPE {} {}", name, series[0].kind.as_str()).ok();
            for sample in series {
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    format_labels(&sample.labels),
                    format_value(sample.value)
                )
                .ok();
            }
        }

        // Exporter statistics
        let stats = self.stats.read().clone();
        writeln!(output).ok();
        self.write_stat(&mut output, "exporter_tables", "gauge", self.registry.len() as f64);
        self.write_stat(
            &mut output,
            "exporter_sampling_passes_total",
            "counter",
            stats.sampling_passes as f64,
        );
        self.write_stat(
            &mut output,
            "exporter_sampling_failures_total",
            "counter",
            stats.sampling_failures as f64,
        );
        self.write_stat(
            &mut output,
            "exporter_negative_counter_drops_total",
            "counter",
            stats.negative_counter_drops as f64,
        );
        self.write_stat(
            &mut output,
            "exporter_last_pass_duration_seconds",
            "gauge",
            stats.last_pass_duration.as_secs_f64(),
        );

        String::from_utf8(output).unwrap_or_default()
    }

    fn write_stat(&self, output: &mut Vec<u8>, name: &str, kind: &str, value: f64) {
        let name = if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.prefix, name)
        };
        writeln!(output, "# TYPE {} {}", name, kind).ok();
        writeln!(output, "{} {}", name, format_value(value)).ok();
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
