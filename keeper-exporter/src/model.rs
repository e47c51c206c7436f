//! Descriptors for discovered tables and their exported metrics.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Prometheus metric kind of an exported column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
    /// Label-carrying metric whose sample is fixed at 1.
    Info,
    /// Reserved; never emits samples.
    Summary,
}

impl MetricKind {
    /// Name used on the `# TYPE` line.
    ///
    /// Info metrics are rendered as gauges with a constant value, which is
    /// how the text format encodes them.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge | MetricKind::Info => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Summary => "summary",
        }
    }
}

/// A sampled cell after coercion to the metric's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

/// One sample of a metric: the tag labels of a row and its reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    /// Tag name and stringified tag value, in the table's tag order.
    pub labels: Vec<(String, String)>,
    /// `None` when the row had no usable reading.
    pub value: Option<Scalar>,
}

/// An exported column.
#[derive(Debug)]
pub struct Metric {
    pub fq_name: String,
    pub help: String,
    pub kind: MetricKind,
    /// Column the values are read from.
    pub column: String,
    pub const_labels: Vec<(String, String)>,
    last_value: RwLock<Arc<Vec<Value>>>,
}

impl Metric {
    pub fn new(fq_name: impl Into<String>, column: impl Into<String>, kind: MetricKind) -> Self {
        let column = column.into();
        Self {
            fq_name: fq_name.into(),
            help: format!("Latest value of column {}", column),
            kind,
            column,
            const_labels: Vec::new(),
            last_value: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Replace the cached value vector.
    pub fn set_values(&self, values: Vec<Value>) {
        *self.last_value.write() = Arc::new(values);
    }

    /// The most recently published value vector.
    pub fn values(&self) -> Arc<Vec<Value>> {
        self.last_value.read().clone()
    }
}

/// A discovered table (or one logical group of a special table).
#[derive(Debug, Clone)]
pub struct Table {
    /// Registry key.
    pub name: String,
    /// Physical table the rows are read from.
    pub source: String,
    pub tag_names: Vec<String>,
    /// Exported measurement columns in schema order.
    pub columns: Vec<String>,
    pub metrics: HashMap<String, Arc<Metric>>,
    /// Row predicate, appended as a `WHERE` clause when sampling.
    pub filter: Option<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            name,
            tag_names: Vec::new(),
            columns: Vec::new(),
            metrics: HashMap::new(),
            filter: None,
        }
    }

    /// Add a measurement column and its metric.
    pub fn push_column(&mut self, metric: Metric) {
        self.columns.push(metric.column.clone());
        self.metrics.insert(metric.column.clone(), Arc::new(metric));
    }

    /// Give the metric of `column` a different name. Its cache starts empty.
    pub fn rename_metric(&mut self, column: &str, fq_name: impl Into<String>) {
        let renamed = match self.metrics.get(column) {
            Some(old) => {
                let mut metric = Metric::new(fq_name, column, old.kind);
                metric.help = old.help.clone();
                metric.const_labels = old.const_labels.clone();
                metric
            }
            None => return,
        };
        self.metrics.insert(column.to_string(), Arc::new(renamed));
    }

    /// Stop exporting `column`.
    pub fn remove_metric(&mut self, column: &str) {
        self.columns.retain(|c| c != column);
        self.metrics.remove(column);
    }

    /// Metrics in column order.
    pub fn ordered_metrics(&self) -> impl Iterator<Item = &Arc<Metric>> {
        self.columns.iter().filter_map(|c| self.metrics.get(c))
    }

    /// Reuse metrics from a previous build of this table whose name and
    /// kind did not change, so their cached values survive rediscovery.
    pub fn adopt_from(&mut self, previous: &Table) {
        for (column, metric) in self.metrics.iter_mut() {
            if let Some(old) = previous.metrics.get(column)
                && old.fq_name == metric.fq_name
                && old.kind == metric.kind
            {
                *metric = old.clone();
            }
        }
    }
}
