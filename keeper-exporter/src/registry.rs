//! Shared registry of discovered tables.
//!
//! The registry maps table names to [`Table`] descriptors and iterates them
//! in name order, so every sampling pass and every scrape walks tables the
//! same way. Entries are built outside the lock and published with a single
//! insert; readers see either the old or the new entry.
//!
//! How sampled values become visible to scrapes depends on the
//! [`ConsistencyLevel`]:
//!
//! - `PerMetric`: each metric's vector is published as soon as its table is
//!   sampled. A scrape running during a pass may mix old and new values
//!   across metrics.
//! - `SnapshotPerPass`: the pass stages every vector and publishes them
//!   together behind a pass-wide gate that scrapes hold while reading.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::model::{Metric, Table, Value};

/// Visibility guarantee between a sampling pass and concurrent scrapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    #[default]
    PerMetric,
    SnapshotPerPass,
}

/// Name-ordered table registry.
#[derive(Debug, Default)]
pub struct Registry {
    tables: RwLock<BTreeMap<String, Arc<Table>>>,
    consistency: ConsistencyLevel,
    pass_gate: RwLock<()>,
}

impl Registry {
    pub fn new(consistency: ConsistencyLevel) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            consistency,
            pass_gate: RwLock::new(()),
        }
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    /// Publish a table, replacing any previous entry with the same name.
    ///
    /// Metrics whose name and kind are unchanged keep their cached values.
    pub fn insert(&self, mut table: Table) {
        let mut tables = self.tables.write();
        if let Some(previous) = tables.get(&table.name) {
            table.adopt_from(previous);
        }
        tables.insert(table.name.clone(), Arc::new(table));
    }

    /// Remove every entry read from the given physical table, returning the
    /// removed entry names.
    pub fn remove_source(&self, source: &str) -> Vec<String> {
        let mut tables = self.tables.write();
        let removed: Vec<String> = tables
            .values()
            .filter(|t| t.source == source)
            .map(|t| t.name.clone())
            .collect();
        for name in &removed {
            tables.remove(name);
        }
        removed
    }

    /// Exported metric names mapped to the entry that publishes them.
    pub fn metric_owners(&self) -> HashMap<String, String> {
        let tables = self.tables.read();
        let mut owners = HashMap::new();
        for table in tables.values() {
            for metric in table.metrics.values() {
                owners.insert(metric.fq_name.clone(), table.name.clone());
            }
        }
        owners
    }

    pub fn get(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.read().get(name).cloned()
    }

    /// Snapshot of all tables in iteration order.
    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.tables.read().values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    /// Start publishing the results of one sampling pass.
    pub fn pass_writer(&self) -> PassWriter<'_> {
        PassWriter {
            registry: self,
            staged: Vec::new(),
        }
    }

    /// Hold off snapshot commits while a scrape reads values.
    pub fn read_view(&self) -> ReadView<'_> {
        let gate = match self.consistency {
            ConsistencyLevel::PerMetric => None,
            ConsistencyLevel::SnapshotPerPass => Some(self.pass_gate.read()),
        };
        ReadView {
            registry: self,
            _gate: gate,
        }
    }
}

/// Publishes value vectors according to the registry's consistency level.
///
/// In snapshot mode nothing becomes visible until [`PassWriter::commit`].
pub struct PassWriter<'a> {
    registry: &'a Registry,
    staged: Vec<(Arc<Metric>, Vec<Value>)>,
}

impl PassWriter<'_> {
    pub fn publish(&mut self, metric: &Arc<Metric>, values: Vec<Value>) {
        match self.registry.consistency {
            ConsistencyLevel::PerMetric => metric.set_values(values),
            ConsistencyLevel::SnapshotPerPass => self.staged.push((metric.clone(), values)),
        }
    }

    /// Make every staged vector visible at once.
    pub fn commit(self) -> usize {
        let count = self.staged.len();
        if count > 0 {
            let _gate = self.registry.pass_gate.write();
            for (metric, values) in self.staged {
                metric.set_values(values);
            }
        }
        count
    }
}

/// A consistent view of the registry for one scrape.
pub struct ReadView<'a> {
    registry: &'a Registry,
    _gate: Option<RwLockReadGuard<'a, ()>>,
}

impl ReadView<'_> {
    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.registry.tables()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricKind, Scalar};

    fn table(name: &str, source: &str) -> Table {
        let mut t = Table::new(name);
        t.source = source.to_string();
        t.tag_names = vec!["host".to_string()];
        t.push_column(Metric::new(format!("taos_{}_cpu", name), "cpu", MetricKind::Gauge));
        t
    }

    fn reading(v: f64) -> Vec<Value> {
        vec![Value {
            labels: vec![("host".to_string(), "a".to_string())],
            value: Some(Scalar::Number(v)),
        }]
    }

    #[test]
    fn test_iteration_is_name_ordered() {
        let registry = Registry::default();
        for name in ["zeta", "alpha", "mid"] {
            registry.insert(table(name, name));
        }
        assert_eq!(registry.names(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_insert_replaces_and_keeps_values() {
        let registry = Registry::default();
        registry.insert(table("t1", "t1"));
        registry.get("t1").unwrap().metrics["cpu"].set_values(reading(1.0));

        registry.insert(table("t1", "t1"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("t1").unwrap().metrics["cpu"].values().len(), 1);
    }

    #[test]
    fn test_remove_source() {
        let registry = Registry::default();
        registry.insert(table("temp_dir", "log_dirs"));
        registry.insert(table("log_dirs", "log_dirs"));
        registry.insert(table("t1", "t1"));

        assert_eq!(registry.remove_source("log_dirs"), vec!["log_dirs", "temp_dir"]);
        assert_eq!(registry.names(), vec!["t1"]);
        assert!(registry.remove_source("gone").is_empty());
    }

    #[test]
    fn test_metric_owners() {
        let registry = Registry::default();
        registry.insert(table("t1", "t1"));
        registry.insert(table("t2", "t2"));

        let owners = registry.metric_owners();

        assert_eq!(owners.len(), 2);
        assert_eq!(owners["taos_t1_cpu"], "t1");
        assert_eq!(owners["taos_t2_cpu"], "t2");
    }

    #[test]
    fn test_per_metric_publishes_immediately() {
        let registry = Registry::new(ConsistencyLevel::PerMetric);
        registry.insert(table("t1", "t1"));
        let metric = registry.get("t1").unwrap().metrics["cpu"].clone();

        let mut writer = registry.pass_writer();
        writer.publish(&metric, reading(2.0));
        assert_eq!(metric.values().len(), 1);
        assert_eq!(writer.commit(), 0);
    }

    #[test]
    fn test_snapshot_publishes_on_commit() {
        let registry = Registry::new(ConsistencyLevel::SnapshotPerPass);
        registry.insert(table("t1", "t1"));
        let metric = registry.get("t1").unwrap().metrics["cpu"].clone();

        let mut writer = registry.pass_writer();
        writer.publish(&metric, reading(2.0));
        assert!(metric.values().is_empty());

        assert_eq!(writer.commit(), 1);
        assert_eq!(*metric.values(), reading(2.0));
    }

    #[test]
    fn test_snapshot_commit_waits_for_readers() {
        let registry = Arc::new(Registry::new(ConsistencyLevel::SnapshotPerPass));
        registry.insert(table("t1", "t1"));
        let metric = registry.get("t1").unwrap().metrics["cpu"].clone();

        let view = registry.read_view();
        let handle = {
            let registry = registry.clone();
            let metric = metric.clone();
            std::thread::spawn(move || {
                let mut writer = registry.pass_writer();
                writer.publish(&metric, reading(5.0));
                writer.commit();
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(metric.values().is_empty());
        assert_eq!(view.tables().len(), 1);
        drop(view);

        handle.join().unwrap();
        assert_eq!(*metric.values(), reading(5.0));
    }
}
