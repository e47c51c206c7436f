//! Sampling pass: fetch the latest row per tag group for every table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::{EmptyResultPolicy, MetricsConfig};
use crate::mapping::{is_role_column, role_label};
use crate::model::{Metric, MetricKind, Scalar, Table, Value};
use crate::registry::Registry;
use crate::store::{Cell, QueryResult, SharedStore, quote_ident};

static NULL: Cell = Cell::Null;

/// Outcome of one sampling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassSummary {
    /// Tables whose rows were published.
    pub sampled: usize,
    /// Tables whose query failed.
    pub failed: usize,
    /// Tables whose query returned no rows.
    pub empty: usize,
    /// Negative readings of counter metrics.
    pub negative_counters: u64,
    pub duration: Duration,
}

/// Query selecting the latest value of every measurement column, one row
/// per distinct tag combination.
pub fn latest_row_sql(database: &str, table: &Table) -> String {
    let selected: Vec<String> = table
        .columns
        .iter()
        .chain(table.tag_names.iter().filter(|t| !table.columns.contains(t)))
        .map(|c| {
            let quoted = quote_ident(c);
            format!("last_row({}) as {}", quoted, quoted)
        })
        .collect();

    let mut sql = format!(
        "select {} from {}.{}",
        selected.join(", "),
        quote_ident(database),
        quote_ident(&table.source)
    );

    if let Some(filter) = &table.filter {
        sql.push_str(" where ");
        sql.push_str(filter);
    }

    if !table.tag_names.is_empty() {
        let group: Vec<String> = table.tag_names.iter().map(|t| quote_ident(t)).collect();
        sql.push_str(" group by ");
        sql.push_str(&group.join(","));
    }

    sql
}

/// Coerce a cell to the scalar a metric of `kind` carries.
pub fn coerce(kind: MetricKind, column: &str, cell: &Cell) -> Option<Scalar> {
    match (kind, cell) {
        (_, Cell::Null) => None,
        (MetricKind::Info, Cell::Int(_) | Cell::UInt(_) | Cell::Float(_)) if is_role_column(column) => {
            cell.as_f64().map(|code| Scalar::Text(role_label(code).to_string()))
        }
        (MetricKind::Info, cell) => Some(Scalar::Text(cell.to_string())),
        (MetricKind::Gauge | MetricKind::Counter | MetricKind::Summary, cell) => {
            cell.as_f64().map(Scalar::Number)
        }
    }
}

/// Turn a latest-row result into one value vector per metric.
///
/// Each row yields one [`Value`] per metric, labelled with the row's
/// non-null tag values.
pub fn rows_to_values(table: &Table, result: &QueryResult) -> Vec<(Arc<Metric>, Vec<Value>)> {
    let tag_idx: Vec<(&String, usize)> = table
        .tag_names
        .iter()
        .filter_map(|t| result.column_index(t).map(|i| (t, i)))
        .collect();

    let mut values: HashMap<&str, Vec<Value>> = HashMap::new();
    for row in &result.rows {
        let labels: Vec<(String, String)> = tag_idx
            .iter()
            .filter_map(|(tag, i)| match row.get(*i) {
                Some(cell) if !cell.is_null() => Some((tag.to_string(), cell.to_string())),
                _ => None,
            })
            .collect();

        for metric in table.ordered_metrics() {
            let cell = result
                .column_index(&metric.column)
                .and_then(|i| row.get(i))
                .unwrap_or(&NULL);
            let value = coerce(metric.kind, &metric.column, cell);
            trace!(metric = %metric.fq_name, ?value, "Sampled value");
            values.entry(metric.column.as_str()).or_default().push(Value {
                labels: labels.clone(),
                value,
            });
        }
    }

    table
        .ordered_metrics()
        .map(|m| (m.clone(), values.remove(m.column.as_str()).unwrap_or_default()))
        .collect()
}

/// Runs sampling passes against a registry.
pub struct Sampler {
    store: SharedStore,
    database: String,
    empty_result: EmptyResultPolicy,
}

impl Sampler {
    pub fn new(store: SharedStore, config: &MetricsConfig) -> Self {
        Self {
            store,
            database: config.database.clone(),
            empty_result: config.empty_result,
        }
    }

    /// Sample every table in registry order and publish the values.
    ///
    /// A failing query skips its table for this pass only.
    pub async fn run_pass(&self, registry: &Registry) -> PassSummary {
        let started = Instant::now();
        let mut summary = PassSummary::default();
        let mut writer = registry.pass_writer();

        for table in registry.tables() {
            if table.columns.is_empty() {
                continue;
            }

            let sql = latest_row_sql(&self.database, &table);
            debug!(table = %table.name, sql = %sql, "Sampling table");

            let result = match self.store.query(&sql).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(table = %table.name, error = %e, "Sampling query failed");
                    summary.failed += 1;
                    continue;
                }
            };

            if result.is_empty() {
                summary.empty += 1;
                match self.empty_result {
                    EmptyResultPolicy::Retain => {
                        debug!(table = %table.name, "No rows, keeping previous values");
                    }
                    EmptyResultPolicy::Clear => {
                        for metric in table.ordered_metrics() {
                            writer.publish(metric, Vec::new());
                        }
                    }
                }
                continue;
            }

            for (metric, values) in rows_to_values(&table, &result) {
                if metric.kind == MetricKind::Counter {
                    let negatives = count_negative(&values);
                    if negatives > 0 {
                        warn!(
                            metric = %metric.fq_name,
                            count = negatives,
                            "Negative counter values will not be exported"
                        );
                        summary.negative_counters += negatives;
                    }
                }
                writer.publish(&metric, values);
            }
            summary.sampled += 1;
        }

        writer.commit();
        summary.duration = started.elapsed();

        debug!(
            sampled = summary.sampled,
            failed = summary.failed,
            empty = summary.empty,
            elapsed_ms = summary.duration.as_millis() as u64,
            "Sampling pass complete"
        );

        summary
    }
}

fn count_negative(values: &[Value]) -> u64 {
    values
        .iter()
        .filter(|v| matches!(v.value, Some(Scalar::Number(n)) if n < 0.0))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{KindPolicy, build_table, special_table};
    use crate::registry::ConsistencyLevel;
    use crate::store::{ColumnInfo, DataType, MemoryStore};

    fn cpu_table() -> Table {
        let columns = vec![
            ColumnInfo::column("ts", DataType::Timestamp),
            ColumnInfo::column("cpu", DataType::Float),
            ColumnInfo::tag("host", DataType::VarChar),
        ];
        build_table("t1", &columns, "taos", &KindPolicy::default()).unwrap()
    }

    fn setup(config: &MetricsConfig) -> (Arc<MemoryStore>, Sampler, Registry) {
        let store = Arc::new(MemoryStore::new());
        store.create_table(
            "t1",
            vec![
                ColumnInfo::column("ts", DataType::Timestamp),
                ColumnInfo::column("cpu", DataType::Float),
                ColumnInfo::tag("host", DataType::VarChar),
            ],
            true,
        );
        let shared: SharedStore = store.clone();
        let sampler = Sampler::new(shared, config);
        let registry = Registry::new(config.consistency);
        registry.insert(cpu_table());
        (store, sampler, registry)
    }

    fn number(value: &Value) -> f64 {
        match value.value {
            Some(Scalar::Number(n)) => n,
            ref other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_latest_row_sql() {
        assert_eq!(
            latest_row_sql("log", &cpu_table()),
            "select last_row(`cpu`) as `cpu`, last_row(`host`) as `host` \
             from `log`.`t1` group by `host`"
        );
    }

    #[test]
    fn test_latest_row_sql_without_tags() {
        let mut table = cpu_table();
        table.tag_names.clear();
        assert_eq!(
            latest_row_sql("log", &table),
            "select last_row(`cpu`) as `cpu` from `log`.`t1`"
        );
    }

    #[test]
    fn test_latest_row_sql_with_filter() {
        let special = special_table("taosd_dnodes_log_dirs").unwrap();
        let groups = (special.build)("taosd_dnodes_log_dirs", "taos");
        let sql = latest_row_sql("log", &groups[0]);

        assert!(sql.contains("from `log`.`taosd_dnodes_log_dirs` where `log_dir_name` = '/tmp'"));
        assert!(sql.ends_with("group by `cluster_id`,`dnode_id`,`dnode_ep`,`log_dir_name`"));
        assert_eq!(sql.matches("as `log_dir_name`").count(), 1);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(
            coerce(MetricKind::Gauge, "cpu", &Cell::Int(3)),
            Some(Scalar::Number(3.0))
        );
        assert_eq!(
            coerce(MetricKind::Gauge, "up", &Cell::Bool(true)),
            Some(Scalar::Number(1.0))
        );
        assert_eq!(coerce(MetricKind::Counter, "n", &Cell::Null), None);
        assert_eq!(coerce(MetricKind::Gauge, "cpu", &"x".into()), None);
        assert_eq!(
            coerce(MetricKind::Info, "version", &"3.3.0".into()),
            Some(Scalar::Text("3.3.0".into()))
        );
    }

    #[test]
    fn test_coerce_role_codes() {
        assert_eq!(
            coerce(MetricKind::Info, "role", &Cell::Int(102)),
            Some(Scalar::Text("leader".into()))
        );
        assert_eq!(
            coerce(MetricKind::Info, "vnode_role", &Cell::Float(100.0)),
            Some(Scalar::Text("follower".into()))
        );
        assert_eq!(
            coerce(MetricKind::Info, "role", &Cell::Int(999)),
            Some(Scalar::Text("unknown".into()))
        );
        assert_eq!(
            coerce(MetricKind::Info, "role", &"leader".into()),
            Some(Scalar::Text("leader".into()))
        );
    }

    #[test]
    fn test_rows_to_values_one_value_per_tag_group() {
        let table = cpu_table();
        let result = QueryResult {
            columns: vec!["cpu".into(), "host".into()],
            rows: vec![
                vec![Cell::Float(1.5), "a".into()],
                vec![Cell::Float(2.0), "b".into()],
            ],
        };

        let values = rows_to_values(&table, &result);

        assert_eq!(values.len(), 1);
        let (metric, values) = &values[0];
        assert_eq!(metric.fq_name, "taos_t1_cpu");
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].labels, vec![("host".to_string(), "a".to_string())]);
        assert_eq!(number(&values[0]), 1.5);
        assert_eq!(values[1].labels, vec![("host".to_string(), "b".to_string())]);
        assert_eq!(number(&values[1]), 2.0);
    }

    #[test]
    fn test_rows_to_values_skips_null_tags() {
        let table = cpu_table();
        let result = QueryResult {
            columns: vec!["cpu".into(), "host".into()],
            rows: vec![vec![Cell::Null, Cell::Null]],
        };

        let values = rows_to_values(&table, &result);
        let (_, values) = &values[0];

        assert!(values[0].labels.is_empty());
        assert_eq!(values[0].value, None);
    }

    #[tokio::test]
    async fn test_pass_publishes_values() {
        let (store, sampler, registry) = setup(&MetricsConfig::default());
        store.insert("t1", vec![Cell::Int(1), Cell::Float(1.5), "a".into()]);
        store.insert("t1", vec![Cell::Int(1), Cell::Float(2.0), "b".into()]);

        let summary = sampler.run_pass(&registry).await;

        assert_eq!(summary.sampled, 1);
        let values = registry.get("t1").unwrap().metrics["cpu"].values();
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_result_retains_values() {
        let (store, sampler, registry) = setup(&MetricsConfig::default());
        store.insert("t1", vec![Cell::Int(1), Cell::Float(1.5), "a".into()]);
        sampler.run_pass(&registry).await;

        store.truncate("t1");
        let summary = sampler.run_pass(&registry).await;

        assert_eq!(summary.empty, 1);
        let values = registry.get("t1").unwrap().metrics["cpu"].values();
        assert_eq!(values.len(), 1);
        assert_eq!(number(&values[0]), 1.5);
    }

    #[tokio::test]
    async fn test_empty_result_clear_policy() {
        let config = MetricsConfig {
            empty_result: EmptyResultPolicy::Clear,
            ..Default::default()
        };
        let (store, sampler, registry) = setup(&config);
        store.insert("t1", vec![Cell::Int(1), Cell::Float(1.5), "a".into()]);
        sampler.run_pass(&registry).await;

        store.truncate("t1");
        sampler.run_pass(&registry).await;

        assert!(registry.get("t1").unwrap().metrics["cpu"].values().is_empty());
    }

    #[tokio::test]
    async fn test_failed_query_skips_table() {
        let (store, sampler, registry) = setup(&MetricsConfig::default());
        store.insert("t1", vec![Cell::Int(1), Cell::Float(1.5), "a".into()]);
        sampler.run_pass(&registry).await;

        store.set_failing("t1", true);
        let summary = sampler.run_pass(&registry).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(registry.get("t1").unwrap().metrics["cpu"].values().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_pass_publishes_all_values() {
        let config = MetricsConfig {
            consistency: ConsistencyLevel::SnapshotPerPass,
            ..Default::default()
        };
        let (store, sampler, registry) = setup(&config);
        store.insert("t1", vec![Cell::Int(1), Cell::Float(4.0), "a".into()]);

        sampler.run_pass(&registry).await;

        let values = registry.get("t1").unwrap().metrics["cpu"].values();
        assert_eq!(number(&values[0]), 4.0);
    }

    #[test]
    fn test_count_negative() {
        let values = vec![
            Value {
                labels: vec![],
                value: Some(Scalar::Number(-1.0)),
            },
            Value {
                labels: vec![],
                value: Some(Scalar::Number(2.0)),
            },
            Value {
                labels: vec![],
                value: None,
            },
        ];
        assert_eq!(count_negative(&values), 1);
    }
}
