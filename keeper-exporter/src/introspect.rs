//! Schema introspection: turn a described table into a [`Table`].
//!
//! Each column is classified in this order:
//!
//! 1. Tag columns become labels.
//! 2. Timestamp columns are dropped.
//! 3. Everything else is exported, with its kind taken from the first rule
//!    that applies: the configured per-column override, the role-suffix
//!    rule, then the declared-type table in [`kind_for_type`].
//!
//! A declared type with no mapping is an [`ExporterError::UnsupportedColumnType`].

use std::collections::HashMap;

use tracing::debug;

use crate::config::{IntegerKind, MetricsConfig};
use crate::error::{ExporterError, Result};
use crate::mapping::{build_metric_name, is_role_column};
use crate::model::{Metric, MetricKind, Table};
use crate::store::{ColumnInfo, DataType, SharedStore};

/// Tables whose columns are registered as placeholders that never emit.
pub const SUMMARY_TABLES: &[&str] = &["taosadapter_restful_http_request_summary_milliseconds"];

/// How a single column is exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Tag,
    Timestamp,
    Measurement(MetricKind),
}

/// Kind assignment rules for measurement columns.
#[derive(Debug, Clone, Default)]
pub struct KindPolicy {
    pub integer_kind: IntegerKind,
    pub overrides: HashMap<String, MetricKind>,
}

impl KindPolicy {
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self {
            integer_kind: config.integer_kind,
            overrides: config.kind_overrides.clone(),
        }
    }

    /// Classify one column of `table`.
    pub fn classify(&self, table: &str, column: &ColumnInfo) -> Result<ColumnRole> {
        if column.is_tag {
            return Ok(ColumnRole::Tag);
        }
        if column.data_type == DataType::Timestamp {
            return Ok(ColumnRole::Timestamp);
        }
        if let Some(kind) = self.overrides.get(&column.name) {
            return Ok(ColumnRole::Measurement(*kind));
        }
        if is_role_column(&column.name) {
            return Ok(ColumnRole::Measurement(MetricKind::Info));
        }

        kind_for_type(&column.data_type, self.integer_kind)
            .map(ColumnRole::Measurement)
            .ok_or_else(|| ExporterError::UnsupportedColumnType {
                table: table.to_string(),
                column: column.name.clone(),
                declared: column.data_type.clone(),
            })
    }
}

/// Metric kind for a declared column type.
pub fn kind_for_type(data_type: &DataType, integer_kind: IntegerKind) -> Option<MetricKind> {
    match data_type {
        DataType::Bool | DataType::Float | DataType::Double => Some(MetricKind::Gauge),
        DataType::TinyInt
        | DataType::SmallInt
        | DataType::Int
        | DataType::BigInt
        | DataType::UTinyInt
        | DataType::USmallInt
        | DataType::UInt
        | DataType::UBigInt => Some(integer_kind.kind()),
        DataType::Binary | DataType::VarChar | DataType::NChar | DataType::VarBinary => {
            Some(MetricKind::Info)
        }
        DataType::Timestamp | DataType::Other(_) => None,
    }
}

/// Build the descriptor of a generic table from its described columns.
pub fn build_table(
    name: &str,
    columns: &[ColumnInfo],
    prefix: &str,
    policy: &KindPolicy,
) -> Result<Table> {
    let summary = SUMMARY_TABLES.contains(&name);
    let mut table = Table::new(name);

    for column in columns {
        // Summary columns are placeholders and are never classified by type
        let role = if summary && !column.is_tag && column.data_type != DataType::Timestamp {
            ColumnRole::Measurement(MetricKind::Summary)
        } else {
            policy.classify(name, column)?
        };

        match role {
            ColumnRole::Tag => table.tag_names.push(column.name.clone()),
            ColumnRole::Timestamp => {}
            ColumnRole::Measurement(kind) => {
                let fq_name = build_metric_name(prefix, name, &column.name);
                table.push_column(Metric::new(fq_name, column.name.clone(), kind));
            }
        }
    }

    // A column listed both as tag and measurement is only a tag
    let tags = table.tag_names.clone();
    table.columns.retain(|c| !tags.contains(c));
    table.metrics.retain(|c, _| !tags.contains(c));

    Ok(table)
}

/// A table that expands into hand-built logical groups instead of being
/// described.
pub struct SpecialTable {
    pub matches: fn(&str) -> bool,
    pub build: fn(source: &str, prefix: &str) -> Vec<Table>,
}

/// Special tables, consulted before generic introspection.
pub const SPECIAL_TABLES: &[SpecialTable] = &[SpecialTable {
    matches: is_log_dirs_table,
    build: log_dir_groups,
}];

fn is_log_dirs_table(name: &str) -> bool {
    name == "taosd_dnodes_log_dirs"
}

/// The special-table entry handling `name`, if any.
pub fn special_table(name: &str) -> Option<&'static SpecialTable> {
    SPECIAL_TABLES.iter().find(|s| (s.matches)(name))
}

/// Split the per-dnode log directory table into the temp directory and the
/// log directories.
///
/// Each group also exports `{group}_name`, an info metric carrying the
/// directory name read from the `log_dir_name` tag.
fn log_dir_groups(source: &str, prefix: &str) -> Vec<Table> {
    const TAGS: &[&str] = &["cluster_id", "dnode_id", "dnode_ep", "log_dir_name"];
    const COLUMNS: &[&str] = &["avail", "used", "total"];
    let groups = [
        ("temp_dir", "`log_dir_name` = '/tmp'"),
        ("log_dirs", "`log_dir_name` <> '/tmp'"),
    ];

    groups
        .into_iter()
        .map(|(group, filter)| {
            let mut table = Table::new(group);
            table.source = source.to_string();
            table.filter = Some(filter.to_string());
            table.tag_names = TAGS.iter().map(|t| t.to_string()).collect();
            for column in COLUMNS {
                let fq_name = build_metric_name(prefix, group, column);
                table.push_column(Metric::new(fq_name, *column, MetricKind::Gauge));
            }
            let fq_name = build_metric_name(prefix, group, "name");
            table.push_column(Metric::new(fq_name, "log_dir_name", MetricKind::Info));
            table
        })
        .collect()
}

/// Describes tables through a store and builds their descriptors.
pub struct Introspector {
    store: SharedStore,
    database: String,
    prefix: String,
    policy: KindPolicy,
}

impl Introspector {
    pub fn new(store: SharedStore, config: &MetricsConfig) -> Self {
        Self {
            store,
            database: config.database.clone(),
            prefix: config.prefix.clone(),
            policy: KindPolicy::from_config(config),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Describe `name` and build its descriptor.
    ///
    /// Store failures come back as [`ExporterError::Store`]; the caller
    /// decides whether they are fatal.
    pub async fn introspect(&self, name: &str) -> Result<Table> {
        let columns = self.store.describe_table(&self.database, name).await?;
        let table = build_table(name, &columns, &self.prefix, &self.policy)?;
        debug!(
            table = %name,
            tags = table.tag_names.len(),
            columns = table.columns.len(),
            "Introspected table"
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> KindPolicy {
        KindPolicy::default()
    }

    fn classify(column: ColumnInfo) -> ColumnRole {
        policy().classify("t", &column).unwrap()
    }

    #[test]
    fn test_floats_and_bools_are_gauges() {
        for ty in [DataType::Bool, DataType::Float, DataType::Double] {
            assert_eq!(
                classify(ColumnInfo::column("x", ty)),
                ColumnRole::Measurement(MetricKind::Gauge)
            );
        }
    }

    #[test]
    fn test_strings_are_info() {
        for ty in [
            DataType::Binary,
            DataType::VarChar,
            DataType::NChar,
            DataType::VarBinary,
        ] {
            assert_eq!(
                classify(ColumnInfo::column("x", ty)),
                ColumnRole::Measurement(MetricKind::Info)
            );
        }
    }

    #[test]
    fn test_integer_kind_follows_policy() {
        let integers = [
            DataType::TinyInt,
            DataType::SmallInt,
            DataType::Int,
            DataType::BigInt,
            DataType::UTinyInt,
            DataType::USmallInt,
            DataType::UInt,
            DataType::UBigInt,
        ];
        for ty in &integers {
            assert_eq!(
                kind_for_type(ty, IntegerKind::Counter),
                Some(MetricKind::Counter)
            );
            assert_eq!(
                kind_for_type(ty, IntegerKind::Gauge),
                Some(MetricKind::Gauge)
            );
        }
    }

    #[test]
    fn test_role_suffix_is_info_regardless_of_type() {
        for ty in [DataType::Int, DataType::Double, DataType::TinyInt] {
            assert_eq!(
                classify(ColumnInfo::column("vnode_role", ty)),
                ColumnRole::Measurement(MetricKind::Info)
            );
        }
    }

    #[test]
    fn test_override_wins() {
        let mut policy = policy();
        policy
            .overrides
            .insert("dnodes_alive".to_string(), MetricKind::Gauge);
        policy.overrides.insert("role".to_string(), MetricKind::Gauge);

        let alive = ColumnInfo::column("dnodes_alive", DataType::Int);
        let role = ColumnInfo::column("role", DataType::Int);
        assert_eq!(
            policy.classify("t", &alive).unwrap(),
            ColumnRole::Measurement(MetricKind::Gauge)
        );
        assert_eq!(
            policy.classify("t", &role).unwrap(),
            ColumnRole::Measurement(MetricKind::Gauge)
        );
    }

    #[test]
    fn test_tags_and_timestamps() {
        assert_eq!(
            classify(ColumnInfo::tag("host", DataType::Int)),
            ColumnRole::Tag
        );
        assert_eq!(
            classify(ColumnInfo::column("ts", DataType::Timestamp)),
            ColumnRole::Timestamp
        );
    }

    #[test]
    fn test_unsupported_type_is_an_error() {
        let err = policy()
            .classify("t", &ColumnInfo::column("doc", DataType::Other("JSON".into())))
            .unwrap_err();
        assert!(matches!(
            err,
            ExporterError::UnsupportedColumnType { ref column, .. } if column == "doc"
        ));
    }

    #[test]
    fn test_build_table() {
        let columns = vec![
            ColumnInfo::column("ts", DataType::Timestamp),
            ColumnInfo::column("cpu", DataType::Float),
            ColumnInfo::column("errors", DataType::BigInt),
            ColumnInfo::tag("host", DataType::VarChar),
        ];
        let table = build_table("t1", &columns, "taos", &policy()).unwrap();

        assert_eq!(table.name, "t1");
        assert_eq!(table.source, "t1");
        assert_eq!(table.tag_names, vec!["host"]);
        assert_eq!(table.columns, vec!["cpu", "errors"]);
        assert_eq!(table.metrics["cpu"].fq_name, "taos_t1_cpu");
        assert_eq!(table.metrics["cpu"].kind, MetricKind::Gauge);
        assert_eq!(table.metrics["errors"].kind, MetricKind::Counter);
        assert!(table.filter.is_none());
    }

    #[test]
    fn test_build_summary_table() {
        let columns = vec![
            ColumnInfo::column("ts", DataType::Timestamp),
            ColumnInfo::column("count", DataType::BigInt),
            ColumnInfo::tag("endpoint", DataType::VarChar),
        ];
        let table = build_table(SUMMARY_TABLES[0], &columns, "taos", &policy()).unwrap();

        assert_eq!(table.metrics["count"].kind, MetricKind::Summary);
        assert_eq!(table.tag_names, vec!["endpoint"]);
        assert_eq!(table.columns, vec!["count"]);
    }

    #[test]
    fn test_summary_table_accepts_any_column_type() {
        let columns = vec![
            ColumnInfo::column("ts", DataType::Timestamp),
            ColumnInfo::column("quantiles", DataType::Other("JSON".to_string())),
            ColumnInfo::column("role", DataType::Int),
            ColumnInfo::tag("endpoint", DataType::VarChar),
        ];
        let table = build_table(SUMMARY_TABLES[0], &columns, "taos", &policy()).unwrap();

        assert_eq!(table.columns, vec!["quantiles", "role"]);
        assert!(table.ordered_metrics().all(|m| m.kind == MetricKind::Summary));
    }

    #[test]
    fn test_log_dirs_special_table() {
        let special = special_table("taosd_dnodes_log_dirs").unwrap();
        let groups = (special.build)("taosd_dnodes_log_dirs", "taos");

        let names: Vec<_> = groups.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["temp_dir", "log_dirs"]);
        for group in &groups {
            assert_eq!(group.source, "taosd_dnodes_log_dirs");
            assert_eq!(
                group.tag_names,
                vec!["cluster_id", "dnode_id", "dnode_ep", "log_dir_name"]
            );
            assert_eq!(group.columns, vec!["avail", "used", "total", "log_dir_name"]);
            assert_eq!(group.metrics["log_dir_name"].kind, MetricKind::Info);
            assert!(group.filter.is_some());
        }
        assert_eq!(groups[0].metrics["avail"].fq_name, "taos_temp_dir_avail");
        assert_eq!(groups[1].metrics["total"].fq_name, "taos_log_dirs_total");
        assert_eq!(groups[0].metrics["log_dir_name"].fq_name, "taos_temp_dir_name");
        assert_eq!(groups[1].metrics["log_dir_name"].fq_name, "taos_log_dirs_name");

        assert!(special_table("taosd_dnodes_info").is_none());
    }
}
