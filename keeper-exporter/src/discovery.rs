//! Discovery pass: introspect every tracked table with bounded concurrency.
//!
//! Each table is described in its own task; at most `pool_size` describes
//! run at once. Tasks return their result instead of touching the registry.
//! Once every task has finished, results are applied in name order, so the
//! registry does not depend on task interleaving.
//!
//! Two tables can map to the same metric name (`taosd_x` and `taos_x` both
//! become `x`). The table published later falls back to a name built from
//! its raw table name; if that is taken too, the column is not exported.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ExporterError, Result};
use crate::introspect::{Introspector, special_table};
use crate::mapping::raw_metric_name;
use crate::model::Table;
use crate::registry::Registry;
use crate::store::StoreError;

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Registry entries published (special tables count once per group).
    pub published: usize,
    /// Tables that do not exist; evicted from the registry.
    pub missing: Vec<String>,
    /// Tables whose describe failed; previous entries are kept.
    pub failed: Vec<String>,
}

/// Introspect `names` and publish the results into `registry`.
///
/// Per-table failures are logged and reported. An unsupported column type
/// is returned as an error after all tasks have finished; the tables that
/// did build are still published.
pub async fn discover(
    introspector: Arc<Introspector>,
    registry: &Registry,
    names: &BTreeSet<String>,
    pool_size: usize,
) -> Result<DiscoveryReport> {
    let started = Instant::now();
    let mut report = DiscoveryReport::default();

    let prefix = introspector.prefix().to_string();
    let mut owners = registry.metric_owners();

    let semaphore = Arc::new(Semaphore::new(pool_size.max(1)));
    let mut tasks = JoinSet::new();

    for name in names {
        if let Some(special) = special_table(name) {
            for table in (special.build)(name, &prefix) {
                publish(registry, &mut owners, table, &prefix);
                report.published += 1;
            }
            debug!(table = %name, "Registered special table");
            continue;
        }

        let name = name.clone();
        let introspector = introspector.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            // The semaphore is never closed
            let _permit = semaphore.acquire_owned().await.ok();
            let result = introspector.introspect(&name).await;
            (name, result)
        });
    }

    let mut results: Vec<(String, Result<Table>)> = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => results.push(outcome),
            Err(e) => error!(error = %e, "Discovery task failed"),
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut fatal = None;
    for (name, result) in results {
        match result {
            Ok(table) => {
                publish(registry, &mut owners, table, &prefix);
                report.published += 1;
            }
            Err(ExporterError::Store(StoreError::NotFound { .. })) => {
                warn!(table = %name, "Table does not exist, skipping");
                let removed = registry.remove_source(&name);
                owners.retain(|_, owner| !removed.contains(owner));
                report.missing.push(name);
            }
            Err(ExporterError::Store(e)) => {
                warn!(table = %name, error = %e, "Could not describe table, skipping");
                report.failed.push(name);
            }
            Err(e) => {
                error!(table = %name, error = %e, "Table schema cannot be exported");
                report.failed.push(name);
                fatal.get_or_insert(e);
            }
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }

    info!(
        published = report.published,
        missing = report.missing.len(),
        failed = report.failed.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Discovery complete"
    );

    Ok(report)
}

/// Insert `table`, renaming or dropping metrics whose name another entry
/// already exports.
///
/// `owners` maps metric names to the entry exporting them and is kept in
/// step with the registry.
fn publish(
    registry: &Registry,
    owners: &mut HashMap<String, String>,
    mut table: Table,
    prefix: &str,
) {
    // Names this entry exported before are free for it to take again
    owners.retain(|_, owner| *owner != table.name);

    let mut taken: HashSet<String> = HashSet::new();
    for column in table.columns.clone() {
        let Some(fq_name) = table.metrics.get(&column).map(|m| m.fq_name.clone()) else {
            continue;
        };
        if !owners.contains_key(&fq_name) && !taken.contains(&fq_name) {
            taken.insert(fq_name);
            continue;
        }

        let fallback = raw_metric_name(prefix, &table.name, &column);
        if owners.contains_key(&fallback) || taken.contains(&fallback) {
            warn!(
                table = %table.name,
                column = %column,
                metric = %fq_name,
                "Metric name already exported by another table, column skipped"
            );
            table.remove_metric(&column);
        } else {
            warn!(
                table = %table.name,
                column = %column,
                metric = %fq_name,
                fallback = %fallback,
                "Metric name already exported by another table, using raw table name"
            );
            table.rename_metric(&column, fallback.clone());
            taken.insert(fallback);
        }
    }

    for metric in table.metrics.values() {
        owners.insert(metric.fq_name.clone(), table.name.clone());
    }
    registry.insert(table);
}
