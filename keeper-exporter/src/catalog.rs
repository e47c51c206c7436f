//! Builds the set of tables to monitor.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::config::{ConfigError, MetricsConfig};
use crate::error::{ExporterError, Result};
use crate::store::StoreClient;

/// Configured table names plus every super table matching one of the
/// naming patterns.
///
/// Fails only when the catalog listing itself fails. Names are not checked
/// for existence here; missing tables are dropped during discovery.
pub async fn build_tracked_set(
    config: &MetricsConfig,
    store: &dyn StoreClient,
) -> Result<BTreeSet<String>> {
    let mut tracked: BTreeSet<String> = config.tables.iter().cloned().collect();

    let patterns = config
        .table_patterns
        .iter()
        .map(|p| glob::Pattern::new(p))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ExporterError::Config(ConfigError::Validation(e.to_string())))?;

    let stables = store
        .list_stables(&config.database)
        .await
        .map_err(|source| ExporterError::Catalog {
            database: config.database.clone(),
            source,
        })?;

    for name in stables {
        if patterns.iter().any(|p| p.matches(&name)) {
            tracked.insert(name);
        } else {
            debug!(table = %name, "Skipping table outside naming convention");
        }
    }

    info!(
        database = %config.database,
        tables = tracked.len(),
        "Built tracked table set"
    );

    Ok(tracked)
}
