//! In-memory [`StoreClient`] used by tests and dry runs.
//!
//! Tables keep their schema and every inserted row. A latest-row query is
//! answered by returning, for each distinct tag combination, the last row
//! inserted for it, which is what the database's `last_row(...) GROUP BY`
//! query yields. Queries are routed by the table named after `FROM`; exact
//! SQL strings can also be scripted.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Cell, ColumnInfo, QueryResult, StoreClient, StoreError};

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Vec<ColumnInfo>,
    rows: Vec<Vec<Cell>>,
}

impl MemTable {
    fn header(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Last inserted row per distinct tag combination, in first-seen order.
    fn latest_rows(&self) -> Vec<Vec<Cell>> {
        let tag_idx: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_tag)
            .map(|(i, _)| i)
            .collect();

        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, Vec<Cell>> = HashMap::new();
        for row in &self.rows {
            let key = tag_idx
                .iter()
                .map(|&i| row.get(i).map(Cell::to_string).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\u{1f}");
            if !latest.contains_key(&key) {
                order.push(key.clone());
            }
            latest.insert(key, row.clone());
        }

        order
            .into_iter()
            .filter_map(|key| latest.remove(&key))
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemTable>,
    stables: Vec<String>,
    scripted: HashMap<String, Result<QueryResult, StoreError>>,
    failing: HashSet<String>,
    catalog_error: Option<StoreError>,
    statements: Vec<String>,
}

/// An in-memory database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a table. Super tables are listed by
    /// [`StoreClient::list_stables`].
    pub fn create_table(&self, name: &str, columns: Vec<ColumnInfo>, stable: bool) {
        let mut state = self.state.write();
        state.tables.insert(
            name.to_string(),
            MemTable {
                columns,
                rows: Vec::new(),
            },
        );
        if stable && !state.stables.iter().any(|s| s == name) {
            state.stables.push(name.to_string());
        }
    }

    /// Drop a table; later describes and queries report it as missing.
    pub fn drop_table(&self, name: &str) {
        let mut state = self.state.write();
        state.tables.remove(name);
        state.stables.retain(|s| s != name);
    }

    /// Append a row; cells are given in schema order.
    pub fn insert(&self, table: &str, row: Vec<Cell>) {
        if let Some(t) = self.state.write().tables.get_mut(table) {
            t.rows.push(row);
        }
    }

    /// Remove every row of a table, keeping its schema.
    pub fn truncate(&self, table: &str) {
        if let Some(t) = self.state.write().tables.get_mut(table) {
            t.rows.clear();
        }
    }

    /// Make describes and queries against `table` fail until cleared.
    pub fn set_failing(&self, table: &str, failing: bool) {
        let mut state = self.state.write();
        if failing {
            state.failing.insert(table.to_string());
        } else {
            state.failing.remove(table);
        }
    }

    /// Make the catalog listing fail.
    pub fn set_catalog_error(&self, error: Option<StoreError>) {
        self.state.write().catalog_error = error;
    }

    /// Answer an exact SQL string with a fixed result.
    pub fn script(&self, sql: impl Into<String>, result: Result<QueryResult, StoreError>) {
        self.state.write().scripted.insert(sql.into(), result);
    }

    /// Every statement received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state.read().statements.clone()
    }

    fn record(&self, sql: &str) {
        self.state.write().statements.push(sql.to_string());
    }

    fn unavailable(table: &str) -> StoreError {
        StoreError::Backend {
            code: -1,
            message: format!("table {} is unavailable", table),
        }
    }
}

/// Table named after `FROM`, with database qualifier and quotes removed.
fn table_from_sql(sql: &str) -> Option<String> {
    let upper = sql.to_ascii_uppercase();
    let start = upper.find(" FROM ")? + " FROM ".len();
    let target = sql[start..].split_whitespace().next()?;
    let table = target.rsplit('.').next()?;
    Some(table.trim_matches('`').to_string())
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn describe_table(
        &self,
        _database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, StoreError> {
        self.record(&format!("DESCRIBE {}", table));
        let state = self.state.read();
        if state.failing.contains(table) {
            return Err(Self::unavailable(table));
        }
        state
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| StoreError::NotFound {
                table: table.to_string(),
            })
    }

    async fn query(&self, sql: &str) -> Result<QueryResult, StoreError> {
        self.record(sql);
        let state = self.state.read();
        if let Some(result) = state.scripted.get(sql) {
            return result.clone();
        }

        let table = table_from_sql(sql).ok_or_else(|| StoreError::Backend {
            code: -1,
            message: format!("unsupported statement: {}", sql),
        })?;
        if state.failing.contains(&table) {
            return Err(Self::unavailable(&table));
        }
        let mem = state.tables.get(&table).ok_or(StoreError::NotFound { table })?;

        Ok(QueryResult {
            columns: mem.header(),
            rows: mem.latest_rows(),
        })
    }

    async fn exec(&self, sql: &str) -> Result<u64, StoreError> {
        self.record(sql);
        Ok(0)
    }

    async fn list_stables(&self, _database: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.read();
        if let Some(err) = &state.catalog_error {
            return Err(err.clone());
        }
        Ok(state.stables.clone())
    }
}
