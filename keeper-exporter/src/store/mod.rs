//! Access to the backing time-series database.
//!
//! The exporter only needs four capabilities from the database: describe a
//! table, run a query, execute a statement and list the super tables of a
//! database. [`StoreClient`] captures exactly that; [`RestStoreClient`]
//! talks to the database's REST endpoint and [`MemoryStore`] keeps
//! everything in memory for tests.

mod memory;
mod rest;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use rest::RestStoreClient;

/// Errors returned by a [`StoreClient`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The table does not exist.
    #[error("Table not found: {table}")]
    NotFound { table: String },

    /// The database rejected the statement.
    #[error("Database error {code:#x}: {message}")]
    Backend { code: i64, message: String },

    /// The request never got a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// A single dynamically typed cell of a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Whether this cell carries no value.
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Coerce the cell to a 64-bit float.
    ///
    /// Booleans map to `0`/`1`. Text and null cells have no numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Int(v) => Some(*v as f64),
            Cell::UInt(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Text(_) | Cell::Null => None,
        }
    }

    /// Convert a JSON value from a REST response into a cell.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Cell::Int(v)
                } else if let Some(v) = n.as_u64() {
                    Cell::UInt(v)
                } else {
                    Cell::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::UInt(v) => write!(f, "{}", v),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

/// Declared column type as reported by `DESCRIBE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Timestamp,
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    UTinyInt,
    USmallInt,
    UInt,
    UBigInt,
    Float,
    Double,
    Binary,
    VarChar,
    NChar,
    VarBinary,
    /// Any type the exporter has no mapping for (JSON, GEOMETRY, ...).
    Other(String),
}

impl FromStr for DataType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "VARCHAR(32)" and "varchar" both describe VARCHAR
        let base = s.split('(').next().unwrap_or(s).trim().to_ascii_uppercase();
        let parsed = match base.as_str() {
            "TIMESTAMP" => DataType::Timestamp,
            "BOOL" => DataType::Bool,
            "TINYINT" => DataType::TinyInt,
            "SMALLINT" => DataType::SmallInt,
            "INT" => DataType::Int,
            "BIGINT" => DataType::BigInt,
            "TINYINT UNSIGNED" => DataType::UTinyInt,
            "SMALLINT UNSIGNED" => DataType::USmallInt,
            "INT UNSIGNED" => DataType::UInt,
            "BIGINT UNSIGNED" => DataType::UBigInt,
            "FLOAT" => DataType::Float,
            "DOUBLE" => DataType::Double,
            "BINARY" => DataType::Binary,
            "VARCHAR" => DataType::VarChar,
            "NCHAR" => DataType::NChar,
            "VARBINARY" => DataType::VarBinary,
            _ => DataType::Other(base),
        };
        Ok(parsed)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Timestamp => "TIMESTAMP",
            DataType::Bool => "BOOL",
            DataType::TinyInt => "TINYINT",
            DataType::SmallInt => "SMALLINT",
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::UTinyInt => "TINYINT UNSIGNED",
            DataType::USmallInt => "SMALLINT UNSIGNED",
            DataType::UInt => "INT UNSIGNED",
            DataType::UBigInt => "BIGINT UNSIGNED",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Binary => "BINARY",
            DataType::VarChar => "VARCHAR",
            DataType::NChar => "NCHAR",
            DataType::VarBinary => "VARBINARY",
            DataType::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// One column of a described table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    /// Marked as a tag (dimension) column in the schema.
    pub is_tag: bool,
}

impl ColumnInfo {
    pub fn column(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_tag: false,
        }
    }

    pub fn tag(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_tag: true,
        }
    }
}

/// Result of a query: a header plus rows of cells in header order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl QueryResult {
    /// Position of a column in the header.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Capabilities the exporter needs from the database.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Describe a table's columns in schema order.
    ///
    /// Fails with [`StoreError::NotFound`] when the table does not exist.
    async fn describe_table(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, StoreError>;

    /// Run a query and return its rows.
    async fn query(&self, sql: &str) -> Result<QueryResult, StoreError>;

    /// Execute a statement, returning the number of affected rows.
    async fn exec(&self, sql: &str) -> Result<u64, StoreError>;

    /// List the names of all super tables in a database.
    async fn list_stables(&self, database: &str) -> Result<Vec<String>, StoreError>;
}

/// Shareable store handle.
pub type SharedStore = Arc<dyn StoreClient>;

/// Quote an identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
