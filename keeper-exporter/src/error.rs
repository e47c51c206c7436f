//! Error types for the exporter library.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::{DataType, StoreError};

/// Errors that can stop the exporter.
///
/// Per-table failures during discovery and sampling are logged and never
/// surface here; only conditions that must end the process do.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The tracked table set could not be built.
    #[error("Failed to list monitored tables in {database}: {source}")]
    Catalog {
        database: String,
        #[source]
        source: StoreError,
    },

    /// A column type with no metric mapping.
    #[error("Unsupported column type {declared} for {table}.{column}")]
    UnsupportedColumnType {
        table: String,
        column: String,
        declared: DataType,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ExporterError>;
