//! Prometheus exporter for time-series database monitoring tables.
//!
//! The exporter discovers the monitoring tables of a database, classifies
//! their columns into labels and samples, and serves the latest row of
//! every tag group over an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌───────────┐   ┌─────────────┐
//! │ Catalog  │──>│ Discovery │──>│ Registry │<──│  Sampler  │   │ HTTP Server │
//! │ (tables) │   │ (describe)│   │ (tables) │   │ (timer)   │   │ (/metrics)  │
//! └──────────┘   └───────────┘   └────┬─────┘   └───────────┘   └──────┬──────┘
//!                                     └──────────> Collector <─────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! keeper-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod catalog;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod http;
pub mod introspect;
pub mod mapping;
pub mod model;
pub mod registry;
pub mod sampler;
pub mod scheduler;
pub mod store;

pub use catalog::build_tracked_set;
pub use collector::MetricCollector;
pub use config::ExporterConfig;
pub use engine::{Engine, SharedEngine};
pub use error::ExporterError;
pub use http::HttpServer;
pub use registry::ConsistencyLevel;
pub use scheduler::Scheduler;
pub use store::{MemoryStore, RestStoreClient, StoreClient};
