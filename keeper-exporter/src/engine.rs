//! The discovery and export engine.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::info;

use crate::collector::{ExporterStats, MetricCollector, SharedStats};
use crate::config::MetricsConfig;
use crate::discovery::{DiscoveryReport, discover};
use crate::error::Result;
use crate::introspect::Introspector;
use crate::registry::Registry;
use crate::sampler::{PassSummary, Sampler};
use crate::store::SharedStore;

/// Owns the registry of one exporter instance.
///
/// Discovery and sampling passes are serialized: a scrape-triggered
/// refresh and a scheduled pass never interleave.
pub struct Engine {
    tracked: BTreeSet<String>,
    introspector: Arc<Introspector>,
    sampler: Sampler,
    registry: Arc<Registry>,
    stats: SharedStats,
    prefix: String,
    pool_size: usize,
    pass_lock: Mutex<()>,
    discovered: AtomicBool,
}

/// Shareable engine handle.
pub type SharedEngine = Arc<Engine>;

impl Engine {
    pub fn new(tracked: BTreeSet<String>, store: SharedStore, config: &MetricsConfig) -> Self {
        Self {
            tracked,
            introspector: Arc::new(Introspector::new(store.clone(), config)),
            sampler: Sampler::new(store, config),
            registry: Arc::new(Registry::new(config.consistency)),
            stats: SharedStats::default(),
            prefix: config.prefix.clone(),
            pool_size: config.pool_size,
            pass_lock: Mutex::new(()),
            discovered: AtomicBool::new(false),
        }
    }

    /// Introspect every tracked table and publish the descriptors.
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let _pass = self.pass_lock.lock().await;
        self.discover_locked().await
    }

    /// Run one sampling pass.
    pub async fn sample(&self) -> PassSummary {
        let _pass = self.pass_lock.lock().await;
        self.sample_locked().await
    }

    /// Refresh table metadata, then sample.
    pub async fn prepare(&self) -> Result<PassSummary> {
        let _pass = self.pass_lock.lock().await;
        self.discover_locked().await?;
        Ok(self.sample_locked().await)
    }

    async fn discover_locked(&self) -> Result<DiscoveryReport> {
        let report = discover(
            self.introspector.clone(),
            &self.registry,
            &self.tracked,
            self.pool_size,
        )
        .await?;

        if !self.discovered.swap(true, Ordering::AcqRel) {
            info!(
                tables = self.registry.len(),
                tracked = self.tracked.len(),
                "Initial discovery complete"
            );
        }
        Ok(report)
    }

    async fn sample_locked(&self) -> PassSummary {
        let summary = self.sampler.run_pass(&self.registry).await;

        let mut stats = self.stats.write();
        stats.sampling_passes += 1;
        stats.sampling_failures += summary.failed as u64;
        stats.negative_counter_drops += summary.negative_counters;
        stats.last_pass_duration = summary.duration;

        summary
    }

    /// Export adapter bound to this engine's registry.
    pub fn collector(&self) -> MetricCollector {
        MetricCollector::new(self.registry.clone(), self.stats.clone(), self.prefix.clone())
    }

    /// Whether the first discovery pass has completed.
    pub fn is_ready(&self) -> bool {
        self.discovered.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn stats(&self) -> ExporterStats {
        self.stats.read().clone()
    }
}
