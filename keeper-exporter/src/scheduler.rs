//! Timer loop running sampling passes on wall-clock aligned boundaries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::engine::SharedEngine;

/// Resolution of the timer that checks for a due pass.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// The first sampling boundary after `now`.
///
/// `now` is rounded to the nearest multiple of `interval` (halves round up);
/// a boundary that is not in the future moves on by one interval. With a
/// 15s interval passes land on :00, :15, :30 and :45.
pub fn next_boundary(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = i64::try_from(interval.as_nanos()).unwrap_or(i64::MAX).max(1);
    let now_ns = now.timestamp_nanos_opt().unwrap_or(0);

    let rounded = now_ns.saturating_add(step / 2).div_euclid(step) * step;
    let next = if rounded <= now_ns {
        rounded.saturating_add(step)
    } else {
        rounded
    };

    DateTime::from_timestamp_nanos(next)
}

/// Runs a sampling pass whenever the next boundary has passed.
pub struct Scheduler {
    engine: SharedEngine,
    interval: Duration,
    tick: Duration,
}

impl Scheduler {
    pub fn new(engine: SharedEngine, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            tick: DEFAULT_TICK,
        }
    }

    /// Use a different check resolution.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut next = next_boundary(Utc::now(), self.interval);
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            first_pass = %next,
            "Sampling scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if Utc::now() < next {
                        continue;
                    }
                    let summary = self.engine.sample().await;
                    next = next_boundary(Utc::now(), self.interval);
                    debug!(
                        sampled = summary.sampled,
                        failed = summary.failed,
                        next_pass = %next,
                        "Scheduled pass finished"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sampling scheduler stopped");
    }
}
