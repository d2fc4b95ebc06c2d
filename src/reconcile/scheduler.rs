//! Periodic reconciliation driver
//!
//! Runs a pass at startup and then on every interval tick. Passes never
//! overlap: a trigger that arrives while a pass is in flight is dropped.

use super::pass::{run_pass, PassReport};
use crate::error::Result;
use crate::rules::RuleStore;
use crate::system::Platform;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default time between passes
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Totals over the lifetime of a reconciler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    /// Passes completed
    pub passes: u64,
    /// Triggers dropped because a pass was running
    pub skipped: u64,
    /// Passes aborted by an enumeration failure
    pub aborted: u64,
    /// Masks written across all passes
    pub applied: u64,
}

/// Skip-if-busy reconciliation driver
pub struct Reconciler {
    platform: Arc<dyn Platform>,
    store: Arc<RuleStore>,
    busy: AtomicBool,
    passes: AtomicU64,
    skipped: AtomicU64,
    aborted: AtomicU64,
    applied: AtomicU64,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(platform: Arc<dyn Platform>, store: Arc<RuleStore>) -> Arc<Self> {
        Arc::new(Self {
            platform,
            store,
            busy: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        })
    }

    fn acquire(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(&self.busy))
    }

    /// Whether a pass is running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run a pass unless one is already running.
    ///
    /// Returns `None` when the trigger was dropped.
    pub fn try_run_pass(&self) -> Option<Result<PassReport>> {
        let Some(_guard) = self.acquire() else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("reconciliation pass already running, trigger dropped");
            return None;
        };

        let result = run_pass(self.platform.as_ref(), &self.store);
        match &result {
            Ok(report) => {
                self.passes.fetch_add(1, Ordering::Relaxed);
                self.applied.fetch_add(report.applied as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.aborted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "reconciliation pass aborted, retrying next tick");
            }
        }
        Some(result)
    }

    /// Lifetime totals
    pub fn stats(&self) -> ReconcilerStats {
        ReconcilerStats {
            passes: self.passes.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
        }
    }

    /// Drive passes until `cancel` fires.
    ///
    /// The first tick completes immediately, so a pass runs at startup.
    /// Missed ticks are skipped. A pass in flight at cancellation is
    /// allowed to finish before this returns.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> ReconcilerStats {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(interval = ?interval, "reconciliation loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    // Not raced against cancellation: the pass always completes
                    if let Err(e) = tokio::task::spawn_blocking(move || this.try_run_pass()).await {
                        tracing::error!(error = %e, "reconciliation task panicked");
                    }
                }
            }
        }

        let stats = self.stats();
        tracing::info!(passes = stats.passes, skipped = stats.skipped, "reconciliation loop stopped");
        stats
    }
}
