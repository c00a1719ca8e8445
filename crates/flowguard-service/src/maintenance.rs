//! # Periodic Maintenance
//!
//! Sweeps expired cache entries and overdue approvals. Neither sweep is
//! required for correctness (both stores expire lazily on access); the
//! sweep bounds memory held by entries nobody reads again.
//!
//! [`Maintenance::run_once`] performs one pass. [`Maintenance::spawn`]
//! runs passes on a `tokio` interval until the returned handle is shut
//! down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowguard_approval::ApprovalWorkflow;
use flowguard_engine::EvaluationCache;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    /// Cache entries removed.
    pub expired_cache_entries: usize,
    /// Approval requests flipped to expired.
    pub expired_approvals: usize,
    /// When the pass ran.
    pub ran_at: DateTime<Utc>,
}

/// The periodic sweep over the cache and the approval store.
#[derive(Debug, Clone)]
pub struct Maintenance {
    cache: Arc<EvaluationCache>,
    approvals: Arc<ApprovalWorkflow>,
    interval: Duration,
}

impl Maintenance {
    /// Create a sweep running every `interval`.
    pub fn new(
        cache: Arc<EvaluationCache>,
        approvals: Arc<ApprovalWorkflow>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            approvals,
            interval,
        }
    }

    /// The configured period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One pass at the current time.
    pub fn run_once(&self) -> MaintenanceReport {
        self.run_once_at(Utc::now())
    }

    /// One pass as of `now`.
    pub fn run_once_at(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let report = MaintenanceReport {
            expired_cache_entries: self.cache.cleanup_expired_entries_at(now),
            expired_approvals: self.approvals.cleanup_expired_approvals_at(now),
            ran_at: now,
        };
        if report.expired_cache_entries > 0 || report.expired_approvals > 0 {
            tracing::info!(
                expired_cache_entries = report.expired_cache_entries,
                expired_approvals = report.expired_approvals,
                "maintenance pass"
            );
        }
        report
    }

    /// Run passes on a `tokio` interval. Must be called inside a runtime.
    pub fn spawn(self) -> MaintenanceHandle {
        let (shutdown, mut shutdown_rx) = broadcast::channel(1);
        let passes = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&passes);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_ms = self.interval.as_millis() as u64, "maintenance started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_once();
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::info!("maintenance stopped");
        });
        MaintenanceHandle {
            shutdown,
            passes,
            task,
        }
    }
}

/// Handle to a spawned maintenance task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: broadcast::Sender<()>,
    passes: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Passes completed so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Stop the task and wait for it. Returns the number of passes run.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "maintenance task ended abnormally");
        }
        self.passes.load(Ordering::Relaxed)
    }
}
