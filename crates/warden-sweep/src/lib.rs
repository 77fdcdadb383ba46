//! Background cleanup for Warden's session indexes.
//!
//! Session records expire on their own inside the store, but the per-user
//! index that points at them has no TTL. The [`Sweeper`] periodically asks
//! the store for sessions whose refresh deadline has passed and reaps the
//! index entries whose record is gone, so index sets stay bounded.
//!
//! The sweeper is never needed for correctness: validation always loads the
//! record itself, and the manager prunes dead index members it reads.
//!
//! # Scheduling
//!
//! Runs are driven by a `tokio::time::interval` with
//! [`MissedTickBehavior::Skip`], so a slow store never causes a burst of
//! back-to-back runs. The first run is delayed by a random jitter so that
//! replicas started together do not sweep in lockstep.
//!
//! Every store call is bounded by [`SweepConfig::store_timeout`], and a
//! shutdown request abandons a run in progress, so a hung store can delay
//! neither the next interval nor process exit.
//!
//! ```ignore
//! let handle = Sweeper::new(store, SweepConfig::default()).spawn();
//! // ...
//! handle.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use warden_store::{SessionStore, StoreError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How often and how much the sweeper cleans per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Time between runs.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Review entries fetched per batch.
    pub batch_size: usize,
    /// Upper bound on batches per run.
    pub max_batches: usize,
    /// Random delay (0..max) before the first run.
    #[serde(with = "humantime_serde")]
    pub initial_jitter: Duration,
    /// Upper bound on each store call.
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            batch_size: 100,
            max_batches: 10,
            initial_jitter: Duration::from_secs(10),
            store_timeout: Duration::from_secs(3),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("sweep store call failed: {0}")]
    Store(#[from] StoreError),
    #[error("sweep store call {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
}

/// What a single run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due entries looked at.
    pub scanned: usize,
    /// Entries whose index membership was removed.
    pub reaped: usize,
    /// Batches fetched.
    pub batches: usize,
}

// ---------------------------------------------------------------------------
// Sweeper
// ---------------------------------------------------------------------------

pub struct Sweeper<S> {
    store: Arc<S>,
    config: SweepConfig,
}

impl<S: SessionStore> Sweeper<S> {
    pub fn new(store: Arc<S>, config: SweepConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Performs one cleanup run.
    ///
    /// Stops early when a batch comes back short or reaps nothing. An entry
    /// whose record is still present stays queued, so refetching it within
    /// the same run would only spin.
    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        let mut report = SweepReport::default();
        if self.config.batch_size == 0 {
            return Ok(report);
        }

        while report.batches < self.config.max_batches {
            let due = self
                .call("due_for_review", self.store.due_for_review(self.config.batch_size))
                .await?;
            if due.is_empty() {
                break;
            }
            report.batches += 1;
            report.scanned += due.len();

            let mut reaped = 0;
            for entry in &due {
                if self.call("reap", self.store.reap(entry)).await? {
                    debug!(
                        user_id = %entry.user_id,
                        session_id = %entry.session_id,
                        "reaped expired index entry"
                    );
                    reaped += 1;
                }
            }
            report.reaped += reaped;

            if due.len() < self.config.batch_size || reaped == 0 {
                break;
            }
        }

        Ok(report)
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, SweepError> {
        let after = self.config.store_timeout;
        match time::timeout(after, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SweepError::Timeout { op, after }),
        }
    }

    /// Runs the sweeper on its interval in a background task.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let jitter = jitter(self.config.initial_jitter);
            let mut ticker = time::interval_at(Instant::now() + jitter, self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                interval = ?self.config.interval,
                batch_size = self.config.batch_size,
                jitter = ?jitter,
                "session sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let result = tokio::select! {
                    result = self.run_once() => result,
                    _ = shutdown_rx.changed() => {
                        info!("shutdown requested; abandoning sweep in progress");
                        break;
                    }
                };
                match result {
                    Ok(report) if report.reaped > 0 => info!(
                        scanned = report.scanned,
                        reaped = report.reaped,
                        batches = report.batches,
                        "sweep finished"
                    ),
                    Ok(report) => debug!(scanned = report.scanned, "sweep found nothing to reap"),
                    Err(e) => warn!(error = %e, "sweep failed; retrying next interval"),
                }
            }

            info!("session sweeper stopped");
        });

        SweeperHandle { shutdown_tx, task }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Controls a spawned sweeper.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it. A run in progress is
    /// abandoned; reaping is idempotent, so the next run picks up where it
    /// left off.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "sweeper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
