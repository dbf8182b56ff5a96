//! Liveness for durable jobs.
//!
//! Every active scan job and processing download carries a heartbeat that
//! its worker refreshes every `heartbeat_interval_secs`. The sweep fails
//! any row whose heartbeat is older than `orphan_timeout_secs` with cause
//! `orphaned`, so a crashed worker never leaves a row non-terminal.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use game_vault_core::store::Store;

use crate::config::JobsConfig;

pub const ORPHANED: &str = "orphaned";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scans: Vec<String>,
    pub downloads: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.scans.is_empty() && self.downloads.is_empty()
    }
}

/// Fail every job whose heartbeat is older than `timeout` at `now`.
pub async fn sweep(store: &dyn Store, timeout: Duration, now: i64) -> anyhow::Result<SweepReport> {
    let cutoff = now - timeout.as_secs() as i64;
    let scans = store.fail_stale_scan_jobs(cutoff, ORPHANED, now).await?;
    let downloads = store.fail_stale_downloads(cutoff, ORPHANED, now).await?;

    for id in &scans {
        tracing::warn!(target: "reconcile", job_id = %id, "scan job orphaned");
    }
    for id in &downloads {
        tracing::warn!(target: "reconcile", request_id = %id, "download request orphaned");
    }
    Ok(SweepReport { scans, downloads })
}

/// Run [`sweep`] every `sweep_interval_secs` until `shutdown` fires.
pub fn spawn_sweeper(
    store: Arc<dyn Store>,
    jobs: &JobsConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let every = Duration::from_secs(jobs.sweep_interval_secs);
    let timeout = Duration::from_secs(jobs.orphan_timeout_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = sweep(store.as_ref(), timeout, now).await {
                        tracing::error!(target: "reconcile", error = %e, "reconciliation sweep failed");
                    }
                }
            }
        }
    })
}

/// Call `beat` every `every` until `stop` fires. The first beat happens
/// one interval after the call.
pub(crate) fn spawn_heartbeat<F, Fut>(every: Duration, stop: CancellationToken, beat: F)
where
    F: Fn(i64) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    match beat(chrono::Utc::now().timestamp()).await {
                        // Row left the active state: nothing to keep alive.
                        Ok(false) => break,
                        Ok(true) => {}
                        Err(e) => tracing::warn!(target: "reconcile", error = %e, "heartbeat update failed"),
                    }
                }
            }
        }
    });
}

/// Cancellation tokens of the jobs a tracker is running, by id.
pub(crate) type RunningJobs = Mutex<HashMap<String, CancellationToken>>;

/// Held by a worker for its whole run. Dropping it, on return or while a
/// panic unwinds, stops the heartbeat and forgets the job, so a crashed
/// worker leaves a row that goes stale for [`sweep`].
pub(crate) struct WorkerGuard<'a> {
    running: &'a RunningJobs,
    id: &'a str,
    heartbeat: CancellationToken,
}

impl<'a> WorkerGuard<'a> {
    pub(crate) fn new(running: &'a RunningJobs, id: &'a str, heartbeat: CancellationToken) -> Self {
        Self {
            running,
            id,
            heartbeat,
        }
    }
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        self.heartbeat.cancel();
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(self.id);
    }
}
