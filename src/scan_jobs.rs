//! Durable, pollable scan jobs.
//!
//! [`ScanJobTracker::start`] creates a `Queued` row and returns it at once;
//! the scan itself runs on the worker pool. Each job moves
//! `Queued → Running → Completed | Failed` exactly once, and every terminal
//! failure is written to the row.
//!
//! A root has at most one active job. The rule is enforced by the store,
//! so two concurrent `start` calls cannot both win.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use game_vault_core::models::{Created, DuplicateTitle, ScanJob, ScanOutcome, ScanSummary};
use game_vault_core::store::Store;

use crate::error::{DuplicateReason, Result, VaultError};
use crate::metadata::MetadataResolver;
use crate::pool::WorkerPool;
use crate::reconcile::{spawn_heartbeat, RunningJobs, WorkerGuard, ORPHANED};
use crate::registrar::GameRegistrar;
use crate::scanner::{FolderScanner, ScanMode, ScanReport};

pub const CANCELLED: &str = "cancelled";

#[derive(Clone)]
pub struct ScanJobTracker {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    scanner: Arc<FolderScanner>,
    registrar: Arc<GameRegistrar>,
    resolver: Arc<dyn MetadataResolver>,
    pool: WorkerPool,
    heartbeat: Duration,
    shutdown: CancellationToken,
    running: RunningJobs,
}

impl ScanJobTracker {
    pub fn new(
        store: Arc<dyn Store>,
        scanner: Arc<FolderScanner>,
        registrar: Arc<GameRegistrar>,
        resolver: Arc<dyn MetadataResolver>,
        pool: WorkerPool,
        heartbeat: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                scanner,
                registrar,
                resolver,
                pool,
                heartbeat,
                shutdown,
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Queue a scan of `root` and return its job row.
    ///
    /// Fails with [`VaultError::ScanInFlight`] when `root` already has an
    /// active job and [`VaultError::Saturated`] when the pool is full.
    pub async fn start(&self, root: &str) -> Result<ScanJob> {
        let root = normalize_root(root).await?;
        let reservation = self.inner.pool.reserve()?;

        let now = chrono::Utc::now().timestamp();
        let job = match self.inner.store.create_scan_job(&root, now).await? {
            Created::Created(job) => job,
            Created::Conflict { existing_id } => {
                return Err(VaultError::ScanInFlight { root, existing_id });
            }
        };

        let token = self.inner.shutdown.child_token();
        self.inner
            .running
            .lock()
            .unwrap()
            .insert(job.id.clone(), token.clone());

        let done = CancellationToken::new();
        let store = self.inner.store.clone();
        let beat_id = job.id.clone();
        spawn_heartbeat(self.inner.heartbeat, done.clone(), move |now| {
            let store = store.clone();
            let id = beat_id.clone();
            async move { store.touch_scan_job(&id, now).await }
        });

        let inner = self.inner.clone();
        let job_id = job.id.clone();
        let job_root = job.root_path.clone();
        reservation.spawn(async move {
            let _guard = WorkerGuard::new(&inner.running, &job_id, done);
            inner.run(&job_id, &job_root, &token).await;
        });

        tracing::info!(target: "scan::jobs", job_id = %job.id, root = %job.root_path, "scan queued");
        Ok(job)
    }

    /// Classify `root` without writing anything.
    pub async fn preview(&self, root: &str) -> Result<ScanReport> {
        let root = normalize_root(root).await?;
        self.inner
            .scanner
            .scan(Path::new(&root), ScanMode::Preview, &CancellationToken::new())
            .await
    }

    pub async fn status(&self, id: &str) -> Result<ScanJob> {
        self.inner
            .store
            .get_scan_job(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("scan job {}", id)))
    }

    /// Most recent job for `root`.
    pub async fn latest_for_root(&self, root: &str) -> Result<ScanJob> {
        let root = normalize_root(root).await?;
        self.inner
            .store
            .latest_scan_job(&root)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("scan job for {}", root)))
    }

    pub async fn list(&self) -> Result<Vec<ScanJob>> {
        Ok(self.inner.store.list_scan_jobs().await?)
    }

    /// Whether any scan is queued or running.
    pub async fn any_active(&self) -> Result<bool> {
        Ok(self
            .inner
            .store
            .list_scan_jobs()
            .await?
            .iter()
            .any(|j| j.status.is_active()))
    }

    /// Delete a finished job.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let job = self.status(id).await?;
        if job.status.is_active() {
            return Err(VaultError::InvalidState(format!(
                "scan job {} is {}",
                id, job.status
            )));
        }
        if !self.inner.store.delete_scan_job(id).await? {
            return Err(VaultError::NotFound(format!("scan job {}", id)));
        }
        Ok(())
    }

    /// Delete every finished job.
    pub async fn clear(&self) -> Result<u64> {
        Ok(self.inner.store.clear_scan_jobs().await?)
    }

    /// Ask a queued or running job in this process to stop.
    pub fn cancel(&self, id: &str) -> bool {
        match self.inner.running.lock().unwrap().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Poll until the job reaches a terminal status. A job failed by the
    /// reconciliation sweep is reported as [`VaultError::OrphanedJob`].
    pub async fn wait(&self, id: &str, every: Duration) -> Result<ScanJob> {
        loop {
            let job = self.status(id).await?;
            if job.status.is_terminal() {
                if job.error_message.as_deref() == Some(ORPHANED) {
                    return Err(VaultError::OrphanedJob(job.id));
                }
                return Ok(job);
            }
            tokio::time::sleep(every).await;
        }
    }
}

impl Inner {
    async fn run(&self, id: &str, root: &str, token: &CancellationToken) {
        let now = chrono::Utc::now().timestamp();
        match self.store.mark_scan_running(id, now).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(target: "scan::jobs", job_id = %id, "job left the queue before it ran");
                return;
            }
            Err(e) => {
                tracing::error!(target: "scan::jobs", job_id = %id, error = %e, "could not mark job running");
                return;
            }
        }

        let outcome = match self.scan_and_register(root, token).await {
            Ok((summary, duplicates)) => {
                tracing::info!(
                    target: "scan::jobs",
                    job_id = %id,
                    root,
                    matched = summary.matched_count,
                    unmatched = summary.unmatched_count,
                    skipped = summary.skipped_count,
                    errors = summary.error_count,
                    "scan completed"
                );
                ScanOutcome::Completed {
                    summary,
                    duplicates,
                }
            }
            Err(VaultError::Cancelled) => {
                tracing::info!(target: "scan::jobs", job_id = %id, root, "scan cancelled");
                ScanOutcome::Failed {
                    message: CANCELLED.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(target: "scan::jobs", job_id = %id, root, error = %e, "scan failed");
                ScanOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        let now = chrono::Utc::now().timestamp();
        match self.store.finish_scan_job(id, &outcome, now).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(target: "scan::jobs", job_id = %id, "job was already terminal when the scan finished");
            }
            Err(e) => {
                tracing::error!(target: "scan::jobs", job_id = %id, error = %e, "could not record scan outcome");
            }
        }
    }

    async fn scan_and_register(
        &self,
        root: &str,
        token: &CancellationToken,
    ) -> Result<(ScanSummary, Vec<DuplicateTitle>)> {
        let report = self
            .scanner
            .scan(Path::new(root), ScanMode::Record, token)
            .await?;

        let mut summary = ScanSummary {
            matched_count: 0,
            ..report.summary
        };

        for m in &report.matches {
            if token.is_cancelled() {
                return Err(VaultError::Cancelled);
            }

            let record = match self.resolver.resolve(&m.title).await {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(target: "scan::jobs", title = %m.title, error = %e, "metadata lookup failed, registering without metadata");
                    None
                }
            };

            match self.registrar.register(m, record.as_ref()).await {
                Ok(_) => summary.matched_count += 1,
                // Registered by a concurrent writer since the scan looked.
                Err(VaultError::DuplicateGame {
                    reason: DuplicateReason::Path,
                    ..
                }) => summary.skipped_count += 1,
                Err(VaultError::DuplicateGame {
                    reason: DuplicateReason::ExternalId,
                    existing_id,
                }) => {
                    tracing::info!(target: "scan::jobs", path = %m.path, existing_id = %existing_id, "metadata already belongs to another game, leaving folder for manual resolution");
                    let now = chrono::Utc::now().timestamp();
                    match self.store.upsert_unmatched(&m.path, now).await {
                        Ok(_) => summary.unmatched_count += 1,
                        Err(e) => {
                            tracing::warn!(target: "scan::jobs", path = %m.path, error = %e, "failed to record unmatched folder");
                            summary.error_count += 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "scan::jobs", path = %m.path, error = %e, "registration failed");
                    summary.error_count += 1;
                }
            }
        }

        Ok((summary, report.duplicates))
    }
}

/// The key a root is tracked under: its canonical form when it exists,
/// the trimmed input otherwise (the job then fails on enumeration).
async fn normalize_root(root: &str) -> Result<String> {
    let trimmed = root.trim();
    if trimmed.is_empty() {
        return Err(VaultError::InvalidState(
            "root path must not be empty".to_string(),
        ));
    }
    match tokio::fs::canonicalize(trimmed).await {
        Ok(path) => Ok(path
            .to_str()
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string())),
        Err(_) => Ok(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use game_vault_core::models::{default_release_groups, ExternalRecord, GameFilter, ScanStatus};
    use game_vault_core::store::memory::InMemoryStore;
    use game_vault_core::{NameExtractor, PatternCatalog};

    use crate::config::LibraryConfig;

    /// Resolves every title to the same record, or fails on demand.
    struct FixedResolver {
        fail: bool,
    }

    #[async_trait]
    impl MetadataResolver for FixedResolver {
        async fn resolve(&self, title: &str) -> anyhow::Result<Option<ExternalRecord>> {
            if self.fail {
                anyhow::bail!("lookup service down");
            }
            Ok(Some(ExternalRecord {
                id: "ext-1".into(),
                title: title.into(),
                summary: None,
                url: None,
                release_year: None,
            }))
        }
    }

    fn tracker(
        store: Arc<dyn Store>,
        resolver: Arc<dyn MetadataResolver>,
        pool: WorkerPool,
        shutdown: CancellationToken,
    ) -> ScanJobTracker {
        let catalog = Arc::new(PatternCatalog::new(default_release_groups()).unwrap());
        let scanner = FolderScanner::new(
            Arc::new(NameExtractor::new(catalog)),
            store.clone(),
            &LibraryConfig::default(),
        )
        .unwrap();
        ScanJobTracker::new(
            store.clone(),
            Arc::new(scanner),
            Arc::new(GameRegistrar::new(store)),
            resolver,
            pool,
            Duration::from_secs(1),
            shutdown,
        )
    }

    fn library(names: &[&str]) -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        for name in names {
            std::fs::create_dir_all(tmp.path().join(name)).unwrap();
        }
        tmp
    }

    #[tokio::test]
    async fn shared_external_id_sends_second_folder_to_unmatched() {
        let tmp = library(&["Crysis.3-RELOADED", "Crysis.3.REPACK-FLT"]);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let tracker = tracker(
            store.clone(),
            Arc::new(FixedResolver { fail: false }),
            WorkerPool::new(2, 2),
            CancellationToken::new(),
        );

        let job = tracker.start(tmp.path().to_str().unwrap()).await.unwrap();
        let job = tracker.wait(&job.id, Duration::from_millis(20)).await.unwrap();
        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.summary.matched_count, 1);
        assert_eq!(job.summary.unmatched_count, 1);
        assert_eq!(job.duplicates.len(), 1);

        let games = store.list_games(&GameFilter::default()).await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].external_id.as_deref(), Some("ext-1"));
        assert_eq!(store.list_unmatched(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_registers_without_metadata() {
        let tmp = library(&["Doom.2016-CODEX"]);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let tracker = tracker(
            store.clone(),
            Arc::new(FixedResolver { fail: true }),
            WorkerPool::new(1, 1),
            CancellationToken::new(),
        );

        let job = tracker.start(tmp.path().to_str().unwrap()).await.unwrap();
        let job = tracker.wait(&job.id, Duration::from_millis(20)).await.unwrap();
        assert_eq!(job.summary.matched_count, 1);
        let games = store.list_games(&GameFilter::default()).await.unwrap();
        assert_eq!(games[0].canonical_title, "Doom 2016");
        assert!(games[0].external_id.is_none());
    }

    struct PanickingResolver;

    #[async_trait]
    impl MetadataResolver for PanickingResolver {
        async fn resolve(&self, _title: &str) -> anyhow::Result<Option<ExternalRecord>> {
            panic!("resolver crashed");
        }
    }

    #[tokio::test]
    async fn crashed_worker_is_reaped_by_sweep() {
        let tmp = library(&["Doom.2016-CODEX"]);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let tracker = tracker(
            store.clone(),
            Arc::new(PanickingResolver),
            WorkerPool::new(1, 1),
            CancellationToken::new(),
        );

        let job = tracker.start(tmp.path().to_str().unwrap()).await.unwrap();
        for _ in 0..100 {
            if tracker.inner.running.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(tracker.inner.running.lock().unwrap().is_empty());

        let crashed = tracker.status(&job.id).await.unwrap();
        assert_eq!(crashed.status, ScanStatus::Running);

        // Two heartbeat intervals pass without a beat.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let idle = tracker.status(&job.id).await.unwrap();
        assert_eq!(idle.heartbeat_at, crashed.heartbeat_at);

        let now = chrono::Utc::now().timestamp();
        let report = crate::reconcile::sweep(store.as_ref(), Duration::from_secs(1), now)
            .await
            .unwrap();
        assert_eq!(report.scans, vec![job.id.clone()]);

        let err = tracker
            .wait(&job.id, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::OrphanedJob(id) if id == job.id));
    }

    #[tokio::test]
    async fn saturated_pool_creates_no_row() {
        let tmp = library(&["Doom.2016-CODEX"]);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let pool = WorkerPool::new(1, 0);
        let _held = pool.reserve().unwrap();
        let tracker = tracker(
            store.clone(),
            Arc::new(crate::metadata::NoopResolver),
            pool,
            CancellationToken::new(),
        );

        let err = tracker.start(tmp.path().to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, VaultError::Saturated));
        assert!(store.list_scan_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_fails_job_as_cancelled() {
        let tmp = library(&["Doom.2016-CODEX"]);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let tracker = tracker(
            store.clone(),
            Arc::new(crate::metadata::NoopResolver),
            WorkerPool::new(1, 1),
            shutdown,
        );

        let job = tracker.start(tmp.path().to_str().unwrap()).await.unwrap();
        let job = tracker.wait(&job.id, Duration::from_millis(20)).await.unwrap();
        assert_eq!(job.status, ScanStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(CANCELLED));
        assert!(store.list_games(&GameFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_jobs_cannot_be_deleted() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let tracker = tracker(
            store.clone(),
            Arc::new(crate::metadata::NoopResolver),
            WorkerPool::new(1, 1),
            CancellationToken::new(),
        );
        let Created::Created(job) = store.create_scan_job("/mnt/x", 1).await.unwrap() else {
            panic!("conflict");
        };
        assert!(matches!(
            tracker.delete(&job.id).await,
            Err(VaultError::InvalidState(_))
        ));
        assert!(tracker.any_active().await.unwrap());
    }
}
