//! Download packaging jobs.
//!
//! A request creates a `Processing` row (at most one per requester) and
//! builds the archive on the worker pool. The row always ends `Available`
//! with the artifact recorded, or `Error` with a cause. A worker that dies
//! stops its heartbeat and the reconciliation sweep fails the row.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use game_vault_core::models::{Artifact, Created, DownloadRequest, DownloadStatus};
use game_vault_core::store::Store;

use crate::config::DownloadsConfig;
use crate::error::{Result, VaultError};
use crate::packager;
use crate::pool::WorkerPool;
use crate::reconcile::{spawn_heartbeat, RunningJobs, WorkerGuard, ORPHANED};
use crate::registrar::remove_artifact;

pub const CANCELLED: &str = "cancelled";

#[derive(Clone)]
pub struct DownloadJobTracker {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    config: DownloadsConfig,
    pool: WorkerPool,
    heartbeat: Duration,
    shutdown: CancellationToken,
    running: RunningJobs,
}

impl DownloadJobTracker {
    pub fn new(
        store: Arc<dyn Store>,
        config: DownloadsConfig,
        pool: WorkerPool,
        heartbeat: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                pool,
                heartbeat,
                shutdown,
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Request an archive of `game_id` for `requester_id`.
    ///
    /// Fails with [`VaultError::DuplicateDownloadRequest`] when the
    /// requester already has a request in progress.
    pub async fn request(&self, requester_id: &str, game_id: &str) -> Result<DownloadRequest> {
        let requester_id = requester_id.trim();
        if requester_id.is_empty() {
            return Err(VaultError::InvalidState(
                "requester id must not be empty".to_string(),
            ));
        }
        let game = self
            .inner
            .store
            .get_game(game_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("game {}", game_id)))?;
        let reservation = self.inner.pool.reserve()?;

        let now = chrono::Utc::now().timestamp();
        let request = match self
            .inner
            .store
            .create_download(requester_id, &game.id, now)
            .await?
        {
            Created::Created(request) => request,
            Created::Conflict { existing_id } => {
                return Err(VaultError::DuplicateDownloadRequest {
                    requester_id: requester_id.to_string(),
                    existing_id,
                });
            }
        };

        let token = self.inner.shutdown.child_token();
        self.inner
            .running
            .lock()
            .unwrap()
            .insert(request.id.clone(), token.clone());

        let done = CancellationToken::new();
        let store = self.inner.store.clone();
        let beat_id = request.id.clone();
        spawn_heartbeat(self.inner.heartbeat, done.clone(), move |now| {
            let store = store.clone();
            let id = beat_id.clone();
            async move { store.touch_download(&id, now).await }
        });

        let inner = self.inner.clone();
        let request_id = request.id.clone();
        let source = PathBuf::from(&game.full_disk_path);
        reservation.spawn(async move {
            let _guard = WorkerGuard::new(&inner.running, &request_id, done);
            inner.build(&request_id, source, token).await;
        });

        tracing::info!(target: "download::jobs", request_id = %request.id, requester_id, game_id = %game.id, "download queued");
        Ok(request)
    }

    pub async fn status(&self, id: &str) -> Result<DownloadRequest> {
        self.inner
            .store
            .get_download(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("download request {}", id)))
    }

    /// Requests of one requester, or all of them, newest first.
    pub async fn list(&self, requester_id: Option<&str>) -> Result<Vec<DownloadRequest>> {
        Ok(self.inner.store.list_downloads(requester_id).await?)
    }

    /// The artifact of an `Available` request.
    pub async fn artifact(&self, id: &str) -> Result<(DownloadRequest, PathBuf)> {
        let request = self.status(id).await?;
        if request.status != DownloadStatus::Available {
            return Err(VaultError::InvalidState(format!(
                "download request {} is {}",
                id, request.status
            )));
        }
        let path = request
            .artifact_path
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| VaultError::NotFound(format!("artifact of {}", id)))?;
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(VaultError::NotFound(format!("artifact of {}", id)));
        }
        Ok((request, path))
    }

    /// Delete a request and its artifact. A build in progress is cancelled.
    pub async fn delete(&self, id: &str) -> Result<DownloadRequest> {
        self.cancel(id);
        let request = self
            .inner
            .store
            .delete_download(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("download request {}", id)))?;

        let path = request
            .artifact_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| packager::artifact_path(&self.inner.config.dir, id));
        remove_artifact(&path).await;
        Ok(request)
    }

    pub fn cancel(&self, id: &str) -> bool {
        match self.inner.running.lock().unwrap().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Poll until the request reaches a terminal status.
    pub async fn wait(&self, id: &str, every: Duration) -> Result<DownloadRequest> {
        loop {
            let request = self.status(id).await?;
            if request.status.is_terminal() {
                if request.error_cause.as_deref() == Some(ORPHANED) {
                    return Err(VaultError::OrphanedJob(request.id));
                }
                return Ok(request);
            }
            tokio::time::sleep(every).await;
        }
    }
}

impl Inner {
    async fn build(&self, id: &str, source: PathBuf, token: CancellationToken) {
        let dest = packager::artifact_path(&self.config.dir, id);
        let compression = self.config.compression;

        let worker_dest = dest.clone();
        let worker_token = token.clone();
        let result = tokio::task::spawn_blocking(move || {
            packager::build_archive(&source, &worker_dest, compression, &worker_token)
        })
        .await;

        let now = chrono::Utc::now().timestamp();
        let recorded = match result {
            Ok(Ok(report)) => {
                tracing::info!(
                    target: "download::jobs",
                    request_id = %id,
                    files = report.files,
                    skipped = report.skipped,
                    size = report.size,
                    "archive ready"
                );
                let artifact = Artifact {
                    path: report.path.display().to_string(),
                    size: report.size,
                    sha256: report.sha256,
                };
                let recorded = self.store.complete_download(id, &artifact, now).await;
                if !matches!(recorded, Ok(true)) {
                    // The row was failed or deleted meanwhile; drop the orphan file.
                    remove_artifact(&report.path).await;
                }
                recorded
            }
            Ok(Err(VaultError::Cancelled)) => {
                tracing::info!(target: "download::jobs", request_id = %id, "archive build cancelled");
                self.store.fail_download(id, CANCELLED, now).await
            }
            Ok(Err(e)) => {
                tracing::error!(target: "download::jobs", request_id = %id, error = %e, "archive build failed");
                self.store.fail_download(id, &e.to_string(), now).await
            }
            Err(join) => {
                tracing::error!(target: "download::jobs", request_id = %id, error = %join, "archive worker panicked");
                remove_partial(&dest).await;
                self.store
                    .fail_download(id, &format!("archive worker failed: {}", join), now)
                    .await
            }
        };

        match recorded {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(target: "download::jobs", request_id = %id, "request was no longer processing when the build finished");
            }
            Err(e) => {
                tracing::error!(target: "download::jobs", request_id = %id, error = %e, "could not record build outcome");
            }
        }
    }
}

async fn remove_partial(dest: &Path) {
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    remove_artifact(Path::new(&part)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_vault_core::models::InsertGame;
    use game_vault_core::store::memory::InMemoryStore;
    use game_vault_core::store::NewGame;

    async fn game(store: &dyn Store, path: &Path) -> String {
        let new = NewGame {
            external_id: None,
            full_disk_path: path.display().to_string(),
            canonical_title: "Doom 2016".into(),
            summary: None,
            url: None,
            release_year: None,
            size_bytes: 0,
        };
        match store.insert_game(&new, 1).await.unwrap() {
            InsertGame::Inserted(game) => game.id,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn tracker(
        store: Arc<dyn Store>,
        dir: &Path,
        shutdown: CancellationToken,
    ) -> DownloadJobTracker {
        DownloadJobTracker::new(
            store,
            DownloadsConfig {
                dir: dir.to_path_buf(),
                ..DownloadsConfig::default()
            },
            WorkerPool::new(1, 1),
            Duration::from_secs(1),
            shutdown,
        )
    }

    fn source(tmp: &tempfile::TempDir) -> PathBuf {
        let source = tmp.path().join("Doom.2016-CODEX");
        std::fs::create_dir_all(source.join("data")).unwrap();
        std::fs::write(source.join("data/pak0.bin"), vec![3u8; 2048]).unwrap();
        source
    }

    #[tokio::test]
    async fn delete_removes_artifact() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let game_id = game(store.as_ref(), &source(&tmp)).await;
        let tracker = tracker(store.clone(), &tmp.path().join("out"), CancellationToken::new());

        let request = tracker.request("alice", &game_id).await.unwrap();
        let request = tracker
            .wait(&request.id, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(request.status, DownloadStatus::Available);
        let (_, path) = tracker.artifact(&request.id).await.unwrap();
        assert!(path.exists());

        tracker.delete(&request.id).await.unwrap();
        assert!(!path.exists());
        assert!(matches!(
            tracker.status(&request.id).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_fails_request_as_cancelled() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let game_id = game(store.as_ref(), &source(&tmp)).await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let out = tmp.path().join("out");
        let tracker = tracker(store.clone(), &out, shutdown);

        let request = tracker.request("alice", &game_id).await.unwrap();
        let request = tracker
            .wait(&request.id, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(request.status, DownloadStatus::Error);
        assert_eq!(request.error_cause.as_deref(), Some(CANCELLED));
        assert!(matches!(
            tracker.artifact(&request.id).await,
            Err(VaultError::InvalidState(_))
        ));
        let leftovers = std::fs::read_dir(&out).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn blank_requester_and_unknown_game_are_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let tracker = tracker(store, tmp.path(), CancellationToken::new());

        assert!(matches!(
            tracker.request("  ", "g").await,
            Err(VaultError::InvalidState(_))
        ));
        assert!(matches!(
            tracker.request("alice", "missing").await,
            Err(VaultError::NotFound(_))
        ));
    }
}
