//! In-memory [`Store`] implementation for tests and embedders.
//!
//! All tables live behind one `std::sync::RwLock`, so every operation,
//! including the uniqueness checks, is atomic with respect to the others.
//! Nothing survives the process.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Artifact, Created, DownloadRequest, DownloadStatus, Game, GameFilter, GameSort, InsertGame,
    LibraryStats, ReleaseGroupPattern, ScanJob, ScanOutcome, ScanStatus, ScanSummary,
    UnmatchedFolder, UnmatchedStatus,
};

use super::{NewGame, Store};

#[derive(Default)]
struct State {
    release_groups: Vec<ReleaseGroupPattern>,
    release_groups_seeded: bool,
    games: HashMap<String, Game>,
    unmatched: HashMap<String, UnmatchedFolder>,
    scan_jobs: HashMap<String, ScanJob>,
    downloads: HashMap<String, DownloadRequest>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn sort_games(games: &mut [Game], sort: GameSort) {
    match sort {
        GameSort::Title => games.sort_by(|a, b| {
            a.canonical_title
                .to_lowercase()
                .cmp(&b.canonical_title.to_lowercase())
                .then_with(|| a.full_disk_path.cmp(&b.full_disk_path))
        }),
        GameSort::Newest => games.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.full_disk_path.cmp(&b.full_disk_path))
        }),
        GameSort::Largest => games.sort_by(|a, b| {
            b.size_bytes
                .cmp(&a.size_bytes)
                .then_with(|| a.full_disk_path.cmp(&b.full_disk_path))
        }),
    }
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> (i64, &str),
{
    items.sort_by(|a, b| {
        let (ta, ia) = key(a);
        let (tb, ib) = key(b);
        tb.cmp(&ta).then_with(|| ib.cmp(ia))
    });
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_release_groups(&self) -> Result<Vec<ReleaseGroupPattern>> {
        Ok(self.state.read().unwrap().release_groups.clone())
    }

    async fn add_release_group(&self, pattern: &ReleaseGroupPattern) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        if state.release_groups.iter().any(|g| g.tag == pattern.tag) {
            return Ok(false);
        }
        state.release_groups.push(pattern.clone());
        Ok(true)
    }

    async fn remove_release_group(&self, tag: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        let before = state.release_groups.len();
        state.release_groups.retain(|g| g.tag != tag);
        Ok(state.release_groups.len() != before)
    }

    async fn release_groups_seeded(&self) -> Result<bool> {
        Ok(self.state.read().unwrap().release_groups_seeded)
    }

    async fn mark_release_groups_seeded(&self) -> Result<()> {
        self.state.write().unwrap().release_groups_seeded = true;
        Ok(())
    }

    async fn insert_game(&self, game: &NewGame, now: i64) -> Result<InsertGame> {
        let mut state = self.state.write().unwrap();

        if let Some(existing) = state
            .games
            .values()
            .find(|g| g.full_disk_path == game.full_disk_path)
        {
            return Ok(InsertGame::DuplicatePath {
                existing_id: existing.id.clone(),
            });
        }
        if let Some(external_id) = &game.external_id {
            if let Some(existing) = state
                .games
                .values()
                .find(|g| g.external_id.as_ref() == Some(external_id))
            {
                return Ok(InsertGame::DuplicateExternalId {
                    existing_id: existing.id.clone(),
                });
            }
        }

        let row = Game {
            id: Uuid::new_v4().to_string(),
            external_id: game.external_id.clone(),
            full_disk_path: game.full_disk_path.clone(),
            canonical_title: game.canonical_title.clone(),
            summary: game.summary.clone(),
            url: game.url.clone(),
            release_year: game.release_year,
            size_bytes: game.size_bytes,
            created_at: now,
        };
        state.games.insert(row.id.clone(), row.clone());
        Ok(InsertGame::Inserted(row))
    }

    async fn get_game(&self, id: &str) -> Result<Option<Game>> {
        Ok(self.state.read().unwrap().games.get(id).cloned())
    }

    async fn find_game_by_path(&self, path: &str) -> Result<Option<Game>> {
        let state = self.state.read().unwrap();
        Ok(state
            .games
            .values()
            .find(|g| g.full_disk_path == path)
            .cloned())
    }

    async fn find_game_by_external_id(&self, external_id: &str) -> Result<Option<Game>> {
        let state = self.state.read().unwrap();
        Ok(state
            .games
            .values()
            .find(|g| g.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn list_games(&self, filter: &GameFilter) -> Result<Vec<Game>> {
        let state = self.state.read().unwrap();
        let mut games: Vec<Game> = state
            .games
            .values()
            .filter(|g| filter.matches(g))
            .cloned()
            .collect();
        sort_games(&mut games, filter.sort);

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(games.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete_game(&self, id: &str) -> Result<Option<Vec<DownloadRequest>>> {
        let mut state = self.state.write().unwrap();
        if state.games.remove(id).is_none() {
            return Ok(None);
        }
        let removed: Vec<DownloadRequest> = state
            .downloads
            .values()
            .filter(|d| d.game_id == id)
            .cloned()
            .collect();
        state.downloads.retain(|_, d| d.game_id != id);
        Ok(Some(removed))
    }

    async fn upsert_unmatched(&self, path: &str, now: i64) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        if state.unmatched.contains_key(path) {
            return Ok(false);
        }
        state.unmatched.insert(
            path.to_string(),
            UnmatchedFolder {
                path: path.to_string(),
                first_seen_at: now,
                status: UnmatchedStatus::Pending,
            },
        );
        Ok(true)
    }

    async fn get_unmatched(&self, path: &str) -> Result<Option<UnmatchedFolder>> {
        Ok(self.state.read().unwrap().unmatched.get(path).cloned())
    }

    async fn list_unmatched(&self, status: Option<UnmatchedStatus>) -> Result<Vec<UnmatchedFolder>> {
        let state = self.state.read().unwrap();
        let mut rows: Vec<UnmatchedFolder> = state
            .unmatched
            .values()
            .filter(|u| status.is_none_or(|s| u.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.first_seen_at
                .cmp(&b.first_seen_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(rows)
    }

    async fn set_unmatched_status(&self, path: &str, status: UnmatchedStatus) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.unmatched.get_mut(path) {
            Some(row) => {
                row.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_unmatched(&self, path: &str) -> Result<bool> {
        Ok(self.state.write().unwrap().unmatched.remove(path).is_some())
    }

    async fn clear_unmatched(&self) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        let n = state.unmatched.len() as u64;
        state.unmatched.clear();
        Ok(n)
    }

    async fn create_scan_job(&self, root_path: &str, now: i64) -> Result<Created<ScanJob>> {
        let mut state = self.state.write().unwrap();
        if let Some(active) = state
            .scan_jobs
            .values()
            .find(|j| j.root_path == root_path && j.status.is_active())
        {
            return Ok(Created::Conflict {
                existing_id: active.id.clone(),
            });
        }

        let job = ScanJob {
            id: Uuid::new_v4().to_string(),
            root_path: root_path.to_string(),
            status: ScanStatus::Queued,
            created_at: now,
            started_at: None,
            ended_at: None,
            heartbeat_at: now,
            summary: ScanSummary::default(),
            duplicates: Vec::new(),
            error_message: None,
        };
        state.scan_jobs.insert(job.id.clone(), job.clone());
        Ok(Created::Created(job))
    }

    async fn mark_scan_running(&self, id: &str, now: i64) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.scan_jobs.get_mut(id) {
            Some(job) if job.status == ScanStatus::Queued => {
                job.status = ScanStatus::Running;
                job.started_at = Some(now);
                job.heartbeat_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_scan_job(&self, id: &str, now: i64) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.scan_jobs.get_mut(id) {
            Some(job) if job.status.is_active() => {
                job.heartbeat_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_scan_job(&self, id: &str, outcome: &ScanOutcome, now: i64) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        let job = match state.scan_jobs.get_mut(id) {
            Some(job) if job.status == ScanStatus::Running => job,
            _ => return Ok(false),
        };
        match outcome {
            ScanOutcome::Completed {
                summary,
                duplicates,
            } => {
                job.status = ScanStatus::Completed;
                job.summary = *summary;
                job.duplicates = duplicates.clone();
            }
            ScanOutcome::Failed { message } => {
                job.status = ScanStatus::Failed;
                job.error_message = Some(message.clone());
            }
        }
        job.ended_at = Some(now);
        Ok(true)
    }

    async fn fail_stale_scan_jobs(&self, cutoff: i64, message: &str, now: i64) -> Result<Vec<String>> {
        let mut state = self.state.write().unwrap();
        let mut failed = Vec::new();
        for job in state.scan_jobs.values_mut() {
            if job.status.is_active() && job.heartbeat_at < cutoff {
                job.status = ScanStatus::Failed;
                job.error_message = Some(message.to_string());
                job.ended_at = Some(now);
                failed.push(job.id.clone());
            }
        }
        failed.sort();
        Ok(failed)
    }

    async fn get_scan_job(&self, id: &str) -> Result<Option<ScanJob>> {
        Ok(self.state.read().unwrap().scan_jobs.get(id).cloned())
    }

    async fn latest_scan_job(&self, root_path: &str) -> Result<Option<ScanJob>> {
        let mut jobs: Vec<ScanJob> = self
            .state
            .read()
            .unwrap()
            .scan_jobs
            .values()
            .filter(|j| j.root_path == root_path)
            .cloned()
            .collect();
        newest_first(&mut jobs, |j| (j.created_at, j.id.as_str()));
        Ok(jobs.into_iter().next())
    }

    async fn list_scan_jobs(&self) -> Result<Vec<ScanJob>> {
        let mut jobs: Vec<ScanJob> = self.state.read().unwrap().scan_jobs.values().cloned().collect();
        newest_first(&mut jobs, |j| (j.created_at, j.id.as_str()));
        Ok(jobs)
    }

    async fn delete_scan_job(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.scan_jobs.get(id) {
            Some(job) if job.status.is_terminal() => {
                state.scan_jobs.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_scan_jobs(&self) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        let before = state.scan_jobs.len();
        state.scan_jobs.retain(|_, j| j.status.is_active());
        Ok((before - state.scan_jobs.len()) as u64)
    }

    async fn create_download(
        &self,
        requester_id: &str,
        game_id: &str,
        now: i64,
    ) -> Result<Created<DownloadRequest>> {
        let mut state = self.state.write().unwrap();
        if let Some(active) = state
            .downloads
            .values()
            .find(|d| d.requester_id == requester_id && d.status == DownloadStatus::Processing)
        {
            return Ok(Created::Conflict {
                existing_id: active.id.clone(),
            });
        }
        if !state.games.contains_key(game_id) {
            anyhow::bail!("game not found: {}", game_id);
        }

        let request = DownloadRequest {
            id: Uuid::new_v4().to_string(),
            requester_id: requester_id.to_string(),
            game_id: game_id.to_string(),
            status: DownloadStatus::Processing,
            artifact_path: None,
            artifact_size: None,
            artifact_sha256: None,
            error_cause: None,
            created_at: now,
            heartbeat_at: now,
            finished_at: None,
        };
        state.downloads.insert(request.id.clone(), request.clone());
        Ok(Created::Created(request))
    }

    async fn get_download(&self, id: &str) -> Result<Option<DownloadRequest>> {
        Ok(self.state.read().unwrap().downloads.get(id).cloned())
    }

    async fn list_downloads(&self, requester_id: Option<&str>) -> Result<Vec<DownloadRequest>> {
        let mut rows: Vec<DownloadRequest> = self
            .state
            .read()
            .unwrap()
            .downloads
            .values()
            .filter(|d| requester_id.is_none_or(|r| d.requester_id == r))
            .cloned()
            .collect();
        newest_first(&mut rows, |d| (d.created_at, d.id.as_str()));
        Ok(rows)
    }

    async fn touch_download(&self, id: &str, at: i64) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.downloads.get_mut(id) {
            Some(d) if d.status == DownloadStatus::Processing => {
                d.heartbeat_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_download(&self, id: &str, artifact: &Artifact, now: i64) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.downloads.get_mut(id) {
            Some(d) if d.status == DownloadStatus::Processing => {
                d.status = DownloadStatus::Available;
                d.artifact_path = Some(artifact.path.clone());
                d.artifact_size = Some(artifact.size);
                d.artifact_sha256 = Some(artifact.sha256.clone());
                d.finished_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_download(&self, id: &str, cause: &str, now: i64) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.downloads.get_mut(id) {
            Some(d) if d.status == DownloadStatus::Processing => {
                d.status = DownloadStatus::Error;
                d.error_cause = Some(cause.to_string());
                d.finished_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_stale_downloads(&self, cutoff: i64, cause: &str, now: i64) -> Result<Vec<String>> {
        let mut state = self.state.write().unwrap();
        let mut failed = Vec::new();
        for d in state.downloads.values_mut() {
            if d.status == DownloadStatus::Processing && d.heartbeat_at < cutoff {
                d.status = DownloadStatus::Error;
                d.error_cause = Some(cause.to_string());
                d.finished_at = Some(now);
                failed.push(d.id.clone());
            }
        }
        failed.sort();
        Ok(failed)
    }

    async fn delete_download(&self, id: &str) -> Result<Option<DownloadRequest>> {
        Ok(self.state.write().unwrap().downloads.remove(id))
    }

    async fn stats(&self) -> Result<LibraryStats> {
        let state = self.state.read().unwrap();

        let mut stats = LibraryStats {
            games: state.games.len() as u64,
            total_size_bytes: state.games.values().map(|g| g.size_bytes).sum(),
            ..Default::default()
        };
        for status in [
            UnmatchedStatus::Pending,
            UnmatchedStatus::Ignored,
            UnmatchedStatus::Resolved,
        ] {
            let n = state.unmatched.values().filter(|u| u.status == status).count();
            stats.unmatched.push((status, n as u64));
        }
        for status in [
            ScanStatus::Queued,
            ScanStatus::Running,
            ScanStatus::Completed,
            ScanStatus::Failed,
        ] {
            let n = state.scan_jobs.values().filter(|j| j.status == status).count();
            stats.scan_jobs.push((status, n as u64));
        }
        for status in [
            DownloadStatus::Processing,
            DownloadStatus::Available,
            DownloadStatus::Error,
        ] {
            let n = state.downloads.values().filter(|d| d.status == status).count();
            stats.downloads.push((status, n as u64));
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_game(path: &str, external_id: Option<&str>) -> NewGame {
        NewGame {
            external_id: external_id.map(str::to_string),
            full_disk_path: path.to_string(),
            canonical_title: "Title".to_string(),
            summary: None,
            url: None,
            release_year: None,
            size_bytes: 0,
        }
    }

    #[tokio::test]
    async fn game_identity_is_unique() {
        let store = InMemoryStore::new();
        let first = match store.insert_game(&new_game("/g/a", Some("42")), 1).await.unwrap() {
            InsertGame::Inserted(g) => g,
            other => panic!("expected insert, got {other:?}"),
        };

        let same_path = store.insert_game(&new_game("/g/a", None), 2).await.unwrap();
        assert_eq!(
            same_path,
            InsertGame::DuplicatePath {
                existing_id: first.id.clone()
            }
        );

        let same_ext = store.insert_game(&new_game("/g/b", Some("42")), 2).await.unwrap();
        assert_eq!(
            same_ext,
            InsertGame::DuplicateExternalId {
                existing_id: first.id
            }
        );
    }

    #[tokio::test]
    async fn upsert_unmatched_keeps_first_seen() {
        let store = InMemoryStore::new();
        assert!(store.upsert_unmatched("/g/x", 10).await.unwrap());
        store
            .set_unmatched_status("/g/x", UnmatchedStatus::Ignored)
            .await
            .unwrap();
        assert!(!store.upsert_unmatched("/g/x", 20).await.unwrap());

        let row = store.get_unmatched("/g/x").await.unwrap().unwrap();
        assert_eq!(row.first_seen_at, 10);
        assert_eq!(row.status, UnmatchedStatus::Ignored);
    }

    #[tokio::test]
    async fn scan_job_transitions_are_monotonic() {
        let store = InMemoryStore::new();
        let job = match store.create_scan_job("/g", 1).await.unwrap() {
            Created::Created(j) => j,
            Created::Conflict { .. } => panic!("unexpected conflict"),
        };

        // Cannot finish a job that never ran.
        let done = ScanOutcome::Completed {
            summary: ScanSummary::default(),
            duplicates: vec![],
        };
        assert!(!store.finish_scan_job(&job.id, &done, 2).await.unwrap());

        assert!(store.mark_scan_running(&job.id, 2).await.unwrap());
        assert!(!store.mark_scan_running(&job.id, 3).await.unwrap());

        // Second job on the same root conflicts while the first is active.
        assert_eq!(
            store.create_scan_job("/g", 3).await.unwrap(),
            Created::Conflict {
                existing_id: job.id.clone()
            }
        );

        assert!(store.finish_scan_job(&job.id, &done, 4).await.unwrap());
        let failed = ScanOutcome::Failed {
            message: "late".into(),
        };
        assert!(!store.finish_scan_job(&job.id, &failed, 5).await.unwrap());
        assert_eq!(
            store.get_scan_job(&job.id).await.unwrap().unwrap().status,
            ScanStatus::Completed
        );

        assert!(matches!(
            store.create_scan_job("/g", 6).await.unwrap(),
            Created::Created(_)
        ));
    }

    #[tokio::test]
    async fn one_processing_download_per_requester() {
        let store = InMemoryStore::new();
        let game = match store.insert_game(&new_game("/g/a", None), 1).await.unwrap() {
            InsertGame::Inserted(g) => g,
            other => panic!("{other:?}"),
        };

        let first = match store.create_download("alice", &game.id, 1).await.unwrap() {
            Created::Created(d) => d,
            Created::Conflict { .. } => panic!("unexpected conflict"),
        };
        assert_eq!(
            store.create_download("alice", &game.id, 2).await.unwrap(),
            Created::Conflict {
                existing_id: first.id.clone()
            }
        );
        assert!(matches!(
            store.create_download("bob", &game.id, 2).await.unwrap(),
            Created::Created(_)
        ));

        assert!(store.fail_download(&first.id, "boom", 3).await.unwrap());
        assert!(matches!(
            store.create_download("alice", &game.id, 4).await.unwrap(),
            Created::Created(_)
        ));
    }

    #[tokio::test]
    async fn stale_downloads_are_failed() {
        let store = InMemoryStore::new();
        let game = match store.insert_game(&new_game("/g/a", None), 1).await.unwrap() {
            InsertGame::Inserted(g) => g,
            other => panic!("{other:?}"),
        };
        let d = match store.create_download("alice", &game.id, 100).await.unwrap() {
            Created::Created(d) => d,
            Created::Conflict { .. } => panic!(),
        };

        assert!(store.fail_stale_downloads(50, "orphaned", 200).await.unwrap().is_empty());
        assert_eq!(
            store.fail_stale_downloads(150, "orphaned", 200).await.unwrap(),
            vec![d.id.clone()]
        );
        let row = store.get_download(&d.id).await.unwrap().unwrap();
        assert_eq!(row.status, DownloadStatus::Error);
        assert_eq!(row.error_cause.as_deref(), Some("orphaned"));
    }

    #[tokio::test]
    async fn deleting_a_game_cascades_downloads() {
        let store = InMemoryStore::new();
        let game = match store.insert_game(&new_game("/g/a", None), 1).await.unwrap() {
            InsertGame::Inserted(g) => g,
            other => panic!("{other:?}"),
        };
        store.create_download("alice", &game.id, 1).await.unwrap();

        let removed = store.delete_game(&game.id).await.unwrap().unwrap();
        assert_eq!(removed.len(), 1);
        assert!(store.list_downloads(None).await.unwrap().is_empty());
        assert!(store.delete_game(&game.id).await.unwrap().is_none());
    }
}
