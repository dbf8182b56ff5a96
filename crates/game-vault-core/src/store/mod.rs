//! Storage abstraction for Game Vault.
//!
//! The [`Store`] trait defines every durable operation the scanner, the
//! registrar and the job trackers need, enabling pluggable backends
//! (SQLite in the native crate, [`memory::InMemoryStore`] here).
//!
//! Uniqueness rules are part of the contract, not a caller concern:
//!
//! - games are unique by `full_disk_path` and by `external_id`;
//! - a root path has at most one scan job in an active status;
//! - a requester has at most one download request in `processing`.
//!
//! Each rule is checked and written atomically by the implementation and
//! reported through [`InsertGame`] / [`Created`] rather than as an error.
//! Status transitions are compare-and-set: they return `false` when the
//! row is not in the expected source status.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Artifact, Created, DownloadRequest, Game, GameFilter, InsertGame, LibraryStats,
    ReleaseGroupPattern, ScanJob, ScanOutcome, UnmatchedFolder, UnmatchedStatus,
};

/// Fields of a game about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGame {
    pub external_id: Option<String>,
    pub full_disk_path: String,
    pub canonical_title: String,
    pub summary: Option<String>,
    pub url: Option<String>,
    pub release_year: Option<i32>,
    pub size_bytes: u64,
}

/// Abstract storage backend for Game Vault.
///
/// | Area | Methods |
/// |------|---------|
/// | Release groups | `list_release_groups`, `add_release_group`, `remove_release_group`, `release_groups_seeded`, `mark_release_groups_seeded` |
/// | Games | `insert_game`, `get_game`, `find_game_by_path`, `find_game_by_external_id`, `list_games`, `delete_game` |
/// | Unmatched folders | `upsert_unmatched`, `get_unmatched`, `list_unmatched`, `set_unmatched_status`, `delete_unmatched`, `clear_unmatched` |
/// | Scan jobs | `create_scan_job`, `mark_scan_running`, `touch_scan_job`, `finish_scan_job`, `fail_stale_scan_jobs`, ... |
/// | Downloads | `create_download`, `touch_download`, `complete_download`, `fail_download`, `fail_stale_downloads`, ... |
#[async_trait]
pub trait Store: Send + Sync {
    // ---- release groups ----

    /// All stored release groups in configuration order.
    async fn list_release_groups(&self) -> Result<Vec<ReleaseGroupPattern>>;

    /// Append a release group. Returns `false` if the exact tag text is
    /// already stored.
    async fn add_release_group(&self, pattern: &ReleaseGroupPattern) -> Result<bool>;

    /// Remove a release group by exact tag text.
    async fn remove_release_group(&self, tag: &str) -> Result<bool>;

    /// Whether the seed list has ever been written into this store.
    async fn release_groups_seeded(&self) -> Result<bool>;

    /// Record that seeding happened; later starts leave the table to
    /// `add_release_group` and `remove_release_group`.
    async fn mark_release_groups_seeded(&self) -> Result<()>;

    // ---- games ----

    async fn insert_game(&self, game: &NewGame, now: i64) -> Result<InsertGame>;

    async fn get_game(&self, id: &str) -> Result<Option<Game>>;

    async fn find_game_by_path(&self, path: &str) -> Result<Option<Game>>;

    async fn find_game_by_external_id(&self, external_id: &str) -> Result<Option<Game>>;

    async fn list_games(&self, filter: &GameFilter) -> Result<Vec<Game>>;

    /// Delete a game and every download request that references it.
    ///
    /// Returns the removed download rows so the caller can delete their
    /// artifacts, or `None` if the game does not exist.
    async fn delete_game(&self, id: &str) -> Result<Option<Vec<DownloadRequest>>>;

    // ---- unmatched folders ----

    /// Insert `path` as `Pending` unless it is already present. Existing
    /// rows keep their `first_seen_at` and status. Returns `true` when a
    /// row was created.
    async fn upsert_unmatched(&self, path: &str, now: i64) -> Result<bool>;

    async fn get_unmatched(&self, path: &str) -> Result<Option<UnmatchedFolder>>;

    /// Ordered by `first_seen_at`, then path.
    async fn list_unmatched(&self, status: Option<UnmatchedStatus>) -> Result<Vec<UnmatchedFolder>>;

    async fn set_unmatched_status(&self, path: &str, status: UnmatchedStatus) -> Result<bool>;

    async fn delete_unmatched(&self, path: &str) -> Result<bool>;

    async fn clear_unmatched(&self) -> Result<u64>;

    // ---- scan jobs ----

    /// Create a `Queued` job unless `root_path` already has an active one.
    async fn create_scan_job(&self, root_path: &str, now: i64) -> Result<Created<ScanJob>>;

    /// `Queued → Running`.
    async fn mark_scan_running(&self, id: &str, now: i64) -> Result<bool>;

    /// Refresh the heartbeat of an active job.
    async fn touch_scan_job(&self, id: &str, now: i64) -> Result<bool>;

    /// `Running → Completed | Failed`.
    async fn finish_scan_job(&self, id: &str, outcome: &ScanOutcome, now: i64) -> Result<bool>;

    /// Fail every active job whose heartbeat is older than `cutoff`.
    /// Returns the ids of the jobs that were failed.
    async fn fail_stale_scan_jobs(&self, cutoff: i64, message: &str, now: i64) -> Result<Vec<String>>;

    async fn get_scan_job(&self, id: &str) -> Result<Option<ScanJob>>;

    /// Most recent job for `root_path`.
    async fn latest_scan_job(&self, root_path: &str) -> Result<Option<ScanJob>>;

    /// All jobs, newest first.
    async fn list_scan_jobs(&self) -> Result<Vec<ScanJob>>;

    /// Delete a terminal job. Active jobs are never deleted.
    async fn delete_scan_job(&self, id: &str) -> Result<bool>;

    /// Delete every terminal job.
    async fn clear_scan_jobs(&self) -> Result<u64>;

    // ---- downloads ----

    /// Create a `Processing` request unless the requester already has one.
    async fn create_download(
        &self,
        requester_id: &str,
        game_id: &str,
        now: i64,
    ) -> Result<Created<DownloadRequest>>;

    async fn get_download(&self, id: &str) -> Result<Option<DownloadRequest>>;

    /// Requests of one requester (or all), newest first.
    async fn list_downloads(&self, requester_id: Option<&str>) -> Result<Vec<DownloadRequest>>;

    /// Refresh the heartbeat of a processing request.
    async fn touch_download(&self, id: &str, at: i64) -> Result<bool>;

    /// `Processing → Available`.
    async fn complete_download(&self, id: &str, artifact: &Artifact, now: i64) -> Result<bool>;

    /// `Processing → Error`.
    async fn fail_download(&self, id: &str, cause: &str, now: i64) -> Result<bool>;

    /// Fail every processing request whose heartbeat is older than `cutoff`.
    async fn fail_stale_downloads(&self, cutoff: i64, cause: &str, now: i64) -> Result<Vec<String>>;

    /// Delete a request, returning the removed row.
    async fn delete_download(&self, id: &str) -> Result<Option<DownloadRequest>>;

    // ---- stats ----

    async fn stats(&self) -> Result<LibraryStats>;
}
