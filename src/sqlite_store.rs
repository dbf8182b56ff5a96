//! SQLite-backed [`Store`] implementation.
//!
//! Uniqueness rules live in the schema (see [`migrate`](crate::migrate)):
//! inserts use `INSERT OR IGNORE` against the unique columns and partial
//! unique indexes, and a zero-row insert is turned into the matching
//! conflict outcome by looking up the row that won.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use game_vault_core::models::{
    Artifact, Created, DownloadRequest, DownloadStatus, DuplicateTitle, Game, GameFilter,
    GameSort, InsertGame, LibraryStats, ReleaseGroupPattern, ScanJob, ScanOutcome, ScanStatus,
    ScanSummary, UnmatchedFolder, UnmatchedStatus,
};
use game_vault_core::store::{NewGame, Store};

/// A conflicting row can disappear between the ignored insert and the
/// lookup (a job finishing, a game being removed); retry this many times.
const CONFLICT_RETRIES: usize = 3;

/// `vault_flags` row written once the seed list has been applied.
const RELEASE_GROUPS_SEEDED: &str = "release_groups_seeded";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const GAME_COLUMNS: &str = "id, external_id, full_disk_path, canonical_title, summary, url, \
                            release_year, size_bytes, created_at";

const SCAN_JOB_COLUMNS: &str = "id, root_path, status, created_at, started_at, ended_at, \
                                heartbeat_at, matched_count, unmatched_count, skipped_count, \
                                error_count, duplicates_json, error_message";

const DOWNLOAD_COLUMNS: &str = "id, requester_id, game_id, status, artifact_path, \
                                artifact_size, artifact_sha256, error_cause, created_at, \
                                heartbeat_at, finished_at";

fn game_from_row(row: &SqliteRow) -> Result<Game> {
    Ok(Game {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        full_disk_path: row.try_get("full_disk_path")?,
        canonical_title: row.try_get("canonical_title")?,
        summary: row.try_get("summary")?,
        url: row.try_get("url")?,
        release_year: row.try_get("release_year")?,
        size_bytes: row.try_get::<i64, _>("size_bytes")?.max(0) as u64,
        created_at: row.try_get("created_at")?,
    })
}

fn scan_job_from_row(row: &SqliteRow) -> Result<ScanJob> {
    let status: String = row.try_get("status")?;
    let duplicates_json: String = row.try_get("duplicates_json")?;
    let duplicates: Vec<DuplicateTitle> = serde_json::from_str(&duplicates_json)?;
    let count = |col: &str| -> Result<u64> { Ok(row.try_get::<i64, _>(col)?.max(0) as u64) };

    Ok(ScanJob {
        id: row.try_get("id")?,
        root_path: row.try_get("root_path")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        summary: ScanSummary {
            matched_count: count("matched_count")?,
            unmatched_count: count("unmatched_count")?,
            skipped_count: count("skipped_count")?,
            error_count: count("error_count")?,
        },
        duplicates,
        error_message: row.try_get("error_message")?,
    })
}

fn download_from_row(row: &SqliteRow) -> Result<DownloadRequest> {
    let status: String = row.try_get("status")?;
    Ok(DownloadRequest {
        id: row.try_get("id")?,
        requester_id: row.try_get("requester_id")?,
        game_id: row.try_get("game_id")?,
        status: status.parse()?,
        artifact_path: row.try_get("artifact_path")?,
        artifact_size: row
            .try_get::<Option<i64>, _>("artifact_size")?
            .map(|s| s.max(0) as u64),
        artifact_sha256: row.try_get("artifact_sha256")?,
        error_cause: row.try_get("error_cause")?,
        created_at: row.try_get("created_at")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn unmatched_from_row(row: &SqliteRow) -> Result<UnmatchedFolder> {
    let status: String = row.try_get("status")?;
    Ok(UnmatchedFolder {
        path: row.try_get("path")?,
        first_seen_at: row.try_get("first_seen_at")?,
        status: status.parse()?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_release_groups(&self) -> Result<Vec<ReleaseGroupPattern>> {
        let rows = sqlx::query_as::<_, (String, bool)>(
            "SELECT tag, case_sensitive FROM release_groups ORDER BY position, tag",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(tag, cs)| ReleaseGroupPattern::new(tag, cs))
            .collect())
    }

    async fn add_release_group(&self, pattern: &ReleaseGroupPattern) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO release_groups (tag, case_sensitive, position)
            VALUES (?, ?, (SELECT COALESCE(MAX(position), -1) + 1 FROM release_groups))
            "#,
        )
        .bind(&pattern.tag)
        .bind(pattern.case_sensitive)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_release_group(&self, tag: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM release_groups WHERE tag = ?")
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_groups_seeded(&self) -> Result<bool> {
        let seeded: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM vault_flags WHERE name = ?)")
                .bind(RELEASE_GROUPS_SEEDED)
                .fetch_one(&self.pool)
                .await?;
        Ok(seeded)
    }

    async fn mark_release_groups_seeded(&self) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO vault_flags (name) VALUES (?)")
            .bind(RELEASE_GROUPS_SEEDED)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_game(&self, game: &NewGame, now: i64) -> Result<InsertGame> {
        for _ in 0..CONFLICT_RETRIES {
            let id = Uuid::new_v4().to_string();
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO games (id, external_id, full_disk_path, canonical_title,
                                             summary, url, release_year, size_bytes, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&game.external_id)
            .bind(&game.full_disk_path)
            .bind(&game.canonical_title)
            .bind(&game.summary)
            .bind(&game.url)
            .bind(game.release_year)
            .bind(game.size_bytes as i64)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(InsertGame::Inserted(Game {
                    id,
                    external_id: game.external_id.clone(),
                    full_disk_path: game.full_disk_path.clone(),
                    canonical_title: game.canonical_title.clone(),
                    summary: game.summary.clone(),
                    url: game.url.clone(),
                    release_year: game.release_year,
                    size_bytes: game.size_bytes,
                    created_at: now,
                }));
            }

            if let Some(existing) = self.find_game_by_path(&game.full_disk_path).await? {
                return Ok(InsertGame::DuplicatePath {
                    existing_id: existing.id,
                });
            }
            if let Some(external_id) = &game.external_id {
                if let Some(existing) = self.find_game_by_external_id(external_id).await? {
                    return Ok(InsertGame::DuplicateExternalId {
                        existing_id: existing.id,
                    });
                }
            }
        }
        anyhow::bail!(
            "insert of game at {} kept conflicting with a vanishing row",
            game.full_disk_path
        )
    }

    async fn get_game(&self, id: &str) -> Result<Option<Game>> {
        let row = sqlx::query(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(game_from_row).transpose()
    }

    async fn find_game_by_path(&self, path: &str) -> Result<Option<Game>> {
        let row = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE full_disk_path = ?"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(game_from_row).transpose()
    }

    async fn find_game_by_external_id(&self, external_id: &str) -> Result<Option<Game>> {
        let row = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE external_id = ?"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(game_from_row).transpose()
    }

    async fn list_games(&self, filter: &GameFilter) -> Result<Vec<Game>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {GAME_COLUMNS} FROM games WHERE 1 = 1"));

        if let Some(needle) = &filter.title_contains {
            qb.push(" AND instr(lower(canonical_title), lower(")
                .push_bind(needle.clone())
                .push(")) > 0");
        }
        match filter.has_external_id {
            Some(true) => {
                qb.push(" AND external_id IS NOT NULL");
            }
            Some(false) => {
                qb.push(" AND external_id IS NULL");
            }
            None => {}
        }
        if let Some(min) = filter.min_size_bytes {
            qb.push(" AND size_bytes >= ").push_bind(min as i64);
        }
        if let Some(max) = filter.max_size_bytes {
            qb.push(" AND size_bytes <= ").push_bind(max as i64);
        }
        if let Some(prefix) = &filter.path_prefix {
            qb.push(" AND substr(full_disk_path, 1, length(")
                .push_bind(prefix.clone())
                .push(")) = ")
                .push_bind(prefix.clone());
        }

        qb.push(match filter.sort {
            GameSort::Title => " ORDER BY lower(canonical_title), full_disk_path",
            GameSort::Newest => " ORDER BY created_at DESC, full_disk_path",
            GameSort::Largest => " ORDER BY size_bytes DESC, full_disk_path",
        });

        qb.push(" LIMIT ")
            .push_bind(filter.limit.map(i64::from).unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset.unwrap_or(0)));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(game_from_row).collect()
    }

    async fn delete_game(&self, id: &str) -> Result<Option<Vec<DownloadRequest>>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM download_requests WHERE game_id = ?"
        ))
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        let downloads = rows
            .iter()
            .map(download_from_row)
            .collect::<Result<Vec<_>>>()?;

        sqlx::query("DELETE FROM download_requests WHERE game_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM games WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(downloads))
    }

    async fn upsert_unmatched(&self, path: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO unmatched_folders (path, first_seen_at, status) VALUES (?, ?, ?)",
        )
        .bind(path)
        .bind(now)
        .bind(UnmatchedStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_unmatched(&self, path: &str) -> Result<Option<UnmatchedFolder>> {
        let row = sqlx::query(
            "SELECT path, first_seen_at, status FROM unmatched_folders WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(unmatched_from_row).transpose()
    }

    async fn list_unmatched(&self, status: Option<UnmatchedStatus>) -> Result<Vec<UnmatchedFolder>> {
        let rows = sqlx::query(
            r#"
            SELECT path, first_seen_at, status FROM unmatched_folders
            WHERE ?1 IS NULL OR status = ?1
            ORDER BY first_seen_at, path
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(unmatched_from_row).collect()
    }

    async fn set_unmatched_status(&self, path: &str, status: UnmatchedStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE unmatched_folders SET status = ? WHERE path = ?")
            .bind(status.as_str())
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_unmatched(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM unmatched_folders WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_unmatched(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM unmatched_folders")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn create_scan_job(&self, root_path: &str, now: i64) -> Result<Created<ScanJob>> {
        for _ in 0..CONFLICT_RETRIES {
            let id = Uuid::new_v4().to_string();
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO scan_jobs (id, root_path, status, created_at, heartbeat_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(root_path)
            .bind(ScanStatus::Queued.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(Created::Created(ScanJob {
                    id,
                    root_path: root_path.to_string(),
                    status: ScanStatus::Queued,
                    created_at: now,
                    started_at: None,
                    ended_at: None,
                    heartbeat_at: now,
                    summary: ScanSummary::default(),
                    duplicates: Vec::new(),
                    error_message: None,
                }));
            }

            let existing: Option<String> = sqlx::query_scalar(
                "SELECT id FROM scan_jobs WHERE root_path = ? AND status IN ('queued', 'running')",
            )
            .bind(root_path)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(existing_id) = existing {
                return Ok(Created::Conflict { existing_id });
            }
        }
        anyhow::bail!("scan job for {} kept conflicting with a finishing job", root_path)
    }

    async fn mark_scan_running(&self, id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs SET status = 'running', started_at = ?, heartbeat_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_scan_job(&self, id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE scan_jobs SET heartbeat_at = ? WHERE id = ? AND status IN ('queued', 'running')",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finish_scan_job(&self, id: &str, outcome: &ScanOutcome, now: i64) -> Result<bool> {
        let result = match outcome {
            ScanOutcome::Completed {
                summary,
                duplicates,
            } => {
                sqlx::query(
                    r#"
                    UPDATE scan_jobs
                    SET status = 'completed', ended_at = ?, matched_count = ?,
                        unmatched_count = ?, skipped_count = ?, error_count = ?,
                        duplicates_json = ?
                    WHERE id = ? AND status = 'running'
                    "#,
                )
                .bind(now)
                .bind(summary.matched_count as i64)
                .bind(summary.unmatched_count as i64)
                .bind(summary.skipped_count as i64)
                .bind(summary.error_count as i64)
                .bind(serde_json::to_string(duplicates)?)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            ScanOutcome::Failed { message } => {
                sqlx::query(
                    r#"
                    UPDATE scan_jobs SET status = 'failed', ended_at = ?, error_message = ?
                    WHERE id = ? AND status = 'running'
                    "#,
                )
                .bind(now)
                .bind(message)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn fail_stale_scan_jobs(&self, cutoff: i64, message: &str, now: i64) -> Result<Vec<String>> {
        let mut ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE scan_jobs SET status = 'failed', error_message = ?, ended_at = ?
            WHERE status IN ('queued', 'running') AND heartbeat_at < ?
            RETURNING id
            "#,
        )
        .bind(message)
        .bind(now)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        ids.sort();
        Ok(ids)
    }

    async fn get_scan_job(&self, id: &str) -> Result<Option<ScanJob>> {
        let row = sqlx::query(&format!("SELECT {SCAN_JOB_COLUMNS} FROM scan_jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(scan_job_from_row).transpose()
    }

    async fn latest_scan_job(&self, root_path: &str) -> Result<Option<ScanJob>> {
        let row = sqlx::query(&format!(
            "SELECT {SCAN_JOB_COLUMNS} FROM scan_jobs WHERE root_path = ? \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(root_path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(scan_job_from_row).transpose()
    }

    async fn list_scan_jobs(&self) -> Result<Vec<ScanJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCAN_JOB_COLUMNS} FROM scan_jobs ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(scan_job_from_row).collect()
    }

    async fn delete_scan_job(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM scan_jobs WHERE id = ? AND status IN ('completed', 'failed')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_scan_jobs(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scan_jobs WHERE status IN ('completed', 'failed')")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn create_download(
        &self,
        requester_id: &str,
        game_id: &str,
        now: i64,
    ) -> Result<Created<DownloadRequest>> {
        for _ in 0..CONFLICT_RETRIES {
            let id = Uuid::new_v4().to_string();
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO download_requests
                    (id, requester_id, game_id, status, created_at, heartbeat_at)
                VALUES (?, ?, ?, 'processing', ?, ?)
                "#,
            )
            .bind(&id)
            .bind(requester_id)
            .bind(game_id)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(Created::Created(DownloadRequest {
                    id,
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
                }));
            }

            let existing: Option<String> = sqlx::query_scalar(
                "SELECT id FROM download_requests WHERE requester_id = ? AND status = 'processing'",
            )
            .bind(requester_id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(existing_id) = existing {
                return Ok(Created::Conflict { existing_id });
            }
        }
        anyhow::bail!(
            "download request for {} kept conflicting with a finishing request",
            requester_id
        )
    }

    async fn get_download(&self, id: &str) -> Result<Option<DownloadRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM download_requests WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(download_from_row).transpose()
    }

    async fn list_downloads(&self, requester_id: Option<&str>) -> Result<Vec<DownloadRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM download_requests \
             WHERE ?1 IS NULL OR requester_id = ?1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(requester_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(download_from_row).collect()
    }

    async fn touch_download(&self, id: &str, at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE download_requests SET heartbeat_at = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete_download(&self, id: &str, artifact: &Artifact, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE download_requests
            SET status = 'available', artifact_path = ?, artifact_size = ?,
                artifact_sha256 = ?, finished_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(&artifact.path)
        .bind(artifact.size as i64)
        .bind(&artifact.sha256)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_download(&self, id: &str, cause: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE download_requests SET status = 'error', error_cause = ?, finished_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(cause)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_stale_downloads(&self, cutoff: i64, cause: &str, now: i64) -> Result<Vec<String>> {
        let mut ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE download_requests SET status = 'error', error_cause = ?, finished_at = ?
            WHERE status = 'processing' AND heartbeat_at < ?
            RETURNING id
            "#,
        )
        .bind(cause)
        .bind(now)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        ids.sort();
        Ok(ids)
    }

    async fn delete_download(&self, id: &str) -> Result<Option<DownloadRequest>> {
        let row = sqlx::query(&format!(
            "DELETE FROM download_requests WHERE id = ? RETURNING {DOWNLOAD_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(download_from_row).transpose()
    }

    async fn stats(&self) -> Result<LibraryStats> {
        let (games, total): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM games")
                .fetch_one(&self.pool)
                .await?;

        let mut stats = LibraryStats {
            games: games as u64,
            total_size_bytes: total.max(0) as u64,
            ..Default::default()
        };

        let unmatched = grouped_counts(&self.pool, "unmatched_folders").await?;
        for status in [
            UnmatchedStatus::Pending,
            UnmatchedStatus::Ignored,
            UnmatchedStatus::Resolved,
        ] {
            stats
                .unmatched
                .push((status, unmatched.get(status.as_str()).copied().unwrap_or(0)));
        }
        let scans = grouped_counts(&self.pool, "scan_jobs").await?;
        for status in [
            ScanStatus::Queued,
            ScanStatus::Running,
            ScanStatus::Completed,
            ScanStatus::Failed,
        ] {
            stats
                .scan_jobs
                .push((status, scans.get(status.as_str()).copied().unwrap_or(0)));
        }
        let downloads = grouped_counts(&self.pool, "download_requests").await?;
        for status in [
            DownloadStatus::Processing,
            DownloadStatus::Available,
            DownloadStatus::Error,
        ] {
            stats
                .downloads
                .push((status, downloads.get(status.as_str()).copied().unwrap_or(0)));
        }
        Ok(stats)
    }
}

async fn grouped_counts(pool: &SqlitePool, table: &str) -> Result<HashMap<String, u64>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as(&format!("SELECT status, COUNT(*) FROM {table} GROUP BY status"))
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(s, n)| (s, n.max(0) as u64)).collect())
}
