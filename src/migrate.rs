//! Idempotent schema migrations.
//!
//! Every statement uses `IF NOT EXISTS`, so [`Vault::open`] runs them on
//! every start.
//!
//! [`Vault::open`]: crate::vault::Vault::open

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Release-group catalog, in configuration order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS release_groups (
            tag TEXT PRIMARY KEY,
            case_sensitive INTEGER NOT NULL DEFAULT 0,
            position INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One-time startup steps already taken against this database
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vault_flags (
            name TEXT PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS games (
            id TEXT PRIMARY KEY,
            external_id TEXT UNIQUE,
            full_disk_path TEXT NOT NULL UNIQUE,
            canonical_title TEXT NOT NULL,
            summary TEXT,
            url TEXT,
            release_year INTEGER,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unmatched_folders (
            path TEXT PRIMARY KEY,
            first_seen_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_jobs (
            id TEXT PRIMARY KEY,
            root_path TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            ended_at INTEGER,
            heartbeat_at INTEGER NOT NULL,
            matched_count INTEGER NOT NULL DEFAULT 0,
            unmatched_count INTEGER NOT NULL DEFAULT 0,
            skipped_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            duplicates_json TEXT NOT NULL DEFAULT '[]',
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single flight: at most one active job per root
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_scan_jobs_active_root
        ON scan_jobs(root_path)
        WHERE status IN ('queued', 'running')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_requests (
            id TEXT PRIMARY KEY,
            requester_id TEXT NOT NULL,
            game_id TEXT NOT NULL,
            status TEXT NOT NULL,
            artifact_path TEXT,
            artifact_size INTEGER,
            artifact_sha256 TEXT,
            error_cause TEXT,
            created_at INTEGER NOT NULL,
            heartbeat_at INTEGER NOT NULL,
            finished_at INTEGER,
            FOREIGN KEY (game_id) REFERENCES games(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one processing request per requester
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_download_requests_processing
        ON download_requests(requester_id)
        WHERE status = 'processing'
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_jobs_created_at ON scan_jobs(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_download_requests_game_id ON download_requests(game_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_unmatched_first_seen ON unmatched_folders(first_seen_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
