//! Startup and wiring.
//!
//! [`Vault::open`] is the one startup step: connect, migrate, seed the
//! release-group table, load the catalog, then build the scanner,
//! registrar, worker pool and job trackers. [`Vault::global`] runs it once
//! per process behind a `OnceCell`, so no job is accepted before it has
//! finished.
//!
//! The catalog is loaded once. Release groups added or removed later take
//! effect on the next start.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use game_vault_core::catalog::find_collision;
use game_vault_core::models::{
    Game, GameFilter, LibraryStats, ReleaseGroupPattern, UnmatchedFolder, UnmatchedStatus,
};
use game_vault_core::store::Store;
use game_vault_core::{NameExtractor, PatternCatalog};

use crate::config::Config;
use crate::db;
use crate::downloads::DownloadJobTracker;
use crate::error::{Result, VaultError};
use crate::metadata::{self, MetadataResolver};
use crate::migrate;
use crate::pool::WorkerPool;
use crate::reconcile::{self, SweepReport};
use crate::registrar::GameRegistrar;
use crate::scan_jobs::ScanJobTracker;
use crate::scanner::FolderScanner;
use crate::sqlite_store::SqliteStore;

static GLOBAL: OnceCell<Arc<Vault>> = OnceCell::const_new();

pub struct Vault {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    catalog: Arc<PatternCatalog>,
    scanner: Arc<FolderScanner>,
    registrar: Arc<GameRegistrar>,
    pool: WorkerPool,
    scans: ScanJobTracker,
    downloads: DownloadJobTracker,
    shutdown: CancellationToken,
}

impl Vault {
    /// Open the SQLite database named by `config` and start up.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        Self::with_store(config, Arc::new(SqliteStore::new(pool))).await
    }

    /// Start up over an already-migrated store.
    pub async fn with_store(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        let resolver = metadata::from_config(&config.metadata)
            .map_err(|e| VaultError::Configuration(e.to_string()))?;
        Self::with_resolver(config, store, resolver).await
    }

    pub async fn with_resolver(
        config: Config,
        store: Arc<dyn Store>,
        resolver: Arc<dyn MetadataResolver>,
    ) -> Result<Self> {
        // A seed list with duplicate tags is a configuration error even
        // when the stored table would absorb it.
        let seed = config.seed_release_groups();
        PatternCatalog::new(seed.clone())?;
        seed_release_groups(store.as_ref(), &seed).await?;

        let catalog = Arc::new(PatternCatalog::new(store.list_release_groups().await?)?);
        let extractor = Arc::new(
            NameExtractor::new(catalog.clone()).with_extra_noise(config.extractor.extra_noise.clone()),
        );
        let scanner = Arc::new(FolderScanner::new(extractor, store.clone(), &config.library)?);
        let registrar = Arc::new(GameRegistrar::new(store.clone()));
        let pool = WorkerPool::new(config.jobs.max_concurrent, config.jobs.queue_capacity);
        let heartbeat = Duration::from_secs(config.jobs.heartbeat_interval_secs);
        let shutdown = CancellationToken::new();

        let scans = ScanJobTracker::new(
            store.clone(),
            scanner.clone(),
            registrar.clone(),
            resolver,
            pool.clone(),
            heartbeat,
            shutdown.clone(),
        );
        let downloads = DownloadJobTracker::new(
            store.clone(),
            config.downloads.clone(),
            pool.clone(),
            heartbeat,
            shutdown.clone(),
        );

        tracing::info!(
            release_groups = catalog.len(),
            max_concurrent = config.jobs.max_concurrent,
            "vault ready"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            catalog,
            scanner,
            registrar,
            pool,
            scans,
            downloads,
            shutdown,
        })
    }

    /// The process-wide vault, opened on first use.
    pub async fn global(config: Config) -> Result<Arc<Vault>> {
        GLOBAL
            .get_or_try_init(|| async move { Vault::open(config).await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    pub fn scanner(&self) -> &FolderScanner {
        &self.scanner
    }

    pub fn registrar(&self) -> &GameRegistrar {
        &self.registrar
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn scans(&self) -> &ScanJobTracker {
        &self.scans
    }

    pub fn downloads(&self) -> &DownloadJobTracker {
        &self.downloads
    }

    /// Run the reconciliation sweep once, now.
    pub async fn reconcile(&self) -> Result<SweepReport> {
        let timeout = Duration::from_secs(self.config.jobs.orphan_timeout_secs);
        let now = chrono::Utc::now().timestamp();
        Ok(reconcile::sweep(self.store.as_ref(), timeout, now).await?)
    }

    /// Start the periodic sweep; it stops on [`shutdown`](Self::shutdown).
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        reconcile::spawn_sweeper(self.store.clone(), &self.config.jobs, self.shutdown.clone())
    }

    /// Cancel every job and background task started by this vault.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn list_release_groups(&self) -> Result<Vec<ReleaseGroupPattern>> {
        Ok(self.store.list_release_groups().await?)
    }

    /// Store a new release group. Refused when it would collide with a
    /// stored tag, since that would make the next start fail.
    pub async fn add_release_group(&self, pattern: ReleaseGroupPattern) -> Result<()> {
        let tag = pattern.tag.trim();
        if tag.is_empty() {
            return Err(VaultError::InvalidState("tag must not be empty".to_string()));
        }
        let pattern = ReleaseGroupPattern::new(tag, pattern.case_sensitive);

        let stored = self.store.list_release_groups().await?;
        if let Some(existing) = find_collision(&stored, &pattern) {
            return Err(VaultError::InvalidState(format!(
                "release group '{}' collides with '{}'",
                pattern.tag, existing.tag
            )));
        }
        self.store.add_release_group(&pattern).await?;
        Ok(())
    }

    pub async fn remove_release_group(&self, tag: &str) -> Result<()> {
        if !self.store.remove_release_group(tag).await? {
            return Err(VaultError::NotFound(format!("release group '{}'", tag)));
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<LibraryStats> {
        Ok(self.store.stats().await?)
    }

    pub async fn list_games(&self, filter: &GameFilter) -> Result<Vec<Game>> {
        Ok(self.store.list_games(filter).await?)
    }

    pub async fn game(&self, id: &str) -> Result<Game> {
        self.store
            .get_game(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("game {}", id)))
    }

    pub async fn list_unmatched(
        &self,
        status: Option<UnmatchedStatus>,
    ) -> Result<Vec<UnmatchedFolder>> {
        Ok(self.store.list_unmatched(status).await?)
    }

    pub async fn set_unmatched_status(&self, path: &str, status: UnmatchedStatus) -> Result<()> {
        if !self.store.set_unmatched_status(path, status).await? {
            return Err(VaultError::NotFound(format!("unmatched folder {}", path)));
        }
        Ok(())
    }

    pub async fn delete_unmatched(&self, path: &str) -> Result<()> {
        if !self.store.delete_unmatched(path).await? {
            return Err(VaultError::NotFound(format!("unmatched folder {}", path)));
        }
        Ok(())
    }

    pub async fn clear_unmatched(&self) -> Result<u64> {
        Ok(self.store.clear_unmatched().await?)
    }
}

/// Write `seed` into a store that has never been seeded. After the first
/// start the table belongs to administrative add and remove, so a removed
/// default stays removed. A table that already holds tags is kept as is.
async fn seed_release_groups(store: &dyn Store, seed: &[ReleaseGroupPattern]) -> Result<u64> {
    if store.release_groups_seeded().await? {
        return Ok(0);
    }
    let mut added = 0;
    if store.list_release_groups().await?.is_empty() {
        for pattern in seed {
            if store.add_release_group(pattern).await? {
                added += 1;
            }
        }
        tracing::info!(added, "seeded release groups");
    }
    store.mark_release_groups_seeded().await?;
    Ok(added)
}
