//! Turns matches into catalogued games.
//!
//! Identity (`full_disk_path`, `external_id`) is enforced by the store in
//! the same atomic insert; the registrar only translates the outcome. A
//! rejected registration leaves the unmatched store untouched, so the
//! caller decides what happens to the folder next.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use game_vault_core::models::{ExternalRecord, Game, InsertGame};
use game_vault_core::store::{NewGame, Store};

use crate::error::{DuplicateReason, Result, VaultError};
use crate::scanner::Match;

/// Whether a path can be catalogued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathAvailability {
    pub exists_on_disk: bool,
    pub registered_game_id: Option<String>,
}

pub struct GameRegistrar {
    store: Arc<dyn Store>,
}

impl GameRegistrar {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist `m` as a new game, with `record` metadata when available.
    ///
    /// On success any unmatched row for the same path is removed.
    pub async fn register(&self, m: &Match, record: Option<&ExternalRecord>) -> Result<Game> {
        let size_bytes = dir_size(Path::new(&m.path)).await;
        let game = NewGame {
            external_id: record.map(|r| r.id.clone()),
            full_disk_path: m.path.clone(),
            canonical_title: m.title.clone(),
            summary: record.and_then(|r| r.summary.clone()),
            url: record.and_then(|r| r.url.clone()),
            release_year: record.and_then(|r| r.release_year),
            size_bytes,
        };

        let now = chrono::Utc::now().timestamp();
        match self.store.insert_game(&game, now).await? {
            InsertGame::Inserted(game) => {
                self.store.delete_unmatched(&game.full_disk_path).await?;
                tracing::info!(target: "scan::jobs", game_id = %game.id, path = %game.full_disk_path, title = %game.canonical_title, "registered game");
                Ok(game)
            }
            InsertGame::DuplicatePath { existing_id } => Err(VaultError::DuplicateGame {
                reason: DuplicateReason::Path,
                existing_id,
            }),
            InsertGame::DuplicateExternalId { existing_id } => Err(VaultError::DuplicateGame {
                reason: DuplicateReason::ExternalId,
                existing_id,
            }),
        }
    }

    /// Manually register an unmatched folder with operator-supplied
    /// metadata. `title` overrides the record's title.
    pub async fn resolve_unmatched(
        &self,
        path: &str,
        record: &ExternalRecord,
        title: Option<&str>,
    ) -> Result<Game> {
        if self.store.get_unmatched(path).await?.is_none() {
            return Err(VaultError::NotFound(format!("unmatched folder {}", path)));
        }
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&record.title);
        if title.trim().is_empty() {
            return Err(VaultError::InvalidState(
                "a title is required to resolve a folder".to_string(),
            ));
        }

        let m = Match {
            title: title.trim().to_string(),
            path: path.to_string(),
            release_groups: Vec::new(),
        };
        self.register(&m, Some(record)).await
    }

    /// Delete a game, its download requests and their artifacts.
    pub async fn remove_game(&self, id: &str) -> Result<Game> {
        let game = self
            .store
            .get_game(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("game {}", id)))?;
        let Some(downloads) = self.store.delete_game(id).await? else {
            return Err(VaultError::NotFound(format!("game {}", id)));
        };

        for download in downloads {
            if let Some(artifact) = &download.artifact_path {
                remove_artifact(Path::new(artifact)).await;
            }
        }
        tracing::info!(game_id = %game.id, path = %game.full_disk_path, "removed game");
        Ok(game)
    }

    pub async fn path_availability(&self, path: &str) -> Result<PathAvailability> {
        let exists_on_disk = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let registered_game_id = self.store.find_game_by_path(path).await?.map(|g| g.id);
        Ok(PathAvailability {
            exists_on_disk,
            registered_game_id,
        })
    }
}

/// Delete an artifact file, ignoring one that is already gone.
pub(crate) async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact");
        }
    }
}

/// Total size of the regular files under `path`. Unreadable entries are
/// skipped.
pub async fn dir_size(path: &Path) -> u64 {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    })
    .await
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_vault_core::models::UnmatchedStatus;
    use game_vault_core::store::memory::InMemoryStore;

    fn record(id: &str) -> ExternalRecord {
        ExternalRecord {
            id: id.into(),
            title: "Crysis 3".into(),
            summary: Some("A shooter".into()),
            url: None,
            release_year: Some(2013),
        }
    }

    fn matched(path: &str) -> Match {
        Match {
            title: "Crysis 3".into(),
            path: path.into(),
            release_groups: vec!["RELOADED".into()],
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_path_and_external_id() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let registrar = GameRegistrar::new(store.clone());

        let game = registrar
            .register(&matched("/g/Crysis.3-RELOADED"), Some(&record("42")))
            .await
            .unwrap();
        assert_eq!(game.external_id.as_deref(), Some("42"));
        assert_eq!(game.release_year, Some(2013));

        let err = registrar
            .register(&matched("/g/Crysis.3-RELOADED"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::DuplicateGame { reason: DuplicateReason::Path, ref existing_id } if *existing_id == game.id
        ));

        let err = registrar
            .register(&matched("/g/Crysis.3.REPACK-FLT"), Some(&record("42")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::DuplicateGame {
                reason: DuplicateReason::ExternalId,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejected_registration_leaves_unmatched_row() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let registrar = GameRegistrar::new(store.clone());
        registrar
            .register(&matched("/g/a"), Some(&record("42")))
            .await
            .unwrap();

        store.upsert_unmatched("/g/b", 5).await.unwrap();
        store
            .set_unmatched_status("/g/b", UnmatchedStatus::Ignored)
            .await
            .unwrap();
        assert!(registrar
            .resolve_unmatched("/g/b", &record("42"), None)
            .await
            .is_err());

        let row = store.get_unmatched("/g/b").await.unwrap().unwrap();
        assert_eq!(row.status, UnmatchedStatus::Ignored);
        assert_eq!(row.first_seen_at, 5);
    }

    #[tokio::test]
    async fn resolving_removes_unmatched_row() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let registrar = GameRegistrar::new(store.clone());
        store.upsert_unmatched("/g/randomfolder123", 1).await.unwrap();

        let game = registrar
            .resolve_unmatched("/g/randomfolder123", &record("7"), Some("Random Game"))
            .await
            .unwrap();
        assert_eq!(game.canonical_title, "Random Game");
        assert!(store.get_unmatched("/g/randomfolder123").await.unwrap().is_none());

        let err = registrar
            .resolve_unmatched("/g/nope", &record("8"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn dir_size_sums_nested_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("data/sub")).unwrap();
        std::fs::write(tmp.path().join("game.exe"), vec![0u8; 100]).unwrap();
        std::fs::write(tmp.path().join("data/sub/pak0.pak"), vec![0u8; 23]).unwrap();
        assert_eq!(dir_size(tmp.path()).await, 123);
    }
}
