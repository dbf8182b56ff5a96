//! One-level folder scanner.
//!
//! [`FolderScanner::scan`] enumerates the immediate subdirectories of a
//! library root and classifies each one:
//!
//! | Class | Condition | Effect (record mode) |
//! |-------|-----------|----------------------|
//! | already known | path equals a stored `Game.full_disk_path` | counted as skipped |
//! | matched | the extractor names it confidently | returned as a [`Match`] |
//! | unmatched | no confident title | upserted into the unmatched store |
//! | error | entry-level I/O failure | counted and logged, scan continues |
//!
//! Only failing to open the root itself is fatal. Registration of the
//! matches is left to the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use game_vault_core::models::{DuplicateTitle, ScanSummary};
use game_vault_core::store::Store;
use game_vault_core::NameExtractor;

use crate::config::LibraryConfig;
use crate::error::{Result, VaultError};

/// Whether the scan writes unmatched folders to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Record,
    /// Classify only; nothing is written.
    Preview,
}

/// A folder the extractor named confidently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub title: String,
    pub path: String,
    /// Release-group tags stripped from the folder name.
    pub release_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryError {
    pub path: String,
    pub message: String,
}

/// Everything one pass over a root produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub summary: ScanSummary,
    pub matches: Vec<Match>,
    pub known: Vec<String>,
    pub unmatched: Vec<String>,
    pub errors: Vec<EntryError>,
    pub duplicates: Vec<DuplicateTitle>,
}

pub struct FolderScanner {
    extractor: Arc<NameExtractor>,
    store: Arc<dyn Store>,
    excludes: GlobSet,
    skip_hidden: bool,
}

impl FolderScanner {
    pub fn new(
        extractor: Arc<NameExtractor>,
        store: Arc<dyn Store>,
        library: &LibraryConfig,
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &library.exclude_globs {
            let glob = Glob::new(pattern).map_err(|e| {
                VaultError::Configuration(format!("invalid exclude glob '{}': {}", pattern, e))
            })?;
            builder.add(glob);
        }
        let excludes = builder
            .build()
            .map_err(|e| VaultError::Configuration(format!("invalid exclude globs: {}", e)))?;

        Ok(Self {
            extractor,
            store,
            excludes,
            skip_hidden: library.skip_hidden,
        })
    }

    pub fn extractor(&self) -> &NameExtractor {
        &self.extractor
    }

    /// Scan the immediate subdirectories of `root`.
    ///
    /// Returns [`VaultError::Filesystem`] when `root` cannot be enumerated
    /// and [`VaultError::Cancelled`] when `cancel` fires between entries.
    pub async fn scan(
        &self,
        root: &Path,
        mode: ScanMode,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let folders = self.list_subfolders(root, &mut report).await?;

        for (name, path) in folders {
            if cancel.is_cancelled() {
                return Err(VaultError::Cancelled);
            }
            self.classify(&name, &path, mode, &mut report).await;
        }

        report.duplicates = find_duplicates(&report.matches);
        report.summary.matched_count = report.matches.len() as u64;
        report.summary.unmatched_count = report.unmatched.len() as u64;
        report.summary.skipped_count = report.known.len() as u64;
        report.summary.error_count = report.errors.len() as u64;

        tracing::debug!(
            target: "scan::jobs",
            root = %root.display(),
            matched = report.summary.matched_count,
            unmatched = report.summary.unmatched_count,
            skipped = report.summary.skipped_count,
            errors = report.summary.error_count,
            "folder scan finished"
        );
        Ok(report)
    }

    /// Directory children of `root` as `(name, path)`, sorted by name.
    async fn list_subfolders(
        &self,
        root: &Path,
        report: &mut ScanReport,
    ) -> Result<Vec<(String, String)>> {
        let mut dir = tokio::fs::read_dir(root)
            .await
            .map_err(|e| VaultError::filesystem(root, e))?;

        let mut folders = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    // The iterator cannot be trusted after a read error.
                    tracing::warn!(target: "scan::jobs", root = %root.display(), error = %e, "directory enumeration stopped early");
                    report.errors.push(EntryError {
                        path: root.display().to_string(),
                        message: e.to_string(),
                    });
                    break;
                }
            };

            let path: PathBuf = entry.path();
            let file_name = entry.file_name();
            let (Some(name), Some(path_str)) = (file_name.to_str(), path.to_str()) else {
                tracing::warn!(target: "scan::jobs", path = %path.display(), "skipping entry with a non UTF-8 name");
                report.errors.push(EntryError {
                    path: path.display().to_string(),
                    message: "name is not valid UTF-8".to_string(),
                });
                continue;
            };
            let (name, path_str) = (name.to_string(), path_str.to_string());

            if self.skip_hidden && name.starts_with('.') {
                continue;
            }
            if self.excludes.is_match(&name) {
                continue;
            }

            // Follows symlinks, so a dangling link surfaces here.
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => folders.push((name, path_str)),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "scan::jobs", path = %path.display(), error = %e, "skipping entry due to metadata error");
                    report.errors.push(EntryError {
                        path: path_str,
                        message: e.to_string(),
                    });
                }
            }
        }

        folders.sort();
        Ok(folders)
    }

    async fn classify(&self, name: &str, path: &str, mode: ScanMode, report: &mut ScanReport) {
        match self.store.find_game_by_path(path).await {
            Ok(Some(_)) => {
                report.known.push(path.to_string());
                return;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(target: "scan::jobs", path, error = %e, "known-game lookup failed");
                report.errors.push(EntryError {
                    path: path.to_string(),
                    message: e.to_string(),
                });
                return;
            }
        }

        let extraction = self.extractor.analyze(name);
        if extraction.is_confident() {
            if let Some(title) = extraction.title {
                report.matches.push(Match {
                    title,
                    path: path.to_string(),
                    release_groups: extraction.release_groups,
                });
                return;
            }
        }

        if mode == ScanMode::Record {
            let now = chrono::Utc::now().timestamp();
            if let Err(e) = self.store.upsert_unmatched(path, now).await {
                tracing::warn!(target: "scan::jobs", path, error = %e, "failed to record unmatched folder");
                report.errors.push(EntryError {
                    path: path.to_string(),
                    message: e.to_string(),
                });
                return;
            }
        }
        report.unmatched.push(path.to_string());
    }
}

/// Group matches whose titles are equal ignoring case. Only groups with
/// more than one path are returned, in first-seen order.
pub fn find_duplicates(matches: &[Match]) -> Vec<DuplicateTitle> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, DuplicateTitle> = HashMap::new();

    for m in matches {
        let key = m.title.to_lowercase();
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            DuplicateTitle {
                title: m.title.clone(),
                paths: Vec::new(),
            }
        });
        group.paths.push(m.path.clone());
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .filter(|g| g.paths.len() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_vault_core::models::{default_release_groups, ReleaseGroupPattern, UnmatchedStatus};
    use game_vault_core::store::memory::InMemoryStore;
    use game_vault_core::store::NewGame;
    use game_vault_core::PatternCatalog;

    fn scanner(store: Arc<dyn Store>, groups: Vec<ReleaseGroupPattern>) -> FolderScanner {
        let catalog = Arc::new(PatternCatalog::new(groups).unwrap());
        FolderScanner::new(
            Arc::new(NameExtractor::new(catalog)),
            store,
            &LibraryConfig::default(),
        )
        .unwrap()
    }

    fn library(names: &[&str]) -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        for name in names {
            std::fs::create_dir_all(tmp.path().join(name)).unwrap();
        }
        tmp
    }

    #[tokio::test]
    async fn classifies_subfolders() {
        let tmp = library(&[
            "Crysis.3-RELOADED",
            "Bioshock.Infinite.PROPER-SKIDROW",
            "randomfolder123",
        ]);
        std::fs::write(tmp.path().join("readme.txt"), "not a folder").unwrap();

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let scanner = scanner(store.clone(), default_release_groups());
        let report = scanner
            .scan(tmp.path(), ScanMode::Record, &CancellationToken::new())
            .await
            .unwrap();

        let titles: Vec<_> = report.matches.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Bioshock Infinite", "Crysis 3"]);
        assert_eq!(report.summary.unmatched_count, 1);
        assert_eq!(report.summary.error_count, 0);

        let unmatched = store.list_unmatched(None).await.unwrap();
        assert_eq!(unmatched.len(), 1);
        assert!(unmatched[0].path.ends_with("randomfolder123"));
        assert_eq!(unmatched[0].status, UnmatchedStatus::Pending);
    }

    #[tokio::test]
    async fn preview_writes_nothing() {
        let tmp = library(&["randomfolder123"]);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let report = scanner(store.clone(), default_release_groups())
            .scan(tmp.path(), ScanMode::Preview, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.unmatched.len(), 1);
        assert!(store.list_unmatched(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn known_paths_are_skipped() {
        let tmp = library(&["Crysis.3-RELOADED"]);
        let path = tmp.path().join("Crysis.3-RELOADED");
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        store
            .insert_game(
                &NewGame {
                    external_id: None,
                    full_disk_path: path.to_str().unwrap().to_string(),
                    canonical_title: "Crysis 3".into(),
                    summary: None,
                    url: None,
                    release_year: None,
                    size_bytes: 0,
                },
                1,
            )
            .await
            .unwrap();

        let report = scanner(store, default_release_groups())
            .scan(tmp.path(), ScanMode::Record, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.summary.skipped_count, 1);
        assert!(report.matches.is_empty());
    }

    #[tokio::test]
    async fn hidden_and_excluded_folders_are_ignored() {
        let tmp = library(&[".cache", "$RECYCLE.BIN", "Doom.2016-CODEX"]);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let report = scanner(store, default_release_groups())
            .scan(tmp.path(), ScanMode::Preview, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.matches.len(), 1);
        assert!(report.unmatched.is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let err = scanner(store, default_release_groups())
            .scan(
                Path::new("/definitely/not/here"),
                ScanMode::Record,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Filesystem { .. }));
    }

    #[tokio::test]
    async fn cancelled_between_folders() {
        let tmp = library(&["Crysis.3-RELOADED"]);
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let token = CancellationToken::new();
        token.cancel();
        let err = scanner(store, default_release_groups())
            .scan(tmp.path(), ScanMode::Record, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Cancelled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dangling_symlink_counts_as_error() {
        let tmp = library(&["Crysis.3-RELOADED"]);
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("Broken-CODEX"))
            .unwrap();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let report = scanner(store, default_release_groups())
            .scan(tmp.path(), ScanMode::Record, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.summary.error_count, 1);
        assert_eq!(report.summary.matched_count, 1);
    }

    #[test]
    fn duplicate_titles_are_flagged() {
        let m = |title: &str, path: &str| Match {
            title: title.into(),
            path: path.into(),
            release_groups: vec![],
        };
        let dups = find_duplicates(&[
            m("Doom", "/a/Doom-CODEX"),
            m("Hitman", "/a/Hitman-PLAZA"),
            m("DOOM", "/a/DOOM-FLT"),
        ]);
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].title, "Doom");
        assert_eq!(dups[0].paths, vec!["/a/Doom-CODEX", "/a/DOOM-FLT"]);
    }
}
