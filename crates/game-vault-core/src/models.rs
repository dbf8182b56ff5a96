//! Core data models used throughout Game Vault.
//!
//! These types mirror the durable rows kept by a [`Store`](crate::store::Store):
//! release-group patterns, catalogued games, unmatched folders, scan jobs
//! and download requests. Timestamps are unix seconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A known release-group tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseGroupPattern {
    pub tag: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl ReleaseGroupPattern {
    pub fn new(tag: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            tag: tag.into(),
            case_sensitive,
        }
    }

    /// Case-insensitive tag.
    pub fn insensitive(tag: impl Into<String>) -> Self {
        Self::new(tag, false)
    }

    /// Case-sensitive tag.
    pub fn sensitive(tag: impl Into<String>) -> Self {
        Self::new(tag, true)
    }
}

/// The release groups seeded into a fresh database when the configuration
/// does not provide its own list.
pub fn default_release_groups() -> Vec<ReleaseGroupPattern> {
    [
        ("RAZOR", false),
        ("FLT", false),
        ("SKIDROW", false),
        ("CODEX", false),
        ("PLAZA", false),
        ("RELOADED", false),
        ("HOODLUM", false),
        ("CPY", false),
        ("FAIRLIGHT", false),
        ("HI2U", false),
        ("TiNYiSO", false),
        ("DARKSiDERS", false),
        ("Teke", false),
        ("Kw", false),
        ("PROPHET", true),
        ("GOG", false),
        ("RUNE", false),
        ("Empress", false),
        ("Deviance", false),
    ]
    .into_iter()
    .map(|(tag, cs)| ReleaseGroupPattern::new(tag, cs))
    .collect()
}

/// Error returned when parsing a status string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: '{value}'")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseStatusError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

status_enum!(
    /// Lifecycle of a [`ScanJob`]: `Queued → Running → Completed | Failed`.
    ScanStatus, "scan" {
        Queued => "queued",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
);

status_enum!(
    /// Operator-facing state of an [`UnmatchedFolder`].
    UnmatchedStatus, "unmatched folder" {
        Pending => "pending",
        Ignored => "ignored",
        Resolved => "resolved",
    }
);

status_enum!(
    /// Lifecycle of a [`DownloadRequest`]: `Processing → Available | Error`.
    DownloadStatus, "download" {
        Processing => "processing",
        Available => "available",
        Error => "error",
    }
);

impl ScanStatus {
    /// Queued and Running jobs hold the per-root single-flight slot.
    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Queued | ScanStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadStatus::Processing)
    }
}

/// Counts produced by one folder scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub matched_count: u64,
    pub unmatched_count: u64,
    pub skipped_count: u64,
    pub error_count: u64,
}

/// Two or more scanned folders that produced the same canonical title
/// (compared case-insensitively). Both are kept; this is surfaced to the
/// operator only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateTitle {
    pub title: String,
    pub paths: Vec<String>,
}

/// One durable, pollable execution of the folder scanner over a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: String,
    pub root_path: String,
    pub status: ScanStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub heartbeat_at: i64,
    pub summary: ScanSummary,
    pub duplicates: Vec<DuplicateTitle>,
    pub error_message: Option<String>,
}

/// Terminal outcome written onto a running [`ScanJob`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Completed {
        summary: ScanSummary,
        duplicates: Vec<DuplicateTitle>,
    },
    Failed {
        message: String,
    },
}

/// A scanned directory for which no canonical title could be confidently
/// derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedFolder {
    pub path: String,
    pub first_seen_at: i64,
    pub status: UnmatchedStatus,
}

/// Metadata record returned by an external lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub release_year: Option<i32>,
}

/// A catalogued game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub external_id: Option<String>,
    pub full_disk_path: String,
    pub canonical_title: String,
    pub summary: Option<String>,
    pub url: Option<String>,
    pub release_year: Option<i32>,
    pub size_bytes: u64,
    pub created_at: i64,
}

/// Result of an atomic game insert. The identity columns are unique, so
/// the store reports which one an insert collided with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertGame {
    Inserted(Game),
    DuplicatePath { existing_id: String },
    DuplicateExternalId { existing_id: String },
}

/// Result of an insert guarded by an in-flight uniqueness rule
/// (one active scan per root, one processing download per requester).
#[derive(Debug, Clone, PartialEq)]
pub enum Created<T> {
    Created(T),
    Conflict { existing_id: String },
}

/// A request to package one game into a downloadable archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub id: String,
    pub requester_id: String,
    pub game_id: String,
    pub status: DownloadStatus,
    pub artifact_path: Option<String>,
    pub artifact_size: Option<u64>,
    pub artifact_sha256: Option<String>,
    pub error_cause: Option<String>,
    pub created_at: i64,
    pub heartbeat_at: i64,
    pub finished_at: Option<i64>,
}

/// A successfully built archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// Sort order for [`GameFilter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameSort {
    #[default]
    Title,
    Newest,
    Largest,
}

/// Every supported filter for listing games. Fields left `None` do not
/// constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameFilter {
    /// Case-insensitive substring of the canonical title.
    pub title_contains: Option<String>,
    /// `Some(true)` keeps only games with external metadata, `Some(false)` only those without.
    pub has_external_id: Option<bool>,
    pub min_size_bytes: Option<u64>,
    pub max_size_bytes: Option<u64>,
    /// Only games whose path starts with this prefix.
    pub path_prefix: Option<String>,
    pub sort: GameSort,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl GameFilter {
    /// Whether `game` passes every predicate (sorting and paging aside).
    pub fn matches(&self, game: &Game) -> bool {
        if let Some(needle) = &self.title_contains {
            if !game
                .canonical_title
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(want) = self.has_external_id {
            if game.external_id.is_some() != want {
                return false;
            }
        }
        if let Some(min) = self.min_size_bytes {
            if game.size_bytes < min {
                return false;
            }
        }
        if let Some(max) = self.max_size_bytes {
            if game.size_bytes > max {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !game.full_disk_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts for `gv stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub games: u64,
    pub total_size_bytes: u64,
    pub unmatched: Vec<(UnmatchedStatus, u64)>,
    pub scan_jobs: Vec<(ScanStatus, u64)>,
    pub downloads: Vec<(DownloadStatus, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            ScanStatus::Queued,
            ScanStatus::Running,
            ScanStatus::Completed,
            ScanStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<ScanStatus>().unwrap(), s);
        }
        assert_eq!(
            "Ignored".parse::<UnmatchedStatus>().unwrap(),
            UnmatchedStatus::Ignored
        );
        assert!("bogus".parse::<DownloadStatus>().is_err());
    }

    #[test]
    fn filter_predicates() {
        let game = Game {
            id: "g1".into(),
            external_id: None,
            full_disk_path: "/games/Crysis.3-RELOADED".into(),
            canonical_title: "Crysis 3".into(),
            summary: None,
            url: None,
            release_year: None,
            size_bytes: 2048,
            created_at: 0,
        };

        assert!(GameFilter::default().matches(&game));
        let by_title = GameFilter {
            title_contains: Some("crysis".into()),
            ..Default::default()
        };
        assert!(by_title.matches(&game));
        let with_meta = GameFilter {
            has_external_id: Some(true),
            ..Default::default()
        };
        assert!(!with_meta.matches(&game));
        let too_small = GameFilter {
            min_size_bytes: Some(4096),
            ..Default::default()
        };
        assert!(!too_small.matches(&game));
        let other_root = GameFilter {
            path_prefix: Some("/other".into()),
            ..Default::default()
        };
        assert!(!other_root.matches(&game));
    }

    #[test]
    fn default_catalog_has_one_case_sensitive_tag() {
        let groups = default_release_groups();
        let sensitive: Vec<_> = groups.iter().filter(|g| g.case_sensitive).collect();
        assert_eq!(sensitive.len(), 1);
        assert_eq!(sensitive[0].tag, "PROPHET");
    }
}
