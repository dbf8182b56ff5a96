//! Error taxonomy for the native crate.
//!
//! Store methods return `anyhow::Result`; the job trackers, registrar and
//! servers speak [`VaultError`] so callers can tell a rejected request from
//! a broken backend without matching on message text.

use std::path::PathBuf;

use thiserror::Error;

use game_vault_core::CatalogError;

/// Which identity column a rejected game collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    Path,
    ExternalId,
}

impl std::fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateReason::Path => f.write_str("full_disk_path"),
            DuplicateReason::ExternalId => f.write_str("external_id"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VaultError {
    /// Malformed configuration or release-group catalog. Startup-fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("game already registered by {reason} (existing game {existing_id})")]
    DuplicateGame {
        reason: DuplicateReason,
        existing_id: String,
    },

    #[error("requester {requester_id} already has a download in progress ({existing_id})")]
    DuplicateDownloadRequest {
        requester_id: String,
        existing_id: String,
    },

    #[error("a scan of {root} is already in progress ({existing_id})")]
    ScanInFlight { root: String, existing_id: String },

    #[error("archive build failed: {0}")]
    ArchiveBuild(String),

    #[error("job {0} was orphaned")]
    OrphanedJob(String),

    #[error("worker pool is saturated, try again later")]
    Saturated,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<CatalogError> for VaultError {
    fn from(err: CatalogError) -> Self {
        VaultError::Configuration(err.to_string())
    }
}

impl VaultError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VaultError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
