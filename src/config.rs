//! TOML configuration parsing.
//!
//! `gv` reads one configuration file (default `./config/gv.toml`). Every
//! section except `[db]` is optional and falls back to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/gv.sqlite"
//!
//! [library]
//! exclude_globs = ["$RECYCLE.BIN", "System Volume Information"]
//! skip_hidden = true
//!
//! [[release_groups]]
//! tag = "PROPHET"
//! case_sensitive = true
//!
//! [jobs]
//! max_concurrent = 4
//! orphan_timeout_secs = 120
//!
//! [downloads]
//! dir = "./data/downloads"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use game_vault_core::models::ReleaseGroupPattern;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    /// Seed entries for the release-group catalog, applied on the first
    /// start against a database. `None` seeds the built-in default list.
    #[serde(default)]
    pub release_groups: Option<Vec<ReleaseGroupPattern>>,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    /// Glob patterns matched against subfolder names; matches are not scanned.
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub skip_hidden: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            exclude_globs: default_exclude_globs(),
            skip_hidden: true,
        }
    }
}

fn default_exclude_globs() -> Vec<String> {
    vec![
        "$RECYCLE.BIN".to_string(),
        "System Volume Information".to_string(),
    ]
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExtractorConfig {
    /// Extra noise tokens stripped from the end of folder names.
    #[serde(default)]
    pub extra_noise: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_orphan_timeout")]
    pub orphan_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            orphan_timeout_secs: default_orphan_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    16
}
fn default_heartbeat_interval() -> u64 {
    5
}
fn default_orphan_timeout() -> u64 {
    120
}
fn default_sweep_interval() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Deflated,
    Stored,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadsConfig {
    #[serde(default = "default_downloads_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub compression: Compression,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            dir: default_downloads_dir(),
            compression: Compression::default(),
        }
    }
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("./data/downloads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    /// `none` or `http`.
    #[serde(default = "default_metadata_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_metadata_timeout")]
    pub timeout_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            provider: default_metadata_provider(),
            endpoint: None,
            timeout_secs: default_metadata_timeout(),
        }
    }
}

fn default_metadata_provider() -> String {
    "none".to_string()
}
fn default_metadata_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// A configuration with every default and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            library: LibraryConfig::default(),
            extractor: ExtractorConfig::default(),
            release_groups: None,
            jobs: JobsConfig::default(),
            downloads: DownloadsConfig::default(),
            metadata: MetadataConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Release groups to seed into a fresh database.
    pub fn seed_release_groups(&self) -> Vec<ReleaseGroupPattern> {
        self.release_groups
            .clone()
            .unwrap_or_else(game_vault_core::models::default_release_groups)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate jobs
    if config.jobs.max_concurrent == 0 {
        anyhow::bail!("jobs.max_concurrent must be > 0");
    }
    if config.jobs.heartbeat_interval_secs == 0 {
        anyhow::bail!("jobs.heartbeat_interval_secs must be > 0");
    }
    if config.jobs.orphan_timeout_secs == 0 {
        anyhow::bail!("jobs.orphan_timeout_secs must be > 0");
    }
    if config.jobs.orphan_timeout_secs <= config.jobs.heartbeat_interval_secs {
        anyhow::bail!(
            "jobs.orphan_timeout_secs ({}) must exceed jobs.heartbeat_interval_secs ({})",
            config.jobs.orphan_timeout_secs,
            config.jobs.heartbeat_interval_secs
        );
    }
    if config.jobs.sweep_interval_secs == 0 {
        anyhow::bail!("jobs.sweep_interval_secs must be > 0");
    }

    // Validate library globs up front so a typo fails at startup
    for pattern in &config.library.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid library.exclude_globs pattern: '{}'", pattern))?;
    }

    // Validate metadata
    match config.metadata.provider.as_str() {
        "none" => {}
        "http" => {
            if config.metadata.endpoint.is_none() {
                anyhow::bail!("metadata.endpoint must be specified when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown metadata provider: '{}'. Must be none or http.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"/tmp/gv.sqlite\"\n").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.jobs.max_concurrent, 4);
        assert_eq!(config.jobs.orphan_timeout_secs, 120);
        assert_eq!(config.downloads.compression, Compression::Deflated);
        assert!(config.library.skip_hidden);
        assert_eq!(config.seed_release_groups().len(), 19);
    }

    #[test]
    fn release_groups_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "/tmp/gv.sqlite"

            [[release_groups]]
            tag = "RUNE"

            [[release_groups]]
            tag = "PROPHET"
            case_sensitive = true
            "#,
        )
        .unwrap();
        let seed = config.seed_release_groups();
        assert_eq!(seed.len(), 2);
        assert!(!seed[0].case_sensitive);
        assert!(seed[1].case_sensitive);
    }

    #[test]
    fn rejects_timeout_not_exceeding_heartbeat() {
        let mut config = Config::with_db_path("/tmp/gv.sqlite");
        config.jobs.heartbeat_interval_secs = 10;
        config.jobs.orphan_timeout_secs = 10;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn http_provider_requires_endpoint() {
        let mut config = Config::with_db_path("/tmp/gv.sqlite");
        config.metadata.provider = "http".to_string();
        assert!(validate(&config).is_err());
        config.metadata.endpoint = Some("http://localhost:9000/lookup".to_string());
        assert!(validate(&config).is_ok());
    }
}
