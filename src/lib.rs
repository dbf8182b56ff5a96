//! # Game Vault
//!
//! Catalogs an on-disk game collection. Folders under a library root are
//! scanned, release-group and noise tokens are stripped from their names
//! to recover canonical titles, and each scan runs as a durable, pollable
//! job. A catalogued game can later be packaged into a zip archive through
//! its own tracked download job.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ FolderScanner│──▶│ GameRegistrar│──▶│    SQLite    │
//! │ NameExtractor│   │  + metadata  │   │ games / jobs │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!        ▲                                     │
//!        │            ┌────────────────────────┤
//!   ScanJobTracker    ▼                        ▼
//!   DownloadTracker ┌──────────┐         ┌──────────┐
//!   (worker pool)   │   CLI    │         │   HTTP   │
//!                   │   (gv)   │         │  (axum)  │
//!                   └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gv init                           # create database, seed release groups
//! gv scan preview /mnt/games        # classify without writing
//! gv scan start /mnt/games          # run a tracked scan
//! gv unmatched list                 # folders that need a manual title
//! gv download request alice <game>  # build a zip archive
//! gv serve                          # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`vault`] | One-time startup and wiring |
//! | [`scanner`] | Folder classification |
//! | [`registrar`] | Game registration and removal |
//! | [`scan_jobs`] | Durable scan jobs |
//! | [`downloads`] | Durable download jobs |
//! | [`packager`] | Zip archive builder |
//! | [`reconcile`] | Orphaned job sweep |
//! | [`pool`] | Bounded worker pool |
//! | [`server`] | HTTP server |
//! | [`sqlite_store`] | SQLite [`Store`](game_vault_core::store::Store) |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod downloads;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod migrate;
pub mod packager;
pub mod pool;
pub mod reconcile;
pub mod registrar;
pub mod scan_jobs;
pub mod scanner;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod vault;

pub use error::{Result, VaultError};
pub use vault::Vault;
