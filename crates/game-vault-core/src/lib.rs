//! # Game Vault Core
//!
//! Shared logic for Game Vault: the data model, the release-group
//! [`catalog`], the folder-name [`extract`]or and the [`store`]
//! abstraction.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! runtime-specific dependencies. The native crate (`game-vault`) layers
//! the scanner, job trackers, SQLite store and servers on top of it.

pub mod catalog;
pub mod extract;
pub mod models;
pub mod store;

pub use catalog::{CatalogError, PatternCatalog, TagMatch};
pub use extract::{Extraction, NameExtractor};
