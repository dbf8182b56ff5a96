//! Folder-name to canonical-title extraction.
//!
//! Release folders carry the game's title followed by a tail of markers:
//! the release group, edition/quality words, versions and language codes.
//! [`NameExtractor`] strips that tail and returns the human-readable
//! title.
//!
//! # Algorithm
//!
//! 1. Tokenize on runs of non-alphanumeric characters. Version numbers
//!    such as `v1.2.3` or `1.0.4` stay one token.
//! 2. Detect release-group tags over the original string with the
//!    [`PatternCatalog`].
//! 3. Walk tokens from the end, dropping each token that is exactly a
//!    detected tag or belongs to the noise vocabulary. Stop at the first
//!    token that is neither.
//! 4. Join the remaining tokens with single spaces.
//! 5. An empty result means no title could be recovered.
//!
//! Steps 1-4 are repeated on their own output until nothing changes, so
//! `extract(extract(x)) == extract(x)` holds for every accepted input.
//!
//! ```rust
//! use std::sync::Arc;
//! use game_vault_core::catalog::PatternCatalog;
//! use game_vault_core::extract::NameExtractor;
//! use game_vault_core::models::ReleaseGroupPattern;
//!
//! let catalog = PatternCatalog::new(vec![ReleaseGroupPattern::insensitive("RELOADED")]).unwrap();
//! let extractor = NameExtractor::new(Arc::new(catalog));
//! assert_eq!(extractor.extract("Crysis.3-RELOADED").as_deref(), Some("Crysis 3"));
//! ```

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::catalog::PatternCatalog;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:v?\d+(?:\.\d+)+\b)|[\p{L}\p{N}]+").expect("token regex is valid")
});

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:v\d+(?:\.\d+)*|\d+(?:\.\d+)+)$").expect("version regex is valid"));

static RESOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d{3,4}p$").expect("resolution regex is valid"));

static MULTI_LANGUAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^multi\d*$").expect("multi regex is valid"));

/// Edition, quality and language markers that never end a real title.
const NOISE_WORDS: &[&str] = &[
    // edition / release markers
    "REPACK",
    "PROPER",
    "REMASTERED",
    "INTERNAL",
    "READNFO",
    "NFOFIX",
    "CRACKFIX",
    "DRMFREE",
    "UNCUT",
    // language codes
    "EN",
    "ENG",
    "FR",
    "FRE",
    "DE",
    "GER",
    "ES",
    "SPA",
    "IT",
    "ITA",
    "RU",
    "RUS",
    "PL",
    "POL",
    "JP",
    "JPN",
];

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

fn tokenize(raw: &str) -> Vec<Token<'_>> {
    TOKEN
        .find_iter(raw)
        .map(|m| Token {
            text: m.as_str(),
            start: m.start(),
            end: m.end(),
        })
        .collect()
}

/// Outcome of [`NameExtractor::analyze`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extraction {
    /// The canonical title, or `None` when every token was stripped.
    pub title: Option<String>,
    /// Release-group tokens removed from the tail, innermost last.
    pub release_groups: Vec<String>,
    /// Noise tokens removed from the tail.
    pub noise: Vec<String>,
}

impl Extraction {
    /// A title was recovered and at least one marker was stripped to get it.
    ///
    /// Folder names carrying no recognisable marker are not trusted as
    /// titles; the scanner routes them to the unmatched store.
    pub fn is_confident(&self) -> bool {
        self.title.is_some() && (!self.release_groups.is_empty() || !self.noise.is_empty())
    }
}

struct Pass {
    kept: Vec<String>,
    release_groups: Vec<String>,
    noise: Vec<String>,
}

/// Turns raw folder names into canonical titles.
#[derive(Debug, Clone)]
pub struct NameExtractor {
    catalog: Arc<PatternCatalog>,
    noise: HashSet<String>,
}

impl NameExtractor {
    pub fn new(catalog: Arc<PatternCatalog>) -> Self {
        Self {
            catalog,
            noise: NOISE_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// Add words to the noise vocabulary (compared case-insensitively).
    pub fn with_extra_noise<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.noise.extend(
            words
                .into_iter()
                .map(|w| w.as_ref().trim().to_uppercase())
                .filter(|w| !w.is_empty()),
        );
        self
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    /// Canonical title for `raw`, or `None` if nothing is left after stripping.
    pub fn extract(&self, raw: &str) -> Option<String> {
        self.analyze(raw).title
    }

    /// Extract and report what was stripped.
    pub fn analyze(&self, raw: &str) -> Extraction {
        let mut extraction = Extraction::default();
        let mut current = raw.to_string();

        loop {
            let pass = self.strip_once(&current);
            extraction.release_groups.extend(pass.release_groups);
            extraction.noise.extend(pass.noise);

            if pass.kept.is_empty() {
                return extraction;
            }

            let next = pass.kept.join(" ");
            if next == current {
                extraction.title = Some(next);
                return extraction;
            }
            current = next;
        }
    }

    fn is_noise(&self, token: &str) -> bool {
        self.noise.contains(&token.to_uppercase())
            || VERSION.is_match(token)
            || RESOLUTION.is_match(token)
            || MULTI_LANGUAGE.is_match(token)
    }

    fn strip_once(&self, raw: &str) -> Pass {
        let tokens = tokenize(raw);
        let tags = self.catalog.match_tags(raw);

        let mut release_groups = Vec::new();
        let mut noise = Vec::new();
        let mut cut = tokens.len();

        while cut > 0 {
            let token = tokens[cut - 1];
            if tags
                .iter()
                .any(|t| t.start == token.start && t.end == token.end)
            {
                release_groups.push(token.text.to_string());
            } else if self.is_noise(token.text) {
                noise.push(token.text.to_string());
            } else {
                break;
            }
            cut -= 1;
        }

        Pass {
            kept: tokens[..cut].iter().map(|t| t.text.to_string()).collect(),
            release_groups,
            noise,
        }
    }
}
