//! Release-group tag catalog.
//!
//! A [`PatternCatalog`] holds the configured [`ReleaseGroupPattern`]s in
//! configuration order and finds their occurrences in a folder name.
//!
//! # Matching
//!
//! Every tag is searched as a literal substring of the input. A
//! case-sensitive tag must match byte-exact; a case-insensitive tag
//! matches after case folding of both sides. When matches overlap, the
//! longest span wins; equal lengths are broken by the tag that appears
//! first in the catalog. The surviving matches are returned in text
//! order.
//!
//! ```rust
//! use game_vault_core::catalog::PatternCatalog;
//! use game_vault_core::models::ReleaseGroupPattern;
//!
//! let catalog = PatternCatalog::new(vec![
//!     ReleaseGroupPattern::insensitive("RUNE"),
//!     ReleaseGroupPattern::insensitive("RUNELORD"),
//! ])
//! .unwrap();
//! let found = catalog.match_tags("Game.Title-RUNELORD");
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0].tag, "RUNELORD");
//! ```
//!
//! # Loading
//!
//! Duplicate tags are rejected when the catalog is built. Two entries
//! collide when their tags are equal under the rule of either entry:
//! folded comparison if either one is case-insensitive, byte-exact
//! comparison if both are case-sensitive. This is a startup-fatal
//! configuration error, never a per-scan error.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::models::ReleaseGroupPattern;

/// Malformed catalog configuration.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("release group tag must not be empty (entry #{index})")]
    EmptyTag { index: usize },

    #[error("duplicate release group tag '{tag}' (conflicts with '{existing}')")]
    DuplicateTag { tag: String, existing: String },

    #[error("invalid release group tag '{tag}': {source}")]
    InvalidPattern {
        tag: String,
        #[source]
        source: regex::Error,
    },
}

/// One detected tag occurrence. `start..end` is a byte range of the
/// scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
    /// The tag as configured in the catalog.
    pub tag: String,
    pub start: usize,
    pub end: usize,
}

impl TagMatch {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn overlaps(&self, other: &TagMatch) -> bool {
        self.start < other.end && other.start < self.end
    }
}

struct CompiledPattern {
    pattern: ReleaseGroupPattern,
    regex: Regex,
}

/// Immutable, validated set of release-group tags.
pub struct PatternCatalog {
    entries: Vec<CompiledPattern>,
}

impl std::fmt::Debug for PatternCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.pattern))
            .finish()
    }
}

fn collides(a: &ReleaseGroupPattern, b: &ReleaseGroupPattern) -> bool {
    if a.case_sensitive && b.case_sensitive {
        a.tag == b.tag
    } else {
        a.tag.to_lowercase() == b.tag.to_lowercase()
    }
}

/// Check a candidate tag against an existing list without compiling it.
///
/// Used by the administrative add operation so that a tag which would make
/// the next startup fail is refused up front.
pub fn find_collision<'a>(
    existing: &'a [ReleaseGroupPattern],
    candidate: &ReleaseGroupPattern,
) -> Option<&'a ReleaseGroupPattern> {
    existing.iter().find(|e| collides(e, candidate))
}

impl PatternCatalog {
    /// Build a catalog, preserving configuration order.
    pub fn new(patterns: Vec<ReleaseGroupPattern>) -> Result<Self, CatalogError> {
        let mut entries: Vec<CompiledPattern> = Vec::with_capacity(patterns.len());

        for (index, pattern) in patterns.into_iter().enumerate() {
            let tag = pattern.tag.trim();
            if tag.is_empty() {
                return Err(CatalogError::EmptyTag { index });
            }
            let pattern = ReleaseGroupPattern::new(tag, pattern.case_sensitive);

            if let Some(existing) = entries.iter().find(|e| collides(&e.pattern, &pattern)) {
                return Err(CatalogError::DuplicateTag {
                    tag: pattern.tag,
                    existing: existing.pattern.tag.clone(),
                });
            }

            let regex = RegexBuilder::new(&regex::escape(&pattern.tag))
                .case_insensitive(!pattern.case_sensitive)
                .build()
                .map_err(|source| CatalogError::InvalidPattern {
                    tag: pattern.tag.clone(),
                    source,
                })?;

            entries.push(CompiledPattern { pattern, regex });
        }

        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured patterns in catalog order.
    pub fn patterns(&self) -> impl Iterator<Item = &ReleaseGroupPattern> {
        self.entries.iter().map(|e| &e.pattern)
    }

    /// Find all non-overlapping tag occurrences in `text`, in text order.
    pub fn match_tags(&self, text: &str) -> Vec<TagMatch> {
        // (catalog index, match)
        let mut candidates: Vec<(usize, TagMatch)> = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            for m in entry.regex.find_iter(text) {
                candidates.push((
                    index,
                    TagMatch {
                        tag: entry.pattern.tag.clone(),
                        start: m.start(),
                        end: m.end(),
                    },
                ));
            }
        }

        candidates.sort_by(|(ia, a), (ib, b)| {
            b.len()
                .cmp(&a.len())
                .then(ia.cmp(ib))
                .then(a.start.cmp(&b.start))
        });

        let mut accepted: Vec<TagMatch> = Vec::new();
        for (_, candidate) in candidates {
            if accepted.iter().all(|a| !a.overlaps(&candidate)) {
                accepted.push(candidate);
            }
        }

        accepted.sort_by_key(|m| m.start);
        accepted
    }
}
