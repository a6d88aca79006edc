//! Tracker, compatibility, click-to-play and surrogate catalogs
//!
//! Catalogs are immutable once built. A database update builds a fresh
//! catalog and swaps it in whole; a failed build leaves the previous one.

mod click2play;
mod compat;
mod surrogate;
mod tracker;
pub mod trie;

pub use click2play::*;
pub use compat::*;
pub use surrogate::*;
pub use tracker::*;

use crate::types::{PatternId, TrackerId};

/// Every catalog the request pipeline reads.
#[derive(Default)]
pub struct Catalogs {
    pub trackers: TrackerCatalog,
    pub compatibility: CompatibilityCatalog,
    pub click2play: ClickToPlayCatalog,
    pub surrogates: SurrogateCatalog,
}

impl Catalogs {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Error type for catalog construction.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid regex for pattern {id}: {source}")]
    InvalidRegex {
        id: PatternId,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid path patterns: {0}")]
    InvalidPathSet(#[from] aho_corasick::BuildError),
    #[error("Invalid match regex for surrogate {sid}: {source}")]
    InvalidSurrogate {
        sid: String,
        #[source]
        source: regex::Error,
    },
    #[error("Pattern {pattern} references unknown tracker {tracker}")]
    UnknownTracker { pattern: PatternId, tracker: TrackerId },
    #[error("Invalid pattern id: {0}")]
    InvalidId(String),
}
