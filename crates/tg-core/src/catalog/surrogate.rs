//! Surrogate scripts served in place of blocked tracker scripts

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::{Regex, RegexBuilder};

use super::CatalogError;
use crate::types::{PatternId, TrackerId};
use crate::url::strip_www;

/// Data URL prefix for surrogate scripts.
pub const SURROGATE_URL_PREFIX: &str = "data:application/javascript;base64,";

/// One surrogate mapping.
#[derive(Debug, Clone)]
pub struct Surrogate {
    pub sid: String,
    pub app_ids: Vec<TrackerId>,
    pub pattern_ids: Vec<PatternId>,
    /// First-party hosts the surrogate is limited to; empty means any page
    pub sites: Vec<String>,
    /// Only used when the blocked script URL matches
    pub matcher: Option<Regex>,
    pub code: String,
}

impl Surrogate {
    fn applies_to(&self, script_src: &str, page_host: &str) -> bool {
        if !self.sites.is_empty() {
            let host = strip_www(page_host);
            let on_site = self
                .sites
                .iter()
                .any(|site| host == site || host.ends_with(&format!(".{site}")));
            if !on_site {
                return false;
            }
        }
        self.matcher.as_ref().map_or(true, |re| re.is_match(script_src))
    }
}

#[derive(Debug, Default)]
pub struct SurrogateCatalog {
    version: Option<u64>,
    fingerprint: u32,
    surrogates: Vec<Surrogate>,
    by_app: HashMap<TrackerId, Vec<usize>>,
    by_pattern: HashMap<PatternId, Vec<usize>>,
}

impl SurrogateCatalog {
    pub fn new(version: Option<u64>, fingerprint: u32) -> Self {
        Self {
            version,
            fingerprint,
            ..Self::default()
        }
    }

    /// Compile a `match` source for a mapping.
    pub fn compile_matcher(sid: &str, source: &str) -> Result<Regex, CatalogError> {
        RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map_err(|source| CatalogError::InvalidSurrogate {
                sid: sid.to_string(),
                source,
            })
    }

    pub fn insert(&mut self, surrogate: Surrogate) {
        let index = self.surrogates.len();
        for app in &surrogate.app_ids {
            self.by_app.entry(*app).or_default().push(index);
        }
        for pattern in &surrogate.pattern_ids {
            self.by_pattern.entry(*pattern).or_default().push(index);
        }
        self.surrogates.push(surrogate);
    }

    /// Surrogates for a blocked script, in insertion order, without repeats.
    pub fn get_for_tracker(
        &self,
        script_src: &str,
        tracker: TrackerId,
        pattern: PatternId,
        page_host: &str,
    ) -> Vec<&Surrogate> {
        let mut indexes: Vec<usize> = self
            .by_app
            .get(&tracker)
            .into_iter()
            .chain(self.by_pattern.get(&pattern))
            .flatten()
            .copied()
            .collect();
        indexes.sort_unstable();
        indexes.dedup();

        indexes
            .into_iter()
            .map(|i| &self.surrogates[i])
            .filter(|s| s.applies_to(script_src, page_host))
            .collect()
    }

    /// Data URL carrying every applicable surrogate, or `None` when there is none.
    pub fn data_url(&self, script_src: &str, tracker: TrackerId, pattern: PatternId, page_host: &str) -> Option<String> {
        let found = self.get_for_tracker(script_src, tracker, pattern, page_host);
        if found.is_empty() {
            return None;
        }
        let code = found
            .iter()
            .map(|s| s.code.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Some(format!("{SURROGATE_URL_PREFIX}{}", STANDARD.encode(code)))
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.surrogates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surrogates.is_empty()
    }
}
