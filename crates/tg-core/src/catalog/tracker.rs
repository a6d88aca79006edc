//! Tracker catalog and URL matcher
//!
//! This is the hot path - every request goes through `match_url`.
//! Lookups walk the host trie, then the path automaton, then the regex
//! fallbacks, and finally apply first-party exceptions.

use std::collections::{BTreeSet, HashMap};

use aho_corasick::{AhoCorasick, MatchKind};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use super::trie::HostTrie;
use super::CatalogError;
use crate::types::{PatternId, TrackerId};
use crate::url::{extract_host, extract_path, extract_path_and_query, strip_www};

// =============================================================================
// Tracker
// =============================================================================

/// Immutable catalog entry for a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tracker {
    pub id: TrackerId,
    pub name: String,
    /// Category id, e.g. `advertising`, `essential`
    pub category: String,
    pub tags: Vec<u32>,
}

// =============================================================================
// First-party Exceptions
// =============================================================================

/// Page location on which a pattern is not reported.
///
/// Written as `host` or `host/path`; a path ending in `*` is a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstPartyException {
    pub host: String,
    pub path: Option<String>,
}

impl FirstPartyException {
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        let entry = entry
            .strip_prefix("https://")
            .or_else(|| entry.strip_prefix("http://"))
            .unwrap_or(entry);
        match entry.split_once('/') {
            Some((host, path)) if !path.is_empty() => Self {
                host: strip_www(host).to_ascii_lowercase(),
                path: Some(path.to_string()),
            },
            Some((host, _)) => Self {
                host: strip_www(host).to_ascii_lowercase(),
                path: None,
            },
            None => Self {
                host: strip_www(entry).to_ascii_lowercase(),
                path: None,
            },
        }
    }

    /// `page_path` has no leading `/`.
    pub fn matches(&self, page_host: &str, page_path: &str) -> bool {
        if !strip_www(page_host).eq_ignore_ascii_case(&self.host) {
            return false;
        }
        match &self.path {
            None => true,
            Some(path) => match path.strip_suffix('*') {
                Some(prefix) => page_path.starts_with(prefix),
                None => page_path == path,
            },
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Incrementally assembles a `TrackerCatalog`.
#[derive(Default)]
pub struct TrackerCatalogBuilder {
    version: Option<u64>,
    fingerprint: u32,
    trackers: HashMap<TrackerId, Tracker>,
    patterns: HashMap<PatternId, TrackerId>,
    hosts: HostTrie,
    paths: Vec<(String, PatternId)>,
    regexes: Vec<(PatternId, Regex)>,
    exceptions: HashMap<PatternId, Vec<FirstPartyException>>,
}

impl TrackerCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    pub fn fingerprint(mut self, fingerprint: u32) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn add_tracker(&mut self, tracker: Tracker) {
        self.trackers.insert(tracker.id, tracker);
    }

    /// Bind a pattern id to its tracker. The tracker must already be known.
    pub fn add_pattern(&mut self, pattern: PatternId, tracker: TrackerId) -> Result<(), CatalogError> {
        if !self.trackers.contains_key(&tracker) {
            return Err(CatalogError::UnknownTracker { pattern, tracker });
        }
        self.patterns.insert(pattern, tracker);
        Ok(())
    }

    pub fn has_pattern(&self, pattern: PatternId) -> bool {
        self.patterns.contains_key(&pattern)
    }

    pub fn add_host(&mut self, host: &str, pattern: PatternId) {
        self.hosts.insert_host(&host.to_ascii_lowercase(), pattern);
    }

    pub fn add_host_path(&mut self, host: &str, path: &str, pattern: PatternId) {
        self.hosts.insert_host_path(&host.to_ascii_lowercase(), path, pattern);
    }

    /// Substring pattern tested against `/` + request path on any host.
    pub fn add_path(&mut self, path: &str, pattern: PatternId) {
        self.paths.push((path.to_string(), pattern));
    }

    /// Regex fallback, compiled case-insensitively.
    pub fn add_regex(&mut self, pattern: PatternId, source: &str) -> Result<(), CatalogError> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map_err(|source| CatalogError::InvalidRegex { id: pattern, source })?;
        self.regexes.push((pattern, regex));
        Ok(())
    }

    pub fn add_exception(&mut self, pattern: PatternId, entry: &str) {
        self.exceptions
            .entry(pattern)
            .or_default()
            .push(FirstPartyException::parse(entry));
    }

    pub fn build(mut self) -> Result<TrackerCatalog, CatalogError> {
        // Stable regex order
        self.regexes.sort_by_key(|(id, _)| *id);

        let path_ids: Vec<PatternId> = self.paths.iter().map(|(_, id)| *id).collect();
        let paths = if self.paths.is_empty() {
            None
        } else {
            let automaton = AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostFirst)
                .build(self.paths.iter().map(|(p, _)| p.as_str()))?;
            Some(automaton)
        };

        Ok(TrackerCatalog {
            version: self.version,
            fingerprint: self.fingerprint,
            trackers: self.trackers,
            patterns: self.patterns,
            hosts: self.hosts,
            paths,
            path_ids,
            regexes: self.regexes,
            exceptions: self.exceptions,
            newly_added: Vec::new(),
        })
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Catalog statistics for logging and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub trackers: usize,
    pub patterns: usize,
    pub host_patterns: usize,
    pub host_path_patterns: usize,
    pub path_patterns: usize,
    pub regex_patterns: usize,
    pub exceptions: usize,
}

/// The tracker database, indexed for matching.
#[derive(Default)]
pub struct TrackerCatalog {
    version: Option<u64>,
    fingerprint: u32,
    trackers: HashMap<TrackerId, Tracker>,
    patterns: HashMap<PatternId, TrackerId>,
    hosts: HostTrie,
    paths: Option<AhoCorasick>,
    path_ids: Vec<PatternId>,
    regexes: Vec<(PatternId, Regex)>,
    exceptions: HashMap<PatternId, Vec<FirstPartyException>>,
    newly_added: Vec<TrackerId>,
}

impl TrackerCatalog {
    /// An empty catalog that matches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Match a request URL against the catalog.
    ///
    /// `page_url` enables first-party exceptions: a pattern excepted for the
    /// page's host (and path) is not reported at all.
    pub fn match_url(&self, url: &str, page_url: Option<&str>) -> Option<PatternId> {
        let host = extract_host(url)?;
        if host.is_empty() {
            return None;
        }
        let path = extract_path_and_query(url);

        let found = self
            .hosts
            .lookup(host, path)
            .or_else(|| self.match_path(path))
            .or_else(|| self.match_regex(url))?;

        if let Some(page_url) = page_url {
            if self.is_first_party_exception(found, page_url) {
                return None;
            }
        }

        Some(found)
    }

    fn match_path(&self, path: &str) -> Option<PatternId> {
        let automaton = self.paths.as_ref()?;
        // Patterns are written against the path with its leading slash
        let mut haystack = String::with_capacity(path.len() + 1);
        haystack.push('/');
        haystack.push_str(path);
        let m = automaton.find(&haystack)?;
        self.path_ids.get(m.pattern().as_usize()).copied()
    }

    fn match_regex(&self, url: &str) -> Option<PatternId> {
        self.regexes
            .iter()
            .find(|(_, regex)| regex.is_match(url))
            .map(|(id, _)| *id)
    }

    /// Check a matched pattern against its first-party exceptions.
    pub fn is_first_party_exception(&self, pattern: PatternId, page_url: &str) -> bool {
        let Some(exceptions) = self.exceptions.get(&pattern) else {
            return false;
        };
        let Some(page_host) = extract_host(page_url) else {
            return false;
        };
        let page_path = extract_path(page_url);
        let page_path = page_path.strip_prefix('/').unwrap_or(page_path);
        exceptions.iter().any(|e| e.matches(page_host, page_path))
    }

    /// Tracker a pattern resolves to.
    pub fn tracker_for(&self, pattern: PatternId) -> Option<&Tracker> {
        let tracker = self.patterns.get(&pattern)?;
        self.trackers.get(tracker)
    }

    pub fn tracker(&self, id: TrackerId) -> Option<&Tracker> {
        self.trackers.get(&id)
    }

    pub fn tracker_ids(&self) -> BTreeSet<TrackerId> {
        self.trackers.keys().copied().collect()
    }

    pub fn trackers(&self) -> impl Iterator<Item = &Tracker> {
        self.trackers.values()
    }

    /// Tracker ids added by the last `replace`.
    pub fn newly_added(&self) -> &[TrackerId] {
        &self.newly_added
    }

    /// Swap in a new version, recording which tracker ids it adds.
    ///
    /// Replacing an empty catalog reports nothing as new.
    pub fn replace(&mut self, mut next: TrackerCatalog) -> &[TrackerId] {
        next.newly_added = if self.trackers.is_empty() {
            Vec::new()
        } else {
            let mut added: Vec<TrackerId> = next
                .trackers
                .keys()
                .filter(|id| !self.trackers.contains_key(id))
                .copied()
                .collect();
            added.sort_unstable();
            added
        };
        *self = next;
        &self.newly_added
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            trackers: self.trackers.len(),
            patterns: self.patterns.len(),
            host_patterns: self.hosts.host_pattern_count(),
            host_path_patterns: self.hosts.path_pattern_count(),
            path_patterns: self.path_ids.len(),
            regex_patterns: self.regexes.len(),
            exceptions: self.exceptions.values().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(id: TrackerId, name: &str, category: &str) -> Tracker {
        Tracker {
            id,
            name: name.to_string(),
            category: category.to_string(),
            tags: Vec::new(),
        }
    }

    fn sample_catalog() -> TrackerCatalog {
        let mut builder = TrackerCatalogBuilder::new().version(Some(7));
        builder.add_tracker(tracker(41, "DoubleClick", "advertising"));
        builder.add_tracker(tracker(464, "Facebook Connect", "social_media"));
        builder.add_tracker(tracker(99, "Pixel Tracker", "site_analytics"));
        builder.add_pattern(2, 41).unwrap();
        builder.add_pattern(3, 464).unwrap();
        builder.add_pattern(4, 99).unwrap();
        builder.add_pattern(5, 99).unwrap();
        builder.add_host("doubleclick.net", 2);
        builder.add_host("connect.facebook.net", 3);
        builder.add_path("/tracking/pixel.gif", 4);
        builder.add_regex(5, r"^https?://[^/]+/beacon\d+\.js").unwrap();
        builder.add_exception(3, "facebook.com");
        builder.add_exception(2, "www.google.com/doubleclick/*");
        builder.build().unwrap()
    }

    #[test]
    fn matches_host_path_and_regex_patterns() {
        let catalog = sample_catalog();
        assert_eq!(catalog.match_url("https://ad.doubleclick.net/ddm/x", None), Some(2));
        assert_eq!(catalog.match_url("https://cdn.example.com/tracking/pixel.gif?u=1", None), Some(4));
        assert_eq!(catalog.match_url("https://stats.example.org/BEACON12.js", None), Some(5));
        assert_eq!(catalog.match_url("https://example.com/index.html", None), None);
        assert_eq!(catalog.tracker_for(5).map(|t| t.id), Some(99));
    }

    #[test]
    fn matching_is_idempotent() {
        let catalog = sample_catalog();
        let url = "https://ad.doubleclick.net/x";
        let first = catalog.match_url(url, Some("https://www.cnn.com/"));
        let second = catalog.match_url(url, Some("https://www.cnn.com/"));
        assert_eq!(first, second);
    }

    #[test]
    fn first_party_exception_overrides_match() {
        let catalog = sample_catalog();
        let url = "https://connect.facebook.net/en_US/sdk.js";
        assert_eq!(catalog.match_url(url, Some("https://facebook.com/anything")), None);
        assert_eq!(catalog.match_url(url, Some("https://www.facebook.com/")), None);
        assert_eq!(catalog.match_url(url, Some("https://other.com/")), Some(3));
    }

    #[test]
    fn exception_path_glob() {
        let catalog = sample_catalog();
        let url = "https://ad.doubleclick.net/x";
        assert_eq!(catalog.match_url(url, Some("https://www.google.com/doubleclick/studio")), None);
        assert_eq!(catalog.match_url(url, Some("https://www.google.com/search")), Some(2));
    }

    #[test]
    fn unknown_tracker_is_rejected() {
        let mut builder = TrackerCatalogBuilder::new();
        let err = builder.add_pattern(1, 1000).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTracker { pattern: 1, tracker: 1000 }));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let mut builder = TrackerCatalogBuilder::new();
        assert!(builder.add_regex(9, "(unclosed").is_err());
    }

    #[test]
    fn replace_reports_new_trackers() {
        let mut catalog = TrackerCatalog::empty();
        assert!(catalog.replace(sample_catalog()).is_empty());

        let mut builder = TrackerCatalogBuilder::new();
        builder.add_tracker(tracker(41, "DoubleClick", "advertising"));
        builder.add_tracker(tracker(1500, "New Ads", "advertising"));
        let next = builder.build().unwrap();

        assert_eq!(catalog.replace(next), &[1500]);
        assert_eq!(catalog.newly_added(), &[1500]);
    }

    #[test]
    fn stats_count_every_kind() {
        let stats = sample_catalog().stats();
        assert_eq!(stats.trackers, 3);
        assert_eq!(stats.patterns, 4);
        assert_eq!(stats.host_patterns, 2);
        assert_eq!(stats.path_patterns, 1);
        assert_eq!(stats.regex_patterns, 1);
        assert_eq!(stats.exceptions, 2);
    }
}
