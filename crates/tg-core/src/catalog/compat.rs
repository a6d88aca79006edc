//! Compatibility catalog
//!
//! Trackers whose blocking is known to break specific pages. Entries are
//! lowercase URL fragments; a page matches when its URL contains one,
//! ignoring ASCII case.

use std::collections::HashMap;

use crate::types::TrackerId;

/// Tracker/site pairs known to break pages when blocked.
#[derive(Debug, Default)]
pub struct CompatibilityCatalog {
    version: Option<u64>,
    fingerprint: u32,
    sites: HashMap<TrackerId, Vec<String>>,
}

impl CompatibilityCatalog {
    pub fn new(version: Option<u64>, fingerprint: u32) -> Self {
        Self {
            version,
            fingerprint,
            sites: HashMap::new(),
        }
    }

    /// Register URL fragments on which blocking `tracker` breaks the page.
    pub fn insert(&mut self, tracker: TrackerId, urls: impl IntoIterator<Item = String>) {
        let entry = self.sites.entry(tracker).or_default();
        for url in urls {
            let url = url.trim().to_ascii_lowercase();
            if !url.is_empty() && !entry.contains(&url) {
                entry.push(url);
            }
        }
    }

    /// Does blocking `tracker` break the page at `page_url`?
    pub fn has_issue(&self, tracker: TrackerId, page_url: &str) -> bool {
        let Some(urls) = self.sites.get(&tracker) else {
            return false;
        };
        urls.iter().any(|fragment| contains_ignore_ascii_case(page_url, fragment))
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// `needle` must already be lowercase.
fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    let needle = needle.as_bytes();
    if needle.is_empty() {
        return true;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_is_a_url_fragment_match() {
        let mut catalog = CompatibilityCatalog::new(Some(3), 0);
        catalog.insert(41, vec!["cnn.com/videos".to_string(), "  ".to_string()]);

        assert!(catalog.has_issue(41, "https://www.CNN.com/videos/world"));
        assert!(!catalog.has_issue(41, "https://www.cnn.com/politics"));
        assert!(!catalog.has_issue(42, "https://www.cnn.com/videos"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn fragment_match_ignores_case_without_copying() {
        assert!(contains_ignore_ascii_case("HTTPS://WWW.CNN.COM/VIDEOS", "cnn.com/videos"));
        assert!(contains_ignore_ascii_case("https://cnn.com", ""));
        assert!(!contains_ignore_ascii_case("cnn", "cnn.com"));
        assert!(!contains_ignore_ascii_case("https://www.cnn.com/vídeos", "cnn.com/videos"));
    }
}
