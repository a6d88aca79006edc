//! Host and path tries for tracker pattern lookup
//!
//! Host patterns are stored as reversed label paths:
//! `ads.doubleclick.net` -> ["net", "doubleclick", "ads"].
//! A node may carry a terminal pattern id (host-only pattern complete here)
//! and a path trie (host+path patterns anchored at this host).
//!
//! Lookup for `x.ads.doubleclick.net` with path `pagead/ad.js`:
//!   walk net -> doubleclick -> ads (x has no edge, stop)
//!   try the path tries met on the way, deepest host first
//!   otherwise fall back to the deepest host-only terminal

use std::collections::HashMap;

use crate::hash::label_key;
use crate::types::PatternId;

// =============================================================================
// Path Trie
// =============================================================================

#[derive(Debug, Default)]
struct PathNode {
    children: HashMap<String, PathNode>,
    /// (prefix of the next segment, pattern id), in insertion order
    leaves: Vec<(String, PatternId)>,
}

/// Segment trie for path prefixes.
///
/// A path pattern matches any request path that starts with it. All but the
/// last segment of the pattern must match whole segments; the last segment
/// is a prefix of the corresponding request segment.
#[derive(Debug, Default)]
pub struct PathTrie {
    root: PathNode,
    len: usize,
}

impl PathTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a path pattern (no leading `/`).
    pub fn insert(&mut self, pattern: &str, id: PatternId) {
        let pattern = pattern.strip_prefix('/').unwrap_or(pattern);
        let mut segments: Vec<&str> = pattern.split('/').collect();
        let last = segments.pop().unwrap_or("");

        let mut node = &mut self.root;
        for segment in segments {
            node = node.children.entry(segment.to_string()).or_default();
        }
        if !node.leaves.iter().any(|(prefix, _)| prefix == last) {
            node.leaves.push((last.to_string(), id));
            self.len += 1;
        }
    }

    /// First pattern that prefixes `path`, shallowest pattern first.
    pub fn lookup(&self, path: &str) -> Option<PatternId> {
        let mut node = &self.root;
        for segment in path.split('/') {
            if let Some((_, id)) = node.leaves.iter().find(|(prefix, _)| segment.starts_with(prefix.as_str())) {
                return Some(*id);
            }
            node = node.children.get(segment)?;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// =============================================================================
// Host Trie
// =============================================================================

/// A node in the reversed-label host trie.
#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<u64, TrieNode>,
    /// Host-only pattern complete at this node
    terminal: Option<PatternId>,
    /// Host+path patterns anchored at this node
    paths: Option<PathTrie>,
}

/// Reversed-label trie over tracker hostnames.
#[derive(Debug, Default)]
pub struct HostTrie {
    root: TrieNode,
    host_patterns: usize,
    path_patterns: usize,
}

impl HostTrie {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_for(&mut self, host: &str) -> &mut TrieNode {
        let mut node = &mut self.root;
        for label in host.trim_end_matches('.').split('.').rev() {
            node = node.children.entry(label_key(label)).or_default();
        }
        node
    }

    /// Register a host-only pattern. A later insert for the same host wins.
    pub fn insert_host(&mut self, host: &str, id: PatternId) {
        let node = self.node_for(host);
        if node.terminal.replace(id).is_none() {
            self.host_patterns += 1;
        }
    }

    /// Register a host+path pattern.
    pub fn insert_host_path(&mut self, host: &str, path: &str, id: PatternId) {
        let node = self.node_for(host);
        let paths = node.paths.get_or_insert_with(PathTrie::new);
        let before = paths.len();
        paths.insert(path, id);
        let added = paths.len() - before;
        self.path_patterns += added;
    }

    /// Find the pattern for a request host and path (path without leading `/`).
    pub fn lookup(&self, host: &str, path: &str) -> Option<PatternId> {
        let mut node = &self.root;
        let mut terminal = None;
        // Path tries are tried deepest first; hosts rarely exceed a handful of labels
        let mut path_nodes: Vec<&PathTrie> = Vec::new();

        for label in host.trim_end_matches('.').split('.').rev() {
            match node.children.get(&label_key(label)) {
                Some(child) => {
                    node = child;
                    if child.terminal.is_some() {
                        terminal = child.terminal;
                    }
                    if let Some(paths) = &child.paths {
                        path_nodes.push(paths);
                    }
                }
                None => break,
            }
        }

        path_nodes
            .iter()
            .rev()
            .find_map(|paths| paths.lookup(path))
            .or(terminal)
    }

    pub fn host_pattern_count(&self) -> usize {
        self.host_patterns
    }

    pub fn path_pattern_count(&self) -> usize {
        self.path_patterns
    }

    pub fn is_empty(&self) -> bool {
        self.host_patterns == 0 && self.path_patterns == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_trie_prefix_semantics() {
        let mut trie = PathTrie::new();
        trie.insert("ads/", 1);
        trie.insert("pixel", 2);
        trie.insert("js/track/v2", 3);

        assert_eq!(trie.lookup("ads/banner.js"), Some(1));
        assert_eq!(trie.lookup("ads/"), Some(1));
        assert_eq!(trie.lookup("ads"), None);
        assert_eq!(trie.lookup("pixel.gif?x=1"), Some(2));
        assert_eq!(trie.lookup("js/track/v2.min.js"), Some(3));
        assert_eq!(trie.lookup("js/track/v1.js"), None);
        assert_eq!(trie.lookup("adserver/x"), None);
        assert_eq!(trie.len(), 3);
    }

    #[test]
    fn host_trie_matches_subdomains_only_on_label_boundaries() {
        let mut trie = HostTrie::new();
        trie.insert_host("doubleclick.net", 10);

        assert_eq!(trie.lookup("doubleclick.net", ""), Some(10));
        assert_eq!(trie.lookup("ad.doubleclick.net", "x"), Some(10));
        assert_eq!(trie.lookup("notdoubleclick.net", ""), None);
        assert_eq!(trie.lookup("net", ""), None);
    }

    #[test]
    fn host_trie_deepest_terminal_wins() {
        let mut trie = HostTrie::new();
        trie.insert_host("google.com", 1);
        trie.insert_host("analytics.google.com", 2);

        assert_eq!(trie.lookup("ssl.analytics.google.com", ""), Some(2));
        assert_eq!(trie.lookup("mail.google.com", ""), Some(1));
    }

    #[test]
    fn host_path_falls_back_to_host_terminal() {
        let mut trie = HostTrie::new();
        trie.insert_host("facebook.net", 5);
        trie.insert_host_path("connect.facebook.net", "signals/", 6);
        trie.insert_host_path("google.com", "pagead/", 7);

        assert_eq!(trie.lookup("connect.facebook.net", "signals/config.js"), Some(6));
        assert_eq!(trie.lookup("connect.facebook.net", "en_US/sdk.js"), Some(5));
        assert_eq!(trie.lookup("www.google.com", "pagead/ads.js"), Some(7));
        assert_eq!(trie.lookup("www.google.com", "search"), None);
        assert_eq!(trie.host_pattern_count(), 1);
        assert_eq!(trie.path_pattern_count(), 2);
    }

    #[test]
    fn host_lookup_is_case_insensitive() {
        let mut trie = HostTrie::new();
        trie.insert_host("scorecardresearch.com", 3);
        assert_eq!(trie.lookup("B.ScoreCardResearch.COM", ""), Some(3));
    }
}
