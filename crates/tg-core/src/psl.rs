//! Public Suffix List (PSL) utilities for general-domain (eTLD+1) extraction
//!
//! The first-party fast path compares the general domain of the request with
//! the general domain of the page. A snapshot of the public suffix list is
//! compiled into the crate and parsed once on first use; a fresher list can
//! be installed at runtime with [`DomainResolver::load_list`].
//!
//! # Examples
//!
//! ```
//! use tg_core::psl::DomainResolver;
//!
//! let mut resolver = DomainResolver::new();
//! assert_eq!(resolver.general_domain("sub.example.com"), "example.com");
//! assert_eq!(resolver.general_domain("www.haber.com.tr"), "haber.com.tr");
//! ```

use std::borrow::Cow;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::OnceLock;

use lru::LruCache;
use publicsuffix::{List, Psl};

const CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(4096) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

const BUNDLED_LIST: &str = include_str!("../data/public_suffix_list.dat");

static BUNDLED: OnceLock<Option<List>> = OnceLock::new();

fn bundled_list() -> Option<&'static List> {
    BUNDLED
        .get_or_init(|| match BUNDLED_LIST.parse::<List>() {
            Ok(list) => Some(list),
            Err(e) => {
                log::error!("Bundled public suffix list failed to parse: {}", e);
                None
            }
        })
        .as_ref()
}

// =============================================================================
// Domain Resolver
// =============================================================================

/// Resolves hostnames to their general (registrable) domain.
pub struct DomainResolver {
    custom: Option<List>,
    cache: LruCache<String, String>,
}

impl Default for DomainResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainResolver {
    /// Resolver backed by the bundled list.
    pub fn new() -> Self {
        Self {
            custom: None,
            cache: LruCache::new(CACHE_CAPACITY),
        }
    }

    /// Replace the bundled list with one in the standard text format.
    pub fn load_list(&mut self, text: &str) -> Result<(), publicsuffix::Error> {
        let list: List = text.parse()?;
        self.custom = Some(list);
        self.cache.clear();
        Ok(())
    }

    pub fn has_custom_list(&self) -> bool {
        self.custom.is_some()
    }

    /// Get the general domain for a hostname.
    pub fn general_domain(&mut self, host: &str) -> String {
        let host = normalize(host);

        if let Some(cached) = self.cache.get(&*host) {
            return cached.clone();
        }

        let result = self.compute(&host);
        self.cache.put(host.into_owned(), result.clone());
        result
    }

    /// Check if two hosts share the same general domain.
    pub fn is_same_site(&mut self, host1: &str, host2: &str) -> bool {
        !host1.is_empty() && self.general_domain(host1) == self.general_domain(host2)
    }

    fn compute(&self, host: &str) -> String {
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if literal.parse::<IpAddr>().is_ok() {
            return host.to_string();
        }

        let list = match &self.custom {
            Some(list) => Some(list),
            None => bundled_list(),
        };
        if let Some(domain) = list.and_then(|l| l.domain(host.as_bytes())) {
            if let Ok(domain) = std::str::from_utf8(domain.as_bytes()) {
                return domain.to_string();
            }
        }

        // Single labels and bare suffixes have no registrable part.
        host.to_string()
    }
}

fn normalize(host: &str) -> Cow<'_, str> {
    let host = host.trim_end_matches('.');
    if host.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(host.to_ascii_lowercase())
    } else {
        Cow::Borrowed(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_list_resolves_multi_part_suffixes() {
        let mut resolver = DomainResolver::new();
        assert_eq!(resolver.general_domain("sub.example.com"), "example.com");
        assert_eq!(resolver.general_domain("sub.example.co.uk"), "example.co.uk");
        assert_eq!(resolver.general_domain("cdn.trackerx.com.tr"), "trackerx.com.tr");
        assert_eq!(resolver.general_domain("shop.example.co.id"), "example.co.id");
        assert_eq!(resolver.general_domain("alice.github.io"), "alice.github.io");
        assert!(!resolver.is_same_site("www.haber.com.tr", "cdn.trackerx.com.tr"));
        assert!(!resolver.is_same_site("alice.github.io", "bob.github.io"));
    }

    #[test]
    fn test_resolver_caches_and_normalizes() {
        let mut resolver = DomainResolver::new();
        assert_eq!(resolver.general_domain("WWW.CNN.com."), "cnn.com");
        assert_eq!(resolver.general_domain("www.cnn.com"), "cnn.com");
        assert_eq!(resolver.cache.len(), 1);
    }

    #[test]
    fn test_bare_suffix_and_single_label() {
        let mut resolver = DomainResolver::new();
        assert_eq!(resolver.general_domain("localhost"), "localhost");
        assert_eq!(resolver.general_domain("co.uk"), "co.uk");
    }

    #[test]
    fn test_ip_literals_are_their_own_domain() {
        let mut resolver = DomainResolver::new();
        assert_eq!(resolver.general_domain("192.168.0.10"), "192.168.0.10");
        assert!(!resolver.is_same_site("192.168.0.10", "10.0.0.10"));
    }

    #[test]
    fn test_loaded_list_replaces_bundled() {
        let mut resolver = DomainResolver::new();
        assert_eq!(resolver.general_domain("me.example.com"), "example.com");
        resolver
            .load_list("// ===BEGIN ICANN DOMAINS===\ncom\nexample.com\n// ===END ICANN DOMAINS===\n")
            .expect("list should parse");
        assert!(resolver.has_custom_list());
        assert_eq!(resolver.general_domain("me.example.com"), "me.example.com");
        assert!(!resolver.is_same_site("me.example.com", "you.example.com"));
    }
}
