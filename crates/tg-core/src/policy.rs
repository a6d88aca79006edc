//! Policy resolution
//!
//! Combines the global block selection, site-specific overrides, the site
//! blacklist/whitelist and click-to-play grants into a single decision.
//! Every function here is total: bad user input (a malformed glob) simply
//! fails to match.

use regex::Regex;
use serde_json::Value;

use crate::catalog::ConsentGrants;
use crate::config::{keys, ConfigError, ConfigStore, Settings};
use crate::types::{BlockReason, PolicyDecision, TabId, Timestamp, TrackerId};
use crate::url::{extract_host, strip_www};

// =============================================================================
// Site Lists
// =============================================================================

/// Glob match where `*` is the only wildcard. `*` alone matches anything.
///
/// Anything that does not compile as a pattern never matches.
///
/// ```
/// use tg_core::policy::matches_wildcard;
/// assert!(matches_wildcard("developer.mozilla.org", "developer.*.org"));
/// assert!(!matches_wildcard("ghostery.com", "[google.com"));
/// ```
pub fn matches_wildcard(value: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let source = format!("^{}$", pattern.replace('.', "\\.").replace('*', ".*"));
    match Regex::new(&source) {
        Ok(re) => re.is_match(value),
        Err(_) => {
            log::debug!("Ignoring malformed site pattern: {}", pattern);
            false
        }
    }
}

fn host_in_list(list: &[String], page: &str) -> bool {
    let host = extract_host(page).unwrap_or(page);
    let host = strip_www(host).to_ascii_lowercase();
    list.iter().any(|entry| {
        let entry = strip_www(entry.trim());
        entry.eq_ignore_ascii_case(&host) || (entry.contains('*') && matches_wildcard(&host, entry))
    })
}

/// Is the page (URL or bare host) on the site whitelist?
pub fn is_whitelisted(settings: &Settings, page: &str) -> bool {
    host_in_list(&settings.site_whitelist, page)
}

/// Is the page (URL or bare host) on the site blacklist?
pub fn is_blacklisted(settings: &Settings, page: &str) -> bool {
    host_in_list(&settings.site_blacklist, page)
}

// =============================================================================
// Resolver
// =============================================================================

/// The tracker/page pair a decision is asked for.
#[derive(Debug, Clone, Copy)]
pub struct PolicyQuery<'a> {
    pub tracker: TrackerId,
    pub category: &'a str,
    pub tab_id: TabId,
    /// Page host without `www.`
    pub tab_host: &'a str,
    pub page_url: &'a str,
}

/// Read-only view over the inputs of a decision.
pub struct PolicyResolver<'a> {
    settings: &'a Settings,
    grants: &'a ConsentGrants,
    now: Timestamp,
}

impl<'a> PolicyResolver<'a> {
    pub fn new(settings: &'a Settings, grants: &'a ConsentGrants, now: Timestamp) -> Self {
        Self { settings, grants, now }
    }

    pub fn is_paused(&self) -> bool {
        self.settings.is_paused(self.now)
    }

    /// Resolve block/allow with exactly one reason. First matching rule wins.
    pub fn resolve(&self, query: &PolicyQuery<'_>) -> PolicyDecision {
        use BlockReason::*;

        if self.is_paused() {
            return PolicyDecision::new(false, Paused);
        }

        let s = self.settings;
        let tracker = query.tracker;
        let allowed_once = self.grants.is_allowed_once(query.tab_id, tracker);
        let deferred = |reason| {
            if allowed_once {
                PolicyDecision::new(false, DeferredOnce)
            } else {
                PolicyDecision::new(true, reason)
            }
        };

        if s.is_globally_blocked(tracker) {
            if s.site_unblocks(query.tab_host, tracker) {
                return if is_blacklisted(s, query.page_url) {
                    deferred(Blacklisted)
                } else {
                    PolicyDecision::new(false, SiteUnblock)
                };
            }
            if is_whitelisted(s, query.page_url) {
                return PolicyDecision::new(false, Whitelisted);
            }
            return deferred(GlobalBlock);
        }

        // Block list is checked first; a tracker in both lists stays blocked
        if s.site_blocks(query.tab_host, tracker) {
            return if is_whitelisted(s, query.page_url) {
                PolicyDecision::new(false, Whitelisted)
            } else {
                deferred(SiteBlock)
            };
        }
        if s.site_unblocks(query.tab_host, tracker) {
            return if is_blacklisted(s, query.page_url) {
                deferred(Blacklisted)
            } else {
                PolicyDecision::new(false, SiteUnblock)
            };
        }
        if is_blacklisted(s, query.page_url) {
            return deferred(Blacklisted);
        }

        if allowed_once {
            PolicyDecision::new(false, DeferredPassThrough)
        } else {
            PolicyDecision::new(false, GlobalUnblock)
        }
    }
}

// =============================================================================
// Settings Writes
// =============================================================================

/// Click-to-play "always allow": move trackers from the host's site blocks
/// to its site unblocks.
pub fn allow_always<C: ConfigStore>(store: &mut C, host: &str, trackers: &[TrackerId]) -> Result<(), ConfigError> {
    let host = strip_www(host).to_ascii_lowercase();
    let settings = store.settings();
    let mut blocks = settings.site_specific_blocks.clone();
    let mut unblocks = settings.site_specific_unblocks.clone();

    if let Some(ids) = blocks.get_mut(&host) {
        ids.retain(|id| !trackers.contains(id));
        if ids.is_empty() {
            blocks.remove(&host);
        }
    }
    let allowed = unblocks.entry(host).or_default();
    for id in trackers {
        if !allowed.contains(id) {
            allowed.push(*id);
        }
    }

    store.set(keys::SITE_SPECIFIC_BLOCKS, to_value(&blocks))?;
    store.set(keys::SITE_SPECIFIC_UNBLOCKS, to_value(&unblocks))
}

/// After a fresh tracker database: remember the full id set and, when
/// `block_by_default` is on, add the new ids to the global block selection.
/// Returns the number of ids newly blocked.
pub fn apply_block_by_default<C: ConfigStore>(
    store: &mut C,
    all_ids: impl IntoIterator<Item = TrackerId>,
    new_ids: &[TrackerId],
) -> Result<usize, ConfigError> {
    let all: Vec<TrackerId> = all_ids.into_iter().collect();
    store.set(keys::KNOWN_APP_IDS, to_value(&all))?;

    if !store.settings().block_by_default || new_ids.is_empty() {
        return Ok(0);
    }

    let mut selected = store.settings().selected_app_ids.clone();
    let before = selected.len();
    selected.extend(new_ids.iter().copied());
    let added = selected.len() - before;

    let mut ids: Vec<TrackerId> = selected.into_iter().collect();
    ids.sort_unstable();
    let map: serde_json::Map<String, Value> = ids.iter().map(|id| (id.to_string(), Value::from(1))).collect();
    store.set(keys::SELECTED_APP_IDS, Value::Object(map))?;
    Ok(added)
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    // Maps with string keys and integer lists always serialize
    serde_json::to_value(value).unwrap_or(Value::Null)
}
