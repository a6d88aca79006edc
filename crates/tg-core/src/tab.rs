//! Per-tab navigation state
//!
//! ```text
//! absent --before_navigate--> navigating --committed--> committed
//!    ^                            |                        |
//!    +------- watchdog -----------+          close / next navigation
//! ```
//!
//! Only `{reload_count, first_load_timestamp}` outlives a session; the rest
//! is dropped whenever the tab closes or navigates again.

use std::collections::{HashMap, HashSet};

use crate::smart_block::SmartBlockReason;
use crate::types::{TabId, Timestamp, TrackerId};
use crate::url::ParsedUrl;

/// Abandoned navigations are cleared after two minutes.
pub const NAVIGATION_WATCHDOG_MS: Timestamp = 2 * 60 * 1000;

/// Aggressive reload window.
pub const RELOAD_WINDOW_MS: Timestamp = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Navigating,
    Committed,
}

/// Subset of a session kept across navigations for reload detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Persisted {
    reload_count: u32,
    first_load_timestamp: Timestamp,
}

/// Ephemeral record for one tab.
#[derive(Debug, Clone)]
pub struct TabSession {
    pub id: TabId,
    pub url: ParsedUrl,
    pub state: NavState,
    pub incognito: bool,
    pub prefetched: bool,
    pub reload_count: u32,
    pub first_load_timestamp: Timestamp,
    /// Start of the current page load
    pub page_timestamp: Timestamp,
    /// Main-frame redirect chains by request id
    pub redirects: HashMap<String, Vec<String>>,
    /// Request ids already upgraded to HTTPS
    pub upgraded: HashSet<String>,
    pub smart_blocked: HashMap<TrackerId, SmartBlockReason>,
    pub smart_unblocked: HashMap<TrackerId, SmartBlockReason>,
    /// Trackers whose click-to-play overlay was sent for this page
    pub overlays: HashSet<TrackerId>,
}

impl TabSession {
    fn new(id: TabId, url: &str, timestamp: Timestamp, state: NavState) -> Self {
        Self {
            id,
            url: ParsedUrl::parse(url),
            state,
            incognito: false,
            prefetched: false,
            reload_count: 0,
            first_load_timestamp: timestamp,
            page_timestamp: timestamp,
            redirects: HashMap::new(),
            upgraded: HashSet::new(),
            smart_blocked: HashMap::new(),
            smart_unblocked: HashMap::new(),
            overlays: HashSet::new(),
        }
    }

    /// Host of the page, without `www.`
    pub fn host(&self) -> &str {
        self.url.bare_host()
    }

    /// `reload_count > 1` within the reload window.
    pub fn reloaded_recently(&self, now: Timestamp) -> bool {
        self.reload_count > 1 && now.saturating_sub(self.first_load_timestamp) < RELOAD_WINDOW_MS
    }

    pub fn overlay_shown(&self) -> bool {
        !self.overlays.is_empty()
    }

    /// Is this request id part of a main-frame redirect chain?
    pub fn is_redirect(&self, request_id: &str) -> bool {
        self.redirects.contains_key(request_id)
    }
}

/// All tab sessions plus the persisted reload data.
#[derive(Debug, Default)]
pub struct TabSessions {
    sessions: HashMap<TabId, TabSession>,
    persisted: HashMap<TabId, Persisted>,
    /// (tab, deadline) of navigations not yet committed
    watchdogs: Vec<(TabId, Timestamp)>,
}

impl TabSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tab_id: TabId) -> Option<&TabSession> {
        self.sessions.get(&tab_id)
    }

    pub fn get_mut(&mut self, tab_id: TabId) -> Option<&mut TabSession> {
        self.sessions.get_mut(&tab_id)
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.sessions.contains_key(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Top-level navigation start: drop the previous session and open a new one.
    pub fn begin_navigation(&mut self, tab_id: TabId, url: &str, timestamp: Timestamp) -> &mut TabSession {
        self.close(tab_id);

        let mut session = TabSession::new(tab_id, url, timestamp, NavState::Navigating);
        if let Some(persisted) = self.persisted.get(&tab_id) {
            session.reload_count = persisted.reload_count;
            session.first_load_timestamp = persisted.first_load_timestamp;
        }
        self.watchdogs.push((tab_id, timestamp.saturating_add(NAVIGATION_WATCHDOG_MS)));
        self.sessions.entry(tab_id).or_insert(session)
    }

    /// Navigation committed. A reload bumps the reload counter, anything
    /// else starts a fresh reload window.
    pub fn commit(&mut self, tab_id: TabId, url: &str, is_reload: bool, incognito: bool, timestamp: Timestamp) {
        let session = self
            .sessions
            .entry(tab_id)
            .or_insert_with(|| TabSession::new(tab_id, url, timestamp, NavState::Navigating));

        session.url = ParsedUrl::parse(url);
        session.incognito = incognito;
        session.state = NavState::Committed;
        if is_reload {
            session.reload_count += 1;
        } else {
            session.reload_count = 0;
            session.first_load_timestamp = timestamp;
        }
    }

    /// Session for a request on a tab we never saw navigate.
    pub fn ensure(&mut self, tab_id: TabId, url: &str, timestamp: Timestamp) -> &mut TabSession {
        self.sessions.entry(tab_id).or_insert_with(|| {
            log::debug!("Lazily creating session for tab {}", tab_id);
            TabSession::new(tab_id, url, timestamp, NavState::Committed)
        })
    }

    pub fn mark_prefetched(&mut self, tab_id: TabId) {
        if let Some(session) = self.sessions.get_mut(&tab_id) {
            session.prefetched = true;
        }
    }

    /// Prerender swap. A prefetched session is committed in place since no
    /// new navigation fires for it.
    pub fn replace(&mut self, added: TabId, removed: TabId) {
        self.remove(removed);
        if let Some(session) = self.sessions.get_mut(&added) {
            if session.prefetched {
                session.prefetched = false;
                session.state = NavState::Committed;
            }
        }
    }

    /// Drop a session, keeping its reload data.
    pub fn close(&mut self, tab_id: TabId) -> Option<TabSession> {
        let session = self.sessions.remove(&tab_id)?;
        self.persisted.insert(
            tab_id,
            Persisted {
                reload_count: session.reload_count,
                first_load_timestamp: session.first_load_timestamp,
            },
        );
        Some(session)
    }

    /// Tab closed for good: nothing about it survives.
    pub fn remove(&mut self, tab_id: TabId) {
        self.sessions.remove(&tab_id);
        self.persisted.remove(&tab_id);
        self.watchdogs.retain(|(id, _)| *id != tab_id);
    }

    pub fn persisted_len(&self) -> usize {
        self.persisted.len()
    }

    /// Expire watchdogs due at `now`; returns the tabs that were cleared
    /// because they never committed.
    pub fn expire_watchdogs(&mut self, now: Timestamp) -> Vec<TabId> {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.watchdogs)
            .into_iter()
            .partition(|(_, deadline)| *deadline <= now);
        self.watchdogs = pending;

        let mut cleared = Vec::new();
        for (tab_id, _) in due {
            let stuck = self
                .sessions
                .get(&tab_id)
                .is_some_and(|s| s.state == NavState::Navigating && s.page_timestamp.saturating_add(NAVIGATION_WATCHDOG_MS) <= now);
            if stuck && !cleared.contains(&tab_id) {
                log::debug!("Watchdog clearing tab {}", tab_id);
                self.close(tab_id);
                cleared.push(tab_id);
            }
        }
        cleared
    }

    pub fn pending_watchdogs(&self) -> usize {
        self.watchdogs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_threshold() {
        let mut session = TabSession::new(1, "https://example.com/", 100_000, NavState::Committed);
        session.reload_count = 2;
        session.first_load_timestamp = 100_000 - 10_000;
        assert!(session.reloaded_recently(100_000));

        session.first_load_timestamp = 100_000 - 40_000;
        assert!(!session.reloaded_recently(100_000));

        session.reload_count = 1;
        session.first_load_timestamp = 100_000;
        assert!(!session.reloaded_recently(100_000));
    }

    #[test]
    fn reload_data_survives_navigation() {
        let mut tabs = TabSessions::new();
        tabs.begin_navigation(1, "https://example.com/", 1_000);
        tabs.commit(1, "https://example.com/", false, false, 1_000);
        for t in [2_000, 3_000] {
            tabs.begin_navigation(1, "https://example.com/", t);
            tabs.commit(1, "https://example.com/", true, false, t);
        }

        let session = tabs.get(1).unwrap();
        assert_eq!(session.reload_count, 2);
        assert_eq!(session.first_load_timestamp, 1_000);
        assert!(session.reloaded_recently(3_500));

        tabs.begin_navigation(1, "https://other.com/", 4_000);
        tabs.commit(1, "https://other.com/", false, true, 4_000);
        let session = tabs.get(1).unwrap();
        assert_eq!(session.reload_count, 0);
        assert!(session.incognito);
        assert_eq!(session.host(), "other.com");
    }

    #[test]
    fn watchdog_clears_only_stuck_tabs() {
        let mut tabs = TabSessions::new();
        tabs.begin_navigation(1, "https://a.com/", 0);
        tabs.begin_navigation(2, "https://b.com/", 0);
        tabs.commit(2, "https://b.com/", false, false, 10);

        assert!(tabs.expire_watchdogs(NAVIGATION_WATCHDOG_MS - 1).is_empty());
        assert_eq!(tabs.expire_watchdogs(NAVIGATION_WATCHDOG_MS), vec![1]);
        assert!(!tabs.contains(1));
        assert!(tabs.contains(2));
        assert_eq!(tabs.pending_watchdogs(), 0);
    }

    #[test]
    fn prefetched_tab_commits_on_replace() {
        let mut tabs = TabSessions::new();
        tabs.begin_navigation(5, "https://news.com/", 0);
        tabs.mark_prefetched(5);
        tabs.begin_navigation(4, "https://old.com/", 0);

        tabs.replace(5, 4);
        assert!(!tabs.contains(4));
        let session = tabs.get(5).unwrap();
        assert_eq!(session.state, NavState::Committed);
        assert!(!session.prefetched);
    }

    #[test]
    fn removed_tab_forgets_reload_data() {
        let mut tabs = TabSessions::new();
        tabs.begin_navigation(1, "https://example.com/", 1_000);
        tabs.begin_navigation(1, "https://example.com/", 2_000);
        tabs.begin_navigation(2, "https://other.com/", 2_000);
        assert_eq!(tabs.persisted_len(), 1);

        tabs.remove(1);
        assert!(!tabs.contains(1));
        assert_eq!(tabs.persisted_len(), 0);
        assert_eq!(tabs.pending_watchdogs(), 1);

        tabs.begin_navigation(3, "https://c.com/", 3_000);
        tabs.begin_navigation(4, "https://d.com/", 3_000);
        tabs.begin_navigation(4, "https://d.com/", 3_500);
        assert_eq!(tabs.persisted_len(), 1);
        tabs.replace(3, 4);
        assert!(!tabs.contains(4));
        assert_eq!(tabs.persisted_len(), 0);
    }

    #[test]
    fn far_future_timestamps_do_not_overflow() {
        let mut tabs = TabSessions::new();
        tabs.begin_navigation(1, "https://example.com/", Timestamp::MAX);
        assert!(tabs.expire_watchdogs(Timestamp::MAX - 1).is_empty());
        assert_eq!(tabs.expire_watchdogs(Timestamp::MAX), vec![1]);
    }

    #[test]
    fn lazy_session_is_committed() {
        let mut tabs = TabSessions::new();
        let session = tabs.ensure(9, "https://www.example.com/page", 50);
        assert_eq!(session.state, NavState::Committed);
        assert_eq!(session.host(), "example.com");
    }
}
