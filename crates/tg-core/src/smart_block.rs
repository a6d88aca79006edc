//! Smart blocking
//!
//! A second opinion on the policy decision that trades strictness for fewer
//! broken pages. It never overrides an explicit user choice: pages on the
//! site lists, trackers with site-specific overrides and click-to-play
//! trackers are left alone.

use serde::Serialize;

use crate::catalog::{ClickToPlayCatalog, CompatibilityCatalog};
use crate::config::Settings;
use crate::policy::{is_blacklisted, is_whitelisted};
use crate::psl::DomainResolver;
use crate::tab::TabSession;
use crate::types::{RequestType, SchemeMask, Timestamp, TrackerId};
use crate::url::{extract_host, extract_scheme, is_loopback_host};

/// Trackers first seen this long after the page started loading are
/// blocked even when policy allows them. Tunable per deployment.
pub const SLOW_REQUEST_MS: Timestamp = 5_000;

/// Categories never blocked by smart blocking.
pub const SAFE_CATEGORIES: [&str; 3] = ["essential", "audio_video_player", "comments"];

/// Why smart blocking changed a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmartBlockReason {
    /// Blocking breaks this page
    Compatibility,
    /// Category in `SAFE_CATEGORIES`
    SafeCategory,
    /// Request type in `RequestType::SMART_BLOCK_SAFE`
    SafeType,
    /// Page reloaded repeatedly
    Reload,
    /// Loaded late in the page
    Slow,
}

/// Smart blocking over one request's inputs.
pub struct SmartBlock<'a> {
    settings: &'a Settings,
    compat: &'a CompatibilityCatalog,
    click2play: &'a ClickToPlayCatalog,
    now: Timestamp,
}

impl<'a> SmartBlock<'a> {
    pub fn new(
        settings: &'a Settings,
        compat: &'a CompatibilityCatalog,
        click2play: &'a ClickToPlayCatalog,
        now: Timestamp,
    ) -> Self {
        Self {
            settings,
            compat,
            click2play,
            now,
        }
    }

    /// Eligibility gate shared by every check.
    pub fn should_check(&self, session: &TabSession, tracker: Option<TrackerId>) -> bool {
        let s = self.settings;
        if !s.enable_smart_block || s.is_paused(self.now) {
            return false;
        }
        let page = session.url.url.as_str();
        if is_whitelisted(s, page) || is_blacklisted(s, page) {
            return false;
        }
        match tracker {
            None => true,
            Some(id) => {
                let host = session.host();
                !s.site_blocks(host, id)
                    && !s.site_unblocks(host, id)
                    && !self.click2play.has_entry(id)
            }
        }
    }

    /// First unblock condition that holds, in priority order.
    pub fn unblock_reason(
        &self,
        session: &TabSession,
        tracker: TrackerId,
        category: &str,
        request_type: RequestType,
    ) -> Option<SmartBlockReason> {
        if self.compat.has_issue(tracker, &session.url.url) {
            Some(SmartBlockReason::Compatibility)
        } else if SAFE_CATEGORIES.contains(&category) {
            Some(SmartBlockReason::SafeCategory)
        } else if RequestType::SMART_BLOCK_SAFE.intersects(request_type) {
            Some(SmartBlockReason::SafeType)
        } else if session.reloaded_recently(self.now) {
            Some(SmartBlockReason::Reload)
        } else {
            None
        }
    }

    /// Turn a block into an allow? Records the reason on the session.
    pub fn should_unblock(
        &self,
        session: &mut TabSession,
        tracker: TrackerId,
        category: &str,
        request_type: RequestType,
    ) -> bool {
        if !self.should_check(session, Some(tracker)) {
            return false;
        }
        match self.unblock_reason(session, tracker, category, request_type) {
            Some(reason) => {
                log::debug!("Smart unblock of tracker {}: {:?}", tracker, reason);
                session.smart_unblocked.insert(tracker, reason);
                true
            }
            None => false,
        }
    }

    /// Turn an allow into a block? Only late requests with no unblock reason.
    pub fn should_block(
        &self,
        session: &mut TabSession,
        tracker: TrackerId,
        category: &str,
        request_type: RequestType,
        request_time: Timestamp,
    ) -> bool {
        if !self.should_check(session, Some(tracker)) {
            return false;
        }
        let late = request_time.saturating_sub(session.page_timestamp) > SLOW_REQUEST_MS;
        if !late || self.unblock_reason(session, tracker, category, request_type).is_some() {
            return false;
        }
        log::debug!("Smart block of slow tracker {}", tracker);
        session.smart_blocked.insert(tracker, SmartBlockReason::Slow);
        true
    }

    /// Plain HTTP/WS sub-resource of an HTTPS page on a non-loopback host.
    pub fn is_insecure_request(&self, session: &TabSession, request_url: &str) -> bool {
        if !session.url.is_https() || !self.should_check(session, None) {
            return false;
        }
        let insecure = extract_scheme(request_url).is_some_and(|s| SchemeMask::INSECURE.intersects(s));
        insecure && extract_host(request_url).is_some_and(|host| !is_loopback_host(host))
    }

    /// Same general domain (eTLD+1) as the page.
    pub fn is_first_party_request(&self, session: &TabSession, request_host: &str, resolver: &mut DomainResolver) -> bool {
        if session.url.host.is_empty() || !self.should_check(session, None) {
            return false;
        }
        resolver.is_same_site(&session.url.host, request_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ClickToPlayEntry, OverlayKind};
    use crate::tab::{TabSessions, RELOAD_WINDOW_MS};

    const NOW: Timestamp = 1_000_000;

    fn session(tabs: &mut TabSessions, url: &str) -> TabSession {
        tabs.ensure(1, url, NOW - 6_000).clone()
    }

    #[test]
    fn compatibility_checked_before_category() {
        let settings = Settings::default();
        let mut compat = CompatibilityCatalog::new(None, 0);
        compat.insert(41, vec!["cnn.com".to_string()]);
        let c2p = ClickToPlayCatalog::default();
        let smart = SmartBlock::new(&settings, &compat, &c2p, NOW);

        let mut tabs = TabSessions::new();
        let mut s = session(&mut tabs, "https://www.cnn.com/");
        assert!(smart.should_unblock(&mut s, 41, "advertising", RequestType::SCRIPT));
        assert_eq!(s.smart_unblocked[&41], SmartBlockReason::Compatibility);

        assert_eq!(
            smart.unblock_reason(&s, 42, "essential", RequestType::SCRIPT),
            Some(SmartBlockReason::SafeCategory)
        );
        assert_eq!(
            smart.unblock_reason(&s, 42, "advertising", RequestType::IMAGE),
            Some(SmartBlockReason::SafeType)
        );
        assert_eq!(smart.unblock_reason(&s, 42, "advertising", RequestType::SCRIPT), None);
    }

    #[test]
    fn slow_requests_get_blocked() {
        let settings = Settings::default();
        let compat = CompatibilityCatalog::default();
        let c2p = ClickToPlayCatalog::default();
        let smart = SmartBlock::new(&settings, &compat, &c2p, NOW);

        let mut tabs = TabSessions::new();
        let mut s = session(&mut tabs, "https://www.cnn.com/");
        assert!(smart.should_block(&mut s, 41, "advertising", RequestType::SCRIPT, NOW));
        assert_eq!(s.smart_blocked[&41], SmartBlockReason::Slow);

        assert!(!smart.should_block(&mut s, 41, "advertising", RequestType::IMAGE, NOW));
        assert!(!smart.should_block(&mut s, 41, "advertising", RequestType::SCRIPT, NOW - 2_000));
    }

    #[test]
    fn repeated_reloads_unblock_and_suppress_slow_block() {
        let settings = Settings::default();
        let compat = CompatibilityCatalog::default();
        let c2p = ClickToPlayCatalog::default();

        let mut tabs = TabSessions::new();
        let start = NOW - 20_000;
        tabs.begin_navigation(1, "https://www.cnn.com/", start);
        tabs.commit(1, "https://www.cnn.com/", false, false, start);
        for t in [start + 5_000, start + 10_000] {
            tabs.begin_navigation(1, "https://www.cnn.com/", t);
            tabs.commit(1, "https://www.cnn.com/", true, false, t);
        }
        let mut s = tabs.get(1).unwrap().clone();
        assert_eq!(s.reload_count, 2);

        let smart = SmartBlock::new(&settings, &compat, &c2p, NOW);
        assert_eq!(
            smart.unblock_reason(&s, 41, "advertising", RequestType::SCRIPT),
            Some(SmartBlockReason::Reload)
        );
        assert!(smart.should_unblock(&mut s, 41, "advertising", RequestType::SCRIPT));
        assert_eq!(s.smart_unblocked[&41], SmartBlockReason::Reload);

        // Late in the page, yet the reload reason keeps it allowed
        assert!(NOW - s.page_timestamp > SLOW_REQUEST_MS);
        assert!(!smart.should_block(&mut s, 41, "advertising", RequestType::SCRIPT, NOW));
        assert!(s.smart_blocked.is_empty());

        // Outside the reload window the same request is slow-blocked
        let later = SmartBlock::new(&settings, &compat, &c2p, start + RELOAD_WINDOW_MS);
        assert_eq!(later.unblock_reason(&s, 41, "advertising", RequestType::SCRIPT), None);
        assert!(later.should_block(&mut s, 41, "advertising", RequestType::SCRIPT, start + RELOAD_WINDOW_MS));
    }

    #[test]
    fn gate_respects_user_choices() {
        let mut settings = Settings::default();
        settings.site_specific_unblocks.insert("cnn.com".to_string(), vec![41]);
        let compat = CompatibilityCatalog::default();
        let mut c2p = ClickToPlayCatalog::default();
        c2p.insert(ClickToPlayEntry {
            tracker: 464,
            allow: Vec::new(),
            kind: OverlayKind::General,
            button: None,
            attach: None,
            ele: None,
            frame_color: None,
            text: None,
        });
        let smart = SmartBlock::new(&settings, &compat, &c2p, NOW);

        let mut tabs = TabSessions::new();
        let s = session(&mut tabs, "https://www.cnn.com/");
        assert!(smart.should_check(&s, None));
        assert!(!smart.should_check(&s, Some(41)));
        assert!(!smart.should_check(&s, Some(464)));
        assert!(smart.should_check(&s, Some(7)));

        let mut no_overlays = settings.clone();
        no_overlays.enable_click2play = false;
        let smart = SmartBlock::new(&no_overlays, &compat, &c2p, NOW);
        let mut s = s;
        assert!(!smart.should_check(&s, Some(464)));
        assert!(!smart.should_unblock(&mut s, 464, "social_media", RequestType::IMAGE));
        assert!(s.smart_unblocked.is_empty());

        let mut disabled = settings.clone();
        disabled.enable_smart_block = false;
        let smart = SmartBlock::new(&disabled, &compat, &c2p, NOW);
        assert!(!smart.should_check(&s, None));
    }

    #[test]
    fn insecure_and_first_party_checks() {
        let settings = Settings::default();
        let compat = CompatibilityCatalog::default();
        let c2p = ClickToPlayCatalog::default();
        let smart = SmartBlock::new(&settings, &compat, &c2p, NOW);
        let mut resolver = DomainResolver::new();

        let mut tabs = TabSessions::new();
        let s = session(&mut tabs, "https://www.cnn.com/");
        assert!(smart.is_insecure_request(&s, "http://cdn.cnn.com/a.js"));
        assert!(smart.is_insecure_request(&s, "ws://chat.example.com/"));
        assert!(!smart.is_insecure_request(&s, "http://localhost:8080/a.js"));
        assert!(!smart.is_insecure_request(&s, "https://cdn.example.com/a.js"));

        assert!(smart.is_first_party_request(&s, "cdn.cnn.com", &mut resolver));
        assert!(!smart.is_first_party_request(&s, "doubleclick.net", &mut resolver));
    }
}
