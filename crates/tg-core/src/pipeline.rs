//! Request pipeline
//!
//! The orchestrator behind every browser event. `on_before_request` is the
//! hot path: it answers synchronously with a `Verdict` and queues all
//! bookkeeping on the deferred queue, which the host drains with
//! `run_deferred` on its next tick.
//!
//! # Per-request steps
//!
//! 1. Requests without a tab are allowed
//! 2. The tab session is created lazily if navigation was never seen
//! 3. Main-frame requests are skipped unless they follow a redirect
//! 4. Insecure sub-resources of secure pages are upgraded once
//! 5. Catalog match; no match is allowed
//! 6. First-party requests are allowed
//! 7. Policy decision
//! 8. Smart blocking may flip it; allowed requests are timed
//! 9. Ledger, panel and overlay work is deferred
//! 10. Blocked requests get a substitute response or are cancelled

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::browser::BrowserApi;
use crate::catalog::{Catalogs, ConsentGrants, SurrogateCatalog};
use crate::config::{keys, ConfigError, ConfigStore};
use crate::deferred::{DeferredQueue, DeferredTask};
use crate::ledger::{FoundTrackers, Issue};
use crate::policy::{self, PolicyQuery, PolicyResolver};
use crate::psl::DomainResolver;
use crate::smart_block::SmartBlock;
use crate::tab::{TabSession, TabSessions};
use crate::types::{PatternId, RequestDetails, RequestType, TabId, Timestamp, TrackerId, Verdict};
use crate::url::{extract_host, upgrade_to_https};

/// Replacement for blocked frames.
pub const BLANK_FRAME_URL: &str = "about:blank";

/// Replacement for blocked images: a 1x1 transparent PNG.
pub const TRANSPARENT_PNG_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAAC0lEQVR42mNgAAIAAAUAAen63NgAAAAASUVORK5CYII=";

/// Allowed tracker requests slower than this are flagged.
pub const LATENCY_THRESHOLD_MS: Timestamp = 1_000;

/// Context of a blocked redirect, read by the blocked-redirect page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedRedirectData {
    pub tracker_id: TrackerId,
    pub tracker_name: String,
    /// The blocked redirect target
    pub url: String,
    pub redirect_chain: Vec<String>,
    pub page_url: String,
}

/// An allowed tracker request waiting for completion.
#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    tab_id: TabId,
    tracker: TrackerId,
    start: Timestamp,
}

pub struct RequestPipeline<C: ConfigStore> {
    config: C,
    catalogs: Catalogs,
    tabs: TabSessions,
    ledger: FoundTrackers,
    grants: ConsentGrants,
    domains: DomainResolver,
    /// Keyed by (request id, url): request ids repeat across redirects
    pending: HashMap<(String, String), PendingRequest>,
    blocked_redirects: HashMap<TabId, BlockedRedirectData>,
    deferred: DeferredQueue,
}

impl<C: ConfigStore> RequestPipeline<C> {
    pub fn new(config: C, catalogs: Catalogs) -> Self {
        Self {
            config,
            catalogs,
            tabs: TabSessions::new(),
            ledger: FoundTrackers::new(),
            grants: ConsentGrants::new(),
            domains: DomainResolver::new(),
            pending: HashMap::new(),
            blocked_redirects: HashMap::new(),
            deferred: DeferredQueue::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut C {
        &mut self.config
    }

    pub fn catalogs(&self) -> &Catalogs {
        &self.catalogs
    }

    pub fn catalogs_mut(&mut self) -> &mut Catalogs {
        &mut self.catalogs
    }

    /// Catalogs and config together, for database reloads that touch both.
    pub fn parts_mut(&mut self) -> (&mut Catalogs, &mut C) {
        (&mut self.catalogs, &mut self.config)
    }

    pub fn domains_mut(&mut self) -> &mut DomainResolver {
        &mut self.domains
    }

    pub fn session(&self, tab_id: TabId) -> Option<&TabSession> {
        self.tabs.get(tab_id)
    }

    pub fn tabs(&self) -> &TabSessions {
        &self.tabs
    }

    pub fn ledger(&self) -> &FoundTrackers {
        &self.ledger
    }

    pub fn grants(&self) -> &ConsentGrants {
        &self.grants
    }

    pub fn blocked_redirect(&self, tab_id: TabId) -> Option<&BlockedRedirectData> {
        self.blocked_redirects.get(&tab_id)
    }

    pub fn take_blocked_redirect(&mut self, tab_id: TabId) -> Option<BlockedRedirectData> {
        self.blocked_redirects.remove(&tab_id)
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    // =========================================================================
    // Navigation Events
    // =========================================================================

    /// Top-level navigation start.
    pub fn on_before_navigate(&mut self, tab_id: TabId, frame_id: i32, url: &str, timestamp: Timestamp) {
        if frame_id != 0 {
            return;
        }
        self.grants.reset(tab_id);
        self.ledger.clear(tab_id);
        self.pending.retain(|_, p| p.tab_id != tab_id);
        self.tabs.begin_navigation(tab_id, url, timestamp);
    }

    /// `transition_type` is the browser's value; only `reload` counts as a reload.
    pub fn on_navigation_committed(
        &mut self,
        tab_id: TabId,
        frame_id: i32,
        url: &str,
        transition_type: &str,
        incognito: bool,
        timestamp: Timestamp,
    ) {
        if frame_id != 0 {
            return;
        }
        self.tabs.commit(tab_id, url, transition_type == "reload", incognito, timestamp);
    }

    /// Document ready: overlays for click-to-play trackers blocked so far.
    pub fn on_dom_content_loaded(&mut self, tab_id: TabId, frame_id: i32) {
        if frame_id != 0 || !self.config.settings().enable_click2play {
            return;
        }
        let Some(session) = self.tabs.get(tab_id) else {
            return;
        };
        for app in self.ledger.get_apps(tab_id) {
            if app.blocked && self.catalogs.click2play.has_entry(app.id) && !session.overlays.contains(&app.id) {
                self.deferred.push(DeferredTask::BuildOverlay { tab_id, tracker: app.id });
            }
        }
    }

    /// Navigation finished, successfully or not.
    pub fn on_navigation_completed(&mut self, tab_id: TabId, frame_id: i32) {
        if frame_id == 0 && self.tabs.contains(tab_id) {
            self.deferred.push(DeferredTask::RefreshPanel { tab_id });
        }
    }

    // =========================================================================
    // Request Events
    // =========================================================================

    /// Decide a request. Never fails: anything unexpected allows.
    pub fn on_before_request(&mut self, details: &RequestDetails<'_>) -> Verdict {
        if details.tab_id < 0 {
            return Verdict::Allow;
        }
        let tab_id = details.tab_id;
        let now = details.timestamp;
        let is_main_frame = details.request_type.contains(RequestType::MAIN_FRAME);

        if !self.tabs.contains(tab_id) {
            let fallback = if is_main_frame { Some(details.url) } else { None };
            let Some(tab_url) = details.tab_url.or(fallback) else {
                return Verdict::Allow;
            };
            self.tabs.ensure(tab_id, tab_url, now);
        }
        let Some(session) = self.tabs.get_mut(tab_id) else {
            return Verdict::Allow;
        };

        if is_main_frame && !session.is_redirect(details.request_id) {
            return Verdict::Allow;
        }

        let settings = self.config.settings();
        let smart = SmartBlock::new(settings, &self.catalogs.compatibility, &self.catalogs.click2play, now);

        if smart.is_insecure_request(session, details.url) {
            if session.upgraded.insert(details.request_id.to_string()) {
                if let Some(secure) = upgrade_to_https(details.url) {
                    log::debug!("Upgrading insecure request {}", details.url);
                    return Verdict::Redirect(secure);
                }
            }
            log::debug!("Cancelling repeated insecure request {}", details.url);
            return Verdict::Cancel;
        }

        let trackers = &self.catalogs.trackers;
        let Some(pattern) = trackers.match_url(details.url, Some(&session.url.url)) else {
            return Verdict::Allow;
        };
        let Some(tracker) = trackers.tracker_for(pattern) else {
            return Verdict::Allow;
        };

        let request_host = extract_host(details.url).unwrap_or("");
        if smart.is_first_party_request(session, request_host, &mut self.domains) {
            return Verdict::Allow;
        }

        let decision = PolicyResolver::new(settings, &self.grants, now).resolve(&PolicyQuery {
            tracker: tracker.id,
            category: &tracker.category,
            tab_id,
            tab_host: session.host(),
            page_url: &session.url.url,
        });

        let mut block = decision.block;
        if block {
            if smart.should_unblock(session, tracker.id, &tracker.category, details.request_type) {
                block = false;
            }
        } else if smart.should_block(session, tracker.id, &tracker.category, details.request_type, now) {
            block = true;
        }

        log::debug!(
            "tab {} tracker {} ({}) {:?} -> {}",
            tab_id,
            tracker.id,
            tracker.name,
            decision.reason,
            if block { "block" } else { "allow" }
        );

        if !block {
            self.pending.insert(
                (details.request_id.to_string(), details.url.to_string()),
                PendingRequest {
                    tab_id,
                    tracker: tracker.id,
                    start: now,
                },
            );
        }

        self.deferred.push(DeferredTask::RecordSighting {
            tab_id,
            tracker: tracker.id,
            url: details.url.to_string(),
            request_type: details.request_type,
            blocked: block,
        });
        if self.catalogs.compatibility.has_issue(tracker.id, &session.url.url) {
            self.deferred.push(DeferredTask::FlagIssue {
                tab_id,
                tracker: tracker.id,
                issue: Issue::Compatibility,
            });
        }
        if session.upgraded.contains(details.request_id) {
            self.deferred.push(DeferredTask::FlagIssue {
                tab_id,
                tracker: tracker.id,
                issue: Issue::Insecure,
            });
        }
        if block
            && settings.enable_click2play
            && self.catalogs.click2play.has_entry(tracker.id)
            && !session.overlays.contains(&tracker.id)
        {
            self.deferred.push(DeferredTask::BuildOverlay {
                tab_id,
                tracker: tracker.id,
            });
        }

        if !block {
            return Verdict::Allow;
        }

        if session.is_redirect(details.request_id) {
            if let Some(page) = &settings.blocked_redirect_page {
                let redirect_chain = session.redirects.get(details.request_id).cloned().unwrap_or_default();
                self.blocked_redirects.insert(
                    tab_id,
                    BlockedRedirectData {
                        tracker_id: tracker.id,
                        tracker_name: tracker.name.clone(),
                        url: details.url.to_string(),
                        redirect_chain,
                        page_url: session.url.url.clone(),
                    },
                );
                self.deferred.push(DeferredTask::RedirectTab {
                    tab_id,
                    url: page.clone(),
                });
                return Verdict::Cancel;
            }
        }

        substitute(&self.catalogs.surrogates, details, tracker.id, pattern, session.host())
    }

    /// Redirect observed. Main-frame redirects feed the redirect chain.
    pub fn on_before_redirect(
        &mut self,
        tab_id: TabId,
        request_id: &str,
        url: &str,
        redirect_url: &str,
        request_type: RequestType,
        timestamp: Timestamp,
    ) {
        self.finish_request(request_id, url, timestamp);

        if !request_type.contains(RequestType::MAIN_FRAME) {
            return;
        }
        if let Some(session) = self.tabs.get_mut(tab_id) {
            let chain = session.redirects.entry(request_id.to_string()).or_default();
            if chain.is_empty() {
                chain.push(url.to_string());
            }
            chain.push(redirect_url.to_string());
        }
    }

    pub fn on_request_completed(&mut self, request_id: &str, url: &str, timestamp: Timestamp) {
        self.finish_request(request_id, url, timestamp);
    }

    pub fn on_request_error(&mut self, request_id: &str, url: &str, timestamp: Timestamp) {
        self.finish_request(request_id, url, timestamp);
    }

    fn finish_request(&mut self, request_id: &str, url: &str, timestamp: Timestamp) {
        let Some(pending) = self.pending.remove(&(request_id.to_string(), url.to_string())) else {
            return;
        };
        let elapsed = timestamp.saturating_sub(pending.start);
        if elapsed >= LATENCY_THRESHOLD_MS {
            log::debug!("Tracker {} took {}ms on tab {}", pending.tracker, elapsed, pending.tab_id);
            self.deferred.push(DeferredTask::FlagIssue {
                tab_id: pending.tab_id,
                tracker: pending.tracker,
                issue: Issue::Latency,
            });
        }
    }

    // =========================================================================
    // Tab Events
    // =========================================================================

    pub fn on_tab_created(&mut self, tab_id: TabId, url: &str, timestamp: Timestamp) {
        if !url.is_empty() {
            self.tabs.ensure(tab_id, url, timestamp);
        }
    }

    pub fn on_tab_activated(&mut self, tab_id: TabId) {
        self.deferred.push(DeferredTask::RefreshPanel { tab_id });
    }

    /// The tab's next navigation is a prerender.
    pub fn mark_prefetched(&mut self, tab_id: TabId) {
        self.tabs.mark_prefetched(tab_id);
    }

    pub fn on_tab_replaced(&mut self, added: TabId, removed: TabId) {
        self.tabs.replace(added, removed);
        self.forget_tab(removed);
    }

    pub fn on_tab_removed(&mut self, tab_id: TabId) {
        self.tabs.remove(tab_id);
        self.forget_tab(tab_id);
    }

    fn forget_tab(&mut self, tab_id: TabId) {
        self.ledger.clear(tab_id);
        self.grants.clear(tab_id);
        self.deferred.discard_tab(tab_id);
        self.pending.retain(|_, p| p.tab_id != tab_id);
        self.blocked_redirects.remove(&tab_id);
    }

    // =========================================================================
    // Click-to-play
    // =========================================================================

    /// "Allow once" for a tracker and its companions. Returns the ids granted.
    pub fn allow_once(&mut self, tab_id: TabId, tracker: TrackerId) -> Vec<TrackerId> {
        let ids = self.catalogs.click2play.allow_set(tracker);
        self.grants.grant(tab_id, &ids);
        ids
    }

    /// "Always allow" on the tab's site. Returns the ids unblocked.
    pub fn allow_always(&mut self, tab_id: TabId, tracker: TrackerId) -> Result<Vec<TrackerId>, ConfigError> {
        let Some(host) = self.tabs.get(tab_id).map(|s| s.host().to_string()) else {
            log::warn!("allow_always for unknown tab {}", tab_id);
            return Ok(Vec::new());
        };
        let ids = self.catalogs.click2play.allow_set(tracker);
        policy::allow_always(&mut self.config, &host, &ids)?;
        Ok(ids)
    }

    // =========================================================================
    // Timers & Deferred Work
    // =========================================================================

    /// Expire navigation watchdogs and auto-resume paused blocking.
    /// Returns the tabs cleared by the watchdog.
    pub fn run_timers(&mut self, now: Timestamp) -> Vec<TabId> {
        let cleared = self.tabs.expire_watchdogs(now);
        for tab_id in &cleared {
            self.forget_tab(*tab_id);
        }

        let resume = {
            let s = self.config.settings();
            s.paused_blocking && !s.is_paused(now)
        };
        if resume {
            let result = self
                .config
                .set(keys::PAUSED_BLOCKING, Value::Bool(false))
                .and_then(|_| self.config.set(keys::PAUSED_BLOCKING_TIMEOUT, Value::Null));
            match result {
                Ok(()) => log::info!("Pause expired, blocking resumed"),
                Err(e) => log::warn!("Failed to resume blocking: {}", e),
            }
        }

        cleared
    }

    /// Run queued side effects. Returns how many tasks ran.
    pub fn run_deferred<B: BrowserApi>(&mut self, browser: &mut B) -> usize {
        let mut ran = 0;
        while let Some(task) = self.deferred.pop() {
            ran += 1;
            match task {
                DeferredTask::RecordSighting {
                    tab_id,
                    tracker,
                    url,
                    request_type,
                    blocked,
                } => {
                    // Tab may have closed since the request
                    if !self.tabs.contains(tab_id) {
                        continue;
                    }
                    let Some(tracker) = self.catalogs.trackers.tracker(tracker) else {
                        continue;
                    };
                    self.ledger.record(tab_id, tracker, &url, request_type, blocked);
                    browser.refresh_panel(&self.ledger.summary(tab_id));
                }
                DeferredTask::FlagIssue { tab_id, tracker, issue } => {
                    if self.ledger.flag(tab_id, tracker, issue) {
                        browser.refresh_panel(&self.ledger.summary(tab_id));
                    }
                }
                DeferredTask::BuildOverlay { tab_id, tracker } => {
                    let social = self.config.settings().enable_click2play_social;
                    let Some(session) = self.tabs.get_mut(tab_id) else {
                        continue;
                    };
                    let Some(tracker) = self.catalogs.trackers.tracker(tracker) else {
                        continue;
                    };
                    if session.overlays.contains(&tracker.id) {
                        continue;
                    }
                    if let Some(payload) = self.catalogs.click2play.build_overlay(tab_id, tracker, social) {
                        session.overlays.insert(tracker.id);
                        browser.send_overlay(&payload);
                    }
                }
                DeferredTask::RedirectTab { tab_id, url } => browser.redirect_tab(tab_id, &url),
                DeferredTask::RefreshPanel { tab_id } => browser.refresh_panel(&self.ledger.summary(tab_id)),
            }
        }
        ran
    }
}

/// Response for a blocked request, by request type.
fn substitute(
    surrogates: &SurrogateCatalog,
    details: &RequestDetails<'_>,
    tracker: TrackerId,
    pattern: PatternId,
    page_host: &str,
) -> Verdict {
    let kind = details.request_type;
    if kind.contains(RequestType::SUBDOCUMENT) {
        Verdict::Redirect(BLANK_FRAME_URL.to_string())
    } else if kind.contains(RequestType::IMAGE) {
        Verdict::Redirect(TRANSPARENT_PNG_URL.to_string())
    } else if kind.contains(RequestType::SCRIPT) {
        match surrogates.data_url(details.url, tracker, pattern, page_host) {
            Some(url) => Verdict::Redirect(url),
            None => Verdict::Cancel,
        }
    } else {
        Verdict::Cancel
    }
}
