//! Browser side effects
//!
//! The pipeline decides synchronously and never talks to the browser from
//! inside a request hook. Side effects go through `BrowserApi` when the
//! deferred queue is drained. Host APIs behind these calls are
//! fire-and-forget, so the methods return nothing.

use serde::Serialize;

use crate::catalog::OverlayPayload;
use crate::ledger::TabSummary;
use crate::types::TabId;

pub trait BrowserApi {
    /// Navigate a tab to `url`.
    fn redirect_tab(&mut self, tab_id: TabId, url: &str);

    /// Hand click-to-play placeholders to the content-script layer.
    fn send_overlay(&mut self, payload: &OverlayPayload);

    /// Tracker counts changed for a tab.
    fn refresh_panel(&mut self, summary: &TabSummary);
}

/// A side effect, as recorded by `BufferedBrowser`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserAction {
    RedirectTab { tab_id: TabId, url: String },
    Overlay { payload: OverlayPayload },
    RefreshPanel { summary: TabSummary },
}

/// `BrowserApi` that only records actions, for a host to replay later
/// (the wasm bindings hand these to JavaScript).
#[derive(Debug, Default)]
pub struct BufferedBrowser {
    actions: Vec<BrowserAction>,
}

impl BufferedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> &[BrowserAction] {
        &self.actions
    }

    pub fn take(&mut self) -> Vec<BrowserAction> {
        std::mem::take(&mut self.actions)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl BrowserApi for BufferedBrowser {
    fn redirect_tab(&mut self, tab_id: TabId, url: &str) {
        self.actions.push(BrowserAction::RedirectTab {
            tab_id,
            url: url.to_string(),
        });
    }

    fn send_overlay(&mut self, payload: &OverlayPayload) {
        self.actions.push(BrowserAction::Overlay {
            payload: payload.clone(),
        });
    }

    fn refresh_panel(&mut self, summary: &TabSummary) {
        // Only the latest counts per tab matter
        self.actions.retain(|a| !matches!(a, BrowserAction::RefreshPanel { summary: s } if s.tab_id == summary.tab_id));
        self.actions.push(BrowserAction::RefreshPanel { summary: *summary });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_refreshes_collapse_per_tab() {
        let mut browser = BufferedBrowser::new();
        browser.refresh_panel(&TabSummary { tab_id: 1, total: 1, ..TabSummary::default() });
        browser.redirect_tab(1, "https://example.com/blocked");
        browser.refresh_panel(&TabSummary { tab_id: 2, total: 1, ..TabSummary::default() });
        browser.refresh_panel(&TabSummary { tab_id: 1, total: 2, ..TabSummary::default() });

        let actions = browser.take();
        assert_eq!(actions.len(), 3);
        assert!(matches!(&actions[2], BrowserAction::RefreshPanel { summary } if summary.total == 2));
        assert!(browser.is_empty());
    }

    #[test]
    fn actions_serialize_tagged() {
        let action = BrowserAction::RedirectTab { tab_id: 3, url: "about:blank".to_string() };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "redirect_tab");
        assert_eq!(json["tab_id"], 3);
    }
}
