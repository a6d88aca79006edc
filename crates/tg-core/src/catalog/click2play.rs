//! Click-to-play (deferred consent) catalog and allow-once grants
//!
//! Some trackers are replaced with an interactive placeholder rather than
//! blocked silently. Clicking "allow once" grants the tracker (and the ids
//! its entry lists) a short-lived pass for that tab.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::Serialize;

use super::Tracker;
use crate::types::{TabId, TrackerId};

/// Navigation cycles an "allow once" grant survives.
pub const ALLOW_ONCE_GRANT: u8 = 2;

/// Placeholder flavor. Social placeholders have their own toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    #[default]
    General,
    Social,
}

impl OverlayKind {
    pub fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("social") {
            Self::Social
        } else {
            Self::General
        }
    }
}

/// Placeholder metadata for one tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickToPlayEntry {
    pub tracker: TrackerId,
    /// Trackers allowed together when the user consents
    pub allow: Vec<TrackerId>,
    pub kind: OverlayKind,
    /// Icon shown on the placeholder
    pub button: Option<String>,
    /// CSS selector of the element the placeholder replaces
    pub attach: Option<String>,
    /// Element tag created for the placeholder
    pub ele: Option<String>,
    pub frame_color: Option<String>,
    pub text: Option<String>,
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Default)]
pub struct ClickToPlayCatalog {
    version: Option<u64>,
    fingerprint: u32,
    entries: HashMap<TrackerId, Vec<ClickToPlayEntry>>,
}

impl ClickToPlayCatalog {
    pub fn new(version: Option<u64>, fingerprint: u32) -> Self {
        Self {
            version,
            fingerprint,
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, mut entry: ClickToPlayEntry) {
        if !entry.allow.contains(&entry.tracker) {
            entry.allow.insert(0, entry.tracker);
        }
        self.entries.entry(entry.tracker).or_default().push(entry);
    }

    pub fn has_entry(&self, tracker: TrackerId) -> bool {
        self.entries.contains_key(&tracker)
    }

    pub fn entries_for(&self, tracker: TrackerId) -> &[ClickToPlayEntry] {
        self.entries.get(&tracker).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every tracker id unlocked by consenting to `tracker`.
    pub fn allow_set(&self, tracker: TrackerId) -> Vec<TrackerId> {
        let mut ids = vec![tracker];
        for entry in self.entries_for(tracker) {
            for id in &entry.allow {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Allow-once Grants
// =============================================================================

/// Per-tab "allow once" grants, decremented at each navigation reset.
#[derive(Debug, Default)]
pub struct ConsentGrants {
    tabs: HashMap<TabId, HashMap<TrackerId, u8>>,
}

impl ConsentGrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, tab_id: TabId, trackers: &[TrackerId]) {
        let grants = self.tabs.entry(tab_id).or_default();
        for id in trackers {
            grants.insert(*id, ALLOW_ONCE_GRANT);
        }
    }

    pub fn is_allowed_once(&self, tab_id: TabId, tracker: TrackerId) -> bool {
        self.tabs
            .get(&tab_id)
            .and_then(|grants| grants.get(&tracker))
            .is_some_and(|count| *count > 0)
    }

    /// Navigation boundary: every grant loses one cycle.
    pub fn reset(&mut self, tab_id: TabId) {
        let Some(grants) = self.tabs.get_mut(&tab_id) else {
            return;
        };
        grants.retain(|_, count| {
            *count = count.saturating_sub(1);
            *count > 0
        });
        if grants.is_empty() {
            self.tabs.remove(&tab_id);
        }
    }

    pub fn clear(&mut self, tab_id: TabId) {
        self.tabs.remove(&tab_id);
    }
}

// =============================================================================
// Overlay Payload
// =============================================================================

/// One placeholder for the content script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayItem {
    pub kind: OverlayKind,
    pub attach: Option<String>,
    pub ele: Option<String>,
    pub frame_color: Option<String>,
    pub button: Option<String>,
    pub allow: Vec<TrackerId>,
    pub html: String,
}

/// Placeholders for a blocked tracker, handed to the content-script layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayPayload {
    pub tab_id: TabId,
    pub tracker_id: TrackerId,
    pub tracker_name: String,
    pub items: Vec<OverlayItem>,
}

impl ClickToPlayCatalog {
    /// Build the placeholders for `tracker`, or `None` when it has none to show.
    pub fn build_overlay(&self, tab_id: TabId, tracker: &Tracker, social_enabled: bool) -> Option<OverlayPayload> {
        let items: Vec<OverlayItem> = self
            .entries_for(tracker.id)
            .iter()
            .filter(|entry| social_enabled || entry.kind != OverlayKind::Social)
            .map(|entry| OverlayItem {
                kind: entry.kind,
                attach: entry.attach.clone(),
                ele: entry.ele.clone(),
                frame_color: entry.frame_color.clone(),
                button: entry.button.clone(),
                allow: entry.allow.clone(),
                html: render_placeholder(entry, &tracker.name),
            })
            .collect();

        if items.is_empty() {
            return None;
        }

        Some(OverlayPayload {
            tab_id,
            tracker_id: tracker.id,
            tracker_name: tracker.name.clone(),
            items,
        })
    }
}

fn render_placeholder(entry: &ClickToPlayEntry, name: &str) -> String {
    let allow = entry
        .allow
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut html = String::with_capacity(256);
    let _ = write!(html, "<div class=\"tg-c2p\" data-tracker=\"{}\"", entry.tracker);
    if let Some(color) = &entry.frame_color {
        let _ = write!(html, " style=\"border-color:{}\"", escape_html(color));
    }
    html.push('>');
    if let Some(button) = &entry.button {
        let _ = write!(
            html,
            "<img class=\"tg-c2p-icon\" src=\"{}\" alt=\"{}\">",
            escape_html(button),
            escape_html(name)
        );
    }
    let text = entry.text.as_deref().unwrap_or(name);
    let _ = write!(html, "<p class=\"tg-c2p-text\">{}</p>", escape_html(text));
    let _ = write!(
        html,
        "<button class=\"tg-c2p-allow-once\" data-allow=\"{allow}\">Allow once</button>\
         <button class=\"tg-c2p-allow-always\" data-allow=\"{allow}\">Always allow</button></div>"
    );
    html
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tracker: TrackerId, kind: OverlayKind) -> ClickToPlayEntry {
        ClickToPlayEntry {
            tracker,
            allow: vec![1240],
            kind,
            button: Some("facebook.svg".to_string()),
            attach: Some("iframe[src*=\"facebook\"]".to_string()),
            ele: None,
            frame_color: Some("#1f1f1f".to_string()),
            text: Some("Click to load <Facebook>".to_string()),
        }
    }

    fn facebook() -> Tracker {
        Tracker {
            id: 464,
            name: "Facebook Connect".to_string(),
            category: "social_media".to_string(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn allow_list_always_contains_the_tracker() {
        let mut catalog = ClickToPlayCatalog::new(None, 0);
        catalog.insert(entry(464, OverlayKind::Social));
        assert_eq!(catalog.entries_for(464)[0].allow, vec![464, 1240]);
        assert_eq!(catalog.allow_set(464), vec![464, 1240]);
        assert_eq!(catalog.allow_set(5), vec![5]);
    }

    #[test]
    fn grants_expire_after_two_resets() {
        let mut grants = ConsentGrants::new();
        grants.grant(7, &[464, 1240]);
        assert!(grants.is_allowed_once(7, 1240));
        assert!(!grants.is_allowed_once(8, 1240));

        grants.reset(7);
        assert!(grants.is_allowed_once(7, 464));
        grants.reset(7);
        assert!(!grants.is_allowed_once(7, 464));
        assert!(grants.tabs.is_empty());
    }

    #[test]
    fn social_overlays_follow_their_toggle() {
        let mut catalog = ClickToPlayCatalog::new(None, 0);
        catalog.insert(entry(464, OverlayKind::Social));

        assert!(catalog.build_overlay(3, &facebook(), false).is_none());

        let payload = catalog.build_overlay(3, &facebook(), true).expect("overlay");
        assert_eq!(payload.items.len(), 1);
        let html = &payload.items[0].html;
        assert!(html.contains("data-allow=\"464,1240\""));
        assert!(html.contains("Click to load &lt;Facebook&gt;"));
    }
}
