//! Found-trackers ledger
//!
//! Accumulates every tracker sighting per tab for the panel. Repeated
//! sightings of one tracker merge into a single entry whose `blocked` state
//! only ever goes from true to false: once a tracker got through in a tab
//! it is displayed as unblocked until the tab's data is cleared.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::catalog::Tracker;
use crate::types::{RequestType, TabId, TrackerId};

/// One observed request of a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub src: String,
    #[serde(rename = "type")]
    pub request_type: &'static str,
    pub blocked: bool,
}

/// Issue flags a tracker can carry in a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issue {
    /// Loaded over plain HTTP by a secure page
    Insecure,
    /// Responded slowly
    Latency,
    /// Known to break this page when blocked
    Compatibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoundTracker {
    pub id: TrackerId,
    pub name: String,
    pub cat: String,
    pub sources: Vec<Source>,
    pub blocked: bool,
    pub insecure: bool,
    pub latency: bool,
    pub compatibility: bool,
}

impl FoundTracker {
    pub fn has_issue(&self) -> bool {
        self.insecure || self.latency || self.compatibility
    }
}

/// Per-category rollup for the panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub id: String,
    pub trackers: Vec<TrackerId>,
    pub total: usize,
    pub blocked: usize,
}

/// Per-tab counts pushed to the panel after each sighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TabSummary {
    pub tab_id: TabId,
    pub total: usize,
    pub blocked: usize,
    pub insecure: usize,
    pub latency: usize,
    pub compatibility: usize,
}

#[derive(Debug, Default)]
pub struct FoundTrackers {
    tabs: HashMap<TabId, BTreeMap<TrackerId, FoundTracker>>,
}

impl FoundTrackers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting. Returns true the first time a tracker is seen in the tab.
    pub fn record(&mut self, tab_id: TabId, tracker: &Tracker, src: &str, request_type: RequestType, blocked: bool) -> bool {
        let source = Source {
            src: src.to_string(),
            request_type: request_type.as_str(),
            blocked,
        };

        let entries = self.tabs.entry(tab_id).or_default();
        match entries.get_mut(&tracker.id) {
            Some(entry) => {
                entry.blocked = entry.blocked && blocked;
                entry.sources.push(source);
                false
            }
            None => {
                entries.insert(
                    tracker.id,
                    FoundTracker {
                        id: tracker.id,
                        name: tracker.name.clone(),
                        cat: tracker.category.clone(),
                        sources: vec![source],
                        blocked,
                        insecure: false,
                        latency: false,
                        compatibility: false,
                    },
                );
                true
            }
        }
    }

    /// Set an issue flag on a tracker already seen in the tab.
    pub fn flag(&mut self, tab_id: TabId, tracker: TrackerId, issue: Issue) -> bool {
        let Some(entry) = self.tabs.get_mut(&tab_id).and_then(|t| t.get_mut(&tracker)) else {
            return false;
        };
        match issue {
            Issue::Insecure => entry.insecure = true,
            Issue::Latency => entry.latency = true,
            Issue::Compatibility => entry.compatibility = true,
        }
        true
    }

    pub fn get(&self, tab_id: TabId, tracker: TrackerId) -> Option<&FoundTracker> {
        self.tabs.get(&tab_id)?.get(&tracker)
    }

    pub fn clear(&mut self, tab_id: TabId) {
        self.tabs.remove(&tab_id);
    }

    /// Trackers seen in the tab, ordered by name.
    pub fn get_apps(&self, tab_id: TabId) -> Vec<&FoundTracker> {
        let mut apps: Vec<&FoundTracker> = self
            .tabs
            .get(&tab_id)
            .map(|t| t.values().collect())
            .unwrap_or_default();
        apps.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        apps
    }

    pub fn get_categories(&self, tab_id: TabId) -> Vec<CategorySummary> {
        let mut categories: BTreeMap<&str, CategorySummary> = BTreeMap::new();
        for app in self.tabs.get(&tab_id).into_iter().flat_map(|t| t.values()) {
            let summary = categories.entry(app.cat.as_str()).or_insert_with(|| CategorySummary {
                id: app.cat.clone(),
                trackers: Vec::new(),
                total: 0,
                blocked: 0,
            });
            summary.trackers.push(app.id);
            summary.total += 1;
            if app.blocked {
                summary.blocked += 1;
            }
        }
        categories.into_values().collect()
    }

    pub fn app_ids(&self, tab_id: TabId) -> Vec<TrackerId> {
        self.tabs
            .get(&tab_id)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn summary(&self, tab_id: TabId) -> TabSummary {
        let mut summary = TabSummary {
            tab_id,
            ..TabSummary::default()
        };
        for app in self.tabs.get(&tab_id).into_iter().flat_map(|t| t.values()) {
            summary.total += 1;
            summary.blocked += usize::from(app.blocked);
            summary.insecure += usize::from(app.insecure);
            summary.latency += usize::from(app.latency);
            summary.compatibility += usize::from(app.compatibility);
        }
        summary
    }
}
