//! Work scheduled from the request hook
//!
//! The before-request hook must answer without suspending. Anything that
//! only records or displays (ledger updates, panel refreshes, overlays, tab
//! redirects) is queued here and run by `RequestPipeline::run_deferred`
//! on the host's next zero-delay tick.

use std::collections::VecDeque;

use crate::ledger::Issue;
use crate::types::{RequestType, TabId, TrackerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredTask {
    /// Add a tracker sighting to the ledger
    RecordSighting {
        tab_id: TabId,
        tracker: TrackerId,
        url: String,
        request_type: RequestType,
        blocked: bool,
    },
    /// Set an issue flag on a tracker already in the ledger
    FlagIssue {
        tab_id: TabId,
        tracker: TrackerId,
        issue: Issue,
    },
    /// Build and send click-to-play placeholders
    BuildOverlay { tab_id: TabId, tracker: TrackerId },
    /// Navigate the tab elsewhere
    RedirectTab { tab_id: TabId, url: String },
    /// Push fresh counts to the panel
    RefreshPanel { tab_id: TabId },
}

impl DeferredTask {
    pub fn tab_id(&self) -> TabId {
        match self {
            Self::RecordSighting { tab_id, .. }
            | Self::FlagIssue { tab_id, .. }
            | Self::BuildOverlay { tab_id, .. }
            | Self::RedirectTab { tab_id, .. }
            | Self::RefreshPanel { tab_id } => *tab_id,
        }
    }
}

/// FIFO of deferred tasks.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    tasks: VecDeque<DeferredTask>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: DeferredTask) {
        self.tasks.push_back(task);
    }

    pub fn pop(&mut self) -> Option<DeferredTask> {
        self.tasks.pop_front()
    }

    /// Drop pending work for a closed tab.
    pub fn discard_tab(&mut self, tab_id: TabId) {
        self.tasks.retain(|task| task.tab_id() != tab_id);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_and_discard() {
        let mut queue = DeferredQueue::new();
        queue.push(DeferredTask::RefreshPanel { tab_id: 1 });
        queue.push(DeferredTask::BuildOverlay { tab_id: 2, tracker: 464 });
        queue.push(DeferredTask::RedirectTab { tab_id: 1, url: "about:blank".to_string() });

        queue.discard_tab(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(DeferredTask::RefreshPanel { tab_id: 1 }));
        assert_eq!(queue.pop().map(|t| t.tab_id()), Some(1));
        assert!(queue.is_empty());
    }
}
