//! Trackguard Database Compiler
//!
//! This crate turns the JSON tracker, compatibility, click-to-play and
//! surrogate databases into `tg-core` catalogs.

pub mod builder;
pub mod optimizer;
pub mod parser;

pub use builder::{
    build_click2play_catalog, build_compatibility_catalog, build_surrogate_catalog, build_tracker_catalog,
    compile_tracker_db, fingerprint,
};
pub use optimizer::{optimize_db, OptimizeStats};
pub use parser::{parse_tracker_db, ParsedTrackerDb};

use tg_core::catalog::Catalogs;
use tg_core::config::ConfigStore;
use tg_core::policy::apply_block_by_default;

/// Which database a document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Trackers,
    Compatibility,
    ClickToPlay,
    Surrogates,
}

impl ListKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bugs" | "trackers" => Some(Self::Trackers),
            "compatibility" => Some(Self::Compatibility),
            "click2play" => Some(Self::ClickToPlay),
            "surrogates" => Some(Self::Surrogates),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trackers => "bugs",
            Self::Compatibility => "compatibility",
            Self::ClickToPlay => "click2play",
            Self::Surrogates => "surrogates",
        }
    }
}

/// Rebuild one catalog from a raw document.
///
/// `from_memory` is set when the document comes from local storage rather
/// than a fresh download; only fresh tracker databases apply
/// "block new trackers by default". Returns false when the document was
/// rejected, in which case the previous catalog stays in place.
pub fn process_list<C: ConfigStore>(
    kind: ListKind,
    catalogs: &mut Catalogs,
    config: &mut C,
    from_memory: bool,
    data: &str,
) -> bool {
    let print = fingerprint(data);
    let current = match kind {
        ListKind::Trackers => (catalogs.trackers.fingerprint(), catalogs.trackers.is_empty()),
        ListKind::Compatibility => (catalogs.compatibility.fingerprint(), catalogs.compatibility.is_empty()),
        ListKind::ClickToPlay => (catalogs.click2play.fingerprint(), catalogs.click2play.is_empty()),
        ListKind::Surrogates => (catalogs.surrogates.fingerprint(), catalogs.surrogates.is_empty()),
    };
    if current == (print, false) {
        log::debug!("{} unchanged, skipping reload", kind.as_str());
        return true;
    }

    let result = match kind {
        ListKind::Trackers => build_tracker_catalog(data).map(|(catalog, stats)| {
            let new_ids = catalogs.trackers.replace(catalog).to_vec();
            let s = catalogs.trackers.stats();
            log::info!(
                "Loaded bugs v{:?}: {} trackers, {} patterns ({} deduped, {} orphaned), {} new",
                catalogs.trackers.version(),
                s.trackers,
                stats.after,
                stats.deduped,
                stats.orphaned,
                new_ids.len()
            );
            if !from_memory {
                let all = catalogs.trackers.tracker_ids();
                match apply_block_by_default(config, all, &new_ids) {
                    Ok(0) => {}
                    Ok(n) => log::info!("Blocking {} new trackers by default", n),
                    Err(e) => log::warn!("Failed to update tracker selection: {}", e),
                }
            }
        }),
        ListKind::Compatibility => build_compatibility_catalog(data).map(|catalog| {
            log::info!("Loaded compatibility v{:?}: {} trackers", catalog.version(), catalog.len());
            catalogs.compatibility = catalog;
        }),
        ListKind::ClickToPlay => build_click2play_catalog(data).map(|catalog| {
            log::info!("Loaded click2play v{:?}: {} trackers", catalog.version(), catalog.len());
            catalogs.click2play = catalog;
        }),
        ListKind::Surrogates => build_surrogate_catalog(data).map(|catalog| {
            log::info!("Loaded surrogates v{:?}: {} mappings", catalog.version(), catalog.len());
            catalogs.surrogates = catalog;
        }),
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to load {}: {}", kind.as_str(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tg_core::config::MemoryConfigStore;

    fn db(ids: &[u32]) -> String {
        let apps: serde_json::Map<String, serde_json::Value> = ids
            .iter()
            .map(|id| (id.to_string(), json!({ "name": format!("Tracker {id}"), "cat": "advertising" })))
            .collect();
        let bugs: serde_json::Map<String, serde_json::Value> =
            ids.iter().map(|id| (id.to_string(), json!({ "aid": id }))).collect();
        json!({ "apps": apps, "bugs": bugs, "patterns": {}, "version": ids.len() }).to_string()
    }

    #[test]
    fn failed_load_keeps_previous_catalog() {
        let mut catalogs = Catalogs::new();
        let mut config = MemoryConfigStore::new();

        assert!(process_list(ListKind::Trackers, &mut catalogs, &mut config, true, &db(&[1, 2])));
        assert!(!process_list(ListKind::Trackers, &mut catalogs, &mut config, false, "{ broken"));
        assert_eq!(catalogs.trackers.stats().trackers, 2);
        assert!(!process_list(ListKind::Surrogates, &mut catalogs, &mut config, false, "[]"));
    }

    #[test]
    fn identical_document_is_a_no_op() {
        let mut catalogs = Catalogs::new();
        let mut config = MemoryConfigStore::new();
        let data = db(&[1, 2]);

        assert!(process_list(ListKind::Trackers, &mut catalogs, &mut config, true, &data));
        assert!(process_list(ListKind::Trackers, &mut catalogs, &mut config, false, &data));
        // The diff of a real reload is still from the first load
        assert!(catalogs.trackers.newly_added().is_empty());
    }

    #[test]
    fn fresh_database_blocks_new_trackers_by_default() {
        let mut catalogs = Catalogs::new();
        let mut config = MemoryConfigStore::from_json(json!({ "block_by_default": true })).unwrap();

        assert!(process_list(ListKind::Trackers, &mut catalogs, &mut config, true, &db(&[1, 2])));
        assert!(config.settings().selected_app_ids.is_empty());

        assert!(process_list(ListKind::Trackers, &mut catalogs, &mut config, false, &db(&[1, 2, 3])));
        assert_eq!(catalogs.trackers.newly_added(), &[3]);
        assert!(config.settings().is_globally_blocked(3));
        assert!(!config.settings().is_globally_blocked(1));
        assert_eq!(config.settings().known_app_ids.len(), 3);
    }

    #[test]
    fn list_names() {
        assert_eq!(ListKind::from_str("bugs"), Some(ListKind::Trackers));
        assert_eq!(ListKind::from_str("click2play").map(|k| k.as_str()), Some("click2play"));
        assert_eq!(ListKind::from_str("cmp"), None);
    }
}
