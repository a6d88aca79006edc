//! Catalog builders
//!
//! Each builder takes a raw database document and returns a ready catalog
//! stamped with the document's version and CRC32 fingerprint. Bad entries
//! that only affect themselves (a regex that does not compile, a mapping
//! without code) are logged and skipped; a document that does not parse
//! fails as a whole.

use tg_core::catalog::{
    CatalogError, ClickToPlayCatalog, ClickToPlayEntry, CompatibilityCatalog, OverlayKind, Surrogate,
    SurrogateCatalog, TrackerCatalog, TrackerCatalogBuilder,
};
use tg_core::hash::crc32;

use crate::optimizer::{optimize_db, OptimizeStats};
use crate::parser::{
    parse_tracker_db, ClickToPlayDocument, CompatibilityDocument, ParsedTrackerDb, SurrogateDocument,
};

/// Fingerprint identifying a document's exact bytes.
pub fn fingerprint(data: &str) -> u32 {
    crc32(data.as_bytes())
}

/// Parse, optimize and index the tracker database.
pub fn build_tracker_catalog(data: &str) -> Result<(TrackerCatalog, OptimizeStats), CatalogError> {
    let mut db = parse_tracker_db(data)?;
    let stats = optimize_db(&mut db);
    let catalog = compile_tracker_db(db, fingerprint(data))?;
    Ok((catalog, stats))
}

pub fn compile_tracker_db(db: ParsedTrackerDb, fingerprint: u32) -> Result<TrackerCatalog, CatalogError> {
    let mut builder = TrackerCatalogBuilder::new().version(db.version).fingerprint(fingerprint);

    for tracker in db.trackers {
        builder.add_tracker(tracker);
    }
    for (pattern, tracker) in db.bugs {
        builder.add_pattern(pattern, tracker)?;
    }
    for host in &db.hosts {
        builder.add_host(&host.host, host.id);
    }
    for hp in &db.host_paths {
        builder.add_host_path(&hp.host, &hp.path, hp.id);
    }
    for (path, id) in &db.paths {
        builder.add_path(path, *id);
    }
    for (id, source) in &db.regexes {
        if let Err(e) = builder.add_regex(*id, source) {
            log::warn!("Skipping pattern: {}", e);
        }
    }
    for (id, entry) in &db.exceptions {
        builder.add_exception(*id, entry);
    }

    builder.build()
}

pub fn build_compatibility_catalog(data: &str) -> Result<CompatibilityCatalog, CatalogError> {
    let doc: CompatibilityDocument = serde_json::from_str(data)?;
    let mut catalog = CompatibilityCatalog::new(doc.version, fingerprint(data));
    for entry in doc.compatibility {
        catalog.insert(entry.aid, entry.urls);
    }
    Ok(catalog)
}

pub fn build_click2play_catalog(data: &str) -> Result<ClickToPlayCatalog, CatalogError> {
    let doc: ClickToPlayDocument = serde_json::from_str(data)?;
    let mut catalog = ClickToPlayCatalog::new(doc.version, fingerprint(data));
    for raw in doc.click2play {
        catalog.insert(ClickToPlayEntry {
            tracker: raw.aid,
            allow: raw.allow,
            kind: raw.kind.as_deref().map(OverlayKind::from_str).unwrap_or_default(),
            button: raw.button,
            attach: raw.attach,
            ele: raw.ele,
            frame_color: raw.frame_color,
            text: raw.text,
        });
    }
    Ok(catalog)
}

pub fn build_surrogate_catalog(data: &str) -> Result<SurrogateCatalog, CatalogError> {
    let doc: SurrogateDocument = serde_json::from_str(data)?;
    let mut catalog = SurrogateCatalog::new(doc.version, fingerprint(data));

    for mapping in doc.mappings {
        let Some(code) = doc.surrogates.get(&mapping.sid) else {
            log::warn!("Surrogate mapping {} has no code", mapping.sid);
            continue;
        };
        let matcher = match mapping.matcher.as_deref() {
            Some(source) => match SurrogateCatalog::compile_matcher(&mapping.sid, source) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Skipping surrogate: {}", e);
                    continue;
                }
            },
            None => None,
        };
        catalog.insert(Surrogate {
            code: code.clone(),
            sid: mapping.sid,
            app_ids: mapping.app_ids,
            pattern_ids: mapping.pattern_ids,
            sites: mapping.sites.iter().map(|s| s.to_ascii_lowercase()).collect(),
            matcher,
        });
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tg_core::catalog::Catalogs;
    use tg_core::config::MemoryConfigStore;
    use tg_core::pipeline::TRANSPARENT_PNG_URL;
    use tg_core::types::{RequestDetails, RequestType, Timestamp, Verdict};
    use tg_core::RequestPipeline;

    use super::*;

    const TAB: i32 = 4;
    const PAGE: &str = "https://www.cnn.com/";

    fn tracker_db() -> Value {
        json!({
            "apps": {
                "41": { "name": "DoubleClick", "cat": "advertising" },
                "2925": { "name": "Google Analytics", "cat": "site_analytics" },
                "900": { "name": "Disqus", "cat": "comments" }
            },
            "bugs": {
                "1": { "aid": 41 },
                "2": { "aid": 2925 },
                "3": { "aid": 900 },
                "4": { "aid": 41 },
                "5": { "aid": 41 }
            },
            "patterns": {
                "host": {
                    "net": { "doubleclick": { "$": 1 } },
                    "com": { "google-analytics": { "$": 2 }, "disqus": { "$": 3 } }
                },
                "path": { "/pagead/conversion": 4 },
                "regex": {
                    "4": "^https?://[^/]+/adsbygoogle\\.js",
                    "5": "(broken",
                    "99": "^https?://orphan\\."
                }
            },
            "version": 1
        })
    }

    fn pipeline(settings: Value) -> RequestPipeline<MemoryConfigStore> {
        let (trackers, _) = build_tracker_catalog(&tracker_db().to_string()).unwrap();
        let mut catalogs = Catalogs::new();
        catalogs.trackers = trackers;

        let config = MemoryConfigStore::from_json(settings).unwrap();
        let mut pipeline = RequestPipeline::new(config, catalogs);
        pipeline.on_before_navigate(TAB, 0, PAGE, 10_000);
        pipeline.on_navigation_committed(TAB, 0, PAGE, "typed", false, 10_050);
        pipeline
    }

    fn request<'a>(id: &'a str, url: &'a str, kind: RequestType, timestamp: Timestamp) -> RequestDetails<'a> {
        RequestDetails {
            tab_id: TAB,
            frame_id: 0,
            request_id: id,
            url,
            request_type: kind,
            timestamp,
            tab_url: None,
        }
    }

    #[test]
    fn builds_tracker_catalog_from_document() {
        let data = tracker_db().to_string();
        let (catalog, stats) = build_tracker_catalog(&data).unwrap();

        assert_eq!(catalog.version(), Some(1));
        assert_eq!(catalog.fingerprint(), fingerprint(&data));
        assert_eq!(stats.orphaned, 1);
        assert_eq!(catalog.stats().regex_patterns, 1);
        assert_eq!(catalog.match_url("https://stats.g.doubleclick.net/r/collect", None), Some(1));
        assert_eq!(catalog.match_url("https://www.googleadservices.com/pagead/conversion/1/", None), Some(4));
        assert_eq!(catalog.match_url("https://pagead2.example.com/adsbygoogle.js", None), Some(4));
        assert_eq!(catalog.tracker_for(4).map(|t| t.name.as_str()), Some("DoubleClick"));
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let (catalog, stats) = build_tracker_catalog(&tracker_db().to_string()).unwrap();

        assert_eq!(stats.orphaned, 1);
        assert_eq!(catalog.stats().regex_patterns, 1);
        assert_eq!(catalog.match_url("https://x.com/(broken", None), None);
        assert_eq!(catalog.match_url("https://orphan.example.com/", None), None);
        assert_eq!(catalog.match_url("https://cdn.example.com/adsbygoogle.js", None), Some(4));
        assert_eq!(catalog.match_url("https://ad.doubleclick.net/x", None), Some(1));
    }

    #[test]
    fn blocked_tracker_is_cancelled() {
        let mut p = pipeline(json!({ "selected_app_ids": { "41": 1 }, "enable_smart_block": false }));
        let verdict = p.on_before_request(&request("1", "https://ad.doubleclick.net/ddm/ad.js", RequestType::SCRIPT, 10_100));
        assert_eq!(verdict, Verdict::Cancel);
    }

    #[test]
    fn blocked_image_gets_transparent_pixel() {
        let mut p = pipeline(json!({ "selected_app_ids": { "41": 1 }, "enable_smart_block": false }));
        let verdict = p.on_before_request(&request("1", "https://ad.doubleclick.net/pixel", RequestType::IMAGE, 10_100));
        assert_eq!(verdict, Verdict::Redirect(TRANSPARENT_PNG_URL.to_string()));
    }

    #[test]
    fn late_tracker_is_smart_blocked() {
        let mut p = pipeline(json!({ "selected_app_ids": {} }));
        let url = "https://ad.doubleclick.net/late.js";

        let early = p.on_before_request(&request("1", url, RequestType::SCRIPT, 12_000));
        assert_eq!(early, Verdict::Allow);

        let late = p.on_before_request(&request("2", url, RequestType::SCRIPT, 16_000));
        assert_eq!(late, Verdict::Cancel);

        // Safe categories are never smart blocked
        let comments = p.on_before_request(&request("3", "https://cnn.disqus.com/embed.js", RequestType::SCRIPT, 16_000));
        assert_eq!(comments, Verdict::Allow);
    }

    #[test]
    fn insecure_request_is_upgraded_once() {
        let mut p = pipeline(json!({}));
        let url = "http://images.example.org/photo.jpg";

        let first = p.on_before_request(&request("7", url, RequestType::IMAGE, 10_100));
        assert_eq!(first, Verdict::Redirect("https://images.example.org/photo.jpg".to_string()));

        let again = p.on_before_request(&request("7", url, RequestType::IMAGE, 10_200));
        assert_eq!(again, Verdict::Cancel);

        let local = p.on_before_request(&request("8", "http://127.0.0.1:3000/dev.js", RequestType::SCRIPT, 10_300));
        assert_eq!(local, Verdict::Allow);
    }

    #[test]
    fn auxiliary_catalogs() {
        let compat = build_compatibility_catalog(
            &json!({ "compatibility": [{ "aid": 41, "urls": ["cnn.com/video"] }], "version": 2 }).to_string(),
        )
        .unwrap();
        assert!(compat.has_issue(41, "https://www.cnn.com/video/1"));

        let c2p = build_click2play_catalog(
            &json!({ "click2play": [{ "aid": 464, "allow": [1240], "type": "social" }] }).to_string(),
        )
        .unwrap();
        assert_eq!(c2p.entries_for(464)[0].kind, OverlayKind::Social);
        assert_eq!(c2p.allow_set(464), vec![464, 1240]);

        let surrogates = build_surrogate_catalog(
            &json!({
                "mappings": [
                    { "sid": "ga", "app_ids": [2925], "match": "analytics\\.js" },
                    { "sid": "missing", "app_ids": [1] },
                    { "sid": "bad", "app_ids": [1], "match": "(" }
                ],
                "surrogates": { "ga": "window.ga=function(){};", "bad": "x" }
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(surrogates.len(), 1);
        assert!(surrogates
            .data_url("https://www.google-analytics.com/analytics.js", 2925, 2, "cnn.com")
            .is_some());
    }
}
