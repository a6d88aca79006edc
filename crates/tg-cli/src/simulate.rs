//! Replay a recorded browser event trace through the request pipeline.
//!
//! A trace is JSON lines, one event per line, tagged by `event`:
//!
//! ```text
//! {"event":"before_navigate","tabId":4,"url":"https://www.cnn.com/","timestamp":1000}
//! {"event":"navigation_committed","tabId":4,"url":"https://www.cnn.com/","timestamp":1050}
//! {"event":"before_request","tabId":4,"requestId":"7","url":"https://ad.doubleclick.net/x.js","type":"script","timestamp":1100}
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tg_core::browser::BrowserAction;
use tg_core::catalog::Catalogs;
use tg_core::config::ConfigStore;
use tg_core::types::{RequestDetails, RequestType, TabId, Timestamp, TrackerId, Verdict};
use tg_core::{BufferedBrowser, RequestPipeline};

use crate::database::{self, DatabasePaths};

pub struct SimulateOptions {
    pub databases: DatabasePaths,
    pub settings_path: Option<String>,
    pub trace_path: String,
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TraceEvent {
    BeforeNavigate {
        tab_id: TabId,
        #[serde(default)]
        frame_id: i32,
        url: String,
        timestamp: Timestamp,
    },
    NavigationCommitted {
        tab_id: TabId,
        #[serde(default)]
        frame_id: i32,
        url: String,
        #[serde(default)]
        transition_type: Option<String>,
        #[serde(default)]
        incognito: bool,
        timestamp: Timestamp,
    },
    DomContentLoaded {
        tab_id: TabId,
        #[serde(default)]
        frame_id: i32,
    },
    NavigationCompleted {
        tab_id: TabId,
        #[serde(default)]
        frame_id: i32,
    },
    BeforeRequest {
        tab_id: TabId,
        #[serde(default)]
        frame_id: i32,
        request_id: String,
        url: String,
        #[serde(rename = "type")]
        request_type: String,
        timestamp: Timestamp,
        #[serde(default)]
        tab_url: Option<String>,
    },
    BeforeRedirect {
        tab_id: TabId,
        request_id: String,
        url: String,
        redirect_url: String,
        #[serde(rename = "type")]
        request_type: String,
        timestamp: Timestamp,
    },
    RequestCompleted {
        request_id: String,
        url: String,
        timestamp: Timestamp,
    },
    RequestError {
        request_id: String,
        url: String,
        timestamp: Timestamp,
    },
    TabCreated {
        tab_id: TabId,
        #[serde(default)]
        url: String,
        timestamp: Timestamp,
    },
    TabActivated {
        tab_id: TabId,
    },
    TabReplaced {
        added_tab_id: TabId,
        removed_tab_id: TabId,
    },
    TabRemoved {
        tab_id: TabId,
    },
    AllowOnce {
        tab_id: TabId,
        tracker_id: TrackerId,
    },
    AllowAlways {
        tab_id: TabId,
        tracker_id: TrackerId,
    },
    SetSetting {
        key: String,
        value: Value,
    },
    Timers {
        now: Timestamp,
    },
}

impl TraceEvent {
    fn tab_id(&self) -> Option<TabId> {
        match self {
            Self::BeforeNavigate { tab_id, .. }
            | Self::NavigationCommitted { tab_id, .. }
            | Self::DomContentLoaded { tab_id, .. }
            | Self::NavigationCompleted { tab_id, .. }
            | Self::BeforeRequest { tab_id, .. }
            | Self::BeforeRedirect { tab_id, .. }
            | Self::TabCreated { tab_id, .. }
            | Self::TabActivated { tab_id }
            | Self::TabRemoved { tab_id }
            | Self::AllowOnce { tab_id, .. }
            | Self::AllowAlways { tab_id, .. } => Some(*tab_id),
            Self::TabReplaced { added_tab_id, .. } => Some(*added_tab_id),
            _ => None,
        }
    }
}

/// Counts of what a replay did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub events: usize,
    pub requests: usize,
    pub allowed: usize,
    pub cancelled: usize,
    pub redirected: usize,
    pub tab_redirects: usize,
    pub overlays: usize,
}

pub fn parse_trace(text: &str) -> Result<Vec<TraceEvent>, String> {
    let mut events = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event = serde_json::from_str(trimmed).map_err(|e| format!("Trace line {}: {}", idx + 1, e))?;
        events.push(event);
    }
    Ok(events)
}

pub fn run_simulate(opts: SimulateOptions) -> Result<(), String> {
    let mut config = database::read_settings(opts.settings_path.as_deref())?;
    let mut catalogs = Catalogs::new();
    let stats = database::load_catalogs(&opts.databases, &mut catalogs, &mut config, opts.verbose)?;
    println!(
        "Loaded {} database(s), {} bytes in {:.1}ms",
        stats.documents, stats.bytes, stats.total_ms
    );

    let events = parse_trace(&database::read_document(Path::new(&opts.trace_path))?)?;
    println!("Replaying {} events from '{}'", events.len(), opts.trace_path);
    println!();

    let mut pipeline = RequestPipeline::new(config, catalogs);
    let (report, tabs) = simulate(&mut pipeline, &events, opts.verbose)?;

    println!();
    println!("Trackers found:");
    for tab_id in tabs {
        let summary = pipeline.ledger().summary(tab_id);
        if summary.total == 0 {
            continue;
        }
        println!(
            "  Tab {}: {} trackers, {} blocked ({} insecure, {} slow, {} compatibility)",
            tab_id, summary.total, summary.blocked, summary.insecure, summary.latency, summary.compatibility
        );
        for app in pipeline.ledger().get_apps(tab_id) {
            println!(
                "    {:<32} {:<20} {:<8} {} source(s)",
                app.name,
                app.cat,
                if app.blocked { "blocked" } else { "allowed" },
                app.sources.len()
            );
        }
    }

    println!();
    println!("Summary:");
    println!("  Events:        {}", report.events);
    println!("  Requests:      {}", report.requests);
    println!("  Allowed:       {}", report.allowed);
    println!("  Cancelled:     {}", report.cancelled);
    println!("  Redirected:    {}", report.redirected);
    println!("  Tab redirects: {}", report.tab_redirects);
    println!("  Overlays:      {}", report.overlays);

    Ok(())
}

/// Drive `events` through the pipeline, running deferred work after each.
/// Returns the report and every tab the trace touched.
pub fn simulate<C: ConfigStore>(
    pipeline: &mut RequestPipeline<C>,
    events: &[TraceEvent],
    verbose: bool,
) -> Result<(SimulationReport, BTreeSet<TabId>), String> {
    let mut report = SimulationReport::default();
    let mut tabs = BTreeSet::new();
    let mut browser = BufferedBrowser::new();

    for event in events {
        report.events += 1;
        if let Some(tab_id) = event.tab_id() {
            tabs.insert(tab_id);
        }
        apply(pipeline, event, &mut report, verbose)?;

        pipeline.run_deferred(&mut browser);
        for action in browser.take() {
            match &action {
                BrowserAction::RedirectTab { tab_id, url } => {
                    report.tab_redirects += 1;
                    println!("  redirect  [{}] tab -> {}", tab_id, url);
                }
                BrowserAction::Overlay { payload } => {
                    report.overlays += 1;
                    println!(
                        "  overlay   [{}] {} ({} item(s))",
                        payload.tab_id,
                        payload.tracker_name,
                        payload.items.len()
                    );
                }
                BrowserAction::RefreshPanel { summary } => {
                    if verbose {
                        println!("  panel     [{}] {} found, {} blocked", summary.tab_id, summary.total, summary.blocked);
                    }
                }
            }
        }
    }

    Ok((report, tabs))
}

fn apply<C: ConfigStore>(
    pipeline: &mut RequestPipeline<C>,
    event: &TraceEvent,
    report: &mut SimulationReport,
    verbose: bool,
) -> Result<(), String> {
    match event {
        TraceEvent::BeforeNavigate {
            tab_id,
            frame_id,
            url,
            timestamp,
        } => pipeline.on_before_navigate(*tab_id, *frame_id, url, *timestamp),
        TraceEvent::NavigationCommitted {
            tab_id,
            frame_id,
            url,
            transition_type,
            incognito,
            timestamp,
        } => pipeline.on_navigation_committed(
            *tab_id,
            *frame_id,
            url,
            transition_type.as_deref().unwrap_or("link"),
            *incognito,
            *timestamp,
        ),
        TraceEvent::DomContentLoaded { tab_id, frame_id } => pipeline.on_dom_content_loaded(*tab_id, *frame_id),
        TraceEvent::NavigationCompleted { tab_id, frame_id } => pipeline.on_navigation_completed(*tab_id, *frame_id),
        TraceEvent::BeforeRequest {
            tab_id,
            frame_id,
            request_id,
            url,
            request_type,
            timestamp,
            tab_url,
        } => {
            let details = RequestDetails {
                tab_id: *tab_id,
                frame_id: *frame_id,
                request_id,
                url,
                request_type: RequestType::from_str(request_type),
                timestamp: *timestamp,
                tab_url: tab_url.as_deref(),
            };
            let verdict = pipeline.on_before_request(&details);
            report.requests += 1;
            let label = match &verdict {
                Verdict::Allow => {
                    report.allowed += 1;
                    "allow".to_string()
                }
                Verdict::Cancel => {
                    report.cancelled += 1;
                    "cancel".to_string()
                }
                Verdict::Redirect(target) => {
                    report.redirected += 1;
                    format!("redirect -> {}", truncate(target, 48))
                }
            };
            if verbose || verdict != Verdict::Allow {
                println!("  {:<9} [{}] {} {}  {}", "request", tab_id, request_type, url, label);
            }
        }
        TraceEvent::BeforeRedirect {
            tab_id,
            request_id,
            url,
            redirect_url,
            request_type,
            timestamp,
        } => pipeline.on_before_redirect(
            *tab_id,
            request_id,
            url,
            redirect_url,
            RequestType::from_str(request_type),
            *timestamp,
        ),
        TraceEvent::RequestCompleted {
            request_id,
            url,
            timestamp,
        } => pipeline.on_request_completed(request_id, url, *timestamp),
        TraceEvent::RequestError {
            request_id,
            url,
            timestamp,
        } => pipeline.on_request_error(request_id, url, *timestamp),
        TraceEvent::TabCreated { tab_id, url, timestamp } => pipeline.on_tab_created(*tab_id, url, *timestamp),
        TraceEvent::TabActivated { tab_id } => pipeline.on_tab_activated(*tab_id),
        TraceEvent::TabReplaced {
            added_tab_id,
            removed_tab_id,
        } => pipeline.on_tab_replaced(*added_tab_id, *removed_tab_id),
        TraceEvent::TabRemoved { tab_id } => pipeline.on_tab_removed(*tab_id),
        TraceEvent::AllowOnce { tab_id, tracker_id } => {
            let ids = pipeline.allow_once(*tab_id, *tracker_id);
            println!("  {:<9} [{}] allow once {:?}", "consent", tab_id, ids);
        }
        TraceEvent::AllowAlways { tab_id, tracker_id } => {
            let ids = pipeline
                .allow_always(*tab_id, *tracker_id)
                .map_err(|e| format!("allow_always failed: {}", e))?;
            println!("  {:<9} [{}] allow always {:?}", "consent", tab_id, ids);
        }
        TraceEvent::SetSetting { key, value } => {
            pipeline
                .config_mut()
                .set(key, value.clone())
                .map_err(|e| format!("Setting '{}' rejected: {}", key, e))?;
        }
        TraceEvent::Timers { now } => {
            let cleared = pipeline.run_timers(*now);
            if !cleared.is_empty() {
                println!("  {:<9} cleared stalled tabs {:?}", "timers", cleared);
            }
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tg_compiler::{process_list, ListKind};
    use tg_core::MemoryConfigStore;

    fn pipeline(settings: Value) -> RequestPipeline<MemoryConfigStore> {
        let db = json!({
            "apps": { "41": { "name": "DoubleClick", "cat": "advertising" } },
            "bugs": { "1": { "aid": 41 } },
            "patterns": { "host": { "net": { "doubleclick": { "$": 1 } } } },
            "version": 1
        });
        let mut config = MemoryConfigStore::from_json(settings).unwrap();
        let mut catalogs = Catalogs::new();
        assert!(process_list(ListKind::Trackers, &mut catalogs, &mut config, true, &db.to_string()));
        RequestPipeline::new(config, catalogs)
    }

    const TRACE: &str = r#"
{"event":"before_navigate","tabId":4,"url":"https://www.cnn.com/","timestamp":1000}
{"event":"navigation_committed","tabId":4,"url":"https://www.cnn.com/","transitionType":"typed","timestamp":1050}

{"event":"before_request","tabId":4,"requestId":"1","url":"https://ad.doubleclick.net/x.js","type":"script","timestamp":1100}
{"event":"before_request","tabId":4,"requestId":"2","url":"https://www.cnn.com/app.js","type":"script","timestamp":1150}
"#;

    #[test]
    fn parses_trace_with_defaults() {
        let events = parse_trace(TRACE).unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            TraceEvent::BeforeNavigate {
                tab_id: 4,
                frame_id: 0,
                url: "https://www.cnn.com/".to_string(),
                timestamp: 1000,
            }
        );
        assert!(matches!(&events[2], TraceEvent::BeforeRequest { request_type, .. } if request_type == "script"));
    }

    #[test]
    fn reports_bad_trace_line() {
        let err = parse_trace("{\"event\":\"timers\",\"now\":1}\n{\"event\":\"warp\"}").unwrap_err();
        assert!(err.starts_with("Trace line 2"));
    }

    #[test]
    fn replays_trace_through_pipeline() {
        let mut p = pipeline(json!({ "selected_app_ids": { "41": 1 }, "enable_smart_block": false }));
        let events = parse_trace(TRACE).unwrap();

        let (report, tabs) = simulate(&mut p, &events, false).unwrap();
        assert_eq!(report.events, 4);
        assert_eq!(report.requests, 2);
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.allowed, 1);
        assert_eq!(tabs.into_iter().collect::<Vec<_>>(), vec![4]);

        let summary = p.ledger().summary(4);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.blocked, 1);
    }

    #[test]
    fn rejected_setting_stops_replay() {
        let mut p = pipeline(json!({}));
        let events = parse_trace(r#"{"event":"set_setting","key":"enable_smart_block","value":"yes"}"#).unwrap();
        assert!(simulate(&mut p, &events, false).is_err());
    }

    #[test]
    fn truncates_long_urls() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
