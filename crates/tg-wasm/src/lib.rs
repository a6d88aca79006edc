//! WebAssembly bindings for Trackguard
//!
//! One function per browser event. The extension's JavaScript glue forwards
//! `webNavigation`, `webRequest` and `tabs` events here, answers blocking
//! `onBeforeRequest` listeners with the returned object, and periodically
//! calls `run_deferred` to perform the queued browser actions.
//!
//! Timestamps are JavaScript milliseconds (`Date.now()`, `details.timeStamp`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Once;

use serde::Serialize;
use tg_compiler::{process_list as load_list, ListKind};
use tg_core::config::ConfigStore;
use tg_core::smart_block::SmartBlockReason;
use tg_core::types::{RequestDetails, RequestType, TabId, Timestamp, TrackerId, Verdict};
use tg_core::{BufferedBrowser, MemoryConfigStore, RequestPipeline};
use wasm_bindgen::prelude::*;

struct Engine {
    pipeline: RequestPipeline<MemoryConfigStore>,
    browser: BufferedBrowser,
}

thread_local! {
    static ENGINE: RefCell<Option<Engine>> = const { RefCell::new(None) };
}

static LOGGER: Once = Once::new();

fn with_engine<R>(fallback: R, f: impl FnOnce(&mut Engine) -> R) -> R {
    ENGINE.with(|cell| match cell.borrow_mut().as_mut() {
        Some(engine) => f(engine),
        None => fallback,
    })
}

fn try_with_engine<R>(f: impl FnOnce(&mut Engine) -> Result<R, JsValue>) -> Result<R, JsValue> {
    ENGINE.with(|cell| match cell.borrow_mut().as_mut() {
        Some(engine) => f(engine),
        None => Err(JsValue::from_str("Not initialized. Call init() first.")),
    })
}

fn ms(timestamp: f64) -> Timestamp {
    // Negative and NaN saturate to 0
    timestamp as Timestamp
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(|e| JsValue::from_str(&format!("Serialization failed: {}", e)))
}

fn id_array(ids: &[TrackerId]) -> js_sys::Array {
    ids.iter().map(|id| JsValue::from(*id)).collect()
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Create the engine from the persisted settings object (JSON text).
/// Calling it again replaces the engine, catalogs included.
#[wasm_bindgen]
pub fn init(settings_json: &str) -> Result<(), JsValue> {
    LOGGER.call_once(|| wasm_logger::init(wasm_logger::Config::default()));

    let settings: serde_json::Value = if settings_json.trim().is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(settings_json).map_err(|e| JsValue::from_str(&format!("Invalid settings: {}", e)))?
    };
    let config = MemoryConfigStore::from_json(settings).map_err(|e| JsValue::from_str(&e.to_string()))?;

    ENGINE.with(|cell| {
        *cell.borrow_mut() = Some(Engine {
            pipeline: RequestPipeline::new(config, Default::default()),
            browser: BufferedBrowser::new(),
        });
    });
    log::info!("Trackguard engine initialized");
    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    ENGINE.with(|cell| cell.borrow().is_some())
}

/// Load a database document. `kind` is one of `bugs`, `compatibility`,
/// `click2play`, `surrogates`. Returns false when the document was rejected
/// and the previous catalog kept.
#[wasm_bindgen]
pub fn process_list(kind: &str, from_memory: bool, data: &str) -> Result<bool, JsValue> {
    let kind = ListKind::from_str(kind).ok_or_else(|| JsValue::from_str(&format!("Unknown list: {}", kind)))?;
    try_with_engine(|engine| {
        let (catalogs, config) = engine.pipeline.parts_mut();
        Ok(load_list(kind, catalogs, config, from_memory, data))
    })
}

/// Replace the bundled public suffix list with a fresher copy
/// (`public_suffix_list.dat` text).
#[wasm_bindgen]
pub fn load_public_suffix_list(data: &str) -> Result<(), JsValue> {
    try_with_engine(|engine| {
        engine
            .pipeline
            .domains_mut()
            .load_list(data)
            .map_err(|e| JsValue::from_str(&format!("Invalid public suffix list: {}", e)))?;
        log::info!("Public suffix list replaced ({} bytes)", data.len());
        Ok(())
    })
}

#[wasm_bindgen]
pub fn get_catalog_info() -> JsValue {
    let result = js_sys::Object::new();
    with_engine((), |engine| {
        let catalogs = engine.pipeline.catalogs();
        let stats = catalogs.trackers.stats();
        let version = |v: Option<u64>| v.map_or(JsValue::NULL, |v| JsValue::from(v as f64));

        let _ = js_sys::Reflect::set(&result, &"bugsVersion".into(), &version(catalogs.trackers.version()));
        let _ = js_sys::Reflect::set(&result, &"trackers".into(), &JsValue::from(stats.trackers as u32));
        let _ = js_sys::Reflect::set(&result, &"patterns".into(), &JsValue::from(stats.patterns as u32));
        let _ = js_sys::Reflect::set(&result, &"newTrackers".into(), &id_array(catalogs.trackers.newly_added()));
        let _ = js_sys::Reflect::set(&result, &"compatibilityVersion".into(), &version(catalogs.compatibility.version()));
        let _ = js_sys::Reflect::set(&result, &"click2playVersion".into(), &version(catalogs.click2play.version()));
        let _ = js_sys::Reflect::set(&result, &"surrogatesVersion".into(), &version(catalogs.surrogates.version()));
    });
    let _ = js_sys::Reflect::set(&result, &"initialized".into(), &JsValue::from(is_initialized()));
    result.into()
}

// =============================================================================
// Settings
// =============================================================================

/// Set one setting from its JSON text. A rejected value leaves the previous
/// setting in place.
#[wasm_bindgen]
pub fn set_setting(key: &str, value_json: &str) -> Result<(), JsValue> {
    let value: serde_json::Value =
        serde_json::from_str(value_json).map_err(|e| JsValue::from_str(&format!("Invalid value for {}: {}", key, e)))?;
    try_with_engine(|engine| {
        engine
            .pipeline
            .config_mut()
            .set(key, value)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    })
}

/// The full settings object as JSON, for the host to persist.
#[wasm_bindgen]
pub fn get_settings() -> Result<String, JsValue> {
    try_with_engine(|engine| to_json(&engine.pipeline.config().to_json()))
}

// =============================================================================
// Navigation Events
// =============================================================================

#[wasm_bindgen]
pub fn on_before_navigate(tab_id: TabId, frame_id: i32, url: &str, timestamp: f64) {
    with_engine((), |engine| engine.pipeline.on_before_navigate(tab_id, frame_id, url, ms(timestamp)));
}

#[wasm_bindgen]
pub fn on_navigation_committed(
    tab_id: TabId,
    frame_id: i32,
    url: &str,
    transition_type: &str,
    incognito: bool,
    timestamp: f64,
) {
    with_engine((), |engine| {
        engine
            .pipeline
            .on_navigation_committed(tab_id, frame_id, url, transition_type, incognito, ms(timestamp))
    });
}

#[wasm_bindgen]
pub fn on_dom_content_loaded(tab_id: TabId, frame_id: i32) {
    with_engine((), |engine| engine.pipeline.on_dom_content_loaded(tab_id, frame_id));
}

/// Covers both `onCompleted` and `onErrorOccurred` of `webNavigation`.
#[wasm_bindgen]
pub fn on_navigation_completed(tab_id: TabId, frame_id: i32) {
    with_engine((), |engine| engine.pipeline.on_navigation_completed(tab_id, frame_id));
}

// =============================================================================
// Request Events
// =============================================================================

/// Blocking `onBeforeRequest`. Returns `{cancel: bool}` or `{redirectUrl}`.
#[wasm_bindgen]
pub fn on_before_request(
    tab_id: TabId,
    frame_id: i32,
    request_id: &str,
    url: &str,
    request_type: &str,
    timestamp: f64,
    tab_url: Option<String>,
) -> JsValue {
    let details = RequestDetails {
        tab_id,
        frame_id,
        request_id,
        url,
        request_type: RequestType::from_str(request_type),
        timestamp: ms(timestamp),
        tab_url: tab_url.as_deref(),
    };
    let verdict = with_engine(Verdict::Allow, |engine| engine.pipeline.on_before_request(&details));

    let result = js_sys::Object::new();
    match verdict {
        Verdict::Redirect(redirect_url) => {
            let _ = js_sys::Reflect::set(&result, &"redirectUrl".into(), &JsValue::from_str(&redirect_url));
        }
        other => {
            let _ = js_sys::Reflect::set(&result, &"cancel".into(), &JsValue::from(other.is_cancel()));
        }
    }
    result.into()
}

#[wasm_bindgen]
pub fn on_before_redirect(
    tab_id: TabId,
    request_id: &str,
    url: &str,
    redirect_url: &str,
    request_type: &str,
    timestamp: f64,
) {
    with_engine((), |engine| {
        engine.pipeline.on_before_redirect(
            tab_id,
            request_id,
            url,
            redirect_url,
            RequestType::from_str(request_type),
            ms(timestamp),
        )
    });
}

#[wasm_bindgen]
pub fn on_request_completed(request_id: &str, url: &str, timestamp: f64) {
    with_engine((), |engine| engine.pipeline.on_request_completed(request_id, url, ms(timestamp)));
}

#[wasm_bindgen]
pub fn on_request_error(request_id: &str, url: &str, timestamp: f64) {
    with_engine((), |engine| engine.pipeline.on_request_error(request_id, url, ms(timestamp)));
}

// =============================================================================
// Tab Events
// =============================================================================

#[wasm_bindgen]
pub fn on_tab_created(tab_id: TabId, url: &str, timestamp: f64) {
    with_engine((), |engine| engine.pipeline.on_tab_created(tab_id, url, ms(timestamp)));
}

#[wasm_bindgen]
pub fn on_tab_activated(tab_id: TabId) {
    with_engine((), |engine| engine.pipeline.on_tab_activated(tab_id));
}

/// The tab's next navigation is a prerender (`webNavigation.onTabReplaced`
/// follows when it is swapped in).
#[wasm_bindgen]
pub fn mark_prefetched(tab_id: TabId) {
    with_engine((), |engine| engine.pipeline.mark_prefetched(tab_id));
}

#[wasm_bindgen]
pub fn on_tab_replaced(added_tab_id: TabId, removed_tab_id: TabId) {
    with_engine((), |engine| engine.pipeline.on_tab_replaced(added_tab_id, removed_tab_id));
}

#[wasm_bindgen]
pub fn on_tab_removed(tab_id: TabId) {
    with_engine((), |engine| engine.pipeline.on_tab_removed(tab_id));
}

// =============================================================================
// Click-to-play
// =============================================================================

/// Returns the tracker ids granted.
#[wasm_bindgen]
pub fn allow_once(tab_id: TabId, tracker_id: TrackerId) -> js_sys::Array {
    let ids = with_engine(Vec::new(), |engine| engine.pipeline.allow_once(tab_id, tracker_id));
    id_array(&ids)
}

/// Returns the tracker ids unblocked on the tab's site.
#[wasm_bindgen]
pub fn allow_always(tab_id: TabId, tracker_id: TrackerId) -> Result<js_sys::Array, JsValue> {
    try_with_engine(|engine| {
        engine
            .pipeline
            .allow_always(tab_id, tracker_id)
            .map(|ids| id_array(&ids))
            .map_err(|e| JsValue::from_str(&e.to_string()))
    })
}

// =============================================================================
// Timers & Deferred Work
// =============================================================================

/// Expire navigation watchdogs and auto-resume paused blocking. Returns the
/// ids of tabs the watchdog cleared.
#[wasm_bindgen]
pub fn run_timers(now: f64) -> js_sys::Array {
    let cleared = with_engine(Vec::new(), |engine| engine.pipeline.run_timers(ms(now)));
    cleared.into_iter().map(JsValue::from).collect()
}

/// Run queued side effects and return the browser actions they produced as
/// a JSON array (`redirect_tab`, `overlay`, `refresh_panel`).
#[wasm_bindgen]
pub fn run_deferred() -> Result<String, JsValue> {
    try_with_engine(|engine| {
        let ran = engine.pipeline.run_deferred(&mut engine.browser);
        if ran > 0 {
            log::debug!("Ran {} deferred tasks", ran);
        }
        to_json(&engine.browser.take())
    })
}

// =============================================================================
// Panel Data
// =============================================================================

#[wasm_bindgen]
pub fn get_apps(tab_id: TabId) -> Result<String, JsValue> {
    try_with_engine(|engine| to_json(&engine.pipeline.ledger().get_apps(tab_id)))
}

#[wasm_bindgen]
pub fn get_categories(tab_id: TabId) -> Result<String, JsValue> {
    try_with_engine(|engine| to_json(&engine.pipeline.ledger().get_categories(tab_id)))
}

#[wasm_bindgen]
pub fn get_summary(tab_id: TabId) -> Result<String, JsValue> {
    try_with_engine(|engine| to_json(&engine.pipeline.ledger().summary(tab_id)))
}

#[wasm_bindgen]
pub fn get_app_ids(tab_id: TabId) -> js_sys::Array {
    let ids = with_engine(Vec::new(), |engine| engine.pipeline.ledger().app_ids(tab_id));
    id_array(&ids)
}

#[derive(Serialize)]
struct SmartBlockView<'a> {
    blocked: &'a HashMap<TrackerId, SmartBlockReason>,
    unblocked: &'a HashMap<TrackerId, SmartBlockReason>,
}

/// Trackers smart blocking changed on the tab's page, with reasons.
#[wasm_bindgen]
pub fn get_smart_block(tab_id: TabId) -> Result<String, JsValue> {
    try_with_engine(|engine| {
        let Some(session) = engine.pipeline.session(tab_id) else {
            return Ok("null".to_string());
        };
        to_json(&SmartBlockView {
            blocked: &session.smart_blocked,
            unblocked: &session.smart_unblocked,
        })
    })
}

/// Context for the blocked-redirect page, consumed on read. `null` when
/// nothing was blocked on this tab.
#[wasm_bindgen]
pub fn take_blocked_redirect_data(tab_id: TabId) -> Result<String, JsValue> {
    try_with_engine(|engine| to_json(&engine.pipeline.take_blocked_redirect(tab_id)))
}
