//! Configuration store
//!
//! The engine reads user settings through the `ConfigStore` trait. Values
//! live in a flat JSON object (the persisted settings format of the
//! extension); every accepted write also refreshes a typed `Settings`
//! snapshot which is what the hot path reads.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::types::{Timestamp, TrackerId};

/// Setting names.
pub mod keys {
    pub const SELECTED_APP_IDS: &str = "selected_app_ids";
    pub const SITE_SPECIFIC_BLOCKS: &str = "site_specific_blocks";
    pub const SITE_SPECIFIC_UNBLOCKS: &str = "site_specific_unblocks";
    pub const SITE_BLACKLIST: &str = "site_blacklist";
    pub const SITE_WHITELIST: &str = "site_whitelist";
    pub const ENABLE_SMART_BLOCK: &str = "enable_smart_block";
    pub const ENABLE_CLICK2PLAY: &str = "enable_click2play";
    pub const ENABLE_CLICK2PLAY_SOCIAL: &str = "enable_click2play_social";
    pub const PAUSED_BLOCKING: &str = "paused_blocking";
    pub const PAUSED_BLOCKING_TIMEOUT: &str = "paused_blocking_timeout";
    pub const BLOCK_BY_DEFAULT: &str = "block_by_default";
    pub const KNOWN_APP_IDS: &str = "known_app_ids";
    pub const BLOCKED_REDIRECT_PAGE: &str = "blocked_redirect_page";

    pub const ALL: [&str; 13] = [
        SELECTED_APP_IDS,
        SITE_SPECIFIC_BLOCKS,
        SITE_SPECIFIC_UNBLOCKS,
        SITE_BLACKLIST,
        SITE_WHITELIST,
        ENABLE_SMART_BLOCK,
        ENABLE_CLICK2PLAY,
        ENABLE_CLICK2PLAY_SOCIAL,
        PAUSED_BLOCKING,
        PAUSED_BLOCKING_TIMEOUT,
        BLOCK_BY_DEFAULT,
        KNOWN_APP_IDS,
        BLOCKED_REDIRECT_PAGE,
    ];
}

/// Error type for configuration writes.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown setting: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Settings must be a JSON object")]
    NotAnObject,
}

// =============================================================================
// Typed Settings
// =============================================================================

/// Typed snapshot of the settings the engine reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Globally blocked trackers, persisted as `{ "<id>": 1 }`
    #[serde(serialize_with = "serialize_id_map", deserialize_with = "deserialize_id_map")]
    pub selected_app_ids: HashSet<TrackerId>,
    pub site_specific_blocks: HashMap<String, Vec<TrackerId>>,
    pub site_specific_unblocks: HashMap<String, Vec<TrackerId>>,
    pub site_blacklist: Vec<String>,
    pub site_whitelist: Vec<String>,
    pub enable_smart_block: bool,
    pub enable_click2play: bool,
    pub enable_click2play_social: bool,
    pub paused_blocking: bool,
    /// Auto-resume time for a paused session
    pub paused_blocking_timeout: Option<Timestamp>,
    pub block_by_default: bool,
    pub known_app_ids: BTreeSet<TrackerId>,
    pub blocked_redirect_page: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_app_ids: HashSet::new(),
            site_specific_blocks: HashMap::new(),
            site_specific_unblocks: HashMap::new(),
            site_blacklist: Vec::new(),
            site_whitelist: Vec::new(),
            enable_smart_block: true,
            enable_click2play: true,
            enable_click2play_social: true,
            paused_blocking: false,
            paused_blocking_timeout: None,
            block_by_default: false,
            known_app_ids: BTreeSet::new(),
            blocked_redirect_page: None,
        }
    }
}

impl Settings {
    /// Is blocking paused at `now`? A timeout in the past means resumed.
    pub fn is_paused(&self, now: Timestamp) -> bool {
        self.paused_blocking && self.paused_blocking_timeout.map_or(true, |until| now < until)
    }

    pub fn is_globally_blocked(&self, tracker: TrackerId) -> bool {
        self.selected_app_ids.contains(&tracker)
    }

    pub fn site_blocks(&self, host: &str, tracker: TrackerId) -> bool {
        self.site_specific_blocks
            .get(host)
            .is_some_and(|ids| ids.contains(&tracker))
    }

    pub fn site_unblocks(&self, host: &str, tracker: TrackerId) -> bool {
        self.site_specific_unblocks
            .get(host)
            .is_some_and(|ids| ids.contains(&tracker))
    }

    /// Apply one key to the typed snapshot.
    fn apply(&mut self, key: &str, value: &Value) -> Result<(), ConfigError> {
        fn parse<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, ConfigError> {
            // null resets a setting to its default
            T::deserialize(value).map_err(|source| ConfigError::InvalidValue {
                key: key.to_string(),
                source,
            })
        }

        let defaults = Settings::default();
        match key {
            keys::SELECTED_APP_IDS => {
                self.selected_app_ids = if value.is_null() {
                    HashSet::new()
                } else {
                    deserialize_id_map(value).map_err(|source| ConfigError::InvalidValue {
                        key: key.to_string(),
                        source,
                    })?
                }
            }
            keys::SITE_SPECIFIC_BLOCKS => {
                self.site_specific_blocks = parse::<Option<_>>(key, value)?.unwrap_or_default()
            }
            keys::SITE_SPECIFIC_UNBLOCKS => {
                self.site_specific_unblocks = parse::<Option<_>>(key, value)?.unwrap_or_default()
            }
            keys::SITE_BLACKLIST => self.site_blacklist = parse::<Option<_>>(key, value)?.unwrap_or_default(),
            keys::SITE_WHITELIST => self.site_whitelist = parse::<Option<_>>(key, value)?.unwrap_or_default(),
            keys::ENABLE_SMART_BLOCK => {
                self.enable_smart_block = parse::<Option<_>>(key, value)?.unwrap_or(defaults.enable_smart_block)
            }
            keys::ENABLE_CLICK2PLAY => {
                self.enable_click2play = parse::<Option<_>>(key, value)?.unwrap_or(defaults.enable_click2play)
            }
            keys::ENABLE_CLICK2PLAY_SOCIAL => {
                self.enable_click2play_social =
                    parse::<Option<_>>(key, value)?.unwrap_or(defaults.enable_click2play_social)
            }
            keys::PAUSED_BLOCKING => self.paused_blocking = parse::<Option<_>>(key, value)?.unwrap_or(false),
            keys::PAUSED_BLOCKING_TIMEOUT => self.paused_blocking_timeout = parse(key, value)?,
            keys::BLOCK_BY_DEFAULT => self.block_by_default = parse::<Option<_>>(key, value)?.unwrap_or(false),
            keys::KNOWN_APP_IDS => self.known_app_ids = parse::<Option<_>>(key, value)?.unwrap_or_default(),
            keys::BLOCKED_REDIRECT_PAGE => self.blocked_redirect_page = parse(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn serialize_id_map<S: Serializer>(ids: &HashSet<TrackerId>, serializer: S) -> Result<S::Ok, S::Error> {
    let mut sorted: Vec<&TrackerId> = ids.iter().collect();
    sorted.sort_unstable();
    serializer.collect_map(sorted.into_iter().map(|id| (id.to_string(), 1)))
}

/// Accepts `{ "<id>": 1 }` (persisted form) or a plain id array.
fn deserialize_id_map<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HashSet<TrackerId>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdSet {
        Map(HashMap<String, Value>),
        List(Vec<TrackerId>),
    }

    match IdSet::deserialize(deserializer)? {
        IdSet::List(ids) => Ok(ids.into_iter().collect()),
        IdSet::Map(map) => map
            .keys()
            .map(|k| {
                k.parse::<TrackerId>()
                    .map_err(|_| serde::de::Error::custom(format!("invalid tracker id `{k}`")))
            })
            .collect(),
    }
}

// =============================================================================
// Store
// =============================================================================

/// Change listener, called with the key and its new value.
pub type ConfigListener = Box<dyn FnMut(&str, &Value)>;

/// Read-mostly settings access for the engine.
pub trait ConfigStore {
    fn get(&self, key: &str) -> Option<&Value>;

    /// Write a value. On success subscribers are notified; on failure the
    /// previous value and snapshot stay in place.
    fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError>;

    fn subscribe(&mut self, listener: ConfigListener);

    fn settings(&self) -> &Settings;
}

/// In-memory `ConfigStore`. Persistence is the host's concern: it can
/// subscribe and write changes wherever it keeps them.
#[derive(Default)]
pub struct MemoryConfigStore {
    values: Map<String, Value>,
    settings: Settings,
    listeners: Vec<ConfigListener>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a persisted settings object. Unknown keys are kept but
    /// ignored; invalid values are dropped with a warning.
    pub fn from_json(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(values) = value else {
            return Err(ConfigError::NotAnObject);
        };
        let mut store = Self::new();
        for (key, value) in values {
            match store.settings.apply(&key, &value) {
                Ok(()) | Err(ConfigError::UnknownKey(_)) => {
                    store.values.insert(key, value);
                }
                Err(e) => log::warn!("Dropping setting: {}", e),
            }
        }
        Ok(store)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        let mut next = self.settings.clone();
        next.apply(key, &value)?;
        self.settings = next;
        for listener in &mut self.listeners {
            listener(key, &value);
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn subscribe(&mut self, listener: ConfigListener) {
        self.listeners.push(listener);
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn selected_app_ids_accepts_persisted_map() {
        let store = MemoryConfigStore::from_json(json!({
            "selected_app_ids": { "41": 1, "464": 1 },
            "site_whitelist": ["example.com"],
            "some_ui_flag": true,
        }))
        .unwrap();

        let settings = store.settings();
        assert!(settings.is_globally_blocked(41));
        assert!(settings.is_globally_blocked(464));
        assert!(!settings.is_globally_blocked(7));
        assert_eq!(settings.site_whitelist, vec!["example.com".to_string()]);
        assert_eq!(store.get("some_ui_flag"), Some(&json!(true)));
    }

    #[test]
    fn rejected_value_keeps_previous_snapshot() {
        let mut store = MemoryConfigStore::new();
        store.set(keys::SITE_BLACKLIST, json!(["ads.com"])).unwrap();

        let err = store.set(keys::SITE_BLACKLIST, json!("not-a-list")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(store.settings().site_blacklist, vec!["ads.com".to_string()]);
        assert_eq!(store.get(keys::SITE_BLACKLIST), Some(&json!(["ads.com"])));

        assert!(matches!(store.set("nope", json!(1)), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn subscribers_see_accepted_writes() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut store = MemoryConfigStore::new();
        store.subscribe(Box::new(move |key, _| sink.borrow_mut().push(key.to_string())));
        store.set(keys::PAUSED_BLOCKING, json!(true)).unwrap();
        let _ = store.set(keys::PAUSED_BLOCKING, json!("yes"));

        assert_eq!(*seen.borrow(), vec![keys::PAUSED_BLOCKING.to_string()]);
    }

    #[test]
    fn pause_timeout_resumes() {
        let mut store = MemoryConfigStore::new();
        store.set(keys::PAUSED_BLOCKING, json!(true)).unwrap();
        assert!(store.settings().is_paused(1_000));

        store.set(keys::PAUSED_BLOCKING_TIMEOUT, json!(5_000)).unwrap();
        assert!(store.settings().is_paused(4_999));
        assert!(!store.settings().is_paused(5_000));
    }

    #[test]
    fn selected_ids_serialize_as_map() {
        let mut settings = Settings::default();
        settings.selected_app_ids.insert(41);
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["selected_app_ids"], json!({ "41": 1 }));
    }
}
