//! Database document schemas
//!
//! The tracker database stores host patterns as a nested object keyed by
//! reversed hostname labels, `$` marking "pattern complete here":
//!
//! ```text
//! { "net": { "doubleclick": { "$": 2 } } }                          host
//! { "net": { "facebook": { "connect": { "$": [{ "path": "signals/", "id": 6 }] } } } }
//! ```
//!
//! Parsing flattens these into plain pattern lists the optimizer and builder
//! work on.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tg_core::catalog::{CatalogError, Tracker};
use tg_core::types::{PatternId, TrackerId};

/// Key of a pattern-complete node.
const TERMINAL_KEY: &str = "$";

// =============================================================================
// Raw Documents
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TrackerDocument {
    pub apps: HashMap<String, AppEntry>,
    pub bugs: HashMap<String, BugEntry>,
    #[serde(default)]
    pub patterns: PatternSection,
    #[serde(default, rename = "firstPartyExceptions")]
    pub first_party_exceptions: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AppEntry {
    pub name: String,
    pub cat: String,
    #[serde(default)]
    pub tags: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BugEntry {
    pub aid: TrackerId,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatternSection {
    #[serde(default)]
    pub host: Value,
    #[serde(default)]
    pub host_path: Value,
    /// path substring -> pattern id
    #[serde(default)]
    pub path: HashMap<String, Value>,
    /// pattern id -> regex source
    #[serde(default)]
    pub regex: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CompatibilityDocument {
    pub compatibility: Vec<CompatibilityEntry>,
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CompatibilityEntry {
    pub aid: TrackerId,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClickToPlayDocument {
    pub click2play: Vec<ClickToPlayRaw>,
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickToPlayRaw {
    pub aid: TrackerId,
    #[serde(default)]
    pub allow: Vec<TrackerId>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    pub button: Option<String>,
    pub attach: Option<String>,
    pub ele: Option<String>,
    pub frame_color: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SurrogateDocument {
    pub mappings: Vec<SurrogateMapping>,
    pub surrogates: HashMap<String, String>,
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SurrogateMapping {
    pub sid: String,
    #[serde(default)]
    pub app_ids: Vec<TrackerId>,
    #[serde(default)]
    pub pattern_ids: Vec<PatternId>,
    #[serde(default)]
    pub sites: Vec<String>,
    #[serde(default, rename = "match")]
    pub matcher: Option<String>,
}

// =============================================================================
// Flattened Tracker Database
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPattern {
    pub host: String,
    pub id: PatternId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPathPattern {
    pub host: String,
    pub path: String,
    pub id: PatternId,
}

/// The tracker database with every section flattened to lists.
#[derive(Debug, Clone, Default)]
pub struct ParsedTrackerDb {
    pub version: Option<u64>,
    pub trackers: Vec<Tracker>,
    /// pattern id -> tracker id
    pub bugs: Vec<(PatternId, TrackerId)>,
    pub hosts: Vec<HostPattern>,
    pub host_paths: Vec<HostPathPattern>,
    pub paths: Vec<(String, PatternId)>,
    pub regexes: Vec<(PatternId, String)>,
    pub exceptions: Vec<(PatternId, String)>,
}

impl ParsedTrackerDb {
    pub fn pattern_count(&self) -> usize {
        self.hosts.len() + self.host_paths.len() + self.paths.len() + self.regexes.len()
    }
}

pub fn parse_tracker_db(data: &str) -> Result<ParsedTrackerDb, CatalogError> {
    let doc: TrackerDocument = serde_json::from_str(data)?;

    let mut trackers = doc
        .apps
        .into_iter()
        .map(|(id, app)| {
            Ok(Tracker {
                id: parse_id(&id)?,
                name: app.name,
                category: app.cat,
                tags: app.tags,
            })
        })
        .collect::<Result<Vec<_>, CatalogError>>()?;
    trackers.sort_by_key(|t| t.id);

    let mut bugs = doc
        .bugs
        .into_iter()
        .map(|(id, bug)| Ok((parse_id(&id)?, bug.aid)))
        .collect::<Result<Vec<_>, CatalogError>>()?;
    bugs.sort_unstable();

    let mut hosts = Vec::new();
    walk_host_trie(&doc.patterns.host, &mut Vec::new(), &mut |labels, terminal| {
        hosts.push(HostPattern {
            host: join_reversed(labels),
            id: value_id(terminal)?,
        });
        Ok(())
    })?;

    let mut host_paths = Vec::new();
    walk_host_trie(&doc.patterns.host_path, &mut Vec::new(), &mut |labels, terminal| {
        let host = join_reversed(labels);
        let entries = terminal.as_array().ok_or_else(|| CatalogError::InvalidId(terminal.to_string()))?;
        for entry in entries {
            let path = entry
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| CatalogError::InvalidId(entry.to_string()))?;
            let id = entry
                .get("id")
                .ok_or_else(|| CatalogError::InvalidId(entry.to_string()))
                .and_then(value_id)?;
            host_paths.push(HostPathPattern {
                host: host.clone(),
                path: path.to_string(),
                id,
            });
        }
        Ok(())
    })?;

    let mut paths = doc
        .patterns
        .path
        .iter()
        .map(|(path, id)| Ok((path.clone(), value_id(id)?)))
        .collect::<Result<Vec<_>, CatalogError>>()?;
    paths.sort();

    let mut regexes = doc
        .patterns
        .regex
        .into_iter()
        .map(|(id, source)| Ok((parse_id(&id)?, source)))
        .collect::<Result<Vec<_>, CatalogError>>()?;
    regexes.sort();

    let mut exceptions = Vec::new();
    for (id, entries) in doc.first_party_exceptions {
        let id = parse_id(&id)?;
        exceptions.extend(entries.into_iter().map(|entry| (id, entry)));
    }
    exceptions.sort();

    hosts.sort_by(|a, b| a.host.cmp(&b.host).then(a.id.cmp(&b.id)));
    host_paths.sort_by(|a, b| (&a.host, &a.path, a.id).cmp(&(&b.host, &b.path, b.id)));

    Ok(ParsedTrackerDb {
        version: doc.version,
        trackers,
        bugs,
        hosts,
        host_paths,
        paths,
        regexes,
        exceptions,
    })
}

/// Depth-first walk calling `visit` with the labels (TLD first) of every
/// `$` node.
fn walk_host_trie<F>(node: &Value, labels: &mut Vec<String>, visit: &mut F) -> Result<(), CatalogError>
where
    F: FnMut(&[String], &Value) -> Result<(), CatalogError>,
{
    let Some(children) = node.as_object() else {
        return if node.is_null() {
            Ok(())
        } else {
            Err(CatalogError::InvalidId(format!("host node {}", node)))
        };
    };
    for (key, child) in children {
        if key == TERMINAL_KEY {
            if !labels.is_empty() {
                visit(labels, child)?;
            }
            continue;
        }
        labels.push(key.to_ascii_lowercase());
        walk_host_trie(child, labels, visit)?;
        labels.pop();
    }
    Ok(())
}

fn join_reversed(labels: &[String]) -> String {
    labels.iter().rev().map(String::as_str).collect::<Vec<_>>().join(".")
}

fn parse_id(raw: &str) -> Result<u32, CatalogError> {
    raw.trim()
        .parse()
        .map_err(|_| CatalogError::InvalidId(raw.to_string()))
}

/// Ids appear both as numbers and as numeric strings.
fn value_id(value: &Value) -> Result<u32, CatalogError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| CatalogError::InvalidId(n.to_string())),
        Value::String(s) => parse_id(s),
        other => Err(CatalogError::InvalidId(other.to_string())),
    }
}
