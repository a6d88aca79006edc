//! Trackguard Core Library
//!
//! This crate provides the request classification and policy engine of the
//! Trackguard tracker blocker.
//!
//! # Architecture
//!
//! Every outgoing web request goes through `RequestPipeline::on_before_request`,
//! which must answer synchronously. It matches the URL against the tracker
//! catalog, resolves the user's policy, lets smart blocking adjust the
//! result and returns a verdict (allow, cancel, redirect). Everything that
//! only records or displays is queued and run later by `run_deferred`.
//!
//! Catalogs are built by `tg-compiler` from the JSON databases and swapped
//! in whole; a failed load keeps the previous version.
//!
//! # Modules
//!
//! - `hash`: Murmur3 and CRC32 for trie keys and document fingerprints
//! - `url`: Fast URL decomposition without allocations
//! - `psl`: General domain (eTLD+1) resolution
//! - `catalog`: Tracker, compatibility, click-to-play and surrogate catalogs
//! - `config`: Settings store
//! - `tab`: Per-tab navigation state
//! - `ledger`: Trackers found per tab
//! - `policy`: Block/allow resolution
//! - `smart_block`: Breakage-avoidance heuristics
//! - `pipeline`: Request orchestration
//! - `deferred`: Side effects scheduled from the request hook
//! - `browser`: Host browser seam
//! - `types`: Shared type definitions

pub mod browser;
pub mod catalog;
pub mod config;
pub mod deferred;
pub mod hash;
pub mod ledger;
pub mod pipeline;
pub mod policy;
pub mod psl;
pub mod smart_block;
pub mod tab;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use browser::{BrowserAction, BrowserApi, BufferedBrowser};
pub use catalog::{CatalogError, Catalogs, Tracker, TrackerCatalog};
pub use config::{ConfigError, ConfigStore, MemoryConfigStore, Settings};
pub use ledger::{FoundTrackers, TabSummary};
pub use pipeline::{BlockedRedirectData, RequestPipeline};
pub use policy::{matches_wildcard, PolicyResolver};
pub use psl::DomainResolver;
pub use types::{BlockReason, PolicyDecision, RequestDetails, RequestType, Verdict};
