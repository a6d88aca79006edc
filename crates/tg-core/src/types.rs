//! Core type definitions for trackguard
//!
//! Identifiers, request classification masks and the decision values that
//! flow between the catalogs, the policy layers and the request pipeline.

use serde::{Deserialize, Serialize};

/// Tracker (app) identifier from the tracker database.
pub type TrackerId = u32;

/// Pattern (bug) identifier. Every pattern resolves to exactly one tracker.
pub type PatternId = u32;

/// Browser tab identifier. Negative ids belong to requests without a tab.
pub type TabId = i32;

/// Milliseconds since the Unix epoch, as reported by browser events.
pub type Timestamp = u64;

// =============================================================================
// Request Types
// =============================================================================

bitflags::bitflags! {
    /// Request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;  // iframe/frame
        const MAIN_FRAME = 1 << 6;   // main document
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
        const CSP_REPORT = 1 << 12;
        const BEACON = 1 << 13;
        const FETCH = 1 << 14;

        /// Types smart blocking never blocks on its own
        const SMART_BLOCK_SAFE = Self::STYLESHEET.bits() | Self::IMAGE.bits() | Self::FONT.bits();
    }
}

impl RequestType {
    /// Parse from browser request type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "main_frame" | "document" => Self::MAIN_FRAME,
            "sub_frame" | "subdocument" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" | "imageset" => Self::IMAGE,
            "font" => Self::FONT,
            "object" => Self::OBJECT,
            "xmlhttprequest" => Self::XMLHTTPREQUEST,
            "ping" => Self::PING,
            "beacon" => Self::BEACON,
            "fetch" => Self::FETCH,
            "csp_report" => Self::CSP_REPORT,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            _ => Self::OTHER,
        }
    }

    /// Browser name of a single request type.
    pub fn as_str(&self) -> &'static str {
        if *self == Self::MAIN_FRAME {
            "main_frame"
        } else if *self == Self::SUBDOCUMENT {
            "sub_frame"
        } else if *self == Self::STYLESHEET {
            "stylesheet"
        } else if *self == Self::SCRIPT {
            "script"
        } else if *self == Self::IMAGE {
            "image"
        } else if *self == Self::FONT {
            "font"
        } else if *self == Self::OBJECT {
            "object"
        } else if *self == Self::XMLHTTPREQUEST {
            "xmlhttprequest"
        } else if *self == Self::PING {
            "ping"
        } else if *self == Self::BEACON {
            "beacon"
        } else if *self == Self::FETCH {
            "fetch"
        } else if *self == Self::CSP_REPORT {
            "csp_report"
        } else if *self == Self::MEDIA {
            "media"
        } else if *self == Self::WEBSOCKET {
            "websocket"
        } else {
            "other"
        }
    }
}

// =============================================================================
// Scheme Masks
// =============================================================================

bitflags::bitflags! {
    /// URL scheme mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SchemeMask: u8 {
        const HTTP = 1 << 0;
        const HTTPS = 1 << 1;
        const WS = 1 << 2;
        const WSS = 1 << 3;
        const DATA = 1 << 4;
        const FTP = 1 << 5;
        /// Schemes that leak content when loaded by a secure page
        const INSECURE = Self::HTTP.bits() | Self::WS.bits();
    }
}

// =============================================================================
// Policy Decisions
// =============================================================================

/// Why the policy resolver blocked or allowed a tracker.
///
/// Exactly one reason accompanies every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Blocking is paused globally
    Paused,
    /// Tracker is in the global block selection
    GlobalBlock,
    /// Tracker is not in the global block selection
    GlobalUnblock,
    /// Page host is on the site whitelist
    Whitelisted,
    /// Page host is on the site blacklist
    Blacklisted,
    /// Tracker is unblocked for this site
    SiteUnblock,
    /// Tracker is blocked for this site
    SiteBlock,
    /// Tracker would be blocked but has an "allow once" grant
    DeferredOnce,
    /// Tracker is allowed anyway and also holds an "allow once" grant
    DeferredPassThrough,
}

/// Output of the policy resolver. Computed per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub block: bool,
    pub reason: BlockReason,
}

impl PolicyDecision {
    #[inline]
    pub const fn new(block: bool, reason: BlockReason) -> Self {
        Self { block, reason }
    }
}

// =============================================================================
// Request Details
// =============================================================================

/// A single outgoing web request as seen by the before-request hook.
#[derive(Debug, Clone)]
pub struct RequestDetails<'a> {
    /// Tab ID (negative when the request has no tab)
    pub tab_id: TabId,
    /// Frame ID (0 is the top-level frame)
    pub frame_id: i32,
    /// Browser request ID; repeats across a redirect chain
    pub request_id: &'a str,
    /// Full request URL
    pub url: &'a str,
    /// Request type
    pub request_type: RequestType,
    /// Event time
    pub timestamp: Timestamp,
    /// Best known URL of the tab's document, used when the tab was never
    /// seen navigating
    pub tab_url: Option<&'a str>,
}

// =============================================================================
// Verdict
// =============================================================================

/// Synchronous answer of the before-request hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// `{cancel: false}`
    Allow,
    /// `{cancel: true}`
    Cancel,
    /// `{redirectUrl: ...}`
    Redirect(String),
}

impl Verdict {
    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel)
    }

    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            Self::Redirect(url) => Some(url),
            _ => None,
        }
    }
}
