//! Fast URL parsing utilities for the hot path
//!
//! These functions avoid allocations and work directly on string slices.
//! `ParsedUrl` is the owned decomposition kept in tab sessions.

use std::net::IpAddr;

use crate::types::SchemeMask;

// =============================================================================
// Scheme Extraction
// =============================================================================

/// Fast scheme extraction without URL parsing.
/// Returns the scheme mask or None if unknown.
#[inline]
pub fn extract_scheme(url: &str) -> Option<SchemeMask> {
    let bytes = url.as_bytes();
    if bytes.len() < 5 {
        return None;
    }

    match bytes[0] | 0x20 {
        b'h' => {
            if bytes.len() >= 8 && bytes[..8].eq_ignore_ascii_case(b"https://") {
                Some(SchemeMask::HTTPS)
            } else if bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"http://") {
                Some(SchemeMask::HTTP)
            } else {
                None
            }
        }
        b'w' => {
            if bytes.len() >= 6 && bytes[..6].eq_ignore_ascii_case(b"wss://") {
                Some(SchemeMask::WSS)
            } else if bytes[..5].eq_ignore_ascii_case(b"ws://") {
                Some(SchemeMask::WS)
            } else {
                None
            }
        }
        b'd' if bytes[..5].eq_ignore_ascii_case(b"data:") => Some(SchemeMask::DATA),
        b'f' if bytes.len() >= 6 && bytes[..6].eq_ignore_ascii_case(b"ftp://") => {
            Some(SchemeMask::FTP)
        }
        _ => None,
    }
}

/// Protocol name without the trailing colon (`https`, `chrome-extension`, ...).
#[inline]
pub fn extract_protocol(url: &str) -> Option<&str> {
    let colon = url.find(':')?;
    let protocol = &url[..colon];
    if protocol.is_empty() || !protocol.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'+' || b == b'.') {
        return None;
    }
    Some(protocol)
}

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();
    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/' {
        return Some(colon_pos + 3);
    }

    None
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Skip userinfo
    let mut host_start = scheme_end;
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' || b == b'?' || b == b'#' {
            break;
        }
    }

    // Bracketed IPv6 literal
    if bytes.get(host_start) == Some(&b'[') {
        let close = bytes[host_start..].iter().position(|&b| b == b']')?;
        return Some((host_start, host_start + close + 1));
    }

    let mut host_end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(host_start) {
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = i;
            break;
        }
    }

    Some((host_start, host_end))
}

/// Fast host extraction without allocations.
/// Returns a slice into the original URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

/// Strip a single leading `www.` label.
#[inline]
pub fn strip_www(host: &str) -> &str {
    match host.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("www.") => &host[4..],
        _ => host,
    }
}

/// Check whether a host names the local machine.
pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") || host.ends_with(".localhost") {
        return true;
    }
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    literal.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

// =============================================================================
// Path Extraction
// =============================================================================

/// Path and query of a URL without the leading `/` and without the fragment.
///
/// This is the form tracker path patterns are written against.
#[inline]
pub fn extract_path_and_query(url: &str) -> &str {
    let (_, host_end) = match get_host_position(url) {
        Some(pos) => pos,
        None => return "",
    };

    let bytes = url.as_bytes();
    let path_start = match bytes[host_end..].iter().position(|&b| b == b'/' || b == b'?' || b == b'#') {
        Some(offset) => host_end + offset,
        None => return "",
    };
    if bytes[path_start] == b'#' {
        return "";
    }

    let end = url[path_start..].find('#').map_or(url.len(), |i| path_start + i);
    let rest = &url[path_start..end];
    rest.strip_prefix('/').unwrap_or(rest)
}

/// Extract the path portion of a URL (with leading `/`, without query).
#[inline]
pub fn extract_path(url: &str) -> &str {
    let (_, host_end) = match get_host_position(url) {
        Some(pos) => pos,
        None => return "/",
    };

    let bytes = url.as_bytes();
    let path_start = match bytes[host_end..].iter().position(|&b| b == b'/' || b == b'?' || b == b'#') {
        Some(offset) if bytes[host_end + offset] == b'/' => host_end + offset,
        _ => return "/",
    };

    let path_end = bytes[path_start..]
        .iter()
        .position(|&b| b == b'?' || b == b'#')
        .map_or(bytes.len(), |i| path_start + i);

    &url[path_start..path_end]
}

/// Rewrite an insecure URL to its secure equivalent.
pub fn upgrade_to_https(url: &str) -> Option<String> {
    match extract_scheme(url)? {
        SchemeMask::HTTP => Some(format!("https://{}", &url[7..])),
        SchemeMask::WS => Some(format!("wss://{}", &url[5..])),
        _ => None,
    }
}

// =============================================================================
// Parsed URL
// =============================================================================

/// Owned decomposition of a page URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUrl {
    pub url: String,
    /// Scheme without colon, lowercased
    pub protocol: String,
    /// Lowercased hostname
    pub host: String,
    /// Path with leading `/`
    pub path: String,
    /// Fragment without `#`
    pub hash: String,
}

impl ParsedUrl {
    pub fn parse(url: &str) -> Self {
        let hash = url.find('#').map(|i| url[i + 1..].to_string()).unwrap_or_default();
        Self {
            url: url.to_string(),
            protocol: extract_protocol(url).unwrap_or("").to_ascii_lowercase(),
            host: extract_host(url).unwrap_or("").to_ascii_lowercase(),
            path: extract_path(url).to_string(),
            hash,
        }
    }

    /// Host with a leading `www.` removed.
    pub fn bare_host(&self) -> &str {
        strip_www(&self.host)
    }

    pub fn is_https(&self) -> bool {
        self.protocol == "https"
    }
}
