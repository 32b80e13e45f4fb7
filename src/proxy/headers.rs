//! Header handling for the forwarding proxy.
//!
//! Both directions are pure functions over [`HeaderMap`] so they can be tested
//! without a network.
//!
//! Stripping framing and content-policy headers is a deliberate trust
//! trade-off: it is what lets arbitrary third-party pages render inside the
//! UI's iframe, and it also removes the protections those sites chose.

use std::net::IpAddr;

use axum::http::{
    header::{self, HeaderName},
    HeaderMap, HeaderValue,
};
use url::Url;

use crate::upstream::DEFAULT_USER_AGENT;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Response headers that forbid framing or enforce browser security policy.
/// Always removed.
pub const STRIPPED_RESPONSE_HEADERS: [HeaderName; 5] = [
    header::X_FRAME_OPTIONS,
    header::CONTENT_SECURITY_POLICY,
    header::CONTENT_SECURITY_POLICY_REPORT_ONLY,
    header::STRICT_TRANSPORT_SECURITY,
    header::X_CONTENT_TYPE_OPTIONS,
];

/// Connection-scoped headers that never cross the proxy.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub const CACHE_HINT: &str = "public, max-age=300";
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

// ============================================================================
// Origin-specific overrides
// ============================================================================

/// Adjustments for an upstream that still misbehaves inside a frame after the
/// generic rewrite. New quirks are new table rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOverride {
    /// Matches the host itself and any subdomain of it.
    pub host_suffix: &'static str,
    pub frame_options: Option<&'static str>,
    pub force_utf8: bool,
}

pub const HOST_OVERRIDES: &[HostOverride] = &[
    HostOverride {
        host_suffix: "duckduckgo.com",
        frame_options: Some("ALLOWALL"),
        force_utf8: true,
    },
    HostOverride {
        host_suffix: "google.com",
        frame_options: Some("ALLOWALL"),
        force_utf8: true,
    },
];

impl HostOverride {
    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.');
        match host.len().checked_sub(self.host_suffix.len()) {
            Some(0) => host.eq_ignore_ascii_case(self.host_suffix),
            Some(split) => {
                host.is_char_boundary(split)
                    && host[split..].eq_ignore_ascii_case(self.host_suffix)
                    && host[..split].ends_with('.')
            }
            None => false,
        }
    }

    fn apply(&self, headers: &mut HeaderMap) {
        if let Some(value) = self.frame_options {
            headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static(value));
        }
        if self.force_utf8 {
            let normalized = headers.get(header::CONTENT_TYPE).and_then(utf8_content_type);
            if let Some(value) = normalized {
                headers.insert(header::CONTENT_TYPE, value);
            }
        }
    }
}

pub fn find_override(host: &str) -> Option<&'static HostOverride> {
    HOST_OVERRIDES.iter().find(|o| o.matches(host))
}

/// `text/*` content types rewritten to declare UTF-8; others are left alone.
fn utf8_content_type(value: &HeaderValue) -> Option<HeaderValue> {
    let raw = value.to_str().ok()?;
    let mime = raw.split(';').next()?.trim();
    if !mime.to_ascii_lowercase().starts_with("text/") {
        return None;
    }
    HeaderValue::from_str(&format!("{mime}; charset=utf-8")).ok()
}

// ============================================================================
// Rewriting
// ============================================================================

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Headers relayed to the client for a response from `origin_host`.
///
/// Strips hop-by-hop and embedding-blocking headers, replaces any upstream
/// CORS policy with a permissive one, applies the host override if one
/// matches, and adds a short cache lifetime when the upstream gave none.
pub fn rewrite_response_headers(origin_host: &str, upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len() + 5);

    for (name, value) in upstream {
        if is_hop_by_hop(name)
            || STRIPPED_RESPONSE_HEADERS.contains(name)
            || name.as_str().starts_with("access-control-")
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );

    if let Some(host_override) = find_override(origin_host) {
        host_override.apply(&mut headers);
    }

    if !headers.contains_key(header::CACHE_CONTROL) {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_HINT));
    }

    headers
}

/// Headers sent upstream for a client request.
///
/// Copies the client's headers minus hop-by-hop ones and `Host` (the target
/// supplies its own), then records the client in the forwarding headers.
pub fn forward_request_headers(client: &HeaderMap, client_ip: Option<IpAddr>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(client.len() + 3);

    for (name, value) in client {
        if is_hop_by_hop(name) || *name == header::HOST {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(ip) = client_ip {
        let prior = client
            .get(&X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let chain = match prior {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
        if let Ok(value) = HeaderValue::from_str(&ip.to_string()) {
            headers.insert(X_REAL_IP, value);
        }
    }

    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    if !headers.contains_key(header::USER_AGENT) {
        headers.insert(header::USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    }

    headers
}

/// `Location` for a redirect that the browser should follow through the proxy
/// rather than straight to the upstream.
///
/// The value is relative (`proxy?url=...`) so it resolves against whichever
/// mount served the original request. Returns `None` when the location is not
/// a usable http(s) URL, in which case the upstream value is left alone.
pub fn proxied_location(origin: &Url, location: &HeaderValue) -> Option<HeaderValue> {
    let next = origin.join(location.to_str().ok()?.trim()).ok()?;
    if !matches!(next.scheme(), "http" | "https") || next.host_str().is_none() {
        return None;
    }
    let value = format!("proxy?url={}", urlencoding::encode(next.as_str()));
    HeaderValue::from_str(&value).ok()
}
