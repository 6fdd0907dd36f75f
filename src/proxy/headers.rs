//! Response header policy
//!
//! What the client sees is upstream's header set minus everything that
//! would defeat proxying (frame/CSP headers), minus hop-by-hop and framing
//! headers (bodies are re-framed after decompression), plus the proxy's own
//! CORS and `X-Proxy-*` stamps.

use http::header::{HeaderMap, HeaderName, HeaderValue};

/// `X-Proxy-Status` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    /// Produced by the rewrite pipeline or served from the asset cache
    Success,
    /// Byte-exact passthrough of upstream content
    Forwarded,
    /// Diagnostic page or rejection
    Error,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::Success => "success",
            ProxyStatus::Forwarded => "forwarded",
            ProxyStatus::Error => "error",
        }
    }
}

/// Headers that actively defeat proxying; never forwarded
const BLOCKED_RESPONSE_HEADERS: &[&str] = &[
    "x-frame-options",
    "frame-options",
    "content-security-policy",
    "content-security-policy-report-only",
    "x-content-security-policy",
    "x-webkit-csp",
];

/// Copy upstream headers the client should see.
///
/// `Set-Cookie` duplicates survive. Blocked, hop-by-hop, framing, and
/// proxy-managed headers (`Content-Type`, caching, CORS) do not; the proxy
/// stamps its own.
pub fn filter_upstream_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();

    for (name, value) in upstream {
        let lower = name.as_str().to_lowercase();
        if BLOCKED_RESPONSE_HEADERS.contains(&lower.as_str())
            || is_hop_by_hop_header(&lower)
            || is_framing_header(&lower)
            || is_proxy_managed_header(&lower)
            || lower.starts_with("access-control-")
        {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }

    filtered
}

/// Stamp the proxy's own headers: permissive CORS plus the
/// `X-Proxy-Status`/`X-Proxy-Source` contract
pub fn apply_proxy_headers(headers: &mut HeaderMap, status: ProxyStatus, source: &str) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET, POST, PUT, DELETE, PATCH, OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("x-proxy-status"),
        HeaderValue::from_static(status.as_str()),
    );
    if !source.is_empty() {
        if let Ok(value) = HeaderValue::from_str(source) {
            headers.insert(HeaderName::from_static("x-proxy-source"), value);
        }
    }
}

/// Add the failure kind; every non-silent error surfaces here or in the status
pub fn apply_error_header(headers: &mut HeaderMap, kind: &'static str) {
    headers.insert(
        HeaderName::from_static("x-proxy-error"),
        HeaderValue::from_static(kind),
    );
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Body framing changes between upstream and client (decompression,
/// rewriting); lengths and encodings are recomputed by the server layer
fn is_framing_header(name: &str) -> bool {
    matches!(name, "content-length" | "content-encoding")
}

/// Headers every response path sets itself
fn is_proxy_managed_header(name: &str) -> bool {
    matches!(name, "content-type" | "cache-control" | "expires" | "pragma")
}
