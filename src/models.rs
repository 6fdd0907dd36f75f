//! Request/response data carried through the proxy pipeline

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// Per-request options parsed from the query string
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Append the debug overlay to rewritten documents
    pub debug: bool,
    /// Skip HTML rewriting entirely and pass bytes through
    pub bypass_rewrite: bool,
    /// How many times the client has already retried this target
    pub retry_count: u32,
    /// Prefix scheme-less targets with `http://` instead of `https://`
    pub force_protocol_bypass: bool,
}

impl RequestOptions {
    /// Parse options from decoded query parameters
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        Self {
            debug: param_flag(params, "debug"),
            bypass_rewrite: param_flag(params, "bypass"),
            retry_count: params
                .get("retry")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            force_protocol_bypass: params.get("proto").map(|v| v == "http").unwrap_or(false),
        }
    }
}

fn param_flag(params: &HashMap<String, String>, key: &str) -> bool {
    params
        .get(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// An inbound request to the proxy endpoint, decoded from the HTTP surface
#[derive(Debug)]
pub struct ProxyRequest {
    /// The raw `url` query parameter, before resolution
    pub raw_target_url: String,
    pub method: Method,
    /// Inbound headers, duplicates preserved
    pub headers: HeaderMap,
    pub body: Bytes,
    pub options: RequestOptions,
    /// Display label supplied by the collaborating UI; log-only
    pub service: Option<String>,
}

/// A validated, absolute target. Derived once per request, immutable afterward.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    url: Url,
}

impl ResolvedTarget {
    /// Wrap an already-validated http(s) URL
    pub(crate) fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// `scheme://host[:port]`, used as the upstream Referer
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }
}

/// What came back from the origin, after redirects and decompression
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// URL the response was actually served from; the base for all
    /// relative-reference resolution downstream
    pub final_url: Url,
    pub redirected: bool,
}

impl UpstreamResponse {
    /// The `Content-Type` header value, or empty string if missing/unreadable
    pub fn content_type(&self) -> &str {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// A failure on its way to the diagnostic page
#[derive(Debug)]
pub struct ErrorReport {
    pub target_url: String,
    pub kind: &'static str,
    pub message: String,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_options_defaults() {
        let opts = RequestOptions::from_query(&HashMap::new());
        assert!(!opts.debug);
        assert!(!opts.bypass_rewrite);
        assert_eq!(opts.retry_count, 0);
        assert!(!opts.force_protocol_bypass);
    }

    #[test]
    fn test_options_parsing() {
        let opts = RequestOptions::from_query(&params(&[
            ("debug", "true"),
            ("bypass", "1"),
            ("retry", "3"),
            ("proto", "http"),
        ]));
        assert!(opts.debug);
        assert!(opts.bypass_rewrite);
        assert_eq!(opts.retry_count, 3);
        assert!(opts.force_protocol_bypass);
    }

    #[test]
    fn test_options_ignore_garbage() {
        let opts = RequestOptions::from_query(&params(&[
            ("debug", "yes"),
            ("retry", "many"),
            ("proto", "gopher"),
        ]));
        assert!(!opts.debug);
        assert_eq!(opts.retry_count, 0);
        assert!(!opts.force_protocol_bypass);
    }

    #[test]
    fn test_resolved_target_accessors() {
        let target =
            ResolvedTarget::new(Url::parse("https://www.example.com/dir/page.html?q=1").unwrap());
        assert_eq!(target.scheme(), "https");
        assert_eq!(target.host(), "www.example.com");
        assert_eq!(target.path(), "/dir/page.html");
        assert_eq!(target.origin(), "https://www.example.com");
    }
}
