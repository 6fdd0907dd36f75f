//! HTML/CSS rewriting
//!
//! Everything the proxy changes inside a document lives here:
//! - reference rewriting (attributes, srcset, CSS urls) onto the proxy prefix
//! - removal of frame-busting markup
//! - injection of the client-side countermeasure script
//!
//! The engine is a strategy behind the [`Rewriter`] trait. The shipped
//! strategy is the compiled-regex lean variant; a tree-based strategy can be
//! added as another implementation without touching call sites.

mod engine;
pub mod script;

pub use engine::RegexRewriter;

use std::sync::Arc;

use tracing::warn;
use url::Url;

use crate::error::Result;

/// Per-request rewriting inputs. One per in-flight request, never shared
/// across requests.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// Base for relative-reference resolution: the final fetched URL,
    /// after any upstream redirects
    pub base: Url,
    /// Proxy endpoint path, e.g. `/proxy`
    pub prefix: String,
    /// Hostname suffixes routed with `&bypass=true` instead of rewriting
    pub bypass_domains: Vec<String>,
    /// Append the debug overlay
    pub debug: bool,
}

impl RewriteContext {
    /// Values that must never be routed through the proxy
    const SKIP_PREFIXES: [&'static str; 3] = ["data:", "blob:", "javascript:"];

    /// True when a value already points at this proxy
    pub fn is_proxied(&self, value: &str) -> bool {
        value
            .strip_prefix(self.prefix.as_str())
            .map(|rest| rest.starts_with('?'))
            .unwrap_or(false)
    }

    pub fn is_bypass_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.bypass_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }

    /// Resolve a reference against the base and route it through the proxy.
    ///
    /// Returns `None` when the value must be left byte-for-byte unchanged:
    /// empty, fragment-only, `data:`/`blob:`/`javascript:`, non-http(s)
    /// schemes, unresolvable, or already proxied.
    pub fn route(&self, raw: &str, allow_bypass: bool) -> Option<String> {
        let value = raw.trim();
        if value.is_empty() || value.starts_with('#') {
            return None;
        }

        let lower = value.to_lowercase();
        if Self::SKIP_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return None;
        }

        if self.is_proxied(value) {
            return None;
        }

        let absolute = self.base.join(value).ok()?;
        if absolute.scheme() != "http" && absolute.scheme() != "https" {
            return None;
        }

        let encoded = urlencoding::encode(absolute.as_str());
        if allow_bypass && self.is_bypass_host(absolute.host_str().unwrap_or_default()) {
            Some(format!("{}?url={}&bypass=true", self.prefix, encoded))
        } else {
            Some(format!("{}?url={}", self.prefix, encoded))
        }
    }
}

/// A document rewriting strategy
pub trait Rewriter: Send + Sync {
    /// Rewrite a full HTML document: strip blockers, pin the base, route
    /// every embedded reference through the proxy, inject the
    /// countermeasure script. Must be deterministic and idempotent.
    fn rewrite_document(&self, html: &str, ctx: &RewriteContext) -> Result<String>;

    /// Rewrite a standalone stylesheet (`url(...)` and `@import` only)
    fn rewrite_stylesheet(&self, css: &str, ctx: &RewriteContext) -> String;
}

/// Construct the configured strategy
pub fn build_rewriter(strategy: &str) -> Arc<dyn Rewriter> {
    match strategy {
        "regex" => Arc::new(RegexRewriter::new()),
        other => {
            warn!(strategy = other, "Unknown rewrite strategy, using regex");
            Arc::new(RegexRewriter::new())
        }
    }
}
