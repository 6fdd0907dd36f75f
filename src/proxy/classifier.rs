//! Content-type based response classification

use http::{Method, StatusCode};

/// How an upstream response moves through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Full document rewrite + script injection
    RewriteHtml,
    /// Stylesheet-only rewrite (`url(...)`, `@import`)
    RewriteCss,
    /// Byte-exact passthrough
    Passthrough,
}

/// Decide the pipeline path from the upstream `Content-Type`.
///
/// `bypass` is the caller's combined verdict: the `bypass` query option or a
/// final host on the bypass-domain list. Bypassed responses are never
/// rewritten, whatever their type.
pub fn classify(content_type: &str, bypass: bool) -> Disposition {
    if bypass {
        return Disposition::Passthrough;
    }

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    if essence.starts_with("text/html") || essence == "application/xhtml+xml" {
        Disposition::RewriteHtml
    } else if essence == "text/css" {
        Disposition::RewriteCss
    } else {
        Disposition::Passthrough
    }
}

/// Extensions the asset cache is willing to hold
const STATIC_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico", "bmp", "woff",
    "woff2", "ttf", "otf", "eot", "mp3", "mp4", "webm", "ogg", "m4a", "wav", "wasm",
];

/// True when the URL path names a recognizable static asset
pub fn is_static_asset(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_lowercase();
            STATIC_EXTENSIONS.iter().any(|e| *e == ext)
        }
        _ => false,
    }
}

/// Whether a finished upstream response may enter the cache
pub fn is_cacheable(method: &Method, status: StatusCode, path: &str, size: usize, ceiling: usize) -> bool {
    *method == Method::GET && status.is_success() && is_static_asset(path) && size <= ceiling
}
