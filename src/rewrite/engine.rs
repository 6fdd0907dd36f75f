//! Regex-based rewrite strategy
//!
//! The lean variant: no DOM is built. Tags are scanned with compiled
//! patterns and attribute values are rewritten in place. Markup inside
//! comments or scripted document.write calls is treated like markup.

use regex::{Captures, Regex};

use crate::error::Result;

use super::script;
use super::{RewriteContext, Rewriter};

/// `<script src>` substrings that identify anti-automation/fingerprinting
/// loaders. Tags matching any of these are dropped from the document.
const SCRIPT_BLOCK_SIGNATURES: &[&str] = &[
    "perimeterx",
    "px-cloud",
    "datadome",
    "imperva",
    "incapsula",
    "distil",
    "botguard",
    "fingerprintjs",
    "hcaptcha",
    "turnstile",
];

/// Regex rewrite strategy. Patterns are compiled once at construction and
/// shared for the lifetime of the process.
pub struct RegexRewriter {
    meta_blocker: Regex,
    script_blocker: Regex,
    tag: Regex,
    url_attr: Regex,
    srcset_attr: Regex,
    style_attr: Regex,
    css_url: Regex,
    css_import: Regex,
    style_block: Regex,
    base_tag: Regex,
    href_attr: Regex,
    head_open: Regex,
    head_close: Regex,
    body_close: Regex,
}

impl RegexRewriter {
    pub fn new() -> Self {
        let signatures = SCRIPT_BLOCK_SIGNATURES.join("|");

        Self {
            meta_blocker: Regex::new(
                r#"(?i)<meta\b[^>]*http-equiv\s*=\s*["']?(?:x-frame-options|content-security-policy|frame-options)["']?[^>]*>"#,
            )
            .expect("meta blocker pattern"),
            script_blocker: Regex::new(&format!(
                r#"(?is)<script\b[^>]*\bsrc\s*=\s*["'][^"']*(?:{signatures})[^"']*["'][^>]*>.*?</script\s*>"#,
            ))
            .expect("script blocker pattern"),
            tag: Regex::new(r"<([a-zA-Z][a-zA-Z0-9-]*)([^>]*)>").expect("tag pattern"),
            url_attr: Regex::new(
                r#"(?i)\b(data-src|data-url|data-background|formaction|src|href|poster|action)\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
            )
            .expect("url attribute pattern"),
            srcset_attr: Regex::new(r#"(?i)\bsrcset\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
                .expect("srcset pattern"),
            style_attr: Regex::new(r#"(?i)\bstyle\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
                .expect("style attribute pattern"),
            css_url: Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^"'\s)][^)\s]*))\s*\)"#)
                .expect("css url pattern"),
            css_import: Regex::new(r#"(?i)@import\s+(?:"([^"]+)"|'([^']+)')"#)
                .expect("css import pattern"),
            style_block: Regex::new(r"(?is)(<style\b[^>]*>)(.*?)(</style\s*>)")
                .expect("style block pattern"),
            base_tag: Regex::new(r"(?i)<base\b[^>]*>").expect("base tag pattern"),
            href_attr: Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']*)["']"#).expect("href pattern"),
            head_open: Regex::new(r"(?i)<head\b[^>]*>").expect("head open pattern"),
            head_close: Regex::new(r"(?i)</head\s*>").expect("head close pattern"),
            body_close: Regex::new(r"(?i)</body\s*>").expect("body close pattern"),
        }
    }

    /// Step 1: drop frame/CSP meta tags and known anti-automation loaders
    fn strip_blockers(&self, doc: &str) -> String {
        let doc = self.meta_blocker.replace_all(doc, "");
        self.script_blocker.replace_all(&doc, "").into_owned()
    }

    /// Step 2: exactly one `<base>`, absolute, pointing at the final target
    fn ensure_base(&self, doc: &str, ctx: &RewriteContext) -> String {
        if self.base_tag.is_match(doc) {
            let mut seen = false;
            return self
                .base_tag
                .replace_all(doc, |caps: &Captures| {
                    if seen {
                        return String::new();
                    }
                    seen = true;

                    let href = self
                        .href_attr
                        .captures(&caps[0])
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    let absolute = ctx
                        .base
                        .join(&href)
                        .map(|u| u.to_string())
                        .unwrap_or_else(|_| ctx.base.to_string());

                    format!(r#"<base href="{absolute}">"#)
                })
                .into_owned();
        }

        match self.head_open.find(doc) {
            Some(m) => {
                let insert = format!(r#"<base href="{}">"#, ctx.base);
                format!("{}{}{}", &doc[..m.end()], insert, &doc[m.end()..])
            }
            // Fragment without a head: nothing sensible to pin
            None => doc.to_string(),
        }
    }

    /// Steps 3-5 (attribute part): route url-carrying attributes, srcset
    /// candidates, and inline style urls, tag by tag
    fn rewrite_tags(&self, doc: &str, ctx: &RewriteContext) -> String {
        self.tag
            .replace_all(doc, |caps: &Captures| {
                let name = caps[1].to_lowercase();
                // The base tag must keep its absolute, un-proxied href
                if name == "base" {
                    return caps[0].to_string();
                }
                let allow_bypass = name == "a" || name == "iframe";

                let attrs = self
                    .url_attr
                    .replace_all(&caps[2], |ac: &Captures| {
                        let value = quoted_value(ac, 2, 3);
                        match ctx.route(value, allow_bypass) {
                            Some(routed) => {
                                let quote = if ac.get(2).is_some() { '"' } else { '\'' };
                                format!("{}={quote}{routed}{quote}", &ac[1])
                            }
                            None => ac[0].to_string(),
                        }
                    })
                    .into_owned();

                let attrs = self
                    .srcset_attr
                    .replace_all(&attrs, |ac: &Captures| {
                        let value = quoted_value(ac, 1, 2);
                        let quote = if ac.get(1).is_some() { '"' } else { '\'' };
                        format!("srcset={quote}{}{quote}", self.rewrite_srcset(value, ctx))
                    })
                    .into_owned();

                let attrs = self
                    .style_attr
                    .replace_all(&attrs, |ac: &Captures| {
                        let value = quoted_value(ac, 1, 2);
                        // Emitted css quoting must not collide with the
                        // attribute's own quote character
                        let (quote, inner_quote) =
                            if ac.get(1).is_some() { ('"', '\'') } else { ('\'', '"') };
                        format!(
                            "style={quote}{}{quote}",
                            self.rewrite_css(value, ctx, inner_quote)
                        )
                    })
                    .into_owned();

                format!("<{}{}>", &caps[1], attrs)
            })
            .into_owned()
    }

    /// Step 4: rewrite each srcset candidate's url, preserving descriptors
    fn rewrite_srcset(&self, srcset: &str, ctx: &RewriteContext) -> String {
        srcset
            .split(',')
            .map(|candidate| {
                let candidate = candidate.trim();
                let mut pieces = candidate.splitn(2, char::is_whitespace);
                let url = pieces.next().unwrap_or("");
                let descriptor = pieces.next().map(str::trim).unwrap_or("");

                let routed = ctx.route(url, false).unwrap_or_else(|| url.to_string());
                if descriptor.is_empty() {
                    routed
                } else {
                    format!("{routed} {descriptor}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Step 5: `url(...)` and `@import` targets inside CSS text
    fn rewrite_css(&self, css: &str, ctx: &RewriteContext, quote: char) -> String {
        let css = self.css_url.replace_all(css, |caps: &Captures| {
            let value = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            match ctx.route(value, false) {
                Some(routed) => format!("url({quote}{routed}{quote})"),
                None => caps[0].to_string(),
            }
        });

        self.css_import
            .replace_all(&css, |caps: &Captures| {
                let value = quoted_value(caps, 1, 2);
                match ctx.route(value, false) {
                    Some(routed) => format!("@import {quote}{routed}{quote}"),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Step 5 (block part): `<style>` element contents
    fn rewrite_style_blocks(&self, doc: &str, ctx: &RewriteContext) -> String {
        self.style_block
            .replace_all(doc, |caps: &Captures| {
                format!(
                    "{}{}{}",
                    &caps[1],
                    self.rewrite_css(&caps[2], ctx, '"'),
                    &caps[3]
                )
            })
            .into_owned()
    }

    /// Step 6: countermeasure script, appended to the end of `<head>`
    fn inject_shield(&self, doc: &str, ctx: &RewriteContext) -> String {
        if doc.contains(script::SHIELD_MARKER) {
            return doc.to_string();
        }

        let shield = script::shield_script(ctx);
        match self.head_close.find(doc) {
            Some(m) => format!("{}{}{}", &doc[..m.start()], shield, &doc[m.start()..]),
            None => format!("{doc}{shield}"),
        }
    }

    /// Step 7: debug overlay before `</body>`
    fn append_overlay(&self, doc: &str, ctx: &RewriteContext) -> String {
        let overlay = script::debug_overlay(ctx);
        match self.body_close.find(doc) {
            Some(m) => format!("{}{}{}", &doc[..m.start()], overlay, &doc[m.start()..]),
            None => format!("{doc}{overlay}"),
        }
    }
}

impl Default for RegexRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Rewriter for RegexRewriter {
    fn rewrite_document(&self, html: &str, ctx: &RewriteContext) -> Result<String> {
        let doc = self.strip_blockers(html);
        let doc = self.ensure_base(&doc, ctx);
        let doc = self.rewrite_tags(&doc, ctx);
        let doc = self.rewrite_style_blocks(&doc, ctx);
        let doc = self.inject_shield(&doc, ctx);

        if ctx.debug {
            Ok(self.append_overlay(&doc, ctx))
        } else {
            Ok(doc)
        }
    }

    fn rewrite_stylesheet(&self, css: &str, ctx: &RewriteContext) -> String {
        self.rewrite_css(css, ctx, '"')
    }
}

/// Pick whichever quoted capture group matched
fn quoted_value<'t>(caps: &'t Captures, double: usize, single: usize) -> &'t str {
    caps.get(double)
        .or_else(|| caps.get(single))
        .map(|m| m.as_str())
        .unwrap_or("")
}
