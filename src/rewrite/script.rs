//! Client-side countermeasure script
//!
//! Pure text generation: the browser-side half of the proxy. The template
//! neutralizes frame detection and reroutes every programmatic navigation
//! (clicks, form submits, window.open, history, fetch, XHR) through the
//! proxy endpoint, and mirrors cookie writes into localStorage so session
//! state survives navigations.
//!
//! Nothing here is executed server-side; tests cover parameter
//! substitution, not browser behavior.

use chrono::{SecondsFormat, Utc};

use super::RewriteContext;

/// Attribute marking an injected script; also the idempotence guard
pub const SHIELD_MARKER: &str = "data-refract-shield";

/// Bumped whenever the template changes behavior
pub const SHIELD_VERSION: &str = "2";

// The template avoids `<` everywhere outside the wrapping tags so the
// rewrite engine's tag scanner never matches inside the script body.
const SHIELD_TEMPLATE: &str = r#"<script __MARKER__="__VERSION__">
(function () {
  'use strict';
  var PREFIX = '__PREFIX__';
  var TARGET = '__TARGET__';
  var HOST = '__HOST__';
  var ROUTED = PREFIX + '?url=';

  // Frame-detection probes observe a top-level window
  try {
    Object.defineProperty(window, 'self', { get: function () { return window; } });
    Object.defineProperty(window, 'top', { get: function () { return window; } });
    Object.defineProperty(window, 'parent', { get: function () { return window; } });
    Object.defineProperty(window, 'frameElement', { get: function () { return null; } });
  } catch (err) { /* frozen globals */ }

  function toProxy(raw) {
    if (!raw || typeof raw !== 'string') { return raw; }
    if (raw.indexOf(ROUTED) === 0) { return raw; }
    if (/^(data:|blob:|javascript:|#|about:)/i.test(raw)) { return raw; }
    try {
      var abs = new URL(raw, TARGET).href;
      if (abs.indexOf('http') !== 0) { return raw; }
      return ROUTED + encodeURIComponent(abs);
    } catch (err) { return raw; }
  }

  function unroute(value) {
    if (value.indexOf(ROUTED) === 0) {
      return decodeURIComponent(value.slice(ROUTED.length).split('&')[0]);
    }
    return value;
  }

  // Cookie writes are mirrored per-hostname so session state survives
  // navigations across proxied "origins"
  try {
    var jarKey = 'refract-cookies-' + HOST;
    var jar = Object.getOwnPropertyDescriptor(Document.prototype, 'cookie');
    var stored = localStorage.getItem(jarKey);
    if (stored) {
      stored.split('; ').forEach(function (pair) {
        if (pair) { jar.set.call(document, pair); }
      });
    }
    Object.defineProperty(document, 'cookie', {
      get: function () { return jar.get.call(document); },
      set: function (value) {
        jar.set.call(document, value);
        try { localStorage.setItem(jarKey, jar.get.call(document)); } catch (err) { /* quota */ }
      }
    });
  } catch (err) { /* cookie jar not patchable */ }

  var nativeFetch = window.fetch;
  window.fetch = function (input, init) {
    if (typeof input === 'string') { return nativeFetch.call(window, toProxy(input), init); }
    if (input && typeof input.url === 'string') {
      return nativeFetch.call(window, new Request(toProxy(input.url), input), init);
    }
    return nativeFetch.call(window, input, init);
  };

  var nativeXhrOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function (method, url) {
    var args = Array.prototype.slice.call(arguments);
    args[1] = toProxy(url);
    return nativeXhrOpen.apply(this, args);
  };

  var nativeWindowOpen = window.open;
  window.open = function (url, name, features) {
    return nativeWindowOpen.call(window, toProxy(url), name, features);
  };

  ['pushState', 'replaceState'].forEach(function (fn) {
    var native = history[fn];
    history[fn] = function (state, title, url) {
      if (url !== undefined && url !== null) { url = toProxy(String(url)); }
      return native.call(history, state, title, url);
    };
  });

  document.addEventListener('click', function (ev) {
    var el = ev.target;
    while (el && el.tagName !== 'A') { el = el.parentElement; }
    if (!el) { return; }
    var href = el.getAttribute('href');
    if (!href || /^(javascript:|#)/i.test(href)) { return; }
    var routed = toProxy(href);
    if (routed !== href) {
      ev.preventDefault();
      ev.stopPropagation();
      window.location.href = routed;
    }
  }, true);

  document.addEventListener('submit', function (ev) {
    var form = ev.target;
    if (!form || form.tagName !== 'FORM') { return; }
    var action = unroute(form.getAttribute('action') || TARGET);
    var method = (form.getAttribute('method') || 'get').toLowerCase();
    var abs;
    try { abs = new URL(action, TARGET).href; } catch (err) { abs = TARGET; }
    ev.preventDefault();
    if (method === 'get') {
      var query = new URLSearchParams(new FormData(form)).toString();
      if (query) { abs += (abs.indexOf('?') === -1 ? '?' : '&') + query; }
      window.location.href = ROUTED + encodeURIComponent(abs);
    } else {
      fetch(ROUTED + encodeURIComponent(abs), { method: method, body: new FormData(form) })
        .then(function (res) { return res.text(); })
        .then(function (html) {
          document.open();
          document.write(html);
          document.close();
        });
    }
  }, true);
})();
</script>"#;

/// Render the countermeasure script for one request
pub fn shield_script(ctx: &RewriteContext) -> String {
    SHIELD_TEMPLATE
        .replace("__MARKER__", SHIELD_MARKER)
        .replace("__VERSION__", SHIELD_VERSION)
        .replace("__PREFIX__", &js_str(&ctx.prefix))
        .replace("__TARGET__", &js_str(ctx.base.as_str()))
        .replace("__HOST__", &js_str(ctx.base.host_str().unwrap_or_default()))
}

/// Render the debug overlay element: source URL and render time
pub fn debug_overlay(ctx: &RewriteContext) -> String {
    format!(
        concat!(
            r#"<div id="refract-debug" style="position:fixed;bottom:8px;right:8px;"#,
            r#"z-index:2147483647;background:rgba(0,0,0,0.75);color:#fff;"#,
            r#"font:11px monospace;padding:4px 8px;border-radius:4px;">{} at {}</div>"#,
        ),
        ctx.base,
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

/// Escape a value for interpolation into a single-quoted JS string
fn js_str(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn ctx() -> RewriteContext {
        RewriteContext {
            base: Url::parse("https://www.example.com/dir/page.html").unwrap(),
            prefix: "/proxy".to_string(),
            bypass_domains: vec![],
            debug: true,
        }
    }

    #[test]
    fn test_shield_substitutes_all_parameters() {
        let script = shield_script(&ctx());

        assert!(script.contains("var PREFIX = '/proxy';"));
        assert!(script.contains("var TARGET = 'https://www.example.com/dir/page.html';"));
        assert!(script.contains("var HOST = 'www.example.com';"));
        assert!(!script.contains("__PREFIX__"));
        assert!(!script.contains("__TARGET__"));
        assert!(!script.contains("__HOST__"));
    }

    #[test]
    fn test_shield_carries_marker_and_version() {
        let script = shield_script(&ctx());
        assert!(script.contains(&format!(r#"{SHIELD_MARKER}="{SHIELD_VERSION}""#)));
    }

    #[test]
    fn test_shield_body_never_opens_a_tag() {
        // The rewrite engine scans `<letter` sequences; the script body must
        // not contain any outside its own wrapping tags
        let script = shield_script(&ctx());
        let body = script
            .trim_start_matches(|c| c != '>')
            .trim_end_matches(|c| c != '<');
        let inner = &body[1..body.len() - 1];
        assert!(!inner
            .chars()
            .zip(inner.chars().skip(1))
            .any(|(a, b)| a == '<' && b.is_ascii_alphabetic()));
    }

    #[test]
    fn test_overlay_reports_source_url() {
        let overlay = debug_overlay(&ctx());
        assert!(overlay.contains("refract-debug"));
        assert!(overlay.contains("https://www.example.com/dir/page.html"));
    }

    #[test]
    fn test_js_str_escapes_quotes() {
        assert_eq!(js_str("a'b\\c"), "a\\'b\\\\c");
    }
}
