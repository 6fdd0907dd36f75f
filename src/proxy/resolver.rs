//! Target URL resolution and validation

use url::Url;

use crate::error::{RefractError, Result};
use crate::models::{RequestOptions, ResolvedTarget};

/// Normalize and validate the raw `url` query parameter.
///
/// Scheme-less values get `https://` prefixed (`http://` when the request
/// asks for the protocol bypass) to match what a user types into an address
/// bar. Values carrying an explicit non-http scheme, and anything that still
/// fails to parse as an absolute URL with a host, are rejected.
pub fn resolve_target(raw: Option<&str>, options: &RequestOptions) -> Result<ResolvedTarget> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(RefractError::MissingTarget)?;

    let candidate = match explicit_scheme(raw) {
        Some(scheme) if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") => {
            raw.to_string()
        }
        Some(scheme) => {
            return Err(RefractError::InvalidTarget(format!(
                "{raw}: unsupported scheme {scheme}"
            )))
        }
        None if options.force_protocol_bypass => format!("http://{raw}"),
        None => format!("https://{raw}"),
    };

    let url = Url::parse(&candidate)
        .map_err(|e| RefractError::InvalidTarget(format!("{raw}: {e}")))?;

    if url.host_str().is_none() {
        return Err(RefractError::InvalidTarget(format!("{raw}: missing host")));
    }

    Ok(ResolvedTarget::new(url))
}

/// The part before `://`, if the value spells a scheme out
fn explicit_scheme(raw: &str) -> Option<&str> {
    raw.find("://").map(|idx| &raw[..idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_domain_gets_https() {
        let target = resolve_target(Some("example.com"), &RequestOptions::default()).unwrap();
        assert_eq!(target.as_str(), "https://example.com/");
        assert_eq!(target.scheme(), "https");
    }

    #[test]
    fn test_explicit_scheme_preserved() {
        let target =
            resolve_target(Some("http://example.com/page"), &RequestOptions::default()).unwrap();
        assert_eq!(target.scheme(), "http");
        assert_eq!(target.path(), "/page");
    }

    #[test]
    fn test_scheme_case_insensitive() {
        let target =
            resolve_target(Some("HTTPS://Example.COM/"), &RequestOptions::default()).unwrap();
        assert_eq!(target.host(), "example.com");
    }

    #[test]
    fn test_protocol_bypass_prefixes_http() {
        let options = RequestOptions {
            force_protocol_bypass: true,
            ..Default::default()
        };
        let target = resolve_target(Some("intranet.local/status"), &options).unwrap();
        assert_eq!(target.scheme(), "http");
    }

    #[test]
    fn test_missing_target() {
        assert!(matches!(
            resolve_target(None, &RequestOptions::default()),
            Err(RefractError::MissingTarget)
        ));
        assert!(matches!(
            resolve_target(Some("   "), &RequestOptions::default()),
            Err(RefractError::MissingTarget)
        ));
    }

    #[test]
    fn test_malformed_target() {
        assert!(matches!(
            resolve_target(Some("http://[broken"), &RequestOptions::default()),
            Err(RefractError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        assert!(matches!(
            resolve_target(Some("ftp://example.com/file"), &RequestOptions::default()),
            Err(RefractError::InvalidTarget(_))
        ));
        assert!(matches!(
            resolve_target(Some("javascript://alert(1)"), &RequestOptions::default()),
            Err(RefractError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_host_with_port_is_not_a_scheme() {
        let target =
            resolve_target(Some("example.com:8443/admin"), &RequestOptions::default()).unwrap();
        assert_eq!(target.as_str(), "https://example.com:8443/admin");
    }

    #[test]
    fn test_query_preserved() {
        let target =
            resolve_target(Some("example.com/search?q=a+b"), &RequestOptions::default()).unwrap();
        assert_eq!(target.as_str(), "https://example.com/search?q=a+b");
    }
}
