//! Upstream fetch through a shared, pooled HTTP client
//!
//! The outbound request impersonates an ordinary browser: realistic
//! User-Agent/Accept headers, Referer pinned to the target origin, and the
//! client's cookies relayed verbatim (the jar is opaque; nothing is parsed).
//! Redirects are followed transparently and the final URL is reported for
//! downstream relative-reference resolution.

use http::header::{self, HeaderMap, HeaderValue};
use http::Method;
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::config::ProxyConfig;
use crate::error::{RefractError, Result};
use crate::models::{ProxyRequest, ResolvedTarget, UpstreamResponse};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// Fetches target documents on behalf of proxy clients
pub struct UpstreamFetcher {
    client: Client,
}

impl UpstreamFetcher {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::limited(10))
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| RefractError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Issue the outbound request. The client-level timeout cancels the
    /// in-flight request and surfaces as `UpstreamTimeout`.
    #[instrument(skip(self, request), fields(target = %target.as_str(), method = %request.method))]
    pub async fn fetch(
        &self,
        target: &ResolvedTarget,
        request: &ProxyRequest,
    ) -> Result<UpstreamResponse> {
        let headers = build_upstream_headers(&request.headers, target, &request.method);

        let mut builder = self
            .client
            .request(request.method.clone(), target.url().clone())
            .headers(headers);

        if forwards_body(&request.method) && !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_fetch_error(e, target))?;

        let final_url = response.url().clone();
        let redirected = final_url != *target.url();
        let status = response.status();
        let headers = response.headers().clone();

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_fetch_error(e, target))?;

        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            redirected,
            final_url = %final_url,
            "Upstream response received"
        );

        Ok(UpstreamResponse {
            status,
            headers,
            body,
            final_url,
            redirected,
        })
    }
}

/// Non-idempotent methods carry their body through byte-for-byte
fn forwards_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Assemble the browser-impersonating outbound header set.
///
/// Only the cookie jar and (for bodied methods) the content type cross over
/// from the inbound request; everything else is the fixed browser profile.
pub(crate) fn build_upstream_headers(
    inbound: &HeaderMap,
    target: &ResolvedTarget,
    method: &Method,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(header::USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(header::ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
    );
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));

    if let Ok(referer) = HeaderValue::from_str(&target.origin()) {
        headers.insert(header::REFERER, referer);
    }

    for cookie in inbound.get_all(header::COOKIE) {
        headers.append(header::COOKIE, cookie.clone());
    }

    if forwards_body(method) {
        if let Some(content_type) = inbound.get(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, content_type.clone());
        }
    }

    headers
}

fn classify_fetch_error(err: reqwest::Error, target: &ResolvedTarget) -> RefractError {
    if err.is_timeout() {
        RefractError::UpstreamTimeout {
            url: target.as_str().to_string(),
        }
    } else {
        RefractError::UpstreamNetwork {
            url: target.as_str().to_string(),
            message: err.to_string(),
        }
    }
}
