//! Proxy pipeline orchestration
//!
//! One request, one sequential pass: resolve → cache consult → fetch →
//! classify → rewrite or pass through. Failures at any stage become the
//! diagnostic page; failures in the rewrite stage alone degrade to raw
//! passthrough instead of failing the request.

use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Redirect, Response};
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::cache::{AssetStore, CachedAsset};
use crate::config::Config;
use crate::error::{RefractError, Result};
use crate::models::{ProxyRequest, UpstreamResponse};
use crate::rewrite::{build_rewriter, RewriteContext, Rewriter};

use super::classifier::{self, Disposition};
use super::diagnostics;
use super::fetcher::UpstreamFetcher;
use super::headers::{self, ProxyStatus};
use super::resolver;

/// Orchestrates the fetch → classify → rewrite pipeline
pub struct ProxyHandler {
    prefix: String,
    landing_page: String,
    bypass_domains: Vec<String>,
    cache_ceiling: usize,
    cache_ttl_secs: u64,
    fetcher: UpstreamFetcher,
    rewriter: Arc<dyn Rewriter>,
    store: Arc<dyn AssetStore>,
}

impl ProxyHandler {
    pub fn new(config: &Config, store: Arc<dyn AssetStore>) -> Result<Self> {
        Ok(Self {
            prefix: config.proxy.path_prefix.clone(),
            landing_page: config.proxy.landing_page.clone(),
            bypass_domains: config.proxy.bypass_domains.clone(),
            cache_ceiling: config.cache.max_asset_bytes,
            cache_ttl_secs: config.cache.ttl,
            fetcher: UpstreamFetcher::new(&config.proxy)?,
            rewriter: build_rewriter(&config.proxy.rewrite_strategy),
            store,
        })
    }

    /// Process one proxy request end to end. Never fails; every error
    /// becomes a response.
    #[instrument(
        skip(self, request),
        fields(
            request_id = %Uuid::new_v4(),
            method = %request.method,
            target = %request.raw_target_url,
            service = request.service.as_deref().unwrap_or("-"),
            retry = request.options.retry_count,
        )
    )]
    pub async fn handle(&self, request: ProxyRequest) -> Response {
        match self.execute(&request).await {
            Ok(response) => response,
            Err(err) => self.failure_response(&request, err),
        }
    }

    async fn execute(&self, request: &ProxyRequest) -> Result<Response> {
        let target = resolver::resolve_target(Some(&request.raw_target_url), &request.options)?;

        let asset_request = request.method == Method::GET
            && classifier::is_static_asset(target.path())
            && !request.options.bypass_rewrite;
        if asset_request {
            if let Some(hit) = self.store.get(target.as_str()).await {
                debug!(url = target.as_str(), "Serving from asset cache");
                return Ok(self.cached_response(hit, target.as_str()));
            }
        }

        let upstream = self.fetcher.fetch(&target, request).await?;

        let ctx = RewriteContext {
            base: upstream.final_url.clone(),
            prefix: self.prefix.clone(),
            bypass_domains: self.bypass_domains.clone(),
            debug: request.options.debug,
        };

        let bypass = request.options.bypass_rewrite
            || ctx.is_bypass_host(upstream.final_url.host_str().unwrap_or_default());

        match classifier::classify(upstream.content_type(), bypass) {
            Disposition::RewriteHtml => Ok(self.html_response(&upstream, &ctx)),
            Disposition::RewriteCss => {
                Ok(self.css_response(request, &upstream, &ctx, target.as_str()).await)
            }
            Disposition::Passthrough => {
                Ok(self.passthrough_response(request, &upstream, target.as_str()).await)
            }
        }
    }

    /// Rewritten document. Upstream error pages are still valid content;
    /// their status passes through.
    fn html_response(&self, upstream: &UpstreamResponse, ctx: &RewriteContext) -> Response {
        let rewritten = match std::str::from_utf8(&upstream.body) {
            Ok(text) => self.rewriter.rewrite_document(text, ctx),
            Err(e) => Err(RefractError::RewriteFailed(format!(
                "document is not valid UTF-8: {e}"
            ))),
        };

        match rewritten {
            Ok(document) => {
                let mut response_headers = headers::filter_upstream_headers(&upstream.headers);
                response_headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/html; charset=utf-8"),
                );
                response_headers
                    .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
                headers::apply_proxy_headers(
                    &mut response_headers,
                    ProxyStatus::Success,
                    upstream.final_url.as_str(),
                );
                build_response(upstream.status, response_headers, Body::from(document))
            }
            Err(err) => {
                warn!(error = %err, "Rewrite failed, serving unmodified bytes");
                self.degraded_response(upstream, err)
            }
        }
    }

    /// Standalone stylesheet: url()/@import targets rerouted, result cached
    /// like any other static asset
    async fn css_response(
        &self,
        request: &ProxyRequest,
        upstream: &UpstreamResponse,
        ctx: &RewriteContext,
        cache_key: &str,
    ) -> Response {
        let css = match std::str::from_utf8(&upstream.body) {
            Ok(text) => text,
            Err(e) => {
                let err = RefractError::RewriteFailed(format!("stylesheet is not valid UTF-8: {e}"));
                warn!(error = %err, "Rewrite failed, serving unmodified bytes");
                return self.degraded_response(upstream, err);
            }
        };

        let rewritten = Bytes::from(self.rewriter.rewrite_stylesheet(css, ctx));
        if classifier::is_cacheable(
            &request.method,
            upstream.status,
            upstream.final_url.path(),
            rewritten.len(),
            self.cache_ceiling,
        ) {
            self.store.put(cache_key, rewritten.clone(), "text/css").await;
        }

        let mut response_headers = headers::filter_upstream_headers(&upstream.headers);
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/css; charset=utf-8"),
        );
        self.insert_asset_cache_control(&mut response_headers);
        headers::apply_proxy_headers(
            &mut response_headers,
            ProxyStatus::Success,
            upstream.final_url.as_str(),
        );
        build_response(upstream.status, response_headers, Body::from(rewritten))
    }

    /// Byte-exact passthrough, populating the asset cache when eligible
    async fn passthrough_response(
        &self,
        request: &ProxyRequest,
        upstream: &UpstreamResponse,
        cache_key: &str,
    ) -> Response {
        if classifier::is_cacheable(
            &request.method,
            upstream.status,
            upstream.final_url.path(),
            upstream.body.len(),
            self.cache_ceiling,
        ) && !request.options.bypass_rewrite
        {
            self.store
                .put(cache_key, upstream.body.clone(), upstream.content_type())
                .await;
        }

        let mut response_headers = headers::filter_upstream_headers(&upstream.headers);
        insert_content_type(&mut response_headers, upstream.content_type());
        self.insert_asset_cache_control(&mut response_headers);
        headers::apply_proxy_headers(
            &mut response_headers,
            ProxyStatus::Forwarded,
            upstream.final_url.as_str(),
        );
        build_response(
            upstream.status,
            response_headers,
            Body::from(upstream.body.clone()),
        )
    }

    /// Rewrite-stage failure: raw bytes, original status, error surfaced in
    /// headers. Never aborts the request.
    fn degraded_response(&self, upstream: &UpstreamResponse, err: RefractError) -> Response {
        let mut response_headers = headers::filter_upstream_headers(&upstream.headers);
        insert_content_type(&mut response_headers, upstream.content_type());
        headers::apply_proxy_headers(
            &mut response_headers,
            ProxyStatus::Forwarded,
            upstream.final_url.as_str(),
        );
        headers::apply_error_header(&mut response_headers, err.kind());
        build_response(
            upstream.status,
            response_headers,
            Body::from(upstream.body.clone()),
        )
    }

    fn cached_response(&self, hit: CachedAsset, source: &str) -> Response {
        let mut response_headers = HeaderMap::new();
        insert_content_type(&mut response_headers, &hit.content_type);
        self.insert_asset_cache_control(&mut response_headers);
        response_headers.insert(
            http::header::HeaderName::from_static("x-proxy-cache"),
            HeaderValue::from_static("hit"),
        );
        headers::apply_proxy_headers(&mut response_headers, ProxyStatus::Success, source);
        build_response(StatusCode::OK, response_headers, Body::from(hit.payload))
    }

    fn failure_response(&self, request: &ProxyRequest, err: RefractError) -> Response {
        if matches!(err, RefractError::MissingTarget) {
            return Redirect::to(&self.landing_page).into_response();
        }

        if err.is_server_error() {
            error!(error = %err, kind = err.kind(), "Proxy request failed");
        } else {
            warn!(error = %err, kind = err.kind(), "Proxy request rejected");
        }

        // Post-resolution failures know the resolved URL; earlier ones only
        // have the raw parameter
        let source = match &err {
            RefractError::UpstreamTimeout { url }
            | RefractError::UpstreamNetwork { url, .. } => url.clone(),
            _ => request.raw_target_url.clone(),
        };

        let report = diagnostics::report_for(&err, &source, request.options.retry_count);
        let page = diagnostics::render(&report, &self.prefix, &self.landing_page);

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        headers::apply_proxy_headers(&mut response_headers, ProxyStatus::Error, &source);
        headers::apply_error_header(&mut response_headers, err.kind());
        build_response(err.status_code(), response_headers, Body::from(page))
    }

    /// Client-side caching aligned with the server-side TTL
    fn insert_asset_cache_control(&self, headers: &mut HeaderMap) {
        if let Ok(value) =
            HeaderValue::from_str(&format!("public, max-age={}", self.cache_ttl_secs))
        {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }
}

fn insert_content_type(headers: &mut HeaderMap, content_type: &str) {
    let value = if content_type.is_empty() {
        HeaderValue::from_static("application/octet-stream")
    } else {
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
    };
    headers.insert(header::CONTENT_TYPE, value);
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AssetCache, NoopStore};
    use crate::models::RequestOptions;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use url::Url;

    fn test_config() -> Config {
        // Safe defaults without touching the process environment
        Config {
            server: crate::config::ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
            },
            proxy: crate::config::ProxyConfig {
                path_prefix: "/proxy".to_string(),
                landing_page: "/".to_string(),
                connect_timeout: 1,
                request_timeout: 1,
                bypass_domains: vec!["poki.com".to_string()],
                rewrite_strategy: "regex".to_string(),
                rate_limit_enabled: false,
                rate_limit_per_second: 50,
                rate_limit_burst: 100,
            },
            cache: crate::config::CacheConfig {
                enabled: true,
                ttl: 300,
                max_entries: 16,
                max_asset_bytes: 4096,
            },
            log: crate::config::LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    fn handler_with(store: Arc<dyn AssetStore>) -> ProxyHandler {
        ProxyHandler::new(&test_config(), store).unwrap()
    }

    fn request_for(url: &str) -> ProxyRequest {
        ProxyRequest {
            raw_target_url: url.to_string(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            options: RequestOptions::default(),
            service: None,
        }
    }

    fn upstream(url: &str, status: StatusCode, content_type: &str, body: &[u8]) -> UpstreamResponse {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap(),
        );
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        UpstreamResponse {
            status,
            headers,
            body: Bytes::copy_from_slice(body),
            final_url: Url::parse(url).unwrap(),
            redirected: false,
        }
    }

    fn ctx_for(upstream: &UpstreamResponse, handler: &ProxyHandler) -> RewriteContext {
        RewriteContext {
            base: upstream.final_url.clone(),
            prefix: handler.prefix.clone(),
            bypass_domains: handler.bypass_domains.clone(),
            debug: false,
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_html_response_rewrites_and_stamps_headers() {
        let handler = handler_with(Arc::new(NoopStore));
        let upstream = upstream(
            "https://example.com/",
            StatusCode::OK,
            "text/html",
            b"<html><head></head><body><a href=\"/about\">x</a></body></html>",
        );
        let ctx = ctx_for(&upstream, &handler);

        let response = handler.html_response(&upstream, &ctx);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-proxy-status").unwrap(), "success");
        assert_eq!(
            response.headers().get("x-proxy-source").unwrap(),
            "https://example.com/"
        );
        assert!(response.headers().get("x-frame-options").is_none());

        let body = body_string(response).await;
        assert!(body.contains("/proxy?url=https%3A%2F%2Fexample.com%2Fabout"));
    }

    #[tokio::test]
    async fn test_non_utf8_html_degrades_to_passthrough() {
        let handler = handler_with(Arc::new(NoopStore));
        let raw = [0xff, 0xfe, 0x00, 0x01];
        let upstream = upstream("https://example.com/", StatusCode::OK, "text/html", &raw);
        let ctx = ctx_for(&upstream, &handler);

        let response = handler.html_response(&upstream, &ctx);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-proxy-status").unwrap(),
            "forwarded"
        );
        assert_eq!(
            response.headers().get("x-proxy-error").unwrap(),
            "rewrite-failed"
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], &raw);
    }

    #[tokio::test]
    async fn test_passthrough_keeps_bytes_and_status() {
        let handler = handler_with(Arc::new(NoopStore));
        let payload = br#"{"missing":true}"#;
        let upstream = upstream(
            "https://example.com/api/data",
            StatusCode::NOT_FOUND,
            "application/json",
            payload,
        );
        let request = request_for("https://example.com/api/data");

        let response = handler
            .passthrough_response(&request, &upstream, "https://example.com/api/data")
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("x-proxy-status").unwrap(),
            "forwarded"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], payload);
    }

    #[tokio::test]
    async fn test_passthrough_populates_cache_for_static_assets() {
        let store = Arc::new(AssetCache::with_limits(Duration::from_secs(60), 16, 4096));
        let handler = handler_with(store.clone());
        let upstream = upstream(
            "https://example.com/assets/app.js",
            StatusCode::OK,
            "text/javascript",
            b"console.log(1)",
        );
        let request = request_for("https://example.com/assets/app.js");

        handler
            .passthrough_response(&request, &upstream, "https://example.com/assets/app.js")
            .await;

        let hit = store.get("https://example.com/assets/app.js").await.unwrap();
        assert_eq!(&hit.payload[..], b"console.log(1)");
        assert_eq!(hit.content_type, "text/javascript");
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_upstream_fetch() {
        let store = Arc::new(AssetCache::with_limits(Duration::from_secs(60), 16, 4096));
        store
            .put(
                "https://example.com/assets/app.js",
                Bytes::from_static(b"cached body"),
                "text/javascript",
            )
            .await;
        let handler = handler_with(store);

        // No upstream is reachable from here; a hit is the only way this
        // resolves successfully
        let response = handler
            .handle(request_for("https://example.com/assets/app.js"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-proxy-cache").unwrap(), "hit");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"cached body");
    }

    #[tokio::test]
    async fn test_cached_response_marks_hit() {
        let handler = handler_with(Arc::new(NoopStore));
        let response = handler.cached_response(
            CachedAsset {
                payload: Bytes::from_static(b"cached"),
                content_type: "text/javascript".to_string(),
            },
            "https://example.com/app.js",
        );

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-proxy-cache").unwrap(), "hit");
        assert_eq!(response.headers().get("x-proxy-status").unwrap(), "success");
    }

    #[tokio::test]
    async fn test_missing_target_redirects_to_landing() {
        let handler = handler_with(Arc::new(NoopStore));
        let request = request_for("");

        let response = handler.failure_response(&request, RefractError::MissingTarget);
        assert!(response.status().is_redirection());
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[tokio::test]
    async fn test_failure_renders_diagnostic_page() {
        let handler = handler_with(Arc::new(NoopStore));
        let request = request_for("https://no-such-host.example/");

        let response = handler.failure_response(
            &request,
            RefractError::UpstreamNetwork {
                url: "https://no-such-host.example/".to_string(),
                message: "dns error".to_string(),
            },
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get("x-proxy-status").unwrap(), "error");
        assert_eq!(
            response.headers().get("x-proxy-error").unwrap(),
            "upstream-network"
        );

        let body = body_string(response).await;
        assert!(body.contains("https://no-such-host.example/"));
    }

    #[tokio::test]
    async fn test_css_response_rewrites_urls() {
        let handler = handler_with(Arc::new(NoopStore));
        let upstream = upstream(
            "https://example.com/site.css",
            StatusCode::OK,
            "text/css",
            b"div{background:url(/bg.png)}",
        );
        let request = request_for("https://example.com/site.css");
        let ctx = ctx_for(&upstream, &handler);

        let response = handler
            .css_response(&request, &upstream, &ctx, "https://example.com/site.css")
            .await;
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/css; charset=utf-8"
        );

        let body = body_string(response).await;
        assert!(body.contains("/proxy?url=https%3A%2F%2Fexample.com%2Fbg.png"));
    }
}
