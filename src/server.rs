//! HTTP server and routing
//!
//! One logical proxy endpoint (method-agnostic), a health check, and a
//! neutral landing page that stands in for the external dashboard.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use http::header::HeaderValue;
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use crate::cache::AssetStore;
use crate::config::Config;
use crate::error::Result;
use crate::models::{ProxyRequest, RequestOptions};
use crate::proxy::headers::{self, ProxyStatus};
use crate::proxy::{ProxyHandler, RateLimiter};

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ProxyHandler>,
    pub rate_limiter: RateLimiter,
    pub landing_page: String,
    pub path_prefix: String,
    pub started_at: Instant,
}

/// The proxy's HTTP front end
pub struct ProxyServer {
    config: Config,
    state: AppState,
}

impl ProxyServer {
    pub fn new(config: Config, store: Arc<dyn AssetStore>) -> Result<Self> {
        let handler = Arc::new(ProxyHandler::new(&config, store)?);
        let state = AppState {
            handler,
            rate_limiter: RateLimiter::from_config(&config.proxy),
            landing_page: config.proxy.landing_page.clone(),
            path_prefix: config.proxy.path_prefix.clone(),
            started_at: Instant::now(),
        };

        Ok(Self { config, state })
    }

    /// Build the router
    fn build_router(&self) -> Router {
        // Slack on top of the upstream timeout so the fetch layer, not the
        // transport layer, is what expires first
        let hard_timeout = Duration::from_secs(self.config.proxy.request_timeout + 30);

        Router::new()
            .route("/health", get(health))
            .route("/", get(landing))
            .route(&self.config.proxy.path_prefix, any(proxy_entry))
            .layer(TimeoutLayer::new(hard_timeout))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server until the shutdown signal flips
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .server_addr()
            .parse()
            .expect("Invalid server address");

        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Proxy server listening on {}", addr);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| crate::error::RefractError::Internal(e.to_string()))?;

        info!("Proxy server shut down");
        Ok(())
    }
}

/// The single proxy endpoint, method-agnostic
async fn proxy_entry(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    if req.method() == Method::OPTIONS {
        return preflight_response();
    }

    if let Err(err) = state.rate_limiter.check(&addr.ip().to_string()) {
        let mut response = Response::new(Body::from("Rate limit exceeded"));
        *response.status_mut() = err.status_code();
        headers::apply_proxy_headers(response.headers_mut(), ProxyStatus::Error, "");
        headers::apply_error_header(response.headers_mut(), err.kind());
        return response;
    }

    let params = parse_query(req.uri().query());
    let Some(raw_target) = params.get("url").cloned() else {
        debug!("No target URL supplied, redirecting to landing page");
        return Redirect::to(&state.landing_page).into_response();
    };

    let options = RequestOptions::from_query(&params);
    let service = params.get("service").cloned();

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    let request = ProxyRequest {
        raw_target_url: raw_target,
        method: parts.method,
        headers: parts.headers,
        body,
        options,
        service,
    };

    state.handler.handle(request).await
}

/// `OPTIONS {prefix}` preflight contract
fn preflight_response() -> Response {
    let mut response = Response::new(Body::empty());
    let response_headers = response.headers_mut();
    response_headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    response_headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, PATCH, OPTIONS"),
    );
    response_headers.insert("access-control-allow-headers", HeaderValue::from_static("*"));
    response_headers.insert("access-control-max-age", HeaderValue::from_static("86400"));
    response
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

#[derive(serde::Serialize)]
struct HealthStatus {
    status: &'static str,
    service: &'static str,
    uptime_secs: u64,
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthStatus {
            status: "healthy",
            service: "refract",
            uptime_secs: state.started_at.elapsed().as_secs(),
        }),
    )
}

/// Neutral landing page: the default redirect target when no URL is given
async fn landing(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
  <head><title>Refract</title></head>
  <body style="font-family: Arial, sans-serif; max-width: 640px; margin: 4rem auto;">
    <h1>Refract</h1>
    <p>Enter a URL to browse through the proxy.</p>
    <form action="{prefix}" method="get">
      <input type="text" name="url" placeholder="example.com" size="40" autofocus>
      <button type="submit">Go</button>
    </form>
  </body>
</html>
"#,
        prefix = state.path_prefix,
    ))
}
