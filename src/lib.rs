//! Refract - Transparent Rewriting Reverse Proxy
//!
//! Fetches remote documents on behalf of a client and rewrites HTML so every
//! embedded reference routes back through the proxy.
//!
//! ## Features
//!
//! - Fetch → classify → rewrite → inject pipeline with browser impersonation
//! - Regex-based HTML/CSS reference rewriting behind a strategy trait
//! - Injected client-side script neutralizing frame detection and
//!   intercepting navigation, fetch, XHR, and history APIs
//! - Bounded TTL asset cache for static responses
//! - Self-contained diagnostic pages with a cooperative retry contract
//! - Optional per-client rate limiting

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod rewrite;
pub mod server;

pub use config::Config;
pub use error::{RefractError, Result};
pub use server::ProxyServer;
