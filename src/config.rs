use crate::error::{RefractError, Result};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Proxy pipeline configuration
    pub proxy: ProxyConfig,
    /// Asset cache configuration
    pub cache: CacheConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on (default: 8080)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Path the proxy endpoint is mounted at (default: /proxy)
    pub path_prefix: String,
    /// Where clients are sent when no target URL is supplied
    pub landing_page: String,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// End-to-end upstream request timeout in seconds
    pub request_timeout: u64,
    /// Hostname suffixes whose HTML is never rewritten (video/game CDNs)
    pub bypass_domains: Vec<String>,
    /// Rewrite strategy name (currently only "regex" ships)
    pub rewrite_strategy: String,
    /// Enable per-client rate limiting
    pub rate_limit_enabled: bool,
    /// Rate limit requests per second
    pub rate_limit_per_second: u32,
    /// Rate limit burst size
    pub rate_limit_burst: u32,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether the asset cache is enabled
    pub enabled: bool,
    /// Entry time-to-live in seconds
    pub ttl: u64,
    /// Maximum number of cached entries
    pub max_entries: usize,
    /// Largest payload the cache will accept, in bytes
    pub max_asset_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                port: get_env_or("REFRACT_PORT", "8080").parse().map_err(|_| {
                    RefractError::InvalidConfig("REFRACT_PORT must be a valid port number".into())
                })?,
                host: get_env_or("REFRACT_HOST", "0.0.0.0"),
            },
            proxy: ProxyConfig {
                path_prefix: validate_prefix(get_env_or("REFRACT_PATH_PREFIX", "/proxy"))?,
                landing_page: get_env_or("REFRACT_LANDING_PAGE", "/"),
                connect_timeout: get_env_or("REFRACT_CONNECT_TIMEOUT", "10")
                    .parse()
                    .unwrap_or(10),
                request_timeout: get_env_or("REFRACT_REQUEST_TIMEOUT", "30")
                    .parse()
                    .unwrap_or(30),
                bypass_domains: get_env_or("REFRACT_BYPASS_DOMAINS", "")
                    .split(',')
                    .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect(),
                rewrite_strategy: get_env_or("REFRACT_REWRITE_STRATEGY", "regex"),
                rate_limit_enabled: get_env_or("REFRACT_RATE_LIMIT_ENABLED", "false")
                    .parse()
                    .unwrap_or(false),
                rate_limit_per_second: get_env_or("REFRACT_RATE_LIMIT_PER_SECOND", "50")
                    .parse()
                    .unwrap_or(50),
                rate_limit_burst: get_env_or("REFRACT_RATE_LIMIT_BURST", "100")
                    .parse()
                    .unwrap_or(100),
            },
            cache: CacheConfig {
                enabled: get_env_or("REFRACT_CACHE_ENABLED", "true")
                    .parse()
                    .unwrap_or(true),
                ttl: get_env_or("REFRACT_CACHE_TTL", "300").parse().unwrap_or(300),
                max_entries: get_env_or("REFRACT_CACHE_MAX_ENTRIES", "1024")
                    .parse()
                    .map_err(|_| {
                        RefractError::InvalidConfig(
                            "REFRACT_CACHE_MAX_ENTRIES must be a valid number".into(),
                        )
                    })?,
                max_asset_bytes: get_env_or("REFRACT_CACHE_MAX_ASSET_BYTES", "5242880")
                    .parse()
                    .map_err(|_| {
                        RefractError::InvalidConfig(
                            "REFRACT_CACHE_MAX_ASSET_BYTES must be a valid number".into(),
                        )
                    })?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

/// The endpoint path must be absolute and query-free so rewritten URLs
/// can be built by plain string concatenation.
fn validate_prefix(prefix: String) -> Result<String> {
    if !prefix.starts_with('/') || prefix.contains('?') || prefix.contains('#') {
        return Err(RefractError::InvalidConfig(
            "REFRACT_PATH_PREFIX must be an absolute path without query or fragment".into(),
        ));
    }
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RefractError::InvalidConfig(
            "REFRACT_PATH_PREFIX must not be the root path".into(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
