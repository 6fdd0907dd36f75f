//! Per-client rate limiting
//!
//! Uses the governor crate for efficient, lock-free rate limiting. Disabled
//! by default; it exists as the deployment guard against clients that drive
//! the retry contract in a loop.

use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovRateLimiter};
use tracing::warn;

use crate::config::ProxyConfig;
use crate::error::{RefractError, Result};

type ClientLimiter = Arc<GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Rate limiter for proxy requests, keyed by client IP
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    limiters: Arc<DashMap<String, ClientLimiter>>,
    requests_per_second: NonZeroU32,
    burst_size: NonZeroU32,
}

impl RateLimiter {
    pub fn new(enabled: bool, requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            enabled,
            limiters: Arc::new(DashMap::new()),
            requests_per_second: NonZeroU32::new(requests_per_second.max(1))
                .expect("clamped above zero"),
            burst_size: NonZeroU32::new(burst_size.max(1)).expect("clamped above zero"),
        }
    }

    /// Create a disabled rate limiter
    pub fn disabled() -> Self {
        Self::new(false, 1, 1)
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        if config.rate_limit_enabled {
            Self::new(true, config.rate_limit_per_second, config.rate_limit_burst)
        } else {
            Self::disabled()
        }
    }

    /// Check whether this client may proceed
    pub fn check(&self, client_ip: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let limiter = self
            .limiters
            .entry(client_ip.to_string())
            .or_insert_with(|| {
                Arc::new(GovRateLimiter::direct(
                    Quota::per_second(self.requests_per_second).allow_burst(self.burst_size),
                ))
            })
            .clone();

        limiter.check().map_err(|_| {
            warn!(client_ip, "Rate limit exceeded");
            RefractError::RateLimitExceeded {
                client_ip: client_ip.to_string(),
            }
        })
    }
}
