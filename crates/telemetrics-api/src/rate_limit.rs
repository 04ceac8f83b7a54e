// Fixed-window rate limiting keyed by the client's remote IP.
//
// A single limiter instance is layered over both ingestion routes, so the
// two endpoints consume from one shared quota. The guard runs before body
// parsing and authentication: over-limit requests are rejected without
// touching storage.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;

/// Rate-limit policy in the `"<count>/<unit>"` notation, e.g. `60/minute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePolicy {
    pub count: u32,
    pub window: Duration,
}

impl FromStr for RatePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, unit) = s
            .split_once('/')
            .context("expected \"<count>/<unit>\", e.g. 60/minute")?;
        let count: u32 = count.trim().parse().context("invalid request count")?;
        if count == 0 {
            bail!("request count must be at least 1");
        }
        let window = match unit.trim() {
            "second" => Duration::from_secs(1),
            "minute" => Duration::from_secs(60),
            "hour" => Duration::from_secs(60 * 60),
            "day" => Duration::from_secs(24 * 60 * 60),
            other => bail!("unknown rate window {other:?}"),
        };
        Ok(Self { count, window })
    }
}

impl fmt::Display for RatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.window.as_secs() {
            1 => "second",
            60 => "minute",
            3600 => "hour",
            86400 => "day",
            _ => return write!(f, "{}/{}s", self.count, self.window.as_secs()),
        };
        write!(f, "{}/{}", self.count, unit)
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Per-client fixed-window counters. Check-and-increment happens under one
/// lock, so concurrent requests from the same client cannot over-consume.
pub struct RateLimiter {
    policy: RatePolicy,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one request from `key`'s quota. `Err` carries the time until
    /// the current window resets.
    pub fn check(&self, key: IpAddr) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: IpAddr, now: Instant) -> Result<(), Duration> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(key).or_insert(Window {
            started: now,
            hits: 0,
        });

        if now.duration_since(window.started) >= self.policy.window {
            window.started = now;
            window.hits = 0;
        }

        if window.hits >= self.policy.count {
            return Err(self
                .policy
                .window
                .saturating_sub(now.duration_since(window.started)));
        }

        window.hits += 1;
        Ok(())
    }
}

pub async fn rate_limit_guard(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    limiter
        .check(addr.ip())
        .map_err(|retry_after| ApiError::RateLimited { retry_after })?;
    Ok(next.run(request).await)
}
