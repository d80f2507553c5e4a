//! Fixed-window request throttle, keyed by client address.
//!
//! Counters live either in-process or in Redis (shared between instances).
//! A failing counter store never blocks traffic: the request is let through
//! and the failure is logged.
//!
//! The client is the connecting peer. `X-Forwarded-For` is only read when
//! that peer is a configured trusted proxy.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::error::ApiError;

pub static RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

const WINDOW: Duration = Duration::from_secs(60);
const PRUNE_THRESHOLD: usize = 1024;
const REDIS_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis did not answer within {0:?}")]
    Timeout(Duration),
}

/// Requests seen in the current window and the time until it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub count: u64,
    pub resets_in: Duration,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Records one request for `key` and returns the window's tally.
    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, RateLimitError>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, RateLimitError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, entry| now.duration_since(entry.started) < window);
        }

        let entry = windows.entry(key.to_owned()).or_insert(Window { started: now, count: 0 });
        if now.duration_since(entry.started) >= window {
            *entry = Window { started: now, count: 0 };
        }
        entry.count += 1;

        Ok(Hit {
            count: entry.count,
            resets_in: window.saturating_sub(now.duration_since(entry.started)),
        })
    }
}

/// Counters in Redis, over one connection that is opened on first use and
/// reconnects on its own. Every hit is bounded by a timeout.
pub struct RedisRateLimitStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl RedisRateLimitStore {
    pub fn open(url: &str) -> Result<Self, RateLimitError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: OnceCell::new(),
            timeout: REDIS_TIMEOUT,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, RateLimitError> {
        let connection = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(connection.clone())
    }

    async fn count(&self, key: &str, window: Duration) -> Result<Hit, RateLimitError> {
        let mut conn = self.connection().await?;
        let key = format!("rate_limit:{key}");
        let seconds = window.as_secs().max(1);

        let count: u64 = conn.incr(&key, 1u64).await?;
        let mut ttl: i64 = redis::cmd("TTL").arg(&key).query_async(&mut conn).await?;
        // first hit of a window, or an expiry that never got set
        if count == 1 || ttl < 0 {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(seconds)
                .query_async::<_, ()>(&mut conn)
                .await?;
            ttl = seconds as i64;
        }

        Ok(Hit {
            count,
            resets_in: Duration::from_secs(ttl.max(0) as u64),
        })
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, RateLimitError> {
        tokio::time::timeout(self.timeout, self.count(key, window))
            .await
            .map_err(|_| RateLimitError::Timeout(self.timeout))?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub limit: u64,
    pub remaining: u64,
    /// Set when the request must be rejected.
    pub retry_after: Option<Duration>,
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    max_attempts: u64,
    window: Duration,
    trusted_proxies: Vec<IpAddr>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, max_attempts: u64, window: Duration) -> Self {
        Self {
            store,
            max_attempts,
            window,
            trusted_proxies: Vec::new(),
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = proxies;
        self
    }

    pub fn per_minute(max_attempts: u64) -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::new()), max_attempts, WINDOW)
    }

    /// Redis-backed when `REDIS_URL` is set, in-process otherwise.
    pub fn from_config(config: &AppConfig) -> Result<Self, RateLimitError> {
        let store: Arc<dyn RateLimitStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisRateLimitStore::open(url)?),
            None => Arc::new(InMemoryRateLimitStore::new()),
        };
        Ok(Self::new(store, config.rate_limit_per_minute, WINDOW)
            .with_trusted_proxies(config.trusted_proxies.clone()))
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    pub async fn check(&self, client: &str) -> Result<Decision, RateLimitError> {
        let hit = self.store.hit(client, self.window).await?;
        let exceeded = hit.count > self.max_attempts;
        Ok(Decision {
            limit: self.max_attempts,
            remaining: self.max_attempts.saturating_sub(hit.count),
            retry_after: exceeded.then_some(hit.resets_in),
        })
    }

    /// Client identity: the peer address. When the peer is a trusted proxy,
    /// `X-Forwarded-For` is walked from the nearest hop back and the first
    /// untrusted address wins.
    pub fn client_key(&self, request: &Request) -> String {
        let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>() else {
            return "unknown".to_owned();
        };

        let mut client = peer.ip();
        if self.trusted_proxies.contains(&client) {
            for hop in forwarded_for(request).into_iter().rev() {
                client = hop;
                if !self.trusted_proxies.contains(&hop) {
                    break;
                }
            }
        }
        client.to_string()
    }
}

fn forwarded_for(request: &Request) -> Vec<IpAddr> {
    request
        .headers()
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect()
}

pub async fn throttle(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = limiter.client_key(&request);
    let decision = match limiter.check(&client).await {
        Ok(decision) => decision,
        Err(error) => {
            tracing::warn!(%error, client = %client, "rate limiter unavailable, letting request through");
            return next.run(request).await;
        }
    };

    let mut response = match decision.retry_after {
        Some(retry_after) => {
            tracing::warn!(client = %client, "rate limit exceeded");
            // round up so clients never retry inside the closed window
            let retry_after = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            ApiError::TooManyRequests { retry_after }.into_response()
        }
        None => next.run(request).await,
    };

    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining));
    response
}
