// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Per-client rate limiting
//!
//! One token bucket per client identifier. A bucket holds at most `capacity`
//! tokens and refills continuously at `capacity / window` tokens per second.
//! Each request takes one token; a request finding less than one token is
//! denied with the number of whole seconds until a token is available.
//!
//! Buckets are created on first sight of a client. A bucket untouched for
//! more than two windows and back at full capacity carries no information
//! and is dropped. The sweep runs inline, at most once per window.
//!
//! Clients are keyed by peer address. `X-Forwarded-For` is only read when
//! the peer is a configured trusted proxy.
//!
//! Health and documentation paths never consult the limiter.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Paths that bypass the limiter, together with everything below them.
pub const BYPASS_PATHS: &[&str] = &["/health", "/docs", "/api-doc"];

/// Client identifier used when no address can be determined.
const ANONYMOUS_CLIENT: &str = "anonymous";

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window (bucket size).
    pub capacity: u32,
    pub window: Duration,
    /// Peers whose `X-Forwarded-For` header is believed.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            window: Duration::from_secs(60),
            trusted_proxies: Vec::new(),
        }
    }
}

/// Outcome of [`RateLimiter::allow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

/// Token bucket of one client.
#[derive(Debug, Clone)]
pub struct RateLimitBucket {
    /// Always within `[0, capacity]`.
    pub tokens: f64,
    pub last_refill_at: Instant,
}

impl RateLimitBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill_at: now,
        }
    }

    /// Tokens the bucket would hold at `now`, without mutating it.
    fn tokens_at(&self, now: Instant, capacity: f64, rate: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill_at).as_secs_f64();
        (self.tokens + elapsed * rate).min(capacity)
    }

    fn refill(&mut self, now: Instant, capacity: f64, rate: f64) {
        self.tokens = self.tokens_at(now, capacity, rate);
        self.last_refill_at = now;
    }
}

struct Buckets {
    by_client: HashMap<String, RateLimitBucket>,
    last_sweep: Instant,
}

pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    clock: Arc<dyn Clock>,
    capacity: f64,
    window: Duration,
    trusted_proxies: Vec<IpAddr>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            buckets: Mutex::new(Buckets {
                by_client: HashMap::new(),
                last_sweep: now,
            }),
            clock,
            capacity: f64::from(config.capacity.max(1)),
            window: config.window.max(Duration::from_millis(1)),
            trusted_proxies: config.trusted_proxies,
        }
    }

    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    /// Tokens added per second.
    fn refill_rate(&self) -> f64 {
        self.capacity / self.window.as_secs_f64()
    }

    fn lock(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take one token for `client_id` if available.
    pub fn allow(&self, client_id: &str) -> RateDecision {
        let now = self.clock.now();
        let rate = self.refill_rate();
        let mut buckets = self.lock();

        if now.saturating_duration_since(buckets.last_sweep) >= self.window {
            self.sweep(&mut buckets, now);
        }

        let bucket = buckets
            .by_client
            .entry(client_id.to_string())
            .or_insert_with(|| RateLimitBucket::full(self.capacity, now));
        bucket.refill(now, self.capacity, rate);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allowed
        } else {
            let wait = ((1.0 - bucket.tokens) / rate).ceil().max(1.0);
            RateDecision::Denied {
                retry_after_secs: wait as u64,
            }
        }
    }

    /// Alias of [`RateLimiter::allow`] used by the request pipeline.
    pub fn check_rate_limit(&self, client_id: &str) -> RateDecision {
        self.allow(client_id)
    }

    /// Current tokens of a client's bucket, if it exists.
    pub fn tokens(&self, client_id: &str) -> Option<f64> {
        let now = self.clock.now();
        let rate = self.refill_rate();
        self.lock()
            .by_client
            .get(client_id)
            .map(|bucket| bucket.tokens_at(now, self.capacity, rate))
    }

    pub fn bucket_count(&self) -> usize {
        self.lock().by_client.len()
    }

    fn sweep(&self, buckets: &mut Buckets, now: Instant) {
        let idle_after = self.window * 2;
        let rate = self.refill_rate();
        let before = buckets.by_client.len();
        buckets.by_client.retain(|_, bucket| {
            let idle = now.saturating_duration_since(bucket.last_refill_at) > idle_after;
            !(idle && bucket.tokens_at(now, self.capacity, rate) >= self.capacity)
        });
        buckets.last_sweep = now;

        let removed = before - buckets.by_client.len();
        if removed > 0 {
            debug!(removed, "Dropped idle rate limit buckets");
        }
    }
}

/// 429 response with a `Retry-After` header.
#[derive(Debug)]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

#[derive(Serialize)]
struct RateLimitedBody {
    error: &'static str,
    retry_after: u64,
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let body = Json(RateLimitedBody {
            error: "Too many requests",
            retry_after: self.retry_after_secs,
        });
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(RETRY_AFTER, HeaderValue::from(self.retry_after_secs))],
            body,
        )
            .into_response()
    }
}

/// Client identifier of a request.
///
/// The peer address, unless the peer is a trusted proxy: then the nearest
/// untrusted hop of `X-Forwarded-For`, read from the right.
pub fn client_id(request: &Request, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
    else {
        return ANONYMOUS_CLIENT.to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let hops: Vec<&str> = request
        .headers()
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();

    let mut client = peer;
    for hop in hops.iter().rev() {
        let Ok(ip) = hop.parse::<IpAddr>() else {
            // Whatever sits left of a malformed hop is unverifiable.
            break;
        };
        client = ip;
        if !trusted_proxies.contains(&ip) {
            break;
        }
    }
    client.to_string()
}

fn is_bypassed(path: &str) -> bool {
    BYPASS_PATHS.iter().any(|prefix| {
        path.strip_prefix(*prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// Middleware enforcing the limiter before any handler runs.
pub async fn enforce_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if is_bypassed(request.uri().path()) {
        return next.run(request).await;
    }

    let client = client_id(&request, limiter.trusted_proxies());
    match limiter.check_rate_limit(&client) {
        RateDecision::Allowed => next.run(request).await,
        RateDecision::Denied { retry_after_secs } => {
            debug!(client = %client, retry_after_secs, "Rate limit exceeded");
            RateLimited { retry_after_secs }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    const PROXY: [u8; 4] = [10, 0, 0, 1];

    fn limiter(capacity: u32, window_secs: u64) -> (RateLimiter, MockClock) {
        let clock = MockClock::default();
        let limiter = RateLimiter::with_clock(
            RateLimitConfig {
                capacity,
                window: Duration::from_secs(window_secs),
                trusted_proxies: vec![IpAddr::from(PROXY)],
            },
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[test]
    fn sixth_call_in_a_second_is_denied() {
        let (limiter, clock) = limiter(5, 60);
        for _ in 0..5 {
            assert_eq!(limiter.allow("10.0.0.1"), RateDecision::Allowed);
            clock.advance(Duration::from_millis(100));
        }

        match limiter.allow("10.0.0.1") {
            RateDecision::Denied { retry_after_secs } => assert!(retry_after_secs > 0),
            RateDecision::Allowed => panic!("sixth call should be denied"),
        }
        // Other clients have their own bucket.
        assert_eq!(limiter.allow("10.0.0.2"), RateDecision::Allowed);
    }

    #[test]
    fn retry_after_matches_refill_rate() {
        let (limiter, _clock) = limiter(5, 60);
        for _ in 0..5 {
            limiter.allow("c");
        }
        // One token takes 60 / 5 = 12 seconds.
        assert_eq!(
            limiter.allow("c"),
            RateDecision::Denied {
                retry_after_secs: 12
            }
        );
    }

    #[test]
    fn refill_is_continuous_and_capped() {
        let (limiter, clock) = limiter(10, 10);
        for _ in 0..10 {
            limiter.allow("c");
        }
        assert!(limiter.tokens("c").unwrap() < 1.0);

        clock.advance(Duration::from_millis(2500));
        let tokens = limiter.tokens("c").unwrap();
        assert!((tokens - 2.5).abs() < 1e-9);

        clock.advance(Duration::from_secs(3600));
        assert!((limiter.tokens("c").unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn tokens_stay_within_bounds() {
        let (limiter, clock) = limiter(3, 3);
        for step in 0..50u64 {
            limiter.allow("c");
            clock.advance(Duration::from_millis(step * 37 % 1500));
            let tokens = limiter.tokens("c").unwrap();
            assert!((0.0..=3.0).contains(&tokens), "tokens out of range: {tokens}");
        }
    }

    #[test]
    fn idle_full_buckets_are_dropped() {
        let (limiter, clock) = limiter(5, 60);
        limiter.allow("idle");
        clock.advance(Duration::from_secs(121));
        limiter.allow("active");
        assert_eq!(limiter.bucket_count(), 1);
        assert!(limiter.tokens("idle").is_none());
    }

    #[test]
    fn recently_used_buckets_survive_sweep() {
        let (limiter, clock) = limiter(5, 60);
        limiter.allow("a");
        clock.advance(Duration::from_secs(61));
        limiter.allow("b");
        assert_eq!(limiter.bucket_count(), 2);
    }

    fn app(limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route("/v1/ping", get(|| async { "pong" }))
            .route("/health", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(limiter, enforce_rate_limit))
    }

    fn from_peer(path: &str, peer: [u8; 4], forwarded: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(path);
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        request
    }

    fn request(path: &str) -> Request {
        from_peer(path, [198, 51, 100, 1], None)
    }

    #[tokio::test]
    async fn middleware_returns_429_with_retry_after() {
        let (limiter, _clock) = limiter(5, 60);
        let app = app(Arc::new(limiter));

        for _ in 0..5 {
            let response = app.clone().oneshot(request("/v1/ping")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request("/v1/ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "12");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["retry_after"], 12);
    }

    #[tokio::test]
    async fn health_bypasses_limiter() {
        let (limiter, _clock) = limiter(1, 60);
        let limiter = Arc::new(limiter);
        let app = app(Arc::clone(&limiter));

        for _ in 0..3 {
            let response = app.clone().oneshot(request("/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn client_id_is_the_peer_address() {
        let trusted = [IpAddr::from(PROXY)];

        let bare = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_id(&bare, &trusted), ANONYMOUS_CLIENT);

        let direct = from_peer("/", [192, 0, 2, 1], Some("203.0.113.7"));
        assert_eq!(client_id(&direct, &trusted), "192.0.2.1");
    }

    #[test]
    fn client_id_reads_forwarded_chain_behind_trusted_proxy() {
        let trusted = [IpAddr::from(PROXY), IpAddr::from([10, 0, 0, 2])];

        let proxied = from_peer("/", PROXY, Some("203.0.113.7"));
        assert_eq!(client_id(&proxied, &trusted), "203.0.113.7");

        // The client prepended a fake hop; the proxy appended the real one.
        let spoofed = from_peer("/", PROXY, Some("1.2.3.4, 203.0.113.7, 10.0.0.2"));
        assert_eq!(client_id(&spoofed, &trusted), "203.0.113.7");

        let malformed = from_peer("/", PROXY, Some("203.0.113.7, not-an-ip"));
        assert_eq!(client_id(&malformed, &trusted), "10.0.0.1");

        let no_header = from_peer("/", PROXY, None);
        assert_eq!(client_id(&no_header, &trusted), "10.0.0.1");
    }

    #[tokio::test]
    async fn rotating_forwarded_header_does_not_escape_the_limit() {
        let (limiter, _clock) = limiter(5, 60);
        let limiter = Arc::new(limiter);
        let app = app(Arc::clone(&limiter));

        let mut allowed = 0;
        for i in 0..20 {
            let forwarded = format!("203.0.113.{i}");
            let response = app
                .clone()
                .oneshot(from_peer("/v1/ping", [198, 51, 100, 1], Some(&forwarded)))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn bypass_matches_whole_path_segments() {
        assert!(is_bypassed("/health"));
        assert!(is_bypassed("/health/ready"));
        assert!(is_bypassed("/docs/"));
        assert!(is_bypassed("/api-doc/openapi.json"));
        assert!(!is_bypassed("/healthz"));
        assert!(!is_bypassed("/docsX"));
        assert!(!is_bypassed("/v1/health"));
    }

    #[test]
    fn idle_refill_never_exceeds_capacity_or_rate() {
        let (limiter, clock) = limiter(10, 20);
        let rate = 0.5;
        for _ in 0..7 {
            limiter.allow("c");
        }

        for idle_ms in [0u64, 400, 1_000, 3_300, 9_000, 60_000] {
            let before = limiter.tokens("c").unwrap();
            clock.advance(Duration::from_millis(idle_ms));
            let ceiling = (before + rate * idle_ms as f64 / 1000.0).min(10.0);

            assert_eq!(limiter.allow("c"), RateDecision::Allowed);
            let after = limiter.tokens("c").unwrap();
            assert!(after >= 0.0);
            assert!((after - (ceiling - 1.0)).abs() < 1e-9, "after {idle_ms}ms: {after} vs {ceiling}");
        }
    }
}
