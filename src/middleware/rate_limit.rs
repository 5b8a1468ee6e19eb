//! Rate limiting middleware.
//!
//! Fixed-window counters per `(policy, key)`. Each route group gets its own
//! `QuotaEnforcer`; all of them share one injected `CounterStore`. Layers run
//! general first, then the route group, and the first exhausted policy is the
//! one reported.

use crate::auth::models::Identity;
use crate::middleware::client_ip;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);
const ONE_HOUR: Duration = Duration::from_secs(60 * 60);

/// How a policy picks the bucket a request is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    ClientIp,
    /// The authenticated user when known, otherwise the client address.
    IdentityOrIp,
}

/// Configuration for one limiter.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub window: Duration,
    /// Ceiling for anonymous callers (and everyone under `ClientIp`).
    pub max_requests: u32,
    /// Ceiling for authenticated callers under `IdentityOrIp`.
    pub authenticated_max: Option<u32>,
    pub key: KeyStrategy,
    pub message: &'static str,
}

impl RateLimitPolicy {
    /// All traffic.
    pub fn general() -> Self {
        Self {
            name: "general",
            window: FIFTEEN_MINUTES,
            max_requests: 100,
            authenticated_max: None,
            key: KeyStrategy::ClientIp,
            message: "Too many requests from this IP, please try again after 15 minutes",
        }
    }

    /// Login and admin bootstrap; tuned against credential stuffing.
    pub fn auth() -> Self {
        Self {
            name: "auth",
            window: FIFTEEN_MINUTES,
            max_requests: 5,
            authenticated_max: None,
            key: KeyStrategy::ClientIp,
            message: "Too many authentication attempts, please try again after 15 minutes",
        }
    }

    /// Account creation; tuned against account farming.
    pub fn registration() -> Self {
        Self {
            name: "registration",
            window: ONE_HOUR,
            max_requests: 3,
            authenticated_max: None,
            key: KeyStrategy::ClientIp,
            message: "Too many registration attempts, please try again after 1 hour",
        }
    }

    pub fn admin() -> Self {
        Self {
            name: "admin",
            window: ONE_HOUR,
            max_requests: 50,
            authenticated_max: None,
            key: KeyStrategy::ClientIp,
            message: "Too many admin requests, please try again after 1 hour",
        }
    }

    /// Generic API routes. Signed-in users get four times the anonymous ceiling.
    pub fn public_api() -> Self {
        Self {
            name: "public_api",
            window: FIFTEEN_MINUTES,
            max_requests: 50,
            authenticated_max: Some(200),
            key: KeyStrategy::IdentityOrIp,
            message: "Too many API requests, please try again after 15 minutes",
        }
    }

    pub fn limit_for(&self, key: &RateKey) -> u32 {
        match (key, self.authenticated_max) {
            (RateKey::User(_), Some(max)) => max,
            _ => self.max_requests,
        }
    }

    pub fn key_for(&self, identity: Option<&Identity>, ip: IpAddr) -> RateKey {
        match (self.key, identity) {
            (KeyStrategy::IdentityOrIp, Some(identity)) => RateKey::User(identity.id),
            _ => RateKey::Ip(ip),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateKey {
    Ip(IpAddr),
    User(Uuid),
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateKey::Ip(ip) => write!(f, "ip:{ip}"),
            RateKey::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Counter state after recording one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub reset_in: Duration,
}

/// Shared counter backend. `hit` must increment atomically per key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn hit(&self, policy: &'static str, key: &RateKey, window: Duration) -> WindowState;
    async fn cleanup(&self) -> usize;
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
    window: Duration,
}

/// Process-local counters. Exact within one process; a multi-process
/// deployment needs a shared backend behind the same trait.
#[derive(Default)]
pub struct InMemoryCounterStore {
    state: Mutex<HashMap<(&'static str, RateKey), WindowEntry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn hit_at(
        &self,
        policy: &'static str,
        key: &RateKey,
        window: Duration,
        now: Instant,
    ) -> WindowState {
        let mut state = self.state.lock();

        let entry = state.entry((policy, *key)).or_insert(WindowEntry {
            count: 0,
            window_start: now,
            window,
        });

        // Reset window if expired
        if now.duration_since(entry.window_start) >= entry.window {
            entry.count = 0;
            entry.window_start = now;
            entry.window = window;
        }

        entry.count = entry.count.saturating_add(1);

        WindowState {
            count: entry.count,
            reset_in: (entry.window_start + entry.window).saturating_duration_since(now),
        }
    }

    fn cleanup_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let before = state.len();
        state.retain(|_, entry| now.duration_since(entry.window_start) < entry.window);
        before - state.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn hit(&self, policy: &'static str, key: &RateKey, window: Duration) -> WindowState {
        self.hit_at(policy, key, window, Instant::now())
    }

    async fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }
}

/// Remaining budget after an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGrant {
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

#[derive(Debug, Error)]
#[error("rate limit '{policy}' exceeded for {key}")]
pub struct RateLimited {
    pub policy: &'static str,
    pub key: RateKey,
    pub message: &'static str,
    pub retry_after: Duration,
}

impl RateLimited {
    /// Whole seconds, rounded up, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.retry_after).max(1)
    }
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs();
        let body = serde_json::json!({
            "success": false,
            "error": "rate_limit_exceeded",
            "policy": self.policy,
            "message": self.message,
            "retryAfterSeconds": retry_after,
        });

        (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", retry_after.to_string())],
            Json(body),
        )
            .into_response()
    }
}

/// One limiter: a policy bound to the shared counter store.
#[derive(Clone)]
pub struct QuotaEnforcer {
    policy: Arc<RateLimitPolicy>,
    store: Arc<dyn CounterStore>,
}

impl QuotaEnforcer {
    pub fn new(policy: RateLimitPolicy, store: Arc<dyn CounterStore>) -> Self {
        Self {
            policy: Arc::new(policy),
            store,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one request against `key`. Request N+1 in a window whose
    /// ceiling is N is rejected.
    pub async fn check(&self, key: &RateKey) -> Result<QuotaGrant, RateLimited> {
        let limit = self.policy.limit_for(key);
        let window = self
            .store
            .hit(self.policy.name, key, self.policy.window)
            .await;

        if window.count > limit {
            return Err(RateLimited {
                policy: self.policy.name,
                key: *key,
                message: self.policy.message,
                retry_after: window.reset_in,
            });
        }

        Ok(QuotaGrant {
            limit,
            remaining: limit - window.count,
            reset_in: window.reset_in,
        })
    }
}

/// Rate limiting middleware function.
pub async fn enforce_quota(
    State(enforcer): State<QuotaEnforcer>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.extensions());
    let key = enforcer
        .policy
        .key_for(request.extensions().get::<Identity>(), ip);

    match enforcer.check(&key).await {
        Ok(grant) => {
            let mut response = next.run(request).await;
            apply_rate_limit_headers(&mut response, &grant);
            response
        }
        Err(limited) => {
            warn!(
                policy = limited.policy,
                key = %limited.key,
                retry_after_secs = limited.retry_after_secs(),
                "Rate limit exceeded"
            );
            limited.into_response()
        }
    }
}

/// `RateLimit-*` headers. The innermost limiter writes first and wins, so
/// the route-group budget is what the client sees.
fn apply_rate_limit_headers(response: &mut Response, grant: &QuotaGrant) {
    let headers = response.headers_mut();
    if headers.contains_key("ratelimit-limit") {
        return;
    }

    let values = [
        ("ratelimit-limit", grant.limit as u64),
        ("ratelimit-remaining", grant.remaining as u64),
        ("ratelimit-reset", ceil_secs(grant.reset_in)),
    ];
    for (name, value) in values {
        headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
    }
    debug!(limit = grant.limit, remaining = grant.remaining, "quota granted");
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// The limiters used by the router, all drawing on one counter store.
#[derive(Clone)]
pub struct Limiters {
    pub general: QuotaEnforcer,
    pub auth: QuotaEnforcer,
    pub registration: QuotaEnforcer,
    pub admin: QuotaEnforcer,
    pub public_api: QuotaEnforcer,
}

impl Limiters {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            general: QuotaEnforcer::new(RateLimitPolicy::general(), store.clone()),
            auth: QuotaEnforcer::new(RateLimitPolicy::auth(), store.clone()),
            registration: QuotaEnforcer::new(RateLimitPolicy::registration(), store.clone()),
            admin: QuotaEnforcer::new(RateLimitPolicy::admin(), store.clone()),
            public_api: QuotaEnforcer::new(RateLimitPolicy::public_api(), store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserRole;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn policy(max_requests: u32, window: Duration) -> RateLimitPolicy {
        RateLimitPolicy {
            name: "test",
            window,
            max_requests,
            authenticated_max: None,
            key: KeyStrategy::ClientIp,
            message: "slow down",
        }
    }

    #[test]
    fn test_counter_resets_at_window_boundary() {
        let store = InMemoryCounterStore::new();
        let key = RateKey::Ip(ip("127.0.0.1"));
        let window = Duration::from_secs(60);
        let start = Instant::now();

        for expected in 1..=3 {
            assert_eq!(store.hit_at("p", &key, window, start).count, expected);
        }

        let later = start + Duration::from_secs(59);
        let state = store.hit_at("p", &key, window, later);
        assert_eq!(state.count, 4);
        assert_eq!(state.reset_in, Duration::from_secs(1));

        let next_window = start + window;
        assert_eq!(store.hit_at("p", &key, window, next_window).count, 1);
    }

    #[test]
    fn test_policies_and_keys_are_independent() {
        let store = InMemoryCounterStore::new();
        let window = Duration::from_secs(60);
        let now = Instant::now();
        let a = RateKey::Ip(ip("10.0.0.1"));
        let b = RateKey::Ip(ip("10.0.0.2"));

        store.hit_at("general", &a, window, now);
        store.hit_at("general", &a, window, now);
        assert_eq!(store.hit_at("general", &b, window, now).count, 1);
        assert_eq!(store.hit_at("auth", &a, window, now).count, 1);
    }

    #[test]
    fn test_cleanup_drops_elapsed_windows() {
        let store = InMemoryCounterStore::new();
        let now = Instant::now();
        store.hit_at("short", &RateKey::Ip(ip("10.0.0.1")), Duration::from_secs(1), now);
        store.hit_at("long", &RateKey::Ip(ip("10.0.0.1")), Duration::from_secs(600), now);

        assert_eq!(store.cleanup_at(now + Duration::from_secs(2)), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sixth_request_rejected_then_window_elapses() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let enforcer = QuotaEnforcer::new(policy(5, Duration::from_millis(200)), store);
        let key = RateKey::Ip(ip("127.0.0.1"));

        for i in 0..5 {
            let grant = enforcer.check(&key).await.unwrap();
            assert_eq!(grant.remaining, 4 - i);
        }

        let limited = enforcer.check(&key).await.unwrap_err();
        assert_eq!(limited.policy, "test");
        assert!(limited.retry_after <= Duration::from_millis(200));
        assert_eq!(limited.retry_after_secs(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(enforcer.check(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_authenticated_callers_get_higher_ceiling() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let mut hybrid = RateLimitPolicy::public_api();
        hybrid.max_requests = 1;
        hybrid.authenticated_max = Some(3);
        let enforcer = QuotaEnforcer::new(hybrid, store);

        let addr = ip("198.51.100.4");
        let identity = Identity {
            id: Uuid::new_v4(),
            role: UserRole::User,
        };

        let anon = enforcer.policy().key_for(None, addr);
        let user = enforcer.policy().key_for(Some(&identity), addr);
        assert_eq!(anon, RateKey::Ip(addr));
        assert_eq!(user, RateKey::User(identity.id));

        assert!(enforcer.check(&anon).await.is_ok());
        assert!(enforcer.check(&anon).await.is_err());

        // Same address, tracked separately once signed in
        for _ in 0..3 {
            assert!(enforcer.check(&user).await.is_ok());
        }
        assert!(enforcer.check(&user).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_hits_are_not_lost() {
        let store = Arc::new(InMemoryCounterStore::new());
        let key = RateKey::Ip(ip("127.0.0.1"));
        let window = Duration::from_secs(60);

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.hit("concurrent", &key, window).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.hit("concurrent", &key, window).await.count, 51);
    }

    #[test]
    fn test_rate_limited_response() {
        let limited = RateLimited {
            policy: "auth",
            key: RateKey::Ip(ip("127.0.0.1")),
            message: "Too many authentication attempts",
            retry_after: Duration::from_millis(1500),
        };
        let response = limited.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "2");
    }
}
