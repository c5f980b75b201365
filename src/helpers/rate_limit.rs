use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AppError, ErrorCode};
use crate::helpers::auth::authenticate;
use crate::services::jwt::JwtManager;

const SKIP_PATHS: [&str; 2] = ["/health", "/metrics"];
/// Idle clients are swept, at most once per window, once the table grows past this.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the oldest request leaves the window.
    pub reset_at: u64,
}

struct ClientTable {
    clients: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

/// In-memory sliding window, one timestamp queue per client key.
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    sweep_threshold: usize,
    table: Mutex<ClientTable>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            sweep_threshold: SWEEP_THRESHOLD,
            table: Mutex::new(ClientTable {
                clients: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn with_sweep_threshold(mut self, sweep_threshold: usize) -> Self {
        self.sweep_threshold = sweep_threshold;
        self
    }

    pub fn tracked_clients(&self) -> usize {
        self.table.lock().clients.len()
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Records the request if the window has room. Rejected requests are not recorded.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut table = self.table.lock();
        // At most one sweep per window, however large the table gets.
        if table.clients.len() > self.sweep_threshold
            && now.duration_since(table.last_sweep) >= self.window
        {
            let window = self.window;
            table.clients.retain(|_, hits| {
                hits.back()
                    .map_or(false, |last| now.duration_since(*last) < window)
            });
            table.last_sweep = now;
            debug!(remaining = table.clients.len(), "Swept idle rate limit clients");
        }

        let hits = table.clients.entry(key.to_string()).or_default();
        while hits
            .front()
            .map_or(false, |first| now.duration_since(*first) >= self.window)
        {
            hits.pop_front();
        }

        let allowed = (hits.len() as u32) < self.limit;
        if allowed {
            hits.push_back(now);
        }
        let oldest = hits.front().copied().unwrap_or(now);
        let reset_in = self.window.saturating_sub(now.duration_since(oldest));

        RateDecision {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(hits.len() as u32),
            reset_at: unix_seconds_after(reset_in),
        }
    }
}

fn unix_seconds_after(delay: Duration) -> u64 {
    (SystemTime::now() + delay)
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_secs())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<SlidingWindowLimiter>,
    /// When present, authenticated callers are limited per user instead of per address.
    pub jwt: Option<Arc<JwtManager>>,
}

impl RateLimitState {
    pub fn new(limit_per_minute: u32, jwt: Option<Arc<JwtManager>>) -> Self {
        Self {
            limiter: Arc::new(SlidingWindowLimiter::per_minute(limit_per_minute)),
            jwt,
        }
    }
}

pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, jwt: Option<&JwtManager>) -> String {
    if let Some(user) = jwt.and_then(|jwt| authenticate(jwt, headers).ok()) {
        return format!("user:{}", user.user_id);
    }
    format!("ip:{}", client_ip(headers, peer))
}

/// First hop of `X-Forwarded-For`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit<B>(
    State(state): State<RateLimitState>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    if SKIP_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer, state.jwt.as_deref());
    let decision = state.limiter.check(&key);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(client = %key, "Rate limit exceeded");
        AppError::new(ErrorCode::RateLimitExceeded, "Rate limit exceeded").into_response()
    };

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use crate::services::jwt::TokenKind;
    use axum::http::header::AUTHORIZATION;
    use uuid::Uuid;

    #[test]
    fn window_fills_then_rejects() {
        let limiter = SlidingWindowLimiter::per_minute(2);
        let first = limiter.check("ip:1.2.3.4");
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert!(limiter.check("ip:1.2.3.4").allowed);

        let third = limiter.check("ip:1.2.3.4");
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert!(third.reset_at > 0);

        assert!(limiter.check("ip:5.6.7.8").allowed);
    }

    #[test]
    fn old_hits_slide_out() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.check("k").allowed);
        assert!(!limiter.check("k").allowed);
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("k").allowed);
    }

    #[test]
    fn idle_clients_are_swept_once_per_window() {
        let limiter =
            SlidingWindowLimiter::new(5, Duration::from_millis(50)).with_sweep_threshold(2);
        for key in ["a", "b", "c"] {
            limiter.check(key);
        }
        assert_eq!(limiter.tracked_clients(), 3);

        std::thread::sleep(Duration::from_millis(60));
        limiter.check("d");
        assert_eq!(limiter.tracked_clients(), 1);

        // Over the threshold again, but the last sweep is still inside the window.
        for key in ["e", "f", "g"] {
            limiter.check(key);
        }
        assert_eq!(limiter.tracked_clients(), 4);
    }

    #[test]
    fn keys_prefer_the_authenticated_user() {
        let jwt = JwtManager::new(
            &"k".repeat(32),
            time::Duration::minutes(15),
            time::Duration::hours(1),
        )
        .unwrap();
        let user_id = Uuid::new_v4();
        let token = jwt
            .generate(user_id, Uuid::new_v4(), Role::User, TokenKind::Access)
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        let peer: SocketAddr = "192.168.1.9:5000".parse().unwrap();
        assert_eq!(client_key(&headers, Some(peer), Some(&jwt)), "ip:10.0.0.1");
        assert_eq!(client_key(&HeaderMap::new(), Some(peer), None), "ip:192.168.1.9");

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        assert_eq!(
            client_key(&headers, Some(peer), Some(&jwt)),
            format!("user:{}", user_id)
        );
    }
}
