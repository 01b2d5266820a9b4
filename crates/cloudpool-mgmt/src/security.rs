use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::http::header::{HeaderName, HeaderValue};
use subtle::ConstantTimeEq;

/// Compare a presented token with the configured one without leaking the
/// position of the first mismatch.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

struct RateLimitEntry {
    failures: u32,
    first_failure: Instant,
    locked_until: Option<Instant>,
}

/// Per-client lockout after repeated authentication failures.
pub struct AuthRateLimiter {
    max_failures: u32,
    window: Duration,
    lockout: Duration,
    inner: Mutex<HashMap<String, RateLimitEntry>>,
}

impl AuthRateLimiter {
    /// Five failures within a minute lock the client out for a minute.
    pub fn new() -> Self {
        Self::with_limits(5, Duration::from_secs(60), Duration::from_secs(60))
    }

    pub fn with_limits(max_failures: u32, window: Duration, lockout: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            window,
            lockout,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Count a failure for `client`. Returns true when the client is now
    /// locked out.
    pub fn record_failure(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        let entry = inner.entry(client.to_string()).or_insert(RateLimitEntry {
            failures: 0,
            first_failure: now,
            locked_until: None,
        });
        if now.duration_since(entry.first_failure) > self.window {
            entry.failures = 0;
            entry.first_failure = now;
        }
        entry.failures += 1;
        if entry.failures >= self.max_failures {
            entry.locked_until = Some(now + self.lockout);
        }
        entry.locked_until.is_some_and(|until| until > now)
    }

    /// Forget earlier failures after a successful authentication.
    pub fn record_success(&self, client: &str) {
        self.lock().remove(client);
    }

    pub fn is_rate_limited(&self, client: &str) -> bool {
        self.lock()
            .get(client)
            .and_then(|entry| entry.locked_until)
            .is_some_and(|until| until > Instant::now())
    }

    /// Drop entries whose window and lockout have both expired.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        self.lock().retain(|_, entry| {
            let locked = entry.locked_until.is_some_and(|until| until > now);
            locked || now.duration_since(entry.first_failure) <= window
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateLimitEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
    ("cache-control", "no-store"),
];

pub async fn security_headers_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_only_identical_tokens() {
        assert!(constant_time_eq("s3cret", "s3cret"));
        assert!(!constant_time_eq("s3cret", "s3creT"));
        assert!(!constant_time_eq("s3cret", "s3cret-longer"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn rate_limiter_locks_after_max_failures() {
        let limiter = AuthRateLimiter::new();
        for _ in 0..4 {
            assert!(!limiter.record_failure("10.0.0.1"));
        }
        assert!(limiter.record_failure("10.0.0.1"));
        assert!(limiter.is_rate_limited("10.0.0.1"));
        assert!(!limiter.is_rate_limited("10.0.0.2"));
    }

    #[test]
    fn rate_limiter_success_clears_failures() {
        let limiter = AuthRateLimiter::new();
        for _ in 0..4 {
            limiter.record_failure("10.0.0.1");
        }
        limiter.record_success("10.0.0.1");
        assert!(!limiter.record_failure("10.0.0.1"));
    }

    #[test]
    fn rate_limiter_window_expiry_resets_count() {
        let limiter =
            AuthRateLimiter::with_limits(2, Duration::from_millis(10), Duration::from_secs(60));
        assert!(!limiter.record_failure("10.0.0.1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!limiter.record_failure("10.0.0.1"));
        assert!(limiter.record_failure("10.0.0.1"));
    }

    #[test]
    fn rate_limiter_lockout_expires() {
        let limiter =
            AuthRateLimiter::with_limits(1, Duration::from_secs(60), Duration::from_millis(10));
        assert!(limiter.record_failure("10.0.0.1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!limiter.is_rate_limited("10.0.0.1"));
    }

    #[test]
    fn rate_limiter_prune_keeps_locked_clients() {
        let limiter =
            AuthRateLimiter::with_limits(1, Duration::from_millis(1), Duration::from_secs(60));
        limiter.record_failure("locked");
        std::thread::sleep(Duration::from_millis(5));
        limiter.prune();
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.is_rate_limited("locked"));
    }
}
