/// Rate Limiting System
///
/// Two independent fixed windows: one global, one per caller key. Windows
/// reset lazily on the first request past their deadline; the periodic sweep
/// only drops idle per-caller entries to bound memory.
use crate::{config::RateLimitConfig, context::AppContext, error::AppError};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

impl Window {
    fn fresh(now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            count: 0,
            reset_at: now + length,
        }
    }

    fn reset_if_elapsed(&mut self, now: DateTime<Utc>, length: Duration) {
        if now >= self.reset_at {
            *self = Self::fresh(now, length);
        }
    }
}

struct LimiterState {
    global: Window,
    callers: HashMap<String, Window>,
}

/// Snapshot of both windows for response headers
#[derive(Debug, Clone, Copy)]
pub struct RateStatus {
    pub global_remaining: u32,
    pub global_reset_at: DateTime<Utc>,
    pub caller_remaining: u32,
    pub caller_reset_at: DateTime<Utc>,
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy)]
pub enum Decision {
    Allowed(RateStatus),
    Rejected {
        retry_after_secs: u64,
        status: RateStatus,
    },
}

/// Fixed-window rate limiter
pub struct FixedWindowLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let now = Utc::now();
        let length = Duration::seconds(config.window_secs as i64);
        Self {
            state: Mutex::new(LimiterState {
                global: Window::fresh(now, length),
                callers: HashMap::new(),
            }),
            config,
        }
    }

    fn window_length(&self) -> Duration {
        Duration::seconds(self.config.window_secs as i64)
    }

    /// Admit or reject one request for a caller key
    pub fn admit(&self, caller_key: &str) -> Decision {
        self.admit_at(caller_key, Utc::now())
    }

    /// Admission at an explicit instant; the global window is checked first
    /// so global exhaustion never charges the caller's budget, and both
    /// counters are incremented under the same lock acquisition.
    pub fn admit_at(&self, caller_key: &str, now: DateTime<Utc>) -> Decision {
        let length = self.window_length();
        let mut state = self.state.lock().unwrap();

        state.global.reset_if_elapsed(now, length);
        let global = state.global;

        if global.count >= self.config.global_limit {
            let caller = state
                .callers
                .get(caller_key)
                .copied()
                .unwrap_or_else(|| Window::fresh(now, length));
            return Decision::Rejected {
                retry_after_secs: retry_after(global.reset_at, now),
                status: self.status(global, caller, now),
            };
        }

        let caller = state
            .callers
            .entry(caller_key.to_string())
            .or_insert_with(|| Window::fresh(now, length));
        caller.reset_if_elapsed(now, length);

        if caller.count >= self.config.per_caller_limit {
            let caller = *caller;
            return Decision::Rejected {
                retry_after_secs: retry_after(caller.reset_at, now),
                status: self.status(global, caller, now),
            };
        }

        caller.count += 1;
        let caller = *caller;
        state.global.count += 1;
        let global = state.global;

        Decision::Allowed(self.status(global, caller, now))
    }

    fn status(&self, global: Window, caller: Window, now: DateTime<Utc>) -> RateStatus {
        // A window past its deadline reads as full budget
        let (global_count, global_reset_at) = if now >= global.reset_at {
            (0, now + self.window_length())
        } else {
            (global.count, global.reset_at)
        };
        let (caller_count, caller_reset_at) = if now >= caller.reset_at {
            (0, now + self.window_length())
        } else {
            (caller.count, caller.reset_at)
        };

        RateStatus {
            global_remaining: self.config.global_limit.saturating_sub(global_count),
            global_reset_at,
            caller_remaining: self.config.per_caller_limit.saturating_sub(caller_count),
            caller_reset_at,
        }
    }

    /// Drop per-caller windows that have already elapsed; cleanup only, since
    /// expired windows self-reset on next use
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let before = state.callers.len();
        state.callers.retain(|_, window| now < window.reset_at);
        before - state.callers.len()
    }

    pub fn tracked_callers(&self) -> usize {
        self.state.lock().unwrap().callers.len()
    }
}

fn retry_after(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (reset_at - now).num_seconds().max(1) as u64
}

/// Rate limiting middleware
///
/// Caller key: identity id when the bearer token is already cached, else the
/// peer address, else a fixed anonymous key.
pub async fn rate_limit_middleware(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    if !ctx.config.rate_limit.enabled {
        return next.run(request).await;
    }

    let caller_key = resolve_caller_key(&ctx, &request);

    match ctx.rate_limiter.admit(&caller_key) {
        Decision::Allowed(status) => {
            let mut response = next.run(request).await;
            stamp_headers(&mut response, status);
            response
        }
        Decision::Rejected {
            retry_after_secs,
            status,
        } => {
            crate::metrics::record_gate_rejection("rate_limit");
            let mut response = AppError::RateLimited { retry_after_secs }.into_response();
            stamp_headers(&mut response, status);
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
            response
        }
    }
}

fn resolve_caller_key(ctx: &AppContext, request: &Request) -> String {
    if let Some(token) = crate::gates::extract_bearer_token(request.headers()) {
        if let Some(identity) = ctx.session_cache.resolve(&token) {
            return identity.id;
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "anonymous".to_string()
}

fn stamp_headers(response: &mut Response, status: RateStatus) {
    let headers = response.headers_mut();
    let pairs = [
        ("x-ratelimit-remaining", status.caller_remaining.to_string()),
        (
            "x-ratelimit-reset",
            status.caller_reset_at.timestamp().to_string(),
        ),
        (
            "x-ratelimit-global-remaining",
            status.global_remaining.to_string(),
        ),
        (
            "x-ratelimit-global-reset",
            status.global_reset_at.timestamp().to_string(),
        ),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(global: u32, per_caller: u32, window_secs: u64) -> FixedWindowLimiter {
        FixedWindowLimiter::new(RateLimitConfig {
            enabled: true,
            window_secs,
            global_limit: global,
            per_caller_limit: per_caller,
        })
    }

    #[test]
    fn test_exactly_n_admits_per_window() {
        let limiter = limiter(100, 3, 60);
        let now = Utc::now();

        for _ in 0..3 {
            assert!(matches!(
                limiter.admit_at("caller-a", now),
                Decision::Allowed(_)
            ));
        }

        match limiter.admit_at("caller-a", now) {
            Decision::Rejected {
                retry_after_secs, ..
            } => assert!(retry_after_secs <= 60),
            Decision::Allowed(_) => panic!("4th request should be rejected"),
        }
    }

    #[test]
    fn test_window_elapse_resets_budget() {
        let limiter = limiter(100, 2, 60);
        let now = Utc::now();

        assert!(matches!(limiter.admit_at("a", now), Decision::Allowed(_)));
        assert!(matches!(limiter.admit_at("a", now), Decision::Allowed(_)));
        assert!(matches!(
            limiter.admit_at("a", now),
            Decision::Rejected { .. }
        ));

        let later = now + Duration::seconds(61);
        assert!(matches!(limiter.admit_at("a", later), Decision::Allowed(_)));
    }

    #[test]
    fn test_callers_have_independent_budgets() {
        let limiter = limiter(100, 1, 60);
        let now = Utc::now();

        assert!(matches!(limiter.admit_at("a", now), Decision::Allowed(_)));
        assert!(matches!(
            limiter.admit_at("a", now),
            Decision::Rejected { .. }
        ));
        assert!(matches!(limiter.admit_at("b", now), Decision::Allowed(_)));
    }

    #[test]
    fn test_global_exhaustion_does_not_charge_caller() {
        let limiter = limiter(1, 10, 60);
        let now = Utc::now();

        assert!(matches!(limiter.admit_at("a", now), Decision::Allowed(_)));
        // Global window now exhausted; rejection must not consume b's budget
        assert!(matches!(
            limiter.admit_at("b", now),
            Decision::Rejected { .. }
        ));

        let later = now + Duration::seconds(61);
        match limiter.admit_at("b", later) {
            Decision::Allowed(status) => {
                assert_eq!(status.caller_remaining, 9);
            }
            Decision::Rejected { .. } => panic!("fresh window should admit"),
        }
    }

    #[test]
    fn test_allowed_status_exposes_remaining() {
        let limiter = limiter(100, 5, 60);
        let now = Utc::now();

        match limiter.admit_at("a", now) {
            Decision::Allowed(status) => {
                assert_eq!(status.caller_remaining, 4);
                assert_eq!(status.global_remaining, 99);
                assert!(status.caller_reset_at > now);
            }
            Decision::Rejected { .. } => panic!("first request should be admitted"),
        }
    }

    #[test]
    fn test_sweep_drops_elapsed_windows() {
        let limiter = limiter(100, 5, 0);
        let past = Utc::now() - Duration::seconds(10);
        limiter.admit_at("a", past);
        limiter.admit_at("b", past);
        assert_eq!(limiter.tracked_callers(), 2);

        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.tracked_callers(), 0);
    }
}
