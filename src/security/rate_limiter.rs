use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use super::error_sanitizer::SafeErrorResponse;
use crate::config::AnalysisConfig;

pub type GlobalRateLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug, Clone)]
pub struct HttpRateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for HttpRateLimitConfig {
    fn default() -> Self {
        Self::from_analysis(&AnalysisConfig::default())
    }
}

impl HttpRateLimitConfig {
    pub fn from_analysis(config: &AnalysisConfig) -> Self {
        Self {
            requests_per_second: config.requests_per_second,
            burst_size: config.burst,
        }
    }
}

/// Limiter guarding the analysis route, which fans out to paid provider calls.
#[derive(Clone)]
pub struct AnalysisRateLimiter {
    limiter: Arc<GlobalRateLimiter>,
}

impl std::fmt::Debug for AnalysisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisRateLimiter").finish_non_exhaustive()
    }
}

impl AnalysisRateLimiter {
    pub fn new(config: &HttpRateLimitConfig) -> Self {
        const DEFAULT_RPS: NonZeroU32 = match NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(DEFAULT_RPS);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(rps);
        let quota = Quota::per_second(rps).allow_burst(burst);

        Self {
            limiter: Arc::new(GovernorRateLimiter::direct(quota)),
        }
    }

    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<AnalysisRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.check() {
        warn!("Rate limit exceeded for {}", request.uri().path());
        let mut response = SafeErrorResponse::rate_limited().into_response();
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from(RETRY_AFTER_SECS));
        return response;
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_analysis() {
        let config = HttpRateLimitConfig::default();
        assert_eq!(config.requests_per_second, 10);
        assert_eq!(config.burst_size, 20);
    }

    #[test]
    fn test_burst_is_enforced() {
        let limiter = AnalysisRateLimiter::new(&HttpRateLimitConfig {
            requests_per_second: 1,
            burst_size: 2,
        });
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn test_zero_values_fall_back() {
        let limiter = AnalysisRateLimiter::new(&HttpRateLimitConfig {
            requests_per_second: 0,
            burst_size: 0,
        });
        assert!(limiter.check());
    }
}
