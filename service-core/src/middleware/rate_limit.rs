//! Rate limit response headers shared by every service.
//!
//! Denied requests carry `Retry-After` plus the `X-RateLimit-*` family;
//! allowed requests carry the `X-RateLimit-*` family so clients can
//! throttle themselves before they are rejected.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use serde::Serialize;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the window admits a new request.
    pub reset_at: i64,
    /// Seconds to wait before retrying; only set on denial.
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_at));
        if let Some(retry) = self.retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry));
        }
    }
}
