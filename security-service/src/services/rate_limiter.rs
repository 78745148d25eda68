//! Sliding-window request limiting backed by the shared store.
//!
//! Each allowed request leaves one record behind; a request is admitted while
//! fewer than `max_requests` records for `(identifier, endpoint)` fall inside
//! the trailing window. Store outages admit the request.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use service_core::middleware::rate_limit::RateLimitHeaders;

use super::error::ServiceError;
use crate::clock::Clock;
use crate::models::RateLimitRecord;
use crate::store::RateLimitStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitTier {
    Api,
    Strict,
    Lead,
    Auth,
    Otp,
    PasswordReset,
}

impl RateLimitTier {
    pub const ALL: [RateLimitTier; 6] = [
        RateLimitTier::Api,
        RateLimitTier::Strict,
        RateLimitTier::Lead,
        RateLimitTier::Auth,
        RateLimitTier::Otp,
        RateLimitTier::PasswordReset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitTier::Api => "api",
            RateLimitTier::Strict => "strict",
            RateLimitTier::Lead => "lead",
            RateLimitTier::Auth => "auth",
            RateLimitTier::Otp => "otp",
            RateLimitTier::PasswordReset => "password_reset",
        }
    }

    /// Upper-case form used in `RATE_LIMIT_<TIER>_*` variables.
    pub fn env_key(&self) -> &'static str {
        match self {
            RateLimitTier::Api => "API",
            RateLimitTier::Strict => "STRICT",
            RateLimitTier::Lead => "LEAD",
            RateLimitTier::Auth => "AUTH",
            RateLimitTier::Otp => "OTP",
            RateLimitTier::PasswordReset => "PASSWORD_RESET",
        }
    }

    pub fn default_policy(&self) -> RateLimitPolicy {
        match self {
            RateLimitTier::Api => RateLimitPolicy::new(100, Duration::seconds(60)),
            RateLimitTier::Strict => RateLimitPolicy::new(20, Duration::seconds(60)),
            RateLimitTier::Lead => RateLimitPolicy::new(10, Duration::hours(1)),
            RateLimitTier::Auth => RateLimitPolicy::new(5, Duration::minutes(15)),
            RateLimitTier::Otp => RateLimitPolicy::new(3, Duration::minutes(15)),
            RateLimitTier::PasswordReset => RateLimitPolicy::new(3, Duration::hours(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Per-tier policies, each tunable independently.
#[derive(Debug, Clone)]
pub struct RateLimitTiers {
    pub api: RateLimitPolicy,
    pub strict: RateLimitPolicy,
    pub lead: RateLimitPolicy,
    pub auth: RateLimitPolicy,
    pub otp: RateLimitPolicy,
    pub password_reset: RateLimitPolicy,
}

impl Default for RateLimitTiers {
    fn default() -> Self {
        Self {
            api: RateLimitTier::Api.default_policy(),
            strict: RateLimitTier::Strict.default_policy(),
            lead: RateLimitTier::Lead.default_policy(),
            auth: RateLimitTier::Auth.default_policy(),
            otp: RateLimitTier::Otp.default_policy(),
            password_reset: RateLimitTier::PasswordReset.default_policy(),
        }
    }
}

impl RateLimitTiers {
    pub fn get(&self, tier: RateLimitTier) -> RateLimitPolicy {
        match tier {
            RateLimitTier::Api => self.api,
            RateLimitTier::Strict => self.strict,
            RateLimitTier::Lead => self.lead,
            RateLimitTier::Auth => self.auth,
            RateLimitTier::Otp => self.otp,
            RateLimitTier::PasswordReset => self.password_reset,
        }
    }

    pub fn set(&mut self, tier: RateLimitTier, policy: RateLimitPolicy) {
        let slot = match tier {
            RateLimitTier::Api => &mut self.api,
            RateLimitTier::Strict => &mut self.strict,
            RateLimitTier::Lead => &mut self.lead,
            RateLimitTier::Auth => &mut self.auth,
            RateLimitTier::Otp => &mut self.otp,
            RateLimitTier::PasswordReset => &mut self.password_reset,
        };
        *slot = policy;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until the window admits another request; set on denial.
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    pub fn headers(&self) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: self.limit,
            remaining: self.remaining,
            reset_at: self.reset_at.timestamp(),
            retry_after: self.retry_after,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    tiers: RateLimitTiers,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>, tiers: RateLimitTiers) -> Self {
        Self {
            store,
            clock,
            tiers,
        }
    }

    pub fn tiers(&self) -> &RateLimitTiers {
        &self.tiers
    }

    pub async fn check_tier(
        &self,
        identifier: &str,
        endpoint: &str,
        tier: RateLimitTier,
    ) -> RateLimitDecision {
        self.check_rate_limit(identifier, endpoint, self.tiers.get(tier))
            .await
    }

    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        endpoint: &str,
        policy: RateLimitPolicy,
    ) -> RateLimitDecision {
        let now = self.clock.now();
        let since = now - policy.window;

        let stats = match self.store.window_stats(identifier, endpoint, since).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    identifier,
                    endpoint,
                    "Rate limit store unavailable, allowing request"
                );
                return RateLimitDecision {
                    allowed: true,
                    limit: policy.max_requests,
                    remaining: policy.max_requests,
                    reset_at: now + policy.window,
                    retry_after: None,
                };
            }
        };

        let reset_at = stats.oldest.unwrap_or(now) + policy.window;

        if stats.count >= u64::from(policy.max_requests) {
            let wait_ms = (reset_at - now).num_milliseconds().max(0) as u64;
            let retry_after = wait_ms.div_ceil(1000).max(1);
            metrics::counter!("security_rate_limit_denials_total").increment(1);
            tracing::info!(identifier, endpoint, retry_after, "Rate limit exceeded");
            return RateLimitDecision {
                allowed: false,
                limit: policy.max_requests,
                remaining: 0,
                reset_at,
                retry_after: Some(retry_after),
            };
        }

        let record = RateLimitRecord {
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
            timestamp: now,
        };
        if let Err(e) = self.store.insert_request(&record).await {
            tracing::warn!(error = %e, identifier, endpoint, "Failed to record request");
        }

        let used = u32::try_from(stats.count).unwrap_or(u32::MAX);
        RateLimitDecision {
            allowed: true,
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(used).saturating_sub(1),
            reset_at,
            retry_after: None,
        }
    }

    /// Delete records older than `retention`. Returns the number removed.
    pub async fn sweep(&self, retention: Duration) -> Result<u64, ServiceError> {
        let cutoff = self.clock.now() - retention;
        let removed = self.store.delete_before(cutoff).await?;
        tracing::debug!(removed, %cutoff, "Swept rate limit records");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn limiter() -> (Arc<MemoryStore>, Arc<ManualClock>, RateLimiter) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(store.clone(), clock.clone(), RateLimitTiers::default());
        (store, clock, limiter)
    }

    fn three_per_minute() -> RateLimitPolicy {
        RateLimitPolicy::new(3, Duration::seconds(60))
    }

    #[tokio::test]
    async fn counts_down_then_denies() {
        let (_, clock, limiter) = limiter();
        for expected in [2, 1, 0] {
            let d = limiter
                .check_rate_limit("ip:1.2.3.4", "/api/leads", three_per_minute())
                .await;
            assert!(d.allowed);
            assert_eq!(d.remaining, expected);
            clock.advance(Duration::seconds(1));
        }

        let denied = limiter
            .check_rate_limit("ip:1.2.3.4", "/api/leads", three_per_minute())
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        // oldest record is 3s old, so the window frees up in 57s
        assert_eq!(denied.retry_after, Some(57));
    }

    #[tokio::test]
    async fn window_slides_past_the_oldest_request() {
        let (_, clock, limiter) = limiter();
        let start = clock.now();
        for _ in 0..3 {
            limiter.check_rate_limit("u", "/e", three_per_minute()).await;
        }
        assert!(!limiter.check_rate_limit("u", "/e", three_per_minute()).await.allowed);

        clock.set(start + Duration::seconds(60));
        let d = limiter.check_rate_limit("u", "/e", three_per_minute()).await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 2);
    }

    #[tokio::test]
    async fn denials_are_not_recorded() {
        let (store, _, limiter) = limiter();
        for _ in 0..6 {
            limiter.check_rate_limit("u", "/e", three_per_minute()).await;
        }
        assert_eq!(store.rate_limit_record_count(), 3);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let (_, _, limiter) = limiter();
        for _ in 0..3 {
            limiter.check_rate_limit("a", "/e", three_per_minute()).await;
        }
        assert!(limiter.check_rate_limit("b", "/e", three_per_minute()).await.allowed);
        assert!(limiter.check_rate_limit("a", "/other", three_per_minute()).await.allowed);
    }

    #[tokio::test]
    async fn outage_fails_open() {
        let (store, _, limiter) = limiter();
        store.set_available(false);
        for _ in 0..10 {
            let d = limiter.check_rate_limit("u", "/e", three_per_minute()).await;
            assert!(d.allowed);
            assert_eq!(d.retry_after, None);
        }
    }

    #[tokio::test]
    async fn sweep_drops_old_records_only() {
        let (store, clock, limiter) = limiter();
        limiter.check_tier("u", "/e", RateLimitTier::Api).await;
        clock.advance(Duration::hours(25));
        limiter.check_tier("u", "/e", RateLimitTier::Api).await;

        let removed = limiter.sweep(Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.rate_limit_record_count(), 1);
    }

    #[test]
    fn decision_headers_carry_retry_after_only_on_denial() {
        let reset_at = Utc::now();
        let allowed = RateLimitDecision {
            allowed: true,
            limit: 5,
            remaining: 4,
            reset_at,
            retry_after: None,
        };
        let headers = allowed.headers();
        assert_eq!(headers.reset_at, reset_at.timestamp());
        assert_eq!(headers.retry_after, None);
    }

    #[test]
    fn default_tiers() {
        let tiers = RateLimitTiers::default();
        assert_eq!(tiers.get(RateLimitTier::Otp), RateLimitPolicy::new(3, Duration::minutes(15)));
        assert_eq!(tiers.get(RateLimitTier::Lead).max_requests, 10);
    }
}
