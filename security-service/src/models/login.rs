//! Failed-login tracking and login attempt history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-email failure counter. `locked_until` is only set once the counter
/// crosses the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLoginTracking {
    pub email: String,
    pub attempt_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_attempt_at: DateTime<Utc>,
}

impl FailedLoginTracking {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    /// True when a lock was set and has since run out.
    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until <= now)
    }
}

/// Result shape shared by lockout checks and failure recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutStatus {
    pub is_locked: bool,
    pub attempts_remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutStatus {
    pub fn unlocked(max_attempts: u32) -> Self {
        Self {
            is_locked: false,
            attempts_remaining: max_attempts,
            locked_until: None,
        }
    }

    pub fn from_tracking(
        tracking: &FailedLoginTracking,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        if tracking.is_locked(now) {
            return Self {
                is_locked: true,
                attempts_remaining: 0,
                locked_until: tracking.locked_until,
            };
        }
        if tracking.lock_expired(now) {
            return Self::unlocked(max_attempts);
        }
        Self {
            is_locked: false,
            attempts_remaining: max_attempts.saturating_sub(tracking.attempt_count),
            locked_until: None,
        }
    }
}

/// One row of the login attempt history scanned by the security monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub id: Uuid,
    pub email: String,
    pub user_id: Option<String>,
    pub success: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tracking(count: u32, locked_until: Option<DateTime<Utc>>) -> FailedLoginTracking {
        FailedLoginTracking {
            email: "a@b.com".into(),
            attempt_count: count,
            locked_until,
            last_attempt_at: Utc::now(),
        }
    }

    #[test]
    fn lock_state_follows_locked_until() {
        let now = Utc::now();
        assert!(!tracking(2, None).is_locked(now));
        assert!(tracking(5, Some(now + Duration::minutes(1))).is_locked(now));
        assert!(!tracking(5, Some(now - Duration::seconds(1))).is_locked(now));
        assert!(!tracking(5, Some(now)).is_locked(now));
    }

    #[test]
    fn status_counts_remaining_attempts() {
        let now = Utc::now();
        let status = LockoutStatus::from_tracking(&tracking(3, None), 5, now);
        assert_eq!(status, LockoutStatus {
            is_locked: false,
            attempts_remaining: 2,
            locked_until: None,
        });
    }

    #[test]
    fn expired_lock_reports_full_allowance() {
        let now = Utc::now();
        let expired = tracking(5, Some(now - Duration::minutes(1)));
        assert_eq!(LockoutStatus::from_tracking(&expired, 5, now), LockoutStatus::unlocked(5));
    }
}
