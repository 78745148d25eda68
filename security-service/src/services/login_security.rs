//! Failed-login counting and time-boxed account lockout.
//!
//! The counter itself lives in the store and is updated in one atomic
//! operation, so concurrent failures for the same email cannot slip past the
//! threshold.

use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use uuid::Uuid;

use super::audit::{AuditEvent, AuditLogger, ClientInfo};
use super::error::ServiceError;
use crate::clock::Clock;
use crate::models::{AuditAction, LockoutStatus, LoginAttempt, ResourceType};
use crate::store::LoginStore;

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout: Duration::minutes(15),
        }
    }
}

#[derive(Clone)]
pub struct LoginSecurityTracker {
    store: Arc<dyn LoginStore>,
    audit: AuditLogger,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

impl LoginSecurityTracker {
    pub fn new(
        store: Arc<dyn LoginStore>,
        audit: AuditLogger,
        clock: Arc<dyn Clock>,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Read-only lockout state.
    pub async fn check_lockout(&self, email: &str) -> Result<LockoutStatus, ServiceError> {
        let email = normalize(email);
        let status = match self.store.find_failed_login(&email).await? {
            Some(tracking) => {
                LockoutStatus::from_tracking(&tracking, self.policy.max_attempts, self.clock.now())
            }
            None => LockoutStatus::unlocked(self.policy.max_attempts),
        };
        Ok(status)
    }

    pub async fn record_failed_login(&self, email: &str) -> Result<LockoutStatus, ServiceError> {
        let email = normalize(email);
        let now = self.clock.now();
        let tracking = self
            .store
            .increment_failed_login(&email, now, self.policy.max_attempts, self.policy.lockout)
            .await?;
        let status = LockoutStatus::from_tracking(&tracking, self.policy.max_attempts, now);

        if tracking.locked_until == Some(now + self.policy.lockout) {
            metrics::counter!("security_account_lockouts_total").increment(1);
            tracing::warn!(
                email = %email,
                locked_until = ?status.locked_until,
                "Account locked after repeated failed logins"
            );
        }
        Ok(status)
    }

    /// Clear the counter and any lock after a verified login.
    pub async fn reset_failed_login_attempts(&self, email: &str) -> Result<(), ServiceError> {
        self.store.reset_failed_login(&normalize(email)).await?;
        Ok(())
    }

    /// Persist the attempt history row and the matching audit entry. Failures
    /// are logged, never returned.
    pub async fn log_login_attempt(
        &self,
        email: &str,
        user_id: Option<&str>,
        success: bool,
        client: &ClientInfo,
        metadata: Option<Value>,
    ) {
        let attempt = LoginAttempt {
            id: Uuid::new_v4(),
            email: normalize(email),
            user_id: user_id.map(str::to_string),
            success,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            metadata: metadata.clone(),
            attempted_at: self.clock.now(),
        };
        if let Err(e) = self.store.insert_login_attempt(&attempt).await {
            tracing::error!(error = %e, email = %attempt.email, "Failed to log login attempt");
        }

        let action = if success {
            AuditAction::Login
        } else {
            AuditAction::LoginFailed
        };
        let mut event = AuditEvent::new(action, ResourceType::Auth)
            .actor(attempt.user_id.clone())
            .resource(attempt.email.clone());
        if let Some(metadata) = metadata {
            event = event.metadata(metadata);
        }
        self.audit.log_event(event, Some(client));
    }
}
