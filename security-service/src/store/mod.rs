//! Store interfaces for everything the security layer persists.
//!
//! One trait per concern; each component receives only the trait objects it
//! needs. [`Database`] backs them with PostgreSQL, [`MemoryStore`] with
//! process memory for tests and local development. Atomicity requirements
//! (failed-login counter, single active key, single-use backup codes) are the
//! store's responsibility, not the caller's.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::Database;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuditLogEntry, EncryptedRecord, EncryptionKey, FailedLoginTracking, Identity, LoginAttempt,
    PermissionMap, RateLimitRecord, SecurityAlert, SessionRecord, TwoFactorMethod,
    TwoFactorRecord, WindowStats,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_identity(&self, user_id: &str) -> Result<Option<Identity>, StoreError>;

    /// Overwrite the explicit permission map. Last writer wins.
    async fn update_permissions(
        &self,
        user_id: &str,
        permissions: &PermissionMap,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count and oldest timestamp of records for the key strictly after `since`.
    async fn window_stats(
        &self,
        identifier: &str,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, StoreError>;

    async fn insert_request(&self, record: &RateLimitRecord) -> Result<(), StoreError>;

    /// Delete every record older than `cutoff`; returns the number removed.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait LoginStore: Send + Sync {
    async fn find_failed_login(
        &self,
        email: &str,
    ) -> Result<Option<FailedLoginTracking>, StoreError>;

    /// Atomically register one failed attempt and return the new state:
    /// - while locked (`locked_until > now`) nothing changes;
    /// - after an expired lock the count restarts at 1;
    /// - otherwise the count increments and, on reaching `max_attempts`,
    ///   `locked_until` becomes `now + lockout`.
    async fn increment_failed_login(
        &self,
        email: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
        lockout: Duration,
    ) -> Result<FailedLoginTracking, StoreError>;

    async fn reset_failed_login(&self, email: &str) -> Result<(), StoreError>;

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError>;

    async fn failed_attempts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>, StoreError>;

    async fn locked_accounts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FailedLoginTracking>, StoreError>;
}

#[async_trait]
pub trait TwoFactorStore: Send + Sync {
    async fn find_two_factor(&self, user_id: &str)
        -> Result<Option<TwoFactorRecord>, StoreError>;

    /// Insert or replace the user's record. An enabled record is never
    /// replaced; returns false in that case.
    async fn upsert_two_factor(&self, record: &TwoFactorRecord) -> Result<bool, StoreError>;

    /// Returns false when the user has no 2FA record.
    async fn set_two_factor_enabled(
        &self,
        user_id: &str,
        enabled: bool,
        method: TwoFactorMethod,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Mark a backup code ciphertext as used. Returns false when it was
    /// already used (or unknown), so only one concurrent caller can win.
    async fn consume_backup_code(
        &self,
        user_id: &str,
        code_ciphertext: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn touch_two_factor(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Replace the backup code set and clear the used set.
    async fn replace_backup_codes(
        &self,
        user_id: &str,
        codes: &[String],
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn active_key(&self) -> Result<Option<EncryptionKey>, StoreError>;

    async fn key_by_version(&self, version: i32) -> Result<Option<EncryptionKey>, StoreError>;

    async fn list_keys(&self) -> Result<Vec<EncryptionKey>, StoreError>;

    /// Insert version 1. Conflicts when any active key already exists.
    async fn insert_initial_key(&self, key: &EncryptionKey) -> Result<(), StoreError>;

    /// Deactivate `current_version` and insert `new_key` as the active key in
    /// one transaction. Conflicts when `current_version` is no longer active,
    /// which is how two concurrent rotations are kept from both succeeding.
    async fn activate_new_key(
        &self,
        current_version: i32,
        new_key: &EncryptionKey,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait EncryptedRecordStore: Send + Sync {
    async fn insert_encrypted_record(&self, record: &EncryptedRecord) -> Result<(), StoreError>;

    async fn find_encrypted_record(&self, id: Uuid)
        -> Result<Option<EncryptedRecord>, StoreError>;

    /// Records whose `key_version` is below `version`, ordered by id and
    /// starting strictly after `after`.
    async fn records_below_version(
        &self,
        version: i32,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<EncryptedRecord>, StoreError>;

    async fn update_record_ciphertext(
        &self,
        id: Uuid,
        ciphertext: &str,
        key_version: i32,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;

    async fn audit_events_since(
        &self,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditLogEntry>, StoreError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), StoreError>;

    async fn list_alerts(
        &self,
        unacknowledged_only: bool,
        limit: u32,
    ) -> Result<Vec<SecurityAlert>, StoreError>;

    /// Returns false when no alert has that id.
    async fn acknowledge_alert(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Everything at once: the single handle constructed at startup.
#[async_trait]
pub trait SecurityStore:
    IdentityStore
    + SessionStore
    + RateLimitStore
    + LoginStore
    + TwoFactorStore
    + KeyStore
    + EncryptedRecordStore
    + AuditStore
    + AlertStore
{
    async fn health_check(&self) -> Result<(), StoreError>;
}
