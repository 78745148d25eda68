//! In-process store for tests and local development.
//!
//! Every compound update happens under a single map entry or mutex guard, so
//! the atomicity the traits promise holds within one process.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    AlertStore, AuditStore, EncryptedRecordStore, IdentityStore, KeyStore, LoginStore,
    RateLimitStore, SecurityStore, SessionStore, StoreError, TwoFactorStore,
};
use crate::models::{
    AuditLogEntry, EncryptedRecord, EncryptionKey, FailedLoginTracking, Identity, LoginAttempt,
    PermissionMap, RateLimitRecord, SecurityAlert, SessionRecord, TwoFactorMethod,
    TwoFactorRecord, WindowStats,
};

#[derive(Default)]
pub struct MemoryStore {
    unavailable: AtomicBool,
    identities: DashMap<String, Identity>,
    sessions: DashMap<String, SessionRecord>,
    rate_limits: DashMap<(String, String), Vec<DateTime<Utc>>>,
    failed_logins: DashMap<String, FailedLoginTracking>,
    login_attempts: Mutex<Vec<LoginAttempt>>,
    two_factor: DashMap<String, TwoFactorRecord>,
    keys: Mutex<Vec<EncryptionKey>>,
    records: Mutex<BTreeMap<Uuid, EncryptedRecord>>,
    audit_logs: Mutex<Vec<AuditLogEntry>>,
    alerts: Mutex<Vec<SecurityAlert>>,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Query(format!("Memory store mutex poisoned: {}", e))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails with `Unavailable` until
    /// switched back on.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store switched off".into()))
        } else {
            Ok(())
        }
    }

    pub fn insert_identity(&self, identity: Identity) {
        self.identities.insert(identity.id.clone(), identity);
    }

    pub fn insert_session(&self, session: SessionRecord) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit_logs
            .lock()
            .map(|logs| logs.clone())
            .unwrap_or_default()
    }

    pub fn login_attempts(&self) -> Vec<LoginAttempt> {
        self.login_attempts
            .lock()
            .map(|attempts| attempts.clone())
            .unwrap_or_default()
    }

    pub fn rate_limit_record_count(&self) -> usize {
        self.rate_limits.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_identity(&self, user_id: &str) -> Result<Option<Identity>, StoreError> {
        self.check()?;
        Ok(self.identities.get(user_id).map(|i| i.clone()))
    }

    async fn update_permissions(
        &self,
        user_id: &str,
        permissions: &PermissionMap,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut identity = self
            .identities
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("identity {}", user_id)))?;
        identity.permissions = Some(permissions.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.check()?;
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn window_stats(
        &self,
        identifier: &str,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, StoreError> {
        self.check()?;
        let key = (identifier.to_string(), endpoint.to_string());
        let Some(timestamps) = self.rate_limits.get(&key) else {
            return Ok(WindowStats::default());
        };
        let in_window = timestamps.iter().filter(|ts| **ts > since);
        let (count, oldest) = in_window.fold((0u64, None), |(count, oldest), ts| {
            let oldest = match oldest {
                Some(o) if o <= *ts => Some(o),
                _ => Some(*ts),
            };
            (count + 1, oldest)
        });
        Ok(WindowStats { count, oldest })
    }

    async fn insert_request(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
        self.check()?;
        self.rate_limits
            .entry((record.identifier.clone(), record.endpoint.clone()))
            .or_default()
            .push(record.timestamp);
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        let mut removed = 0u64;
        for mut entry in self.rate_limits.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|ts| *ts >= cutoff);
            removed += (before - entry.value().len()) as u64;
        }
        self.rate_limits.retain(|_, v| !v.is_empty());
        Ok(removed)
    }
}

#[async_trait]
impl LoginStore for MemoryStore {
    async fn find_failed_login(
        &self,
        email: &str,
    ) -> Result<Option<FailedLoginTracking>, StoreError> {
        self.check()?;
        Ok(self.failed_logins.get(email).map(|t| t.clone()))
    }

    async fn increment_failed_login(
        &self,
        email: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
        lockout: Duration,
    ) -> Result<FailedLoginTracking, StoreError> {
        self.check()?;
        let lock_at = |count: u32| (count >= max_attempts).then(|| now + lockout);

        let mut entry = self
            .failed_logins
            .entry(email.to_string())
            .or_insert_with(|| FailedLoginTracking {
                email: email.to_string(),
                attempt_count: 0,
                locked_until: None,
                last_attempt_at: now,
            });
        let tracking = entry.value_mut();

        if tracking.is_locked(now) {
            tracking.last_attempt_at = now;
            return Ok(tracking.clone());
        }
        tracking.attempt_count = if tracking.lock_expired(now) {
            1
        } else {
            tracking.attempt_count + 1
        };
        tracking.locked_until = lock_at(tracking.attempt_count);
        tracking.last_attempt_at = now;
        Ok(tracking.clone())
    }

    async fn reset_failed_login(&self, email: &str) -> Result<(), StoreError> {
        self.check()?;
        self.failed_logins.remove(email);
        Ok(())
    }

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        self.check()?;
        self.login_attempts
            .lock()
            .map_err(poisoned)?
            .push(attempt.clone());
        Ok(())
    }

    async fn failed_attempts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>, StoreError> {
        self.check()?;
        Ok(self
            .login_attempts
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|a| !a.success && a.attempted_at >= since)
            .cloned()
            .collect())
    }

    async fn locked_accounts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FailedLoginTracking>, StoreError> {
        self.check()?;
        Ok(self
            .failed_logins
            .iter()
            .filter(|t| t.is_locked(now))
            .map(|t| t.clone())
            .collect())
    }
}

#[async_trait]
impl TwoFactorStore for MemoryStore {
    async fn find_two_factor(
        &self,
        user_id: &str,
    ) -> Result<Option<TwoFactorRecord>, StoreError> {
        self.check()?;
        Ok(self.two_factor.get(user_id).map(|r| r.clone()))
    }

    async fn upsert_two_factor(&self, record: &TwoFactorRecord) -> Result<bool, StoreError> {
        self.check()?;
        match self.two_factor.entry(record.user_id.clone()) {
            Entry::Occupied(existing) if existing.get().enabled => Ok(false),
            Entry::Occupied(mut existing) => {
                existing.insert(record.clone());
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn set_two_factor_enabled(
        &self,
        user_id: &str,
        enabled: bool,
        method: TwoFactorMethod,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let Some(mut record) = self.two_factor.get_mut(user_id) else {
            return Ok(false);
        };
        record.enabled = enabled;
        record.method = method;
        record.enabled_at = at;
        Ok(true)
    }

    async fn consume_backup_code(
        &self,
        user_id: &str,
        code_ciphertext: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let Some(mut record) = self.two_factor.get_mut(user_id) else {
            return Ok(false);
        };
        let known = record.backup_codes.iter().any(|c| c == code_ciphertext);
        let used = record.used_backup_codes.iter().any(|c| c == code_ciphertext);
        if !known || used {
            return Ok(false);
        }
        record.used_backup_codes.push(code_ciphertext.to_string());
        record.last_used_at = Some(at);
        Ok(true)
    }

    async fn touch_two_factor(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check()?;
        if let Some(mut record) = self.two_factor.get_mut(user_id) {
            record.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        user_id: &str,
        codes: &[String],
    ) -> Result<bool, StoreError> {
        self.check()?;
        let Some(mut record) = self.two_factor.get_mut(user_id) else {
            return Ok(false);
        };
        record.backup_codes = codes.to_vec();
        record.used_backup_codes.clear();
        Ok(true)
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn active_key(&self) -> Result<Option<EncryptionKey>, StoreError> {
        self.check()?;
        Ok(self
            .keys
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|k| k.is_active)
            .max_by_key(|k| k.version)
            .cloned())
    }

    async fn key_by_version(&self, version: i32) -> Result<Option<EncryptionKey>, StoreError> {
        self.check()?;
        Ok(self
            .keys
            .lock()
            .map_err(poisoned)?
            .iter()
            .find(|k| k.version == version)
            .cloned())
    }

    async fn list_keys(&self) -> Result<Vec<EncryptionKey>, StoreError> {
        self.check()?;
        let mut keys = self.keys.lock().map_err(poisoned)?.clone();
        keys.sort_by_key(|k| k.version);
        Ok(keys)
    }

    async fn insert_initial_key(&self, key: &EncryptionKey) -> Result<(), StoreError> {
        self.check()?;
        let mut keys = self.keys.lock().map_err(poisoned)?;
        if keys.iter().any(|k| k.is_active || k.version == key.version) {
            return Err(StoreError::Conflict("an encryption key already exists".into()));
        }
        keys.push(key.clone());
        Ok(())
    }

    async fn activate_new_key(
        &self,
        current_version: i32,
        new_key: &EncryptionKey,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut keys = self.keys.lock().map_err(poisoned)?;
        if keys.iter().any(|k| k.version == new_key.version) {
            return Err(StoreError::Conflict(format!(
                "key version {} already exists",
                new_key.version
            )));
        }
        let current = keys
            .iter_mut()
            .find(|k| k.version == current_version && k.is_active)
            .ok_or_else(|| {
                StoreError::Conflict(format!("key version {} is not active", current_version))
            })?;
        current.is_active = false;
        current.deactivated_at = Some(now);
        keys.push(new_key.clone());
        Ok(())
    }
}

#[async_trait]
impl EncryptedRecordStore for MemoryStore {
    async fn insert_encrypted_record(&self, record: &EncryptedRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records
            .lock()
            .map_err(poisoned)?
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn find_encrypted_record(
        &self,
        id: Uuid,
    ) -> Result<Option<EncryptedRecord>, StoreError> {
        self.check()?;
        Ok(self.records.lock().map_err(poisoned)?.get(&id).cloned())
    }

    async fn records_below_version(
        &self,
        version: i32,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<EncryptedRecord>, StoreError> {
        self.check()?;
        let records = self.records.lock().map_err(poisoned)?;
        Ok(records
            .values()
            .filter(|r| r.key_version < version)
            .filter(|r| after.map_or(true, |a| r.id > a))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn update_record_ciphertext(
        &self,
        id: Uuid,
        ciphertext: &str,
        key_version: i32,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut records = self.records.lock().map_err(poisoned)?;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("encrypted record {}", id)))?;
        record.ciphertext = ciphertext.to_string();
        record.key_version = key_version;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.check()?;
        self.audit_logs
            .lock()
            .map_err(poisoned)?
            .push(entry.clone());
        Ok(())
    }

    async fn audit_events_since(
        &self,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        self.check()?;
        Ok(self
            .audit_logs
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|e| e.action == action && e.created_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), StoreError> {
        self.check()?;
        self.alerts.lock().map_err(poisoned)?.push(alert.clone());
        Ok(())
    }

    async fn list_alerts(
        &self,
        unacknowledged_only: bool,
        limit: u32,
    ) -> Result<Vec<SecurityAlert>, StoreError> {
        self.check()?;
        let alerts = self.alerts.lock().map_err(poisoned)?;
        Ok(alerts
            .iter()
            .rev()
            .filter(|a| !unacknowledged_only || !a.acknowledged)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn acknowledge_alert(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check()?;
        let mut alerts = self.alerts.lock().map_err(poisoned)?;
        match alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl SecurityStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.check()
    }
}
