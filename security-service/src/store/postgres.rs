//! PostgreSQL store.
//!
//! Runtime-checked `sqlx` queries against the schema in `migrations/`.
//! Every compound update that must be race-free is a single statement or a
//! transaction, never a read followed by a write in application code.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::{
    AlertStore, AuditStore, EncryptedRecordStore, IdentityStore, KeyStore, LoginStore,
    RateLimitStore, SecurityStore, SessionStore, StoreError, TwoFactorStore,
};
use crate::models::{
    AlertSeverity, AuditLogEntry, EncryptedRecord, EncryptionKey, FailedLoginTracking, Identity,
    LoginAttempt, PermissionMap, RateLimitRecord, SecurityAlert, SessionRecord, TwoFactorMethod,
    TwoFactorRecord, WindowStats,
};

/// PostgreSQL-backed [`SecurityStore`].
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        tracing::info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .max_lifetime(std::time::Duration::from_secs(1800))
            .connect(url)
            .await?;
        tracing::info!("Successfully connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ==================== Row types ====================

#[derive(FromRow)]
struct IdentityRow {
    id: String,
    email: Option<String>,
    role: Option<String>,
    permissions: Option<Json<PermissionMap>>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            id: row.id,
            email: row.email,
            role: Identity::parse_role(row.role.as_deref()),
            permissions: row.permissions.map(|Json(map)| map),
        }
    }
}

#[derive(FromRow)]
struct WindowRow {
    count: i64,
    oldest: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct FailedLoginRow {
    email: String,
    attempt_count: i32,
    locked_until: Option<DateTime<Utc>>,
    last_attempt_at: DateTime<Utc>,
}

impl From<FailedLoginRow> for FailedLoginTracking {
    fn from(row: FailedLoginRow) -> Self {
        FailedLoginTracking {
            email: row.email,
            attempt_count: row.attempt_count.max(0) as u32,
            locked_until: row.locked_until,
            last_attempt_at: row.last_attempt_at,
        }
    }
}

#[derive(FromRow)]
struct LoginAttemptRow {
    id: Uuid,
    email: String,
    user_id: Option<String>,
    success: bool,
    ip_address: Option<String>,
    user_agent: Option<String>,
    metadata: Option<serde_json::Value>,
    attempted_at: DateTime<Utc>,
}

impl From<LoginAttemptRow> for LoginAttempt {
    fn from(row: LoginAttemptRow) -> Self {
        LoginAttempt {
            id: row.id,
            email: row.email,
            user_id: row.user_id,
            success: row.success,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            metadata: row.metadata,
            attempted_at: row.attempted_at,
        }
    }
}

#[derive(FromRow)]
struct TwoFactorRow {
    user_id: String,
    method: String,
    totp_secret: Option<String>,
    backup_codes: Vec<String>,
    used_backup_codes: Vec<String>,
    enabled: bool,
    enabled_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TwoFactorRow> for TwoFactorRecord {
    type Error = StoreError;

    fn try_from(row: TwoFactorRow) -> Result<Self, Self::Error> {
        Ok(TwoFactorRecord {
            method: row.method.parse().map_err(StoreError::Corrupt)?,
            user_id: row.user_id,
            totp_secret: row.totp_secret,
            backup_codes: row.backup_codes,
            used_backup_codes: row.used_backup_codes,
            enabled: row.enabled,
            enabled_at: row.enabled_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct KeyRow {
    version: i32,
    key_material: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    deactivated_at: Option<DateTime<Utc>>,
}

impl From<KeyRow> for EncryptionKey {
    fn from(row: KeyRow) -> Self {
        EncryptionKey {
            version: row.version,
            key: SecretString::new(row.key_material),
            is_active: row.is_active,
            created_at: row.created_at,
            deactivated_at: row.deactivated_at,
        }
    }
}

#[derive(FromRow)]
struct EncryptedRecordRow {
    id: Uuid,
    owner_id: String,
    field: String,
    ciphertext: String,
    key_version: i32,
}

impl From<EncryptedRecordRow> for EncryptedRecord {
    fn from(row: EncryptedRecordRow) -> Self {
        EncryptedRecord {
            id: row.id,
            owner_id: row.owner_id,
            field: row.field,
            ciphertext: row.ciphertext,
            key_version: row.key_version,
        }
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: Uuid,
    alert_type: String,
    severity: String,
    title: String,
    message: String,
    metadata: serde_json::Value,
    user_id: Option<String>,
    ip_address: Option<String>,
    acknowledged: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for SecurityAlert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(SecurityAlert {
            id: row.id,
            alert_type: row.alert_type,
            severity: row.severity.parse::<AlertSeverity>().map_err(StoreError::Corrupt)?,
            title: row.title,
            message: row.message,
            metadata: row.metadata,
            user_id: row.user_id,
            ip_address: row.ip_address,
            acknowledged: row.acknowledged,
            created_at: row.created_at,
        })
    }
}

const TWO_FACTOR_COLUMNS: &str = "user_id, method, totp_secret, backup_codes, used_backup_codes, \
     enabled, enabled_at, last_used_at, created_at";

const KEY_COLUMNS: &str = "version, key_material, is_active, created_at, deactivated_at";

// ==================== Identity & sessions ====================

#[async_trait]
impl IdentityStore for Database {
    async fn find_identity(&self, user_id: &str) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(
            "SELECT id, email, role, permissions FROM identities WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Identity::from))
    }

    async fn update_permissions(
        &self,
        user_id: &str,
        permissions: &PermissionMap,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE identities SET permissions = $2 WHERE id = $1")
            .bind(user_id)
            .bind(Json(permissions))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("identity {}", user_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn find_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, DateTime<Utc>, bool)>(
            "SELECT session_id, user_id, expires_at, revoked FROM sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(session_id, user_id, expires_at, revoked)| SessionRecord {
            session_id,
            user_id,
            expires_at,
            revoked,
        }))
    }
}

// ==================== Rate limiting ====================

#[async_trait]
impl RateLimitStore for Database {
    async fn window_stats(
        &self,
        identifier: &str,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, StoreError> {
        let row = sqlx::query_as::<_, WindowRow>(
            r#"
            SELECT COUNT(*) AS count, MIN(timestamp) AS oldest
            FROM rate_limit_records
            WHERE identifier = $1 AND endpoint = $2 AND timestamp > $3
            "#,
        )
        .bind(identifier)
        .bind(endpoint)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(WindowStats {
            count: row.count.max(0) as u64,
            oldest: row.oldest,
        })
    }

    async fn insert_request(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rate_limit_records (identifier, endpoint, timestamp) VALUES ($1, $2, $3)",
        )
        .bind(&record.identifier)
        .bind(&record.endpoint)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rate_limit_records WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ==================== Login security ====================

#[async_trait]
impl LoginStore for Database {
    async fn find_failed_login(
        &self,
        email: &str,
    ) -> Result<Option<FailedLoginTracking>, StoreError> {
        let row = sqlx::query_as::<_, FailedLoginRow>(
            r#"
            SELECT email, attempt_count, locked_until, last_attempt_at
            FROM failed_login_tracking WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FailedLoginTracking::from))
    }

    async fn increment_failed_login(
        &self,
        email: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
        lockout: Duration,
    ) -> Result<FailedLoginTracking, StoreError> {
        // $2 = now, $3 = max attempts, $4 = lock expiry if this attempt locks.
        let row = sqlx::query_as::<_, FailedLoginRow>(
            r#"
            INSERT INTO failed_login_tracking (email, attempt_count, locked_until, last_attempt_at)
            VALUES ($1, 1, CASE WHEN 1 >= $3 THEN $4 END, $2)
            ON CONFLICT (email) DO UPDATE SET
                attempt_count = CASE
                    WHEN failed_login_tracking.locked_until > $2
                        THEN failed_login_tracking.attempt_count
                    WHEN failed_login_tracking.locked_until IS NOT NULL
                        THEN 1
                    ELSE failed_login_tracking.attempt_count + 1
                END,
                locked_until = CASE
                    WHEN failed_login_tracking.locked_until > $2
                        THEN failed_login_tracking.locked_until
                    WHEN failed_login_tracking.locked_until IS NOT NULL
                        THEN CASE WHEN 1 >= $3 THEN $4 END
                    WHEN failed_login_tracking.attempt_count + 1 >= $3
                        THEN $4
                    ELSE NULL
                END,
                last_attempt_at = $2
            RETURNING email, attempt_count, locked_until, last_attempt_at
            "#,
        )
        .bind(email)
        .bind(now)
        .bind(max_attempts as i32)
        .bind(now + lockout)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn reset_failed_login(&self, email: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM failed_login_tracking WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts
                (id, email, user_id, success, ip_address, user_agent, metadata, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(attempt.id)
        .bind(&attempt.email)
        .bind(&attempt.user_id)
        .bind(attempt.success)
        .bind(&attempt.ip_address)
        .bind(&attempt.user_agent)
        .bind(&attempt.metadata)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn failed_attempts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LoginAttempt>, StoreError> {
        let rows = sqlx::query_as::<_, LoginAttemptRow>(
            r#"
            SELECT id, email, user_id, success, ip_address, user_agent, metadata, attempted_at
            FROM login_attempts
            WHERE success = FALSE AND attempted_at >= $1
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LoginAttempt::from).collect())
    }

    async fn locked_accounts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FailedLoginTracking>, StoreError> {
        let rows = sqlx::query_as::<_, FailedLoginRow>(
            r#"
            SELECT email, attempt_count, locked_until, last_attempt_at
            FROM failed_login_tracking WHERE locked_until > $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FailedLoginTracking::from).collect())
    }
}

// ==================== Two-factor ====================

#[async_trait]
impl TwoFactorStore for Database {
    async fn find_two_factor(
        &self,
        user_id: &str,
    ) -> Result<Option<TwoFactorRecord>, StoreError> {
        let row = sqlx::query_as::<_, TwoFactorRow>(&format!(
            "SELECT {} FROM two_factor_auth WHERE user_id = $1",
            TWO_FACTOR_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TwoFactorRecord::try_from).transpose()
    }

    async fn upsert_two_factor(&self, record: &TwoFactorRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO two_factor_auth
                (user_id, method, totp_secret, backup_codes, used_backup_codes,
                 enabled, enabled_at, last_used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO UPDATE SET
                method = EXCLUDED.method,
                totp_secret = EXCLUDED.totp_secret,
                backup_codes = EXCLUDED.backup_codes,
                used_backup_codes = EXCLUDED.used_backup_codes,
                enabled = EXCLUDED.enabled,
                enabled_at = EXCLUDED.enabled_at,
                last_used_at = EXCLUDED.last_used_at
            WHERE NOT two_factor_auth.enabled
            "#,
        )
        .bind(&record.user_id)
        .bind(record.method.as_str())
        .bind(&record.totp_secret)
        .bind(&record.backup_codes)
        .bind(&record.used_backup_codes)
        .bind(record.enabled)
        .bind(record.enabled_at)
        .bind(record.last_used_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_two_factor_enabled(
        &self,
        user_id: &str,
        enabled: bool,
        method: TwoFactorMethod,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE two_factor_auth SET enabled = $2, method = $3, enabled_at = $4 WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(enabled)
        .bind(method.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn consume_backup_code(
        &self,
        user_id: &str,
        code_ciphertext: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE two_factor_auth
            SET used_backup_codes = array_append(used_backup_codes, $2),
                last_used_at = $3
            WHERE user_id = $1
              AND $2 = ANY(backup_codes)
              AND NOT ($2 = ANY(used_backup_codes))
            "#,
        )
        .bind(user_id)
        .bind(code_ciphertext)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn touch_two_factor(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE two_factor_auth SET last_used_at = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        user_id: &str,
        codes: &[String],
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE two_factor_auth SET backup_codes = $2, used_backup_codes = '{}' WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(codes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ==================== Encryption keys ====================

#[async_trait]
impl KeyStore for Database {
    async fn active_key(&self) -> Result<Option<EncryptionKey>, StoreError> {
        let row = sqlx::query_as::<_, KeyRow>(&format!(
            "SELECT {} FROM encryption_keys WHERE is_active ORDER BY version DESC LIMIT 1",
            KEY_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EncryptionKey::from))
    }

    async fn key_by_version(&self, version: i32) -> Result<Option<EncryptionKey>, StoreError> {
        let row = sqlx::query_as::<_, KeyRow>(&format!(
            "SELECT {} FROM encryption_keys WHERE version = $1",
            KEY_COLUMNS
        ))
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EncryptionKey::from))
    }

    async fn list_keys(&self) -> Result<Vec<EncryptionKey>, StoreError> {
        let rows = sqlx::query_as::<_, KeyRow>(&format!(
            "SELECT {} FROM encryption_keys ORDER BY version",
            KEY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EncryptionKey::from).collect())
    }

    async fn insert_initial_key(&self, key: &EncryptionKey) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO encryption_keys (version, key_material, is_active, created_at)
            VALUES ($1, $2, TRUE, $3)
            "#,
        )
        .bind(key.version)
        .bind(key.material())
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn activate_new_key(
        &self,
        current_version: i32,
        new_key: &EncryptionKey,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let deactivated = sqlx::query(
            r#"
            UPDATE encryption_keys SET is_active = FALSE, deactivated_at = $2
            WHERE version = $1 AND is_active
            "#,
        )
        .bind(current_version)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if deactivated.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "key version {} is not active",
                current_version
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO encryption_keys (version, key_material, is_active, created_at)
            VALUES ($1, $2, TRUE, $3)
            "#,
        )
        .bind(new_key.version)
        .bind(new_key.material())
        .bind(new_key.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl EncryptedRecordStore for Database {
    async fn insert_encrypted_record(&self, record: &EncryptedRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO encrypted_fields (id, owner_id, field, ciphertext, key_version)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(&record.owner_id)
        .bind(&record.field)
        .bind(&record.ciphertext)
        .bind(record.key_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_encrypted_record(
        &self,
        id: Uuid,
    ) -> Result<Option<EncryptedRecord>, StoreError> {
        let row = sqlx::query_as::<_, EncryptedRecordRow>(
            "SELECT id, owner_id, field, ciphertext, key_version FROM encrypted_fields WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EncryptedRecord::from))
    }

    async fn records_below_version(
        &self,
        version: i32,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<EncryptedRecord>, StoreError> {
        let rows = sqlx::query_as::<_, EncryptedRecordRow>(
            r#"
            SELECT id, owner_id, field, ciphertext, key_version
            FROM encrypted_fields
            WHERE key_version < $1 AND ($2::uuid IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(version)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EncryptedRecord::from).collect())
    }

    async fn update_record_ciphertext(
        &self,
        id: Uuid,
        ciphertext: &str,
        key_version: i32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE encrypted_fields SET ciphertext = $2, key_version = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(ciphertext)
        .bind(key_version)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("encrypted record {}", id)));
        }
        Ok(())
    }
}

// ==================== Audit & alerts ====================

#[async_trait]
impl AuditStore for Database {
    async fn insert_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, user_id, action, resource_type, resource_id, ip_address, user_agent, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_events_since(
        &self,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        let rows = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT id, user_id, action, resource_type, resource_id, ip_address, user_agent, metadata, created_at
            FROM audit_logs
            WHERE action = $1 AND created_at >= $2
            "#,
        )
        .bind(action)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AlertStore for Database {
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO security_alerts
                (id, alert_type, severity, title, message, metadata, user_id, ip_address, acknowledged, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.alert_type)
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(&alert.metadata)
        .bind(&alert.user_id)
        .bind(&alert.ip_address)
        .bind(alert.acknowledged)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_alerts(
        &self,
        unacknowledged_only: bool,
        limit: u32,
    ) -> Result<Vec<SecurityAlert>, StoreError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, alert_type, severity, title, message, metadata, user_id, ip_address, acknowledged, created_at
            FROM security_alerts
            WHERE NOT $1 OR acknowledged = FALSE
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(unacknowledged_only)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SecurityAlert::try_from).collect()
    }

    async fn acknowledge_alert(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE security_alerts SET acknowledged = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SecurityStore for Database {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            StoreError::from(e)
        })?;
        Ok(())
    }
}
