//! Audit log model - append-only security and compliance trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit action vocabulary. Entries store the string form so the trail stays
/// queryable without this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    LoginFailed,
    Logout,
    View,
    CreateLead,
    UpdateLead,
    DeleteLead,
    BulkUpdate,
    CreateProperty,
    UpdateProperty,
    DeleteProperty,
    CreatePayment,
    RoleChange,
    UserDelete,
    PermissionGrant,
    PermissionRevoke,
    TwoFactorEnabled,
    TwoFactorDisabled,
    KeyRotation,
    RateLimitExceeded,
    UnauthorizedRoleAccess,
    UnauthorizedPermissionAccess,
    AlertAcknowledged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "login",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::Logout => "logout",
            AuditAction::View => "view",
            AuditAction::CreateLead => "create_lead",
            AuditAction::UpdateLead => "update_lead",
            AuditAction::DeleteLead => "delete_lead",
            AuditAction::BulkUpdate => "bulk_update",
            AuditAction::CreateProperty => "create_property",
            AuditAction::UpdateProperty => "update_property",
            AuditAction::DeleteProperty => "delete_property",
            AuditAction::CreatePayment => "create_payment",
            AuditAction::RoleChange => "role_change",
            AuditAction::UserDelete => "user_delete",
            AuditAction::PermissionGrant => "permission_grant",
            AuditAction::PermissionRevoke => "permission_revoke",
            AuditAction::TwoFactorEnabled => "two_factor_enabled",
            AuditAction::TwoFactorDisabled => "two_factor_disabled",
            AuditAction::KeyRotation => "key_rotation",
            AuditAction::RateLimitExceeded => "rate_limit_exceeded",
            AuditAction::UnauthorizedRoleAccess => "unauthorized_role_access",
            AuditAction::UnauthorizedPermissionAccess => "unauthorized_permission_access",
            AuditAction::AlertAcknowledged => "alert_acknowledged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Auth,
    User,
    Lead,
    Property,
    Payment,
    Permission,
    TwoFactor,
    EncryptionKey,
    SecurityAlert,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Auth => "auth",
            ResourceType::User => "user",
            ResourceType::Lead => "lead",
            ResourceType::Property => "property",
            ResourceType::Payment => "payment",
            ResourceType::Permission => "permission",
            ResourceType::TwoFactor => "two_factor",
            ResourceType::EncryptionKey => "encryption_key",
            ResourceType::SecurityAlert => "security_alert",
        }
    }
}

/// Audit log entry. Written once, never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(action: AuditAction, resource_type: ResourceType, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            action: action.as_str().to_string(),
            resource_type: resource_type.as_str().to_string(),
            resource_id: None,
            ip_address: None,
            user_agent: None,
            metadata: None,
            created_at,
        }
    }
}
