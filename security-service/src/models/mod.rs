//! Domain models read and written by the security layer.

pub mod audit_log;
pub mod encryption_key;
pub mod identity;
pub mod login;
pub mod permission;
pub mod rate_limit;
pub mod security_alert;
pub mod session;
pub mod two_factor;

pub use audit_log::{AuditAction, AuditLogEntry, ResourceType};
pub use encryption_key::{EncryptedRecord, EncryptionKey};
pub use identity::{Identity, PermissionMap, Role};
pub use login::{FailedLoginTracking, LoginAttempt, LockoutStatus};
pub use permission::Permission;
pub use rate_limit::{RateLimitRecord, WindowStats};
pub use security_alert::{AlertSeverity, NewSecurityAlert, SecurityAlert};
pub use session::SessionRecord;
pub use two_factor::{TwoFactorMethod, TwoFactorRecord};
