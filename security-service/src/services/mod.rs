//! Services layer for security-service.
//!
//! Each component takes the store traits it needs plus a [`Clock`](crate::clock::Clock),
//! so the same code runs against PostgreSQL in production and the in-memory
//! store in tests.

pub mod alerts;
pub mod audit;
pub mod email;
pub mod encrypted_fields;
pub mod encryption;
pub mod error;
pub mod key_rotation;
pub mod login_security;
pub mod monitor;
pub mod permissions;
pub mod rate_limiter;
pub mod session;
pub mod two_factor;

pub use alerts::{AlertNotificationConfig, AlertService};
pub use audit::{AuditEvent, AuditLogger, ClientInfo};
pub use email::{EmailProvider, LogOnlyEmailService, MockEmailService, SmtpEmailService};
pub use encrypted_fields::EncryptedFieldService;
pub use encryption::EncryptionService;
pub use error::{CryptoError, ServiceError, TwoFactorError};
pub use key_rotation::{KeyRotationManager, RotationConfig, RotationResult};
pub use login_security::{LockoutPolicy, LoginSecurityTracker};
pub use monitor::{MonitoringReport, SecurityMonitor};
pub use permissions::PermissionResolver;
pub use rate_limiter::{RateLimitDecision, RateLimitPolicy, RateLimitTier, RateLimitTiers, RateLimiter};
pub use session::{SessionVerifier, bearer_token};
pub use two_factor::{TwoFactorProvider, TwoFactorService, UnavailableProvider};
