use service_core::error::AppError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption key not configured")]
    KeyNotConfigured,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: authentication tag mismatch or wrong key")]
    Decryption,

    #[error("Invalid ciphertext format")]
    InvalidFormat,
}

#[derive(Error, Debug)]
pub enum TwoFactorError {
    #[error("Two-factor authentication provider is not available")]
    ProviderUnavailable,

    #[error("Two-factor authentication is not set up for this user")]
    NotEnrolled,

    #[error("Two-factor authentication is already enabled; disable it before enrolling again")]
    AlreadyEnabled,

    #[error("Invalid two-factor secret: {0}")]
    InvalidSecret(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    TwoFactor(#[from] TwoFactorError),

    #[error("User not found")]
    UserNotFound,

    #[error("Unknown permission: {0}")]
    UnknownPermission(String),

    #[error("Alert not found")]
    AlertNotFound,

    #[error("Key rotation already in progress")]
    RotationConflict,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            StoreError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            StoreError::Unavailable(_) => AppError::ServiceUnavailable,
            StoreError::Query(e) | StoreError::Corrupt(e) => {
                AppError::DatabaseError(anyhow::anyhow!(e))
            }
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyNotConfigured => AppError::ConfigError(anyhow::anyhow!(err)),
            other => AppError::InternalError(anyhow::anyhow!(other)),
        }
    }
}

impl From<TwoFactorError> for AppError {
    fn from(err: TwoFactorError) -> Self {
        match err {
            TwoFactorError::ProviderUnavailable => AppError::ConfigError(anyhow::anyhow!(err)),
            TwoFactorError::NotEnrolled => AppError::BadRequest(anyhow::anyhow!(err)),
            TwoFactorError::AlreadyEnabled => AppError::Conflict(anyhow::anyhow!(err)),
            TwoFactorError::InvalidSecret(_) => AppError::InternalError(anyhow::anyhow!(err)),
            TwoFactorError::Crypto(e) => e.into(),
            TwoFactorError::Store(e) => e.into(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(e) => e.into(),
            ServiceError::Crypto(e) => e.into(),
            ServiceError::TwoFactor(e) => e.into(),
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::UnknownPermission(p) => {
                AppError::BadRequest(anyhow::anyhow!("Unknown permission: {}", p))
            }
            ServiceError::AlertNotFound => AppError::NotFound(anyhow::anyhow!("Alert not found")),
            ServiceError::RotationConflict => {
                AppError::Conflict(anyhow::anyhow!("Key rotation already in progress"))
            }
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
