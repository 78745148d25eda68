//! TOTP two-factor authentication with single-use backup codes.
//!
//! The TOTP backend sits behind [`TwoFactorProvider`]. Builds without the
//! `totp` feature, or deployments with 2FA switched off, get
//! [`UnavailableProvider`], which refuses enrolment instead of pretending.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use subtle::ConstantTimeEq;

use super::encryption::EncryptionService;
use super::error::TwoFactorError;
use crate::clock::Clock;
use crate::models::{TwoFactorMethod, TwoFactorRecord};
use crate::store::TwoFactorStore;

pub const BACKUP_CODE_COUNT: usize = 10;
pub const BACKUP_CODE_DIGITS: usize = 8;

pub trait TwoFactorProvider: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    /// New base32 shared secret.
    fn generate_secret(&self) -> Result<String, TwoFactorError>;

    /// `otpauth://` URI for authenticator apps.
    fn provisioning_url(&self, secret: &str, account: &str) -> Result<String, TwoFactorError>;

    /// Check `token` against `secret` at `at`, tolerating clock drift.
    fn verify(&self, secret: &str, token: &str, at: DateTime<Utc>) -> Result<bool, TwoFactorError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableProvider;

impl TwoFactorProvider for UnavailableProvider {
    fn is_available(&self) -> bool {
        false
    }

    fn generate_secret(&self) -> Result<String, TwoFactorError> {
        Err(TwoFactorError::ProviderUnavailable)
    }

    fn provisioning_url(&self, _secret: &str, _account: &str) -> Result<String, TwoFactorError> {
        Err(TwoFactorError::ProviderUnavailable)
    }

    fn verify(&self, _: &str, _: &str, _: DateTime<Utc>) -> Result<bool, TwoFactorError> {
        Err(TwoFactorError::ProviderUnavailable)
    }
}

#[cfg(feature = "totp")]
pub use totp_provider::TotpProvider;

#[cfg(feature = "totp")]
mod totp_provider {
    use super::*;
    use totp_rs::{Algorithm, Secret, TOTP};

    const DIGITS: usize = 6;
    const SKEW: u8 = 2;
    const STEP: u64 = 30;

    /// RFC 6238 TOTP: SHA1, 6 digits, 30 second step, +/-2 steps of skew.
    #[derive(Debug, Clone)]
    pub struct TotpProvider {
        issuer: String,
    }

    impl TotpProvider {
        pub fn new(issuer: impl Into<String>) -> Self {
            Self {
                issuer: issuer.into(),
            }
        }

        fn totp(&self, secret: &str, account: &str) -> Result<TOTP, TwoFactorError> {
            let bytes = Secret::Encoded(secret.to_string())
                .to_bytes()
                .map_err(|e| TwoFactorError::InvalidSecret(format!("{e:?}")))?;
            TOTP::new(
                Algorithm::SHA1,
                DIGITS,
                SKEW,
                STEP,
                bytes,
                Some(self.issuer.clone()),
                account.to_string(),
            )
            .map_err(|e| TwoFactorError::InvalidSecret(e.to_string()))
        }

        /// Code for `secret` at `at`. Used by enrolment tooling and tests.
        pub fn code_at(&self, secret: &str, at: DateTime<Utc>) -> Result<String, TwoFactorError> {
            Ok(self.totp(secret, "code")?.generate(at.timestamp().max(0) as u64))
        }
    }

    impl TwoFactorProvider for TotpProvider {
        fn generate_secret(&self) -> Result<String, TwoFactorError> {
            Ok(Secret::generate_secret().to_encoded().to_string())
        }

        fn provisioning_url(&self, secret: &str, account: &str) -> Result<String, TwoFactorError> {
            Ok(self.totp(secret, account)?.get_url())
        }

        fn verify(
            &self,
            secret: &str,
            token: &str,
            at: DateTime<Utc>,
        ) -> Result<bool, TwoFactorError> {
            let totp = self.totp(secret, "verify")?;
            Ok(totp.check(token, at.timestamp().max(0) as u64))
        }
    }
}

/// Returned once at enrolment; the plaintext values are never stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetup {
    pub secret: String,
    pub qr_code_url: String,
    pub backup_codes: Vec<String>,
}

/// Outcome of a verification submitted through the enrolment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// Pending enrolment confirmed; 2FA is now enabled.
    Enabled,
    Verified,
    Rejected,
}

#[derive(Clone)]
pub struct TwoFactorService {
    store: Arc<dyn TwoFactorStore>,
    provider: Arc<dyn TwoFactorProvider>,
    encryption: Arc<EncryptionService>,
    clock: Arc<dyn Clock>,
}

fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::thread_rng();
    let bound = 10u32.pow(BACKUP_CODE_DIGITS as u32);
    (0..BACKUP_CODE_COUNT)
        .map(|_| format!("{:0width$}", rng.gen_range(0..bound), width = BACKUP_CODE_DIGITS))
        .collect()
}

impl TwoFactorService {
    pub fn new(
        store: Arc<dyn TwoFactorStore>,
        provider: Arc<dyn TwoFactorProvider>,
        encryption: Arc<EncryptionService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            encryption,
            clock,
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }

    /// Issue a secret and backup codes. The record is stored encrypted and
    /// disabled until the first successful verification. Refused while an
    /// enabled record exists; it must be disabled with a valid code first.
    #[tracing::instrument(skip_all, fields(user_id = %user_id))]
    pub async fn generate_secret(
        &self,
        user_id: &str,
        account: &str,
    ) -> Result<TwoFactorSetup, TwoFactorError> {
        if let Some(existing) = self.store.find_two_factor(user_id).await? {
            if existing.enabled {
                tracing::warn!("Enrolment refused, two-factor already enabled");
                return Err(TwoFactorError::AlreadyEnabled);
            }
        }

        let secret = self.provider.generate_secret()?;
        let qr_code_url = self.provider.provisioning_url(&secret, account)?;
        let backup_codes = generate_backup_codes();

        let record = TwoFactorRecord {
            user_id: user_id.to_string(),
            method: TwoFactorMethod::Totp,
            totp_secret: Some(self.encryption.encrypt_with_master(&secret)?),
            backup_codes: self.encrypt_codes(&backup_codes)?,
            used_backup_codes: Vec::new(),
            enabled: false,
            enabled_at: None,
            last_used_at: None,
            created_at: self.clock.now(),
        };
        if !self.store.upsert_two_factor(&record).await? {
            tracing::warn!("Enrolment refused, two-factor enabled concurrently");
            return Err(TwoFactorError::AlreadyEnabled);
        }
        tracing::info!("Two-factor enrolment started");

        Ok(TwoFactorSetup {
            secret,
            qr_code_url,
            backup_codes,
        })
    }

    /// TOTP first, then backup codes. Any mismatch, a missing record or a
    /// disabled record yields `false`.
    #[tracing::instrument(skip_all, fields(user_id = %user_id))]
    pub async fn verify(&self, user_id: &str, token: &str) -> Result<bool, TwoFactorError> {
        let Some(record) = self.store.find_two_factor(user_id).await? else {
            return Ok(false);
        };
        if !record.enabled {
            tracing::warn!("Verification attempted against disabled two-factor record");
            return Ok(false);
        }
        self.verify_record(&record, &normalize_token(token)).await
    }

    /// Verification entry point for the user-facing flow: confirms a pending
    /// enrolment with a TOTP code, or verifies normally once enabled.
    pub async fn confirm_or_verify(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<VerifyOutcome, TwoFactorError> {
        let record = self
            .store
            .find_two_factor(user_id)
            .await?
            .ok_or(TwoFactorError::NotEnrolled)?;
        let token = normalize_token(token);

        if record.enabled {
            return Ok(if self.verify_record(&record, &token).await? {
                VerifyOutcome::Verified
            } else {
                VerifyOutcome::Rejected
            });
        }

        if !self.check_totp(&record, &token)? {
            return Ok(VerifyOutcome::Rejected);
        }
        self.enable(user_id, TwoFactorMethod::Totp).await?;
        self.store.touch_two_factor(user_id, self.clock.now()).await?;
        Ok(VerifyOutcome::Enabled)
    }

    pub async fn enable(&self, user_id: &str, method: TwoFactorMethod) -> Result<(), TwoFactorError> {
        let updated = self
            .store
            .set_two_factor_enabled(user_id, true, method, Some(self.clock.now()))
            .await?;
        if !updated {
            return Err(TwoFactorError::NotEnrolled);
        }
        tracing::info!(user_id, method = %method, "Two-factor enabled");
        Ok(())
    }

    pub async fn disable(&self, user_id: &str) -> Result<(), TwoFactorError> {
        let record = self
            .store
            .find_two_factor(user_id)
            .await?
            .ok_or(TwoFactorError::NotEnrolled)?;
        self.store
            .set_two_factor_enabled(user_id, false, record.method, None)
            .await?;
        tracing::info!(user_id, "Two-factor disabled");
        Ok(())
    }

    /// Replace every backup code; previously issued codes stop working
    /// immediately.
    pub async fn regenerate_backup_codes(&self, user_id: &str) -> Result<Vec<String>, TwoFactorError> {
        let codes = generate_backup_codes();
        let encrypted = self.encrypt_codes(&codes)?;
        if !self.store.replace_backup_codes(user_id, &encrypted).await? {
            return Err(TwoFactorError::NotEnrolled);
        }
        tracing::info!(user_id, "Backup codes regenerated");
        Ok(codes)
    }

    async fn verify_record(
        &self,
        record: &TwoFactorRecord,
        token: &str,
    ) -> Result<bool, TwoFactorError> {
        let now = self.clock.now();

        match self.check_totp(record, token) {
            Ok(true) => {
                self.store.touch_two_factor(&record.user_id, now).await?;
                return Ok(true);
            }
            Ok(false) => {}
            Err(TwoFactorError::ProviderUnavailable) => {
                tracing::warn!("TOTP provider unavailable, trying backup codes only");
            }
            Err(e) => return Err(e),
        }

        if token.len() != BACKUP_CODE_DIGITS {
            return Ok(false);
        }

        for ciphertext in record.unused_backup_codes() {
            let code = match self.encryption.decrypt_with_master(ciphertext) {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable backup code");
                    continue;
                }
            };
            if bool::from(code.as_bytes().ct_eq(token.as_bytes())) {
                let consumed = self
                    .store
                    .consume_backup_code(&record.user_id, ciphertext, now)
                    .await?;
                if consumed {
                    tracing::info!(user_id = %record.user_id, "Backup code used");
                }
                return Ok(consumed);
            }
        }
        Ok(false)
    }

    fn check_totp(&self, record: &TwoFactorRecord, token: &str) -> Result<bool, TwoFactorError> {
        let Some(encrypted) = record.totp_secret.as_deref() else {
            return Ok(false);
        };
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }
        if !self.provider.is_available() {
            return Err(TwoFactorError::ProviderUnavailable);
        }
        let secret = self.encryption.decrypt_with_master(encrypted)?;
        self.provider.verify(&secret, token, self.clock.now())
    }

    fn encrypt_codes(&self, codes: &[String]) -> Result<Vec<String>, TwoFactorError> {
        codes
            .iter()
            .map(|code| self.encryption.encrypt_with_master(code).map_err(Into::into))
            .collect()
    }
}
