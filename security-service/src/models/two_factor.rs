//! Two-factor enrolment record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwoFactorMethod {
    Totp,
    Sms,
    Email,
}

impl TwoFactorMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwoFactorMethod::Totp => "totp",
            TwoFactorMethod::Sms => "sms",
            TwoFactorMethod::Email => "email",
        }
    }
}

impl fmt::Display for TwoFactorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TwoFactorMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "totp" => Ok(TwoFactorMethod::Totp),
            "sms" => Ok(TwoFactorMethod::Sms),
            "email" => Ok(TwoFactorMethod::Email),
            _ => Err(format!("Invalid two-factor method: {}", s)),
        }
    }
}

/// Per-user 2FA state. The TOTP secret and every backup code are stored as
/// ciphertext; `used_backup_codes` holds the ciphertexts already consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoFactorRecord {
    pub user_id: String,
    pub method: TwoFactorMethod,
    pub totp_secret: Option<String>,
    pub backup_codes: Vec<String>,
    pub used_backup_codes: Vec<String>,
    pub enabled: bool,
    pub enabled_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TwoFactorRecord {
    /// Backup code ciphertexts still available for verification.
    pub fn unused_backup_codes(&self) -> impl Iterator<Item = &String> {
        self.backup_codes
            .iter()
            .filter(move |code| !self.used_backup_codes.contains(code))
    }
}
