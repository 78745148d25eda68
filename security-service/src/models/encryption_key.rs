use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

/// A versioned data-encryption key. Old versions are never deleted; records
/// encrypted under them stay readable until re-encrypted.
#[derive(Debug, Clone)]
pub struct EncryptionKey {
    pub version: i32,
    pub key: SecretString,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl EncryptionKey {
    pub fn material(&self) -> &str {
        self.key.expose_secret()
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 86_400.0
    }
}

/// A value encrypted at rest, tagged with the key version it was written
/// under so decryption never has to guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub field: String,
    pub ciphertext: String,
    pub key_version: i32,
}
