//! Authenticated encryption and slow one-way hashing for secrets at rest.
//!
//! Ciphertext armour is `base64(salt[16] || iv[12] || tag[16] || ciphertext)`.
//! The AES-256-GCM key is derived per call from the caller's key and the
//! random salt with PBKDF2-HMAC-SHA256, so two encryptions of the same
//! plaintext never share a key or nonce.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::error::CryptoError;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const HASH_LEN: usize = 32;
const MIN_HASH_SALT_LEN: usize = 8;

pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Output of [`EncryptionService::hash`]. Both fields are needed to verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashedValue {
    pub hash: String,
    pub salt: String,
}

#[derive(Debug, Clone)]
pub struct EncryptionService {
    master_key: Option<SecretString>,
    kdf_iterations: u32,
}

impl EncryptionService {
    pub fn new(master_key: Option<SecretString>, kdf_iterations: u32) -> Self {
        Self {
            master_key,
            kdf_iterations: kdf_iterations.max(1),
        }
    }

    /// The statically configured master key.
    pub fn master_key(&self) -> Result<&str, CryptoError> {
        match &self.master_key {
            Some(key) if !key.expose_secret().is_empty() => Ok(key.expose_secret()),
            _ => Err(CryptoError::KeyNotConfigured),
        }
    }

    pub fn has_master_key(&self) -> bool {
        self.master_key().is_ok()
    }

    pub fn encrypt(&self, plaintext: &str, key: &str) -> Result<String, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::KeyNotConfigured);
        }

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let cipher = self.cipher(key, &salt)?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("AES-GCM encrypt: {e}")))?;

        // aes-gcm appends the tag; the armour carries it ahead of the body.
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut armour = Vec::with_capacity(SALT_LEN + IV_LEN + sealed.len());
        armour.extend_from_slice(&salt);
        armour.extend_from_slice(&iv);
        armour.extend_from_slice(tag);
        armour.extend_from_slice(body);
        Ok(STANDARD.encode(armour))
    }

    pub fn decrypt(&self, armoured: &str, key: &str) -> Result<String, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::KeyNotConfigured);
        }

        let raw = STANDARD
            .decode(armoured.trim())
            .map_err(|_| CryptoError::InvalidFormat)?;
        if raw.len() < SALT_LEN + IV_LEN + TAG_LEN {
            return Err(CryptoError::InvalidFormat);
        }

        let (salt, rest) = raw.split_at(SALT_LEN);
        let (iv, rest) = rest.split_at(IV_LEN);
        let (tag, body) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(body.len() + TAG_LEN);
        sealed.extend_from_slice(body);
        sealed.extend_from_slice(tag);

        let cipher = self.cipher(key, salt)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(iv), sealed.as_slice())
            .map_err(|_| CryptoError::Decryption)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
    }

    /// Encrypt under the configured master key.
    pub fn encrypt_with_master(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt(plaintext, self.master_key()?)
    }

    pub fn decrypt_with_master(&self, armoured: &str) -> Result<String, CryptoError> {
        self.decrypt(armoured, self.master_key()?)
    }

    /// Salted Argon2id digest for values that are only ever compared.
    /// A fresh random salt is generated when none is supplied.
    pub fn hash(&self, data: &str, salt: Option<&str>) -> Result<HashedValue, CryptoError> {
        let salt = match salt {
            Some(s) => s.to_string(),
            None => {
                let mut bytes = [0u8; SALT_LEN];
                OsRng.fill_bytes(&mut bytes);
                hex::encode(bytes)
            }
        };
        let digest = argon2_digest(data, &salt)?;
        Ok(HashedValue {
            hash: hex::encode(digest),
            salt,
        })
    }

    pub fn verify_hash(&self, data: &str, hash: &str, salt: &str) -> bool {
        let Ok(expected) = hex::decode(hash) else {
            return false;
        };
        match argon2_digest(data, salt) {
            Ok(actual) => actual.as_slice().ct_eq(expected.as_slice()).into(),
            Err(_) => false,
        }
    }

    fn cipher(&self, key: &str, salt: &[u8]) -> Result<Aes256Gcm, CryptoError> {
        let mut derived = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(key.as_bytes(), salt, self.kdf_iterations, &mut derived);
        Aes256Gcm::new_from_slice(&derived)
            .map_err(|e| CryptoError::Encryption(format!("cipher init: {e}")))
    }
}

fn argon2_digest(data: &str, salt: &str) -> Result<[u8; HASH_LEN], CryptoError> {
    if salt.len() < MIN_HASH_SALT_LEN {
        return Err(CryptoError::Encryption(format!(
            "salt must be at least {} bytes",
            MIN_HASH_SALT_LEN
        )));
    }
    let mut out = [0u8; HASH_LEN];
    Argon2::default()
        .hash_password_into(data.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| CryptoError::Encryption(format!("argon2: {e}")))?;
    Ok(out)
}
