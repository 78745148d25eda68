//! Versioned encryption keys and phased re-encryption.
//!
//! Activation of a new key is a compare-and-swap in the store. Re-encryption
//! then walks every record still below the new version with a keyset cursor,
//! so an interrupted run is resumed by simply scanning again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use secrecy::SecretString;
use serde::Serialize;
use uuid::Uuid;

use super::encryption::EncryptionService;
use super::error::{CryptoError, ServiceError};
use crate::clock::Clock;
use crate::models::{EncryptedRecord, EncryptionKey};
use crate::store::{EncryptedRecordStore, KeyStore, StoreError};

const KEY_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub interval_days: u32,
    pub batch_size: u32,
    pub batch_delay: Duration,
    /// Share of attempted records that must migrate for a rotation that hit
    /// errors to still count as successful. `0.0` accepts any progress.
    pub min_success_ratio: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval_days: 90,
            batch_size: 100,
            batch_delay: Duration::from_millis(100),
            min_success_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationResult {
    pub success: bool,
    pub old_version: i32,
    pub new_version: i32,
    pub records_re_encrypted: u64,
    pub records_failed: u64,
    pub errors: Vec<String>,
}

impl RotationResult {
    fn finish(mut self, min_success_ratio: f64) -> Self {
        let attempted = self.records_re_encrypted + self.records_failed;
        self.success = if self.errors.is_empty() {
            true
        } else if self.records_re_encrypted == 0 || attempted == 0 {
            false
        } else {
            self.records_re_encrypted as f64 / attempted as f64 >= min_success_ratio
        };
        self
    }
}

#[derive(Clone)]
pub struct KeyRotationManager {
    keys: Arc<dyn KeyStore>,
    records: Arc<dyn EncryptedRecordStore>,
    encryption: Arc<EncryptionService>,
    clock: Arc<dyn Clock>,
    config: RotationConfig,
}

impl KeyRotationManager {
    pub fn new(
        keys: Arc<dyn KeyStore>,
        records: Arc<dyn EncryptedRecordStore>,
        encryption: Arc<EncryptionService>,
        clock: Arc<dyn Clock>,
        config: RotationConfig,
    ) -> Self {
        Self {
            keys,
            records,
            encryption,
            clock,
            config,
        }
    }

    /// 256 bits of key material, hex encoded.
    pub fn generate_new_key() -> String {
        let mut bytes = [0u8; KEY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Active key material. Falls back to the configured master key when the
    /// key store is unreachable or holds no key yet.
    pub async fn current_key(&self) -> Result<SecretString, CryptoError> {
        match self.keys.active_key().await {
            Ok(Some(key)) => return Ok(key.key),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Key store unreachable, using configured key");
            }
        }
        self.encryption
            .master_key()
            .map(|k| SecretString::new(k.to_string()))
    }

    #[tracing::instrument(skip_all)]
    pub async fn rotate_key(&self, new_key: Option<String>) -> Result<RotationResult, ServiceError> {
        let now = self.clock.now();
        let material = new_key.unwrap_or_else(Self::generate_new_key);

        let Some(current) = self.keys.active_key().await? else {
            let initial = EncryptionKey {
                version: 1,
                key: SecretString::new(material),
                is_active: true,
                created_at: now,
                deactivated_at: None,
            };
            self.keys
                .insert_initial_key(&initial)
                .await
                .map_err(conflict_as_rotation)?;
            tracing::info!(version = 1, "Created initial encryption key");
            metrics::counter!("security_key_rotations_total", "outcome" => "initial").increment(1);
            return Ok(RotationResult {
                success: true,
                old_version: 0,
                new_version: 1,
                ..Default::default()
            });
        };

        let next = EncryptionKey {
            version: current.version + 1,
            key: SecretString::new(material),
            is_active: true,
            created_at: now,
            deactivated_at: None,
        };
        self.keys
            .activate_new_key(current.version, &next, now)
            .await
            .map_err(conflict_as_rotation)?;
        tracing::info!(
            old_version = current.version,
            new_version = next.version,
            "Activated new encryption key"
        );

        let mut result = RotationResult {
            old_version: current.version,
            new_version: next.version,
            ..Default::default()
        };
        self.re_encrypt_below(&next, &mut result).await;
        let result = result.finish(self.config.min_success_ratio);

        let outcome = if result.success { "success" } else { "partial" };
        metrics::counter!("security_key_rotations_total", "outcome" => outcome).increment(1);
        if result.success {
            tracing::info!(
                records = result.records_re_encrypted,
                "Key rotation completed"
            );
        } else {
            tracing::error!(
                records = result.records_re_encrypted,
                failed = result.records_failed,
                errors = ?result.errors,
                "Key rotation completed with errors"
            );
        }
        Ok(result)
    }

    /// Rotate when the active key is older than the configured interval, or
    /// create the first key when none exists. A no-op otherwise.
    pub async fn schedule_rotation(&self) -> Result<Option<RotationResult>, ServiceError> {
        let Some(active) = self.keys.active_key().await? else {
            return self.rotate_key(None).await.map(Some);
        };

        let age = active.age_days(self.clock.now());
        if age < f64::from(self.config.interval_days) {
            tracing::debug!(age_days = age, "Key rotation not due");
            return Ok(None);
        }

        tracing::info!(age_days = age, "Rotating encryption key");
        self.rotate_key(None).await.map(Some)
    }

    /// Re-encrypt whatever an earlier interrupted rotation left behind.
    pub async fn resume_pending(&self) -> Result<RotationResult, ServiceError> {
        let active = self
            .keys
            .active_key()
            .await?
            .ok_or(ServiceError::Crypto(CryptoError::KeyNotConfigured))?;
        let mut result = RotationResult {
            old_version: active.version,
            new_version: active.version,
            ..Default::default()
        };
        self.re_encrypt_below(&active, &mut result).await;
        Ok(result.finish(self.config.min_success_ratio))
    }

    async fn re_encrypt_below(&self, target: &EncryptionKey, result: &mut RotationResult) {
        let mut key_cache: HashMap<i32, EncryptionKey> = HashMap::new();
        let mut cursor: Option<Uuid> = None;
        let batch_size = self.config.batch_size.max(1);

        loop {
            let batch = match self
                .records
                .records_below_version(target.version, cursor, batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    result.errors.push(format!("Failed to fetch records: {}", e));
                    break;
                }
            };
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.id);
            let full_batch = batch.len() as u32 >= batch_size;

            for record in &batch {
                match self.re_encrypt_one(record, target, &mut key_cache).await {
                    Ok(()) => result.records_re_encrypted += 1,
                    Err(e) => {
                        result.records_failed += 1;
                        result
                            .errors
                            .push(format!("Error re-encrypting record {}: {}", record.id, e));
                    }
                }
            }

            if !full_batch {
                break;
            }
            tokio::time::sleep(self.config.batch_delay).await;
        }
    }

    async fn re_encrypt_one(
        &self,
        record: &EncryptedRecord,
        target: &EncryptionKey,
        key_cache: &mut HashMap<i32, EncryptionKey>,
    ) -> Result<(), ServiceError> {
        if !key_cache.contains_key(&record.key_version) {
            let key = self
                .keys
                .key_by_version(record.key_version)
                .await?
                .ok_or_else(|| {
                    StoreError::NotFound(format!("key version {}", record.key_version))
                })?;
            key_cache.insert(record.key_version, key);
        }
        let source = &key_cache[&record.key_version];

        let plaintext = self.encryption.decrypt(&record.ciphertext, source.material())?;
        let ciphertext = self.encryption.encrypt(&plaintext, target.material())?;
        self.records
            .update_record_ciphertext(record.id, &ciphertext, target.version)
            .await?;
        Ok(())
    }
}

fn conflict_as_rotation(err: StoreError) -> ServiceError {
    match err {
        StoreError::Conflict(_) => ServiceError::RotationConflict,
        other => ServiceError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::services::encrypted_fields::EncryptedFieldService;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        manager: KeyRotationManager,
        fields: EncryptedFieldService,
    }

    fn fixture(config: RotationConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let encryption = Arc::new(EncryptionService::new(
            Some(SecretString::new("master".into())),
            1_000,
        ));
        let manager = KeyRotationManager::new(
            store.clone(),
            store.clone(),
            encryption.clone(),
            clock.clone(),
            config,
        );
        let fields = EncryptedFieldService::new(store.clone(), store.clone(), encryption);
        Fixture {
            store,
            clock,
            manager,
            fields,
        }
    }

    fn fast() -> RotationConfig {
        RotationConfig {
            batch_size: 2,
            batch_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn generated_keys_are_256_bit_and_unique() {
        let a = KeyRotationManager::generate_new_key();
        let b = KeyRotationManager::generate_new_key();
        assert_eq!(hex::decode(&a).unwrap().len(), 32);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn first_rotation_creates_version_one() {
        let f = fixture(fast());
        let result = f.manager.rotate_key(None).await.unwrap();
        assert!(result.success);
        assert_eq!((result.old_version, result.new_version), (0, 1));
        assert_eq!(f.store.active_key().await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn rotation_keeps_old_keys_and_a_single_active_one() {
        let f = fixture(fast());
        f.manager.rotate_key(None).await.unwrap();
        f.manager.rotate_key(None).await.unwrap();
        f.manager.rotate_key(None).await.unwrap();

        let keys = f.store.list_keys().await.unwrap();
        let versions: Vec<i32> = keys.iter().map(|k| k.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(keys.iter().filter(|k| k.is_active).count(), 1);
        assert!(keys[2].is_active);
        assert!(keys[0].deactivated_at.is_some());
    }

    #[tokio::test]
    async fn records_are_re_encrypted_across_batches() {
        let f = fixture(fast());
        f.manager.rotate_key(None).await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let record = f
                .fields
                .store_field(&format!("owner-{i}"), "phone", &format!("+91-{i}"))
                .await
                .unwrap();
            ids.push(record.id);
        }

        let result = f.manager.rotate_key(None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.records_re_encrypted, 5);
        assert!(result.errors.is_empty());

        for (i, id) in ids.iter().enumerate() {
            let record = f.store.find_encrypted_record(*id).await.unwrap().unwrap();
            assert_eq!(record.key_version, 2);
            assert_eq!(f.fields.read_field(*id).await.unwrap(), format!("+91-{i}"));
        }
    }

    #[tokio::test]
    async fn bad_records_are_collected_without_aborting() {
        let f = fixture(fast());
        f.manager.rotate_key(None).await.unwrap();
        let good = f.fields.store_field("o1", "phone", "123").await.unwrap();
        f.store
            .insert_encrypted_record(&EncryptedRecord {
                id: Uuid::new_v4(),
                owner_id: "o2".into(),
                field: "phone".into(),
                ciphertext: "garbage".into(),
                key_version: 1,
            })
            .await
            .unwrap();

        let result = f.manager.rotate_key(None).await.unwrap();
        assert_eq!(result.records_re_encrypted, 1);
        assert_eq!(result.records_failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(!result.success, "strict ratio rejects partial migration");
        assert_eq!(f.fields.read_field(good.id).await.unwrap(), "123");
    }

    #[tokio::test]
    async fn lenient_ratio_accepts_partial_progress() {
        let f = fixture(RotationConfig {
            min_success_ratio: 0.0,
            ..fast()
        });
        f.manager.rotate_key(None).await.unwrap();
        f.fields.store_field("o1", "phone", "123").await.unwrap();
        f.store
            .insert_encrypted_record(&EncryptedRecord {
                id: Uuid::new_v4(),
                owner_id: "o2".into(),
                field: "phone".into(),
                ciphertext: "garbage".into(),
                key_version: 1,
            })
            .await
            .unwrap();

        assert!(f.manager.rotate_key(None).await.unwrap().success);
    }

    #[tokio::test]
    async fn schedule_is_a_noop_until_due() {
        let f = fixture(fast());
        assert!(f.manager.schedule_rotation().await.unwrap().is_some());
        assert!(f.manager.schedule_rotation().await.unwrap().is_none());

        f.clock.advance(ChronoDuration::days(90));
        let result = f.manager.schedule_rotation().await.unwrap().unwrap();
        assert_eq!(result.new_version, 2);
        assert!(f.manager.schedule_rotation().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn current_key_falls_back_to_master_when_store_is_down() {
        use secrecy::ExposeSecret;

        let f = fixture(fast());
        f.manager.rotate_key(Some("stored-key".into())).await.unwrap();
        assert_eq!(f.manager.current_key().await.unwrap().expose_secret(), "stored-key");

        f.store.set_available(false);
        assert_eq!(f.manager.current_key().await.unwrap().expose_secret(), "master");
    }

    #[tokio::test]
    async fn concurrent_rotations_cannot_both_activate() {
        let f = fixture(fast());
        f.manager.rotate_key(None).await.unwrap();

        let (a, b) = tokio::join!(f.manager.rotate_key(None), f.manager.rotate_key(None));
        let outcomes = [a.is_ok(), b.is_ok()];
        assert!(outcomes.contains(&true));

        let keys = f.store.list_keys().await.unwrap();
        assert_eq!(keys.iter().filter(|k| k.is_active).count(), 1);
    }
}
