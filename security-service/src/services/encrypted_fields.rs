//! Field values encrypted at rest under a versioned key.

use std::sync::Arc;

use uuid::Uuid;

use super::encryption::EncryptionService;
use super::error::{CryptoError, ServiceError};
use crate::models::EncryptedRecord;
use crate::store::{EncryptedRecordStore, KeyStore, StoreError};

#[derive(Clone)]
pub struct EncryptedFieldService {
    keys: Arc<dyn KeyStore>,
    records: Arc<dyn EncryptedRecordStore>,
    encryption: Arc<EncryptionService>,
}

impl EncryptedFieldService {
    pub fn new(
        keys: Arc<dyn KeyStore>,
        records: Arc<dyn EncryptedRecordStore>,
        encryption: Arc<EncryptionService>,
    ) -> Self {
        Self {
            keys,
            records,
            encryption,
        }
    }

    /// Encrypt under the active key and persist, tagged with its version.
    pub async fn store_field(
        &self,
        owner_id: &str,
        field: &str,
        plaintext: &str,
    ) -> Result<EncryptedRecord, ServiceError> {
        let key = self
            .keys
            .active_key()
            .await?
            .ok_or(CryptoError::KeyNotConfigured)?;
        let record = EncryptedRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            field: field.to_string(),
            ciphertext: self.encryption.encrypt(plaintext, key.material())?,
            key_version: key.version,
        };
        self.records.insert_encrypted_record(&record).await?;
        tracing::debug!(
            owner_id,
            field,
            key_version = key.version,
            "Stored encrypted field"
        );
        Ok(record)
    }

    /// Decrypt with the key version recorded alongside the ciphertext.
    pub async fn read_field(&self, id: Uuid) -> Result<String, ServiceError> {
        let record = self
            .records
            .find_encrypted_record(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("encrypted record {}", id)))?;
        let key = self
            .keys
            .key_by_version(record.key_version)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("key version {}", record.key_version)))?;
        Ok(self.encryption.decrypt(&record.ciphertext, key.material())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use secrecy::SecretString;

    fn service(store: Arc<MemoryStore>) -> EncryptedFieldService {
        EncryptedFieldService::new(
            store.clone(),
            store,
            Arc::new(EncryptionService::new(Some(SecretString::new("m".into())), 1_000)),
        )
    }

    #[tokio::test]
    async fn storing_without_any_key_is_a_configuration_error() {
        let svc = service(Arc::new(MemoryStore::new()));
        let err = svc.store_field("o1", "phone", "1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Crypto(CryptoError::KeyNotConfigured)));
    }

    #[tokio::test]
    async fn stored_field_reads_back() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_initial_key(&crate::models::EncryptionKey {
                version: 1,
                key: SecretString::new("k1".into()),
                is_active: true,
                created_at: chrono::Utc::now(),
                deactivated_at: None,
            })
            .await
            .unwrap();
        let svc = service(store);
        let record = svc.store_field("o1", "phone", "+91 1").await.unwrap();
        assert_eq!(record.key_version, 1);
        assert_ne!(record.ciphertext, "+91 1");
        assert_eq!(svc.read_field(record.id).await.unwrap(), "+91 1");
    }
}
