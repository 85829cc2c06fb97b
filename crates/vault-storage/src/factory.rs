#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use std::sync::Arc;
use vault_core::models::BackendSettings;

/// Build a live storage backend from validated settings.
pub async fn create_storage(settings: &BackendSettings) -> StorageResult<Arc<dyn Storage>> {
    match settings {
        #[cfg(feature = "storage-local")]
        BackendSettings::Local(local) => {
            if local.base_dir.trim().is_empty() {
                return Err(StorageError::ConfigError(
                    "Local backend base_dir must not be empty".to_string(),
                ));
            }
            Ok(Arc::new(LocalStorage::new(local.base_dir.clone())))
        }

        #[cfg(not(feature = "storage-local"))]
        BackendSettings::Local(_) => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-s3")]
        BackendSettings::S3(s3) => {
            let storage = S3Storage::connect(s3).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        BackendSettings::S3(_) => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),
    }
}

/// Seam for constructing backends, so callers holding a registry can be tested
/// without real object stores.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    async fn create(&self, settings: &BackendSettings) -> StorageResult<Arc<dyn Storage>>;
}

/// Factory that builds the real backends via [`create_storage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStorageFactory;

#[async_trait]
impl StorageFactory for DefaultStorageFactory {
    async fn create(&self, settings: &BackendSettings) -> StorageResult<Arc<dyn Storage>> {
        create_storage(settings).await
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use vault_core::models::LocalSettings;
    use vault_core::BackendType;

    #[tokio::test]
    async fn builds_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let settings = BackendSettings::Local(LocalSettings {
            base_dir: dir.path().to_string_lossy().into_owned(),
        });
        let storage = DefaultStorageFactory.create(&settings).await.unwrap();
        assert_eq!(storage.backend_type(), BackendType::Local);
        storage.check_connectivity().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_blank_base_dir() {
        let settings = BackendSettings::Local(LocalSettings {
            base_dir: "  ".to_string(),
        });
        assert!(matches!(
            create_storage(&settings).await,
            Err(StorageError::ConfigError(_))
        ));
    }
}
