//! Service wiring
//!
//! Builds every service over one set of stores and one shared registry.

use crate::backends::BackendConfigService;
use crate::download::DownloadService;
use crate::folders::FolderService;
use crate::recycle::RecycleService;
use crate::registry::BackendRegistry;
use crate::upload::UploadService;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use vault_core::{AppError, Config, EncryptionService};
use vault_db::{
    BackendConfigStore, FileStore, FolderStore, PostgresBackendConfigRepository,
    PostgresFileRepository, PostgresFolderRepository,
};
use vault_storage::{DefaultStorageFactory, StorageFactory};

/// Every vault service, sharing one backend registry.
pub struct VaultServices {
    pub registry: Arc<BackendRegistry>,
    pub backends: BackendConfigService,
    pub folders: FolderService,
    pub recycle: RecycleService,
    pub uploads: UploadService,
    pub downloads: DownloadService,
    /// Present when `ENCRYPTION_KEY` is configured.
    pub encryption: Option<EncryptionService>,
}

impl VaultServices {
    /// Wire the Postgres repositories and the real backend factory.
    pub fn from_pool(pool: PgPool, config: &Config) -> Result<Self, AppError> {
        let encryption = config
            .encryption_key()
            .map(EncryptionService::from_base64_key)
            .transpose()?;

        let services = Self::from_stores(
            Arc::new(PostgresBackendConfigRepository::new(pool.clone())),
            Arc::new(PostgresFolderRepository::new(pool.clone())),
            Arc::new(PostgresFileRepository::new(pool)),
            Arc::new(DefaultStorageFactory),
            config.fallback_storage_dir().to_path_buf(),
            config.upload_concurrency(),
        );
        Ok(Self {
            encryption,
            ..services
        })
    }

    pub fn from_stores(
        backend_store: Arc<dyn BackendConfigStore>,
        folder_store: Arc<dyn FolderStore>,
        file_store: Arc<dyn FileStore>,
        factory: Arc<dyn StorageFactory>,
        fallback_dir: PathBuf,
        concurrency: usize,
    ) -> Self {
        let registry = Arc::new(BackendRegistry::new(
            backend_store.clone(),
            factory.clone(),
            fallback_dir,
        ));

        Self {
            backends: BackendConfigService::new(backend_store, registry.clone(), factory),
            folders: FolderService::new(folder_store.clone(), file_store.clone()),
            recycle: RecycleService::new(
                folder_store.clone(),
                file_store.clone(),
                registry.clone(),
                concurrency,
            ),
            uploads: UploadService::new(
                folder_store,
                file_store.clone(),
                registry.clone(),
                concurrency,
            ),
            downloads: DownloadService::new(file_store, registry.clone()),
            registry,
            encryption: None,
        }
    }

    pub fn with_encryption(mut self, encryption: EncryptionService) -> Self {
        self.encryption = Some(encryption);
        self
    }
}
