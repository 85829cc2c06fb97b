//! Backend registry
//!
//! Turns stored backend configurations into live `Storage` instances and owns the
//! process-wide handle to the current default backend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use vault_core::models::StorageBackendConfig;
use vault_core::AppError;
use vault_db::BackendConfigStore;
use vault_storage::{LocalStorage, Storage, StorageFactory};

/// A live backend together with the configuration it was built from.
///
/// `config_id` is `None` when the fallback local backend is serving; records written
/// through it carry no backend id and resolve back to the fallback later.
#[derive(Clone)]
pub struct ResolvedBackend {
    pub config_id: Option<Uuid>,
    pub storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for ResolvedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedBackend")
            .field("config_id", &self.config_id)
            .field("backend_type", &self.storage.backend_type())
            .finish()
    }
}

/// Registry resolving backend configurations into live backends.
///
/// Constructed once and shared by reference. The cached default is replaced as a
/// whole: `reload` builds the new backend before taking the write lock, so readers see
/// either the old backend or the new one, never a half-built one.
pub struct BackendRegistry {
    store: Arc<dyn BackendConfigStore>,
    factory: Arc<dyn StorageFactory>,
    fallback: Arc<dyn Storage>,
    default: RwLock<Option<ResolvedBackend>>,
    by_id: RwLock<HashMap<Uuid, Arc<dyn Storage>>>,
}

impl BackendRegistry {
    /// Registry whose fallback is a local backend rooted at `fallback_dir`.
    pub fn new(
        store: Arc<dyn BackendConfigStore>,
        factory: Arc<dyn StorageFactory>,
        fallback_dir: impl Into<PathBuf>,
    ) -> Self {
        let fallback: Arc<dyn Storage> = Arc::new(LocalStorage::new(fallback_dir));
        Self::with_fallback(store, factory, fallback)
    }

    pub fn with_fallback(
        store: Arc<dyn BackendConfigStore>,
        factory: Arc<dyn StorageFactory>,
        fallback: Arc<dyn Storage>,
    ) -> Self {
        Self {
            store,
            factory,
            fallback,
            default: RwLock::new(None),
            by_id: RwLock::new(HashMap::new()),
        }
    }

    /// The fixed local backend used whenever no configuration can be resolved.
    pub fn fallback(&self) -> Arc<dyn Storage> {
        self.fallback.clone()
    }

    fn fallback_resolved(&self) -> ResolvedBackend {
        ResolvedBackend {
            config_id: None,
            storage: self.fallback.clone(),
        }
    }

    /// Build a live backend from a stored configuration.
    pub async fn instantiate(
        &self,
        config: &StorageBackendConfig,
    ) -> Result<Arc<dyn Storage>, AppError> {
        let settings = config.settings()?;
        let storage = self.factory.create(&settings).await?;
        Ok(storage)
    }

    /// Backend for new uploads. Never fails: without a usable active default the
    /// fallback local backend serves.
    pub async fn resolve_default(&self) -> ResolvedBackend {
        if let Some(resolved) = self.default.read().await.as_ref() {
            return resolved.clone();
        }

        let mut slot = self.default.write().await;
        if let Some(resolved) = slot.as_ref() {
            return resolved.clone();
        }

        let (resolved, cacheable) = self.build_default().await;
        if cacheable {
            *slot = Some(resolved.clone());
        }
        resolved
    }

    /// Backend a file was written with. Never fails: a missing id, a missing row, a
    /// malformed payload, or a failed construction all resolve to the fallback.
    pub async fn resolve_by_id(&self, id: Option<Uuid>) -> Arc<dyn Storage> {
        let Some(id) = id else {
            return self.fallback.clone();
        };

        if let Some(storage) = self.by_id.read().await.get(&id) {
            return storage.clone();
        }

        let config = match self.store.get(id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                tracing::warn!(
                    backend_id = %id,
                    "Storage backend config not found; using fallback"
                );
                return self.fallback.clone();
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backend_id = %id,
                    "Failed to load storage backend config; using fallback"
                );
                return self.fallback.clone();
            }
        };

        match self.instantiate(&config).await {
            Ok(storage) => {
                self.by_id.write().await.insert(id, storage.clone());
                storage
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backend_id = %id,
                    backend_name = %config.name,
                    "Failed to build storage backend; using fallback"
                );
                self.fallback.clone()
            }
        }
    }

    /// Rebuild the default backend and publish it, dropping every cached instance.
    pub async fn reload(&self) -> ResolvedBackend {
        let (resolved, cacheable) = self.build_default().await;

        *self.default.write().await = cacheable.then(|| resolved.clone());
        self.by_id.write().await.clear();

        tracing::info!(
            backend_id = ?resolved.config_id,
            backend_type = %resolved.storage.backend_type(),
            "Default storage backend reloaded"
        );
        resolved
    }

    /// Forget cached instances built from config `id`.
    pub async fn invalidate(&self, id: Uuid) {
        self.by_id.write().await.remove(&id);

        let mut slot = self.default.write().await;
        if slot.as_ref().and_then(|r| r.config_id) == Some(id) {
            *slot = None;
        }
    }

    /// The second value says whether the result may be cached: store errors and
    /// construction failures are retried on the next call.
    async fn build_default(&self) -> (ResolvedBackend, bool) {
        let config = match self.store.get_default().await {
            Ok(Some(config)) => config,
            Ok(None) => {
                tracing::debug!("No active default storage backend; using fallback");
                return (self.fallback_resolved(), true);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to load default storage backend; using fallback"
                );
                return (self.fallback_resolved(), false);
            }
        };

        match self.instantiate(&config).await {
            Ok(storage) => (
                ResolvedBackend {
                    config_id: Some(config.id),
                    storage,
                },
                true,
            ),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backend_id = %config.id,
                    backend_name = %config.name,
                    "Failed to build default storage backend; using fallback"
                );
                (self.fallback_resolved(), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vault_core::models::{BackendSettings, LocalSettings, NewBackendConfig};
    use vault_core::BackendType;
    use vault_db::MemoryStore;
    use vault_storage::mock::{MockStorage, MockStorageFactory};

    fn local(name: &str) -> NewBackendConfig {
        NewBackendConfig {
            name: name.to_string(),
            settings: BackendSettings::Local(LocalSettings {
                base_dir: format!("/srv/{}", name),
            }),
            description: None,
            is_active: true,
            created_by: None,
        }
    }

    fn registry(store: &MemoryStore, factory: &Arc<MockStorageFactory>) -> BackendRegistry {
        BackendRegistry::with_fallback(
            Arc::new(store.clone()),
            factory.clone(),
            Arc::new(MockStorage::new("fallback")),
        )
    }

    #[tokio::test]
    async fn empty_store_resolves_fallback() {
        let store = MemoryStore::new();
        let factory = Arc::new(MockStorageFactory::new());
        let registry = registry(&store, &factory);

        let resolved = registry.resolve_default().await;
        assert!(resolved.config_id.is_none());
        assert_eq!(factory.build_count(), 0);
    }

    #[tokio::test]
    async fn default_is_cached_until_reload() {
        let store = MemoryStore::new();
        let factory = Arc::new(MockStorageFactory::new());
        let registry = registry(&store, &factory);

        let a = BackendConfigStore::insert(&store, local("a"), true)
            .await
            .unwrap();
        let first = registry.resolve_default().await;
        let second = registry.resolve_default().await;
        assert_eq!(first.config_id, Some(a.id));
        assert_eq!(second.config_id, Some(a.id));
        assert_eq!(factory.build_count(), 1);

        let b = BackendConfigStore::insert(&store, local("b"), false)
            .await
            .unwrap();
        store.set_default(b.id).await.unwrap();
        // Still the cached instance until someone reloads.
        assert_eq!(registry.resolve_default().await.config_id, Some(a.id));

        let reloaded = registry.reload().await;
        assert_eq!(reloaded.config_id, Some(b.id));
        assert_eq!(registry.resolve_default().await.config_id, Some(b.id));
    }

    #[tokio::test]
    async fn resolve_by_id_falls_back_for_missing_and_malformed() {
        let store = MemoryStore::new();
        let factory = Arc::new(MockStorageFactory::new());
        let registry = registry(&store, &factory);
        let fallback = registry.fallback();

        let missing = registry.resolve_by_id(Some(Uuid::new_v4())).await;
        assert!(Arc::ptr_eq(&missing, &fallback));
        assert!(Arc::ptr_eq(&registry.resolve_by_id(None).await, &fallback));

        let now = Utc::now();
        let broken = StorageBackendConfig {
            id: Uuid::new_v4(),
            name: "broken".to_string(),
            backend_type: BackendType::S3,
            config: serde_json::json!({"bucket_name": 42}),
            is_active: true,
            is_default: false,
            description: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        store.put_backend(broken.clone());
        let resolved = registry.resolve_by_id(Some(broken.id)).await;
        assert!(Arc::ptr_eq(&resolved, &fallback));
    }

    #[tokio::test]
    async fn resolve_by_id_serves_inactive_configs() {
        let store = MemoryStore::new();
        let factory = Arc::new(MockStorageFactory::new());
        let registry = registry(&store, &factory);

        let mut old = local("old");
        old.is_active = false;
        let old = BackendConfigStore::insert(&store, old, false)
            .await
            .unwrap();
        let storage = registry.resolve_by_id(Some(old.id)).await;
        assert!(!Arc::ptr_eq(&storage, &registry.fallback()));

        registry.resolve_by_id(Some(old.id)).await;
        assert_eq!(factory.build_count(), 1);
    }

    #[tokio::test]
    async fn failed_build_is_not_cached() {
        let store = MemoryStore::new();
        let factory = Arc::new(MockStorageFactory::new());
        let registry = registry(&store, &factory);
        let a = BackendConfigStore::insert(&store, local("a"), true)
            .await
            .unwrap();

        factory.set_fail_builds(true);
        assert!(registry.resolve_default().await.config_id.is_none());

        factory.set_fail_builds(false);
        assert_eq!(registry.resolve_default().await.config_id, Some(a.id));
    }

    #[tokio::test]
    async fn invalidate_drops_cached_default() {
        let store = MemoryStore::new();
        let factory = Arc::new(MockStorageFactory::new());
        let registry = registry(&store, &factory);
        let a = BackendConfigStore::insert(&store, local("a"), true)
            .await
            .unwrap();

        registry.resolve_default().await;
        registry.invalidate(a.id).await;
        registry.resolve_default().await;
        assert_eq!(factory.build_count(), 2);
    }
}
