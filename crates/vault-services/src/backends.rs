//! Backend configuration management
//!
//! Create, update, delete and set-default for storage backend configurations, plus
//! connectivity testing and export/import. Every change that moves the default or
//! alters a cached backend is pushed into the registry before returning.

use crate::registry::BackendRegistry;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;
use vault_core::constants::EXPORT_FORMAT_VERSION;
use vault_core::encryption::redact_sensitive_json;
use vault_core::models::{
    BackendConfigChanges, BackendSettings, CreateBackendRequest, CredentialExport,
    ExportDocument, ExportedBackend, ImportReport, NewBackendConfig, StorageBackendConfig,
    UpdateBackendRequest,
};
use vault_core::{AppError, EncryptionService};
use vault_db::BackendConfigStore;
use vault_storage::StorageFactory;

const NAME_MAX_LEN: usize = 100;

pub struct BackendConfigService {
    store: Arc<dyn BackendConfigStore>,
    registry: Arc<BackendRegistry>,
    factory: Arc<dyn StorageFactory>,
}

enum ImportOutcome {
    Created(StorageBackendConfig),
    Updated(StorageBackendConfig),
    Skipped,
}

fn backend_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Storage backend {} not found", id))
}

fn duplicate_name(name: &str) -> AppError {
    AppError::Conflict(format!("Storage backend named '{}' already exists", name))
}

fn missing_export_key() -> AppError {
    AppError::Configuration("ENCRYPTION_KEY is required for an encrypted export".to_string())
}

fn normalize_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > NAME_MAX_LEN {
        return Err(AppError::Validation(format!(
            "Backend name must be between 1 and {} characters",
            NAME_MAX_LEN
        )));
    }
    Ok(name.to_string())
}

/// Copy keys present in `existing` but absent from `incoming`, so a redacted
/// export can be re-applied over the configuration it came from.
fn fill_missing_keys(incoming: &Value, existing: &Value) -> Value {
    let mut merged = incoming.clone();
    if let (Some(target), Some(source)) = (merged.as_object_mut(), existing.as_object()) {
        for (key, value) in source {
            target.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    merged
}

impl BackendConfigService {
    pub fn new(
        store: Arc<dyn BackendConfigStore>,
        registry: Arc<BackendRegistry>,
        factory: Arc<dyn StorageFactory>,
    ) -> Self {
        Self {
            store,
            registry,
            factory,
        }
    }

    /// All configurations, default first, then newest first.
    pub async fn list(&self) -> Result<Vec<StorageBackendConfig>, AppError> {
        self.store.list().await
    }

    pub async fn get(&self, id: Uuid) -> Result<StorageBackendConfig, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| backend_not_found(id))
    }

    /// Create a configuration. The first configuration ever created becomes the default.
    #[tracing::instrument(skip(self, request), fields(backend.name = %request.name))]
    pub async fn create(
        &self,
        request: CreateBackendRequest,
    ) -> Result<StorageBackendConfig, AppError> {
        request.validate()?;
        request.settings.validate()?;
        let name = normalize_name(&request.name)?;

        if self.store.name_taken(&name, None).await? {
            return Err(duplicate_name(&name));
        }

        let first = self.store.count().await? == 0;
        let make_default = request.is_default || first;
        let new = NewBackendConfig {
            name,
            settings: request.settings,
            description: request.description,
            is_active: request.is_active.unwrap_or(request.is_default),
            created_by: request.created_by,
        };

        let config = self.store.insert(new, make_default).await?;
        if config.is_default {
            self.registry.reload().await;
        }

        Ok(config)
    }

    /// Update a configuration.
    ///
    /// `is_default = Some(true)` makes it the default. Clearing the flag on the current
    /// default, or deactivating it, is rejected: another backend has to be made default
    /// instead.
    #[tracing::instrument(skip(self, request), fields(backend_id = %id))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateBackendRequest,
    ) -> Result<StorageBackendConfig, AppError> {
        request.validate()?;
        if let Some(settings) = &request.settings {
            settings.validate()?;
        }

        let existing = self.get(id).await?;

        if request.is_default == Some(false) && existing.is_default {
            return Err(AppError::Validation(
                "At least one default backend must remain; set another backend as default instead"
                    .to_string(),
            ));
        }
        let will_be_default = existing.is_default || request.is_default == Some(true);
        if request.is_active == Some(false) && will_be_default {
            return Err(AppError::Validation(
                "The default backend must stay active".to_string(),
            ));
        }

        let name = match &request.name {
            Some(name) => {
                let name = normalize_name(name)?;
                if name != existing.name && self.store.name_taken(&name, Some(id)).await? {
                    return Err(duplicate_name(&name));
                }
                Some(name)
            }
            None => None,
        };

        let settings_changed = request.settings.is_some();
        let changes = BackendConfigChanges {
            name,
            settings: request.settings,
            description: request.description.map(|d| d.trim().to_string()),
            is_active: request.is_active,
        };
        let mut config = self
            .store
            .update(id, changes)
            .await?
            .ok_or_else(|| backend_not_found(id))?;

        if request.is_default == Some(true) && !existing.is_default {
            config = self
                .store
                .set_default(id)
                .await?
                .ok_or_else(|| backend_not_found(id))?;
            self.registry.reload().await;
        } else if settings_changed {
            self.registry.invalidate(id).await;
            if config.is_default {
                self.registry.reload().await;
            }
        }

        Ok(config)
    }

    /// Delete a configuration. The default cannot be deleted.
    #[tracing::instrument(skip(self), fields(backend_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let existing = self.get(id).await?;
        if existing.is_default {
            return Err(AppError::Validation(
                "Cannot delete the default storage backend; set another backend as default first"
                    .to_string(),
            ));
        }

        if !self.store.delete(id).await? {
            return Err(backend_not_found(id));
        }
        self.registry.invalidate(id).await;

        tracing::info!(
            backend_id = %id,
            backend_name = %existing.name,
            "Storage backend config deleted"
        );
        Ok(())
    }

    /// Make `id` the single default (and active) configuration.
    #[tracing::instrument(skip(self), fields(backend_id = %id))]
    pub async fn set_default(&self, id: Uuid) -> Result<StorageBackendConfig, AppError> {
        let config = self
            .store
            .set_default(id)
            .await?
            .ok_or_else(|| backend_not_found(id))?;
        self.registry.reload().await;
        Ok(config)
    }

    /// Build the stored configuration and check that its backend is reachable.
    pub async fn test_connection(&self, id: Uuid) -> Result<(), AppError> {
        let config = self.get(id).await?;
        let settings = config.settings()?;
        self.test_settings(&settings).await?;

        tracing::info!(
            backend_id = %id,
            backend_name = %config.name,
            "Storage backend connectivity OK"
        );
        Ok(())
    }

    /// Check connectivity for settings that are not stored yet.
    pub async fn test_settings(&self, settings: &BackendSettings) -> Result<(), AppError> {
        settings.validate()?;
        let storage = self
            .factory
            .create(settings)
            .await
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        storage
            .check_connectivity()
            .await
            .map_err(|e| AppError::Configuration(e.to_string()))
    }

    /// Export every configuration.
    pub async fn export(
        &self,
        credentials: CredentialExport,
        encryption: Option<&EncryptionService>,
    ) -> Result<ExportDocument, AppError> {
        if credentials == CredentialExport::Encrypted && encryption.is_none() {
            return Err(missing_export_key());
        }

        let configs = self.store.list().await?;
        let mut backends = Vec::with_capacity(configs.len());
        for config in configs {
            let (payload, encrypted_credentials) = match credentials {
                CredentialExport::Plaintext => (config.config.clone(), None),
                CredentialExport::Redacted => (redact_sensitive_json(&config.config), None),
                CredentialExport::Encrypted => match encryption {
                    Some(service) => service.encrypt_sensitive_json(&config.config)?,
                    None => return Err(missing_export_key()),
                },
            };

            backends.push(ExportedBackend {
                name: config.name,
                backend_type: config.backend_type,
                config: payload,
                description: config.description,
                is_active: config.is_active,
                is_default: config.is_default,
                encrypted_credentials,
            });
        }

        tracing::info!(
            total = backends.len(),
            mode = ?credentials,
            "Storage backend configs exported"
        );

        Ok(ExportDocument {
            version: EXPORT_FORMAT_VERSION.to_string(),
            export_time: Utc::now(),
            total_count: backends.len(),
            backends,
        })
    }

    /// Import an export document, matching entries to existing configs by name.
    ///
    /// Existing entries are overwritten only with `replace_existing`. Entries that fail
    /// are reported and do not stop the rest. If several entries ask to be default the
    /// last one wins; if the store ends up without a default, the first stored config
    /// is promoted.
    #[tracing::instrument(skip(self, document, encryption), fields(entries = document.backends.len()))]
    pub async fn import(
        &self,
        document: ExportDocument,
        replace_existing: bool,
        encryption: Option<&EncryptionService>,
    ) -> Result<ImportReport, AppError> {
        let mut report = ImportReport::default();
        let mut wanted_default: Option<Uuid> = None;

        for entry in &document.backends {
            match self.import_entry(entry, replace_existing, encryption).await {
                Ok(ImportOutcome::Created(config)) => {
                    if entry.is_default {
                        wanted_default = Some(config.id);
                    }
                    report.created.push(config.name);
                }
                Ok(ImportOutcome::Updated(config)) => {
                    if entry.is_default {
                        wanted_default = Some(config.id);
                    }
                    self.registry.invalidate(config.id).await;
                    report.updated.push(config.name);
                }
                Ok(ImportOutcome::Skipped) => report.skipped.push(entry.name.clone()),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        backend_name = %entry.name,
                        "Backend import entry failed"
                    );
                    report.errors.push(format!("{}: {}", entry.name, e));
                }
            }
        }

        match wanted_default {
            Some(id) => {
                self.store.set_default(id).await?;
            }
            None => {
                let configs = self.store.list().await?;
                if !configs.iter().any(|c| c.is_default) {
                    if let Some(first) = configs.last() {
                        self.store.set_default(first.id).await?;
                    }
                }
            }
        }
        self.registry.reload().await;

        tracing::info!(
            created = report.created.len(),
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Storage backend configs imported"
        );

        Ok(report)
    }

    async fn import_entry(
        &self,
        entry: &ExportedBackend,
        replace_existing: bool,
        encryption: Option<&EncryptionService>,
    ) -> Result<ImportOutcome, AppError> {
        let name = normalize_name(&entry.name)?;

        let payload = match entry.encrypted_credentials.as_deref() {
            Some(blob) if !blob.is_empty() => {
                let service = encryption.ok_or_else(|| {
                    AppError::Configuration(
                        "Entry carries encrypted credentials but no ENCRYPTION_KEY is configured"
                            .to_string(),
                    )
                })?;
                service.decrypt_and_merge_json(&entry.config, Some(blob))?
            }
            _ => entry.config.clone(),
        };

        match self.store.get_by_name(&name).await? {
            Some(existing) if !replace_existing => {
                tracing::debug!(
                    backend_id = %existing.id,
                    backend_name = %name,
                    "Existing backend kept"
                );
                Ok(ImportOutcome::Skipped)
            }
            Some(existing) => {
                let payload = if existing.backend_type == entry.backend_type {
                    fill_missing_keys(&payload, &existing.config)
                } else {
                    payload
                };
                let settings = BackendSettings::from_json(entry.backend_type, &payload)?;
                let changes = BackendConfigChanges {
                    name: None,
                    settings: Some(settings),
                    description: entry.description.clone(),
                    is_active: Some(entry.is_active || existing.is_default),
                };
                let config = self
                    .store
                    .update(existing.id, changes)
                    .await?
                    .ok_or_else(|| backend_not_found(existing.id))?;
                Ok(ImportOutcome::Updated(config))
            }
            None => {
                let settings = BackendSettings::from_json(entry.backend_type, &payload)?;
                let new = NewBackendConfig {
                    name,
                    settings,
                    description: entry.description.clone(),
                    is_active: entry.is_active,
                    created_by: None,
                };
                let config = self.store.insert(new, false).await?;
                Ok(ImportOutcome::Created(config))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_core::models::{LocalSettings, S3Settings};
    use vault_db::MemoryStore;
    use vault_storage::mock::{MockStorage, MockStorageFactory};

    struct Fixture {
        store: MemoryStore,
        factory: Arc<MockStorageFactory>,
        registry: Arc<BackendRegistry>,
        service: BackendConfigService,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let factory = Arc::new(MockStorageFactory::new());
        let registry = Arc::new(BackendRegistry::with_fallback(
            Arc::new(store.clone()),
            factory.clone(),
            Arc::new(MockStorage::new("fallback")),
        ));
        let service =
            BackendConfigService::new(Arc::new(store.clone()), registry.clone(), factory.clone());
        Fixture {
            store,
            factory,
            registry,
            service,
        }
    }

    fn local_settings(dir: &str) -> BackendSettings {
        BackendSettings::Local(LocalSettings {
            base_dir: dir.to_string(),
        })
    }

    fn s3_settings() -> BackendSettings {
        BackendSettings::S3(S3Settings {
            bucket_name: "notes".to_string(),
            access_key: "AKIA123".to_string(),
            secret_key: "wJalrXUtnFEMI".to_string(),
            endpoint_url: Some("http://minio:9000".to_string()),
            region_name: "us-east-1".to_string(),
            public_url: None,
            force_path_style: true,
        })
    }

    fn create(name: &str, settings: BackendSettings, is_default: bool) -> CreateBackendRequest {
        CreateBackendRequest {
            name: name.to_string(),
            settings,
            description: None,
            is_default,
            is_active: None,
            created_by: None,
        }
    }

    fn default_count(store: &MemoryStore) -> usize {
        store.backends().iter().filter(|c| c.is_default).count()
    }

    #[tokio::test]
    async fn blank_description_clears_it() {
        let f = fixture();
        let mut request = create("a", local_settings("/a"), true);
        request.description = Some("Primary disk".to_string());
        let a = f.service.create(request).await.unwrap();
        assert_eq!(a.description.as_deref(), Some("Primary disk"));

        let renamed = f
            .service
            .update(
                a.id,
                UpdateBackendRequest {
                    name: Some("b".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.description.as_deref(), Some("Primary disk"));

        let cleared = f
            .service
            .update(
                a.id,
                UpdateBackendRequest {
                    description: Some("  ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.description, None);
    }

    #[tokio::test]
    async fn first_config_becomes_default() {
        let f = fixture();
        let a = f
            .service
            .create(create("a", local_settings("/a"), false))
            .await
            .unwrap();
        assert!(a.is_default && a.is_active);

        let b = f
            .service
            .create(create("b", local_settings("/b"), false))
            .await
            .unwrap();
        assert!(!b.is_default && !b.is_active);
        assert_eq!(default_count(&f.store), 1);
    }

    #[tokio::test]
    async fn duplicate_name_is_conflict() {
        let f = fixture();
        f.service
            .create(create("primary", local_settings("/a"), true))
            .await
            .unwrap();
        let err = f
            .service
            .create(create("primary", local_settings("/b"), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let b = f
            .service
            .create(create("secondary", local_settings("/b"), false))
            .await
            .unwrap();
        let err = f
            .service
            .update(
                b.id,
                UpdateBackendRequest {
                    name: Some("primary".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let f = fixture();
        let err = f
            .service
            .create(create("bad", local_settings(""), true))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(f.store.backends().len(), 0);
    }

    #[tokio::test]
    async fn default_cannot_be_cleared_deactivated_or_deleted() {
        let f = fixture();
        let a = f
            .service
            .create(create("a", local_settings("/a"), true))
            .await
            .unwrap();

        let clear = UpdateBackendRequest {
            is_default: Some(false),
            ..Default::default()
        };
        assert!(matches!(
            f.service.update(a.id, clear).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let deactivate = UpdateBackendRequest {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(matches!(
            f.service.update(a.id, deactivate).await.unwrap_err(),
            AppError::Validation(_)
        ));

        assert!(matches!(
            f.service.delete(a.id).await.unwrap_err(),
            AppError::Validation(_)
        ));
        assert_eq!(default_count(&f.store), 1);
    }

    #[tokio::test]
    async fn set_default_via_update_reloads_registry() {
        let f = fixture();
        let a = f
            .service
            .create(create("a", local_settings("/a"), true))
            .await
            .unwrap();
        let b = f
            .service
            .create(create("b", local_settings("/b"), false))
            .await
            .unwrap();
        assert_eq!(f.registry.resolve_default().await.config_id, Some(a.id));

        let b = f
            .service
            .update(
                b.id,
                UpdateBackendRequest {
                    is_default: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(b.is_default && b.is_active);
        assert_eq!(f.registry.resolve_default().await.config_id, Some(b.id));
        assert!(!f.service.get(a.id).await.unwrap().is_default);
    }

    #[tokio::test]
    async fn delete_non_default_and_missing() {
        let f = fixture();
        f.service
            .create(create("a", local_settings("/a"), true))
            .await
            .unwrap();
        let b = f
            .service
            .create(create("b", local_settings("/b"), false))
            .await
            .unwrap();

        f.service.delete(b.id).await.unwrap();
        assert!(matches!(
            f.service.delete(b.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            f.service.set_default(Uuid::new_v4()).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_connection_maps_failures_to_configuration() {
        let f = fixture();
        let a = f
            .service
            .create(create("a", local_settings("/a"), true))
            .await
            .unwrap();
        f.service.test_connection(a.id).await.unwrap();

        f.factory
            .storage_for(&local_settings("/a"))
            .set_fail_connectivity(true);
        assert!(matches!(
            f.service.test_connection(a.id).await.unwrap_err(),
            AppError::Configuration(_)
        ));
    }

    #[tokio::test]
    async fn export_modes_handle_credentials() {
        let f = fixture();
        f.service
            .create(create("s3", s3_settings(), true))
            .await
            .unwrap();

        let plain = f
            .service
            .export(CredentialExport::Plaintext, None)
            .await
            .unwrap();
        assert_eq!(plain.version, "1.0");
        assert_eq!(plain.total_count, 1);
        assert_eq!(plain.backends[0].config["secret_key"], "wJalrXUtnFEMI");

        let redacted = f
            .service
            .export(CredentialExport::Redacted, None)
            .await
            .unwrap();
        assert!(redacted.backends[0].config.get("secret_key").is_none());
        assert!(redacted.backends[0].config.get("access_key").is_none());
        assert_eq!(redacted.backends[0].config["bucket_name"], "notes");

        assert!(matches!(
            f.service
                .export(CredentialExport::Encrypted, None)
                .await
                .unwrap_err(),
            AppError::Configuration(_)
        ));

        let key = EncryptionService::from_key_bytes(b"01234567890123456789012345678901").unwrap();
        let encrypted = f
            .service
            .export(CredentialExport::Encrypted, Some(&key))
            .await
            .unwrap();
        assert!(encrypted.backends[0].config.get("secret_key").is_none());
        assert!(encrypted.backends[0].encrypted_credentials.is_some());
    }

    #[tokio::test]
    async fn import_round_trips_encrypted_export() {
        let source = fixture();
        source
            .service
            .create(create("s3", s3_settings(), true))
            .await
            .unwrap();
        source
            .service
            .create(create("disk", local_settings("/disk"), false))
            .await
            .unwrap();
        let key = EncryptionService::from_key_bytes(b"01234567890123456789012345678901").unwrap();
        let document = source
            .service
            .export(CredentialExport::Encrypted, Some(&key))
            .await
            .unwrap();

        let target = fixture();
        let report = target
            .service
            .import(document, false, Some(&key))
            .await
            .unwrap();
        assert_eq!(report.created.len(), 2);
        assert!(report.errors.is_empty());

        let s3 = target.store.get_by_name("s3").await.unwrap().unwrap();
        assert!(s3.is_default);
        assert_eq!(s3.settings().unwrap(), s3_settings());
        assert_eq!(default_count(&target.store), 1);
    }

    #[tokio::test]
    async fn import_skips_or_replaces_and_last_default_wins() {
        let f = fixture();
        let a = f
            .service
            .create(create("a", local_settings("/a"), true))
            .await
            .unwrap();

        let entry = |name: &str, dir: &str, is_default: bool| ExportedBackend {
            name: name.to_string(),
            backend_type: vault_core::BackendType::Local,
            config: serde_json::json!({ "base_dir": dir }),
            description: None,
            is_active: true,
            is_default,
            encrypted_credentials: None,
        };
        let document = ExportDocument {
            version: "1.0".to_string(),
            export_time: Utc::now(),
            total_count: 4,
            backends: vec![
                entry("a", "/a2", false),
                entry("b", "/b", true),
                entry("c", "/c", true),
                entry("broken", "", false),
            ],
        };

        let report = f
            .service
            .import(document.clone(), false, None)
            .await
            .unwrap();
        assert_eq!(report.skipped, vec!["a".to_string()]);
        assert_eq!(report.created, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("broken:"));

        let c = f.store.get_by_name("c").await.unwrap().unwrap();
        assert!(c.is_default);
        assert_eq!(default_count(&f.store), 1);
        assert_eq!(f.registry.resolve_default().await.config_id, Some(c.id));

        let report = f.service.import(document, true, None).await.unwrap();
        assert_eq!(report.updated.len(), 3);
        let a = f.service.get(a.id).await.unwrap();
        assert_eq!(a.settings().unwrap(), local_settings("/a2"));
    }

    #[tokio::test]
    async fn redacted_import_reuses_existing_secrets() {
        let f = fixture();
        f.service
            .create(create("s3", s3_settings(), true))
            .await
            .unwrap();
        let document = f
            .service
            .export(CredentialExport::Redacted, None)
            .await
            .unwrap();

        let report = f
            .service
            .import(document.clone(), true, None)
            .await
            .unwrap();
        assert_eq!(report.updated, vec!["s3".to_string()]);
        let s3 = f.store.get_by_name("s3").await.unwrap().unwrap();
        assert_eq!(s3.settings().unwrap(), s3_settings());

        // Without an existing config there is nothing to fill the secrets from.
        let empty = fixture();
        let report = empty.service.import(document, false, None).await.unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.errors.len(), 1);
    }
}
