//! Mock Storage implementation for testing
//!
//! `MockStorage` keeps objects in memory and records every `delete` call so tests can
//! assert how often a backend was asked to remove bytes. `MockStorageFactory` hands out
//! one `MockStorage` per distinct settings payload.

use crate::detector;
use crate::factory::StorageFactory;
use crate::keys::generate_storage_key;
use crate::traits::{Disposition, DownloadInfo, SavedObject, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use vault_core::models::BackendSettings;
use vault_core::BackendType;

/// Mock storage implementation that stores files in memory
pub struct MockStorage {
    label: String,
    files: Arc<Mutex<HashMap<String, Bytes>>>,
    delete_calls: Arc<Mutex<Vec<String>>>,
    backend_type: BackendType,
    public_base: Option<String>,
    fail_saves: AtomicBool,
    fail_deletes: AtomicBool,
    fail_connectivity: AtomicBool,
}

impl MockStorage {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_backend(label, BackendType::Local)
    }

    pub fn with_backend(label: impl Into<String>, backend_type: BackendType) -> Self {
        Self {
            label: label.into(),
            files: Arc::new(Mutex::new(HashMap::new())),
            delete_calls: Arc::new(Mutex::new(Vec::new())),
            backend_type,
            public_base: None,
            fail_saves: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_connectivity: AtomicBool::new(false),
        }
    }

    /// Hand out public URLs under `base`, like an object store would.
    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make `delete` fail internally; it still reports `false` instead of raising.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_connectivity(&self, fail: bool) {
        self.fail_connectivity.store(fail, Ordering::SeqCst);
    }

    /// Check if a file exists in the mock storage
    pub fn has_file(&self, key: &str) -> bool {
        self.files.lock().unwrap().contains_key(key)
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    /// Every path `delete` was called with, in call order.
    pub fn delete_calls(&self) -> Vec<String> {
        self.delete_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn save(
        &self,
        content: Bytes,
        filename: &str,
        content_type: Option<&str>,
        owner: Option<Uuid>,
    ) -> StorageResult<SavedObject> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed(format!(
                "{}: simulated save failure",
                self.label
            )));
        }
        let key = format!(
            "{}/{}",
            self.label,
            generate_storage_key(owner, filename, Utc::now().date_naive())
        );
        let type_info = detector::detect(filename, Some(content.as_ref()), content_type);
        let size = content.len() as u64;
        self.files.lock().unwrap().insert(key.clone(), content);
        Ok(SavedObject {
            storage_path: key,
            size,
            type_info,
        })
    }

    async fn delete(&self, storage_path: &str) -> bool {
        self.delete_calls
            .lock()
            .unwrap()
            .push(storage_path.to_string());
        if self.fail_deletes.load(Ordering::SeqCst) {
            tracing::warn!(storage_path = %storage_path, "Mock delete failed");
            return false;
        }
        self.files.lock().unwrap().remove(storage_path).is_some()
    }

    async fn exists(&self, storage_path: &str) -> bool {
        self.has_file(storage_path)
    }

    async fn read(&self, storage_path: &str) -> StorageResult<Bytes> {
        self.files
            .lock()
            .unwrap()
            .get(storage_path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(storage_path.to_string()))
    }

    async fn get_download_info(
        &self,
        storage_path: &str,
        _filename: Option<&str>,
        _disposition: Disposition,
    ) -> StorageResult<DownloadInfo> {
        if !self.has_file(storage_path) {
            return Err(StorageError::NotFound(storage_path.to_string()));
        }
        Ok(DownloadInfo::Local {
            path: PathBuf::from(storage_path),
        })
    }

    async fn get_public_url(
        &self,
        storage_path: &str,
        _filename: Option<&str>,
        disposition: Disposition,
    ) -> StorageResult<Option<String>> {
        Ok(self.public_base.as_ref().map(|base| {
            format!(
                "{}/{}?disposition={}",
                base,
                storage_path,
                disposition.as_str()
            )
        }))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        if self.fail_connectivity.load(Ordering::SeqCst) {
            return Err(StorageError::ConfigError(format!(
                "{}: simulated unreachable backend",
                self.label
            )));
        }
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        self.backend_type
    }
}

/// Factory returning one shared `MockStorage` per distinct settings payload.
#[derive(Default)]
pub struct MockStorageFactory {
    storages: Mutex<HashMap<String, Arc<MockStorage>>>,
    builds: AtomicUsize,
    fail_builds: AtomicBool,
}

impl MockStorageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(settings: &BackendSettings) -> String {
        settings.to_json().to_string()
    }

    /// The mock behind `settings`, created on first use.
    pub fn storage_for(&self, settings: &BackendSettings) -> Arc<MockStorage> {
        let label = match settings {
            BackendSettings::Local(local) => local.base_dir.clone(),
            BackendSettings::S3(s3) => s3.bucket_name.clone(),
        };
        self.storages
            .lock()
            .unwrap()
            .entry(Self::key(settings))
            .or_insert_with(|| {
                Arc::new(MockStorage::with_backend(label, settings.backend_type()))
            })
            .clone()
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn set_fail_builds(&self, fail: bool) {
        self.fail_builds.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageFactory for MockStorageFactory {
    async fn create(&self, settings: &BackendSettings) -> StorageResult<Arc<dyn Storage>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_builds.load(Ordering::SeqCst) {
            return Err(StorageError::ConfigError(
                "simulated backend construction failure".to_string(),
            ));
        }
        Ok(self.storage_for(settings) as Arc<dyn Storage>)
    }
}
