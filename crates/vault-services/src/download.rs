//! Download resolution
//!
//! A file is always served by the backend it was written with, which may no longer
//! be the default.

use crate::registry::BackendRegistry;
use bytes::Bytes;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;
use vault_core::models::FileRecord;
use vault_core::AppError;
use vault_db::FileStore;
use vault_storage::{Disposition, DownloadInfo};

/// Where a client should fetch a file from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadTarget {
    /// The backend handed out a URL (public or presigned); redirect the client there.
    Redirect { url: String },
    /// The bytes are on this host; stream the file with these headers.
    Local {
        path: PathBuf,
        filename: String,
        mime_type: String,
    },
}

pub struct DownloadService {
    files: Arc<dyn FileStore>,
    registry: Arc<BackendRegistry>,
}

impl DownloadService {
    pub fn new(files: Arc<dyn FileStore>, registry: Arc<BackendRegistry>) -> Self {
        Self { files, registry }
    }

    async fn live_file(&self, owner_id: Uuid, file_id: Uuid) -> Result<FileRecord, AppError> {
        self.files
            .get(owner_id, file_id)
            .await?
            .filter(|f| f.deleted_at.is_none())
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", file_id)))
    }

    #[tracing::instrument(skip(self), fields(owner_id = %owner_id, file_id = %file_id))]
    pub async fn download(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
        disposition: Disposition,
    ) -> Result<DownloadTarget, AppError> {
        let file = self.live_file(owner_id, file_id).await?;
        let storage = self.registry.resolve_by_id(file.storage_backend_id).await;

        if let Some(url) = storage
            .get_public_url(&file.storage_path, Some(&file.filename), disposition)
            .await?
        {
            return Ok(DownloadTarget::Redirect { url });
        }

        let target = match storage
            .get_download_info(&file.storage_path, Some(&file.filename), disposition)
            .await?
        {
            DownloadInfo::Local { path } => DownloadTarget::Local {
                path,
                filename: file.filename,
                mime_type: file.mime_type,
            },
            DownloadInfo::Presigned { url, .. } => DownloadTarget::Redirect { url },
        };
        Ok(target)
    }

    /// Read a live file's bytes back from its backend.
    pub async fn read(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
    ) -> Result<(FileRecord, Bytes), AppError> {
        let file = self.live_file(owner_id, file_id).await?;
        let storage = self.registry.resolve_by_id(file.storage_backend_id).await;
        let content = storage.read(&file.storage_path).await?;
        Ok((file, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{UploadRequest, UploadService};
    use vault_core::models::{BackendSettings, LocalSettings, NewBackendConfig};
    use vault_db::{BackendConfigStore, MemoryStore};
    use vault_storage::mock::{MockStorage, MockStorageFactory};

    struct Fixture {
        store: MemoryStore,
        registry: Arc<BackendRegistry>,
        uploads: UploadService,
        downloads: DownloadService,
    }

    fn fixture(fallback: MockStorage) -> Fixture {
        let store = MemoryStore::new();
        let registry = Arc::new(BackendRegistry::with_fallback(
            Arc::new(store.clone()),
            Arc::new(MockStorageFactory::new()),
            Arc::new(fallback),
        ));
        Fixture {
            uploads: UploadService::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                registry.clone(),
                4,
            ),
            downloads: DownloadService::new(Arc::new(store.clone()), registry.clone()),
            store,
            registry,
        }
    }

    async fn upload(f: &Fixture, owner: Uuid, filename: &str) -> FileRecord {
        f.uploads
            .upload(UploadRequest {
                owner_id: owner,
                folder_id: None,
                filename: filename.to_string(),
                content_type: Some("text/plain".to_string()),
                content: Bytes::from_static(b"contents"),
                original_created_at: None,
                original_updated_at: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn local_backend_yields_local_target() {
        let f = fixture(MockStorage::new("fallback"));
        let owner = Uuid::new_v4();
        let file = upload(&f, owner, "notes.txt").await;

        let target = f
            .downloads
            .download(owner, file.id, Disposition::Attachment)
            .await
            .unwrap();
        assert_eq!(
            target,
            DownloadTarget::Local {
                path: PathBuf::from(&file.storage_path),
                filename: "notes.txt".to_string(),
                mime_type: "text/plain".to_string(),
            }
        );

        let (_, bytes) = f.downloads.read(owner, file.id).await.unwrap();
        assert_eq!(bytes.as_ref(), b"contents");
    }

    #[tokio::test]
    async fn public_url_yields_redirect() {
        let f = fixture(MockStorage::new("fallback").with_public_base("https://cdn.example"));
        let owner = Uuid::new_v4();
        let file = upload(&f, owner, "notes.txt").await;

        match f
            .downloads
            .download(owner, file.id, Disposition::Inline)
            .await
            .unwrap()
        {
            DownloadTarget::Redirect { url } => {
                assert!(url.starts_with("https://cdn.example/"));
                assert!(url.ends_with("disposition=inline"));
            }
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn deleted_and_foreign_files_are_not_found() {
        let f = fixture(MockStorage::new("fallback"));
        let owner = Uuid::new_v4();
        let file = upload(&f, owner, "notes.txt").await;

        let err = f
            .downloads
            .download(Uuid::new_v4(), file.id, Disposition::Attachment)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        FileStore::soft_delete(&f.store, owner, &[file.id])
            .await
            .unwrap();
        let err = f
            .downloads
            .download(owner, file.id, Disposition::Attachment)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn file_is_served_by_its_own_backend_after_default_changes() {
        let f = fixture(MockStorage::new("fallback"));
        let owner = Uuid::new_v4();
        let settings = |dir: &str| NewBackendConfig {
            name: dir.to_string(),
            settings: BackendSettings::Local(LocalSettings {
                base_dir: dir.to_string(),
            }),
            description: None,
            is_active: true,
            created_by: None,
        };

        let old = BackendConfigStore::insert(&f.store, settings("old"), true)
            .await
            .unwrap();
        f.registry.reload().await;
        let file = upload(&f, owner, "notes.txt").await;
        assert_eq!(file.storage_backend_id, Some(old.id));

        let new = BackendConfigStore::insert(&f.store, settings("new"), false)
            .await
            .unwrap();
        f.store.set_default(new.id).await.unwrap();
        f.registry.reload().await;

        let (record, bytes) = f.downloads.read(owner, file.id).await.unwrap();
        assert_eq!(record.storage_backend_id, Some(old.id));
        assert_eq!(bytes.as_ref(), b"contents");
    }
}
