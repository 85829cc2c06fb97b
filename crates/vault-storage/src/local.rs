use crate::detector;
use crate::keys::generate_storage_key;
use crate::traits::{Disposition, DownloadInfo, SavedObject, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use vault_core::BackendType;

/// Local filesystem storage implementation
///
/// Storage paths are `base_dir` joined with the shared key layout, written with `/`
/// separators so they can be embedded in URLs unchanged.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Create a backend rooted at `base_dir`.
    ///
    /// No I/O happens here; directories are created on first write, so the
    /// fallback backend can always be constructed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Turn a storage path back into a filesystem path.
    ///
    /// Paths may have been written under a different base directory by another local
    /// configuration, so they are not confined to `base_dir`; parent-directory
    /// components are always rejected.
    fn resolve_path(&self, storage_path: &str) -> StorageResult<PathBuf> {
        if storage_path.trim().is_empty() {
            return Err(StorageError::InvalidKey("Storage path is empty".to_string()));
        }

        let path = PathBuf::from(storage_path);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(StorageError::InvalidKey(
                "Storage path contains parent directory components".to_string(),
            ));
        }

        Ok(path)
    }

    fn to_storage_path(path: &Path) -> String {
        path.to_string_lossy().replace('\\', "/")
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Write `content` to a `.partial` sibling and rename it over `path`.
///
/// On failure the partial file is removed and nothing appears at `path`.
async fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let result = async {
        let mut file = fs::File::create(&partial).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        fs::rename(&partial, path).await
    }
    .await;

    if result.is_err() {
        if let Err(e) = fs::remove_file(&partial).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    path = %partial.display(),
                    error = %e,
                    "Failed to remove partial upload"
                );
            }
        }
    }
    result
}

#[async_trait]
impl Storage for LocalStorage {
    async fn save(
        &self,
        content: Bytes,
        filename: &str,
        content_type: Option<&str>,
        owner: Option<Uuid>,
    ) -> StorageResult<SavedObject> {
        let key = generate_storage_key(owner, filename, Utc::now().date_naive());
        let path = self.base_dir.join(&key);
        let size = content.len() as u64;
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create directory for {}: {}",
                path.display(),
                e
            ))
        })?;

        write_atomically(&path, &content).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        let type_info = detector::detect(filename, Some(content.as_ref()), content_type);
        let storage_path = Self::to_storage_path(&path);

        tracing::info!(
            storage_path = %storage_path,
            size_bytes = size,
            category = %type_info.category,
            mime_type = %type_info.mime_type,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage save successful"
        );

        Ok(SavedObject {
            storage_path,
            size,
            type_info,
        })
    }

    async fn delete(&self, storage_path: &str) -> bool {
        let path = match self.resolve_path(storage_path) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, storage_path = %storage_path, "Refusing local delete");
                return false;
            }
        };

        match fs::try_exists(&path).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(storage_path = %storage_path, "Local object already absent");
                return false;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    storage_path = %storage_path,
                    "Local existence check failed"
                );
                return false;
            }
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(storage_path = %storage_path, "Local storage delete successful");
                true
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    storage_path = %storage_path,
                    "Local storage delete failed"
                );
                false
            }
        }
    }

    async fn exists(&self, storage_path: &str) -> bool {
        match self.resolve_path(storage_path) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn read(&self, storage_path: &str) -> StorageResult<Bytes> {
        let path = self.resolve_path(storage_path)?;
        let start = std::time::Instant::now();

        let data = fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(storage_path.to_string()),
            _ => StorageError::DownloadFailed(format!(
                "Failed to read file {}: {}",
                path.display(),
                e
            )),
        })?;

        tracing::debug!(
            storage_path = %storage_path,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage read successful"
        );

        Ok(Bytes::from(data))
    }

    async fn get_download_info(
        &self,
        storage_path: &str,
        _filename: Option<&str>,
        _disposition: Disposition,
    ) -> StorageResult<DownloadInfo> {
        let path = self.resolve_path(storage_path)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(storage_path.to_string()));
        }
        Ok(DownloadInfo::Local { path })
    }

    async fn get_public_url(
        &self,
        storage_path: &str,
        _filename: Option<&str>,
        _disposition: Disposition,
    ) -> StorageResult<Option<String>> {
        self.resolve_path(storage_path)?;
        Ok(None)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Cannot create storage directory {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        let marker = self
            .base_dir
            .join(format!(".vault-check-{}", Uuid::new_v4().simple()));
        fs::write(&marker, b"check").await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Storage directory {} is not writable: {}",
                self.base_dir.display(),
                e
            ))
        })?;
        if let Err(e) = fs::remove_file(&marker).await {
            tracing::warn!(
                error = %e,
                marker = %marker.display(),
                "Failed to remove connectivity marker"
            );
        }

        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vault_core::models::{Confidence, FileCategory};

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_file() {
        let dir = tempdir().unwrap();
        // A non-empty directory at the target makes the final rename fail.
        let target = dir.path().join("taken");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        assert!(write_atomically(&target, b"payload").await.is_err());

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["taken".to_string()]);
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn test_save_leaves_only_the_final_file() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let saved = storage
            .save(Bytes::from_static(b"hello"), "a.txt", None, None)
            .await
            .unwrap();

        let day_dir = Path::new(&saved.storage_path).parent().unwrap();
        let entries: Vec<_> = std::fs::read_dir(day_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(!saved.storage_path.ends_with(".partial"));
    }

    #[tokio::test]
    async fn test_save_then_read_is_byte_identical() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let owner = Uuid::new_v4();
        let data = Bytes::from_static(b"%PDF-1.4\nbinary \x00\x01\x02 tail");

        let saved = storage
            .save(
                data.clone(),
                "café.pdf",
                Some("application/pdf"),
                Some(owner),
            )
            .await
            .unwrap();

        assert_eq!(saved.size, data.len() as u64);
        assert_eq!(saved.type_info.category, FileCategory::Document);
        assert_eq!(saved.type_info.confidence, Confidence::High);

        let expected_prefix = format!(
            "{}/{}/{}/",
            dir.path().to_string_lossy().replace('\\', "/"),
            owner,
            Utc::now().date_naive().format("%Y%m%d")
        );
        assert!(saved.storage_path.starts_with(&expected_prefix));
        assert!(saved.storage_path.ends_with(".pdf"));

        assert_eq!(storage.read(&saved.storage_path).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_anonymous_save() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let saved = storage
            .save(Bytes::from_static(b"hello"), "a.txt", None, None)
            .await
            .unwrap();
        assert!(saved.storage_path.contains("/anonymous/"));
    }

    #[tokio::test]
    async fn test_delete_twice_returns_false_second_time() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let saved = storage
            .save(Bytes::from_static(b"x"), "x.txt", None, None)
            .await
            .unwrap();

        assert!(storage.exists(&saved.storage_path).await);
        assert!(storage.delete(&saved.storage_path).await);
        assert!(!storage.exists(&saved.storage_path).await);
        assert!(!storage.delete(&saved.storage_path).await);
        assert!(!storage.delete(&saved.storage_path).await);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let result = storage.read("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!storage.delete("data/../../etc/passwd").await);
        assert!(!storage.exists("").await);
    }

    #[tokio::test]
    async fn test_download_info_and_public_url() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let saved = storage
            .save(Bytes::from_static(b"notes"), "n.md", None, None)
            .await
            .unwrap();

        let info = storage
            .get_download_info(&saved.storage_path, Some("n.md"), Disposition::Inline)
            .await
            .unwrap();
        assert_eq!(
            info,
            DownloadInfo::Local {
                path: PathBuf::from(&saved.storage_path)
            }
        );

        let url = storage
            .get_public_url(&saved.storage_path, None, Disposition::Attachment)
            .await
            .unwrap();
        assert!(url.is_none());

        storage.delete(&saved.storage_path).await;
        let missing = storage
            .get_download_info(&saved.storage_path, None, Disposition::Attachment)
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_connectivity() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("nested/root"));
        storage.check_connectivity().await.unwrap();
        assert!(dir.path().join("nested/root").is_dir());

        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let broken = LocalStorage::new(blocker.join("sub"));
        assert!(matches!(
            broken.check_connectivity().await,
            Err(StorageError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_save_fails_when_base_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let storage = LocalStorage::new(&blocker);

        let result = storage
            .save(Bytes::from_static(b"x"), "x.txt", None, None)
            .await;
        assert!(matches!(result, Err(StorageError::UploadFailed(_))));
    }
}
