//! Storage abstraction trait
//!
//! This module defines the `Storage` trait that every backend variant implements.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use vault_core::models::FileTypeInfo;
use vault_core::{AppError, BackendType};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage path: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConfigError(msg) => AppError::Configuration(msg),
            StorageError::NotFound(path) => {
                AppError::NotFound(format!("Stored object not found: {}", path))
            }
            other => AppError::StorageIo(other.to_string()),
        }
    }
}

/// How a download should be presented by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    #[default]
    Attachment,
    Inline,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Attachment => "attachment",
            Disposition::Inline => "inline",
        }
    }
}

/// What a successful `save` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedObject {
    /// Opaque, backend-private locator for the stored bytes.
    pub storage_path: String,
    pub size: u64,
    pub type_info: FileTypeInfo,
}

/// Backend-specific instructions for fetching stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadInfo {
    /// Bytes are on this host; serve the file directly.
    Local { path: PathBuf },
    /// Time-limited URL the client can fetch without going through the application.
    Presigned {
        url: String,
        bucket: String,
        key: String,
        expires_in: Duration,
    },
}

/// Storage abstraction trait
///
/// Every backend variant implements this trait; callers never branch on the
/// concrete type. `storage_path` values are produced by `save` and must be handed
/// back unchanged to the same backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `content`, classify it, and return its opaque path.
    ///
    /// Any error here is fatal to the enclosing upload.
    async fn save(
        &self,
        content: Bytes,
        filename: &str,
        content_type: Option<&str>,
        owner: Option<Uuid>,
    ) -> StorageResult<SavedObject>;

    /// Best-effort removal. Returns `true` only if an object was removed; failures are
    /// logged and reported as `false`, never raised.
    async fn delete(&self, storage_path: &str) -> bool;

    /// Whether an object exists at `storage_path`. Unreachable backends report `false`.
    async fn exists(&self, storage_path: &str) -> bool;

    /// Read the stored bytes back.
    async fn read(&self, storage_path: &str) -> StorageResult<Bytes>;

    /// Describe how a client should download the object.
    async fn get_download_info(
        &self,
        storage_path: &str,
        filename: Option<&str>,
        disposition: Disposition,
    ) -> StorageResult<DownloadInfo>;

    /// Browser-reachable URL for the object, if the backend can produce one.
    async fn get_public_url(
        &self,
        storage_path: &str,
        filename: Option<&str>,
        disposition: Disposition,
    ) -> StorageResult<Option<String>>;

    /// Verify the backend is reachable and writable with its current settings.
    async fn check_connectivity(&self) -> StorageResult<()>;

    fn backend_type(&self) -> BackendType;
}
