//! Upload pipeline: resolve default backend → save bytes → persist record
//!
//! Bytes are always written before any row references them. If the row cannot be
//! written afterwards the stored object is left in place and logged as an orphan.

use crate::folders::{ensure_folder_path, live_folder};
use crate::registry::{BackendRegistry, ResolvedBackend};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use vault_core::models::{FileRecord, NewFile};
use vault_core::AppError;
use vault_db::{FileStore, FolderStore};
use vault_storage::SavedObject;

/// A single file to store.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub filename: String,
    /// Content type declared by the client, used only as a detection hint.
    pub content_type: Option<String>,
    pub content: Bytes,
    pub original_created_at: Option<DateTime<Utc>>,
    pub original_updated_at: Option<DateTime<Utc>>,
}

/// One entry of a batch upload.
#[derive(Debug, Clone)]
pub struct BatchUploadItem {
    /// Folder path relative to the batch's base folder, e.g. `photos/2024`.
    pub relative_dir: Option<String>,
    pub filename: String,
    pub content_type: Option<String>,
    pub content: Bytes,
    pub original_created_at: Option<DateTime<Utc>>,
    pub original_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedUpload {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchUploadReport {
    pub uploaded: Vec<FileRecord>,
    pub failed: Vec<FailedUpload>,
}

fn checked_filename(filename: &str) -> Result<String, AppError> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(AppError::Validation("Filename must not be empty".to_string()));
    }
    Ok(filename.to_string())
}

fn dir_key(relative_dir: Option<&str>) -> String {
    relative_dir.map(str::trim).unwrap_or_default().to_string()
}

pub struct UploadService {
    folders: Arc<dyn FolderStore>,
    files: Arc<dyn FileStore>,
    registry: Arc<BackendRegistry>,
    concurrency: usize,
}

impl UploadService {
    pub fn new(
        folders: Arc<dyn FolderStore>,
        files: Arc<dyn FileStore>,
        registry: Arc<BackendRegistry>,
        concurrency: usize,
    ) -> Self {
        Self {
            folders,
            files,
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Store one file on the current default backend and record it.
    #[tracing::instrument(skip(self, request), fields(owner_id = %request.owner_id, filename = %request.filename, size_bytes = request.content.len()))]
    pub async fn upload(&self, request: UploadRequest) -> Result<FileRecord, AppError> {
        let start = Instant::now();
        let filename = checked_filename(&request.filename)?;
        if let Some(folder_id) = request.folder_id {
            live_folder(self.folders.as_ref(), request.owner_id, folder_id).await?;
        }

        let backend = self.registry.resolve_default().await;
        let saved = backend
            .storage
            .save(
                request.content,
                &filename,
                request.content_type.as_deref(),
                Some(request.owner_id),
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    backend_id = ?backend.config_id,
                    "Failed to save upload"
                );
                AppError::from(e)
            })?;

        let storage_path = saved.storage_path.clone();
        let new = new_file(
            request.owner_id,
            request.folder_id,
            filename,
            &backend,
            saved,
            request.original_created_at,
            request.original_updated_at,
        );
        let record = self.files.insert(new).await.map_err(|e| {
            tracing::error!(
                error = %e,
                storage_path = %storage_path,
                backend_id = ?backend.config_id,
                "Failed to record upload; stored object is orphaned"
            );
            e
        })?;

        tracing::info!(
            file_id = %record.id,
            storage_path = %record.storage_path,
            file_type = %record.file_type,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upload stored"
        );
        Ok(record)
    }

    /// Store many files concurrently and record them in one transaction.
    ///
    /// Each item may name a folder path relative to `base_folder`; missing folders are
    /// created. Items whose folder or save fails are reported in `failed`. If the final
    /// insert fails the whole call fails and every saved object is orphaned.
    #[tracing::instrument(skip(self, items), fields(owner_id = %owner_id, count = items.len()))]
    pub async fn upload_batch(
        &self,
        owner_id: Uuid,
        base_folder: Option<Uuid>,
        items: Vec<BatchUploadItem>,
    ) -> Result<BatchUploadReport, AppError> {
        let start = Instant::now();
        if let Some(base) = base_folder {
            live_folder(self.folders.as_ref(), owner_id, base).await?;
        }

        let mut report = BatchUploadReport::default();

        // Sequential on purpose: sibling items share path prefixes.
        let mut dirs: HashMap<String, Result<Option<Uuid>, String>> = HashMap::new();
        for item in &items {
            let key = dir_key(item.relative_dir.as_deref());
            if dirs.contains_key(&key) {
                continue;
            }
            let resolved = ensure_folder_path(self.folders.as_ref(), owner_id, base_folder, &key)
                .await
                .map_err(|e| e.to_string());
            dirs.insert(key, resolved);
        }

        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            let folder = dirs
                .get(&dir_key(item.relative_dir.as_deref()))
                .cloned()
                .unwrap_or(Ok(base_folder));
            let checked = folder.and_then(|folder_id| {
                checked_filename(&item.filename)
                    .map(|name| (folder_id, name))
                    .map_err(|e| e.to_string())
            });
            match checked {
                Ok((folder_id, filename)) => pending.push((item, folder_id, filename)),
                Err(error) => report.failed.push(FailedUpload {
                    filename: item.filename,
                    error,
                }),
            }
        }

        let backend = self.registry.resolve_default().await;
        let saves: Vec<Result<NewFile, FailedUpload>> = stream::iter(pending)
            .map(|(item, folder_id, filename)| {
                let backend = backend.clone();
                async move {
                    match backend
                        .storage
                        .save(
                            item.content,
                            &filename,
                            item.content_type.as_deref(),
                            Some(owner_id),
                        )
                        .await
                    {
                        Ok(saved) => Ok(new_file(
                            owner_id,
                            folder_id,
                            filename,
                            &backend,
                            saved,
                            item.original_created_at,
                            item.original_updated_at,
                        )),
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                filename = %filename,
                                "Failed to save batch item"
                            );
                            Err(FailedUpload {
                                filename,
                                error: e.to_string(),
                            })
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut rows = Vec::new();
        for save in saves {
            match save {
                Ok(row) => rows.push(row),
                Err(failed) => report.failed.push(failed),
            }
        }

        let orphans: Vec<String> = rows.iter().map(|r| r.storage_path.clone()).collect();
        report.uploaded = self.files.insert_many(rows).await.map_err(|e| {
            for storage_path in &orphans {
                tracing::error!(
                    storage_path = %storage_path,
                    backend_id = ?backend.config_id,
                    "Batch record insert failed; stored object is orphaned"
                );
            }
            e
        })?;

        tracing::info!(
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Batch upload finished"
        );
        Ok(report)
    }
}

fn new_file(
    owner_id: Uuid,
    folder_id: Option<Uuid>,
    filename: String,
    backend: &ResolvedBackend,
    saved: SavedObject,
    original_created_at: Option<DateTime<Utc>>,
    original_updated_at: Option<DateTime<Utc>>,
) -> NewFile {
    NewFile {
        owner_id,
        folder_id,
        filename,
        storage_path: saved.storage_path,
        storage_backend_id: backend.config_id,
        size_bytes: saved.size as i64,
        type_info: saved.type_info,
        original_created_at,
        original_updated_at,
    }
}
