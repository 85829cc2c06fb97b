//! Recycle bin: soft delete, restore, and permanent delete
//!
//! Permanent deletes remove rows first, in one transaction, then delete the bytes
//! through each file's own backend. A failed physical delete is counted and logged;
//! the rows stay gone and the bytes become orphans.

use crate::folders::collect_subtree;
use crate::registry::BackendRegistry;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use vault_core::models::{DeleteScope, FileRecord, PurgeReport, RecycleBin};
use vault_core::AppError;
use vault_db::{FileStore, FolderStore};

/// Rows moved into or out of the recycle bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrashChange {
    pub folders: u64,
    pub files: u64,
}

pub struct RecycleService {
    folders: Arc<dyn FolderStore>,
    files: Arc<dyn FileStore>,
    registry: Arc<BackendRegistry>,
    concurrency: usize,
}

impl RecycleService {
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

    /// Deleted folders and files of `owner_id`.
    pub async fn list(&self, owner_id: Uuid) -> Result<RecycleBin, AppError> {
        Ok(RecycleBin {
            folders: self.folders.list_deleted(owner_id).await?,
            files: self.files.list_deleted(owner_id).await?,
        })
    }

    /// Move live files into the recycle bin. Unknown or foreign ids are ignored.
    pub async fn soft_delete_files(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError> {
        let changed = self.files.soft_delete(owner_id, ids).await?;
        tracing::info!(owner_id = %owner_id, files = changed, "Files moved to recycle bin");
        Ok(changed)
    }

    /// Bring files and folders back out of the recycle bin.
    ///
    /// With `Subtree`, every descendant folder of `folder_ids` and the files inside
    /// them are restored as well. Restoring a folder next to a live sibling of the same
    /// name is a `Conflict`.
    #[tracing::instrument(skip(self, file_ids, folder_ids), fields(owner_id = %owner_id, scope = ?scope))]
    pub async fn restore(
        &self,
        owner_id: Uuid,
        file_ids: &[Uuid],
        folder_ids: &[Uuid],
        scope: DeleteScope,
    ) -> Result<TrashChange, AppError> {
        let mut change = TrashChange::default();

        match scope {
            DeleteScope::Single => {
                change.folders = self.folders.restore(owner_id, folder_ids).await?;
            }
            DeleteScope::Subtree => {
                let all = collect_subtree(self.folders.as_ref(), owner_id, folder_ids).await?;
                change.folders = self.folders.restore(owner_id, &all).await?;
                change.files += self.files.restore_in_folders(owner_id, &all).await?;
            }
        }
        if !file_ids.is_empty() {
            change.files += self.files.restore(owner_id, file_ids).await?;
        }

        tracing::info!(
            folders = change.folders,
            files = change.files,
            "Restored from recycle bin"
        );
        Ok(change)
    }

    /// Permanently delete files and folders.
    ///
    /// Folders take their whole subtree with them, including every file inside. Rows go
    /// in one transaction; bytes are then removed from the backend each file was
    /// written with. Ids that are already gone are ignored.
    #[tracing::instrument(skip(self, file_ids, folder_ids), fields(owner_id = %owner_id))]
    pub async fn purge(
        &self,
        owner_id: Uuid,
        file_ids: &[Uuid],
        folder_ids: &[Uuid],
    ) -> Result<PurgeReport, AppError> {
        let start = Instant::now();
        let all_folders = collect_subtree(self.folders.as_ref(), owner_id, folder_ids).await?;
        let purged = self.folders.purge(owner_id, &all_folders, file_ids).await?;

        let files_deleted = purged.files.len() as u64;
        let physical_failures = self.delete_objects(purged.files).await;

        tracing::info!(
            folders_deleted = purged.folders_deleted,
            files_deleted,
            physical_failures,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Permanently deleted from recycle bin"
        );

        Ok(PurgeReport {
            folders_deleted: purged.folders_deleted,
            files_deleted,
            physical_failures,
        })
    }

    /// Permanently delete everything in the owner's recycle bin.
    pub async fn empty(&self, owner_id: Uuid) -> Result<PurgeReport, AppError> {
        let bin = self.list(owner_id).await?;
        let folder_ids: Vec<Uuid> = bin.folders.iter().map(|f| f.id).collect();
        let file_ids: Vec<Uuid> = bin.files.iter().map(|f| f.id).collect();
        self.purge(owner_id, &file_ids, &folder_ids).await
    }

    /// Best-effort physical deletes. Returns how many backends reported failure.
    async fn delete_objects(&self, files: Vec<FileRecord>) -> u64 {
        let results: Vec<bool> = stream::iter(files)
            .map(|file| {
                let registry = self.registry.clone();
                async move {
                    let storage = registry.resolve_by_id(file.storage_backend_id).await;
                    let deleted = storage.delete(&file.storage_path).await;
                    if !deleted {
                        tracing::warn!(
                            file_id = %file.id,
                            storage_path = %file.storage_path,
                            backend_id = ?file.storage_backend_id,
                            "Physical delete failed; stored object left orphaned"
                        );
                    }
                    deleted
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.iter().filter(|deleted| !**deleted).count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folders::FolderService;
    use bytes::Bytes;
    use vault_core::models::{CreateFolderRequest, NewFile};
    use vault_db::MemoryStore;
    use vault_storage::mock::{MockStorage, MockStorageFactory};
    use vault_storage::Storage;

    struct Fixture {
        store: MemoryStore,
        storage: Arc<MockStorage>,
        folders: FolderService,
        recycle: RecycleService,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let storage = Arc::new(MockStorage::new("fallback"));
        let registry = Arc::new(BackendRegistry::with_fallback(
            Arc::new(store.clone()),
            Arc::new(MockStorageFactory::new()),
            storage.clone(),
        ));
        Fixture {
            folders: FolderService::new(Arc::new(store.clone()), Arc::new(store.clone())),
            recycle: RecycleService::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                registry,
                4,
            ),
            store,
            storage,
        }
    }

    async fn folder(f: &Fixture, owner: Uuid, name: &str, parent_id: Option<Uuid>) -> Uuid {
        f.folders
            .create(
                owner,
                CreateFolderRequest {
                    name: name.to_string(),
                    parent_id,
                },
            )
            .await
            .unwrap()
            .id
    }

    async fn file(f: &Fixture, owner: Uuid, folder_id: Option<Uuid>, name: &str) -> FileRecord {
        let saved = f
            .storage
            .save(Bytes::from_static(b"hello"), name, None, Some(owner))
            .await
            .unwrap();
        FileStore::insert(
            &f.store,
            NewFile {
                owner_id: owner,
                folder_id,
                filename: name.to_string(),
                storage_path: saved.storage_path,
                storage_backend_id: None,
                size_bytes: 5,
                type_info: saved.type_info,
                original_created_at: None,
                original_updated_at: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn purge_removes_subtree_and_deletes_each_object_once() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let top = folder(&f, owner, "top", None).await;
        let inner = folder(&f, owner, "inner", Some(top)).await;
        folder(&f, owner, "empty", Some(inner)).await;
        let a = file(&f, owner, Some(top), "a.txt").await;
        let b = file(&f, owner, Some(inner), "b.txt").await;
        let keep = file(&f, owner, None, "keep.txt").await;

        let report = f.recycle.purge(owner, &[], &[top]).await.unwrap();
        assert_eq!(
            report,
            PurgeReport {
                folders_deleted: 3,
                files_deleted: 2,
                physical_failures: 0
            }
        );
        assert_eq!(f.store.folder_count(), 0);
        assert_eq!(f.store.file_count(), 1);

        let mut calls = f.storage.delete_calls();
        calls.sort();
        let mut expected = vec![a.storage_path, b.storage_path];
        expected.sort();
        assert_eq!(calls, expected);
        assert!(f.storage.has_file(&keep.storage_path));

        // A second purge of the same ids is a no-op.
        let again = f.recycle.purge(owner, &[a.id], &[top]).await.unwrap();
        assert_eq!(again, PurgeReport::default());
        assert_eq!(f.storage.delete_calls().len(), 2);
    }

    #[tokio::test]
    async fn failed_physical_delete_still_removes_rows() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let doomed = file(&f, owner, None, "doomed.bin").await;
        f.storage.set_fail_deletes(true);

        let report = f.recycle.purge(owner, &[doomed.id], &[]).await.unwrap();
        assert_eq!(report.files_deleted, 1);
        assert_eq!(report.physical_failures, 1);
        assert_eq!(f.store.file_count(), 0);
        assert_eq!(f.storage.delete_calls().len(), 1);
    }

    #[tokio::test]
    async fn purge_is_owner_scoped() {
        let f = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let secret = file(&f, alice, None, "secret.txt").await;
        let dir = folder(&f, alice, "dir", None).await;

        let report = f.recycle.purge(bob, &[secret.id], &[dir]).await.unwrap();
        assert_eq!(report, PurgeReport::default());
        assert_eq!(f.store.file_count(), 1);
        assert_eq!(f.store.folder_count(), 1);
    }

    #[tokio::test]
    async fn restore_scope_controls_cascade() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let top = folder(&f, owner, "top", None).await;
        let inner = folder(&f, owner, "inner", Some(top)).await;
        file(&f, owner, Some(inner), "b.txt").await;

        f.folders
            .soft_delete(owner, &[top], DeleteScope::Subtree)
            .await
            .unwrap();
        let bin = f.recycle.list(owner).await.unwrap();
        assert_eq!((bin.folders.len(), bin.files.len()), (2, 1));

        let single = f
            .recycle
            .restore(owner, &[], &[top], DeleteScope::Single)
            .await
            .unwrap();
        assert_eq!(
            single,
            TrashChange {
                folders: 1,
                files: 0
            }
        );

        let subtree = f
            .recycle
            .restore(owner, &[], &[top], DeleteScope::Subtree)
            .await
            .unwrap();
        assert_eq!(
            subtree,
            TrashChange {
                folders: 1,
                files: 1
            }
        );

        let bin = f.recycle.list(owner).await.unwrap();
        assert!(bin.folders.is_empty() && bin.files.is_empty());
    }

    #[tokio::test]
    async fn empty_purges_only_the_bin() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let trashed = file(&f, owner, None, "old.txt").await;
        let live = file(&f, owner, None, "new.txt").await;
        let dir = folder(&f, owner, "dir", None).await;

        let trashed_count = f.recycle.soft_delete_files(owner, &[trashed.id]).await;
        assert_eq!(trashed_count.unwrap(), 1);
        f.folders
            .soft_delete(owner, &[dir], DeleteScope::Single)
            .await
            .unwrap();

        let report = f.recycle.empty(owner).await.unwrap();
        assert_eq!(report.files_deleted, 1);
        assert_eq!(report.folders_deleted, 1);
        assert!(f.storage.has_file(&live.storage_path));
        assert!(!f.storage.has_file(&trashed.storage_path));
    }
}
