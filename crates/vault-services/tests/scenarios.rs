//! End-to-end flows over the in-memory stores and real local backends.

use bytes::Bytes;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;
use vault_core::models::{
    BackendSettings, Confidence, CreateBackendRequest, CreateFolderRequest, CredentialExport,
    DeleteScope, FileCategory, LocalSettings, UpdateBackendRequest,
};
use vault_core::{AppError, EncryptionService};
use vault_db::MemoryStore;
use vault_services::{UploadRequest, VaultServices};
use vault_storage::mock::MockStorageFactory;
use vault_storage::{DefaultStorageFactory, Disposition, StorageFactory};

fn services(
    store: &MemoryStore,
    factory: Arc<dyn StorageFactory>,
    fallback: &Path,
) -> VaultServices {
    VaultServices::from_stores(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        factory,
        fallback.to_path_buf(),
        8,
    )
}

fn local(dir: &Path) -> BackendSettings {
    BackendSettings::Local(LocalSettings {
        base_dir: dir.to_string_lossy().into_owned(),
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

fn upload(
    owner: Uuid,
    folder_id: Option<Uuid>,
    filename: &str,
    content: &'static [u8],
) -> UploadRequest {
    UploadRequest {
        owner_id: owner,
        folder_id,
        filename: filename.to_string(),
        content_type: None,
        content: Bytes::from_static(content),
        original_created_at: None,
        original_updated_at: None,
    }
}

fn folder(name: &str, parent_id: Option<Uuid>) -> CreateFolderRequest {
    CreateFolderRequest {
        name: name.to_string(),
        parent_id,
    }
}

#[tokio::test]
async fn pdf_upload_lands_under_owner_and_date() {
    let data = tempfile::tempdir().unwrap();
    let fallback = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let vault = services(&store, Arc::new(DefaultStorageFactory), fallback.path());

    let primary = vault
        .backends
        .create(create("primary", local(data.path()), true))
        .await
        .unwrap();
    assert!(primary.is_default && primary.is_active);

    let owner = Uuid::new_v4();
    let record = vault
        .uploads
        .upload(upload(owner, None, "café.pdf", b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n"))
        .await
        .unwrap();

    assert_eq!(record.file_type, FileCategory::Document);
    assert_eq!(record.mime_type, "application/pdf");
    assert_eq!(record.file_type_confidence, Confidence::High);
    assert_eq!(record.storage_backend_id, Some(primary.id));
    assert_eq!(record.filename, "café.pdf");

    let prefix = format!(
        "{}/{}/{}/",
        data.path().to_string_lossy(),
        owner,
        Utc::now().format("%Y%m%d")
    );
    assert!(
        record.storage_path.starts_with(&prefix),
        "{} does not start with {}",
        record.storage_path,
        prefix
    );
    assert!(Path::new(&record.storage_path).exists());

    let (_, bytes) = vault.downloads.read(owner, record.id).await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));

    match vault
        .downloads
        .download(owner, record.id, Disposition::Attachment)
        .await
        .unwrap()
    {
        vault_services::DownloadTarget::Local { path, filename, .. } => {
            assert_eq!(path, Path::new(&record.storage_path));
            assert_eq!(filename, "café.pdf");
        }
        other => panic!("expected a local target, got {:?}", other),
    }
}

#[tokio::test]
async fn set_default_moves_the_single_default() {
    let a_dir = tempfile::tempdir().unwrap();
    let b_dir = tempfile::tempdir().unwrap();
    let fallback = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let vault = services(&store, Arc::new(DefaultStorageFactory), fallback.path());

    let a = vault
        .backends
        .create(create("A", local(a_dir.path()), true))
        .await
        .unwrap();
    let b = vault
        .backends
        .create(create("B", local(b_dir.path()), false))
        .await
        .unwrap();

    let b = vault.backends.set_default(b.id).await.unwrap();
    assert!(b.is_default && b.is_active);
    assert!(!vault.backends.get(a.id).await.unwrap().is_default);

    let err = vault
        .backends
        .update(
            b.id,
            UpdateBackendRequest {
                is_default: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // New uploads follow the new default immediately.
    let owner = Uuid::new_v4();
    let record = vault
        .uploads
        .upload(upload(owner, None, "x.txt", b"x"))
        .await
        .unwrap();
    assert_eq!(record.storage_backend_id, Some(b.id));
    assert!(record
        .storage_path
        .starts_with(&*b_dir.path().to_string_lossy()));
}

#[tokio::test]
async fn exactly_one_default_across_mutations() {
    let fallback = tempfile::tempdir().unwrap();
    let dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
    let store = MemoryStore::new();
    let vault = services(&store, Arc::new(DefaultStorageFactory), fallback.path());

    let check = |store: &MemoryStore| {
        let configs = store.backends();
        assert!(configs.is_empty() || configs.iter().filter(|c| c.is_default).count() == 1);
    };

    let mut ids = Vec::new();
    for (i, dir) in dirs.iter().enumerate() {
        let config = vault
            .backends
            .create(create(&format!("b{}", i), local(dir.path()), i == 2))
            .await
            .unwrap();
        ids.push(config.id);
        check(&store);
    }

    vault.backends.set_default(ids[0]).await.unwrap();
    check(&store);
    vault
        .backends
        .update(
            ids[1],
            UpdateBackendRequest {
                is_default: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    check(&store);
    let _ = vault
        .backends
        .update(
            ids[1],
            UpdateBackendRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await;
    check(&store);
    let _ = vault.backends.delete(ids[1]).await;
    check(&store);
    vault.backends.delete(ids[2]).await.unwrap();
    check(&store);
    assert_eq!(store.backends().len(), 2);
}

#[tokio::test]
async fn purging_a_folder_removes_rows_and_bytes() {
    let data = tempfile::tempdir().unwrap();
    let fallback = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let vault = services(&store, Arc::new(DefaultStorageFactory), fallback.path());
    vault
        .backends
        .create(create("primary", local(data.path()), true))
        .await
        .unwrap();

    let owner = Uuid::new_v4();
    let top = vault
        .folders
        .create(owner, folder("top", None))
        .await
        .unwrap();
    vault
        .folders
        .create(owner, folder("empty", Some(top.id)))
        .await
        .unwrap();
    let record = vault
        .uploads
        .upload(upload(owner, Some(top.id), "a.txt", b"abc"))
        .await
        .unwrap();

    vault
        .folders
        .soft_delete(owner, &[top.id], DeleteScope::Subtree)
        .await
        .unwrap();
    let report = vault.recycle.empty(owner).await.unwrap();

    assert_eq!(report.folders_deleted, 2);
    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.physical_failures, 0);
    assert_eq!(store.folder_count(), 0);
    assert_eq!(store.file_count(), 0);
    assert!(!Path::new(&record.storage_path).exists());
}

#[tokio::test]
async fn purge_survives_a_failing_backend_delete() {
    let fallback = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let factory = Arc::new(MockStorageFactory::new());
    let vault = services(&store, factory.clone(), fallback.path());
    let settings = BackendSettings::Local(LocalSettings {
        base_dir: "/mock/primary".to_string(),
    });
    vault
        .backends
        .create(create("primary", settings.clone(), true))
        .await
        .unwrap();

    let owner = Uuid::new_v4();
    let top = vault
        .folders
        .create(owner, folder("top", None))
        .await
        .unwrap();
    vault
        .folders
        .create(owner, folder("child", Some(top.id)))
        .await
        .unwrap();
    vault
        .uploads
        .upload(upload(owner, Some(top.id), "a.txt", b"abc"))
        .await
        .unwrap();

    let backend = factory.storage_for(&settings);
    backend.set_fail_deletes(true);

    let report = vault.recycle.purge(owner, &[], &[top.id]).await.unwrap();
    assert_eq!(report.folders_deleted, 2);
    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.physical_failures, 1);
    assert_eq!(backend.delete_calls().len(), 1);
    assert_eq!(store.folder_count(), 0);
    assert_eq!(store.file_count(), 0);
}

#[tokio::test]
async fn folder_cycles_are_rejected() {
    let fallback = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let vault = services(&store, Arc::new(DefaultStorageFactory), fallback.path());
    let owner = Uuid::new_v4();

    let a = vault
        .folders
        .create(owner, folder("A", None))
        .await
        .unwrap();
    let child = vault
        .folders
        .create(owner, folder("child", Some(a.id)))
        .await
        .unwrap();
    let b = vault
        .folders
        .create(owner, folder("B", Some(child.id)))
        .await
        .unwrap();

    let own_parent = vault.folders.move_folders(owner, &[a.id], Some(a.id)).await;
    assert!(matches!(own_parent, Err(AppError::Validation(_))));

    let under_grandchild = vault.folders.move_folders(owner, &[a.id], Some(b.id)).await;
    assert!(matches!(under_grandchild, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn export_import_moves_configs_between_stores() {
    let fallback = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let key = EncryptionService::from_key_bytes(&[7u8; 32]).unwrap();

    let source_store = MemoryStore::new();
    let source = services(
        &source_store,
        Arc::new(DefaultStorageFactory),
        fallback.path(),
    );
    source
        .backends
        .create(create("primary", local(dir.path()), true))
        .await
        .unwrap();
    let document = source
        .backends
        .export(CredentialExport::Encrypted, Some(&key))
        .await
        .unwrap();
    let json = serde_json::to_string(&document).unwrap();

    let target_store = MemoryStore::new();
    let target = services(
        &target_store,
        Arc::new(DefaultStorageFactory),
        fallback.path(),
    );
    let report = target
        .backends
        .import(serde_json::from_str(&json).unwrap(), false, Some(&key))
        .await
        .unwrap();
    assert_eq!(report.created, vec!["primary".to_string()]);

    let owner = Uuid::new_v4();
    let record = target
        .uploads
        .upload(upload(owner, None, "a.txt", b"a"))
        .await
        .unwrap();
    assert!(record.storage_backend_id.is_some());
    assert!(record
        .storage_path
        .starts_with(&*dir.path().to_string_lossy()));
}
