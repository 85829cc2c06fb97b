//! In-memory store implementations for testing
//!
//! One `MemoryStore` implements every store trait over shared state, so a permanent
//! delete sees the same files the file store inserted. Uniqueness rules mirror the
//! database indexes: backend names are unique and live sibling folder names are unique.

use crate::db::backend_config::BackendConfigStore;
use crate::db::file::FileStore;
use crate::db::folder::{FolderStore, PurgedRows, MAX_TREE_DEPTH};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;
use vault_core::models::{
    BackendConfigChanges, FileRecord, Folder, NewBackendConfig, NewFile, StorageBackendConfig,
};
use vault_core::AppError;

#[derive(Default)]
struct State {
    backends: HashMap<Uuid, StorageBackendConfig>,
    folders: HashMap<Uuid, Folder>,
    files: HashMap<Uuid, FileRecord>,
}

/// Mock store for testing without a database
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_file_inserts: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent file inserts fail, to exercise metadata-commit failures.
    pub fn set_fail_file_inserts(&self, fail: bool) {
        self.fail_file_inserts.store(fail, Ordering::SeqCst);
    }

    /// Insert a raw backend row, bypassing validation (e.g. a malformed payload).
    pub fn put_backend(&self, config: StorageBackendConfig) {
        self.lock().backends.insert(config.id, config);
    }

    /// Insert a raw file row.
    pub fn put_file(&self, file: FileRecord) {
        self.lock().files.insert(file.id, file);
    }

    pub fn backends(&self) -> Vec<StorageBackendConfig> {
        self.lock().backends.values().cloned().collect()
    }

    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }

    pub fn folder_count(&self) -> usize {
        self.lock().folders.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn live_sibling_exists(
    state: &State,
    owner_id: Uuid,
    parent_id: Option<Uuid>,
    name: &str,
    excluding: Option<Uuid>,
) -> bool {
    state.folders.values().any(|f| {
        f.owner_id == owner_id
            && f.parent_id == parent_id
            && f.name == name
            && f.deleted_at.is_none()
            && Some(f.id) != excluding
    })
}

fn duplicate_folder() -> AppError {
    AppError::Conflict("Duplicate value violates idx_folders_live_sibling_name".to_string())
}

fn set_deleted(
    deleted_at: &mut Option<chrono::DateTime<Utc>>,
    is_deleted: &mut bool,
    deleted: bool,
) {
    *deleted_at = if deleted { Some(Utc::now()) } else { None };
    *is_deleted = deleted;
}

#[async_trait]
impl BackendConfigStore for MemoryStore {
    async fn list(&self) -> Result<Vec<StorageBackendConfig>, AppError> {
        let mut configs: Vec<_> = self.lock().backends.values().cloned().collect();
        configs.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(configs)
    }

    async fn get(&self, id: Uuid) -> Result<Option<StorageBackendConfig>, AppError> {
        Ok(self.lock().backends.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<StorageBackendConfig>, AppError> {
        Ok(self
            .lock()
            .backends
            .values()
            .find(|b| b.name == name)
            .cloned())
    }

    async fn get_default(&self) -> Result<Option<StorageBackendConfig>, AppError> {
        Ok(self
            .lock()
            .backends
            .values()
            .find(|b| b.is_default && b.is_active)
            .cloned())
    }

    async fn count(&self) -> Result<i64, AppError> {
        Ok(self.lock().backends.len() as i64)
    }

    async fn name_taken(&self, name: &str, excluding: Option<Uuid>) -> Result<bool, AppError> {
        Ok(self
            .lock()
            .backends
            .values()
            .any(|b| b.name == name && Some(b.id) != excluding))
    }

    async fn insert(
        &self,
        new: NewBackendConfig,
        make_default: bool,
    ) -> Result<StorageBackendConfig, AppError> {
        let mut state = self.lock();
        if state.backends.values().any(|b| b.name == new.name) {
            return Err(AppError::Conflict(
                "Duplicate value violates idx_storage_backends_name".to_string(),
            ));
        }

        if make_default {
            for other in state.backends.values_mut() {
                other.is_default = false;
            }
        }

        let now = Utc::now();
        let config = StorageBackendConfig {
            id: Uuid::new_v4(),
            name: new.name,
            backend_type: new.settings.backend_type(),
            config: new.settings.to_json(),
            is_active: new.is_active || make_default,
            is_default: make_default,
            description: new.description,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        state.backends.insert(config.id, config.clone());
        Ok(config)
    }

    async fn update(
        &self,
        id: Uuid,
        changes: BackendConfigChanges,
    ) -> Result<Option<StorageBackendConfig>, AppError> {
        let mut state = self.lock();
        if let Some(name) = &changes.name {
            if state
                .backends
                .values()
                .any(|b| &b.name == name && b.id != id)
            {
                return Err(AppError::Conflict(
                    "Duplicate value violates idx_storage_backends_name".to_string(),
                ));
            }
        }

        let Some(config) = state.backends.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            config.name = name;
        }
        if let Some(settings) = changes.settings {
            config.backend_type = settings.backend_type();
            config.config = settings.to_json();
        }
        if let Some(description) = changes.description {
            config.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(is_active) = changes.is_active {
            config.is_active = is_active;
        }
        config.updated_at = Utc::now();
        Ok(Some(config.clone()))
    }

    async fn set_default(&self, id: Uuid) -> Result<Option<StorageBackendConfig>, AppError> {
        let mut state = self.lock();
        if !state.backends.contains_key(&id) {
            return Ok(None);
        }

        let now = Utc::now();
        for config in state.backends.values_mut() {
            if config.id == id {
                config.is_default = true;
                config.is_active = true;
                config.updated_at = now;
            } else if config.is_default {
                config.is_default = false;
                config.updated_at = now;
            }
        }
        Ok(state.backends.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.lock().backends.remove(&id).is_some())
    }
}

fn new_record(file: NewFile) -> FileRecord {
    let now = Utc::now();
    FileRecord {
        id: Uuid::new_v4(),
        owner_id: file.owner_id,
        folder_id: file.folder_id,
        filename: file.filename,
        storage_path: file.storage_path,
        storage_backend_id: file.storage_backend_id,
        mime_type: file.type_info.mime_type,
        size_bytes: file.size_bytes,
        file_type: file.type_info.category,
        file_type_confidence: file.type_info.confidence,
        original_created_at: file.original_created_at,
        original_updated_at: file.original_updated_at,
        created_at: now,
        updated_at: now,
        is_deleted: false,
        deleted_at: None,
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn insert(&self, file: NewFile) -> Result<FileRecord, AppError> {
        if self.fail_file_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Internal("file insert failed".to_string()));
        }
        let record = new_record(file);
        self.lock().files.insert(record.id, record.clone());
        Ok(record)
    }

    async fn insert_many(&self, files: Vec<NewFile>) -> Result<Vec<FileRecord>, AppError> {
        if self.fail_file_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Internal("file insert failed".to_string()));
        }
        let records: Vec<FileRecord> = files.into_iter().map(new_record).collect();
        let mut state = self.lock();
        for record in &records {
            state.files.insert(record.id, record.clone());
        }
        Ok(records)
    }

    async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<FileRecord>, AppError> {
        Ok(self
            .lock()
            .files
            .get(&id)
            .filter(|f| f.owner_id == owner_id)
            .cloned())
    }

    async fn get_many(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<Vec<FileRecord>, AppError> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.files.get(id))
            .filter(|f| f.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn list_in_folders(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<Vec<FileRecord>, AppError> {
        let mut files: Vec<_> = self
            .lock()
            .files
            .values()
            .filter(|f| {
                f.owner_id == owner_id && f.folder_id.is_some_and(|id| folder_ids.contains(&id))
            })
            .cloned()
            .collect();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    async fn list_deleted(&self, owner_id: Uuid) -> Result<Vec<FileRecord>, AppError> {
        Ok(self
            .lock()
            .files
            .values()
            .filter(|f| f.owner_id == owner_id && f.deleted_at.is_some())
            .cloned()
            .collect())
    }

    async fn soft_delete(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError> {
        let mut state = self.lock();
        let mut changed = 0;
        for file in state.files.values_mut() {
            if file.owner_id == owner_id && ids.contains(&file.id) && file.deleted_at.is_none() {
                set_deleted(&mut file.deleted_at, &mut file.is_deleted, true);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn soft_delete_in_folders(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        let mut state = self.lock();
        let mut changed = 0;
        for file in state.files.values_mut() {
            if file.owner_id == owner_id
                && file.folder_id.is_some_and(|id| folder_ids.contains(&id))
                && file.deleted_at.is_none()
            {
                set_deleted(&mut file.deleted_at, &mut file.is_deleted, true);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn restore(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError> {
        let mut state = self.lock();
        let mut changed = 0;
        for file in state.files.values_mut() {
            if file.owner_id == owner_id && ids.contains(&file.id) && file.deleted_at.is_some() {
                set_deleted(&mut file.deleted_at, &mut file.is_deleted, false);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn restore_in_folders(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        let mut state = self.lock();
        let mut changed = 0;
        for file in state.files.values_mut() {
            if file.owner_id == owner_id
                && file.folder_id.is_some_and(|id| folder_ids.contains(&id))
                && file.deleted_at.is_some()
            {
                set_deleted(&mut file.deleted_at, &mut file.is_deleted, false);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl FolderStore for MemoryStore {
    async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Folder>, AppError> {
        Ok(self
            .lock()
            .folders
            .get(&id)
            .filter(|f| f.owner_id == owner_id)
            .cloned())
    }

    async fn get_many(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<Vec<Folder>, AppError> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.folders.get(id))
            .filter(|f| f.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn list_children(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<Vec<Folder>, AppError> {
        let mut folders: Vec<_> = self
            .lock()
            .folders
            .values()
            .filter(|f| {
                f.owner_id == owner_id && f.parent_id == parent_id && f.deleted_at.is_none()
            })
            .cloned()
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    async fn list_deleted(&self, owner_id: Uuid) -> Result<Vec<Folder>, AppError> {
        Ok(self
            .lock()
            .folders
            .values()
            .filter(|f| f.owner_id == owner_id && f.deleted_at.is_some())
            .cloned()
            .collect())
    }

    async fn child_ids(&self, owner_id: Uuid, parent_ids: &[Uuid]) -> Result<Vec<Uuid>, AppError> {
        Ok(self
            .lock()
            .folders
            .values()
            .filter(|f| {
                f.owner_id == owner_id && f.parent_id.is_some_and(|p| parent_ids.contains(&p))
            })
            .map(|f| f.id)
            .collect())
    }

    async fn ancestor_chain(&self, owner_id: Uuid, start: Uuid) -> Result<Vec<Uuid>, AppError> {
        let state = self.lock();
        let mut chain = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if chain.len() >= MAX_TREE_DEPTH as usize {
                break;
            }
            match state.folders.get(&id).filter(|f| f.owner_id == owner_id) {
                Some(folder) => {
                    chain.push(folder.id);
                    current = folder.parent_id;
                }
                None => break,
            }
        }
        Ok(chain)
    }

    async fn name_exists(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<bool, AppError> {
        Ok(live_sibling_exists(
            &self.lock(),
            owner_id,
            parent_id,
            name,
            excluding,
        ))
    }

    async fn create(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> Result<Folder, AppError> {
        let mut state = self.lock();
        if live_sibling_exists(&state, owner_id, parent_id, name, None) {
            return Err(duplicate_folder());
        }
        let now = Utc::now();
        let folder = Folder {
            id: Uuid::new_v4(),
            owner_id,
            parent_id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        };
        state.folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    async fn get_or_create(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> Result<Folder, AppError> {
        let mut state = self.lock();
        if let Some(existing) = state.folders.values().find(|f| {
            f.owner_id == owner_id
                && f.parent_id == parent_id
                && f.name == name
                && f.deleted_at.is_none()
        }) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let folder = Folder {
            id: Uuid::new_v4(),
            owner_id,
            parent_id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        };
        state.folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    async fn rename(
        &self,
        owner_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> Result<Option<Folder>, AppError> {
        let mut state = self.lock();
        let Some(parent_id) = state
            .folders
            .get(&id)
            .filter(|f| f.owner_id == owner_id)
            .map(|f| f.parent_id)
        else {
            return Ok(None);
        };
        if live_sibling_exists(&state, owner_id, parent_id, name, Some(id)) {
            return Err(duplicate_folder());
        }
        let folder = state.folders.get_mut(&id).map(|f| {
            f.name = name.to_string();
            f.updated_at = Utc::now();
            f.clone()
        });
        Ok(folder)
    }

    async fn move_to(
        &self,
        owner_id: Uuid,
        id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<Option<Folder>, AppError> {
        let mut state = self.lock();
        let Some(name) = state
            .folders
            .get(&id)
            .filter(|f| f.owner_id == owner_id)
            .map(|f| f.name.clone())
        else {
            return Ok(None);
        };
        if parent_id == Some(id) {
            return Err(AppError::Validation("Folder cannot be its own parent".to_string()));
        }
        if live_sibling_exists(&state, owner_id, parent_id, &name, Some(id)) {
            return Err(duplicate_folder());
        }
        let folder = state.folders.get_mut(&id).map(|f| {
            f.parent_id = parent_id;
            f.updated_at = Utc::now();
            f.clone()
        });
        Ok(folder)
    }

    async fn soft_delete(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError> {
        let mut state = self.lock();
        let mut changed = 0;
        for folder in state.folders.values_mut() {
            if folder.owner_id == owner_id
                && ids.contains(&folder.id)
                && folder.deleted_at.is_none()
            {
                set_deleted(&mut folder.deleted_at, &mut folder.is_deleted, true);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn restore(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError> {
        let mut state = self.lock();
        let targets: Vec<(Uuid, Option<Uuid>, String)> = state
            .folders
            .values()
            .filter(|f| f.owner_id == owner_id && ids.contains(&f.id) && f.deleted_at.is_some())
            .map(|f| (f.id, f.parent_id, f.name.clone()))
            .collect();

        let mut restored = HashSet::new();
        for (id, parent_id, name) in &targets {
            if live_sibling_exists(&state, owner_id, *parent_id, name, Some(*id))
                || !restored.insert((*parent_id, name.as_str()))
            {
                return Err(duplicate_folder());
            }
        }
        for (id, _, _) in &targets {
            if let Some(folder) = state.folders.get_mut(id) {
                set_deleted(&mut folder.deleted_at, &mut folder.is_deleted, false);
            }
        }
        Ok(targets.len() as u64)
    }

    async fn purge(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
        file_ids: &[Uuid],
    ) -> Result<PurgedRows, AppError> {
        let mut state = self.lock();

        let doomed_files: Vec<Uuid> = state
            .files
            .values()
            .filter(|f| {
                f.owner_id == owner_id
                    && (file_ids.contains(&f.id)
                        || f.folder_id.is_some_and(|id| folder_ids.contains(&id)))
            })
            .map(|f| f.id)
            .collect();
        let files: Vec<FileRecord> = doomed_files
            .iter()
            .filter_map(|id| state.files.remove(id))
            .collect();

        let mut folders_deleted = 0;
        for id in folder_ids {
            if state
                .folders
                .get(id)
                .is_some_and(|f| f.owner_id == owner_id)
            {
                state.folders.remove(id);
                folders_deleted += 1;
            }
        }

        Ok(PurgedRows {
            folders_deleted,
            files,
        })
    }
}
