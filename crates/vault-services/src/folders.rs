//! Folder tree operations
//!
//! The tree is stored flat and walked by id. Moves check the destination's full
//! ancestor chain, and subtree expansion is breadth-first with one query per level.

use crate::recycle::TrashChange;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;
use vault_core::models::{CreateFolderRequest, DeleteScope, Folder};
use vault_core::AppError;
use vault_db::{FileStore, FolderStore, MAX_TREE_DEPTH};

const FOLDER_NAME_MAX_LEN: usize = 255;

pub(crate) fn folder_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Folder {} not found", id))
}

fn duplicate_sibling(name: &str) -> AppError {
    AppError::Conflict(format!("A folder named '{}' already exists here", name))
}

/// Trim and check a single folder name.
pub(crate) fn validate_folder_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > FOLDER_NAME_MAX_LEN {
        return Err(AppError::Validation(format!(
            "Folder name must be between 1 and {} characters",
            FOLDER_NAME_MAX_LEN
        )));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(AppError::Validation(
            "Folder name must not contain path separators".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(AppError::Validation(format!(
            "'{}' is not a valid folder name",
            name
        )));
    }
    Ok(name.to_string())
}

/// The folder, if it exists for `owner_id` and is not deleted.
pub(crate) async fn live_folder(
    store: &dyn FolderStore,
    owner_id: Uuid,
    id: Uuid,
) -> Result<Folder, AppError> {
    store
        .get(owner_id, id)
        .await?
        .filter(|f| f.deleted_at.is_none())
        .ok_or_else(|| folder_not_found(id))
}

/// `roots` plus every descendant, live or deleted.
///
/// A tree deeper than `MAX_TREE_DEPTH` below the roots is an error, never a partial set.
pub(crate) async fn collect_subtree(
    store: &dyn FolderStore,
    owner_id: Uuid,
    roots: &[Uuid],
) -> Result<Vec<Uuid>, AppError> {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut frontier: Vec<Uuid> = roots
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();
    let mut all = frontier.clone();

    let mut depth = 0;
    while !frontier.is_empty() {
        let children = store.child_ids(owner_id, &frontier).await?;
        frontier = children.into_iter().filter(|id| seen.insert(*id)).collect();
        if frontier.is_empty() {
            break;
        }
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            tracing::error!(
                owner_id = %owner_id,
                depth,
                "Folder subtree is deeper than the depth limit"
            );
            return Err(AppError::Internal(format!(
                "Folder tree is deeper than {} levels",
                MAX_TREE_DEPTH
            )));
        }
        all.extend_from_slice(&frontier);
    }

    Ok(all)
}

/// Get-or-create each segment of `path` below `base`, returning the deepest folder.
///
/// Segments are split on `/` and `\`; empty and `.` segments are skipped and `..` is
/// rejected. An empty path resolves to `base` itself.
pub(crate) async fn ensure_folder_path(
    store: &dyn FolderStore,
    owner_id: Uuid,
    base: Option<Uuid>,
    path: &str,
) -> Result<Option<Uuid>, AppError> {
    let mut names = Vec::new();
    for segment in path.split(['/', '\\']) {
        let segment = segment.trim();
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            return Err(AppError::Validation(format!(
                "Folder path '{}' must not contain '..'",
                path
            )));
        }
        names.push(validate_folder_name(segment)?);
    }

    let mut parent = base;
    for name in names {
        let folder = store.get_or_create(owner_id, parent, &name).await?;
        parent = Some(folder.id);
    }
    Ok(parent)
}

pub struct FolderService {
    folders: Arc<dyn FolderStore>,
    files: Arc<dyn FileStore>,
}

impl FolderService {
    pub fn new(folders: Arc<dyn FolderStore>, files: Arc<dyn FileStore>) -> Self {
        Self { folders, files }
    }

    pub async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Folder, AppError> {
        live_folder(self.folders.as_ref(), owner_id, id).await
    }

    /// Live child folders of `parent_id`, or of the root when `None`.
    pub async fn list_children(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<Vec<Folder>, AppError> {
        if let Some(parent_id) = parent_id {
            live_folder(self.folders.as_ref(), owner_id, parent_id).await?;
        }
        self.folders.list_children(owner_id, parent_id).await
    }

    #[tracing::instrument(skip(self, request), fields(owner_id = %owner_id))]
    pub async fn create(
        &self,
        owner_id: Uuid,
        request: CreateFolderRequest,
    ) -> Result<Folder, AppError> {
        request.validate()?;
        let name = validate_folder_name(&request.name)?;

        if let Some(parent_id) = request.parent_id {
            live_folder(self.folders.as_ref(), owner_id, parent_id).await?;
        }
        if self
            .folders
            .name_exists(owner_id, request.parent_id, &name, None)
            .await?
        {
            return Err(duplicate_sibling(&name));
        }

        let folder = self
            .folders
            .create(owner_id, request.parent_id, &name)
            .await?;
        tracing::info!(folder_id = %folder.id, parent_id = ?folder.parent_id, "Folder created");
        Ok(folder)
    }

    pub async fn rename(&self, owner_id: Uuid, id: Uuid, name: &str) -> Result<Folder, AppError> {
        let name = validate_folder_name(name)?;
        let folder = live_folder(self.folders.as_ref(), owner_id, id).await?;
        if folder.name == name {
            return Ok(folder);
        }
        if self
            .folders
            .name_exists(owner_id, folder.parent_id, &name, Some(id))
            .await?
        {
            return Err(duplicate_sibling(&name));
        }

        self.folders
            .rename(owner_id, id, &name)
            .await?
            .ok_or_else(|| folder_not_found(id))
    }

    /// Move every folder in `ids` under `new_parent` (root when `None`).
    ///
    /// All moves are validated before any is applied. A folder cannot move into itself
    /// or anywhere below itself, and cannot land next to a live sibling of the same name.
    #[tracing::instrument(skip(self, ids), fields(owner_id = %owner_id, count = ids.len()))]
    pub async fn move_folders(
        &self,
        owner_id: Uuid,
        ids: &[Uuid],
        new_parent: Option<Uuid>,
    ) -> Result<Vec<Folder>, AppError> {
        let chain = match new_parent {
            Some(parent_id) => {
                live_folder(self.folders.as_ref(), owner_id, parent_id).await?;
                self.folders.ancestor_chain(owner_id, parent_id).await?
            }
            None => Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut incoming_names = HashSet::new();
        let mut targets = Vec::new();
        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            let folder = live_folder(self.folders.as_ref(), owner_id, id).await?;

            if new_parent == Some(id) {
                return Err(AppError::Validation(
                    "A folder cannot be moved into itself".to_string(),
                ));
            }
            if chain.contains(&id) {
                return Err(AppError::Validation(format!(
                    "Cannot move folder '{}' into its own descendant",
                    folder.name
                )));
            }
            if folder.parent_id == new_parent {
                continue;
            }
            if !incoming_names.insert(folder.name.clone())
                || self
                    .folders
                    .name_exists(owner_id, new_parent, &folder.name, Some(id))
                    .await?
            {
                return Err(duplicate_sibling(&folder.name));
            }
            targets.push(id);
        }

        let mut moved = Vec::with_capacity(targets.len());
        for id in targets {
            let folder = self
                .folders
                .move_to(owner_id, id, new_parent)
                .await?
                .ok_or_else(|| folder_not_found(id))?;
            moved.push(folder);
        }

        tracing::info!(moved = moved.len(), parent_id = ?new_parent, "Folders moved");
        Ok(moved)
    }

    /// Get-or-create the nested `path` below `base`. Returns the deepest folder id.
    pub async fn ensure_path(
        &self,
        owner_id: Uuid,
        base: Option<Uuid>,
        path: &str,
    ) -> Result<Option<Uuid>, AppError> {
        if let Some(base) = base {
            live_folder(self.folders.as_ref(), owner_id, base).await?;
        }
        ensure_folder_path(self.folders.as_ref(), owner_id, base, path).await
    }

    /// Move folders into the recycle bin.
    ///
    /// `Single` marks only the named folders. `Subtree` also marks every descendant
    /// folder and the files inside all of them.
    #[tracing::instrument(skip(self, ids), fields(owner_id = %owner_id, count = ids.len(), scope = ?scope))]
    pub async fn soft_delete(
        &self,
        owner_id: Uuid,
        ids: &[Uuid],
        scope: DeleteScope,
    ) -> Result<TrashChange, AppError> {
        let found = self.folders.get_many(owner_id, ids).await?;
        if let Some(missing) = ids.iter().find(|id| !found.iter().any(|f| f.id == **id)) {
            return Err(folder_not_found(*missing));
        }

        let change = match scope {
            DeleteScope::Single => TrashChange {
                folders: self.folders.soft_delete(owner_id, ids).await?,
                files: 0,
            },
            DeleteScope::Subtree => {
                let all = collect_subtree(self.folders.as_ref(), owner_id, ids).await?;
                TrashChange {
                    folders: self.folders.soft_delete(owner_id, &all).await?,
                    files: self.files.soft_delete_in_folders(owner_id, &all).await?,
                }
            }
        };

        tracing::info!(
            folders = change.folders,
            files = change.files,
            "Folders moved to recycle bin"
        );
        Ok(change)
    }
}
