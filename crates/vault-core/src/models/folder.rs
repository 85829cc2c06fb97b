use super::file::FileRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Folder node. The tree is stored flat; `parent_id` links a row to its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Folder {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Request DTO for creating a new folder
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateFolderRequest {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Folder name must be between 1 and 255 characters"
    ))]
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

/// Whether a soft delete or restore touches only the named rows or whole subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    #[default]
    Single,
    Subtree,
}

/// Contents of an owner's recycle bin.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecycleBin {
    pub folders: Vec<Folder>,
    pub files: Vec<FileRecord>,
}

/// Outcome of a permanent delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub folders_deleted: u64,
    pub files_deleted: u64,
    /// Physical deletes the backend reported as failed; their bytes are orphaned.
    pub physical_failures: u64,
}
