use super::file_type::{Confidence, FileCategory, FileTypeInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored file owned by exactly one user.
///
/// `storage_path` is produced by the backend named in `storage_backend_id` and is
/// meaningful only to that backend. A null backend id marks a legacy record served
/// by the fallback local backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct FileRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub filename: String,
    pub storage_path: String,
    pub storage_backend_id: Option<Uuid>,
    pub mime_type: String,
    pub size_bytes: i64,
    pub file_type: FileCategory,
    pub file_type_confidence: Confidence,
    pub original_created_at: Option<DateTime<Utc>>,
    pub original_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn type_info(&self) -> FileTypeInfo {
        FileTypeInfo::new(
            self.file_type,
            self.mime_type.clone(),
            self.file_type_confidence,
        )
    }
}

/// Metadata row written after a successful physical save.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub owner_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub filename: String,
    pub storage_path: String,
    pub storage_backend_id: Option<Uuid>,
    pub size_bytes: i64,
    pub type_info: FileTypeInfo,
    pub original_created_at: Option<DateTime<Utc>>,
    pub original_updated_at: Option<DateTime<Utc>>,
}
