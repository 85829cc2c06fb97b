use crate::db::file::FILE_COLUMNS;
use crate::db::transaction::TransactionGuard;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;
use vault_core::models::{FileRecord, Folder};
use vault_core::AppError;

const FOLDER_COLUMNS: &str =
    "id, owner_id, parent_id, name, created_at, updated_at, is_deleted, deleted_at";

/// Upper bound on how far an ancestor walk may go. A chain this long can only come
/// from corrupted data, so walks stop instead of looping.
pub const MAX_TREE_DEPTH: i32 = 1024;

/// Rows removed by a permanent delete.
#[derive(Debug, Clone, Default)]
pub struct PurgedRows {
    pub folders_deleted: u64,
    /// The removed file records, so their bytes can be deleted from their own backends.
    pub files: Vec<FileRecord>,
}

/// Persistence for the folder tree. Every method is owner-scoped.
#[async_trait]
pub trait FolderStore: Send + Sync {
    /// Fetch a folder regardless of its deletion state.
    async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Folder>, AppError>;

    async fn get_many(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<Vec<Folder>, AppError>;

    /// Live children of `parent_id` (root when `None`), by name.
    async fn list_children(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<Vec<Folder>, AppError>;

    async fn list_deleted(&self, owner_id: Uuid) -> Result<Vec<Folder>, AppError>;

    /// Ids of every direct child of any folder in `parent_ids`, live or deleted.
    async fn child_ids(&self, owner_id: Uuid, parent_ids: &[Uuid]) -> Result<Vec<Uuid>, AppError>;

    /// `start` followed by its ancestors up to the root. Empty if `start` is unknown.
    async fn ancestor_chain(&self, owner_id: Uuid, start: Uuid) -> Result<Vec<Uuid>, AppError>;

    /// Whether a live sibling called `name` exists under `parent_id`.
    async fn name_exists(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<bool, AppError>;

    /// Insert a folder. A live sibling with the same name is a `Conflict`.
    async fn create(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> Result<Folder, AppError>;

    /// Return the live folder `name` under `parent_id`, creating it if needed.
    /// Safe under concurrent callers racing on the same path.
    async fn get_or_create(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> Result<Folder, AppError>;

    async fn rename(
        &self,
        owner_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> Result<Option<Folder>, AppError>;

    async fn move_to(
        &self,
        owner_id: Uuid,
        id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<Option<Folder>, AppError>;

    async fn soft_delete(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError>;

    async fn restore(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError>;

    /// Permanently delete `file_ids`, every file inside `folder_ids`, and the folders
    /// themselves, in one transaction. Ids already gone are ignored.
    async fn purge(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
        file_ids: &[Uuid],
    ) -> Result<PurgedRows, AppError>;
}

/// Repository for managing folders
#[derive(Clone)]
pub struct PostgresFolderRepository {
    pool: PgPool,
}

impl PostgresFolderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FolderStore for PostgresFolderRepository {
    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "select", db.record_id = %id))]
    async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Folder>, AppError> {
        let folder = sqlx::query_as::<Postgres, Folder>(&format!(
            "SELECT {} FROM folders WHERE owner_id = $1 AND id = $2",
            FOLDER_COLUMNS
        ))
        .bind(owner_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(folder)
    }

    #[tracing::instrument(skip(self, ids), fields(db.table = "folders", db.operation = "select", count = ids.len()))]
    async fn get_many(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<Vec<Folder>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let folders = sqlx::query_as::<Postgres, Folder>(&format!(
            "SELECT {} FROM folders WHERE owner_id = $1 AND id = ANY($2)",
            FOLDER_COLUMNS
        ))
        .bind(owner_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(folders)
    }

    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "select"))]
    async fn list_children(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<Vec<Folder>, AppError> {
        let folders = sqlx::query_as::<Postgres, Folder>(&format!(
            "SELECT {} FROM folders WHERE owner_id = $1 AND parent_id IS NOT DISTINCT FROM $2 AND deleted_at IS NULL ORDER BY name ASC",
            FOLDER_COLUMNS
        ))
        .bind(owner_id)
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(folders)
    }

    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "select"))]
    async fn list_deleted(&self, owner_id: Uuid) -> Result<Vec<Folder>, AppError> {
        let folders = sqlx::query_as::<Postgres, Folder>(&format!(
            "SELECT {} FROM folders WHERE owner_id = $1 AND deleted_at IS NOT NULL ORDER BY deleted_at DESC",
            FOLDER_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(folders)
    }

    #[tracing::instrument(skip(self, parent_ids), fields(db.table = "folders", db.operation = "select", count = parent_ids.len()))]
    async fn child_ids(&self, owner_id: Uuid, parent_ids: &[Uuid]) -> Result<Vec<Uuid>, AppError> {
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = sqlx::query_scalar::<Postgres, Uuid>(
            "SELECT id FROM folders WHERE owner_id = $1 AND parent_id = ANY($2)",
        )
        .bind(owner_id)
        .bind(parent_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "select", db.record_id = %start))]
    async fn ancestor_chain(&self, owner_id: Uuid, start: Uuid) -> Result<Vec<Uuid>, AppError> {
        let chain = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            WITH RECURSIVE chain AS (
                SELECT id, parent_id, 1 AS depth
                FROM folders
                WHERE owner_id = $1 AND id = $2
                UNION ALL
                SELECT f.id, f.parent_id, c.depth + 1
                FROM folders f
                INNER JOIN chain c ON f.id = c.parent_id
                WHERE f.owner_id = $1 AND c.depth < $3
            )
            SELECT id FROM chain ORDER BY depth ASC
            "#,
        )
        .bind(owner_id)
        .bind(start)
        .bind(MAX_TREE_DEPTH)
        .fetch_all(&self.pool)
        .await?;

        Ok(chain)
    }

    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "select"))]
    async fn name_exists(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<Postgres, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM folders
                WHERE owner_id = $1 AND parent_id IS NOT DISTINCT FROM $2 AND name = $3
                  AND deleted_at IS NULL AND id IS DISTINCT FROM $4
            )
            "#,
        )
        .bind(owner_id)
        .bind(parent_id)
        .bind(name)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "insert"))]
    async fn create(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> Result<Folder, AppError> {
        let folder = sqlx::query_as::<Postgres, Folder>(&format!(
            "INSERT INTO folders (owner_id, parent_id, name) VALUES ($1, $2, $3) RETURNING {}",
            FOLDER_COLUMNS
        ))
        .bind(owner_id)
        .bind(parent_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(folder)
    }

    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "upsert"))]
    async fn get_or_create(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> Result<Folder, AppError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let folder = sqlx::query_as::<Postgres, Folder>(&format!(
            r#"
            INSERT INTO folders (owner_id, parent_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (owner_id, (COALESCE(parent_id, '00000000-0000-0000-0000-000000000000'::uuid)), name)
                WHERE deleted_at IS NULL
            DO UPDATE SET name = EXCLUDED.name
            RETURNING {}
            "#,
            FOLDER_COLUMNS
        ))
        .bind(owner_id)
        .bind(parent_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(folder)
    }

    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "update", db.record_id = %id))]
    async fn rename(
        &self,
        owner_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> Result<Option<Folder>, AppError> {
        let folder = sqlx::query_as::<Postgres, Folder>(&format!(
            "UPDATE folders SET name = $3, updated_at = NOW() WHERE owner_id = $1 AND id = $2 RETURNING {}",
            FOLDER_COLUMNS
        ))
        .bind(owner_id)
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(folder)
    }

    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "update", db.record_id = %id))]
    async fn move_to(
        &self,
        owner_id: Uuid,
        id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<Option<Folder>, AppError> {
        let folder = sqlx::query_as::<Postgres, Folder>(&format!(
            "UPDATE folders SET parent_id = $3, updated_at = NOW() WHERE owner_id = $1 AND id = $2 RETURNING {}",
            FOLDER_COLUMNS
        ))
        .bind(owner_id)
        .bind(id)
        .bind(parent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(folder)
    }

    #[tracing::instrument(skip(self, ids), fields(db.table = "folders", db.operation = "update", count = ids.len()))]
    async fn soft_delete(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError> {
        let rows = sqlx::query(
            "UPDATE folders SET deleted_at = NOW(), updated_at = NOW() WHERE owner_id = $1 AND id = ANY($2) AND deleted_at IS NULL",
        )
        .bind(owner_id)
        .bind(ids)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    #[tracing::instrument(skip(self, ids), fields(db.table = "folders", db.operation = "update", count = ids.len()))]
    async fn restore(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError> {
        let rows = sqlx::query(
            "UPDATE folders SET deleted_at = NULL, updated_at = NOW() WHERE owner_id = $1 AND id = ANY($2) AND deleted_at IS NOT NULL",
        )
        .bind(owner_id)
        .bind(ids)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    #[tracing::instrument(skip(self, folder_ids, file_ids), fields(db.table = "folders", db.operation = "delete", folders = folder_ids.len(), files = file_ids.len()))]
    async fn purge(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
        file_ids: &[Uuid],
    ) -> Result<PurgedRows, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool, "purge_folders").await?;

        let files = sqlx::query_as::<Postgres, FileRecord>(&format!(
            "DELETE FROM files WHERE owner_id = $1 AND (id = ANY($2) OR folder_id = ANY($3)) RETURNING {}",
            FILE_COLUMNS
        ))
        .bind(owner_id)
        .bind(file_ids)
        .bind(folder_ids)
        .fetch_all(tx.conn())
        .await?;

        let folders_deleted = if folder_ids.is_empty() {
            0
        } else {
            sqlx::query("DELETE FROM folders WHERE owner_id = $1 AND id = ANY($2)")
                .bind(owner_id)
                .bind(folder_ids)
                .execute(tx.conn())
                .await?
                .rows_affected()
        };

        tx.commit().await?;

        Ok(PurgedRows {
            folders_deleted,
            files,
        })
    }
}
