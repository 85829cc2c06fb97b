use crate::db::transaction::TransactionGuard;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;
use vault_core::models::{FileRecord, NewFile};
use vault_core::AppError;

pub(crate) const FILE_COLUMNS: &str = "id, owner_id, folder_id, filename, storage_path, storage_backend_id, mime_type, size_bytes, file_type, file_type_confidence, original_created_at, original_updated_at, created_at, updated_at, is_deleted, deleted_at";

/// Persistence for file records. Every method is owner-scoped.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn insert(&self, file: NewFile) -> Result<FileRecord, AppError>;

    /// Insert all records in one transaction; either every row lands or none does.
    async fn insert_many(&self, files: Vec<NewFile>) -> Result<Vec<FileRecord>, AppError>;

    /// Fetch a record regardless of its deletion state.
    async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<FileRecord>, AppError>;

    async fn get_many(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<Vec<FileRecord>, AppError>;

    /// Files directly inside any of `folder_ids`, live or deleted.
    async fn list_in_folders(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<Vec<FileRecord>, AppError>;

    async fn list_deleted(&self, owner_id: Uuid) -> Result<Vec<FileRecord>, AppError>;

    /// Mark live files deleted. Returns the number of rows changed.
    async fn soft_delete(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError>;

    /// Mark every live file inside `folder_ids` deleted.
    async fn soft_delete_in_folders(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<u64, AppError>;

    async fn restore(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError>;

    async fn restore_in_folders(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<u64, AppError>;
}

/// Repository for file records
#[derive(Clone)]
pub struct PostgresFileRepository {
    pool: PgPool,
}

impl PostgresFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_on(conn: &mut PgConnection, file: &NewFile) -> Result<FileRecord, AppError> {
        let record = sqlx::query_as::<Postgres, FileRecord>(&format!(
            r#"
            INSERT INTO files (
                owner_id, folder_id, filename, storage_path, storage_backend_id,
                mime_type, size_bytes, file_type, file_type_confidence,
                original_created_at, original_updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            FILE_COLUMNS
        ))
        .bind(file.owner_id)
        .bind(file.folder_id)
        .bind(&file.filename)
        .bind(&file.storage_path)
        .bind(file.storage_backend_id)
        .bind(&file.type_info.mime_type)
        .bind(file.size_bytes)
        .bind(file.type_info.category)
        .bind(file.type_info.confidence)
        .bind(file.original_created_at)
        .bind(file.original_updated_at)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl FileStore for PostgresFileRepository {
    #[tracing::instrument(skip(self, file), fields(db.table = "files", db.operation = "insert", owner_id = %file.owner_id))]
    async fn insert(&self, file: NewFile) -> Result<FileRecord, AppError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_on(&mut conn, &file).await
    }

    #[tracing::instrument(skip(self, files), fields(db.table = "files", db.operation = "insert", count = files.len()))]
    async fn insert_many(&self, files: Vec<NewFile>) -> Result<Vec<FileRecord>, AppError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = TransactionGuard::begin(&self.pool, "insert_files").await?;
        let mut records = Vec::with_capacity(files.len());
        for file in &files {
            records.push(Self::insert_on(tx.conn(), file).await?);
        }
        tx.commit().await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select", db.record_id = %id))]
    async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<FileRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, FileRecord>(&format!(
            "SELECT {} FROM files WHERE owner_id = $1 AND id = $2",
            FILE_COLUMNS
        ))
        .bind(owner_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self, ids), fields(db.table = "files", db.operation = "select", count = ids.len()))]
    async fn get_many(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<Vec<FileRecord>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = sqlx::query_as::<Postgres, FileRecord>(&format!(
            "SELECT {} FROM files WHERE owner_id = $1 AND id = ANY($2)",
            FILE_COLUMNS
        ))
        .bind(owner_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self, folder_ids), fields(db.table = "files", db.operation = "select", count = folder_ids.len()))]
    async fn list_in_folders(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<Vec<FileRecord>, AppError> {
        if folder_ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = sqlx::query_as::<Postgres, FileRecord>(&format!(
            "SELECT {} FROM files WHERE owner_id = $1 AND folder_id = ANY($2) ORDER BY filename ASC",
            FILE_COLUMNS
        ))
        .bind(owner_id)
        .bind(folder_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn list_deleted(&self, owner_id: Uuid) -> Result<Vec<FileRecord>, AppError> {
        let records = sqlx::query_as::<Postgres, FileRecord>(&format!(
            "SELECT {} FROM files WHERE owner_id = $1 AND deleted_at IS NOT NULL ORDER BY deleted_at DESC",
            FILE_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self, ids), fields(db.table = "files", db.operation = "update", count = ids.len()))]
    async fn soft_delete(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError> {
        let rows = sqlx::query(
            "UPDATE files SET deleted_at = NOW(), updated_at = NOW() WHERE owner_id = $1 AND id = ANY($2) AND deleted_at IS NULL",
        )
        .bind(owner_id)
        .bind(ids)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    #[tracing::instrument(skip(self, folder_ids), fields(db.table = "files", db.operation = "update", count = folder_ids.len()))]
    async fn soft_delete_in_folders(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        let rows = sqlx::query(
            "UPDATE files SET deleted_at = NOW(), updated_at = NOW() WHERE owner_id = $1 AND folder_id = ANY($2) AND deleted_at IS NULL",
        )
        .bind(owner_id)
        .bind(folder_ids)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    #[tracing::instrument(skip(self, ids), fields(db.table = "files", db.operation = "update", count = ids.len()))]
    async fn restore(&self, owner_id: Uuid, ids: &[Uuid]) -> Result<u64, AppError> {
        let rows = sqlx::query(
            "UPDATE files SET deleted_at = NULL, updated_at = NOW() WHERE owner_id = $1 AND id = ANY($2) AND deleted_at IS NOT NULL",
        )
        .bind(owner_id)
        .bind(ids)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    #[tracing::instrument(skip(self, folder_ids), fields(db.table = "files", db.operation = "update", count = folder_ids.len()))]
    async fn restore_in_folders(
        &self,
        owner_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        let rows = sqlx::query(
            "UPDATE files SET deleted_at = NULL, updated_at = NOW() WHERE owner_id = $1 AND folder_id = ANY($2) AND deleted_at IS NOT NULL",
        )
        .bind(owner_id)
        .bind(folder_ids)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }
}
