use crate::db::transaction::TransactionGuard;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;
use vault_core::models::{BackendConfigChanges, NewBackendConfig, StorageBackendConfig};
use vault_core::AppError;

const BACKEND_COLUMNS: &str = "id, name, backend_type, config, is_active, is_default, description, created_by, created_at, updated_at";

/// Persistence for storage backend configurations.
///
/// Writes that move the default flag (`insert` with `make_default`, `set_default`) clear
/// every other default in the same transaction, so readers never see two defaults.
#[async_trait]
pub trait BackendConfigStore: Send + Sync {
    /// All configs, default first, then newest first.
    async fn list(&self) -> Result<Vec<StorageBackendConfig>, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<StorageBackendConfig>, AppError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<StorageBackendConfig>, AppError>;

    /// The default config, only if it is also active.
    async fn get_default(&self) -> Result<Option<StorageBackendConfig>, AppError>;

    async fn count(&self) -> Result<i64, AppError>;

    /// Whether `name` is used by a config other than `excluding`.
    async fn name_taken(&self, name: &str, excluding: Option<Uuid>) -> Result<bool, AppError>;

    async fn insert(
        &self,
        new: NewBackendConfig,
        make_default: bool,
    ) -> Result<StorageBackendConfig, AppError>;

    /// Apply `changes`; `None` when the config does not exist.
    async fn update(
        &self,
        id: Uuid,
        changes: BackendConfigChanges,
    ) -> Result<Option<StorageBackendConfig>, AppError>;

    /// Make `id` the only default and force it active. `None` when it does not exist.
    async fn set_default(&self, id: Uuid) -> Result<Option<StorageBackendConfig>, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;
}

/// Repository for storage backend configurations
#[derive(Clone)]
pub struct PostgresBackendConfigRepository {
    pool: PgPool,
}

impl PostgresBackendConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BackendConfigStore for PostgresBackendConfigRepository {
    #[tracing::instrument(skip(self), fields(db.table = "storage_backends", db.operation = "select"))]
    async fn list(&self) -> Result<Vec<StorageBackendConfig>, AppError> {
        let configs = sqlx::query_as::<Postgres, StorageBackendConfig>(&format!(
            "SELECT {} FROM storage_backends ORDER BY is_default DESC, created_at DESC",
            BACKEND_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(configs)
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_backends", db.operation = "select", db.record_id = %id))]
    async fn get(&self, id: Uuid) -> Result<Option<StorageBackendConfig>, AppError> {
        let config = sqlx::query_as::<Postgres, StorageBackendConfig>(&format!(
            "SELECT {} FROM storage_backends WHERE id = $1",
            BACKEND_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_backends", db.operation = "select"))]
    async fn get_by_name(&self, name: &str) -> Result<Option<StorageBackendConfig>, AppError> {
        let config = sqlx::query_as::<Postgres, StorageBackendConfig>(&format!(
            "SELECT {} FROM storage_backends WHERE name = $1",
            BACKEND_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_backends", db.operation = "select"))]
    async fn get_default(&self) -> Result<Option<StorageBackendConfig>, AppError> {
        let config = sqlx::query_as::<Postgres, StorageBackendConfig>(&format!(
            "SELECT {} FROM storage_backends WHERE is_default AND is_active LIMIT 1",
            BACKEND_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_backends", db.operation = "select"))]
    async fn count(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM storage_backends")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_backends", db.operation = "select"))]
    async fn name_taken(&self, name: &str, excluding: Option<Uuid>) -> Result<bool, AppError> {
        let taken = sqlx::query_scalar::<Postgres, bool>(
            "SELECT EXISTS(SELECT 1 FROM storage_backends WHERE name = $1 AND id IS DISTINCT FROM $2)",
        )
        .bind(name)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;

        Ok(taken)
    }

    #[tracing::instrument(skip(self, new), fields(db.table = "storage_backends", db.operation = "insert", backend.name = %new.name))]
    async fn insert(
        &self,
        new: NewBackendConfig,
        make_default: bool,
    ) -> Result<StorageBackendConfig, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool, "insert_backend_config").await?;

        if make_default {
            sqlx::query(
                "UPDATE storage_backends SET is_default = FALSE, updated_at = NOW() WHERE is_default",
            )
            .execute(tx.conn())
            .await?;
        }

        let config = sqlx::query_as::<Postgres, StorageBackendConfig>(&format!(
            r#"
            INSERT INTO storage_backends (name, backend_type, config, is_active, is_default, description, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            BACKEND_COLUMNS
        ))
        .bind(&new.name)
        .bind(new.settings.backend_type())
        .bind(new.settings.to_json())
        .bind(new.is_active || make_default)
        .bind(make_default)
        .bind(&new.description)
        .bind(new.created_by)
        .fetch_one(tx.conn())
        .await?;

        tx.commit().await?;

        tracing::info!(
            backend_id = %config.id,
            backend_name = %config.name,
            backend_type = %config.backend_type,
            is_default = config.is_default,
            "Storage backend config created"
        );

        Ok(config)
    }

    #[tracing::instrument(skip(self, changes), fields(db.table = "storage_backends", db.operation = "update", db.record_id = %id))]
    async fn update(
        &self,
        id: Uuid,
        changes: BackendConfigChanges,
    ) -> Result<Option<StorageBackendConfig>, AppError> {
        let backend_type = changes.settings.as_ref().map(|s| s.backend_type());
        let payload = changes.settings.as_ref().map(|s| s.to_json());

        let config = sqlx::query_as::<Postgres, StorageBackendConfig>(&format!(
            r#"
            UPDATE storage_backends SET
                name = COALESCE($2, name),
                backend_type = COALESCE($3, backend_type),
                config = COALESCE($4, config),
                description = CASE WHEN $5::text IS NULL THEN description ELSE NULLIF($5, '') END,
                is_active = COALESCE($6, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            BACKEND_COLUMNS
        ))
        .bind(id)
        .bind(&changes.name)
        .bind(backend_type)
        .bind(payload)
        .bind(&changes.description)
        .bind(changes.is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_backends", db.operation = "update", db.record_id = %id))]
    async fn set_default(&self, id: Uuid) -> Result<Option<StorageBackendConfig>, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool, "set_default_backend").await?;

        let exists = sqlx::query_scalar::<Postgres, Uuid>(
            "SELECT id FROM storage_backends WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(tx.conn())
        .await?;

        if exists.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            "UPDATE storage_backends SET is_default = FALSE, updated_at = NOW() WHERE is_default AND id <> $1",
        )
        .bind(id)
        .execute(tx.conn())
        .await?;

        let config = sqlx::query_as::<Postgres, StorageBackendConfig>(&format!(
            r#"
            UPDATE storage_backends
            SET is_default = TRUE, is_active = TRUE, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            BACKEND_COLUMNS
        ))
        .bind(id)
        .fetch_one(tx.conn())
        .await?;

        tx.commit().await?;

        tracing::info!(
            backend_id = %id,
            backend_name = %config.name,
            "Default storage backend changed"
        );

        Ok(Some(config))
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_backends", db.operation = "delete", db.record_id = %id))]
    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let rows_affected = sqlx::query("DELETE FROM storage_backends WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected > 0)
    }
}
