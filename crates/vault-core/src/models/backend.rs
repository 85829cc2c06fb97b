use crate::constants::{DEFAULT_FALLBACK_DIR, DEFAULT_S3_REGION};
use crate::storage_types::BackendType;
use crate::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

fn default_base_dir() -> String {
    DEFAULT_FALLBACK_DIR.to_string()
}

fn default_region() -> String {
    DEFAULT_S3_REGION.to_string()
}

/// Settings for a local filesystem backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct LocalSettings {
    #[serde(default = "default_base_dir")]
    #[validate(length(min = 1, message = "base_dir must not be empty"))]
    pub base_dir: String,
}

/// Settings for an S3-compatible object store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct S3Settings {
    #[validate(length(min = 1, max = 255, message = "bucket_name must be 1-255 characters"))]
    pub bucket_name: String,
    #[validate(length(min = 1, message = "access_key must not be empty"))]
    pub access_key: String,
    #[validate(length(min = 1, message = "secret_key must not be empty"))]
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_region")]
    pub region_name: String,
    /// Public-facing endpoint used to sign URLs handed to browsers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_path_style: bool,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket_name", &self.bucket_name)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .field("region_name", &self.region_name)
            .field("public_url", &self.public_url)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Typed backend payload, one variant per `BackendType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSettings {
    Local(LocalSettings),
    S3(S3Settings),
}

impl BackendSettings {
    pub fn backend_type(&self) -> BackendType {
        match self {
            BackendSettings::Local(_) => BackendType::Local,
            BackendSettings::S3(_) => BackendType::S3,
        }
    }

    /// Deserialize and validate the payload stored for `backend_type`.
    pub fn from_json(
        backend_type: BackendType,
        value: &serde_json::Value,
    ) -> Result<Self, AppError> {
        let settings = match backend_type {
            BackendType::Local => BackendSettings::Local(
                serde_json::from_value(value.clone()).map_err(|e| {
                    AppError::Validation(format!("Malformed local backend config: {}", e))
                })?,
            ),
            BackendType::S3 => BackendSettings::S3(serde_json::from_value(value.clone()).map_err(
                |e| AppError::Validation(format!("Malformed s3 backend config: {}", e)),
            )?),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let value = match self {
            BackendSettings::Local(local) => serde_json::to_value(local),
            BackendSettings::S3(s3) => serde_json::to_value(s3),
        };
        // Both payloads are plain string maps; serialization cannot fail.
        value.unwrap_or(serde_json::Value::Null)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            BackendSettings::Local(local) => local.validate()?,
            BackendSettings::S3(s3) => s3.validate()?,
        }
        Ok(())
    }
}

/// A persisted backend configuration.
///
/// `config` keeps the raw stored payload; `settings()` parses it on demand so a
/// malformed row can still be listed and repaired.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StorageBackendConfig {
    pub id: Uuid,
    pub name: String,
    pub backend_type: BackendType,
    pub config: serde_json::Value,
    pub is_active: bool,
    pub is_default: bool,
    pub description: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageBackendConfig {
    pub fn settings(&self) -> Result<BackendSettings, AppError> {
        BackendSettings::from_json(self.backend_type, &self.config)
    }
}

/// Insert payload handed to the configuration store.
#[derive(Debug, Clone)]
pub struct NewBackendConfig {
    pub name: String,
    pub settings: BackendSettings,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
}

/// Partial update applied by the configuration store. `None` leaves a column unchanged.
#[derive(Debug, Clone, Default)]
pub struct BackendConfigChanges {
    pub name: Option<String>,
    pub settings: Option<BackendSettings>,
    /// `Some("")` clears the description.
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Request to create a backend configuration.
#[derive(Debug, Clone, Validate)]
pub struct CreateBackendRequest {
    #[validate(length(min = 1, max = 100, message = "Backend name must be between 1 and 100 characters"))]
    pub name: String,
    pub settings: BackendSettings,
    pub description: Option<String>,
    pub is_default: bool,
    /// Defaults to `is_default` when absent.
    pub is_active: Option<bool>,
    pub created_by: Option<Uuid>,
}

/// Request to update a backend configuration.
#[derive(Debug, Clone, Default, Validate)]
pub struct UpdateBackendRequest {
    #[validate(length(min = 1, max = 100, message = "Backend name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    pub settings: Option<BackendSettings>,
    /// A blank description clears it.
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub is_default: Option<bool>,
}

/// How credentials are written into an export document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialExport {
    /// Secrets are written as stored.
    #[default]
    Plaintext,
    /// Secret fields are removed; such entries cannot be re-imported as new configs.
    Redacted,
    /// Secret fields are moved into `encrypted_credentials` (AES-256-GCM).
    Encrypted,
}

/// Portable backend configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: String,
    pub export_time: DateTime<Utc>,
    pub total_count: usize,
    pub backends: Vec<ExportedBackend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedBackend {
    pub name: String,
    pub backend_type: BackendType,
    pub config: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_credentials: Option<String>,
}

/// Outcome of importing an export document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}
