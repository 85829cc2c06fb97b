//! Configuration module
//!
//! Process-level settings loaded from the environment. Per-backend settings are not
//! configured here; they live in `StorageBackendConfig` rows.

use std::env;
use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_FALLBACK_DIR;

const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MIN_UPLOAD_CONCURRENCY: usize = 8;

/// Output format for log lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    database_url: String,
    db_max_connections: u32,
    db_timeout_seconds: u64,
    fallback_storage_dir: PathBuf,
    upload_concurrency: usize,
    environment: String,
    encryption_key: Option<String>,
    log_format: LogFormat,
}

/// I/O-bound pool size: several tasks per core, never fewer than a small floor.
fn default_upload_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cores * 4).max(MIN_UPLOAD_CONCURRENCY)
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by tests to avoid mutating the process env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let upload_concurrency = match lookup("UPLOAD_CONCURRENCY") {
            Some(raw) => raw
                .parse()
                .map_err(|_| anyhow::anyhow!("UPLOAD_CONCURRENCY must be a valid number"))?,
            None => default_upload_concurrency(),
        };

        let log_format = match lookup("LOG_FORMAT")
            .unwrap_or_else(|| "text".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let config = Config {
            database_url,
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: lookup("DB_TIMEOUT_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            fallback_storage_dir: lookup("FALLBACK_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FALLBACK_DIR)),
            upload_concurrency,
            environment: lookup("ENVIRONMENT")
                .or_else(|| lookup("APP_ENV"))
                .unwrap_or_else(|| "development".to_string()),
            encryption_key: lookup("ENCRYPTION_KEY").filter(|k| !k.trim().is_empty()),
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://"))
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.db_max_connections == 0 {
            return Err(anyhow::anyhow!("DB_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.upload_concurrency == 0 {
            return Err(anyhow::anyhow!("UPLOAD_CONCURRENCY must be greater than 0"));
        }

        if self.fallback_storage_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("FALLBACK_STORAGE_DIR must not be empty"));
        }

        Ok(())
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn db_max_connections(&self) -> u32 {
        self.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.db_timeout_seconds
    }

    pub fn fallback_storage_dir(&self) -> &Path {
        &self.fallback_storage_dir
    }

    pub fn upload_concurrency(&self) -> usize {
        self.upload_concurrency
    }

    /// Production hides sensitive error details from command output.
    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn encryption_key(&self) -> Option<&str> {
        self.encryption_key.as_deref()
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
