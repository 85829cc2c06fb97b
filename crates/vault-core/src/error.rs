//! Error types module
//!
//! All fallible operations in the vault surface an `AppError`. The variants follow the
//! storage subsystem's taxonomy: validation problems (including name conflicts), unknown
//! ids, physical storage failures and backend misconfiguration, plus database and
//! internal errors.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Level an outer layer should log an error at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

/// How an error is presented to whoever invoked the operation.
pub trait ErrorMetadata {
    /// Machine-readable code, e.g. `STORAGE_IO_ERROR`.
    fn error_code(&self) -> &'static str;

    /// Process exit status for command-line callers (sysexits.h values).
    fn exit_code(&self) -> i32;

    /// Whether retrying the same operation may succeed.
    fn is_recoverable(&self) -> bool;

    fn suggested_action(&self) -> Option<&'static str>;

    /// Message safe to show without internal details.
    fn client_message(&self) -> String;

    /// Whether the full message may leak hosts, paths or SQL.
    fn is_sensitive(&self) -> bool;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    StorageIo(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error: {message}")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        // Unique violations are the only constraint callers can act on.
        if let SqlxError::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some("23505") {
                return AppError::Conflict(
                    db_err
                        .constraint()
                        .map(|c| format!("Duplicate value violates {}", c))
                        .unwrap_or_else(|| "Duplicate value".to_string()),
                );
            }
        }
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::StorageIo(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::Validation(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("Validation error: {}", err))
    }
}

struct Presentation {
    code: &'static str,
    exit_code: i32,
    recoverable: bool,
    hint: Option<&'static str>,
    sensitive: bool,
    level: LogLevel,
}

fn presentation(err: &AppError) -> Presentation {
    match err {
        AppError::Database(_) => Presentation {
            code: "DATABASE_ERROR",
            exit_code: 69,
            recoverable: true,
            hint: Some("Check DATABASE_URL and that Postgres is reachable"),
            sensitive: true,
            level: LogLevel::Error,
        },
        AppError::Validation(_) => Presentation {
            code: "VALIDATION_ERROR",
            exit_code: 65,
            recoverable: false,
            hint: None,
            sensitive: false,
            level: LogLevel::Debug,
        },
        AppError::Conflict(_) => Presentation {
            code: "CONFLICT",
            exit_code: 73,
            recoverable: false,
            hint: Some("Choose a different name"),
            sensitive: false,
            level: LogLevel::Debug,
        },
        AppError::NotFound(_) => Presentation {
            code: "NOT_FOUND",
            exit_code: 66,
            recoverable: false,
            hint: Some("List the owner's items to find a valid id"),
            sensitive: false,
            level: LogLevel::Debug,
        },
        AppError::StorageIo(_) => Presentation {
            code: "STORAGE_IO_ERROR",
            exit_code: 74,
            recoverable: true,
            hint: Some("Run `backends test` against the backend, then retry"),
            sensitive: true,
            level: LogLevel::Error,
        },
        AppError::Configuration(_) => Presentation {
            code: "CONFIGURATION_ERROR",
            exit_code: 78,
            recoverable: false,
            hint: Some("Check backend credentials and endpoint, then test the connection"),
            sensitive: false,
            level: LogLevel::Warn,
        },
        AppError::Internal(_) | AppError::InternalWithSource { .. } => Presentation {
            code: "INTERNAL_ERROR",
            exit_code: 70,
            recoverable: true,
            hint: None,
            sensitive: true,
            level: LogLevel::Error,
        },
    }
}

impl AppError {
    /// The message followed by its `source()` chain, one cause per line.
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();
        let mut previous = match self {
            AppError::InternalWithSource { message, .. } => message.clone(),
            _ => String::new(),
        };
        let mut source = self.source();
        while let Some(err) = source {
            let cause = err.to_string();
            // anyhow repeats its outermost context as the first source.
            if cause != previous {
                details.push_str("\n  caused by: ");
                details.push_str(&cause);
            }
            previous = cause;
            source = err.source();
        }
        details
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        presentation(self).code
    }

    fn exit_code(&self) -> i32 {
        presentation(self).exit_code
    }

    fn is_recoverable(&self) -> bool {
        presentation(self).recoverable
    }

    fn suggested_action(&self) -> Option<&'static str> {
        presentation(self).hint
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::StorageIo(_) => "Failed to access storage".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal error".to_string()
            }
            AppError::Validation(msg)
            | AppError::Conflict(msg)
            | AppError::NotFound(msg)
            | AppError::Configuration(msg) => msg.clone(),
        }
    }

    fn is_sensitive(&self) -> bool {
        presentation(self).sensitive
    }

    fn log_level(&self) -> LogLevel {
        presentation(self).level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "sqlx")]
    #[test]
    fn pool_errors_are_sensitive_database_errors() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert_eq!(err.exit_code(), 69);
        assert!(err.is_recoverable());
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Failed to access database");
    }

    #[test]
    fn storage_failures_hide_details() {
        let err = AppError::StorageIo("connection reset by 10.0.0.4".to_string());
        assert_eq!(err.error_code(), "STORAGE_IO_ERROR");
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Failed to access storage");
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn caller_mistakes_keep_their_message() {
        let conflict = AppError::Conflict("Backend 'primary' already exists".to_string());
        assert_eq!(conflict.exit_code(), 73);
        assert!(conflict.client_message().contains("primary"));
        assert!(!conflict.is_sensitive());

        let missing = AppError::NotFound("Folder not found".to_string());
        assert_eq!(missing.exit_code(), 66);
        assert_eq!(missing.log_level(), LogLevel::Debug);

        let config = AppError::Configuration("bucket unreachable".to_string());
        assert_eq!(config.error_code(), "CONFIGURATION_ERROR");
        assert_eq!(config.log_level(), LogLevel::Warn);
    }

    #[test]
    fn detailed_message_walks_the_source_chain() {
        let root = anyhow::anyhow!("connection refused");
        let err = AppError::from(root.context("Failed to begin database transaction"));
        let details = err.detailed_message();
        assert!(details.starts_with("Internal error: Failed to begin database transaction"));
        assert!(details.contains("caused by: connection refused"));
        assert_eq!(details.matches("Failed to begin").count(), 1);
        assert_eq!(err.client_message(), "Internal error");
    }

    #[test]
    fn validator_errors_map_to_validation() {
        let err = AppError::from(validator::ValidationErrors::new());
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(err.exit_code(), 65);
    }
}
