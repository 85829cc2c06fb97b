//! Helpers shared by the `vaultctl` binary.

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use vault_core::models::CredentialExport;
use vault_core::{AppError, ErrorMetadata, LogLevel};
use vault_services::BatchUploadItem;

/// Credential handling for `backends export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportMode {
    Plaintext,
    Redacted,
    Encrypted,
}

impl From<ExportMode> for CredentialExport {
    fn from(mode: ExportMode) -> Self {
        match mode {
            ExportMode::Plaintext => CredentialExport::Plaintext,
            ExportMode::Redacted => CredentialExport::Redacted,
            ExportMode::Encrypted => CredentialExport::Encrypted,
        }
    }
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

/// Exit status used for failures that did not come from a vault operation.
const EXIT_FAILURE: i32 = 1;

/// A failed command, rendered for stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub exit_code: i32,
}

/// Render a command failure.
///
/// Vault errors keep their code and hint. In production, sensitive errors show only
/// their client message; elsewhere the whole cause chain is printed.
pub fn report_error(err: &anyhow::Error, production: bool) -> ErrorReport {
    let Some(app) = err.chain().find_map(|e| e.downcast_ref::<AppError>()) else {
        return ErrorReport {
            message: format!("error: {:#}", err),
            exit_code: EXIT_FAILURE,
        };
    };

    match app.log_level() {
        LogLevel::Error => tracing::error!(
            code = app.error_code(),
            error = %app.detailed_message(),
            "Command failed"
        ),
        LogLevel::Warn => tracing::warn!(code = app.error_code(), error = %app, "Command failed"),
        LogLevel::Debug => tracing::debug!(code = app.error_code(), error = %app, "Command failed"),
    }

    let body = if production && app.is_sensitive() {
        app.client_message()
    } else {
        app.detailed_message()
    };
    let mut message = format!("error[{}]: {}", app.error_code(), body);
    if let Some(hint) = app.suggested_action() {
        message.push_str("\nhint: ");
        message.push_str(hint);
    }
    if app.is_recoverable() {
        message.push_str("\nThis failure may be transient; retrying can succeed.");
    }

    ErrorReport {
        message,
        exit_code: app.exit_code(),
    }
}

/// Creation and modification times of a local file, when the platform reports them.
pub fn file_timestamps(meta: &Metadata) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    (
        meta.created().ok().map(DateTime::<Utc>::from),
        meta.modified().ok().map(DateTime::<Utc>::from),
    )
}

/// Every regular file below `root`, each tagged with its directory relative to `root`.
///
/// Files directly inside `root` carry no relative directory. Symlinks are not followed.
pub async fn collect_upload_items(root: &Path) -> anyhow::Result<Vec<BatchUploadItem>> {
    let mut items = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Read directory {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let meta = entry.metadata().await?;
            let (original_created_at, original_updated_at) = file_timestamps(&meta);
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Read file {}", path.display()))?;
            let relative_dir = dir
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .filter(|p| !p.is_empty());

            items.push(BatchUploadItem {
                relative_dir,
                filename: entry.file_name().to_string_lossy().into_owned(),
                content_type: None,
                content: Bytes::from(content),
                original_created_at,
                original_updated_at,
            });
        }
    }

    items.sort_by(|a, b| {
        (a.relative_dir.as_deref(), a.filename.as_str())
            .cmp(&(b.relative_dir.as_deref(), b.filename.as_str()))
    });
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_nested_files_with_relative_dirs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("photos/2024")).unwrap();
        std::fs::write(root.path().join("top.txt"), b"top").unwrap();
        std::fs::write(root.path().join("photos/2024/a.jpg"), b"a").unwrap();
        std::fs::write(root.path().join("photos/b.jpg"), b"b").unwrap();

        let items = collect_upload_items(root.path()).await.unwrap();
        let listed: Vec<(Option<&str>, &str)> = items
            .iter()
            .map(|i| (i.relative_dir.as_deref(), i.filename.as_str()))
            .collect();
        assert_eq!(
            listed,
            vec![
                (None, "top.txt"),
                (Some("photos"), "b.jpg"),
                (Some("photos/2024"), "a.jpg"),
            ]
        );
        assert_eq!(items[2].content.as_ref(), b"a");
        assert!(items[0].original_updated_at.is_some());
    }

    #[test]
    fn vault_errors_carry_code_hint_and_exit_status() {
        let err = anyhow::Error::new(AppError::Conflict(
            "Storage backend 'primary' already exists".to_string(),
        ))
        .context("Create backend");
        let report = report_error(&err, true);
        assert_eq!(report.exit_code, 73);
        assert!(report
            .message
            .starts_with("error[CONFLICT]: Conflict: Storage backend 'primary' already exists"));
        assert!(report.message.contains("hint: Choose a different name"));
    }

    #[test]
    fn production_hides_sensitive_details() {
        let err = anyhow::Error::new(AppError::StorageIo(
            "connect to 10.0.0.4:9000 refused".to_string(),
        ));

        let production = report_error(&err, true);
        assert_eq!(production.exit_code, 74);
        assert!(production
            .message
            .starts_with("error[STORAGE_IO_ERROR]: Failed to access storage"));
        assert!(!production.message.contains("10.0.0.4"));

        let development = report_error(&err, false);
        assert!(development.message.contains("10.0.0.4"));
    }

    #[test]
    fn other_failures_exit_with_one() {
        let err = anyhow::anyhow!("file missing").context("Cannot read ./upload");
        let report = report_error(&err, false);
        assert_eq!(report.exit_code, 1);
        assert_eq!(report.message, "error: Cannot read ./upload: file missing");
    }

    #[test]
    fn export_modes_map_onto_credential_handling() {
        assert_eq!(
            CredentialExport::from(ExportMode::Redacted),
            CredentialExport::Redacted
        );
        assert_eq!(
            ExportMode::from_str("encrypted", true).unwrap(),
            ExportMode::Encrypted
        );
    }
}
