//! Shared key layout for storage backends.
//!
//! Key format: `{owner-or-"anonymous"}/{YYYYMMDD}/{random-id}{.ext}`. The random id is
//! a fresh UUID, never derived from content, so identical uploads get distinct keys.

use chrono::NaiveDate;
use std::path::Path;
use uuid::Uuid;
use vault_core::constants::ANONYMOUS_OWNER;

const MAX_EXTENSION_LEN: usize = 16;

/// Generate a storage key for an upload.
pub fn generate_storage_key(owner: Option<Uuid>, filename: &str, date: NaiveDate) -> String {
    let owner_segment = owner
        .map(|id| id.to_string())
        .unwrap_or_else(|| ANONYMOUS_OWNER.to_string());

    format!(
        "{}/{}/{}{}",
        owner_segment,
        date.format("%Y%m%d"),
        Uuid::new_v4().simple(),
        key_extension(filename)
    )
}

/// Extension (with dot) carried into the key, or empty when it is not a short
/// ASCII alphanumeric token.
fn key_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty()
                && e.len() <= MAX_EXTENSION_LEN
                && e.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

/// Build a `Content-Disposition` value with an RFC 5987 encoded filename.
pub fn content_disposition(disposition: &str, filename: Option<&str>) -> String {
    match filename {
        Some(name) if !name.is_empty() => format!(
            "{}; filename*=UTF-8''{}",
            disposition,
            urlencoding::encode(name)
        ),
        _ => disposition.to_string(),
    }
}
