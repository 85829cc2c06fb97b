use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse content category assigned by type detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "file_category", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Text,
    Image,
    Video,
    Document,
    Binary,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Text => "text",
            FileCategory::Image => "image",
            FileCategory::Video => "video",
            FileCategory::Document => "document",
            FileCategory::Binary => "binary",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(FileCategory::Text),
            "image" => Ok(FileCategory::Image),
            "video" => Ok(FileCategory::Video),
            "document" => Ok(FileCategory::Document),
            "binary" => Ok(FileCategory::Binary),
            other => Err(anyhow::anyhow!("Unknown file category: {}", other)),
        }
    }
}

/// Which signal produced a detection result.
///
/// `High` comes from a magic-byte signature, `Medium` from the filename extension
/// or text sniffing, `Low` from a caller-supplied MIME hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "detection_confidence", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeInfo {
    pub category: FileCategory,
    pub mime_type: String,
    pub confidence: Confidence,
}

impl FileTypeInfo {
    pub fn new(
        category: FileCategory,
        mime_type: impl Into<String>,
        confidence: Confidence,
    ) -> Self {
        Self {
            category,
            mime_type: mime_type.into(),
            confidence,
        }
    }
}
