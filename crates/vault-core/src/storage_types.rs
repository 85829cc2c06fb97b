use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend variants a configuration record can select.
///
/// Adding a backend means adding a variant here and a matching arm in the
/// storage factory; call sites only ever see the `Storage` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "storage_backend_type", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Local,
    S3,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Local => "local",
            BackendType::S3 => "s3",
        }
    }
}

impl FromStr for BackendType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(BackendType::Local),
            "s3" => Ok(BackendType::S3),
            _ => Err(anyhow::anyhow!("Invalid storage backend type: {}", s)),
        }
    }
}

impl Display for BackendType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("S3".parse::<BackendType>().unwrap(), BackendType::S3);
        assert_eq!("local".parse::<BackendType>().unwrap(), BackendType::Local);
        assert!("nfs".parse::<BackendType>().is_err());
    }
}
