//! Constants shared across crates.

use std::time::Duration;

/// Root of the fallback local backend used when no usable configuration exists.
pub const DEFAULT_FALLBACK_DIR: &str = "data/files";

/// Owner segment used in storage keys when a save has no owner.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Region assumed for S3 configurations that do not name one.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Lifetime of presigned download URLs.
pub const PRESIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// Version written into backend configuration export documents.
pub const EXPORT_FORMAT_VERSION: &str = "1.0";
