//! Vault Services Layer
//!
//! Orchestration over the stores and storage backends: the backend registry that
//! resolves configurations into live backends, backend configuration management,
//! the folder tree and recycle bin cascade, and the upload and download flows.
//! Keep business rules here; stores stay dumb and backends stay unaware of records.

pub mod backends;
pub mod context;
pub mod download;
pub mod folders;
pub mod recycle;
pub mod registry;
pub mod upload;

pub use backends::BackendConfigService;
pub use context::VaultServices;
pub use download::{DownloadService, DownloadTarget};
pub use folders::FolderService;
pub use recycle::{RecycleService, TrashChange};
pub use registry::{BackendRegistry, ResolvedBackend};
pub use upload::{BatchUploadItem, BatchUploadReport, FailedUpload, UploadRequest, UploadService};
