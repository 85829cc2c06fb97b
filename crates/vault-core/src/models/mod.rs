//! Domain models for backend configuration, files and folders.

pub mod backend;
pub mod file;
pub mod file_type;
pub mod folder;

pub use backend::{
    BackendConfigChanges, BackendSettings, CreateBackendRequest, CredentialExport,
    ExportDocument, ExportedBackend, ImportReport, LocalSettings, NewBackendConfig, S3Settings,
    StorageBackendConfig, UpdateBackendRequest,
};
pub use file::{FileRecord, NewFile};
pub use file_type::{Confidence, FileCategory, FileTypeInfo};
pub use folder::{CreateFolderRequest, DeleteScope, Folder, PurgeReport, RecycleBin};
