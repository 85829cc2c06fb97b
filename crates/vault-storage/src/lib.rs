//! Vault Storage Library
//!
//! Storage abstraction and the backends behind it: a local filesystem backend and an
//! S3-compatible object store backend. Content classification lives in `detector` so
//! every backend reports the same `FileTypeInfo` for the same bytes.
//!
//! # Storage key format
//!
//! All backends use the same key layout:
//!
//! - **Owned uploads**: `{owner_id}/{YYYYMMDD}/{random}{.ext}`
//! - **Anonymous uploads**: `anonymous/{YYYYMMDD}/{random}{.ext}`
//!
//! The local backend prefixes keys with its base directory. Storage paths are opaque to
//! callers and must be handed back to the backend that produced them.

pub mod detector;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Test helpers (mock backends for downstream service tests)
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

// Re-export commonly used types
pub use factory::{create_storage, DefaultStorageFactory, StorageFactory};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Disposition, DownloadInfo, SavedObject, Storage, StorageError, StorageResult};
pub use vault_core::BackendType;
