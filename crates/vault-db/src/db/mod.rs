//! Database repositories for the data access layer
//!
//! Each store is a trait so services can run against the in-memory implementation in
//! tests; the PostgreSQL repositories are the production implementations.
//
// Backend configuration store
pub mod backend_config;
//
// File records
pub mod file;
//
// Folder tree and permanent deletion
pub mod folder;
//
// Transaction utilities
pub mod transaction;
//
// In-memory stores for tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;

pub use backend_config::{BackendConfigStore, PostgresBackendConfigRepository};
pub use file::{FileStore, PostgresFileRepository};
pub use folder::{FolderStore, PostgresFolderRepository, PurgedRows, MAX_TREE_DEPTH};
pub use transaction::TransactionGuard;
