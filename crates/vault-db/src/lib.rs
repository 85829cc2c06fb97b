//! Vault persistence layer
//!
//! Store traits for backend configurations, files and folders, their PostgreSQL
//! repositories, and pool setup. Every file and folder query carries the owner in its
//! predicate, so rows belonging to someone else are simply not found.

pub mod db;
pub mod setup;

pub use db::{
    BackendConfigStore, FileStore, FolderStore, PostgresBackendConfigRepository,
    PostgresFileRepository, PostgresFolderRepository, PurgedRows, MAX_TREE_DEPTH,
};
#[cfg(any(test, feature = "test-helpers"))]
pub use db::memory::MemoryStore;
pub use setup::{run_migrations, setup_database};
