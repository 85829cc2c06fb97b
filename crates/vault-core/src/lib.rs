//! Vault Core Library
//!
//! Domain models, error types, configuration and credential encryption shared by
//! every vault crate.

pub mod config;
pub mod constants;
pub mod encryption;
pub mod error;
pub mod models;
pub mod storage_types;

pub use config::{Config, LogFormat};
pub use encryption::EncryptionService;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::BackendType;
