use crate::core::catalog::CatalogError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("State store corrupt at {path}: {reason}")]
    StateCorrupt { path: String, reason: String },
    #[error("Catalog error: {0}")]
    CatalogError(#[from] CatalogError),
    #[error("Notification error: {0}")]
    NotifyError(String),
    #[error("Invalid resource id: {0}")]
    InvalidResource(String),
}

impl ArchiveError {
    /// Errors that must stop a run before anything is mutated.
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            ArchiveError::ConfigError(_) | ArchiveError::StateCorrupt { .. } | ArchiveError::TomlError(_)
        )
    }
}
