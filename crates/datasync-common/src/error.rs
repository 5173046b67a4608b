//! Error types shared across Datasync crates

use thiserror::Error;

/// Result type alias for Datasync operations
pub type Result<T> = std::result::Result<T, DatasyncError>;

/// Main error type for Datasync
#[derive(Error, Debug)]
pub enum DatasyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl DatasyncError {
    /// Build a configuration error from anything printable
    pub fn config(message: impl Into<String>) -> Self {
        DatasyncError::Config(message.into())
    }

    /// Build a parse error from anything printable
    pub fn parse(message: impl Into<String>) -> Self {
        DatasyncError::Parse(message.into())
    }
}
