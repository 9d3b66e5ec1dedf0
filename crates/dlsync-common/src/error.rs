//! Error types shared across dlsync crates

use thiserror::Error;

/// Result type alias for dlsync operations
pub type Result<T> = std::result::Result<T, DlsyncError>;

/// Main error type for shared dlsync types
#[derive(Error, Debug)]
pub enum DlsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown system family: {0}")]
    UnknownSystem(String),

    #[error("Unknown operating system family: {0}")]
    UnknownOs(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
