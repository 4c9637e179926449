use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the launchkit supervisor
#[derive(Debug, Error)]
pub enum LaunchError {
    // Start-time validation
    #[error("Working directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    // Process-related errors
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),
}

/// Result type alias for launchkit operations
pub type Result<T> = std::result::Result<T, LaunchError>;
