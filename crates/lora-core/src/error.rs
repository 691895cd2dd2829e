//! Error types for the LoRA library core.
//!
//! Scan-time problems are mostly logged and skipped by the callers; the
//! variants here are what reaches an API caller when an operation cannot
//! complete.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the LoRA library.
#[derive(Debug, Error)]
pub enum LoraError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Path is outside every configured root: {0}")]
    OutsideRoots(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Library errors
    #[error("Model not found: {path}")]
    ModelNotFound { path: String },

    #[error("Recipe not found: {id}")]
    RecipeNotFound { id: String },

    #[error("Cache initialization failed: {message}")]
    CacheInitialization { message: String },

    #[error("File watcher error: {message}")]
    Watcher { message: String },

    #[error("Image processing failed: {message}")]
    Image { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, LoraError>;

impl From<std::io::Error> for LoraError {
    fn from(err: std::io::Error) -> Self {
        LoraError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LoraError {
    fn from(err: serde_json::Error) -> Self {
        LoraError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<notify::Error> for LoraError {
    fn from(err: notify::Error) -> Self {
        LoraError::Watcher {
            message: err.to_string(),
        }
    }
}

impl From<image::ImageError> for LoraError {
    fn from(err: image::ImageError) -> Self {
        LoraError::Image {
            message: err.to_string(),
        }
    }
}

impl LoraError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LoraError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }
}
