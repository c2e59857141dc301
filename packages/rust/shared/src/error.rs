//! Error types for Articulator.
//!
//! Library crates use [`ArticulatorError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Articulator operations.
#[derive(Debug, thiserror::Error)]
pub enum ArticulatorError {
    /// A listing call returned a non-success status.
    #[error("catalog unavailable: {url} returned HTTP {status}")]
    RemoteUnavailable { url: String, status: u16 },

    /// A subject label could not be normalized.
    #[error("invalid subject label: {label:?}")]
    InvalidLabel { label: String },

    /// A single artifact could not be downloaded.
    #[error("artifact {key} could not be fetched: {message}")]
    ArtifactFetchFailed { key: String, message: String },

    /// Every artifact for a subject failed to download.
    #[error("no artifacts retrieved for {subject} at {school}")]
    NoArtifactsRetrieved { school: String, subject: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level HTTP error.
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ArticulatorError>;

impl ArticulatorError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_label(label: impl Into<String>) -> Self {
        Self::InvalidLabel {
            label: label.into(),
        }
    }

    pub fn artifact_fetch(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArtifactFetchFailed {
            key: key.into(),
            message: message.into(),
        }
    }
}
