//! Custom error types and handling
//!
//! This module defines the runner's error taxonomy. Fatal variants stop a
//! run; artifact and metadata variants are captured into the result bundle
//! as [`CapturedError`] values instead of being propagated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Stage failures
    #[error("Image build failed: {0}")]
    BuildFailure(String),

    #[error("Server process failed: {0}")]
    ServerProcessFailure(String),

    #[error("Run aborted")]
    Aborted,

    // Harvest failures (captured, never fatal)
    #[error("Failed to read artifact {path}: {message}")]
    ArtifactReadFailure { path: PathBuf, message: String },

    #[error("Failed to parse metadata {path}: {message}")]
    MetadataParseFailure { path: PathBuf, message: String },

    // Lookup errors
    #[error("Unknown runner: {0}")]
    UnknownRunner(String),

    #[error("Unknown test: {0}")]
    UnknownTest(String),

    // External collaborators
    #[error("Load generator error: {0}")]
    LoadGenerator(String),

    #[error("Version resolution failed: {0}")]
    VersionResolution(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BuildFailure(_) => "BUILD_FAILURE",
            Self::ServerProcessFailure(_) => "SERVER_PROCESS_FAILURE",
            Self::Aborted => "ABORTED",
            Self::ArtifactReadFailure { .. } => "ARTIFACT_READ_FAILURE",
            Self::MetadataParseFailure { .. } => "METADATA_PARSE_FAILURE",
            Self::UnknownRunner(_) => "UNKNOWN_RUNNER",
            Self::UnknownTest(_) => "UNKNOWN_TEST",
            Self::LoadGenerator(_) => "LOAD_GENERATOR_ERROR",
            Self::VersionResolution(_) => "VERSION_RESOLUTION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error ends the run.
    ///
    /// Harvest failures are recorded per field and never reach the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ArtifactReadFailure { .. } | Self::MetadataParseFailure { .. }
        )
    }

    /// Whether the error is the cancellation outcome rather than a fault
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Build an artifact read failure for `path`
    pub fn artifact_read(path: &Path, err: &std::io::Error) -> Self {
        Self::ArtifactReadFailure {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Build a metadata parse failure for `path`
    pub fn metadata_parse(path: &Path, message: impl Into<String>) -> Self {
        Self::MetadataParseFailure {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Convert into the serializable form embedded in result bundles
    pub fn capture(&self) -> CapturedError {
        let path = match self {
            Self::ArtifactReadFailure { path, .. } | Self::MetadataParseFailure { path, .. } => {
                Some(path.clone())
            }
            _ => None,
        };
        let message = match self {
            Self::ArtifactReadFailure { message, .. }
            | Self::MetadataParseFailure { message, .. } => message.clone(),
            other => other.to_string(),
        };

        CapturedError {
            code: self.error_code().to_string(),
            message,
            path,
        }
    }
}

/// Error value recorded in place of an artifact or metadata field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::LoadGenerator(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(anyhow::anyhow!("task failed: {}", err))
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harvest_errors_are_not_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = AppError::artifact_read(Path::new("results/output.txt"), &io);
        assert!(!err.is_fatal());
        assert!(!AppError::metadata_parse(Path::new("m.json"), "bad").is_fatal());

        assert!(AppError::BuildFailure("exit 1".into()).is_fatal());
        assert!(AppError::Aborted.is_fatal());
        assert!(AppError::Aborted.is_aborted());
    }

    #[test]
    fn test_capture_keeps_code_and_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file");
        let captured = AppError::artifact_read(Path::new("/tmp/results/perf.data"), &io).capture();

        assert_eq!(captured.code, "ARTIFACT_READ_FAILURE");
        assert_eq!(captured.message, "No such file");
        assert_eq!(captured.path, Some(PathBuf::from("/tmp/results/perf.data")));

        let captured = AppError::ServerProcessFailure("boom".into()).capture();
        assert_eq!(captured.code, "SERVER_PROCESS_FAILURE");
        assert!(captured.path.is_none());
        assert!(captured.message.contains("boom"));
    }
}
