//! Error taxonomy
//!
//! One enum per component. The orchestrator folds the per-image ones into
//! [`StageError`] and records them; only [`ConfigError`] aborts a run.

use thiserror::Error;

/// Invalid or missing configuration. Fatal, raised before any image work.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("no themes found for month: {0}")]
    MissingMonth(String),

    #[error("theme list for {0} is empty")]
    EmptyThemes(String),

    #[error("unknown month: {0}")]
    UnknownMonth(String),

    #[error("base prompt is empty")]
    EmptyBasePrompt,

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("invalid setting {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Image generation service errors
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

/// Image processing errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// Device API errors
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("device API rejected token: {0}")]
    Auth(String),

    #[error("device not found or offline: {0}")]
    DeviceNotFound(String),

    #[error("upload failed: {0}")]
    Upload(String),
}

/// A failure of one pipeline stage for one image
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}
