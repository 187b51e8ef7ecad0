//! frameart - monthly AI wall art for a networked picture-frame display
//!
//! Builds a seasonal prompt, has an image generation service paint it, fits
//! the result to the display and uploads it, archiving whatever it replaces.

pub mod archive;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod processor;
pub mod theme;
pub mod uploader;

pub use config::AppConfig;
pub use error::{ConfigError, GenerateError, ProcessError, StageError, UploadError};
pub use pipeline::{Pipeline, RunOptions, RunResult, Stage};
