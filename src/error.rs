//! Failure kinds for each stage of the pipeline.
//!
//! Callers match on these to decide whether to skip an identifier, discard a
//! folder, or abort an upload run.

use std::path::PathBuf;

use thiserror::Error;

/// Metadata lookup for a single identifier.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The platform reports the item as gone, private or otherwise blocked.
    #[error("video unavailable: {0}")]
    Unavailable(String),
    /// Anything that might succeed on another attempt.
    #[error("metadata lookup failed: {0}")]
    Transient(String),
    /// The lookup succeeded but the payload could not be understood.
    #[error("malformed metadata: {0}")]
    Malformed(String),
}

impl MetadataError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no {kind} stream available")]
    Unavailable { kind: &'static str },
    #[error("downloading {what} failed: {message}")]
    Download { what: String, message: String },
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("could not run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("muxing {folder} failed ({status}): {stderr}")]
    ToolFailed {
        folder: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("missing input {0}")]
    MissingInput(PathBuf),
    #[error("could not remove {path}: {source}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Upload failures. Session-level variants end the whole run; the rest only
/// affect the folder being uploaded.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("browser session failed: {0}")]
    Session(String),
    #[error("daily upload limit reached")]
    LimitReached,
    #[error("upload step `{step}` failed: {message}")]
    Ui { step: String, message: String },
    #[error("reading upload input {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Listing folders or writing a marker failed.
    #[error("folder state: {0}")]
    Store(String),
}

impl UploadError {
    pub fn ui(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Ui {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn is_session_level(&self) -> bool {
        matches!(self, Self::Session(_) | Self::LimitReached | Self::Store(_))
    }
}
