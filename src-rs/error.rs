//! Error types shared by the exploration engine and its collaborators.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    /// The controller answered with something the command does not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("controller did not answer within {0}ms")]
    Timeout(u64),

    #[error("adb command failed: {0}")]
    Adb(String),

    #[error("no selectable elements on this screen")]
    NoSelectableElements,

    #[error("missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("layout parse error on line {line}: {message}")]
    Layout { line: usize, message: String },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
