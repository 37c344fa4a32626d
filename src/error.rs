use std::path::PathBuf;

use thiserror::Error;

/// Central error type for the genre classifier.
#[derive(Debug, Error)]
pub enum GenreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    /// A single image or audio file could not be decoded. Never fatal for a dataset load.
    #[error("Could not decode {}: {reason}", path.display())]
    ItemDecode { path: PathBuf, reason: String },

    #[error("Model not found: {} is missing, train a model first", path.display())]
    ArtifactMissing { path: PathBuf },

    /// Weights and label mapping (or configuration) do not describe the same classifier.
    #[error("Model artifact mismatch: {0}")]
    ArtifactMismatch(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Model record error: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GenreError {
    pub fn item_decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        GenreError::ItemDecode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<burn::record::RecorderError> for GenreError {
    fn from(e: burn::record::RecorderError) -> Self {
        GenreError::Model(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GenreError>;
