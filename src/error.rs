//! Error types for the bike demand pipeline and serving stack

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MlopsError>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum MlopsError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Missing expected column '{0}'")]
    MissingColumn(String),

    #[error("Dataset too small for training ({rows} rows, need at least {min})")]
    DatasetTooSmall { rows: usize, min: usize },

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Tracking store error: {0}")]
    TrackingError(String),

    #[error("Run {0} is already closed")]
    RunClosed(String),

    #[error("Registered model not found: {0}")]
    UnknownModel(String),

    #[error("No versions found for model '{model}' at stage None or {stage}")]
    NoEligibleVersion { model: String, stage: String },

    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Invalid stage transition: {0}")]
    InvalidTransition(String),

    #[error("No model version of '{model}' at stage {stage}")]
    ModelUnavailable { model: String, stage: String },

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<polars::error::PolarsError> for MlopsError {
    fn from(err: polars::error::PolarsError) -> Self {
        MlopsError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for MlopsError {
    fn from(err: serde_json::Error) -> Self {
        MlopsError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for MlopsError {
    fn from(err: bincode::Error) -> Self {
        MlopsError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for MlopsError {
    fn from(err: ndarray::ShapeError) -> Self {
        MlopsError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for MlopsError {
    fn from(err: rusqlite::Error) -> Self {
        MlopsError::TrackingError(err.to_string())
    }
}

impl From<reqwest::Error> for MlopsError {
    fn from(err: reqwest::Error) -> Self {
        MlopsError::DownloadError(err.to_string())
    }
}

impl From<zip::result::ZipError> for MlopsError {
    fn from(err: zip::result::ZipError) -> Self {
        MlopsError::ArchiveError(err.to_string())
    }
}
