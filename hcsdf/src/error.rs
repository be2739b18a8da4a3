use std::sync::Arc;

use thiserror::Error;

/// Failures surfaced by the dataset layer and the pipeline.
///
/// `InsufficientTrainingData` and `DegenerateColumn` are recovered inside the
/// pipeline; they only reach callers through the strict entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("insufficient training data: {0}")]
    InsufficientTrainingData(String),

    #[error("degenerate column '{0}': all values are equal")]
    DegenerateColumn(String),

    #[error("worker failed on '{key}': {message}")]
    WorkerFailure { key: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// One failure handed to every caller that waited on the same computation.
    #[error(transparent)]
    Shared(Arc<EngineError>),
}

impl From<Arc<EngineError>> for EngineError {
    fn from(error: Arc<EngineError>) -> Self {
        Arc::try_unwrap(error).unwrap_or_else(EngineError::Shared)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
