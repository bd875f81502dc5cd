// src/error.rs

use std::error::Error;
use thiserror::Error;

use crate::search::{GridPoint, UnitFailure};

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
///
/// External collaborators (the classifier's cross-validation, caller-supplied
/// image sources) report their failures with this type.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PcaError>;

/// Every failure the training, projection, persistence and search paths can report.
#[derive(Error, Debug)]
pub enum PcaError {
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Non-finite value encountered during {0}")]
    NumericOverflow(String),

    #[error("PCA model has not been trained or loaded, or it holds no components.")]
    ModelNotTrained,

    #[error("Requested {requested} components, but the model only holds {available}.")]
    InvalidComponentCount { requested: usize, available: usize },

    #[error("Model file failed validation: {0}")]
    CorruptModel(String),

    #[error("Grid search produced no results.")]
    NoResult,

    #[error(
        "{} of {total_units} grid search units failed; first failure: {}",
        .failures.len(),
        .failures.first().map(|f| f.to_string()).unwrap_or_default()
    )]
    SearchTaskFailure {
        total_units: usize,
        failures: Vec<UnitFailure>,
    },

    #[error("Grid search was cancelled after {completed} evaluations.")]
    Cancelled { completed: usize },

    #[error("Cross-validation failed at {point}: {source}")]
    Evaluation {
        point: GridPoint,
        #[source]
        source: ThreadSafeStdError,
    },

    #[error("Decomposition failed: {0}")]
    Decomposition(String),

    #[error("Failed to read or write model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode or decode model: {0}")]
    Serialization(String),

    #[error("Failed to write report: {0}")]
    Report(#[from] csv::Error),
}

impl From<bincode::error::EncodeError> for PcaError {
    fn from(e: bincode::error::EncodeError) -> Self {
        PcaError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for PcaError {
    fn from(e: bincode::error::DecodeError) -> Self {
        PcaError::Serialization(e.to_string())
    }
}
