// Principal component analysis (PCA) over intensity images, with a cross-validated
// (C, gamma) grid search for the downstream classifier.

#![doc = include_str!("../README.md")]

pub mod config;
pub mod corpus;
pub mod decomposition;
pub mod diagnostics;
pub mod error;
pub mod linalg_backends;
pub mod normalize;
pub mod pca;
pub mod pipeline;
pub mod report;
pub mod search;

pub use config::{
    DecompositionMethod, FailurePolicy, GridSearchConfig, PcaTrainerConfig, PipelineSettings,
};
pub use corpus::{build_corpus, flatten_image, ImageSample, IntensityImage};
pub use error::{PcaError, Result, ThreadSafeStdError};
pub use pca::{PcaModel, PCA};
pub use pipeline::{obtain_model, search_and_report};
pub use report::{AccuracyReport, WriteMode};
pub use search::{
    find_best_hyperparameters, CancellationToken, CrossValidator, GridPoint, GridSearchOutcome,
    HyperparameterSearch, ParameterRange, RangeTransform, RefinementMode, ScoredPoint,
    SearchResolution,
};

#[cfg(test)]
mod search_tests;
