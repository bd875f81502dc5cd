// src/config.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{PcaError, Result};

/// Standard deviations below this are treated as zero and replaced by a divisor of 1.0.
pub const DEFAULT_ZERO_VARIANCE_THRESHOLD: f64 = 1e-9;

/// Which decomposition the trainer runs on the standardized corpus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompositionMethod {
    /// Thin SVD of the standardized matrix. Never forms the D x D covariance.
    #[default]
    Svd,
    /// Explicit covariance matrix followed by a symmetric eigendecomposition.
    /// Useful for diagnostics; memory grows with D^2.
    CovarianceEigen,
}

/// Configuration for training a PCA model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaTrainerConfig {
    pub method: DecompositionMethod,
    /// Columns whose standard deviation falls below this use a divisor of 1.0.
    pub zero_variance_threshold: f64,
    /// Optional: keep only components whose eigenvalue exceeds
    /// `tolerance * largest_eigenvalue`. `None` keeps the full spectrum.
    pub tolerance: Option<f64>,
    /// Optional upper bound on the number of retained components.
    pub max_components: Option<usize>,
}

impl Default for PcaTrainerConfig {
    fn default() -> Self {
        PcaTrainerConfig {
            method: DecompositionMethod::Svd,
            zero_variance_threshold: DEFAULT_ZERO_VARIANCE_THRESHOLD,
            tolerance: None,
            max_components: None,
        }
    }
}

impl PcaTrainerConfig {
    pub fn with_method(mut self, method: DecompositionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.zero_variance_threshold.is_finite() || self.zero_variance_threshold < 0.0 {
            return Err(PcaError::ConfigurationError(format!(
                "zero_variance_threshold must be finite and non-negative, got {}",
                self.zero_variance_threshold
            )));
        }
        if let Some(tol) = self.tolerance {
            if !(0.0..=1.0).contains(&tol) {
                return Err(PcaError::ConfigurationError(format!(
                    "tolerance must lie in [0, 1], got {}",
                    tol
                )));
            }
        }
        if self.max_components == Some(0) {
            return Err(PcaError::ConfigurationError(
                "max_components must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Largest magnitude accepted for a grid exponent. `2^e` stays a finite,
/// non-zero f64 within this range.
pub const MAX_GRID_EXPONENT: i32 = 1000;

/// What happens to the remaining grid search units once one of them fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Let every other unit run to completion, then report all failures.
    #[default]
    ContinueRemaining,
    /// Trip the search's cancellation token so pending evaluations are skipped.
    CancelRemaining,
}

/// Configuration for the logarithmic (C, gamma) grid search.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSearchConfig {
    /// Number of cross-validation folds handed to the classifier.
    pub n_folds: usize,
    /// Smallest base-2 exponent, inclusive, for both C and gamma.
    pub log_from: i32,
    /// Largest base-2 exponent, inclusive, for both C and gamma.
    pub log_to: i32,
    pub failure_policy: FailurePolicy,
    /// Size of a dedicated worker pool. `None` runs on rayon's global pool.
    pub num_threads: Option<usize>,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        GridSearchConfig {
            n_folds: 5,
            log_from: -5,
            log_to: 15,
            failure_policy: FailurePolicy::ContinueRemaining,
            num_threads: None,
        }
    }
}

impl GridSearchConfig {
    pub fn new(n_folds: usize, log_from: i32, log_to: i32) -> Self {
        GridSearchConfig {
            n_folds,
            log_from,
            log_to,
            ..Default::default()
        }
    }

    /// Checks bounds before any work is dispatched.
    pub fn validate(&self) -> Result<()> {
        if self.log_from > self.log_to {
            return Err(PcaError::ConfigurationError(format!(
                "log_from ({}) must not exceed log_to ({})",
                self.log_from, self.log_to
            )));
        }
        for exponent in [self.log_from, self.log_to] {
            if !(-MAX_GRID_EXPONENT..=MAX_GRID_EXPONENT).contains(&exponent) {
                return Err(PcaError::ConfigurationError(format!(
                    "grid exponent {} lies outside [-{}, {}]",
                    exponent, MAX_GRID_EXPONENT, MAX_GRID_EXPONENT
                )));
            }
        }
        if self.n_folds < 2 {
            return Err(PcaError::ConfigurationError(format!(
                "cross-validation needs at least 2 folds, got {}",
                self.n_folds
            )));
        }
        if self.num_threads == Some(0) {
            return Err(PcaError::ConfigurationError(
                "num_threads must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Exponents covered on each axis, ascending.
    pub fn exponents(&self) -> std::ops::RangeInclusive<i32> {
        self.log_from..=self.log_to
    }

    /// Number of distinct values on each axis.
    pub fn axis_len(&self) -> usize {
        if self.log_from > self.log_to {
            0
        } else {
            (i64::from(self.log_to) - i64::from(self.log_from) + 1) as usize
        }
    }
}

/// The named values the surrounding application supplies to the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub n_folds: usize,
    pub log_from: i32,
    pub log_to: i32,
    /// Where the trained PCA model is persisted and reloaded from.
    pub model_path: PathBuf,
    pub trainer: PcaTrainerConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let search = GridSearchConfig::default();
        PipelineSettings {
            n_folds: search.n_folds,
            log_from: search.log_from,
            log_to: search.log_to,
            model_path: PathBuf::from("pca_model.bin"),
            trainer: PcaTrainerConfig::default(),
        }
    }
}

impl PipelineSettings {
    pub fn grid_search_config(&self) -> GridSearchConfig {
        GridSearchConfig::new(self.n_folds, self.log_from, self.log_to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_bounds_are_a_configuration_error() {
        let config = GridSearchConfig::new(5, 2, 0);
        assert!(matches!(config.validate(), Err(PcaError::ConfigurationError(_))));
        assert_eq!(config.axis_len(), 0);
    }

    #[test]
    fn single_exponent_grid_is_valid() {
        let config = GridSearchConfig::new(3, 1, 1);
        assert!(config.validate().is_ok());
        assert_eq!(config.axis_len(), 1);
        assert_eq!(config.exponents().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn exponents_must_keep_grid_values_finite_and_positive() {
        assert!(GridSearchConfig::new(5, -1000, 1000).validate().is_ok());
        for (from, to) in [(-1024, 0), (0, 1024), (i32::MIN, i32::MAX)] {
            let config = GridSearchConfig::new(5, from, to);
            assert!(matches!(config.validate(), Err(PcaError::ConfigurationError(_))));
        }
        assert_eq!(GridSearchConfig::new(5, i32::MIN, i32::MAX).axis_len(), 1usize << 32);
    }

    #[test]
    fn too_few_folds_are_rejected() {
        assert!(GridSearchConfig::new(1, 0, 2).validate().is_err());
    }

    #[test]
    fn trainer_tolerance_must_be_a_fraction() {
        let config = PcaTrainerConfig {
            tolerance: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PcaError::ConfigurationError(_))));
        assert!(PcaTrainerConfig::default().validate().is_ok());
    }

    #[test]
    fn pipeline_settings_feed_the_search_config() {
        let settings = PipelineSettings {
            n_folds: 10,
            log_from: -2,
            log_to: 3,
            ..Default::default()
        };
        let search = settings.grid_search_config();
        assert_eq!((search.n_folds, search.log_from, search.log_to), (10, -2, 3));
        assert_eq!(search.failure_policy, FailurePolicy::ContinueRemaining);
    }
}
