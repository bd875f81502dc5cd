// src/search.rs

//! Parallel, cross-validated grid search over the classifier hyperparameters
//! `C` and `gamma`, both sampled as powers of two.
//!
//! Work is split into one rayon task per `C` value; each task walks the `gamma`
//! values sequentially. Only the outer dimension is parallel.
//!
//! Tasks send scored points over a channel. The coordinator drains it only
//! after every task has returned, sorts by `(C, gamma)` exponents and picks the
//! strictly best accuracy, so the winner never depends on completion order.

use float_cmp::approx_eq;
use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;

use crate::config::{FailurePolicy, GridSearchConfig};
use crate::error::{PcaError, Result, ThreadSafeStdError};
use crate::report::AccuracyReport;

/// Relative tolerance used whenever grid coordinates are compared.
/// Grid values span many orders of magnitude, so the margin scales with them.
pub const GRID_VALUE_EPSILON: f64 = 1e-4;

/// A (C, gamma) hyperparameter pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub c: f64,
    pub gamma: f64,
}

impl GridPoint {
    pub fn new(c: f64, gamma: f64) -> Self {
        Self { c, gamma }
    }

    /// `(2^c_log, 2^gamma_log)`.
    pub fn from_exponents(c_log: i32, gamma_log: i32) -> Self {
        Self {
            c: 2f64.powi(c_log),
            gamma: 2f64.powi(gamma_log),
        }
    }

    /// Equality within a relative `GRID_VALUE_EPSILON` on both coordinates.
    pub fn approx_eq(&self, other: &GridPoint) -> bool {
        relative_eq(self.c, other.c) && relative_eq(self.gamma, other.gamma)
    }
}

fn relative_eq(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return true;
    }
    approx_eq!(f64, a / scale, b / scale, epsilon = GRID_VALUE_EPSILON)
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(C={}, gamma={})", self.c, self.gamma)
    }
}

/// Cross-validated accuracy of one grid point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub point: GridPoint,
    pub c_log: i32,
    pub gamma_log: i32,
    /// Fraction of correct predictions, in [0, 1].
    pub accuracy: f64,
}

/// Bounds for a finer second search pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub from_c: f64,
    pub to_c: f64,
    pub from_gamma: f64,
    pub to_gamma: f64,
}

/// A monotone function pair used to bracket the best point.
///
/// `from` bounds come from `inverse`, `to` bounds from `forward`.
pub struct RangeTransform {
    forward: Box<dyn Fn(f64) -> f64 + Send + Sync>,
    inverse: Box<dyn Fn(f64) -> f64 + Send + Sync>,
}

impl RangeTransform {
    pub fn new<F, G>(forward: F, inverse: G) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
        G: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            forward: Box::new(forward),
            inverse: Box::new(inverse),
        }
    }

    /// `forward(x) = x^2`, `inverse(x) = log2(x)`.
    pub fn square_log2() -> Self {
        Self::new(|x| x.powi(2), f64::log2)
    }

    pub fn bracket(&self, best: GridPoint) -> ParameterRange {
        ParameterRange {
            from_c: (self.inverse)(best.c),
            to_c: (self.forward)(best.c),
            from_gamma: (self.inverse)(best.gamma),
            to_gamma: (self.forward)(best.gamma),
        }
    }
}

impl Default for RangeTransform {
    fn default() -> Self {
        Self::square_log2()
    }
}

impl fmt::Debug for RangeTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeTransform").finish_non_exhaustive()
    }
}

/// What `find_optimal_range` hands back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefinementMode {
    /// Bracket the best point with the transform pair.
    #[default]
    Bracket,
    /// Return the best point's own coordinates.
    RawValues,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SearchResolution {
    Range(ParameterRange),
    Point(GridPoint),
}

/// The classifier's cross-validation capability.
///
/// One instance is shared by every search task, hence `Sync`.
pub trait CrossValidator: Sync {
    /// Per-fold predictions produced by cross-validation.
    type Predictions;

    /// Runs `n_folds`-fold cross-validation with the given hyperparameters.
    fn cross_validate(
        &self,
        parameters: GridPoint,
        n_folds: usize,
    ) -> std::result::Result<Self::Predictions, ThreadSafeStdError>;

    /// Turns predictions into an accuracy in [0, 1].
    fn evaluate(&self, predictions: &Self::Predictions) -> std::result::Result<f64, ThreadSafeStdError>;
}

/// Cooperative cancellation flag shared between a caller and a running search.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A failure captured inside one unit of work.
#[derive(Debug)]
pub struct UnitFailure {
    pub point: GridPoint,
    pub cause: PcaError,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

enum UnitMessage {
    Scored(ScoredPoint),
    Failed(UnitFailure),
}

/// All scored points of a completed search, sorted by `(c_log, gamma_log)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSearchOutcome {
    best: ScoredPoint,
    results: Vec<ScoredPoint>,
    log_from: i32,
    log_to: i32,
}

impl GridSearchOutcome {
    pub fn best(&self) -> &ScoredPoint {
        &self.best
    }

    pub fn results(&self) -> &[ScoredPoint] {
        &self.results
    }

    pub fn evaluated_points(&self) -> usize {
        self.results.len()
    }

    pub fn log_bounds(&self) -> (i32, i32) {
        (self.log_from, self.log_to)
    }

    /// Accuracy recorded for `point`, matched within a relative `GRID_VALUE_EPSILON`.
    pub fn accuracy_of(&self, point: GridPoint) -> Option<f64> {
        self.results
            .iter()
            .find(|r| r.point.approx_eq(&point))
            .map(|r| r.accuracy)
    }

    /// Accuracy recorded at `(2^c_log, 2^gamma_log)`.
    pub fn accuracy_at(&self, c_log: i32, gamma_log: i32) -> Option<f64> {
        self.results
            .iter()
            .find(|r| r.c_log == c_log && r.gamma_log == gamma_log)
            .map(|r| r.accuracy)
    }

    pub fn report(&self) -> AccuracyReport {
        AccuracyReport::new(&self.results, self.log_from, self.log_to)
    }
}

/// Picks the strictly greatest accuracy from results sorted in grid order.
/// Ties keep the earliest point, i.e. the smallest C, then the smallest gamma.
///
/// # Errors
/// `NoResult` if `results` is empty.
pub fn select_best(results: &[ScoredPoint]) -> Result<ScoredPoint> {
    let (first, rest) = results.split_first().ok_or(PcaError::NoResult)?;
    Ok(rest.iter().fold(*first, |best, candidate| {
        if candidate.accuracy > best.accuracy {
            *candidate
        } else {
            best
        }
    }))
}

/// Runs the logarithmic grid search described by a `GridSearchConfig`.
#[derive(Clone, Debug)]
pub struct HyperparameterSearch {
    config: GridSearchConfig,
}

impl HyperparameterSearch {
    pub fn new(config: GridSearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GridSearchConfig {
        &self.config
    }

    /// Evaluates every grid point and returns the full outcome.
    ///
    /// Blocks until every unit has finished.
    ///
    /// # Errors
    /// `ConfigurationError` before dispatch for invalid bounds or folds,
    /// `SearchTaskFailure` if any unit failed, `Cancelled` if `cancel` was
    /// tripped, `NoResult` if nothing was scored.
    pub fn run<V: CrossValidator>(
        &self,
        validator: &V,
        cancel: &CancellationToken,
    ) -> Result<GridSearchOutcome> {
        self.config.validate()?;
        let exponents: Vec<i32> = self.config.exponents().collect();
        let total_units = exponents.len();
        info!(
            "Starting grid search: {} C values x {} gamma values, {}-fold cross-validation.",
            total_units, total_units, self.config.n_folds
        );
        let start_time = std::time::Instant::now();

        let abort = CancellationToken::new();
        let (sender, receiver) = mpsc::channel::<UnitMessage>();
        let dispatch = || {
            exponents
                .par_iter()
                .for_each_with(sender, |tx, &c_log| {
                    self.run_unit(validator, c_log, &exponents, cancel, &abort, tx)
                });
        };
        match self.config.num_threads {
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| PcaError::ConfigurationError(format!("failed to build worker pool: {}", e)))?;
                pool.install(dispatch);
            }
            None => dispatch(),
        }

        // Every task has returned and dropped its sender; nothing writes past this point.
        let mut scored = Vec::with_capacity(total_units * total_units);
        let mut failures = Vec::new();
        for message in receiver.try_iter() {
            match message {
                UnitMessage::Scored(point) => scored.push(point),
                UnitMessage::Failed(failure) => failures.push(failure),
            }
        }

        if !failures.is_empty() {
            failures.sort_by(|a, b| {
                (a.point.c, a.point.gamma)
                    .partial_cmp(&(b.point.c, b.point.gamma))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            warn!(
                "Grid search finished with {} failed units out of {}.",
                failures.len(),
                total_units
            );
            return Err(PcaError::SearchTaskFailure {
                total_units,
                failures,
            });
        }
        // A token tripped after the last evaluation leaves a complete grid.
        if scored.len() < total_units * total_units && cancel.is_cancelled() {
            info!("Grid search cancelled after {} evaluations.", scored.len());
            return Err(PcaError::Cancelled {
                completed: scored.len(),
            });
        }

        scored.sort_by_key(|r| (r.c_log, r.gamma_log));
        let best = select_best(&scored)?;
        info!(
            "Grid search finished in {:.2?}: best {} with accuracy {:.4}.",
            start_time.elapsed(),
            best.point,
            best.accuracy
        );
        Ok(GridSearchOutcome {
            best,
            results: scored,
            log_from: self.config.log_from,
            log_to: self.config.log_to,
        })
    }

    /// Runs the search, then resolves the best point per `mode`.
    pub fn find_optimal_range<V: CrossValidator>(
        &self,
        validator: &V,
        transform: &RangeTransform,
        mode: RefinementMode,
        cancel: &CancellationToken,
    ) -> Result<(SearchResolution, GridSearchOutcome)> {
        let outcome = self.run(validator, cancel)?;
        let best = outcome.best().point;
        let resolution = match mode {
            RefinementMode::Bracket => {
                let range = transform.bracket(best);
                debug!("Bracketed best point {} as {:?}.", best, range);
                SearchResolution::Range(range)
            }
            RefinementMode::RawValues => SearchResolution::Point(best),
        };
        Ok((resolution, outcome))
    }

    /// One unit of work: a fixed C, every gamma in ascending order.
    fn run_unit<V: CrossValidator>(
        &self,
        validator: &V,
        c_log: i32,
        gamma_exponents: &[i32],
        cancel: &CancellationToken,
        abort: &CancellationToken,
        tx: &mut Sender<UnitMessage>,
    ) {
        for &gamma_log in gamma_exponents {
            if cancel.is_cancelled() || abort.is_cancelled() {
                trace!("Unit C=2^{} stopping early: search cancelled.", c_log);
                return;
            }
            let point = GridPoint::from_exponents(c_log, gamma_log);
            let message = match evaluate_point(validator, point, self.config.n_folds) {
                Ok(accuracy) => {
                    trace!("Evaluated {}: accuracy {:.4}.", point, accuracy);
                    UnitMessage::Scored(ScoredPoint {
                        point,
                        c_log,
                        gamma_log,
                        accuracy,
                    })
                }
                Err(cause) => {
                    warn!("Grid search unit failed at {}: {}", point, cause);
                    if self.config.failure_policy == FailurePolicy::CancelRemaining {
                        abort.cancel();
                    }
                    // Receiver outlives every task, so a send cannot fail here.
                    let _ = tx.send(UnitMessage::Failed(UnitFailure { point, cause }));
                    return;
                }
            };
            if tx.send(message).is_err() {
                return;
            }
        }
    }
}

fn evaluate_point<V: CrossValidator>(validator: &V, point: GridPoint, n_folds: usize) -> Result<f64> {
    let predictions = validator
        .cross_validate(point, n_folds)
        .map_err(|source| PcaError::Evaluation { point, source })?;
    let accuracy = validator
        .evaluate(&predictions)
        .map_err(|source| PcaError::Evaluation { point, source })?;
    if !accuracy.is_finite() {
        return Err(PcaError::NumericOverflow(format!(
            "accuracy evaluation at {} ({})",
            point, accuracy
        )));
    }
    if !(0.0..=1.0).contains(&accuracy) {
        return Err(PcaError::Evaluation {
            point,
            source: format!("accuracy {} lies outside [0, 1]", accuracy).into(),
        });
    }
    Ok(accuracy)
}

/// Coarse pass of the classic "grid search on a log2 scale" recipe.
///
/// Uses the `x^2` / `log2` transform pair in raw-values mode and returns the
/// best (C, gamma) found.
pub fn find_best_hyperparameters<V: CrossValidator>(
    validator: &V,
    config: &GridSearchConfig,
) -> Result<(GridPoint, GridSearchOutcome)> {
    let search = HyperparameterSearch::new(config.clone());
    let (resolution, outcome) = search.find_optimal_range(
        validator,
        &RangeTransform::square_log2(),
        RefinementMode::RawValues,
        &CancellationToken::new(),
    )?;
    match resolution {
        SearchResolution::Point(best) => Ok((best, outcome)),
        SearchResolution::Range(range) => Ok((GridPoint::new(range.from_c, range.from_gamma), outcome)),
    }
}
