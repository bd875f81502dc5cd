use crate::config::{FailurePolicy, GridSearchConfig};
use crate::error::{PcaError, ThreadSafeStdError};
use crate::search::{
    find_best_hyperparameters, select_best, CancellationToken, CrossValidator, GridPoint,
    HyperparameterSearch, RangeTransform, RefinementMode, ScoredPoint, SearchResolution,
};

use approx::assert_abs_diff_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Predicts every label correctly at one grid point and half of them elsewhere.
struct PeakValidator {
    peak: GridPoint,
    labels: Vec<u8>,
    calls: AtomicUsize,
}

impl PeakValidator {
    fn new(peak: GridPoint) -> Self {
        Self {
            peak,
            labels: vec![0, 1, 0, 1, 1, 0, 1, 0],
            calls: AtomicUsize::new(0),
        }
    }
}

impl CrossValidator for PeakValidator {
    type Predictions = Vec<u8>;

    fn cross_validate(&self, parameters: GridPoint, _n_folds: usize) -> Result<Vec<u8>, ThreadSafeStdError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if parameters.approx_eq(&self.peak) {
            Ok(self.labels.clone())
        } else {
            Ok(self.labels.iter().enumerate().map(|(i, &l)| if i % 2 == 0 { l } else { 1 - l }).collect())
        }
    }

    fn evaluate(&self, predictions: &Vec<u8>) -> Result<f64, ThreadSafeStdError> {
        let correct = predictions.iter().zip(&self.labels).filter(|(p, l)| p == l).count();
        Ok(correct as f64 / self.labels.len() as f64)
    }
}

/// Returns a fixed accuracy everywhere and records the order of calls.
struct ConstantValidator {
    accuracy: f64,
    seen: Mutex<Vec<GridPoint>>,
}

impl ConstantValidator {
    fn new(accuracy: f64) -> Self {
        Self {
            accuracy,
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl CrossValidator for ConstantValidator {
    type Predictions = f64;

    fn cross_validate(&self, parameters: GridPoint, _n_folds: usize) -> Result<f64, ThreadSafeStdError> {
        self.seen.lock().unwrap().push(parameters);
        Ok(self.accuracy)
    }

    fn evaluate(&self, predictions: &f64) -> Result<f64, ThreadSafeStdError> {
        Ok(*predictions)
    }
}

/// Fails cross-validation at one point, scores 0.5 elsewhere.
struct FailingValidator {
    bad: GridPoint,
}

impl CrossValidator for FailingValidator {
    type Predictions = f64;

    fn cross_validate(&self, parameters: GridPoint, _n_folds: usize) -> Result<f64, ThreadSafeStdError> {
        if parameters.approx_eq(&self.bad) {
            Err("solver did not converge".into())
        } else {
            Ok(0.5)
        }
    }

    fn evaluate(&self, predictions: &f64) -> Result<f64, ThreadSafeStdError> {
        Ok(*predictions)
    }
}

fn config(log_from: i32, log_to: i32) -> GridSearchConfig {
    GridSearchConfig::new(5, log_from, log_to)
}

#[test]
fn finds_the_single_best_point() {
    let validator = PeakValidator::new(GridPoint::new(2.0, 4.0));
    let search = HyperparameterSearch::new(config(0, 2));
    let outcome = search.run(&validator, &CancellationToken::new()).unwrap();

    assert_eq!(outcome.best().point, GridPoint::new(2.0, 4.0));
    assert_eq!((outcome.best().c_log, outcome.best().gamma_log), (1, 2));
    assert_abs_diff_eq!(outcome.best().accuracy, 1.0);
    assert_eq!(outcome.evaluated_points(), 9);
    assert_eq!(validator.calls.load(Ordering::SeqCst), 9);
    assert_eq!(outcome.accuracy_of(GridPoint::new(1.0, 1.0)), Some(0.5));
    assert_eq!(outcome.accuracy_of(GridPoint::new(8.0, 1.0)), None);
}

#[test]
fn results_are_sorted_in_grid_order() {
    let validator = PeakValidator::new(GridPoint::new(1.0, 1.0));
    let outcome = HyperparameterSearch::new(config(-1, 1))
        .run(&validator, &CancellationToken::new())
        .unwrap();
    let order: Vec<(i32, i32)> = outcome.results().iter().map(|r| (r.c_log, r.gamma_log)).collect();
    let mut expected = Vec::new();
    for c in -1..=1 {
        for g in -1..=1 {
            expected.push((c, g));
        }
    }
    assert_eq!(order, expected);
    assert_eq!(outcome.log_bounds(), (-1, 1));
}

#[test]
fn inverted_bounds_fail_before_dispatch() {
    let validator = PeakValidator::new(GridPoint::new(1.0, 1.0));
    let result = HyperparameterSearch::new(config(2, 0)).run(&validator, &CancellationToken::new());
    assert!(matches!(result, Err(PcaError::ConfigurationError(_))));
    assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn ties_keep_the_smallest_c_then_gamma() {
    let validator = ConstantValidator::new(0.75);
    let outcome = HyperparameterSearch::new(config(-2, 1))
        .run(&validator, &CancellationToken::new())
        .unwrap();
    assert_eq!(outcome.best().point, GridPoint::new(0.25, 0.25));
    assert_eq!(validator.seen.lock().unwrap().len(), 16);
}

#[test]
fn gamma_values_run_in_order_within_each_c() {
    let validator = ConstantValidator::new(0.5);
    let mut cfg = config(0, 3);
    cfg.num_threads = Some(2);
    HyperparameterSearch::new(cfg)
        .run(&validator, &CancellationToken::new())
        .unwrap();
    let seen = validator.seen.lock().unwrap();
    for c in [1.0, 2.0, 4.0, 8.0] {
        let gammas: Vec<f64> = seen.iter().filter(|p| p.c == c).map(|p| p.gamma).collect();
        assert_eq!(gammas, vec![1.0, 2.0, 4.0, 8.0]);
    }
}

#[test]
fn select_best_prefers_strictly_greater() {
    let at = |c_log, gamma_log, accuracy| ScoredPoint {
        point: GridPoint::from_exponents(c_log, gamma_log),
        c_log,
        gamma_log,
        accuracy,
    };
    let results = vec![at(0, 0, 0.5), at(0, 1, 0.9), at(1, 0, 0.9), at(1, 1, 0.2)];
    assert_eq!(select_best(&results).unwrap(), results[1]);
    assert!(matches!(select_best(&[]), Err(PcaError::NoResult)));
}

#[test]
fn failing_unit_is_reported_with_its_point() {
    let bad = GridPoint::new(2.0, 1.0);
    let result = HyperparameterSearch::new(config(0, 2))
        .run(&FailingValidator { bad }, &CancellationToken::new());
    match result {
        Err(PcaError::SearchTaskFailure { total_units, failures }) => {
            assert_eq!(total_units, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].point, bad);
            assert!(matches!(failures[0].cause, PcaError::Evaluation { point, .. } if point == bad));
        }
        other => panic!("expected SearchTaskFailure, got {:?}", other),
    }
}

#[test]
fn cancel_remaining_policy_still_reports_failure() {
    let mut cfg = config(0, 4);
    cfg.failure_policy = FailurePolicy::CancelRemaining;
    let token = CancellationToken::new();
    let result = HyperparameterSearch::new(cfg).run(&FailingValidator { bad: GridPoint::new(1.0, 1.0) }, &token);
    assert!(matches!(result, Err(PcaError::SearchTaskFailure { .. })));
    // The caller's token belongs to the caller.
    assert!(!token.is_cancelled());
}

#[test]
fn non_finite_accuracy_is_a_numeric_overflow() {
    let result = HyperparameterSearch::new(config(0, 0))
        .run(&ConstantValidator::new(f64::NAN), &CancellationToken::new());
    match result {
        Err(PcaError::SearchTaskFailure { failures, .. }) => {
            assert!(matches!(failures[0].cause, PcaError::NumericOverflow(_)));
        }
        other => panic!("expected SearchTaskFailure, got {:?}", other),
    }
}

#[test]
fn accuracy_outside_unit_interval_is_rejected() {
    let result = HyperparameterSearch::new(config(0, 0))
        .run(&ConstantValidator::new(87.5), &CancellationToken::new());
    assert!(matches!(result, Err(PcaError::SearchTaskFailure { .. })));
}

#[test]
fn cancelled_token_returns_cancelled() {
    let validator = ConstantValidator::new(0.5);
    let token = CancellationToken::new();
    token.cancel();
    let result = HyperparameterSearch::new(config(0, 3)).run(&validator, &token);
    assert!(matches!(result, Err(PcaError::Cancelled { completed: 0 })));
    assert!(validator.seen.lock().unwrap().is_empty());
}

#[test]
fn zero_threads_is_a_configuration_error() {
    let mut cfg = config(0, 1);
    cfg.num_threads = Some(0);
    let result = HyperparameterSearch::new(cfg).run(&ConstantValidator::new(0.5), &CancellationToken::new());
    assert!(matches!(result, Err(PcaError::ConfigurationError(_))));
}

#[test]
fn bracket_mode_uses_the_transform_pair() {
    let validator = PeakValidator::new(GridPoint::new(2.0, 4.0));
    let (resolution, outcome) = HyperparameterSearch::new(config(0, 2))
        .find_optimal_range(
            &validator,
            &RangeTransform::square_log2(),
            RefinementMode::Bracket,
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(outcome.best().point, GridPoint::new(2.0, 4.0));
    match resolution {
        SearchResolution::Range(range) => {
            assert_abs_diff_eq!(range.from_c, 1.0);
            assert_abs_diff_eq!(range.to_c, 4.0);
            assert_abs_diff_eq!(range.from_gamma, 2.0);
            assert_abs_diff_eq!(range.to_gamma, 16.0);
        }
        other => panic!("expected a range, got {:?}", other),
    }
}

#[test]
fn raw_values_mode_returns_the_point() {
    let validator = PeakValidator::new(GridPoint::new(0.5, 8.0));
    let (best, outcome) = find_best_hyperparameters(&validator, &config(-1, 3)).unwrap();
    assert_eq!(best, GridPoint::new(0.5, 8.0));
    assert_eq!(outcome.evaluated_points(), 25);
}

#[test]
fn custom_transform_is_applied() {
    let transform = RangeTransform::new(|x| x * 2.0, |x| x / 2.0);
    let range = transform.bracket(GridPoint::new(4.0, 0.5));
    assert_abs_diff_eq!(range.from_c, 2.0);
    assert_abs_diff_eq!(range.to_c, 8.0);
    assert_abs_diff_eq!(range.from_gamma, 0.25);
    assert_abs_diff_eq!(range.to_gamma, 1.0);
}

/// Scores each point with a distinct accuracy derived from its exponents.
struct ExponentValidator {
    log_from: i32,
}

impl CrossValidator for ExponentValidator {
    type Predictions = (i32, i32);

    fn cross_validate(&self, parameters: GridPoint, _n_folds: usize) -> Result<(i32, i32), ThreadSafeStdError> {
        Ok((parameters.c.log2().round() as i32, parameters.gamma.log2().round() as i32))
    }

    fn evaluate(&self, predictions: &(i32, i32)) -> Result<f64, ThreadSafeStdError> {
        let (c_log, gamma_log) = *predictions;
        Ok(((c_log - self.log_from) * 3 + (gamma_log - self.log_from) + 1) as f64 / 10.0)
    }
}

#[test]
fn lookups_distinguish_tiny_grid_values() {
    let validator = ExponentValidator { log_from: -15 };
    let outcome = HyperparameterSearch::new(config(-15, -13))
        .run(&validator, &CancellationToken::new())
        .unwrap();
    assert_eq!(outcome.best().point, GridPoint::from_exponents(-13, -13));

    let mut expected = 0.1;
    for c_log in -15..=-13 {
        for gamma_log in -15..=-13 {
            let point = GridPoint::from_exponents(c_log, gamma_log);
            assert_abs_diff_eq!(outcome.accuracy_of(point).unwrap(), expected, epsilon = 1e-12);
            assert_abs_diff_eq!(outcome.accuracy_at(c_log, gamma_log).unwrap(), expected, epsilon = 1e-12);
            expected += 0.1;
        }
    }
    assert!(!GridPoint::from_exponents(-15, -15).approx_eq(&GridPoint::from_exponents(-14, -15)));
    assert!(GridPoint::new(1e-5, 2.0).approx_eq(&GridPoint::new(1e-5 * (1.0 + 1e-6), 2.0)));
}

/// Trips the caller's token while evaluating, i.e. after work has started.
struct CancellingValidator {
    token: CancellationToken,
}

impl CrossValidator for CancellingValidator {
    type Predictions = f64;

    fn cross_validate(&self, _parameters: GridPoint, _n_folds: usize) -> Result<f64, ThreadSafeStdError> {
        Ok(0.5)
    }

    fn evaluate(&self, predictions: &f64) -> Result<f64, ThreadSafeStdError> {
        self.token.cancel();
        Ok(*predictions)
    }
}

#[test]
fn cancelling_after_the_last_evaluation_keeps_the_outcome() {
    let token = CancellationToken::new();
    let validator = CancellingValidator { token: token.clone() };
    let outcome = HyperparameterSearch::new(config(0, 0)).run(&validator, &token).unwrap();
    assert!(token.is_cancelled());
    assert_eq!(outcome.evaluated_points(), 1);
    assert_eq!(outcome.best().point, GridPoint::new(1.0, 1.0));
}

#[test]
fn cancelling_mid_search_returns_cancelled() {
    let token = CancellationToken::new();
    let validator = CancellingValidator { token: token.clone() };
    let mut cfg = config(0, 3);
    cfg.num_threads = Some(1);
    let result = HyperparameterSearch::new(cfg).run(&validator, &token);
    assert!(matches!(result, Err(PcaError::Cancelled { completed }) if completed < 16));
}
