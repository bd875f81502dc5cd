// src/diagnostics.rs

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Numerical health of a trained model, logged after training and available to callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDiagnostics {
    pub n_features: usize,
    pub component_count: usize,
    /// ||I - V^T V||_F over the retained components.
    pub orthogonality_error: Option<f64>,
    /// Number of adjacent eigenvalue pairs that increase.
    pub eigenvalue_order_violations: usize,
    /// sigma_max / smallest non-zero sigma over the full spectrum.
    pub condition_number: Option<f64>,
    /// Fraction of the total variance carried by the retained components.
    pub retained_variance_ratio: Option<f64>,
}

impl ModelDiagnostics {
    pub fn compute(
        rotation: &ArrayView2<f64>,
        eigenvalues: &ArrayView1<f64>,
        singular_values: &ArrayView1<f64>,
    ) -> Self {
        let component_count = rotation.ncols();
        let total_variance: f64 = eigenvalues.sum();
        let retained: f64 = eigenvalues.iter().take(component_count).sum();
        ModelDiagnostics {
            n_features: rotation.nrows(),
            component_count,
            orthogonality_error: compute_orthogonality_error(rotation),
            eigenvalue_order_violations: count_order_violations(eigenvalues, 0.0),
            condition_number: compute_condition_number(singular_values),
            retained_variance_ratio: if total_variance > 1e-12 {
                Some(retained / total_variance)
            } else {
                None
            },
        }
    }
}

/// Computes Frobenius norm for an f64 matrix.
pub fn compute_frob_norm(matrix: &ArrayView2<f64>) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    matrix.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Computes orthogonality error ||I - Q^T Q||_F, where Q holds vectors as columns.
pub fn compute_orthogonality_error(q_matrix: &ArrayView2<f64>) -> Option<f64> {
    if q_matrix.nrows() == 0 || q_matrix.ncols() == 0 {
        return None;
    }
    let qtq = q_matrix.t().dot(q_matrix);
    let identity = Array2::<f64>::eye(qtq.nrows());
    let diff = identity - qtq;
    Some(compute_frob_norm(&diff.view()))
}

/// Largest |A[i,j] - A[j,i]|. `None` for non-square or empty input.
pub fn compute_symmetry_error(matrix: &ArrayView2<f64>) -> Option<f64> {
    if matrix.nrows() != matrix.ncols() || matrix.is_empty() {
        return None;
    }
    let n = matrix.nrows();
    let mut max_err = 0.0_f64;
    for i in 0..n {
        for j in (i + 1)..n {
            max_err = max_err.max((matrix[[i, j]] - matrix[[j, i]]).abs());
        }
    }
    Some(max_err)
}

/// Condition number from an already computed spectrum.
pub fn compute_condition_number(singular_values: &ArrayView1<f64>) -> Option<f64> {
    if singular_values.is_empty() {
        return None;
    }
    let sigma_max = singular_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let sigma_min_non_zero = singular_values
        .iter()
        .cloned()
        .filter(|&s| s > 1e-12)
        .fold(f64::INFINITY, f64::min);
    if sigma_min_non_zero == f64::INFINITY {
        return Some(f64::INFINITY);
    }
    Some(sigma_max / sigma_min_non_zero)
}

/// Counts adjacent pairs with `values[i + 1] > values[i] + tolerance`.
pub fn count_order_violations(values: &ArrayView1<f64>, tolerance: f64) -> usize {
    values
        .windows(2)
        .into_iter()
        .filter(|pair| pair[1] > pair[0] + tolerance)
        .count()
}
