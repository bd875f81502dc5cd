// src/decomposition.rs

//! Principal directions of a standardized corpus.
//!
//! Two strategies satisfy the same contract: a thin SVD of the standardized
//! matrix (the default) and an explicit covariance matrix followed by a
//! symmetric eigendecomposition. Both return components sorted by descending
//! eigenvalue with a canonical sign, so their outputs can be compared directly.

use log::{debug, trace};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::config::DecompositionMethod;
use crate::error::{PcaError, Result};
use crate::linalg_backends::{BackendEigh, BackendSVD, NdarrayLinAlgBackend};

/// Ranked principal directions of an N x D standardized matrix.
#[derive(Clone, Debug)]
pub struct Decomposition {
    /// Singular values of the standardized matrix, descending. Length r = min(N, D).
    pub singular_values: Array1<f64>,
    /// `singular_value^2 / (N - 1)`, descending. Length r.
    pub eigenvalues: Array1<f64>,
    /// Unit-length principal axes as columns. Shape: (D, r).
    pub components: Array2<f64>,
}

impl Decomposition {
    pub fn rank(&self) -> usize {
        self.eigenvalues.len()
    }
}

/// A strategy that turns a standardized matrix into ranked components.
pub trait Decomposer: Send + Sync {
    fn decompose(&self, standardized: ArrayView2<f64>) -> Result<Decomposition>;

    fn name(&self) -> &'static str;
}

/// Returns the strategy configured by `method`, backed by LAPACK.
pub fn decomposer_for(method: DecompositionMethod) -> Box<dyn Decomposer> {
    match method {
        DecompositionMethod::Svd => Box::new(SvdDecomposer::new()),
        DecompositionMethod::CovarianceEigen => Box::new(CovarianceDecomposer::new()),
    }
}

/// Thin SVD of the standardized matrix; right singular vectors are the components.
///
/// Only the first `min(N, D)` right vectors are computed, so the D x D factor
/// is never allocated.
#[derive(Debug, Default, Clone, Copy)]
pub struct SvdDecomposer<B = NdarrayLinAlgBackend> {
    backend: B,
}

impl SvdDecomposer<NdarrayLinAlgBackend> {
    /// LAPACK-backed decomposer.
    pub fn new() -> Self {
        Self::with_backend(NdarrayLinAlgBackend)
    }
}

impl<B: BackendSVD> SvdDecomposer<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: BackendSVD + Send + Sync> Decomposer for SvdDecomposer<B> {
    fn decompose(&self, standardized: ArrayView2<f64>) -> Result<Decomposition> {
        let (n_samples, n_features) = check_shape(standardized)?;
        let rank = n_samples.min(n_features);

        let svd = self
            .backend
            .svd_thin(standardized.to_owned())
            .map_err(|e| PcaError::Decomposition(format!("SVD of standardized matrix failed: {}", e)))?;
        let vt = svd
            .vt
            .ok_or_else(|| PcaError::Decomposition("SVD did not return V^T".to_string()))?;
        if svd.s.len() < rank || vt.nrows() < rank {
            return Err(PcaError::Decomposition(format!(
                "SVD returned {} singular values and {} right vectors, expected {}",
                svd.s.len(),
                vt.nrows(),
                rank
            )));
        }
        ensure_finite(svd.s.iter(), "singular values")?;
        ensure_finite(vt.iter(), "right singular vectors")?;

        let singular_values = svd.s.slice(s![..rank]).to_owned();
        let components = vt.slice(s![..rank, ..]).t().to_owned();
        let eigenvalues = singular_values.mapv(|sv| sv * sv / (n_samples - 1) as f64);

        let (eigenvalues, components, singular_values) =
            sort_descending(eigenvalues, components, singular_values);
        debug!(
            "SVD decomposition of {}x{} matrix produced {} components.",
            n_samples, n_features, rank
        );
        Ok(Decomposition {
            singular_values,
            eigenvalues,
            components: canonicalize_signs(components),
        })
    }

    fn name(&self) -> &'static str {
        "svd"
    }
}

/// Explicit D x D covariance followed by a symmetric eigendecomposition.
#[derive(Debug, Default, Clone, Copy)]
pub struct CovarianceDecomposer<B = NdarrayLinAlgBackend> {
    backend: B,
}

impl CovarianceDecomposer<NdarrayLinAlgBackend> {
    pub fn new() -> Self {
        Self::with_backend(NdarrayLinAlgBackend)
    }
}

impl<B: BackendEigh> CovarianceDecomposer<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Eigendecomposition of an already materialized covariance matrix.
    ///
    /// # Errors
    /// `DimensionMismatch` if `covariance` is not square.
    pub fn decompose_covariance(
        &self,
        covariance: &Array2<f64>,
        n_samples: usize,
    ) -> Result<Decomposition> {
        if covariance.nrows() != covariance.ncols() {
            return Err(PcaError::DimensionMismatch(format!(
                "covariance matrix must be square, got {}x{}",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if n_samples < 2 {
            return Err(PcaError::DimensionMismatch(format!(
                "eigendecomposition needs at least 2 samples, got {}",
                n_samples
            )));
        }
        let n_features = covariance.nrows();
        let rank = n_samples.min(n_features);

        let eigh = self
            .backend
            .eigh_upper(covariance)
            .map_err(|e| PcaError::Decomposition(format!("Eigendecomposition of covariance matrix failed: {}", e)))?;
        ensure_finite(eigh.eigenvalues.iter(), "covariance eigenvalues")?;
        ensure_finite(eigh.eigenvectors.iter(), "covariance eigenvectors")?;

        // Rounding can push the smallest eigenvalues slightly negative.
        let eigenvalues = eigh.eigenvalues.mapv(|v| v.max(0.0));
        let mut eigenvectors = eigh.eigenvectors;
        for mut column in eigenvectors.columns_mut() {
            let norm = column.dot(&column).sqrt();
            if norm > 1e-12 {
                column.mapv_inplace(|x| x / norm);
            }
        }
        let singular_values = eigenvalues.mapv(|v| (v * (n_samples - 1) as f64).sqrt());

        let (eigenvalues, eigenvectors, singular_values) =
            sort_descending(eigenvalues, eigenvectors, singular_values);
        Ok(Decomposition {
            singular_values: singular_values.slice(s![..rank]).to_owned(),
            eigenvalues: eigenvalues.slice(s![..rank]).to_owned(),
            components: canonicalize_signs(eigenvectors.slice(s![.., ..rank]).to_owned()),
        })
    }
}

impl<B: BackendEigh + Send + Sync> Decomposer for CovarianceDecomposer<B> {
    fn decompose(&self, standardized: ArrayView2<f64>) -> Result<Decomposition> {
        let (n_samples, n_features) = check_shape(standardized)?;
        let covariance = covariance_matrix(standardized)?;
        let decomposition = self.decompose_covariance(&covariance, n_samples)?;
        debug!(
            "Covariance decomposition of {}x{} matrix produced {} components.",
            n_samples,
            n_features,
            decomposition.rank()
        );
        Ok(decomposition)
    }

    fn name(&self) -> &'static str {
        "covariance-eigen"
    }
}

/// Builds `Cov(i, j) = sum_r x[r, i] * x[r, j] / (N - 1)` for a standardized matrix.
///
/// Work fans out over the outer column index `i` only; the loops over `j` and
/// over rows stay sequential inside each task.
///
/// Both `(i, j)` and `(j, i)` accumulate the same products in the same row
/// order, so the result is exactly symmetric.
///
/// # Errors
/// `NumericOverflow` naming the first non-finite entry found.
pub fn covariance_matrix(standardized: ArrayView2<f64>) -> Result<Array2<f64>> {
    let (n_samples, n_features) = check_shape(standardized)?;
    let denominator = (n_samples - 1) as f64;
    let columns: Vec<_> = standardized.axis_iter(Axis(1)).collect();

    let rows: Vec<Vec<f64>> = (0..n_features)
        .into_par_iter()
        .map(|i| -> Result<Vec<f64>> {
            let col_i = &columns[i];
            let mut row = vec![0.0; n_features];
            for (j, col_j) in columns.iter().enumerate() {
                let mut acc = 0.0;
                for r in 0..n_samples {
                    acc += col_i[r] * col_j[r];
                }
                let value = acc / denominator;
                if !value.is_finite() {
                    return Err(PcaError::NumericOverflow(format!(
                        "covariance entry ({}, {}) = {}",
                        i, j, value
                    )));
                }
                row[j] = value;
            }
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;

    trace!("Built {}x{} covariance matrix.", n_features, n_features);
    Array2::from_shape_vec((n_features, n_features), rows.concat())
        .map_err(|e| PcaError::DimensionMismatch(e.to_string()))
}

fn check_shape(matrix: ArrayView2<f64>) -> Result<(usize, usize)> {
    let (n_samples, n_features) = matrix.dim();
    if n_features == 0 {
        return Err(PcaError::DimensionMismatch("matrix has zero columns".to_string()));
    }
    if n_samples < 2 {
        return Err(PcaError::DimensionMismatch(format!(
            "decomposition needs at least 2 samples, got {}",
            n_samples
        )));
    }
    Ok((n_samples, n_features))
}

fn ensure_finite<'a>(values: impl Iterator<Item = &'a f64>, what: &str) -> Result<()> {
    for (idx, v) in values.enumerate() {
        if !v.is_finite() {
            return Err(PcaError::NumericOverflow(format!("{} (entry {} = {})", what, idx, v)));
        }
    }
    Ok(())
}

/// Sorts eigenvalues descending and applies the same permutation to the
/// component columns and the singular values.
fn sort_descending(
    eigenvalues: Array1<f64>,
    components: Array2<f64>,
    singular_values: Array1<f64>,
) -> (Array1<f64>, Array2<f64>, Array1<f64>) {
    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[b]
            .partial_cmp(&eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    (
        reorder_array_owned(&eigenvalues, &order),
        reorder_columns_owned(&components, &order),
        reorder_array_owned(&singular_values, &order),
    )
}

/// Flips each column so its largest-magnitude entry is positive.
fn canonicalize_signs(mut components: Array2<f64>) -> Array2<f64> {
    for mut column in components.columns_mut() {
        let mut pivot = 0.0_f64;
        for &v in column.iter() {
            if v.abs() > pivot.abs() {
                pivot = v;
            }
        }
        if pivot < 0.0 {
            column.mapv_inplace(|x| -x);
        }
    }
    components
}

/// Reorders the columns of a 2D array based on a slice of column indices.
pub fn reorder_columns_owned<T: Clone>(matrix: &Array2<T>, order: &[usize]) -> Array2<T> {
    matrix.select(Axis(1), order)
}

/// Reorders the elements of a 1D array based on a slice of indices.
pub fn reorder_array_owned<T: Clone>(array: &Array1<T>, order: &[usize]) -> Array1<T> {
    array.select(Axis(0), order)
}
