// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh as NdLinalgEigh, JobSvd, SVDDCInto as NdLinalgSVDDCInto, UPLO};

use crate::error::ThreadSafeStdError;

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput {
    /// Eigenvalues, typically sorted in ascending order.
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<f64>,
}

/// Trait for symmetric eigendecomposition (similar to LAPACK's DSYEVD).
/// Implementers will typically expect `matrix` to be symmetric.
pub trait BackendEigh {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError>;
}

/// Output of a thin Singular Value Decomposition of an M x N matrix, K = min(M, N).
#[derive(Debug)]
pub struct SVDOutput {
    /// Left singular vectors, shape (M, K).
    pub u: Option<Array2<f64>>,
    /// Singular values, descending as returned by LAPACK. Length K.
    pub s: Array1<f64>,
    /// Right singular vectors as rows, shape (K, N).
    pub vt: Option<Array2<f64>>,
}

/// Trait for thin Singular Value Decomposition.
/// Implementers must never allocate the full N x N right factor.
pub trait BackendSVD {
    fn svd_thin(&self, matrix: Array2<f64>) -> Result<SVDOutput, ThreadSafeStdError>;
}

/// LAPACK-backed implementation through `ndarray-linalg`. The concrete LAPACK
/// (OpenBLAS or MKL, static or system) is selected by Cargo features.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendEigh for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, ThreadSafeStdError> {
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

impl BackendSVD for NdarrayLinAlgBackend {
    fn svd_thin(&self, matrix: Array2<f64>) -> Result<SVDOutput, ThreadSafeStdError> {
        // Divide and conquer with economy-size factors: U is M x K, V^T is K x N.
        let (u, s, vt) = matrix.svddc_into(JobSvd::Some).map_err(to_dyn_error)?;
        Ok(SVDOutput { u, s, vt })
    }
}
