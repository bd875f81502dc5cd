// src/normalize.rs

use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::PcaTrainerConfig;
use crate::error::{PcaError, Result};

/// Per-column centering and scaling learned from a training matrix.
///
/// `std_devs` holds the divisors actually applied: population standard deviations
/// (denominator N), with near-zero entries replaced by 1.0. Every entry is finite
/// and strictly positive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Standardization {
    pub means: Array1<f64>,
    pub std_devs: Array1<f64>,
}

impl Standardization {
    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    /// Standardizes `data` in place.
    pub fn apply(&self, data: &mut Array2<f64>) -> Result<()> {
        if data.ncols() != self.n_features() {
            return Err(PcaError::DimensionMismatch(format!(
                "matrix has {} columns, standardization was fitted on {}",
                data.ncols(),
                self.n_features()
            )));
        }
        for mut row in data.axis_iter_mut(Axis(0)) {
            Zip::from(&mut row)
                .and(&self.means)
                .and(&self.std_devs)
                .for_each(|val, &m, &s| *val = (*val - m) / s);
        }
        Ok(())
    }

    /// Standardizes a single sample, returning a new vector.
    pub fn apply_to_sample(&self, sample: ArrayView1<f64>) -> Result<Array1<f64>> {
        if sample.len() != self.n_features() {
            return Err(PcaError::DimensionMismatch(format!(
                "sample has {} features, standardization was fitted on {}",
                sample.len(),
                self.n_features()
            )));
        }
        let mut out = sample.to_owned();
        Zip::from(&mut out)
            .and(&self.means)
            .and(&self.std_devs)
            .for_each(|val, &m, &s| *val = (*val - m) / s);
        if let Some(idx) = out.iter().position(|v| !v.is_finite()) {
            return Err(PcaError::NumericOverflow(format!(
                "standardization of sample feature {}",
                idx
            )));
        }
        Ok(out)
    }
}

/// Computes column statistics and standardizes matrices column-wise.
#[derive(Clone, Debug)]
pub struct Normalizer {
    zero_variance_threshold: f64,
}

impl Normalizer {
    pub fn new(config: &PcaTrainerConfig) -> Self {
        Self {
            zero_variance_threshold: config.zero_variance_threshold,
        }
    }

    /// Learns column means and standard deviations.
    ///
    /// # Errors
    /// `DimensionMismatch` for fewer than 2 rows or zero columns, `NumericOverflow`
    /// if a column sum or squared-deviation sum is not finite.
    pub fn fit(&self, data: ArrayView2<f64>) -> Result<Standardization> {
        let (n_samples, n_features) = data.dim();
        if n_features == 0 {
            return Err(PcaError::DimensionMismatch(
                "matrix has zero columns".to_string(),
            ));
        }
        if n_samples < 2 {
            return Err(PcaError::DimensionMismatch(format!(
                "standardization needs at least 2 samples, got {}",
                n_samples
            )));
        }
        let n = n_samples as f64;
        let threshold = self.zero_variance_threshold;

        let column_stats: Vec<(f64, f64)> = data
            .axis_iter(Axis(1))
            .into_par_iter()
            .enumerate()
            .map(|(col_idx, column)| -> Result<(f64, f64)> {
                let sum: f64 = column.sum();
                if !sum.is_finite() {
                    return Err(PcaError::NumericOverflow(format!(
                        "column sum for column {} ({})",
                        col_idx, sum
                    )));
                }
                let mean = sum / n;
                let sum_sq_dev: f64 = column.iter().map(|&x| (x - mean).powi(2)).sum();
                if !sum_sq_dev.is_finite() {
                    return Err(PcaError::NumericOverflow(format!(
                        "squared deviation sum for column {} ({})",
                        col_idx, sum_sq_dev
                    )));
                }
                let std_dev = (sum_sq_dev / n).sqrt();
                if std_dev.abs() < threshold {
                    trace!("Column {} has zero variance; using divisor 1.0.", col_idx);
                    Ok((mean, 1.0))
                } else {
                    Ok((mean, std_dev))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let (means, std_devs): (Vec<f64>, Vec<f64>) = column_stats.into_iter().unzip();
        let constant_columns = std_devs.iter().filter(|&&s| s == 1.0).count();
        debug!(
            "Fitted standardization on {} samples x {} features ({} columns with divisor 1.0).",
            n_samples, n_features, constant_columns
        );
        Ok(Standardization {
            means: Array1::from(means),
            std_devs: Array1::from(std_devs),
        })
    }

    /// Fits on `data`, then standardizes it in place.
    pub fn fit_transform(&self, mut data: Array2<f64>) -> Result<(Array2<f64>, Standardization)> {
        let standardization = self.fit(data.view())?;
        standardization.apply(&mut data)?;
        Ok((data, standardization))
    }
}

/// Assembles a matrix from equal-length rows.
///
/// # Errors
/// `DimensionMismatch` naming the first row whose length differs from row 0.
pub fn matrix_from_rows(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let n_cols = rows.first().map_or(0, |r| r.len());
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_cols) {
        return Err(PcaError::DimensionMismatch(format!(
            "row {} has {} values, expected {}",
            idx,
            row.len(),
            n_cols
        )));
    }
    Array2::from_shape_vec((rows.len(), n_cols), rows.concat())
        .map_err(|e| PcaError::DimensionMismatch(e.to_string()))
}
