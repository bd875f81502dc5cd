// Principal component analysis (PCA) of intensity-image corpora

use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::PcaTrainerConfig;
use crate::corpus::{build_corpus, flatten_image, IntensityImage};
use crate::decomposition::{decomposer_for, Decomposition};
use crate::diagnostics::ModelDiagnostics;
use crate::error::{PcaError, Result};
use crate::normalize::{Normalizer, Standardization};

/// Version tag written in front of every persisted model.
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// A trained PCA model.
///
/// Immutable once built: it is replaced, never edited, by retraining or reloading.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PcaModel {
    /// Column means of the training corpus.
    /// Shape: (n_features)
    means: Array1<f64>,
    /// Divisors used for standardization: population standard deviations of the
    /// training corpus with zero-variance columns replaced by 1.0.
    /// Shape: (n_features)
    std_devs: Array1<f64>,
    /// Singular values of the standardized corpus, descending.
    /// Shape: (min(n_samples, n_features))
    singular_values: Array1<f64>,
    /// `singular_value^2 / (n_samples - 1)`, descending.
    /// Shape: (min(n_samples, n_features))
    eigenvalues: Array1<f64>,
    /// Retained principal components as orthonormal columns.
    /// Shape: (n_features, component_count)
    rotation: Array2<f64>,
    /// Number of images the model was trained on.
    n_samples: usize,
}

impl PcaModel {
    /// Assembles a model from its parts, validating shapes and values.
    ///
    /// # Errors
    /// `CorruptModel` if any field is inconsistent with the others.
    pub fn from_parts(
        means: Array1<f64>,
        std_devs: Array1<f64>,
        singular_values: Array1<f64>,
        eigenvalues: Array1<f64>,
        rotation: Array2<f64>,
        n_samples: usize,
    ) -> Result<Self> {
        let model = PcaModel {
            means,
            std_devs,
            singular_values,
            eigenvalues,
            rotation,
            n_samples,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn means(&self) -> &Array1<f64> {
        &self.means
    }

    pub fn std_devs(&self) -> &Array1<f64> {
        &self.std_devs
    }

    pub fn singular_values(&self) -> &Array1<f64> {
        &self.singular_values
    }

    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    /// Retained components as columns, shape (n_features, component_count).
    pub fn rotation(&self) -> &Array2<f64> {
        &self.rotation
    }

    /// The `index`-th component vector, if retained.
    pub fn component(&self, index: usize) -> Option<ArrayView1<f64>> {
        (index < self.component_count()).then(|| self.rotation.column(index))
    }

    pub fn component_count(&self) -> usize {
        self.rotation.ncols()
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn standardization(&self) -> Standardization {
        Standardization {
            means: self.means.clone(),
            std_devs: self.std_devs.clone(),
        }
    }

    pub fn diagnostics(&self) -> ModelDiagnostics {
        ModelDiagnostics::compute(
            &self.rotation.view(),
            &self.eigenvalues.view(),
            &self.singular_values.view(),
        )
    }

    fn validate(&self) -> Result<()> {
        let d = self.means.len();
        if self.std_devs.len() != d || self.rotation.nrows() != d {
            return Err(PcaError::CorruptModel(format!(
                "inconsistent feature dimensions: means={}, std_devs={}, component length={}",
                d,
                self.std_devs.len(),
                self.rotation.nrows()
            )));
        }
        if self.singular_values.len() != self.eigenvalues.len() {
            return Err(PcaError::CorruptModel(format!(
                "singular values ({}) and eigenvalues ({}) differ in length",
                self.singular_values.len(),
                self.eigenvalues.len()
            )));
        }
        if self.eigenvalues.len() < self.rotation.ncols() {
            return Err(PcaError::CorruptModel(format!(
                "{} components retained but only {} eigenvalues present",
                self.rotation.ncols(),
                self.eigenvalues.len()
            )));
        }
        if self.std_devs.iter().any(|&v| !v.is_finite() || v <= 0.0) {
            return Err(PcaError::CorruptModel(
                "std_devs contain non-finite or non-positive values".to_string(),
            ));
        }
        if self
            .eigenvalues
            .iter()
            .chain(self.singular_values.iter())
            .any(|&v| !v.is_finite() || v < 0.0)
        {
            return Err(PcaError::CorruptModel(
                "spectrum contains non-finite or negative values".to_string(),
            ));
        }
        if self
            .means
            .iter()
            .chain(self.rotation.iter())
            .any(|v| !v.is_finite())
        {
            return Err(PcaError::CorruptModel(
                "means or components contain non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}

/// On-disk layout. Declares its dimensions explicitly so loading can detect
/// truncated or tampered payloads.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct PersistedModel {
    pub(crate) format_version: u32,
    pub(crate) n_features: usize,
    pub(crate) component_count: usize,
    pub(crate) model: PcaModel,
}

impl PersistedModel {
    fn into_model(self) -> Result<PcaModel> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(PcaError::CorruptModel(format!(
                "unsupported format version {} (expected {})",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if self.model.n_features() != self.n_features
            || self.model.rotation.nrows() != self.n_features
        {
            return Err(PcaError::CorruptModel(format!(
                "declared dimension {} but component vectors have length {} and means length {}",
                self.n_features,
                self.model.rotation.nrows(),
                self.model.n_features()
            )));
        }
        if self.model.component_count() != self.component_count {
            return Err(PcaError::CorruptModel(format!(
                "declared {} components but {} are present",
                self.component_count,
                self.model.component_count()
            )));
        }
        self.model.validate()?;
        Ok(self.model)
    }
}

/// Principal component analysis (PCA) trainer and projector.
///
/// Holds the training configuration and, once trained or loaded, the model.
#[derive(Debug, Clone, Default)]
pub struct PCA {
    config: PcaTrainerConfig,
    model: Option<PcaModel>,
}

impl PCA {
    /// Creates an untrained PCA with the given configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use pca_gridsearch::{PCA, PcaTrainerConfig};
    /// let pca = PCA::new(PcaTrainerConfig::default());
    /// assert!(pca.model().is_none());
    /// ```
    pub fn new(config: PcaTrainerConfig) -> Self {
        Self { config, model: None }
    }

    /// Wraps an existing model.
    pub fn with_model(config: PcaTrainerConfig, model: PcaModel) -> Self {
        Self {
            config,
            model: Some(model),
        }
    }

    pub fn config(&self) -> &PcaTrainerConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&PcaModel> {
        self.model.as_ref()
    }

    /// Trains on a corpus of equally sized images, replacing any previous model.
    ///
    /// # Errors
    /// `DimensionMismatch` for an empty or mixed-size corpus or fewer than 2 images,
    /// `NumericOverflow` for non-finite intermediate values, `Decomposition` if the
    /// linear algebra backend fails.
    pub fn train<I: IntensityImage>(&mut self, images: &[I]) -> Result<&PcaModel> {
        let corpus = build_corpus(images)?;
        info!(
            "Training PCA on {} images of {} pixels.",
            corpus.nrows(),
            corpus.ncols()
        );
        self.fit(corpus)
    }

    /// Fits the model to an N x D data matrix (rows are samples).
    ///
    /// * `data_matrix` - consumed and standardized in place.
    pub fn fit(&mut self, data_matrix: Array2<f64>) -> Result<&PcaModel> {
        self.config.validate()?;
        let n_samples = data_matrix.nrows();
        let normalizer = Normalizer::new(&self.config);
        let (standardized, standardization) = normalizer.fit_transform(data_matrix)?;

        let decomposer = decomposer_for(self.config.method);
        info!(
            "Decomposing {}x{} standardized matrix with the {} strategy.",
            standardized.nrows(),
            standardized.ncols(),
            decomposer.name()
        );
        let decomposition = decomposer.decompose(standardized.view())?;
        let retained = self.retained_component_count(&decomposition);

        let rotation = decomposition.components.slice(s![.., ..retained]).to_owned();
        let model = PcaModel::from_parts(
            standardization.means,
            standardization.std_devs,
            decomposition.singular_values,
            decomposition.eigenvalues,
            rotation,
            n_samples,
        )?;

        let diagnostics = model.diagnostics();
        debug!(
            "Retained {} of {} components; orthogonality error {:?}, retained variance {:?}.",
            diagnostics.component_count,
            model.eigenvalues.len(),
            diagnostics.orthogonality_error,
            diagnostics.retained_variance_ratio
        );
        if diagnostics.component_count == 0 {
            warn!("PCA retained no components; projections will fail until retrained.");
        }
        Ok(&*self.model.insert(model))
    }

    fn retained_component_count(&self, decomposition: &Decomposition) -> usize {
        let rank = decomposition.rank();
        let by_tolerance = match self.config.tolerance {
            Some(tol) => {
                let largest = decomposition.eigenvalues.first().copied().unwrap_or(0.0);
                if largest <= 1e-9 {
                    0
                } else {
                    let threshold = largest * tol;
                    decomposition
                        .eigenvalues
                        .iter()
                        .take_while(|&&v| v > threshold)
                        .count()
                }
            }
            None => rank,
        };
        let cap = self.config.max_components.unwrap_or(rank);
        by_tolerance.min(cap).min(rank)
    }

    fn trained_model(&self) -> Result<&PcaModel> {
        match self.model.as_ref() {
            Some(model) if model.component_count() > 0 => Ok(model),
            _ => Err(PcaError::ModelNotTrained),
        }
    }

    fn check_component_count(model: &PcaModel, k: usize) -> Result<()> {
        if k > model.component_count() {
            return Err(PcaError::InvalidComponentCount {
                requested: k,
                available: model.component_count(),
            });
        }
        Ok(())
    }

    /// Projects one raw sample onto the first `k` components.
    ///
    /// # Errors
    /// `ModelNotTrained`, `InvalidComponentCount` if `k` exceeds the retained
    /// components, `DimensionMismatch` if the sample length differs from the model's.
    pub fn project(&self, sample: ArrayView1<f64>, k: usize) -> Result<Array1<f64>> {
        let model = self.trained_model()?;
        Self::check_component_count(model, k)?;
        let standardized = model.standardization().apply_to_sample(sample)?;
        Ok(standardized.dot(&model.rotation.slice(s![.., ..k])))
    }

    /// Flattens an image row-major and projects it onto the first `k` components.
    pub fn project_image<I: IntensityImage + ?Sized>(&self, image: &I, k: usize) -> Result<Array1<f64>> {
        let flattened = Array1::from(flatten_image(image)?);
        self.project(flattened.view(), k)
    }

    /// Projects every row of `x` onto the first `k` components.
    ///
    /// * `x` - shape (m_samples, n_features); consumed and standardized in place.
    pub fn transform(&self, mut x: Array2<f64>, k: usize) -> Result<Array2<f64>> {
        let model = self.trained_model()?;
        Self::check_component_count(model, k)?;
        model.standardization().apply(&mut x)?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::NumericOverflow(
                "standardization of batch input".to_string(),
            ));
        }
        Ok(x.dot(&model.rotation.slice(s![.., ..k])))
    }

    /// Saves the model to `path` with bincode.
    ///
    /// # Errors
    /// `ModelNotTrained` if there is no model, `Io`/`Serialization` on write failure.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let model = self.model.as_ref().ok_or(PcaError::ModelNotTrained)?;
        let persisted = PersistedModel {
            format_version: MODEL_FORMAT_VERSION,
            n_features: model.n_features(),
            component_count: model.component_count(),
            model: model.clone(),
        };
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(&persisted, &mut writer, bincode::config::standard())?;
        writer.flush()?;
        debug!("Saved PCA model to {:?}.", path.as_ref());
        Ok(())
    }

    /// Loads a model previously written by `save_model`.
    ///
    /// # Errors
    /// `Io` if the file cannot be opened, `Serialization` if it cannot be decoded,
    /// `CorruptModel` if the decoded model fails validation.
    pub fn load_model<P: AsRef<Path>>(path: P, config: PcaTrainerConfig) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let persisted: PersistedModel =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
        let model = persisted.into_model()?;
        info!(
            "Loaded PCA model from {:?} ({} features, {} components).",
            path.as_ref(),
            model.n_features(),
            model.component_count()
        );
        Ok(Self::with_model(config, model))
    }
}

/// Column-wise maximum absolute dot product between two sets of unit vectors,
/// ignoring sign. Handy for comparing components from different strategies.
pub fn component_alignment(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Vec<f64> {
    a.axis_iter(Axis(1))
        .zip(b.axis_iter(Axis(1)))
        .map(|(x, y)| x.dot(&y).abs())
        .collect()
}
