// src/corpus.rs

use log::debug;
use ndarray::Array2;

use crate::error::{PcaError, Result};

/// Defines how the corpus builder reads an intensity image.
///
/// Pixels are 16-bit unsigned intensities laid out row-major: the pixel at
/// column `x` of row `y` lives at index `y * width + x`.
pub trait IntensityImage {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn pixels(&self) -> &[u16];

    /// Number of pixels, i.e. the flattened feature dimension.
    fn pixel_count(&self) -> usize {
        self.width() * self.height()
    }
}

/// An owned, fixed-size grayscale image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSample {
    width: usize,
    height: usize,
    pixels: Vec<u16>,
}

impl ImageSample {
    /// Wraps row-major pixel data.
    ///
    /// # Errors
    /// `DimensionMismatch` if `pixels.len() != width * height`.
    pub fn new(width: usize, height: usize, pixels: Vec<u16>) -> Result<Self> {
        if pixels.len() != width * height {
            return Err(PcaError::DimensionMismatch(format!(
                "image declares {}x{} ({} pixels) but carries {} pixels",
                width,
                height,
                width * height,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Builds an image from rows of pixels (`rows[y][x]`).
    ///
    /// # Errors
    /// `DimensionMismatch` if the rows are ragged.
    pub fn from_rows(rows: &[Vec<u16>]) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, |r| r.len());
        if let Some((y, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(PcaError::DimensionMismatch(format!(
                "image row {} has {} pixels, expected {}",
                y,
                row.len(),
                width
            )));
        }
        Self::new(width, height, rows.concat())
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u16> {
        if x < self.width && y < self.height {
            Some(self.pixels[y * self.width + x])
        } else {
            None
        }
    }
}

impl IntensityImage for ImageSample {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn pixels(&self) -> &[u16] {
        &self.pixels
    }
}

/// Flattens a single image into a feature vector of length `width * height`.
pub fn flatten_image<I: IntensityImage + ?Sized>(image: &I) -> Result<Vec<f64>> {
    let expected = image.pixel_count();
    let pixels = image.pixels();
    if pixels.len() != expected {
        return Err(PcaError::DimensionMismatch(format!(
            "image declares {}x{} but exposes {} pixels",
            image.width(),
            image.height(),
            pixels.len()
        )));
    }
    Ok(pixels.iter().map(|&p| p as f64).collect())
}

/// Materializes the images as an N x D matrix, one flattened image per row.
///
/// # Errors
/// `DimensionMismatch` if the corpus is empty, an image has zero pixels,
/// or any image differs in width or height from the first one.
pub fn build_corpus<I: IntensityImage>(images: &[I]) -> Result<Array2<f64>> {
    let first = images.first().ok_or_else(|| {
        PcaError::DimensionMismatch("image corpus is empty".to_string())
    })?;
    let (width, height) = (first.width(), first.height());
    let n_features = width * height;
    if n_features == 0 {
        return Err(PcaError::DimensionMismatch(format!(
            "images must have at least one pixel, got {}x{}",
            width, height
        )));
    }

    let mut corpus = Array2::<f64>::zeros((images.len(), n_features));
    for (row_idx, image) in images.iter().enumerate() {
        if image.width() != width || image.height() != height {
            return Err(PcaError::DimensionMismatch(format!(
                "image {} is {}x{}, but the corpus is {}x{}",
                row_idx,
                image.width(),
                image.height(),
                width,
                height
            )));
        }
        let flattened = flatten_image(image)?;
        corpus
            .row_mut(row_idx)
            .iter_mut()
            .zip(flattened)
            .for_each(|(dst, src)| *dst = src);
    }

    debug!(
        "Built corpus of {} images ({}x{}, {} features).",
        images.len(),
        width,
        height,
        n_features
    );
    Ok(corpus)
}
