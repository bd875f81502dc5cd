// src/pipeline.rs

//! Glue between the persisted PCA model, the grid search and its report.

use log::info;
use std::path::Path;

use crate::config::PipelineSettings;
use crate::corpus::IntensityImage;
use crate::error::Result;
use crate::pca::PCA;
use crate::report::WriteMode;
use crate::search::{find_best_hyperparameters, CrossValidator, GridPoint, GridSearchOutcome};

/// Loads the model stored at `settings.model_path` if present; otherwise trains
/// on `images` and stores the result there.
///
/// A file that exists but fails to decode or validate is reported, not retrained over.
pub fn obtain_model<I: IntensityImage>(images: &[I], settings: &PipelineSettings) -> Result<PCA> {
    let path = settings.model_path.as_path();
    if path.exists() {
        info!("Reusing PCA model at {:?}.", path);
        return PCA::load_model(path, settings.trainer.clone());
    }
    info!("No PCA model at {:?}; training on {} images.", path, images.len());
    let mut pca = PCA::new(settings.trainer.clone());
    pca.train(images)?;
    pca.save_model(path)?;
    Ok(pca)
}

/// Runs the coarse search from `settings` and, when `report_path` is given,
/// writes the accuracy grid there.
pub fn search_and_report<V: CrossValidator>(
    validator: &V,
    settings: &PipelineSettings,
    report_path: Option<&Path>,
    mode: WriteMode,
) -> Result<(GridPoint, GridSearchOutcome)> {
    let (best, outcome) = find_best_hyperparameters(validator, &settings.grid_search_config())?;
    if let Some(path) = report_path {
        outcome.report().save_to_path(path, mode)?;
    }
    Ok((best, outcome))
}
