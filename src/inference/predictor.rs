//! Inference Predictor Module
//!
//! Ties a loaded model to its class list: preprocess an image, score it,
//! pick the best class.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::dataset::preprocess::preprocess_path;
use crate::model::LoadedModel;
use crate::utils::error::{LeafScanError, Result};

/// Class list used when none is configured
pub const DEFAULT_CLASS_NAMES: &str = "Potato___Early_blight,Potato___Late_blight,Tomato_healthy";

/// Split a comma-separated class list; entries are trimmed and empties dropped
pub fn parse_class_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Outcome of scoring one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted class index
    pub class_index: usize,
    /// Predicted class name
    pub label: String,
    /// Raw model score at the predicted index
    pub confidence: f32,
}

/// Argmax over `scores`, mapped through `class_names`
///
/// Ties resolve to the lowest index. An index with no matching class name is
/// an error, never wrapped or clamped.
pub fn select_class(scores: &[f32], class_names: &[String]) -> Result<Prediction> {
    if scores.is_empty() {
        return Err(LeafScanError::EmptyScores);
    }

    let (class_index, confidence) = scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, v)| match best {
            _ if v.is_nan() => best,
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
        .ok_or_else(|| LeafScanError::Inference("model produced only NaN scores".to_string()))?;

    let label = class_names
        .get(class_index)
        .ok_or(LeafScanError::ClassIndexOutOfRange {
            index: class_index,
            num_classes: class_names.len(),
        })?
        .clone();

    Ok(Prediction {
        class_index,
        label,
        confidence,
    })
}

/// Model plus class list
#[derive(Debug, Clone)]
pub struct Predictor {
    model: LoadedModel,
    class_names: Vec<String>,
}

impl Predictor {
    pub fn new(model: LoadedModel, class_names: Vec<String>) -> Self {
        if model.num_classes != class_names.len() {
            tracing::warn!(
                "Model has {} outputs but {} class names are configured",
                model.num_classes,
                class_names.len()
            );
        }
        Self { model, class_names }
    }

    pub fn input_size(&self) -> usize {
        self.model.input_size
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn model(&self) -> &LoadedModel {
        &self.model
    }

    /// Preprocess, score and label an image already saved at `path`
    pub fn predict_path(&self, path: &Path) -> Result<Prediction> {
        let input = preprocess_path(path, self.model.input_size)?;
        let scores = self.model.scorer.score(input)?;
        select_class(&scores, &self.class_names)
    }

    /// Same as [`Predictor::predict_path`], also reporting elapsed time
    pub fn predict_timed(&self, path: &Path) -> Result<(Prediction, Duration)> {
        let start = Instant::now();
        let prediction = self.predict_path(path)?;
        Ok((prediction, start.elapsed()))
    }
}
