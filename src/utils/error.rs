//! Error Handling Module
//!
//! Defines the error type shared by the model loader, preprocessing,
//! inference and training code. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for LeafScan operations
#[derive(Error, Debug)]
pub enum LeafScanError {
    /// None of the artifact locations exist
    #[error("No model found. Looked for: {}", format_paths(.0))]
    ModelNotFound(Vec<PathBuf>),

    /// An artifact exists but could not be read
    #[error("Failed to load model from '{0}': {1}")]
    ModelLoad(PathBuf, String),

    /// Error decoding an image
    #[error("Failed to decode image at '{0}': {1}")]
    ImageDecode(PathBuf, String),

    /// Error during a forward pass or while reading its output
    #[error("Inference error: {0}")]
    Inference(String),

    /// The model produced a score with no matching class name
    #[error("Predicted class index {index} is out of range for {num_classes} class names")]
    ClassIndexOutOfRange { index: usize, num_classes: usize },

    /// The model produced no scores at all
    #[error("Model returned an empty score vector")]
    EmptyScores,

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LeafScanError {
    /// True when the failure comes from the uploaded image rather than the model
    pub fn is_input_error(&self) -> bool {
        matches!(self, LeafScanError::ImageDecode(..))
    }
}

impl From<serde_json::Error> for LeafScanError {
    fn from(err: serde_json::Error) -> Self {
        LeafScanError::Serialization(err.to_string())
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience Result type for LeafScan operations
pub type Result<T> = std::result::Result<T, LeafScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_not_found_lists_paths() {
        let err = LeafScanError::ModelNotFound(vec![
            PathBuf::from("/srv/model.mpk"),
            PathBuf::from("/srv/model.bin"),
        ]);
        let msg = format!("{}", err);
        assert!(msg.contains("/srv/model.mpk"));
        assert!(msg.contains("/srv/model.bin"));
    }

    #[test]
    fn test_class_index_error_display() {
        let err = LeafScanError::ClassIndexOutOfRange {
            index: 4,
            num_classes: 3,
        };
        assert_eq!(
            format!("{}", err),
            "Predicted class index 4 is out of range for 3 class names"
        );
    }

    #[test]
    fn test_input_error_classification() {
        let decode = LeafScanError::ImageDecode(PathBuf::from("a.png"), "bad".to_string());
        assert!(decode.is_input_error());
        assert!(!LeafScanError::EmptyScores.is_input_error());
    }
}
