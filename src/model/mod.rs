//! Model module: classifier architecture, scoring interface and artifact formats

pub mod artifact;
pub mod classifier;
pub mod scorer;

pub use artifact::{load_model, probe, save_artifact, ArtifactFormat, LoadedModel};
pub use classifier::{LeafClassifier, LeafClassifierConfig};
pub use scorer::{ModelOutput, Scorer};

/// Tensor payload passed to [`Scorer::score`]
pub use burn::tensor::TensorData;
