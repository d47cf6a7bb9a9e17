//! Dataset module: image preprocessing, directory discovery, splitting and batching

pub mod burn_dataset;
pub mod loader;
pub mod preprocess;
pub mod split;

pub use burn_dataset::{LeafBatch, LeafBatcher, LeafImageDataset, LeafItem};
pub use loader::{write_class_names, ImageSample, LabeledImageDir};
pub use preprocess::{preprocess_image, preprocess_path};
pub use split::{train_val_split, SplitConfig, TrainValSplit};
